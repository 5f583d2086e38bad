//! Display helpers shared by the resident form and the admin tables.

pub const EMPTY_INVENTORY_MESSAGE: &str = "Данные по дому пока не загружены.";

/// Entrance labels longer than this are shown verbatim.
const SHORT_ENTRANCE_LABEL_MAX: usize = 5;

/// Normalizes a Russian phone number to `+7 (XXX) XXX-XX-XX`.
///
/// Numbers that cannot be normalized are returned trimmed but otherwise
/// untouched, so the user sees what they typed.
#[must_use]
pub fn format_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let mut digits = trimmed
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    if digits.is_empty() {
        return String::new();
    }
    if digits.len() == 11 && digits.starts_with('8') {
        digits.replace_range(0..1, "7");
    } else if digits.len() == 10 {
        digits.insert(0, '7');
    }
    if digits.len() != 11 || !digits.starts_with('7') {
        return trimmed.to_string();
    }
    format!(
        "+7 ({}) {}-{}-{}",
        &digits[1..4],
        &digits[4..7],
        &digits[7..9],
        &digits[9..11]
    )
}

fn is_long_entrance_label(label: &str) -> bool {
    label.chars().count() > SHORT_ENTRANCE_LABEL_MAX
}

#[must_use]
pub fn entrance_button_label(label: &str) -> String {
    if is_long_entrance_label(label) {
        label.to_string()
    } else {
        format!("Подъезд {label}")
    }
}

#[must_use]
pub fn entrance_bar_label(label: &str) -> String {
    if is_long_entrance_label(label) {
        label.to_string()
    } else {
        format!("Подъезд: {label}")
    }
}

#[must_use]
pub fn entrance_inline_label(label: &str) -> String {
    if is_long_entrance_label(label) {
        label.to_string()
    } else {
        format!("подъезд {label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_with_leading_eight_becomes_plus_seven() {
        assert_eq!(format_phone("89991234567"), "+7 (999) 123-45-67");
        assert_eq!(format_phone("8 (999) 123-45-67"), "+7 (999) 123-45-67");
    }

    #[test]
    fn ten_digit_phone_gets_country_code() {
        assert_eq!(format_phone("9991234567"), "+7 (999) 123-45-67");
        assert_eq!(format_phone("+7 999 123 45 67"), "+7 (999) 123-45-67");
    }

    #[test]
    fn unformattable_phone_is_returned_trimmed() {
        assert_eq!(format_phone(" 123 "), "123");
        assert_eq!(format_phone("+44 20 7946 0958"), "+44 20 7946 0958");
        assert_eq!(format_phone("   "), "");
        assert_eq!(format_phone("нет"), "");
    }

    #[test]
    fn short_entrance_labels_are_prefixed() {
        assert_eq!(entrance_button_label("2"), "Подъезд 2");
        assert_eq!(entrance_bar_label("2"), "Подъезд: 2");
        assert_eq!(entrance_inline_label("2"), "подъезд 2");
    }

    #[test]
    fn long_entrance_labels_are_shown_verbatim() {
        let label = "Корпус Б";
        assert_eq!(entrance_button_label(label), label);
        assert_eq!(entrance_bar_label(label), label);
        assert_eq!(entrance_inline_label(label), label);
    }
}
