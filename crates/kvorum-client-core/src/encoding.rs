use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::Value;

/// Standard alphabet, padding optional. Inputs are translated from the
/// URL-safe alphabet first, so both `eyJ...=` and `eyJ..._-` decode.
/// A space is read back as `+`, since form decoding of a fragment turns
/// `+` into a space.
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(crate) fn decode_base64url_lenient(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let translated = raw
        .trim_matches(|ch: char| ch.is_whitespace() && ch != ' ')
        .chars()
        .map(|ch| match ch {
            '-' => '+',
            '_' => '/',
            ' ' => '+',
            other => other,
        })
        .collect::<String>();
    LENIENT_STANDARD.decode(translated.as_bytes())
}

pub(crate) fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Stringifies a JSON scalar the way the backend coerces Telegram fields.
/// `null` yields `None`; nested values keep their JSON text.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
