//! Error taxonomy shared by every screen that talks to the backend.
//!
//! Transport failures, validation failures and authorization failures are
//! kept apart so a caller can decide between "show message", "show message
//! next to the field" and "drop the session". Nothing here retries.

use serde_json::Value;

pub const NETWORK_ERROR_MESSAGE: &str = "Ошибка сети";
pub const RATE_LIMITED_MESSAGE: &str = "Превышен лимит отправок. Повторите позже.";
pub const CONSENT_REQUIRED_DETAIL: &str = "Policy consent required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Network,
    Validation,
    Unauthorized,
    Forbidden,
    ConsentRequired,
    NotFound,
    RateLimited,
    Server,
    Decode,
    Unknown,
}

impl ApiErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::ConsentRequired => "consent_required",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Decode => "decode",
            Self::Unknown => "unknown",
        }
    }

    /// 401/403 end the session; the consent gate is a 403 that does not.
    #[must_use]
    pub fn requires_logout(self) -> bool {
        matches!(self, Self::Unauthorized | Self::Forbidden)
    }

    /// Whether repeating the same user action can succeed without changes.
    #[must_use]
    pub fn retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::Server)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status_code: u16,
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn network() -> Self {
        Self {
            status_code: 0,
            kind: ApiErrorKind::Network,
            message: NETWORK_ERROR_MESSAGE.to_string(),
        }
    }

    #[must_use]
    pub fn decode(status_code: u16, fallback: &str) -> Self {
        Self {
            status_code,
            kind: ApiErrorKind::Decode,
            message: fallback.to_string(),
        }
    }

    #[must_use]
    pub fn requires_logout(&self) -> bool {
        self.kind.requires_logout()
    }
}

/// Maps an HTTP status plus the server-provided `detail` onto the taxonomy.
/// `fallback` is shown when the server did not send a readable detail.
#[must_use]
pub fn classify_http_error(status_code: u16, detail: Option<&str>, fallback: &str) -> ApiError {
    let kind = match status_code {
        0 => ApiErrorKind::Network,
        400 | 409 | 413 | 415 | 422 => ApiErrorKind::Validation,
        401 => ApiErrorKind::Unauthorized,
        403 if detail == Some(CONSENT_REQUIRED_DETAIL) => ApiErrorKind::ConsentRequired,
        403 => ApiErrorKind::Forbidden,
        404 => ApiErrorKind::NotFound,
        429 => ApiErrorKind::RateLimited,
        500..=599 => ApiErrorKind::Server,
        _ => ApiErrorKind::Unknown,
    };
    let message = match kind {
        ApiErrorKind::Network => NETWORK_ERROR_MESSAGE.to_string(),
        ApiErrorKind::RateLimited => RATE_LIMITED_MESSAGE.to_string(),
        _ => detail
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(fallback)
            .to_string(),
    };
    ApiError {
        status_code,
        kind,
        message,
    }
}

/// Reads `detail` from an error body: a string is taken verbatim, a
/// validation list is flattened to `msg; msg`. Anything else is structured
/// data a user cannot read, so `None`.
#[must_use]
pub fn extract_detail(body: &Value) -> Option<String> {
    match body.get("detail")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(message) => message.to_string(),
                    None => item.to_string(),
                })
                .collect::<Vec<_>>();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}
