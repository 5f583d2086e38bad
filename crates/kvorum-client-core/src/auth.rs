use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
pub const ENV_API_BASE_URL: &str = "KVORUM_API_BASE_URL";
pub const ENV_API_BASE_URL_LEGACY: &str = "MKD_API_BASE_URL";
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const ADMIN_CONSENT_VERSION: &str = "1.1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("login must not be empty")]
    EmptyLogin,
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("new password and confirmation do not match")]
    PasswordMismatch,
    #[error("new password must be at least {MIN_PASSWORD_LENGTH} characters")]
    PasswordTooShort,
}

impl AuthInputError {
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::EmptyBaseUrl | Self::InvalidBaseUrl => "Не настроен адрес сервера",
            Self::EmptyLogin => "Укажите логин",
            Self::EmptyPassword => "Укажите пароль",
            Self::PasswordMismatch => "Новый пароль и подтверждение не совпадают",
            Self::PasswordTooShort => "Новый пароль должен быть не короче 8 символов",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(login: &str, password: &str) -> Result<Self, AuthInputError> {
        let login = login.trim();
        if login.is_empty() {
            return Err(AuthInputError::EmptyLogin);
        }
        if password.is_empty() {
            return Err(AuthInputError::EmptyPassword);
        }
        Ok(Self {
            login: login.to_string(),
            password: password.to_string(),
        })
    }
}

/// Successful answer of both token-issuing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

impl PasswordChangeRequest {
    pub fn new(
        current_password: &str,
        new_password: &str,
        confirmation: &str,
    ) -> Result<Self, AuthInputError> {
        if new_password != confirmation {
            return Err(AuthInputError::PasswordMismatch);
        }
        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthInputError::PasswordTooShort);
        }
        Ok(Self {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub consent_version: String,
}

impl Default for ConsentRequest {
    fn default() -> Self {
        Self {
            consent_version: ADMIN_CONSENT_VERSION.to_string(),
        }
    }
}

pub fn resolve_api_base_url() -> Result<(String, &'static str), AuthInputError> {
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_API_BASE_URL));
    }
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL_LEGACY) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_API_BASE_URL_LEGACY));
    }
    normalize_base_url(DEFAULT_API_BASE_URL).map(|normalized| (normalized, "default_local"))
}

pub fn normalize_base_url(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(AuthInputError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}
