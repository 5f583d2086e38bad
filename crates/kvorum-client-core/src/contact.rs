//! Resident questionnaire and admin contact edits: validation, wire bodies
//! and the per-tab form cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::encoding::non_empty;
use crate::format::format_phone;
use crate::session::KeyValueStore;

pub const CONSENT_VERSION: &str = "1.0";
pub const FORM_CACHE_KEY: &str = "mkd_form_cache";
pub const FORM_SUBMITTED_KEY: &str = "mkd_form_submitted";
pub const SUBMIT_ACCEPTED_MESSAGE: &str = "Данные приняты";
pub const SUBMIT_FAILED_MESSAGE: &str = "Ошибка отправки";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierVote {
    For,
    Against,
    Undecided,
}

impl BarrierVote {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::For => "ЗА",
            Self::Against => "Против",
            Self::Undecided => "Не определился",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteFormat {
    #[default]
    Electronic,
    Paper,
    Undecided,
}

impl VoteFormat {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Electronic => "Электронно",
            Self::Paper => "Бумага",
            Self::Undecided => "Не определился",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisteredEd {
    Yes,
    No,
}

impl RegisteredEd {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Yes => "Да",
            Self::No => "Нет",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Validated,
    Inactive,
}

impl ContactStatus {
    pub const ALL: [Self; 3] = [Self::Pending, Self::Validated, Self::Inactive];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Inactive => "inactive",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Ожидает",
            Self::Validated => "Валидирован",
            Self::Inactive => "Неактуальный",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == raw.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContactFormError {
    #[error("at least one of phone, email or telegram id is required")]
    MissingContact,
    #[error("personal data consent is required")]
    MissingConsent,
    #[error("captcha token is required")]
    MissingCaptcha,
}

impl ContactFormError {
    /// The form field the message is shown under.
    #[must_use]
    pub fn field(self) -> &'static str {
        match self {
            Self::MissingContact => "contact",
            Self::MissingConsent => "consent",
            Self::MissingCaptcha => "captcha",
        }
    }

    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::MissingContact => "Укажите хотя бы один контакт: телефон, email или Telegram",
            Self::MissingConsent => "Необходимо согласие на обработку ПДн",
            Self::MissingCaptcha => "Пройдите проверку капчи",
        }
    }
}

/// What the resident typed into the questionnaire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDraft {
    pub premise_id: String,
    pub is_owner: bool,
    pub phone: String,
    pub email: String,
    pub telegram_id: String,
    pub barrier_vote: Option<BarrierVote>,
    pub vote_format: Option<VoteFormat>,
    pub registered_ed: Option<RegisteredEd>,
    pub consent: bool,
    pub captcha_token: Option<String>,
}

impl ContactDraft {
    fn has_contact(&self) -> bool {
        [&self.phone, &self.email, &self.telegram_id]
            .iter()
            .any(|value| !value.trim().is_empty())
    }

    /// Checks contact, then consent, then captcha; the first failure wins.
    pub fn validate(&self, captcha_required: bool) -> Result<ContactSubmission, ContactFormError> {
        if !self.has_contact() {
            return Err(ContactFormError::MissingContact);
        }
        if !self.consent {
            return Err(ContactFormError::MissingConsent);
        }
        let captcha_token = self.captcha_token.as_deref().and_then(non_empty);
        if captcha_required && captcha_token.is_none() {
            return Err(ContactFormError::MissingCaptcha);
        }
        Ok(ContactSubmission {
            premise_id: self.premise_id.trim().to_string(),
            is_owner: self.is_owner,
            phone: non_empty(&format_phone(&self.phone)),
            email: non_empty(&self.email),
            telegram_id: non_empty(&self.telegram_id),
            barrier_vote: self.barrier_vote,
            vote_format: self.vote_format,
            registered_ed: self.registered_ed,
            consent_version: CONSENT_VERSION.to_string(),
            captcha_token,
        })
    }

    #[must_use]
    pub fn cached_fields(&self) -> CachedContactFields {
        CachedContactFields {
            is_owner: Some(self.is_owner),
            phone: non_empty(&self.phone),
            email: non_empty(&self.email),
            telegram_id: non_empty(&self.telegram_id),
            barrier_vote: self.barrier_vote,
            vote_format: self.vote_format,
            registered_ed: self.registered_ed,
        }
    }

    /// Prefills a draft for another unit from cached answers.
    pub fn apply_cached(&mut self, cached: &CachedContactFields) {
        if let Some(is_owner) = cached.is_owner {
            self.is_owner = is_owner;
        }
        for (target, value) in [
            (&mut self.phone, &cached.phone),
            (&mut self.email, &cached.email),
            (&mut self.telegram_id, &cached.telegram_id),
        ] {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }
        self.barrier_vote = cached.barrier_vote.or(self.barrier_vote);
        self.vote_format = cached.vote_format.or(self.vote_format);
        self.registered_ed = cached.registered_ed.or(self.registered_ed);
    }
}

/// Body of `POST /api/submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSubmission {
    pub premise_id: String,
    pub is_owner: bool,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub telegram_id: Option<String>,
    pub barrier_vote: Option<BarrierVote>,
    pub vote_format: Option<VoteFormat>,
    pub registered_ed: Option<RegisteredEd>,
    pub consent_version: String,
    pub captcha_token: Option<String>,
}

/// Admin-side create/update of a contact. Voting answers only apply to
/// owners and are sent as null otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminContactDraft {
    pub premise_id: Option<String>,
    pub is_owner: bool,
    pub phone: String,
    pub email: String,
    pub telegram_id: String,
    pub barrier_vote: Option<BarrierVote>,
    pub vote_format: Option<VoteFormat>,
    pub registered_ed: Option<RegisteredEd>,
}

impl AdminContactDraft {
    pub fn validate(&self) -> Result<AdminContactUpsert, ContactFormError> {
        let has_contact = [&self.phone, &self.email, &self.telegram_id]
            .iter()
            .any(|value| !value.trim().is_empty());
        if !has_contact {
            return Err(ContactFormError::MissingContact);
        }
        let (barrier_vote, vote_format, registered_ed) = if self.is_owner {
            (self.barrier_vote, self.vote_format, self.registered_ed)
        } else {
            (None, None, None)
        };
        Ok(AdminContactUpsert {
            premise_id: self.premise_id.as_deref().and_then(non_empty),
            is_owner: self.is_owner,
            phone: non_empty(&format_phone(&self.phone)),
            email: non_empty(&self.email),
            telegram_id: non_empty(&self.telegram_id),
            barrier_vote,
            vote_format,
            registered_ed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminContactUpsert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premise_id: Option<String>,
    pub is_owner: bool,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub telegram_id: Option<String>,
    pub barrier_vote: Option<BarrierVote>,
    pub vote_format: Option<VoteFormat>,
    pub registered_ed: Option<RegisteredEd>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmitReceipt {
    #[must_use]
    pub fn user_message(&self) -> &str {
        self.message.as_deref().unwrap_or(SUBMIT_ACCEPTED_MESSAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[must_use]
pub fn field_errors_by_name(errors: &[FieldError]) -> BTreeMap<String, String> {
    errors
        .iter()
        .map(|error| (error.field.clone(), error.message.clone()))
        .collect()
}

/// The subset of answers carried between units in one browser tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContactFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_owner: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier_vote: Option<BarrierVote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_format: Option<VoteFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_ed: Option<RegisteredEd>,
}

/// Form cache over any [`KeyValueStore`]. Storage failures are logged and
/// otherwise ignored; a missing cache only costs the user some typing.
#[derive(Debug)]
pub struct FormCache<S> {
    store: S,
}

impl<S: KeyValueStore> FormCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn save(&self, fields: &CachedContactFields) {
        let encoded = match serde_json::to_string(fields) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::debug!(%error, "form cache encode failed");
                return;
            }
        };
        if let Err(error) = self.store.set(FORM_CACHE_KEY, &encoded) {
            tracing::debug!(%error, "form cache write failed");
        }
    }

    #[must_use]
    pub fn load(&self) -> Option<CachedContactFields> {
        let raw = match self.store.get(FORM_CACHE_KEY) {
            Ok(raw) => raw?,
            Err(error) => {
                tracing::debug!(%error, "form cache read failed");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|error| tracing::debug!(%error, "form cache unreadable"))
            .ok()
    }

    pub fn clear(&self) {
        for key in [FORM_CACHE_KEY, FORM_SUBMITTED_KEY] {
            if let Err(error) = self.store.remove(key) {
                tracing::debug!(%error, key, "form cache clear failed");
            }
        }
    }

    pub fn mark_submitted(&self) {
        if let Err(error) = self.store.set(FORM_SUBMITTED_KEY, "1") {
            tracing::debug!(%error, "form cache submitted marker failed");
        }
    }

    #[must_use]
    pub fn was_submitted(&self) -> bool {
        matches!(self.store.get(FORM_SUBMITTED_KEY), Ok(Some(marker)) if marker == "1")
    }
}
