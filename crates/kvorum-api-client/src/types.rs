use kvorum_client_core::contact::{
    BarrierVote, ContactStatus, FieldError, RegisteredEd, VoteFormat,
};
use kvorum_client_core::locator::UnitOption;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const AUDIT_PAGE_SIZE: u32 = 50;
pub const AUDIT_ACTIONS: [&str; 5] = ["insert", "update", "delete", "select", "status_change"];
pub const AUDIT_ENTITY_TYPES: [&str; 3] = ["contact", "premise", "admin"];
pub const ADMINISTRATOR_ROLE: &str = "administrator";
pub const UNRECOGNIZED_PAGE_SIZE: u32 = 50;

/// Floors come back as numbers or strings depending on how the register
/// was imported.
fn label_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match value {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .collect())
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn optional_scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntrancesResponse {
    #[serde(default, deserialize_with = "label_list")]
    pub entrances: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloorsResponse {
    #[serde(default, deserialize_with = "label_list")]
    pub floors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypesResponse {
    #[serde(default, deserialize_with = "label_list")]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitsResponse {
    #[serde(default)]
    pub premises: Vec<UnitOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NormalizedNumber {
    pub normalized: String,
}

/// Bot the Login Widget is configured for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    #[serde(deserialize_with = "scalar_string")]
    pub bot_id: String,
    #[serde(default)]
    pub bot_username: Option<String>,
}

/// Contact row as the admin list and detail views return it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdminContact {
    pub id: i64,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub premise_id: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub entrance: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub floor: Option<String>,
    #[serde(default)]
    pub premises_type: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub premises_number: Option<String>,
    pub status: ContactStatus,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub telegram_id: Option<String>,
    #[serde(default)]
    pub how_to_address: Option<String>,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub barrier_vote: Option<BarrierVote>,
    #[serde(default)]
    pub vote_format: Option<VoteFormat>,
    #[serde(default)]
    pub registered_ed: Option<RegisteredEd>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_canary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactList {
    #[serde(default)]
    pub contacts: Vec<AdminContact>,
    #[serde(default)]
    pub total: u64,
}

/// Filters of `GET /api/admin/contacts`. Blank fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFilter {
    pub entrance: Option<String>,
    pub premises_number: Option<String>,
    pub status: Option<ContactStatus>,
    pub ip: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

impl ContactFilter {
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        [
            ("entrance", self.entrance.as_deref()),
            ("premises_number", self.premises_number.as_deref()),
            ("status", self.status.map(ContactStatus::as_str)),
            ("ip", self.ip.as_deref()),
            ("from_date", self.from_date.as_deref()),
            ("to_date", self.to_date.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?.trim();
            (!value.is_empty()).then(|| (key, value.to_string()))
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContactCreated {
    pub contact_id: i64,
    pub status: ContactStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub status: ContactStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkStatusChange {
    pub contact_ids: Vec<i64>,
    pub status: ContactStatus,
}

impl BulkStatusChange {
    /// Drops ids that cannot name a stored contact.
    #[must_use]
    pub fn new(contact_ids: &[i64], status: ContactStatus) -> Self {
        Self {
            contact_ids: contact_ids.iter().copied().filter(|id| *id > 0).collect(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdminRecord {
    #[serde(deserialize_with = "scalar_string")]
    pub telegram_id: String,
    pub role: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub has_login: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAdmin {
    pub telegram_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl NewAdmin {
    /// Only administrators can be added over the API.
    #[must_use]
    pub fn administrator(telegram_id: &str) -> Self {
        Self {
            telegram_id: telegram_id.trim().to_string(),
            role: ADMINISTRATOR_ROLE.to_string(),
            login: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, login: &str, password: &str) -> Self {
        let login = login.trim();
        if !login.is_empty() {
            self.login = Some(login.to_lowercase());
        }
        if !password.is_empty() {
            self.password = Some(password.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdminPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdminAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(deserialize_with = "scalar_string")]
    pub telegram_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            entity_type: None,
            action: None,
            user_id: None,
            limit: AUDIT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl AuditFilter {
    /// Filter for the zero-based `page` of the log.
    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.offset = page.saturating_mul(self.limit);
        self
    }

    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = [
            ("entity_type", self.entity_type.as_deref()),
            ("action", self.action.as_deref()),
            ("user_id", self.user_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?.trim();
            (!value.is_empty()).then(|| (key, value.to_string()))
        })
        .collect::<Vec<_>>();
        pairs.push(("limit", self.limit.clamp(1, 500).to_string()));
        pairs.push(("offset", self.offset.to_string()));
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub entity_type: String,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub entity_id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditPage {
    #[serde(default)]
    pub items: Vec<AuditEntry>,
    #[serde(default)]
    pub total: u64,
}

impl AuditPage {
    #[must_use]
    pub fn page_count(&self, page_size: u32) -> u64 {
        self.total.div_ceil(u64::from(page_size.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportRowError {
    #[serde(default)]
    pub row: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportReport {
    #[serde(default)]
    pub accepted: u64,
    #[serde(default)]
    pub rejected: u64,
    #[serde(default)]
    pub errors: Vec<ImportRowError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyAdmin {
    pub full_name: String,
    pub premises: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuorumSummary {
    pub total_area: f64,
    pub area_voted_for: f64,
    pub ratio: f64,
    pub quorum_threshold: f64,
    pub quorum_reached: bool,
    #[serde(default)]
    pub area_registered_ed: f64,
    #[serde(default)]
    pub ed_ratio: f64,
}

/// One synonym the bot maps onto a register premises type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotAlias {
    pub id: i64,
    pub premises_type: String,
    pub short_name: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBotAlias {
    pub premises_type: String,
    pub short_name: String,
    pub alias: String,
}

impl NewBotAlias {
    /// `None` when any field is blank. Aliases are stored lowercased.
    #[must_use]
    pub fn new(premises_type: &str, short_name: &str, alias: &str) -> Option<Self> {
        let premises_type = premises_type.trim();
        let short_name = short_name.trim();
        let alias = alias.trim().to_lowercase();
        if premises_type.is_empty() || short_name.is_empty() || alias.is_empty() {
            return None;
        }
        Some(Self {
            premises_type: premises_type.to_string(),
            short_name: short_name.to_string(),
            alias,
        })
    }
}

/// Aliases grouped by premises type, in first-seen order.
#[must_use]
pub fn group_bot_aliases(aliases: &[BotAlias]) -> Vec<(&str, &str, Vec<&BotAlias>)> {
    let mut groups: Vec<(&str, &str, Vec<&BotAlias>)> = Vec::new();
    for alias in aliases {
        let existing = groups
            .iter_mut()
            .find(|(premises_type, _, _)| *premises_type == alias.premises_type.as_str());
        if let Some((_, _, members)) = existing {
            members.push(alias);
        } else {
            groups.push((
                alias.premises_type.as_str(),
                alias.short_name.as_str(),
                vec![alias],
            ));
        }
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnrecognizedInput {
    pub id: i64,
    pub input_text: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnrecognizedPage {
    #[serde(default)]
    pub items: Vec<UnrecognizedInput>,
    #[serde(default)]
    pub total: u64,
}

impl UnrecognizedPage {
    #[must_use]
    pub fn page_count(&self, page_size: u32) -> u64 {
        self.total.div_ceil(u64::from(page_size.max(1)))
    }
}

/// Everything a failed response may carry besides its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub detail: Option<String>,
    pub field_errors: Vec<FieldError>,
    pub expected_columns: Vec<String>,
    pub detected_columns: Vec<String>,
}

impl ErrorBody {
    /// JSON bodies are mined for `detail`, `errors` and the import column
    /// lists; any other non-blank body becomes the detail as-is.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
            let text = String::from_utf8_lossy(bytes).trim().to_string();
            return Self {
                detail: (!text.is_empty()).then_some(text),
                ..Self::default()
            };
        };
        let list = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            detail: kvorum_client_core::error::extract_detail(&value),
            field_errors: value
                .get("errors")
                .cloned()
                .and_then(|errors| serde_json::from_value(errors).ok())
                .unwrap_or_default(),
            expected_columns: list("expected_columns"),
            detected_columns: list("detected_columns"),
        }
    }
}
