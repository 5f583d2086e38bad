use std::time::Duration;

use async_trait::async_trait;
use kvorum_client_core::auth::{
    AuthInputError, ConsentRequest, LoginRequest, PasswordChangeRequest, TokenGrant,
    normalize_base_url,
};
use kvorum_client_core::contact::{
    AdminContactUpsert, ContactStatus, ContactSubmission, FieldError, SUBMIT_FAILED_MESSAGE,
    SubmitReceipt,
};
use kvorum_client_core::error::{ApiError, classify_http_error};
use kvorum_client_core::locator::{PremisesSource, UnitOption};
use kvorum_client_core::telegram::{LOGIN_FAILED_MESSAGE, ResolvedAssertion, TelegramExchange};
use reqwest::{Method, RequestBuilder, StatusCode, header};
use serde::Serialize;
use thiserror::Error;
use url::form_urlencoded;
use uuid::Uuid;

pub mod types;

pub use types::*;

const REQUEST_FAILED_MESSAGE: &str = "Ошибка запроса";

#[derive(Debug, Clone)]
pub struct KvorumApiClientConfig {
    pub base_url: String,
    /// `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
}

impl KvorumApiClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KvorumApiClient {
    base_url: String,
    timeout: Option<Duration>,
    access_token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("kvorum_client_base_url_missing")]
    BaseUrlMissing,
    #[error("kvorum_client_base_url_invalid")]
    BaseUrlInvalid,
    #[error("kvorum_client_invalid_path")]
    InvalidPath,
    #[error("kvorum_request_failed:{message}")]
    Request { message: String },
    #[error("kvorum_read_failed:{message}")]
    Read { message: String },
    #[error("kvorum_http_{status}:{message}", status = .error.status_code, message = .error.message)]
    Http { error: ApiError, body: ErrorBody },
    #[error("kvorum_json_decode_failed:{message}")]
    Decode { status: u16, message: String },
}

impl ApiClientError {
    /// Per-field messages from a rejected form submission.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Http { body, .. } => &body.field_errors,
            _ => &[],
        }
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { error, .. } => Some(error.status_code),
            Self::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Same error with a different fallback for bodies without `detail`.
    #[must_use]
    pub fn with_fallback(self, fallback: &str) -> Self {
        match self {
            Self::Http { error, body } if body.detail.is_none() => Self::Http {
                error: classify_http_error(error.status_code, None, fallback),
                body,
            },
            other => other,
        }
    }
}

impl From<ApiClientError> for ApiError {
    fn from(error: ApiClientError) -> Self {
        match error {
            ApiClientError::Http { error, .. } => error,
            ApiClientError::Decode { status, .. } => ApiError::decode(status, REQUEST_FAILED_MESSAGE),
            ApiClientError::Request { .. } | ApiClientError::Read { .. } => ApiError::network(),
            ApiClientError::BaseUrlMissing
            | ApiClientError::BaseUrlInvalid
            | ApiClientError::InvalidPath => {
                classify_http_error(0, None, REQUEST_FAILED_MESSAGE)
            }
        }
    }
}

impl KvorumApiClient {
    pub fn new(config: KvorumApiClientConfig) -> Result<Self, ApiClientError> {
        let base_url = normalize_base_url(&config.base_url).map_err(|error| match error {
            AuthInputError::EmptyBaseUrl => ApiClientError::BaseUrlMissing,
            _ => ApiClientError::BaseUrlInvalid,
        })?;
        Ok(Self {
            base_url,
            timeout: config.timeout,
            access_token: None,
            http: reqwest::Client::new(),
        })
    }

    pub fn from_base_url(
        base_url: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self, ApiClientError> {
        let mut config = KvorumApiClientConfig::new(base_url.unwrap_or_default());
        config.timeout = timeout;
        Self::new(config)
    }

    /// Sends `Authorization: Bearer <token>` on every later request.
    #[must_use]
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|token| !token.trim().is_empty());
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn entrances_path() -> String {
        "/api/premises/entrances".to_string()
    }

    #[must_use]
    pub fn floors_path(entrance: Option<&str>) -> String {
        with_query("/api/premises/floors", &[("entrance", entrance)])
    }

    #[must_use]
    pub fn types_path(floor: &str, entrance: Option<&str>) -> String {
        with_query(
            "/api/premises/types",
            &[("entrance", entrance), ("floor", Some(floor))],
        )
    }

    #[must_use]
    pub fn units_path(floor: &str, premises_type: &str, entrance: Option<&str>) -> String {
        with_query(
            "/api/premises/numbers",
            &[
                ("entrance", entrance),
                ("floor", Some(floor)),
                ("type", Some(premises_type)),
            ],
        )
    }

    #[must_use]
    pub fn normalize_number_path(number: &str) -> String {
        with_query("/api/premises/normalize", &[("number", Some(number))])
    }

    #[must_use]
    pub fn telegram_callback_path(assertion: &ResolvedAssertion) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in assertion.exchange_query() {
            serializer.append_pair(&key, &value);
        }
        format!("/api/auth/telegram/callback?{}", serializer.finish())
    }

    #[must_use]
    pub fn contacts_path(filter: &ContactFilter) -> String {
        let pairs = filter.query_pairs();
        let borrowed = pairs
            .iter()
            .map(|(key, value)| (*key, Some(value.as_str())))
            .collect::<Vec<_>>();
        with_query("/api/admin/contacts", &borrowed)
    }

    #[must_use]
    pub fn contact_path(contact_id: i64) -> String {
        format!("/api/admin/contacts/{contact_id}")
    }

    #[must_use]
    pub fn contact_status_path(contact_id: i64) -> String {
        format!("/api/admin/contacts/{contact_id}/status")
    }

    #[must_use]
    pub fn admin_path(telegram_id: &str) -> String {
        format!(
            "/api/superadmin/admins/{}",
            encode_path_segment(telegram_id.trim())
        )
    }

    #[must_use]
    pub fn audit_path(filter: &AuditFilter) -> String {
        let pairs = filter.query_pairs();
        let borrowed = pairs
            .iter()
            .map(|(key, value)| (*key, Some(value.as_str())))
            .collect::<Vec<_>>();
        with_query("/api/admin/audit", &borrowed)
    }

    #[must_use]
    pub fn bot_alias_path(alias_id: i64) -> String {
        format!("/api/superadmin/bot-aliases/{alias_id}")
    }

    #[must_use]
    pub fn bot_unrecognized_path(limit: u32, offset: u32) -> String {
        let limit = limit.max(1).to_string();
        let offset = offset.to_string();
        with_query(
            "/api/superadmin/bot-unrecognized",
            &[("limit", Some(limit.as_str())), ("offset", Some(offset.as_str()))],
        )
    }

    #[must_use]
    pub fn contacts_template_path(entrance: &str) -> String {
        with_query(
            "/api/admin/import/contacts-template",
            &[("entrance", Some(entrance))],
        )
    }

    #[must_use]
    pub fn quorum_path(building_id: &str) -> String {
        format!(
            "/api/buildings/{}/quorum",
            encode_path_segment(building_id.trim())
        )
    }

    pub async fn list_entrances(&self) -> Result<Vec<String>, ApiClientError> {
        let response: EntrancesResponse = self.get_json(&Self::entrances_path()).await?;
        Ok(response.entrances)
    }

    pub async fn list_floors(&self, entrance: Option<&str>) -> Result<Vec<String>, ApiClientError> {
        let response: FloorsResponse = self.get_json(&Self::floors_path(entrance)).await?;
        Ok(response.floors)
    }

    pub async fn list_types(
        &self,
        floor: &str,
        entrance: Option<&str>,
    ) -> Result<Vec<String>, ApiClientError> {
        let response: TypesResponse = self.get_json(&Self::types_path(floor, entrance)).await?;
        Ok(response.types)
    }

    pub async fn list_units(
        &self,
        floor: &str,
        premises_type: &str,
        entrance: Option<&str>,
    ) -> Result<Vec<UnitOption>, ApiClientError> {
        let response: UnitsResponse = self
            .get_json(&Self::units_path(floor, premises_type, entrance))
            .await?;
        Ok(response.premises)
    }

    pub async fn normalize_number(&self, number: &str) -> Result<String, ApiClientError> {
        let response: NormalizedNumber = self
            .get_json(&Self::normalize_number_path(number))
            .await?;
        Ok(response.normalized)
    }

    pub async fn telegram_bot_identity(&self) -> Result<BotIdentity, ApiClientError> {
        self.get_json("/api/auth/telegram/bot-id").await
    }

    pub async fn exchange_telegram_assertion(
        &self,
        assertion: &ResolvedAssertion,
    ) -> Result<TokenGrant, ApiClientError> {
        self.get_json(&Self::telegram_callback_path(assertion))
            .await
            .map_err(|error| error.with_fallback(LOGIN_FAILED_MESSAGE))
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<TokenGrant, ApiClientError> {
        self.send_json(Method::POST, "/api/auth/login", request)
            .await
            .map_err(|error| error.with_fallback(LOGIN_FAILED_MESSAGE))
    }

    pub async fn change_password(
        &self,
        request: &PasswordChangeRequest,
    ) -> Result<(), ApiClientError> {
        self.send_without_content(Method::POST, "/api/auth/change-password", Some(request))
            .await
    }

    pub async fn accept_consent(&self, request: &ConsentRequest) -> Result<(), ApiClientError> {
        self.send_without_content(Method::POST, "/api/auth/consent", Some(request))
            .await
    }

    pub async fn submit_contact(
        &self,
        submission: &ContactSubmission,
    ) -> Result<SubmitReceipt, ApiClientError> {
        self.send_json(Method::POST, "/api/submit", submission)
            .await
            .map_err(|error| error.with_fallback(SUBMIT_FAILED_MESSAGE))
    }

    pub async fn list_contacts(&self, filter: &ContactFilter) -> Result<ContactList, ApiClientError> {
        self.get_json(&Self::contacts_path(filter)).await
    }

    pub async fn get_contact(&self, contact_id: i64) -> Result<AdminContact, ApiClientError> {
        self.get_json(&Self::contact_path(contact_id)).await
    }

    pub async fn create_contact(
        &self,
        contact: &AdminContactUpsert,
    ) -> Result<ContactCreated, ApiClientError> {
        self.send_json(Method::POST, "/api/admin/contacts", contact)
            .await
    }

    pub async fn update_contact(
        &self,
        contact_id: i64,
        contact: &AdminContactUpsert,
    ) -> Result<(), ApiClientError> {
        self.send_without_content(Method::PUT, &Self::contact_path(contact_id), Some(contact))
            .await
    }

    pub async fn set_contact_status(
        &self,
        contact_id: i64,
        status: ContactStatus,
    ) -> Result<(), ApiClientError> {
        self.send_without_content(
            Method::PATCH,
            &Self::contact_status_path(contact_id),
            Some(&StatusChange { status }),
        )
        .await
    }

    pub async fn bulk_set_contact_status(
        &self,
        change: &BulkStatusChange,
    ) -> Result<(), ApiClientError> {
        self.send_without_content(
            Method::PATCH,
            "/api/admin/contacts/bulk-status",
            Some(change),
        )
        .await
    }

    pub async fn list_admins(&self) -> Result<Vec<AdminRecord>, ApiClientError> {
        self.get_json("/api/superadmin/admins").await
    }

    pub async fn add_admin(&self, admin: &NewAdmin) -> Result<AdminAck, ApiClientError> {
        self.send_json(Method::POST, "/api/superadmin/admins", admin)
            .await
    }

    pub async fn update_admin(
        &self,
        telegram_id: &str,
        patch: &AdminPatch,
    ) -> Result<AdminAck, ApiClientError> {
        self.send_json(Method::PATCH, &Self::admin_path(telegram_id), patch)
            .await
    }

    pub async fn remove_admin(&self, telegram_id: &str) -> Result<AdminAck, ApiClientError> {
        let response = self
            .send(self.request(Method::DELETE, &Self::admin_path(telegram_id))?)
            .await?;
        decode_json_response(response).await
    }

    pub async fn audit_log(&self, filter: &AuditFilter) -> Result<AuditPage, ApiClientError> {
        self.get_json(&Self::audit_path(filter)).await
    }

    pub async fn list_bot_aliases(&self) -> Result<Vec<BotAlias>, ApiClientError> {
        self.get_json("/api/superadmin/bot-aliases").await
    }

    pub async fn add_bot_alias(&self, alias: &NewBotAlias) -> Result<(), ApiClientError> {
        self.send_without_content(Method::POST, "/api/superadmin/bot-aliases", Some(alias))
            .await
    }

    pub async fn remove_bot_alias(&self, alias_id: i64) -> Result<(), ApiClientError> {
        self.send_without_content::<()>(Method::DELETE, &Self::bot_alias_path(alias_id), None)
            .await
    }

    /// `page` is zero-based.
    pub async fn bot_unrecognized(&self, page: u32) -> Result<UnrecognizedPage, ApiClientError> {
        let offset = page.saturating_mul(UNRECOGNIZED_PAGE_SIZE);
        self.get_json(&Self::bot_unrecognized_path(UNRECOGNIZED_PAGE_SIZE, offset))
            .await
    }

    pub async fn import_register(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ImportReport, ApiClientError> {
        self.post_file("/api/admin/import/register", filename, bytes)
            .await
    }

    pub async fn import_contacts(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ImportReport, ApiClientError> {
        self.post_file("/api/admin/import/contacts", filename, bytes)
            .await
    }

    pub async fn contacts_template(&self, entrance: &str) -> Result<TemplateFile, ApiClientError> {
        let response = self
            .send(self.request(Method::GET, &Self::contacts_template_path(entrance))?)
            .await?;
        let status = response.status();
        let filename = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| format!("contacts_entrance_{}.xlsx", entrance.trim()));
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ApiClientError::Read {
                message: error.to_string(),
            })?;
        if !status.is_success() {
            return Err(format_http_error(status, &bytes));
        }
        Ok(TemplateFile {
            filename,
            bytes: bytes.to_vec(),
        })
    }

    pub async fn policy_admins(&self) -> Result<Vec<PolicyAdmin>, ApiClientError> {
        self.get_json("/api/policy/admins").await
    }

    pub async fn building_quorum(&self, building_id: &str) -> Result<QuorumSummary, ApiClientError> {
        self.get_json(&Self::quorum_path(building_id)).await
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ApiClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.send(self.request(Method::GET, path)?).await?;
        decode_json_response(response).await
    }

    pub async fn send_json<Req, Res>(
        &self,
        method: Method,
        path: &str,
        payload: &Req,
    ) -> Result<Res, ApiClientError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let response = self
            .send(self.request(method, path)?.json(payload))
            .await?;
        decode_json_response(response).await
    }

    /// For endpoints answering 204 or an acknowledgement nobody reads.
    async fn send_without_content<Req>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Req>,
    ) -> Result<(), ApiClientError>
    where
        Req: Serialize + ?Sized,
    {
        let mut request = self.request(method, path)?;
        if let Some(payload) = payload {
            request = request.json(payload);
        }
        let response = self.send(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ApiClientError::Read {
                message: error.to_string(),
            })?;
        Err(format_http_error(status, &bytes))
    }

    async fn post_file<T>(
        &self,
        path: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<T, ApiClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .send(self.request(Method::POST, path)?.multipart(form))
            .await?;
        decode_json_response(response).await
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiClientError> {
        let url = self.endpoint(path).ok_or(ApiClientError::InvalidPath)?;
        let request_id = format!("req_{}", Uuid::new_v4().simple());
        tracing::debug!(%method, path, request_id, "kvorum api request");
        let mut request = self
            .http
            .request(method, url.as_str())
            .header("x-request-id", request_id);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(token) = self.access_token.as_deref() {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiClientError> {
        request.send().await.map_err(|error| {
            tracing::warn!(error = %error, "kvorum api request failed");
            ApiClientError::Request {
                message: error.to_string(),
            }
        })
    }
}

#[async_trait(?Send)]
impl PremisesSource for KvorumApiClient {
    type Error = ApiClientError;

    async fn list_entrances(&self) -> Result<Vec<String>, Self::Error> {
        KvorumApiClient::list_entrances(self).await
    }

    async fn list_floors(&self, entrance: Option<&str>) -> Result<Vec<String>, Self::Error> {
        KvorumApiClient::list_floors(self, entrance).await
    }

    async fn list_types(
        &self,
        floor: &str,
        entrance: Option<&str>,
    ) -> Result<Vec<String>, Self::Error> {
        KvorumApiClient::list_types(self, floor, entrance).await
    }

    async fn list_units(
        &self,
        floor: &str,
        premises_type: &str,
        entrance: Option<&str>,
    ) -> Result<Vec<UnitOption>, Self::Error> {
        KvorumApiClient::list_units(self, floor, premises_type, entrance).await
    }
}

#[async_trait(?Send)]
impl TelegramExchange for KvorumApiClient {
    type Error = ApiClientError;

    async fn exchange_telegram(
        &self,
        assertion: &ResolvedAssertion,
    ) -> Result<TokenGrant, Self::Error> {
        self.exchange_telegram_assertion(assertion).await
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ApiClientError {
    let body = ErrorBody::parse(body);
    let error = classify_http_error(
        status.as_u16(),
        body.detail.as_deref(),
        &format!("{REQUEST_FAILED_MESSAGE} ({})", status.as_u16()),
    );
    ApiClientError::Http { error, body }
}

/// `filename=` value of a Content-Disposition header, quotes stripped and
/// reduced to its last path component.
#[must_use]
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let value = rest.split(';').next().unwrap_or_default();
    let value = value.trim().trim_matches('"');
    let name = value.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name == "." || name == ".." {
        return None;
    }
    non_empty_string(name.to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ApiClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ApiClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ApiClientError::Decode {
        status: status.as_u16(),
        message: error.to_string(),
    })
}

fn with_query(path: &str, pairs: &[(&str, Option<&str>)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in pairs {
        if let Some(value) = value.and_then(|value| non_empty_string(value.to_string())) {
            serializer.append_pair(key, &value);
            any = true;
        }
    }
    if any {
        format!("{path}?{}", serializer.finish())
    } else {
        path.to_string()
    }
}

fn encode_path_segment(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use kvorum_client_core::error::ApiErrorKind;
    use kvorum_client_core::telegram::{RedirectLocation, UnsignedPolicy, resolve_telegram_redirect};

    use super::*;

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let client = KvorumApiClient::new(KvorumApiClientConfig::new("https://kvorum.example.com/"))
            .expect("api client");

        assert_eq!(
            client.endpoint("/api/premises/entrances"),
            Some("https://kvorum.example.com/api/premises/entrances".to_string())
        );
        assert_eq!(
            client.endpoint("api/premises/entrances"),
            Some("https://kvorum.example.com/api/premises/entrances".to_string())
        );
        assert_eq!(client.endpoint(""), None);
    }

    #[test]
    fn path_helpers_are_deterministic() {
        assert_eq!(KvorumApiClient::floors_path(None), "/api/premises/floors");
        assert_eq!(
            KvorumApiClient::floors_path(Some("  ")),
            "/api/premises/floors"
        );
        assert_eq!(
            KvorumApiClient::floors_path(Some("Б 2")),
            "/api/premises/floors?entrance=%D0%91+2"
        );
        assert_eq!(
            KvorumApiClient::types_path("3", None),
            "/api/premises/types?floor=3"
        );
        assert_eq!(
            KvorumApiClient::units_path("3", "Квартира", Some("1")),
            "/api/premises/numbers?entrance=1&floor=3&type=%D0%9A%D0%B2%D0%B0%D1%80%D1%82%D0%B8%D1%80%D0%B0"
        );
        assert_eq!(
            KvorumApiClient::normalize_number_path("12a"),
            "/api/premises/normalize?number=12a"
        );
        assert_eq!(
            KvorumApiClient::contact_status_path(17),
            "/api/admin/contacts/17/status"
        );
        assert_eq!(
            KvorumApiClient::admin_path(" 123456 "),
            "/api/superadmin/admins/123456"
        );
        assert_eq!(
            KvorumApiClient::contacts_template_path("Б"),
            "/api/admin/import/contacts-template?entrance=%D0%91"
        );
        assert_eq!(
            KvorumApiClient::quorum_path("1"),
            "/api/buildings/1/quorum"
        );
    }

    #[test]
    fn filters_skip_blank_fields() {
        let filter = ContactFilter {
            entrance: Some("2".to_string()),
            status: Some(ContactStatus::Pending),
            ip: Some("   ".to_string()),
            ..ContactFilter::default()
        };
        assert_eq!(
            KvorumApiClient::contacts_path(&filter),
            "/api/admin/contacts?entrance=2&status=pending"
        );
        assert_eq!(
            KvorumApiClient::contacts_path(&ContactFilter::default()),
            "/api/admin/contacts"
        );

        let audit = AuditFilter {
            action: Some("status_change".to_string()),
            ..AuditFilter::default()
        }
        .page(2);
        assert_eq!(
            KvorumApiClient::audit_path(&audit),
            "/api/admin/audit?action=status_change&limit=50&offset=100"
        );
    }

    #[test]
    fn telegram_callback_path_carries_canonical_fields() {
        let location = RedirectLocation::new("?id=42&hash=abc&auth_date=1700000000", "");
        let assertion = resolve_telegram_redirect(&location, UnsignedPolicy::Reject)
            .expect("signed query");
        assert_eq!(
            KvorumApiClient::telegram_callback_path(&assertion),
            "/api/auth/telegram/callback?auth_date=1700000000&hash=abc&id=42"
        );
    }

    #[test]
    fn http_error_mapping_preserves_shape() {
        let error = format_http_error(
            StatusCode::FORBIDDEN,
            br#"{"detail":"Access denied: not in white-list"}"#,
        );
        assert_eq!(
            error.to_string(),
            "kvorum_http_403:Access denied: not in white-list"
        );
        assert_eq!(ApiError::from(error).kind, ApiErrorKind::Forbidden);

        let empty_body = format_http_error(StatusCode::SERVICE_UNAVAILABLE, b" ");
        assert_eq!(
            empty_body.to_string(),
            "kvorum_http_503:Ошибка запроса (503)"
        );

        let plain = format_http_error(StatusCode::BAD_GATEWAY, b" gateway failed ");
        assert_eq!(plain.to_string(), "kvorum_http_502:gateway failed");
    }

    #[test]
    fn validation_errors_keep_field_messages() {
        let error = format_http_error(
            StatusCode::BAD_REQUEST,
            br#"{"detail":"Validation failed","errors":[{"field":"phone","message":"Bad phone"}]}"#,
        );
        assert_eq!(
            error.field_errors(),
            &[FieldError {
                field: "phone".to_string(),
                message: "Bad phone".to_string(),
            }]
        );
        assert_eq!(error.status_code(), Some(400));
    }

    #[test]
    fn import_mismatch_exposes_column_lists() {
        let error = format_http_error(
            StatusCode::BAD_REQUEST,
            br#"{"detail":"Column structure mismatch","expected_columns":["cadastral_number"],"detected_columns":["foo"]}"#,
        );
        match error {
            ApiClientError::Http { body, .. } => {
                assert_eq!(body.expected_columns, vec!["cadastral_number".to_string()]);
                assert_eq!(body.detected_columns, vec!["foo".to_string()]);
            }
            other => unreachable!("expected http error, got {other}"),
        }
    }

    #[test]
    fn fallback_applies_only_without_detail() {
        let bare = format_http_error(StatusCode::BAD_REQUEST, b"{}").with_fallback(LOGIN_FAILED_MESSAGE);
        assert_eq!(ApiError::from(bare).message, LOGIN_FAILED_MESSAGE);

        let detailed = format_http_error(
            StatusCode::BAD_REQUEST,
            br#"{"detail":"Invalid Telegram signature"}"#,
        )
        .with_fallback(LOGIN_FAILED_MESSAGE);
        assert_eq!(ApiError::from(detailed).message, "Invalid Telegram signature");
    }

    #[test]
    fn transport_failures_map_to_network_errors() {
        let error = ApiError::from(ApiClientError::Request {
            message: "connection refused".to_string(),
        });
        assert_eq!(error.kind, ApiErrorKind::Network);
        assert_eq!(error.status_code, 0);
    }

    #[test]
    fn content_disposition_filename_strips_quotes() {
        assert_eq!(
            content_disposition_filename(r#"attachment; filename="contacts_entrance_B.xlsx""#),
            Some("contacts_entrance_B.xlsx".to_string())
        );
        assert_eq!(
            content_disposition_filename("attachment; filename=plain.xlsx; size=10"),
            Some("plain.xlsx".to_string())
        );
        assert_eq!(content_disposition_filename("attachment"), None);
    }

    #[test]
    fn content_disposition_filename_drops_directories() {
        assert_eq!(
            content_disposition_filename(r#"attachment; filename="../../.bashrc""#),
            Some(".bashrc".to_string())
        );
        assert_eq!(
            content_disposition_filename(r#"attachment; filename="/etc/passwd""#),
            Some("passwd".to_string())
        );
        assert_eq!(
            content_disposition_filename(r#"attachment; filename="..\..\evil.xlsx""#),
            Some("evil.xlsx".to_string())
        );
        assert_eq!(content_disposition_filename(r#"attachment; filename="..""#), None);
        assert_eq!(content_disposition_filename(r#"attachment; filename="dir/""#), None);
    }

    #[test]
    fn bot_paths_carry_paging() {
        assert_eq!(
            KvorumApiClient::bot_unrecognized_path(50, 100),
            "/api/superadmin/bot-unrecognized?limit=50&offset=100"
        );
        assert_eq!(
            KvorumApiClient::bot_unrecognized_path(0, 0),
            "/api/superadmin/bot-unrecognized?limit=1&offset=0"
        );
        assert_eq!(
            KvorumApiClient::bot_alias_path(7),
            "/api/superadmin/bot-aliases/7"
        );
    }

    #[test]
    fn new_bot_alias_requires_every_field() {
        let alias = NewBotAlias::new(" Квартира ", " Кв. ", "  КВАРТИРУ ").expect("alias");
        assert_eq!(alias.premises_type, "Квартира");
        assert_eq!(alias.short_name, "Кв.");
        assert_eq!(alias.alias, "квартиру");
        assert_eq!(NewBotAlias::new("Квартира", "Кв.", "   "), None);
        assert_eq!(NewBotAlias::new("", "Кв.", "кв"), None);
    }

    #[test]
    fn bot_aliases_group_by_premises_type() {
        let aliases = serde_json::from_str::<Vec<BotAlias>>(
            r#"[
                {"id":1,"premises_type":"Квартира","short_name":"Кв.","alias":"кв"},
                {"id":2,"premises_type":"БКТ","short_name":"БКТ","alias":"бкт"},
                {"id":3,"premises_type":"Квартира","short_name":"Кв.","alias":"квартира"}
            ]"#,
        )
        .expect("aliases");
        let groups = group_bot_aliases(&aliases);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Квартира");
        assert_eq!(groups[0].1, "Кв.");
        assert_eq!(
            groups[0].2.iter().map(|alias| alias.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(groups[1].0, "БКТ");
    }

    #[test]
    fn base_url_missing_is_rejected() {
        let result = KvorumApiClient::new(KvorumApiClientConfig::new("   "));
        assert!(matches!(result, Err(ApiClientError::BaseUrlMissing)));

        let result = KvorumApiClient::new(KvorumApiClientConfig::new("ftp://host"));
        assert!(matches!(result, Err(ApiClientError::BaseUrlInvalid)));
    }
}
