//! Telegram sign-in: turning the provider's redirect into canonical
//! parameters and handing them to whoever performs the token exchange.
//!
//! Telegram reaches `/auth/callback` in one of three shapes: signed
//! parameters in the query string, signed parameters in the fragment, or a
//! base64 JSON blob `tgAuthResult` in the fragment (which the popup OAuth
//! flow sends, sometimes without `hash`). [`detect_encoding`] classifies the
//! location and [`resolve_encoding`] turns the classification into a
//! [`ResolvedAssertion`]. Both are pure.
//!
//! Delivery depends on the window: a popup posts the assertion back to its
//! opener, a direct navigation performs the exchange itself. The choice is
//! made once through [`TelegramDelivery::select`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use url::form_urlencoded;

use crate::auth::TokenGrant;
use crate::encoding::{decode_base64url_lenient, scalar_to_string};
use crate::error::ApiError;
use crate::session::{KeyValueStore, SessionContext, SessionError, SessionRole};

pub const TG_AUTH_RESULT_PARAM: &str = "tgAuthResult";
pub const TG_AUTH_RESULT_FORWARD_PARAM: &str = "tg_auth_result";
pub const TELEGRAM_AUTH_MESSAGE_TYPE: &str = "telegram-auth";
pub const AUTH_CALLBACK_PATH: &str = "/auth/callback";
pub const HOME_PATH: &str = "/";
pub const LOGIN_FAILED_MESSAGE: &str = "Ошибка входа";

const ID_PARAM: &str = "id";
const HASH_PARAM: &str = "hash";

pub type CanonicalParams = BTreeMap<String, String>;

/// How unsigned `tgAuthResult` blobs are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsignedPolicy {
    /// Fail with [`TelegramResolveError::Unsigned`]; the user retries with
    /// the in-window widget, which always signs.
    #[default]
    Reject,
    /// Forward the decoded fields plus the raw blob as `tg_auth_result` and
    /// let the backend decide.
    ForwardRawResult,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelegramResolveError {
    #[error("no telegram data in redirect")]
    NoTelegramData,
    #[error("telegram assertion is not signed")]
    Unsigned,
    #[error("tgAuthResult is malformed: {reason}")]
    MalformedAuthResult { reason: String },
}

impl TelegramResolveError {
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoTelegramData => "Нет данных от Telegram",
            Self::Unsigned => {
                "Telegram не подписал данные входа. Войдите через кнопку Telegram на странице входа."
            }
            Self::MalformedAuthResult { .. } => "Не удалось прочитать ответ Telegram",
        }
    }
}

/// The query and fragment of the callback URL, without `?` and `#`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectLocation {
    pub query: String,
    pub fragment: String,
}

impl RedirectLocation {
    #[must_use]
    pub fn new(query: &str, fragment: &str) -> Self {
        Self {
            query: query.strip_prefix('?').unwrap_or(query).to_string(),
            fragment: fragment.strip_prefix('#').unwrap_or(fragment).to_string(),
        }
    }

    pub fn parse(href: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(href.trim())?;
        Ok(Self::new(
            url.query().unwrap_or_default(),
            url.fragment().unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionSource {
    Query,
    Fragment,
    AuthResultBlob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectEncoding {
    SignedQuery(CanonicalParams),
    SignedFragment(CanonicalParams),
    AuthResultBlob(String),
    /// An `id` was present but neither a `hash` nor a blob.
    UnsignedParams(CanonicalParams),
    Absent,
}

/// Classifies the callback location. Precedence: signed query, signed
/// fragment, `tgAuthResult` blob.
#[must_use]
pub fn detect_encoding(location: &RedirectLocation) -> RedirectEncoding {
    let query = parse_params(&location.query);
    if is_signed(&query) {
        return RedirectEncoding::SignedQuery(query);
    }
    let fragment = parse_params(&location.fragment);
    if is_signed(&fragment) {
        return RedirectEncoding::SignedFragment(fragment);
    }
    if let Some(blob) = fragment
        .get(TG_AUTH_RESULT_PARAM)
        .filter(|blob| !blob.trim().is_empty())
    {
        return RedirectEncoding::AuthResultBlob(blob.clone());
    }
    if has_value(&query, ID_PARAM) {
        return RedirectEncoding::UnsignedParams(query);
    }
    if has_value(&fragment, ID_PARAM) {
        return RedirectEncoding::UnsignedParams(fragment);
    }
    RedirectEncoding::Absent
}

pub fn resolve_encoding(
    encoding: RedirectEncoding,
    policy: UnsignedPolicy,
) -> Result<ResolvedAssertion, TelegramResolveError> {
    match encoding {
        RedirectEncoding::SignedQuery(params) => Ok(ResolvedAssertion {
            params,
            source: AssertionSource::Query,
            fallback_auth_result: None,
        }),
        RedirectEncoding::SignedFragment(params) => Ok(ResolvedAssertion {
            params,
            source: AssertionSource::Fragment,
            fallback_auth_result: None,
        }),
        RedirectEncoding::AuthResultBlob(raw) => parse_tg_auth_result(&raw, policy),
        RedirectEncoding::UnsignedParams(_) => Err(TelegramResolveError::Unsigned),
        RedirectEncoding::Absent => Err(TelegramResolveError::NoTelegramData),
    }
}

pub fn resolve_telegram_redirect(
    location: &RedirectLocation,
    policy: UnsignedPolicy,
) -> Result<ResolvedAssertion, TelegramResolveError> {
    let resolved = resolve_encoding(detect_encoding(location), policy);
    match &resolved {
        Ok(assertion) => tracing::debug!(
            source = ?assertion.source,
            signed = assertion.is_signed(),
            "resolved telegram redirect"
        ),
        Err(error) => tracing::warn!(%error, "telegram redirect rejected"),
    }
    resolved
}

/// Decodes a `tgAuthResult` blob into stringified fields. Nulls are
/// dropped; `id` must survive.
pub fn decode_tg_auth_result(raw: &str) -> Result<CanonicalParams, TelegramResolveError> {
    let malformed = |reason: String| TelegramResolveError::MalformedAuthResult { reason };
    let bytes = decode_base64url_lenient(raw).map_err(|error| malformed(error.to_string()))?;
    let decoded: Value =
        serde_json::from_slice(&bytes).map_err(|error| malformed(error.to_string()))?;
    let Value::Object(fields) = decoded else {
        return Err(malformed("expected a json object".to_string()));
    };
    let params = fields
        .iter()
        .filter_map(|(key, value)| scalar_to_string(value).map(|text| (key.clone(), text)))
        .collect::<CanonicalParams>();
    if !has_value(&params, ID_PARAM) {
        return Err(malformed("missing id".to_string()));
    }
    Ok(params)
}

pub fn parse_tg_auth_result(
    raw: &str,
    policy: UnsignedPolicy,
) -> Result<ResolvedAssertion, TelegramResolveError> {
    let params = decode_tg_auth_result(raw)?;
    if has_value(&params, HASH_PARAM) {
        return Ok(ResolvedAssertion {
            params,
            source: AssertionSource::AuthResultBlob,
            fallback_auth_result: None,
        });
    }
    match policy {
        UnsignedPolicy::Reject => Err(TelegramResolveError::Unsigned),
        UnsignedPolicy::ForwardRawResult => Ok(ResolvedAssertion {
            params,
            source: AssertionSource::AuthResultBlob,
            fallback_auth_result: Some(raw.trim().to_string()),
        }),
    }
}

fn parse_params(raw: &str) -> CanonicalParams {
    let mut params = CanonicalParams::new();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

fn has_value(params: &CanonicalParams, key: &str) -> bool {
    params.get(key).is_some_and(|value| !value.trim().is_empty())
}

fn is_signed(params: &CanonicalParams) -> bool {
    has_value(params, ID_PARAM) && has_value(params, HASH_PARAM)
}

/// Canonical parameters ready for the backend exchange. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAssertion {
    pub params: CanonicalParams,
    pub source: AssertionSource,
    pub fallback_auth_result: Option<String>,
}

impl ResolvedAssertion {
    #[must_use]
    pub fn telegram_id(&self) -> Option<&str> {
        self.params.get(ID_PARAM).map(String::as_str)
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        has_value(&self.params, HASH_PARAM)
    }

    /// Query pairs for `GET /api/auth/telegram/callback`.
    #[must_use]
    pub fn exchange_query(&self) -> Vec<(String, String)> {
        let mut pairs = self
            .params
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Vec<_>>();
        if let Some(raw) = &self.fallback_auth_result {
            pairs.push((TG_AUTH_RESULT_FORWARD_PARAM.to_string(), raw.clone()));
        }
        pairs
    }
}

#[must_use]
pub fn auth_callback_url(origin: &str) -> String {
    format!("{}{AUTH_CALLBACK_PATH}", origin.trim().trim_end_matches('/'))
}

/// Payload posted from the popup to its opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramAuthMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub params: CanonicalParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tg_auth_result: Option<String>,
}

impl TelegramAuthMessage {
    #[must_use]
    pub fn from_assertion(assertion: &ResolvedAssertion) -> Self {
        Self {
            message_type: TELEGRAM_AUTH_MESSAGE_TYPE.to_string(),
            params: assertion.params.clone(),
            tg_auth_result: assertion.fallback_auth_result.clone(),
        }
    }

    /// Rebuilds the assertion on the opener side, re-checking the `id`.
    pub fn into_assertion(self) -> Result<ResolvedAssertion, TelegramResolveError> {
        if !has_value(&self.params, ID_PARAM) {
            return Err(TelegramResolveError::NoTelegramData);
        }
        if !has_value(&self.params, HASH_PARAM) && self.tg_auth_result.is_none() {
            return Err(TelegramResolveError::Unsigned);
        }
        Ok(ResolvedAssertion {
            params: self.params,
            source: if self.tg_auth_result.is_some() {
                AssertionSource::AuthResultBlob
            } else {
                AssertionSource::Query
            },
            fallback_auth_result: self.tg_auth_result,
        })
    }
}

/// Opener-side filter for `message` events. Anything from a foreign origin
/// or of another type is ignored.
#[must_use]
pub fn accept_opener_message(
    expected_origin: &str,
    event_origin: &str,
    data: &Value,
) -> Option<TelegramAuthMessage> {
    if event_origin != expected_origin {
        tracing::debug!(event_origin, "ignoring message from foreign origin");
        return None;
    }
    let message = serde_json::from_value::<TelegramAuthMessage>(data.clone()).ok()?;
    if message.message_type != TELEGRAM_AUTH_MESSAGE_TYPE {
        return None;
    }
    Some(message)
}

pub trait OpenerChannel {
    type Error: fmt::Display;

    fn post_message(
        &self,
        message: &TelegramAuthMessage,
        target_origin: &str,
    ) -> Result<(), Self::Error>;
}

#[async_trait(?Send)]
pub trait TelegramExchange {
    type Error: Into<ApiError>;

    async fn exchange_telegram(
        &self,
        assertion: &ResolvedAssertion,
    ) -> Result<TokenGrant, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The popup handed off; the page offers a manual close button.
    PostedToOpener,
    SignedIn {
        role: Option<SessionRole>,
        redirect_to: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("posting to opener failed: {message}")]
    Opener { message: String },
    #[error("telegram exchange failed: {0}")]
    Exchange(ApiError),
    #[error(transparent)]
    Session(SessionError),
}

impl DeliveryError {
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::Opener { .. } => "Не удалось передать данные в окно входа",
            Self::Exchange(error) => &error.message,
            Self::Session(_) => LOGIN_FAILED_MESSAGE,
        }
    }
}

#[async_trait(?Send)]
pub trait AssertionDelivery {
    async fn deliver(
        &mut self,
        assertion: &ResolvedAssertion,
    ) -> Result<DeliveryOutcome, DeliveryError>;
}

#[derive(Debug)]
pub struct OpenerDelivery<C> {
    channel: C,
    origin: String,
}

impl<C> OpenerDelivery<C> {
    pub fn new(channel: C, origin: impl Into<String>) -> Self {
        Self {
            channel,
            origin: origin.into(),
        }
    }
}

#[async_trait(?Send)]
impl<C: OpenerChannel> AssertionDelivery for OpenerDelivery<C> {
    async fn deliver(
        &mut self,
        assertion: &ResolvedAssertion,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let message = TelegramAuthMessage::from_assertion(assertion);
        self.channel
            .post_message(&message, &self.origin)
            .map_err(|error| DeliveryError::Opener {
                message: error.to_string(),
            })?;
        tracing::info!(origin = %self.origin, "posted telegram assertion to opener");
        Ok(DeliveryOutcome::PostedToOpener)
    }
}

#[derive(Debug)]
pub struct DirectExchangeDelivery<T, S> {
    exchange: T,
    session: SessionContext<S>,
}

impl<T, S> DirectExchangeDelivery<T, S> {
    pub fn new(exchange: T, session: SessionContext<S>) -> Self {
        Self { exchange, session }
    }

    pub fn into_parts(self) -> (T, SessionContext<S>) {
        (self.exchange, self.session)
    }
}

#[async_trait(?Send)]
impl<T, S> AssertionDelivery for DirectExchangeDelivery<T, S>
where
    T: TelegramExchange,
    S: KeyValueStore,
{
    async fn deliver(
        &mut self,
        assertion: &ResolvedAssertion,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let grant = self
            .exchange
            .exchange_telegram(assertion)
            .await
            .map_err(|error| DeliveryError::Exchange(error.into()))?;
        let token = self
            .session
            .sign_in(&grant.access_token)
            .map_err(DeliveryError::Session)?;
        Ok(DeliveryOutcome::SignedIn {
            role: token.role.clone(),
            redirect_to: HOME_PATH,
        })
    }
}

/// What the callback page knows about its window at startup.
#[derive(Debug, Clone)]
pub struct WindowContext<C> {
    pub origin: String,
    pub opener: Option<C>,
}

#[derive(Debug)]
pub enum TelegramDelivery<C, T, S> {
    Popup(OpenerDelivery<C>),
    Direct(DirectExchangeDelivery<T, S>),
}

impl<C, T, S> TelegramDelivery<C, T, S> {
    /// Popup when the window has an opener, direct exchange otherwise.
    pub fn select(window: WindowContext<C>, exchange: T, session: SessionContext<S>) -> Self {
        match window.opener {
            Some(channel) => Self::Popup(OpenerDelivery::new(channel, window.origin)),
            None => Self::Direct(DirectExchangeDelivery::new(exchange, session)),
        }
    }

    #[must_use]
    pub fn is_popup(&self) -> bool {
        matches!(self, Self::Popup(_))
    }
}

#[async_trait(?Send)]
impl<C, T, S> AssertionDelivery for TelegramDelivery<C, T, S>
where
    C: OpenerChannel,
    T: TelegramExchange,
    S: KeyValueStore,
{
    async fn deliver(
        &mut self,
        assertion: &ResolvedAssertion,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        match self {
            Self::Popup(delivery) => delivery.deliver(assertion).await,
            Self::Direct(delivery) => delivery.deliver(assertion).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify_http_error;
    use crate::session::{ACCESS_TOKEN_STORAGE_KEY, MemoryStore};
    use std::cell::RefCell;

    // base64 of {"id":123,"hash":"abc"} and {"id":123}
    const SIGNED_BLOB: &str = "eyJpZCI6MTIzLCJoYXNoIjoiYWJjIn0=";
    const UNSIGNED_BLOB: &str = "eyJpZCI6MTIzfQ==";

    fn params(pairs: &[(&str, &str)]) -> CanonicalParams {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn signed_blob_yields_params_without_fallback() {
        let resolved =
            parse_tg_auth_result(SIGNED_BLOB, UnsignedPolicy::Reject).expect("signed blob");
        assert_eq!(resolved.params, params(&[("hash", "abc"), ("id", "123")]));
        assert_eq!(resolved.fallback_auth_result, None);
        assert!(resolved.is_signed());
    }

    #[test]
    fn unsigned_blob_is_rejected_as_unsigned_not_missing() {
        let location = RedirectLocation::new("", &format!("#tgAuthResult={UNSIGNED_BLOB}"));
        let error = resolve_telegram_redirect(&location, UnsignedPolicy::default())
            .expect_err("unsigned blob");
        assert_eq!(error, TelegramResolveError::Unsigned);
    }

    #[test]
    fn forward_policy_keeps_raw_blob_as_fallback() {
        let location = RedirectLocation::new("", &format!("tgAuthResult={UNSIGNED_BLOB}"));
        let resolved = resolve_telegram_redirect(&location, UnsignedPolicy::ForwardRawResult)
            .expect("forwarded");
        assert_eq!(resolved.telegram_id(), Some("123"));
        assert!(!resolved.is_signed());
        assert_eq!(
            resolved.exchange_query(),
            vec![
                ("id".to_string(), "123".to_string()),
                ("tg_auth_result".to_string(), UNSIGNED_BLOB.to_string()),
            ]
        );
    }

    #[test]
    fn query_takes_precedence_over_fragment() {
        let location = RedirectLocation::parse(&format!(
            "https://kvorum.example.ru/auth/callback?hash=abc&id=123&auth_date=111#id=999&hash=zzz&tgAuthResult={SIGNED_BLOB}"
        ))
        .expect("url");
        let resolved =
            resolve_telegram_redirect(&location, UnsignedPolicy::Reject).expect("query params");
        assert_eq!(resolved.source, AssertionSource::Query);
        assert_eq!(
            resolved.params,
            params(&[("auth_date", "111"), ("hash", "abc"), ("id", "123")])
        );
    }

    #[test]
    fn signed_fragment_beats_blob() {
        let location = RedirectLocation::new(
            "?id=5",
            &format!("id=123&hash=abc&username=neighbour&tgAuthResult={UNSIGNED_BLOB}"),
        );
        let resolved =
            resolve_telegram_redirect(&location, UnsignedPolicy::Reject).expect("fragment");
        assert_eq!(resolved.source, AssertionSource::Fragment);
        assert_eq!(resolved.params.get("username").map(String::as_str), Some("neighbour"));
    }

    #[test]
    fn id_without_signature_or_blob_is_unsigned() {
        let location = RedirectLocation::new("id=123&first_name=Ivan", "");
        assert_eq!(
            detect_encoding(&location),
            RedirectEncoding::UnsignedParams(params(&[("first_name", "Ivan"), ("id", "123")]))
        );
        for policy in [UnsignedPolicy::Reject, UnsignedPolicy::ForwardRawResult] {
            assert_eq!(
                resolve_telegram_redirect(&location, policy),
                Err(TelegramResolveError::Unsigned)
            );
        }
    }

    #[test]
    fn empty_location_reports_no_data() {
        let location = RedirectLocation::new("hash=abc&id=", "");
        assert_eq!(detect_encoding(&location), RedirectEncoding::Absent);
        assert_eq!(
            resolve_telegram_redirect(&location, UnsignedPolicy::Reject),
            Err(TelegramResolveError::NoTelegramData)
        );
    }

    #[test]
    fn malformed_blobs_fail_resolution() {
        // base64 of {"hash":"abc"}
        let without_id = "eyJoYXNoIjoiYWJjIn0";
        for raw in ["%%%", "bm90IGpzb24", "WzEsMl0", without_id] {
            let error = parse_tg_auth_result(raw, UnsignedPolicy::ForwardRawResult)
                .expect_err("malformed blob");
            assert!(
                matches!(error, TelegramResolveError::MalformedAuthResult { .. }),
                "{raw}: {error:?}"
            );
        }
    }

    #[test]
    fn blob_values_are_stringified_and_nulls_dropped() {
        // base64url of {"id":42,"hash":"h","last_name":null,"photo_url":"https://t.me/i/a.jpg?x=1"}
        let raw = "eyJpZCI6NDIsImhhc2giOiJoIiwibGFzdF9uYW1lIjpudWxsLCJwaG90b191cmwiOiJodHRwczovL3QubWUvaS9hLmpwZz94PTEifQ";
        let decoded = decode_tg_auth_result(raw).expect("decoded");
        assert_eq!(
            decoded,
            params(&[
                ("hash", "h"),
                ("id", "42"),
                ("photo_url", "https://t.me/i/a.jpg?x=1"),
            ])
        );
    }

    #[test]
    fn opener_accepts_only_same_origin_telegram_messages() {
        let origin = "https://kvorum.example.ru";
        let assertion =
            parse_tg_auth_result(SIGNED_BLOB, UnsignedPolicy::Reject).expect("assertion");
        let data = serde_json::to_value(TelegramAuthMessage::from_assertion(&assertion))
            .expect("message json");

        assert!(accept_opener_message(origin, "https://evil.example", &data).is_none());
        assert!(
            accept_opener_message(origin, origin, &serde_json::json!({"type": "other", "params": {}}))
                .is_none()
        );
        let accepted = accept_opener_message(origin, origin, &data).expect("accepted");
        let rebuilt = accepted.into_assertion().expect("assertion");
        assert_eq!(rebuilt.params, assertion.params);
    }

    #[derive(Default)]
    struct RecordingOpener {
        posted: RefCell<Vec<(TelegramAuthMessage, String)>>,
    }

    impl OpenerChannel for &RecordingOpener {
        type Error = String;

        fn post_message(
            &self,
            message: &TelegramAuthMessage,
            target_origin: &str,
        ) -> Result<(), Self::Error> {
            self.posted
                .borrow_mut()
                .push((message.clone(), target_origin.to_string()));
            Ok(())
        }
    }

    struct FakeExchange {
        response: Result<TokenGrant, ApiError>,
        seen: RefCell<Vec<Vec<(String, String)>>>,
    }

    #[async_trait(?Send)]
    impl TelegramExchange for FakeExchange {
        type Error = ApiError;

        async fn exchange_telegram(
            &self,
            assertion: &ResolvedAssertion,
        ) -> Result<TokenGrant, Self::Error> {
            self.seen.borrow_mut().push(assertion.exchange_query());
            self.response.clone()
        }
    }

    fn admin_jwt() -> String {
        use base64::Engine as _;
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(br#"{"sub":"123","role":"administrator"}"#);
        format!("e30.{payload}.sig")
    }

    #[tokio::test]
    async fn popup_context_posts_to_opener_at_own_origin() {
        let opener = RecordingOpener::default();
        let exchange = FakeExchange {
            response: Err(ApiError::network()),
            seen: RefCell::default(),
        };
        let window = WindowContext {
            origin: "https://kvorum.example.ru".to_string(),
            opener: Some(&opener),
        };
        let mut delivery =
            TelegramDelivery::select(window, exchange, SessionContext::new(MemoryStore::new()));
        assert!(delivery.is_popup());

        let assertion =
            parse_tg_auth_result(SIGNED_BLOB, UnsignedPolicy::Reject).expect("assertion");
        let outcome = delivery.deliver(&assertion).await.expect("posted");
        assert_eq!(outcome, DeliveryOutcome::PostedToOpener);

        let posted = opener.posted.borrow();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0.message_type, TELEGRAM_AUTH_MESSAGE_TYPE);
        assert_eq!(posted[0].1, "https://kvorum.example.ru");
    }

    #[tokio::test]
    async fn direct_context_exchanges_and_persists_token() {
        let exchange = FakeExchange {
            response: Ok(TokenGrant {
                access_token: admin_jwt(),
                token_type: Some("bearer".to_string()),
                role: Some("administrator".to_string()),
            }),
            seen: RefCell::default(),
        };
        let window = WindowContext::<&RecordingOpener> {
            origin: "https://kvorum.example.ru".to_string(),
            opener: None,
        };
        let mut delivery =
            TelegramDelivery::select(window, exchange, SessionContext::new(MemoryStore::new()));
        let assertion = resolve_telegram_redirect(
            &RedirectLocation::new("", &format!("tgAuthResult={UNSIGNED_BLOB}")),
            UnsignedPolicy::ForwardRawResult,
        )
        .expect("assertion");

        let outcome = delivery.deliver(&assertion).await.expect("signed in");
        assert_eq!(
            outcome,
            DeliveryOutcome::SignedIn {
                role: Some(SessionRole::Administrator),
                redirect_to: HOME_PATH,
            }
        );

        let TelegramDelivery::Direct(direct) = delivery else {
            unreachable!("direct delivery expected");
        };
        let (exchange, session) = direct.into_parts();
        assert_eq!(
            exchange.seen.borrow()[0].last().map(|(key, _)| key.as_str()),
            Some(TG_AUTH_RESULT_FORWARD_PARAM)
        );
        assert_eq!(
            session.store().get(ACCESS_TOKEN_STORAGE_KEY).expect("get"),
            Some(admin_jwt())
        );
    }

    #[tokio::test]
    async fn direct_exchange_failure_surfaces_server_detail() {
        let exchange = FakeExchange {
            response: Err(classify_http_error(
                403,
                Some("Access denied: not in white-list"),
                LOGIN_FAILED_MESSAGE,
            )),
            seen: RefCell::default(),
        };
        let mut delivery = DirectExchangeDelivery::new(exchange, SessionContext::new(MemoryStore::new()));
        let assertion =
            parse_tg_auth_result(SIGNED_BLOB, UnsignedPolicy::Reject).expect("assertion");

        let error = delivery.deliver(&assertion).await.expect_err("rejected");
        assert_eq!(error.user_message(), "Access denied: not in white-list");
        let (_, session) = delivery.into_parts();
        assert_eq!(
            session.store().get(ACCESS_TOKEN_STORAGE_KEY).expect("get"),
            None
        );
    }

    #[test]
    fn callback_url_joins_origin_and_path() {
        assert_eq!(
            auth_callback_url("https://kvorum.example.ru/"),
            "https://kvorum.example.ru/auth/callback"
        );
    }
}
