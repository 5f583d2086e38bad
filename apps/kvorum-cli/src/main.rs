#![allow(clippy::print_stdout, clippy::print_stderr, clippy::exit)]

mod token_store;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use kvorum_api_client::{
    AdminPatch, ApiClientError, AuditFilter, AUDIT_PAGE_SIZE, BulkStatusChange, ContactFilter,
    KvorumApiClient, NewAdmin, NewBotAlias, UNRECOGNIZED_PAGE_SIZE, group_bot_aliases,
};
use kvorum_client_core::auth::{
    ConsentRequest, LoginRequest, PasswordChangeRequest, resolve_api_base_url,
};
use kvorum_client_core::contact::{
    AdminContactDraft, BarrierVote, CachedContactFields, ContactDraft, ContactStatus, FormCache,
    RegisteredEd, VoteFormat, field_errors_by_name,
};
use kvorum_client_core::error::{ApiError, ApiErrorKind};
use kvorum_client_core::format::{entrance_button_label, format_phone};
use kvorum_client_core::locator::{LocatorSession, LocatorStage, PremisesLocator};
use kvorum_client_core::session::{SessionContext, SessionEvent};
use kvorum_client_core::telegram::{
    AssertionDelivery, DeliveryOutcome, DirectExchangeDelivery, RedirectLocation, UnsignedPolicy,
    resolve_telegram_redirect,
};

use crate::token_store::{ENV_TOKEN_STORE, FileStore};

#[derive(Parser)]
#[command(name = "kvorum")]
#[command(about = "Client for the Kvorum MKD building quorum backend")]
struct Cli {
    /// Backend base URL; falls back to KVORUM_API_BASE_URL, then MKD_API_BASE_URL.
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// File holding the signed-in session.
    #[arg(long, global = true, env = ENV_TOKEN_STORE)]
    token_store: Option<PathBuf>,
    /// Per-request timeout in seconds. Unbounded when omitted.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk entrance, floor, type and unit of the building register.
    Premises(PremisesArgs),
    /// Normalize a premises number the way the register stores it.
    Normalize { number: String },
    #[command(subcommand)]
    Telegram(TelegramCommand),
    Login(LoginArgs),
    Logout,
    Whoami,
    ChangePassword(ChangePasswordArgs),
    /// Accept the current personal data policy as an administrator.
    Consent,
    /// Submit the resident questionnaire for one unit.
    Submit(SubmitArgs),
    #[command(subcommand)]
    Contacts(ContactsCommand),
    #[command(subcommand)]
    Admins(AdminsCommand),
    Audit(AuditArgs),
    #[command(subcommand)]
    Import(ImportCommand),
    /// Premises type synonyms the bot recognizes.
    #[command(subcommand)]
    Aliases(AliasesCommand),
    /// Bot inputs no premises type matched.
    Unrecognized {
        /// Zero-based page of UNRECOGNIZED_PAGE_SIZE entries.
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
    Quorum { building_id: String },
    /// Administrators listed in the public policy.
    Policy,
}

#[derive(Args)]
struct PremisesArgs {
    #[arg(long)]
    entrance: Option<String>,
    #[arg(long)]
    floor: Option<String>,
    #[arg(long = "type")]
    premises_type: Option<String>,
    /// Cadastral number of the unit.
    #[arg(long)]
    unit: Option<String>,
}

#[derive(Subcommand)]
enum TelegramCommand {
    /// Show the bot the Login Widget is configured for.
    Bot,
    /// Print the canonical parameters found in a callback URL.
    Resolve(TelegramRedirectArgs),
    /// Exchange a callback URL for a session.
    Exchange(TelegramRedirectArgs),
}

#[derive(Args)]
struct TelegramRedirectArgs {
    /// Full callback URL, including query and fragment.
    url: String,
    /// Forward an unsigned tgAuthResult for the backend to verify.
    #[arg(long)]
    forward_unsigned: bool,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    login: String,
    #[arg(long, env = "KVORUM_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args)]
struct ChangePasswordArgs {
    #[arg(long)]
    current: String,
    #[arg(long)]
    new: String,
    #[arg(long)]
    confirm: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum BarrierArg {
    For,
    Against,
    Undecided,
}

impl From<BarrierArg> for BarrierVote {
    fn from(value: BarrierArg) -> Self {
        match value {
            BarrierArg::For => Self::For,
            BarrierArg::Against => Self::Against,
            BarrierArg::Undecided => Self::Undecided,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum VoteFormatArg {
    Electronic,
    Paper,
    Undecided,
}

impl From<VoteFormatArg> for VoteFormat {
    fn from(value: VoteFormatArg) -> Self {
        match value {
            VoteFormatArg::Electronic => Self::Electronic,
            VoteFormatArg::Paper => Self::Paper,
            VoteFormatArg::Undecided => Self::Undecided,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RegisteredEdArg {
    Yes,
    No,
}

impl From<RegisteredEdArg> for RegisteredEd {
    fn from(value: RegisteredEdArg) -> Self {
        match value {
            RegisteredEdArg::Yes => Self::Yes,
            RegisteredEdArg::No => Self::No,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Validated,
    Inactive,
}

impl From<StatusArg> for ContactStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::Validated => Self::Validated,
            StatusArg::Inactive => Self::Inactive,
        }
    }
}

#[derive(Args)]
struct ContactFields {
    /// `--owner` or `--owner=false`; omitted keeps a reused answer.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    owner: Option<bool>,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    telegram_id: String,
    #[arg(long, value_enum)]
    barrier_vote: Option<BarrierArg>,
    #[arg(long, value_enum)]
    vote_format: Option<VoteFormatArg>,
    #[arg(long, value_enum)]
    registered_ed: Option<RegisteredEdArg>,
}

#[derive(Args)]
struct SubmitArgs {
    #[arg(long)]
    premise_id: String,
    #[command(flatten)]
    fields: ContactFields,
    /// Confirms consent to personal data processing.
    #[arg(long)]
    consent: bool,
    #[arg(long)]
    captcha_token: Option<String>,
    /// Fail without a captcha token, as the deployed form does.
    #[arg(long)]
    require_captcha: bool,
    /// Prefill blank answers from the previous submission.
    #[arg(long)]
    reuse_answers: bool,
}

#[derive(Subcommand)]
enum ContactsCommand {
    List(ContactListArgs),
    Show { contact_id: i64 },
    Add(AdminContactArgs),
    Update {
        contact_id: i64,
        #[command(flatten)]
        contact: AdminContactArgs,
    },
    Status {
        contact_id: i64,
        #[arg(value_enum)]
        status: StatusArg,
    },
    BulkStatus {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
        #[arg(value_enum)]
        status: StatusArg,
    },
}

#[derive(Args)]
struct ContactListArgs {
    #[arg(long)]
    entrance: Option<String>,
    #[arg(long)]
    premises_number: Option<String>,
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    #[arg(long)]
    ip: Option<String>,
    #[arg(long)]
    from_date: Option<String>,
    #[arg(long)]
    to_date: Option<String>,
}

#[derive(Args)]
struct AdminContactArgs {
    #[arg(long)]
    premise_id: Option<String>,
    #[command(flatten)]
    fields: ContactFields,
}

#[derive(Subcommand)]
enum AdminsCommand {
    List,
    Add {
        telegram_id: String,
        #[arg(long, default_value = "")]
        login: String,
        #[arg(long, env = "KVORUM_ADMIN_PASSWORD", default_value = "", hide_env_values = true)]
        password: String,
    },
    Update {
        telegram_id: String,
        #[arg(long)]
        login: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    Remove { telegram_id: String },
}

#[derive(Subcommand)]
enum AliasesCommand {
    List,
    Add {
        /// Premises type exactly as the register spells it.
        #[arg(long = "type")]
        premises_type: String,
        /// Abbreviation shown on bot buttons.
        #[arg(long)]
        short_name: String,
        alias: String,
    },
    Remove { alias_id: i64 },
}

#[derive(Args)]
struct AuditArgs {
    #[arg(long)]
    entity_type: Option<String>,
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    /// Zero-based page of AUDIT_PAGE_SIZE entries.
    #[arg(long, default_value_t = 0)]
    page: u32,
}

#[derive(Subcommand)]
enum ImportCommand {
    /// Upload the building register spreadsheet.
    Register { file: PathBuf },
    /// Upload a filled contacts spreadsheet.
    Contacts { file: PathBuf },
    /// Download the contacts template for one entrance.
    Template {
        entrance: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(error) = run().await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut app = App::new(&cli)?;
    match cli.command {
        Commands::Premises(args) => run_premises(app.client, args).await,
        Commands::Normalize { number } => {
            let normalized = app.client.normalize_number(&number).await.map_err(api_failure)?;
            println!("{normalized}");
            Ok(())
        }
        Commands::Telegram(command) => run_telegram(app, command).await,
        Commands::Login(args) => run_login(&mut app, args).await,
        Commands::Logout => {
            app.session.sign_out()?;
            println!("signed out");
            Ok(())
        }
        Commands::Whoami => run_whoami(&mut app),
        Commands::ChangePassword(args) => {
            let request = PasswordChangeRequest::new(&args.current, &args.new, &args.confirm)
                .map_err(|error| anyhow!(error.user_message()))?;
            let client = app.authorized()?;
            let result = client.change_password(&request).await;
            app.check(result)?;
            println!("password changed");
            Ok(())
        }
        Commands::Consent => {
            let client = app.authorized()?;
            let result = client.accept_consent(&ConsentRequest::default()).await;
            app.check(result)?;
            println!("consent recorded");
            Ok(())
        }
        Commands::Submit(args) => run_submit(&app, args).await,
        Commands::Contacts(command) => run_contacts(&mut app, command).await,
        Commands::Admins(command) => run_admins(&mut app, command).await,
        Commands::Audit(args) => run_audit(&mut app, args).await,
        Commands::Import(command) => run_import(&mut app, command).await,
        Commands::Aliases(command) => run_aliases(&mut app, command).await,
        Commands::Unrecognized { page } => run_unrecognized(&mut app, page).await,
        Commands::Quorum { building_id } => {
            let summary = app
                .client
                .building_quorum(&building_id)
                .await
                .map_err(api_failure)?;
            println!(
                "area voted for: {:.2} of {:.2} m2 ({:.2}%)",
                summary.area_voted_for,
                summary.total_area,
                summary.ratio * 100.0
            );
            println!(
                "threshold: {:.2}%, reached: {}",
                summary.quorum_threshold * 100.0,
                if summary.quorum_reached { "yes" } else { "no" }
            );
            println!(
                "registered for electronic voting: {:.2} m2 ({:.2}%)",
                summary.area_registered_ed,
                summary.ed_ratio * 100.0
            );
            Ok(())
        }
        Commands::Policy => {
            let admins = app.client.policy_admins().await.map_err(api_failure)?;
            for admin in admins {
                println!("{} ({})", admin.full_name, admin.premises);
            }
            Ok(())
        }
    }
}

struct App {
    client: KvorumApiClient,
    session: SessionContext<FileStore>,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let base_url = match cli.api_base.as_deref() {
            Some(base_url) => base_url.to_string(),
            None => {
                let (base_url, source) =
                    resolve_api_base_url().map_err(|error| anyhow!(error.user_message()))?;
                tracing::debug!(base_url, source, "resolved api base url");
                base_url
            }
        };
        let client = KvorumApiClient::from_base_url(
            Some(&base_url),
            cli.timeout_secs.map(Duration::from_secs),
        )?;
        let store_path = cli.token_store.clone().unwrap_or_else(FileStore::default_path);
        let mut session = SessionContext::new(FileStore::new(store_path));
        session.restore(Utc::now())?;
        Ok(Self { client, session })
    }

    /// Client carrying the stored token; errors when nobody is signed in.
    fn authorized(&mut self) -> Result<KvorumApiClient> {
        let token = self
            .session
            .access_token(Utc::now())
            .ok_or_else(|| anyhow!("not signed in; run `kvorum login` or `kvorum telegram exchange`"))?;
        Ok(self.client.clone().with_access_token(Some(token)))
    }

    /// Ends the stored session when the backend rejects it.
    fn check<T>(&mut self, result: Result<T, ApiClientError>) -> Result<T> {
        result.map_err(|error| {
            let error = ApiError::from(error);
            if self.session.handle_api_error(&error) {
                anyhow!("{}; session ended, sign in again", error.message)
            } else if error.kind == ApiErrorKind::ConsentRequired {
                anyhow!("{}; run `kvorum consent` first", error.message)
            } else {
                anyhow!(error.message)
            }
        })
    }
}

fn api_failure(error: ApiClientError) -> anyhow::Error {
    tracing::debug!(%error, "api call failed");
    anyhow!(ApiError::from(error).message)
}

async fn run_premises(client: KvorumApiClient, args: PremisesArgs) -> Result<()> {
    let mut session = LocatorSession::open(client).await;
    if let Some(entrance) = args.entrance.as_deref() {
        session.choose_entrance(entrance).await?;
    }
    if let Some(floor) = args.floor.as_deref() {
        session.choose_floor(floor).await?;
    }
    if let Some(premises_type) = args.premises_type.as_deref() {
        session.choose_type(premises_type).await?;
    }
    if let Some(unit) = args.unit.as_deref() {
        session.choose_unit(unit)?;
    }
    print_locator(session.locator());
    Ok(())
}

fn print_locator(locator: &PremisesLocator) {
    if let Some(message) = locator.empty_state_message() {
        println!("{message}");
        return;
    }
    for stage in LocatorStage::ALL {
        if let Some(error) = locator.stage_error(stage) {
            println!("{stage}: {error}");
        }
    }
    if locator.shows_entrance_control() && !locator.entrances().is_empty() {
        let labels = locator
            .entrances()
            .iter()
            .map(|entrance| entrance_button_label(entrance))
            .collect::<Vec<_>>();
        println!("entrances: {}", labels.join(" | "));
    }
    if !locator.floors().is_empty() {
        println!("floors: {}", locator.floors().join(", "));
    }
    if !locator.types().is_empty() {
        println!("types: {}", locator.types().join(", "));
    }
    for unit in locator.units() {
        println!("unit {} ({})", unit.display_number, unit.id);
    }
    if let Ok(selection) = locator.proceed() {
        println!("{}", selection.describe());
        println!("premise_id: {}", selection.unit.id);
    }
}

async fn run_telegram(mut app: App, command: TelegramCommand) -> Result<()> {
    match command {
        TelegramCommand::Bot => {
            let identity = app
                .client
                .telegram_bot_identity()
                .await
                .map_err(api_failure)?;
            match identity.bot_username {
                Some(username) => println!("{} (@{username})", identity.bot_id),
                None => println!("{}", identity.bot_id),
            }
            Ok(())
        }
        TelegramCommand::Resolve(args) => {
            let location = RedirectLocation::parse(&args.url).context("invalid callback url")?;
            let assertion = resolve_telegram_redirect(&location, unsigned_policy(&args))
                .map_err(|error| anyhow!("{}: {error}", error.user_message()))?;
            println!("source: {:?}", assertion.source);
            println!("signed: {}", assertion.is_signed());
            for (key, value) in assertion.exchange_query() {
                println!("{key}={value}");
            }
            Ok(())
        }
        TelegramCommand::Exchange(args) => {
            let location = RedirectLocation::parse(&args.url).context("invalid callback url")?;
            let assertion = resolve_telegram_redirect(&location, unsigned_policy(&args))
                .map_err(|error| anyhow!("{}: {error}", error.user_message()))?;
            app.session.subscribe(Box::new(|event: &SessionEvent| {
                tracing::info!(?event, "session event");
            }));
            let mut delivery = DirectExchangeDelivery::new(app.client, app.session);
            match delivery.deliver(&assertion).await {
                Ok(DeliveryOutcome::SignedIn { role, .. }) => {
                    let role = role.as_ref().map_or("unknown", |role| role.as_str());
                    println!("signed in as {role}");
                    Ok(())
                }
                Ok(DeliveryOutcome::PostedToOpener) => Ok(()),
                Err(error) => Err(anyhow!(error.user_message().to_string())),
            }
        }
    }
}

fn unsigned_policy(args: &TelegramRedirectArgs) -> UnsignedPolicy {
    if args.forward_unsigned {
        UnsignedPolicy::ForwardRawResult
    } else {
        UnsignedPolicy::Reject
    }
}

async fn run_login(app: &mut App, args: LoginArgs) -> Result<()> {
    let request =
        LoginRequest::new(&args.login, &args.password).map_err(|error| anyhow!(error.user_message()))?;
    let grant = app.client.login(&request).await.map_err(api_failure)?;
    let token = app.session.sign_in(&grant.access_token)?;
    let role = token.role.as_ref().map_or("unknown", |role| role.as_str());
    println!("signed in as {role}");
    Ok(())
}

fn run_whoami(app: &mut App) -> Result<()> {
    let Some(token) = app.session.current(Utc::now()) else {
        println!("not signed in");
        return Ok(());
    };
    println!("subject: {}", token.subject.as_deref().unwrap_or("-"));
    println!(
        "role: {}",
        token.role.as_ref().map_or("-", |role| role.as_str())
    );
    if let Some(expires_at) = token.expires_at {
        println!("expires: {}", expires_at.to_rfc3339());
    }
    Ok(())
}

fn build_contact_draft(premise_id: &str, fields: &ContactFields) -> ContactDraft {
    ContactDraft {
        premise_id: premise_id.to_string(),
        is_owner: fields.owner.unwrap_or(false),
        phone: fields.phone.clone(),
        email: fields.email.clone(),
        telegram_id: fields.telegram_id.clone(),
        barrier_vote: fields.barrier_vote.map(Into::into),
        vote_format: fields.vote_format.map(Into::into),
        registered_ed: fields.registered_ed.map(Into::into),
        consent: false,
        captcha_token: None,
    }
}

/// Only the answers given on the command line.
fn typed_answers(fields: &ContactFields) -> CachedContactFields {
    let given = |value: &str| (!value.trim().is_empty()).then(|| value.to_string());
    CachedContactFields {
        is_owner: fields.owner,
        phone: given(&fields.phone),
        email: given(&fields.email),
        telegram_id: given(&fields.telegram_id),
        barrier_vote: fields.barrier_vote.map(Into::into),
        vote_format: fields.vote_format.map(Into::into),
        registered_ed: fields.registered_ed.map(Into::into),
    }
}

/// Typed answers win over reused ones.
fn submission_draft(
    premise_id: &str,
    fields: &ContactFields,
    reused: Option<&CachedContactFields>,
) -> ContactDraft {
    let mut draft = build_contact_draft(premise_id, fields);
    if let Some(reused) = reused {
        draft.apply_cached(reused);
        draft.apply_cached(&typed_answers(fields));
    }
    draft
}

async fn run_submit(app: &App, args: SubmitArgs) -> Result<()> {
    let cache = FormCache::new(app.session.store());
    let reused = args.reuse_answers.then(|| cache.load()).flatten();
    let mut draft = submission_draft(&args.premise_id, &args.fields, reused.as_ref());
    draft.consent = args.consent;
    draft.captcha_token = args.captcha_token;

    let submission = draft
        .validate(args.require_captcha)
        .map_err(|error| anyhow!("{}: {}", error.field(), error.user_message()))?;
    match app.client.submit_contact(&submission).await {
        Ok(receipt) => {
            cache.save(&draft.cached_fields());
            cache.mark_submitted();
            println!("{}", receipt.user_message());
            Ok(())
        }
        Err(error) => {
            for (field, message) in field_errors_by_name(error.field_errors()) {
                eprintln!("{field}: {message}");
            }
            Err(api_failure(error))
        }
    }
}

fn build_admin_draft(args: &AdminContactArgs) -> AdminContactDraft {
    AdminContactDraft {
        premise_id: args.premise_id.clone(),
        is_owner: args.fields.owner.unwrap_or(false),
        phone: args.fields.phone.clone(),
        email: args.fields.email.clone(),
        telegram_id: args.fields.telegram_id.clone(),
        barrier_vote: args.fields.barrier_vote.map(Into::into),
        vote_format: args.fields.vote_format.map(Into::into),
        registered_ed: args.fields.registered_ed.map(Into::into),
    }
}

async fn run_contacts(app: &mut App, command: ContactsCommand) -> Result<()> {
    let client = app.authorized()?;
    match command {
        ContactsCommand::List(args) => {
            let filter = ContactFilter {
                entrance: args.entrance,
                premises_number: args.premises_number,
                status: args.status.map(Into::into),
                ip: args.ip,
                from_date: args.from_date,
                to_date: args.to_date,
            };
            let result = client.list_contacts(&filter).await;
            let list = app.check(result)?;
            println!("total: {}", list.total);
            for contact in list.contacts {
                println!(
                    "#{} [{}] entrance {} floor {} {} {} | {} {} {}{}",
                    contact.id,
                    contact.status.label(),
                    contact.entrance.as_deref().unwrap_or("-"),
                    contact.floor.as_deref().unwrap_or("-"),
                    contact.premises_type.as_deref().unwrap_or("-"),
                    contact.premises_number.as_deref().unwrap_or("-"),
                    contact.phone.as_deref().map(format_phone).unwrap_or_default(),
                    contact.email.as_deref().unwrap_or_default(),
                    contact.telegram_id.as_deref().unwrap_or_default(),
                    if contact.is_canary { " (canary)" } else { "" },
                );
            }
        }
        ContactsCommand::Show { contact_id } => {
            let result = client.get_contact(contact_id).await;
            let contact = app.check(result)?;
            println!("id: {}", contact.id);
            println!("status: {}", contact.status.label());
            println!("premise_id: {}", contact.premise_id.as_deref().unwrap_or("-"));
            println!("owner: {}", if contact.is_owner { "yes" } else { "no" });
            println!("phone: {}", contact.phone.as_deref().unwrap_or("-"));
            println!("email: {}", contact.email.as_deref().unwrap_or("-"));
            println!("telegram: {}", contact.telegram_id.as_deref().unwrap_or("-"));
            if let Some(vote) = contact.barrier_vote {
                println!("barrier vote: {}", vote.label());
            }
            if let Some(format) = contact.vote_format {
                println!("vote format: {}", format.label());
            }
            if let Some(registered) = contact.registered_ed {
                println!("registered for electronic voting: {}", registered.label());
            }
        }
        ContactsCommand::Add(args) => {
            let upsert = build_admin_draft(&args)
                .validate()
                .map_err(|error| anyhow!(error.user_message()))?;
            let result = client.create_contact(&upsert).await;
            let created = app.check(result)?;
            println!("contact #{} {}", created.contact_id, created.status.label());
        }
        ContactsCommand::Update {
            contact_id,
            contact,
        } => {
            let upsert = build_admin_draft(&contact)
                .validate()
                .map_err(|error| anyhow!(error.user_message()))?;
            let result = client.update_contact(contact_id, &upsert).await;
            app.check(result)?;
            println!("contact #{contact_id} updated");
        }
        ContactsCommand::Status { contact_id, status } => {
            let status = ContactStatus::from(status);
            let result = client.set_contact_status(contact_id, status).await;
            app.check(result)?;
            println!("contact #{contact_id} {}", status.label());
        }
        ContactsCommand::BulkStatus { ids, status } => {
            let change = BulkStatusChange::new(&ids, status.into());
            if change.contact_ids.is_empty() {
                bail!("no valid contact ids");
            }
            let result = client.bulk_set_contact_status(&change).await;
            app.check(result)?;
            println!(
                "{} contacts {}",
                change.contact_ids.len(),
                change.status.label()
            );
        }
    }
    Ok(())
}

async fn run_admins(app: &mut App, command: AdminsCommand) -> Result<()> {
    let client = app.authorized()?;
    match command {
        AdminsCommand::List => {
            let result = client.list_admins().await;
            for admin in app.check(result)? {
                println!(
                    "{} {} login={} created={}",
                    admin.telegram_id,
                    admin.role,
                    if admin.has_login { "yes" } else { "no" },
                    admin.created_at.as_deref().unwrap_or("-")
                );
            }
        }
        AdminsCommand::Add {
            telegram_id,
            login,
            password,
        } => {
            let admin = NewAdmin::administrator(&telegram_id).with_credentials(&login, &password);
            let result = client.add_admin(&admin).await;
            let ack = app.check(result)?;
            println!("added {}", ack.telegram_id);
        }
        AdminsCommand::Update {
            telegram_id,
            login,
            password,
        } => {
            let patch = AdminPatch {
                role: None,
                login,
                password,
            };
            let result = client.update_admin(&telegram_id, &patch).await;
            let ack = app.check(result)?;
            println!("updated {}", ack.telegram_id);
        }
        AdminsCommand::Remove { telegram_id } => {
            let result = client.remove_admin(&telegram_id).await;
            let ack = app.check(result)?;
            println!("removed {}", ack.telegram_id);
        }
    }
    Ok(())
}

async fn run_audit(app: &mut App, args: AuditArgs) -> Result<()> {
    let client = app.authorized()?;
    let filter = AuditFilter {
        entity_type: args.entity_type,
        action: args.action,
        user_id: args.user_id,
        ..AuditFilter::default()
    }
    .page(args.page);
    let result = client.audit_log(&filter).await;
    let page = app.check(result)?;
    println!(
        "page {} of {} ({} entries)",
        args.page.saturating_add(1),
        page.page_count(AUDIT_PAGE_SIZE).max(1),
        page.total
    );
    for entry in page.items {
        println!(
            "{} {} {}#{} by {} from {}",
            entry.created_at.as_deref().unwrap_or("-"),
            entry.action,
            entry.entity_type,
            entry.entity_id.as_deref().unwrap_or("-"),
            entry.user_id.as_deref().unwrap_or("-"),
            entry.ip.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn run_aliases(app: &mut App, command: AliasesCommand) -> Result<()> {
    let client = app.authorized()?;
    match command {
        AliasesCommand::List => {
            let result = client.list_bot_aliases().await;
            let aliases = app.check(result)?;
            if aliases.is_empty() {
                println!("no aliases");
            }
            for (premises_type, short_name, members) in group_bot_aliases(&aliases) {
                println!("{premises_type} ({short_name})");
                for alias in members {
                    println!("  #{} {}", alias.id, alias.alias);
                }
            }
        }
        AliasesCommand::Add {
            premises_type,
            short_name,
            alias,
        } => {
            let Some(alias) = NewBotAlias::new(&premises_type, &short_name, &alias) else {
                bail!("type, short name and alias are required");
            };
            let result = client.add_bot_alias(&alias).await;
            app.check(result)?;
            println!("added {} -> {}", alias.alias, alias.premises_type);
        }
        AliasesCommand::Remove { alias_id } => {
            let result = client.remove_bot_alias(alias_id).await;
            app.check(result)?;
            println!("removed alias #{alias_id}");
        }
    }
    Ok(())
}

async fn run_unrecognized(app: &mut App, page: u32) -> Result<()> {
    let client = app.authorized()?;
    let result = client.bot_unrecognized(page).await;
    let listing = app.check(result)?;
    println!(
        "page {} of {} ({} entries)",
        page.saturating_add(1),
        listing.page_count(UNRECOGNIZED_PAGE_SIZE).max(1),
        listing.total
    );
    let first = u64::from(page.saturating_mul(UNRECOGNIZED_PAGE_SIZE));
    for (index, item) in (first..).zip(listing.items) {
        println!(
            "{} {} {}",
            index.saturating_add(1),
            item.created_at.as_deref().unwrap_or("-"),
            item.input_text
        );
    }
    Ok(())
}

/// The server name when it is a bare, visible file name; otherwise the
/// default template name. Either way the file lands in the working directory.
fn template_output_path(filename: &str, entrance: &str) -> PathBuf {
    Path::new(filename)
        .file_name()
        .filter(|name| {
            Path::new(name) == Path::new(filename) && !name.to_string_lossy().starts_with('.')
        })
        .map_or_else(
            || {
                let entrance = entrance.trim().replace(['/', '\\'], "_");
                PathBuf::from(format!("contacts_entrance_{entrance}.xlsx"))
            },
            PathBuf::from,
        )
}

async fn run_import(app: &mut App, command: ImportCommand) -> Result<()> {
    let client = app.authorized()?;
    let (file, register) = match command {
        ImportCommand::Template { entrance, out } => {
            let result = client.contacts_template(&entrance).await;
            let template = app.check(result)?;
            let path = out.unwrap_or_else(|| template_output_path(&template.filename, &entrance));
            fs::write(&path, &template.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("saved {}", path.display());
            return Ok(());
        }
        ImportCommand::Register { file } => (file, true),
        ImportCommand::Contacts { file } => (file, false),
    };

    let bytes = fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.xlsx".to_string());
    let result = if register {
        client.import_register(&filename, bytes).await
    } else {
        client.import_contacts(&filename, bytes).await
    };
    if let Err(ApiClientError::Http { body, .. }) = &result {
        if !body.expected_columns.is_empty() {
            eprintln!("expected columns: {}", body.expected_columns.join(", "));
            eprintln!("detected columns: {}", body.detected_columns.join(", "));
        }
    }
    let report = app.check(result)?;
    println!("accepted: {}, rejected: {}", report.accepted, report.rejected);
    for error in report.errors {
        match error.row {
            Some(row) => println!("row {row}: {}", error.message),
            None => println!("{}", error.message),
        }
    }
    Ok(())
}
