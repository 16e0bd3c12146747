use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use infratrack_core::{
    Actor, BillDetails, ClientInfo, CombinedUpdate, EngineError, FinancialUpdate, NewProject,
    PageRequest, ProgressUpdate, ProjectId, ProjectStatus, Role, StatusChange,
    SupportingDocument,
};
use infratrack_server::{CallContext, Config, ProjectEngine};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Infratrack: lifecycle and progress tracking for infrastructure projects
#[derive(Parser, Debug)]
#[command(name = "infratrack")]
#[command(about = "Lifecycle and progress tracking for infrastructure projects", long_about = None)]
struct Cli {
    #[command(flatten)]
    caller: CallerArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Identity of the caller. Authentication happens upstream; these are trusted.
#[derive(Args, Debug)]
struct CallerArgs {
    /// Role of the acting user (JE, AEE, CE, MD, ADMIN, SUPERADMIN)
    #[arg(long, global = true, env = "INFRATRACK_ROLE", default_value = "JE")]
    role: Role,

    /// Id of the acting user
    #[arg(long, global = true, env = "INFRATRACK_USER_ID", default_value = "cli")]
    user_id: String,

    /// Display name of the acting user
    #[arg(long, global = true, env = "INFRATRACK_USER_NAME", default_value = "Command line")]
    user_name: String,

    /// Idempotency key; a retried call with the same key is not applied twice
    #[arg(long, global = true)]
    operation_key: Option<String>,

    /// Client address recorded on history entries
    #[arg(long, global = true)]
    ip_address: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a new project (JE only)
    Create(CreateArgs),
    /// Move a project to a new status
    Status(StatusArgs),
    /// Record physical progress
    Progress(ProgressArgs),
    /// Record a cumulative bill amount
    Bill(BillArgs),
    /// Apply a physical and financial update together from a JSON file
    Combined(CombinedArgs),
    /// Lock or unlock a project for editing
    Editable(EditableArgs),
    /// Switch a progress ledger on or off
    Ledger(LedgerArgs),
    /// Show one page of a project's history, most recent first
    History(HistoryArgs),
    /// Show a project
    Show(ProjectArg),
    /// Show derived metrics for a project
    Summary(SummaryArgs),
    /// List project ids
    List,
}

#[derive(Parser, Debug)]
struct ProjectArg {
    /// Project id
    project_id: String,
}

#[derive(Parser, Debug)]
struct CreateArgs {
    project_id: String,

    #[arg(long)]
    name: String,

    /// Estimated cost in rupees
    #[arg(long)]
    cost: Decimal,

    /// Create with physical progress updates switched off
    #[arg(long)]
    progress_disabled: bool,

    /// Create with financial progress updates switched off
    #[arg(long)]
    financial_disabled: bool,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    project_id: String,

    /// Target status, e.g. "Ongoing" or "Rejected by CE"
    new_status: ProjectStatus,

    #[arg(long)]
    remarks: Option<String>,

    /// Required when rejecting
    #[arg(long)]
    rejection_reason: Option<String>,
}

#[derive(Parser, Debug)]
struct ProgressArgs {
    project_id: String,

    /// New cumulative progress percentage
    new_progress: Decimal,

    #[arg(long)]
    remarks: Option<String>,

    /// JSON file holding an array of already-uploaded documents
    #[arg(long)]
    documents: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct BillArgs {
    project_id: String,

    /// New cumulative bill amount
    new_bill_amount: Decimal,

    #[arg(long)]
    bill_number: Option<String>,

    /// Bill date (YYYY-MM-DD)
    #[arg(long)]
    bill_date: Option<NaiveDate>,

    #[arg(long)]
    bill_description: Option<String>,

    #[arg(long)]
    remarks: Option<String>,

    /// JSON file holding an array of already-uploaded documents
    #[arg(long)]
    documents: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CombinedArgs {
    project_id: String,

    /// JSON file with optional "progress" and "financial" objects
    update: PathBuf,
}

#[derive(Parser, Debug)]
struct EditableArgs {
    project_id: String,

    #[arg(value_enum)]
    state: Switch,

    #[arg(long)]
    reason: Option<String>,
}

#[derive(Parser, Debug)]
struct LedgerArgs {
    project_id: String,

    #[arg(value_enum)]
    ledger: Ledger,

    #[arg(value_enum)]
    state: Switch,

    #[arg(long)]
    reason: Option<String>,
}

#[derive(Parser, Debug)]
struct HistoryArgs {
    project_id: String,

    #[arg(value_enum)]
    kind: History,

    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long, default_value_t = 10)]
    page_size: usize,
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    project_id: String,

    /// Role to compute available transitions for; defaults to --role
    #[arg(long)]
    viewer: Option<Role>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Ledger {
    Physical,
    Financial,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum History {
    Progress,
    Financial,
    Status,
    Editable,
}

impl CallerArgs {
    fn context(&self) -> CallContext {
        let actor = Actor::new(self.user_id.clone(), self.user_name.clone(), self.role);
        let client = ClientInfo {
            ip_address: self.ip_address.clone(),
            user_agent: Some(format!("infratrack-cli/{}", env!("CARGO_PKG_VERSION"))),
        };
        let ctx = CallContext::new(actor).with_client(client);
        match &self.operation_key {
            Some(key) => ctx.with_operation_key(key.clone()),
            None => ctx,
        }
    }
}

fn read_documents(path: Option<&Path>) -> Result<Vec<SupportingDocument>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse documents file {}", path.display()))
}

/// Surface the engine's error code alongside the message.
fn rejected(err: EngineError) -> anyhow::Error {
    anyhow!("{}: {}", err.code(), err)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

async fn run(engine: &ProjectEngine, caller: &CallerArgs, command: Commands) -> Result<()> {
    let ctx = caller.context();

    match command {
        Commands::Create(args) => {
            let mut new = NewProject::new(args.project_id, args.name, args.cost);
            new.progress_updates_enabled = !args.progress_disabled;
            new.financial_progress_updates_enabled = !args.financial_disabled;
            let project = engine.create_project(new, &ctx).await.map_err(rejected)?;
            print_json(&project)
        }
        Commands::Status(args) => {
            let change = StatusChange {
                new_status: args.new_status,
                remarks: args.remarks,
                rejection_reason: args.rejection_reason,
            };
            let id = ProjectId::from(args.project_id);
            let mutation = engine
                .change_status(&id, change, &ctx)
                .await
                .map_err(rejected)?;
            print_json(&mutation)
        }
        Commands::Progress(args) => {
            let update = ProgressUpdate {
                new_progress: args.new_progress,
                remarks: args.remarks,
                supporting_documents: read_documents(args.documents.as_deref())?,
            };
            let id = ProjectId::from(args.project_id);
            let mutation = engine
                .add_progress_update(&id, update, &ctx)
                .await
                .map_err(rejected)?;
            print_json(&mutation)
        }
        Commands::Bill(args) => {
            let update = FinancialUpdate {
                new_bill_amount: args.new_bill_amount,
                remarks: args.remarks,
                bill_details: BillDetails {
                    bill_number: args.bill_number,
                    bill_date: args.bill_date,
                    bill_description: args.bill_description,
                },
                supporting_documents: read_documents(args.documents.as_deref())?,
            };
            let id = ProjectId::from(args.project_id);
            let mutation = engine
                .add_financial_progress_update(&id, update, &ctx)
                .await
                .map_err(rejected)?;
            print_json(&mutation)
        }
        Commands::Combined(args) => {
            let raw = fs::read_to_string(&args.update)
                .with_context(|| format!("Failed to read {}", args.update.display()))?;
            let update: CombinedUpdate = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", args.update.display()))?;
            let id = ProjectId::from(args.project_id);
            let mutation = engine
                .add_combined_update(&id, update, &ctx)
                .await
                .map_err(rejected)?;
            print_json(&mutation)
        }
        Commands::Editable(args) => {
            let id = ProjectId::from(args.project_id);
            let mutation = engine
                .set_editable_lock(&id, args.state.enabled(), args.reason, &ctx)
                .await
                .map_err(rejected)?;
            print_json(&mutation)
        }
        Commands::Ledger(args) => {
            let id = ProjectId::from(args.project_id);
            let enabled = args.state.enabled();
            let mutation = match args.ledger {
                Ledger::Physical => {
                    engine
                        .set_progress_updates_enabled(&id, enabled, args.reason, &ctx)
                        .await
                }
                Ledger::Financial => {
                    engine
                        .set_financial_progress_updates_enabled(&id, enabled, args.reason, &ctx)
                        .await
                }
            }
            .map_err(rejected)?;
            print_json(&mutation.project)
        }
        Commands::History(args) => {
            let id = ProjectId::from(args.project_id);
            let request = PageRequest::new(args.page, args.page_size);
            match args.kind {
                History::Progress => print_json(
                    &engine
                        .get_progress_history(&id, request)
                        .await
                        .map_err(rejected)?,
                ),
                History::Financial => print_json(
                    &engine
                        .get_financial_progress_history(&id, request)
                        .await
                        .map_err(rejected)?,
                ),
                History::Status => print_json(
                    &engine
                        .get_status_history(&id, request)
                        .await
                        .map_err(rejected)?,
                ),
                History::Editable => print_json(
                    &engine
                        .get_editable_history(&id, request)
                        .await
                        .map_err(rejected)?,
                ),
            }
        }
        Commands::Show(args) => {
            let id = ProjectId::from(args.project_id);
            let project = engine.get_project(&id).await.map_err(rejected)?;
            print_json(&project)
        }
        Commands::Summary(args) => {
            let id = ProjectId::from(args.project_id);
            let viewer = args.viewer.unwrap_or(caller.role);
            let summary = engine
                .project_summary(&id, viewer)
                .await
                .map_err(rejected)?;
            print_json(&summary)
        }
        Commands::List => {
            let ids = engine.list_projects().await.map_err(rejected)?;
            for id in ids {
                println!("{}", id);
            }
            Ok(())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    let settings = config.engine_settings()?;
    let db_path = config.db_path();
    debug!(db_path = %db_path.display(), "opening project store");

    let engine = ProjectEngine::open(&db_path, settings)
        .with_context(|| format!("Failed to open project store at {}", db_path.display()))?;

    run(&engine, &cli.caller, cli.command).await
}
