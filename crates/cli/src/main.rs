use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use clinic_core::ClinicId;
use clinic_infra::{InMemoryStore, MergeConfig, StoreSnapshot};
use clinic_merge::{ClinicMergePlan, ClinicMergePlanner, ClinicPlanExecutor, MergeError, Plan, Planner, ReportGenerator};
use clinic_observability::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "clinic-merge", version, about = "Plan, review and execute clinic workspace merges.")]
struct Cli {
    /// Log output format (json, pretty).
    #[arg(long, global = true, default_value = "json", env = "CLINIC_MERGE_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute a merge plan and print it as JSON.
    Plan(MergeArgs),
    /// Execute the merge against the fixture and optionally write the resulting state.
    Execute(ExecuteArgs),
    /// Render the merge plan as an xlsx report.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
struct MergeArgs {
    /// Store snapshot (JSON) to load into the in-memory store.
    #[arg(long)]
    fixture: PathBuf,

    /// Workspace merged away.
    #[arg(long)]
    source: ClinicId,

    /// Workspace receiving the merge.
    #[arg(long)]
    target: ClinicId,
}

#[derive(Debug, Args)]
struct ExecuteArgs {
    #[command(flatten)]
    merge: MergeArgs,

    /// Write the store snapshot after execution here.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ReportArgs {
    #[command(flatten)]
    merge: MergeArgs,

    /// Destination of the xlsx workbook.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanOutput<'a> {
    prevents_merge: bool,
    errors: Vec<String>,
    plan: &'a ClinicMergePlan,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    clinic_observability::init_with(cli.log_format);

    if let Err(e) = run(cli.cmd) {
        error!("{:#}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run(cmd: Command) -> anyhow::Result<()> {
    let config = MergeConfig::from_env();
    match cmd {
        Command::Plan(args) => cmd_plan(args, &config),
        Command::Execute(args) => cmd_execute(args, &config),
        Command::Report(args) => cmd_report(args, &config),
    }
}

fn load_store(path: &Path) -> anyhow::Result<InMemoryStore> {
    let raw = fs::read_to_string(path).with_context(|| format!("read fixture {}", path.display()))?;
    let snapshot: StoreSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("parse fixture {}", path.display()))?;
    Ok(InMemoryStore::from_snapshot(snapshot))
}

fn compute_plan(store: &InMemoryStore, args: &MergeArgs, config: &MergeConfig) -> anyhow::Result<ClinicMergePlan> {
    ClinicMergePlanner::new(store, config, args.source, args.target)
        .plan()
        .with_context(|| format!("plan merge of {} into {}", args.source, args.target))
}

fn cmd_plan(args: MergeArgs, config: &MergeConfig) -> anyhow::Result<()> {
    let store = load_store(&args.fixture)?;
    let plan = compute_plan(&store, &args, config)?;
    let output = PlanOutput {
        prevents_merge: plan.prevents_merge(),
        errors: plan.error_messages(),
        plan: &plan,
    };
    println!("{}", serde_json::to_string_pretty(&output).context("serialize plan")?);
    Ok(())
}

fn cmd_execute(args: ExecuteArgs, config: &MergeConfig) -> anyhow::Result<()> {
    let store = load_store(&args.merge.fixture)?;
    let plan = compute_plan(&store, &args.merge, config)?;

    let plan_id = match ClinicPlanExecutor::new(&store, &store, config).execute(&plan) {
        Ok(plan_id) => plan_id,
        Err(MergeError::PlanPreventsMerge(reason)) => bail!("merge is blocked: {reason}"),
        Err(e) => return Err(e).context("execute merge plan"),
    };
    println!("{plan_id}");

    if let Some(out) = args.out {
        let snapshot = store.snapshot().context("snapshot store")?;
        let json = serde_json::to_string_pretty(&snapshot).context("serialize store")?;
        fs::write(&out, json).with_context(|| format!("write {}", out.display()))?;
        info!(path = %out.display(), "wrote merged store");
    }
    Ok(())
}

fn cmd_report(args: ReportArgs, config: &MergeConfig) -> anyhow::Result<()> {
    let store = load_store(&args.merge.fixture)?;
    let plan = compute_plan(&store, &args.merge, config)?;
    let bytes = ReportGenerator::new(&plan)
        .generate()
        .and_then(|workbook| workbook.to_xlsx())
        .context("render report")?;
    fs::write(&args.out, bytes).with_context(|| format!("write {}", args.out.display()))?;
    info!(path = %args.out.display(), prevents_merge = plan.prevents_merge(), "wrote merge report");
    Ok(())
}
