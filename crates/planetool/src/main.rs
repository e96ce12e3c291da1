use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand};
use planetool_core::batch::{BatchPlan, BatchSummary, DryRunReport};
use planetool_core::config::{ConfigPatch, PlaneToolConfig, load_config, patch_config};
use planetool_core::fuzzy::{MatchConfig, MatchSource};
use planetool_core::api::WorkItemReadApi;
use planetool_core::merge::{FinalFieldValue, MergeMode, MergeRequest};
use planetool_core::payload::{
    FieldChange, MutationPayload, description_file_to_html, description_to_html,
};
use planetool_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use planetool_core::select::{find_by_id, search, search_all};
use planetool_core::store::SnapshotStore;
use planetool_core::workitem::{Priority, WorkItem};
use serde::Serialize;

const LIST_TITLE_CHARS: usize = 60;

#[derive(Debug, Parser)]
#[command(
    name = "planetool",
    version,
    about = "Fuzzy work item search and bulk updates over a local Plane snapshot"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .planetool/ and a default config.toml")]
    Init(InitArgs),
    #[command(about = "Update selected config keys")]
    Configure(ConfigureArgs),
    #[command(about = "Load a work item export into the local snapshot")]
    Import(ImportArgs),
    #[command(about = "Print the snapshot's work items")]
    List(ListArgs),
    #[command(about = "Show runtime layout and resolved settings")]
    Status,
    #[command(about = "Rank work items by fuzzy title match")]
    Search(SearchArgs),
    #[command(about = "Update one work item by id, or fuzzy-matched items by title")]
    Update(UpdateArgs),
    #[command(name = "bulk-update", about = "Apply one change to every matching work item")]
    BulkUpdate(BulkUpdateArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
}

#[derive(Debug, Args)]
struct ConfigureArgs {
    #[arg(long, value_name = "SLUG")]
    workspace: Option<String>,
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
    #[arg(long, value_name = "IDENTIFIER")]
    default_project: Option<String>,
    #[arg(long, value_name = "0-100")]
    min_score: Option<i64>,
    #[arg(long, value_name = "N", help = "0 keeps every match")]
    max_results: Option<usize>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    #[arg(long, value_name = "IDENTIFIER", help = "Project identifier stored with the snapshot")]
    project: Option<String>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct SearchArgs {
    pattern: String,
    #[command(flatten)]
    matching: MatchArgs,
    #[arg(long, value_name = "N", help = "Maximum matches shown; 0 shows every match")]
    limit: Option<usize>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct MatchArgs {
    #[arg(long, value_name = "0-100", help = "Minimum fuzzy score (overrides config)")]
    min_score: Option<i64>,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(
        long,
        conflicts_with = "title_fuzzy",
        required_unless_present = "title_fuzzy",
        help = "Work item id or sequence identifier (PROJ-12)"
    )]
    id: Option<String>,
    #[arg(long, value_name = "PATTERN")]
    title_fuzzy: Option<String>,
    #[command(flatten)]
    matching: MatchArgs,
    #[command(flatten)]
    fields: FieldArgs,
    #[command(flatten)]
    lists: ListFieldArgs,
    #[arg(
        long,
        value_name = "LIST",
        requires = "title_fuzzy",
        help = "Pick matches by position: 1,3 or all"
    )]
    select: Option<String>,
    #[arg(
        long,
        requires = "title_fuzzy",
        conflicts_with = "select",
        help = "Update every match when the title matches more than one item"
    )]
    all: bool,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct BulkUpdateArgs {
    #[arg(long, value_name = "PATTERN")]
    search: String,
    #[command(flatten)]
    matching: MatchArgs,
    #[command(flatten)]
    fields: FieldArgs,
    #[command(flatten)]
    lists: ListFieldArgs,
    #[arg(long, value_name = "LIST", help = "Pick matches by position: 1,3 or all")]
    select: Option<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FieldArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long, help = "Markdown body, sent as an HTML container")]
    description: Option<String>,
    #[arg(long, value_name = "PATH", conflicts_with = "description")]
    description_file: Option<PathBuf>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long, help = "urgent, high, medium, low, none or 0-3")]
    priority: Option<Priority>,
    #[arg(long, value_name = "YYYY-MM-DD")]
    start_date: Option<NaiveDate>,
    #[arg(long, value_name = "YYYY-MM-DD")]
    target_date: Option<NaiveDate>,
    #[arg(long, conflicts_with = "clear_estimate")]
    estimate: Option<f64>,
    #[arg(long, conflicts_with = "clear_module")]
    module: Option<String>,
    #[arg(long, conflicts_with = "clear_cycle")]
    cycle: Option<String>,
    #[arg(long, conflicts_with = "clear_parent")]
    parent: Option<String>,
    #[arg(long)]
    clear_estimate: bool,
    #[arg(long)]
    clear_module: bool,
    #[arg(long)]
    clear_cycle: bool,
    #[arg(long)]
    clear_parent: bool,
}

impl FieldArgs {
    fn to_payload(&self) -> Result<MutationPayload> {
        let description = match &self.description_file {
            Some(path) => Some(description_file_to_html(path)?),
            None => self.description.as_deref().map(description_to_html),
        };
        Ok(MutationPayload {
            title: FieldChange::from_option(self.title.clone()),
            description: FieldChange::from_option(description),
            state: FieldChange::from_option(self.state.clone()),
            priority: FieldChange::from_option(self.priority),
            start_date: FieldChange::from_option(self.start_date),
            target_date: FieldChange::from_option(self.target_date),
            estimate_point: set_or_clear(self.estimate, self.clear_estimate),
            module: set_or_clear(self.module.clone(), self.clear_module),
            cycle: set_or_clear(self.cycle.clone(), self.clear_cycle),
            parent: set_or_clear(self.parent.clone(), self.clear_parent),
            ..MutationPayload::default()
        })
    }
}

#[derive(Debug, Args)]
struct ListFieldArgs {
    #[arg(long, value_delimiter = ',', value_name = "IDS", help = "Added to existing assignees")]
    assignees: Vec<String>,
    #[arg(long, requires = "assignees")]
    replace_assignees: bool,
    #[arg(long, conflicts_with_all = ["assignees", "replace_assignees"])]
    clear_assignees: bool,
    #[arg(long, value_delimiter = ',', value_name = "IDS", help = "Added to existing labels")]
    labels: Vec<String>,
    #[arg(long, requires = "labels")]
    replace_labels: bool,
    #[arg(long, conflicts_with_all = ["labels", "replace_labels"])]
    clear_labels: bool,
}

impl ListFieldArgs {
    /// Merge list flags into `payload` and return the per-target final values
    /// of every list field that changes.
    fn apply(&self, payload: &mut MutationPayload, targets: &[WorkItem]) -> Vec<FinalValues> {
        let mut finals = Vec::new();

        let assignees = merge_request(
            merge_mode(self.replace_assignees, self.clear_assignees),
            &self.assignees,
            targets,
            |item| &item.assignees,
        )
        .resolve();
        if !assignees.change.is_keep() {
            finals.push(FinalValues {
                field: "assignees",
                per_target: assignees.per_target,
            });
        }
        payload.assignees = assignees.change;

        let labels = merge_request(
            merge_mode(self.replace_labels, self.clear_labels),
            &self.labels,
            targets,
            |item| &item.labels,
        )
        .resolve();
        if !labels.change.is_keep() {
            finals.push(FinalValues {
                field: "labels",
                per_target: labels.per_target,
            });
        }
        payload.labels = labels.change;

        finals
    }
}

#[derive(Debug, Serialize)]
struct FinalValues {
    field: &'static str,
    per_target: Vec<FinalFieldValue>,
}

/// Where the targets of an update come from.
enum TargetQuery<'a> {
    Id(&'a str),
    Search {
        pattern: &'a str,
        select: Option<&'a str>,
        /// Without a selection, more than one match needs this confirmation.
        all: bool,
    },
}

struct MutationRequest<'a> {
    command: &'static str,
    query: TargetQuery<'a>,
    matching: &'a MatchArgs,
    fields: &'a FieldArgs,
    lists: &'a ListFieldArgs,
    dry_run: bool,
    json: bool,
}

#[derive(Debug, Serialize)]
struct MutationReport<'a> {
    command: &'static str,
    dry_run: bool,
    match_source: Option<MatchSource>,
    target_ids: Vec<&'a str>,
    final_values: &'a [FinalValues],
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<&'a DryRunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a BatchSummary>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Configure(args)) => run_configure(&runtime, args),
        Some(Commands::Import(args)) => run_import(&runtime, args),
        Some(Commands::List(args)) => run_list(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Search(args)) => run_search(&runtime, args),
        Some(Commands::Update(args)) => {
            let query = match (&args.id, &args.title_fuzzy) {
                (Some(id), _) => TargetQuery::Id(id),
                (None, Some(pattern)) => TargetQuery::Search {
                    pattern,
                    select: args.select.as_deref(),
                    all: args.all,
                },
                (None, None) => bail!("either --id or --title-fuzzy is required"),
            };
            run_mutation(
                &runtime,
                MutationRequest {
                    command: "update",
                    query,
                    matching: &args.matching,
                    fields: &args.fields,
                    lists: &args.lists,
                    dry_run: args.dry_run,
                    json: args.json,
                },
            )
        }
        Some(Commands::BulkUpdate(args)) => run_mutation(
            &runtime,
            MutationRequest {
                command: "bulk-update",
                query: TargetQuery::Search {
                    pattern: &args.search,
                    select: args.select.as_deref(),
                    all: true,
                },
                matching: &args.matching,
                fields: &args.fields,
                lists: &args.lists,
                dry_run: args.dry_run,
                json: args.json,
            },
        ),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized planetool runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("snapshot_path: {}", normalize_for_display(&paths.snapshot_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_configure(runtime: &RuntimeOptions, args: ConfigureArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let patch = ConfigPatch {
        set_base_url: args.base_url,
        set_workspace: args.workspace,
        set_default_project: args.default_project,
        set_min_score: args.min_score,
        set_max_results: args.max_results,
    };
    if patch.is_empty() {
        bail!(
            "configure needs at least one of --workspace, --base-url, --default-project, \
             --min-score, --max-results"
        );
    }
    let wrote = patch_config(&paths.config_path, &patch)?;

    println!("configure");
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("wrote_config: {}", format_flag(wrote));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_import(runtime: &RuntimeOptions, args: ImportArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let project = args
        .project
        .as_deref()
        .or_else(|| config.default_project());
    let report = SnapshotStore::import(&args.file, &paths.snapshot_path, project)?;

    println!("import");
    println!("source: {}", normalize_for_display(&args.file));
    println!("snapshot_path: {}", normalize_for_display(&paths.snapshot_path));
    println!("project: {}", report.project.as_deref().unwrap_or("<none>"));
    println!("items: {}", report.item_count);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_list(runtime: &RuntimeOptions, args: ListArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let mut store = SnapshotStore::open(&paths.snapshot_path)?;
    let items = store.list_work_items()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    println!("list");
    println!("project: {}", store.project().unwrap_or("<none>"));
    println!("items: {}", items.len());
    for item in &items {
        println!(
            "  {} ({}, {})",
            item.label(LIST_TITLE_CHARS),
            item.state.as_deref().unwrap_or("no state"),
            item.priority
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let status = inspect_runtime(&paths)?;
    let matching = config.match_config()?;

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("snapshot_exists: {}", format_flag(status.snapshot_exists));
    println!(
        "snapshot_size_bytes: {}",
        status
            .snapshot_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("plane.base_url: {}", config.base_url());
    println!(
        "plane.workspace: {}",
        config.workspace().as_deref().unwrap_or("<unset>")
    );
    println!("fuzzy.min_score: {}", matching.min_score());
    println!("fuzzy.max_results: {}", matching.max_results());
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_search(runtime: &RuntimeOptions, args: SearchArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut matching = resolve_match_config(&config, &args.matching)?;
    if let Some(limit) = args.limit {
        matching = matching.with_max_results(limit);
    }
    let mut store = SnapshotStore::open(&paths.snapshot_path)?;
    let items = store.list_work_items()?;
    let selection = search(&args.pattern, &items, &matching)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&selection)?);
        return Ok(());
    }
    println!("search");
    println!("pattern: {}", selection.pattern);
    println!("match_source: {}", match_source_name(selection.source));
    println!("min_score: {}", matching.min_score());
    println!("results: {}", selection.len());
    if selection.hidden() > 0 {
        println!(
            "hidden: {} (raise --limit or use --limit 0 to show every match)",
            selection.hidden()
        );
    }
    if selection.used_fallback() {
        println!("note: no fuzzy match reached min_score; showing substring matches");
    }
    for ranked in &selection.matches {
        println!(
            "  {}. {} (score {})",
            ranked.position,
            ranked.item.label(LIST_TITLE_CHARS),
            ranked.score
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_mutation(runtime: &RuntimeOptions, request: MutationRequest<'_>) -> Result<()> {
    let _span = tracing::info_span!("mutation", command = request.command).entered();
    let (paths, config) = load_runtime(runtime)?;
    let mut store = SnapshotStore::open(&paths.snapshot_path)?;

    let (targets, match_source) = match request.query {
        TargetQuery::Id(id) => {
            let work_item_id = resolve_id(&store, id)?;
            (vec![store.get_work_item(&work_item_id)?], None)
        }
        TargetQuery::Search {
            pattern,
            select,
            all,
        } => {
            let matching = resolve_match_config(&config, request.matching)?;
            let items = store.list_work_items()?;
            let mut selection = search_all(pattern, &items, &matching)?;
            selection = match select {
                Some(select) => selection.narrow(select)?,
                None => selection
                    .require_single(all)
                    .context("pick matches with --select 1,3 or confirm every match with --all")?,
            };
            let source = selection.source;
            (selection.into_targets(), Some(source))
        }
    };

    let mut payload = request.fields.to_payload()?;
    let final_values = request.lists.apply(&mut payload, &targets);
    let plan = BatchPlan::new(targets, payload)?;

    if request.dry_run {
        let preview = plan.dry_run()?;
        if request.json {
            let report = MutationReport {
                command: request.command,
                dry_run: true,
                match_source,
                target_ids: target_ids(plan.targets()),
                final_values: &final_values,
                preview: Some(&preview),
                summary: None,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_preview(request.command, match_source, &preview, &final_values);
        }
        print_diagnostics(runtime, &paths);
        return Ok(());
    }

    let targets = plan.targets().to_vec();
    let summary = plan.apply(&mut store);
    store.save_if_dirty()?;

    if request.json {
        let report = MutationReport {
            command: request.command,
            dry_run: false,
            match_source,
            target_ids: target_ids(&targets),
            final_values: &final_values,
            preview: None,
            summary: Some(&summary),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(request.command, match_source, &summary);
    }
    print_diagnostics(runtime, &paths);

    summary.into_result()?;
    Ok(())
}

fn resolve_id(store: &SnapshotStore, id: &str) -> Result<String> {
    match find_by_id(store.items(), store.project(), id) {
        Some(item) => Ok(item.id.clone()),
        None if store.project().is_none() => bail!(
            "work item not found: {id} (import with --project to resolve PROJ-12 identifiers)"
        ),
        None => bail!("work item not found: {id}"),
    }
}

fn print_preview(
    command: &str,
    match_source: Option<MatchSource>,
    preview: &DryRunReport,
    final_values: &[FinalValues],
) {
    println!("{command} (dry run, no changes will be made)");
    if let Some(source) = match_source {
        println!("match_source: {}", match_source_name(source));
    }
    println!("targets: {}", preview.lines.len());
    for change in &preview.changes {
        println!("change: {change}");
    }
    for line in &preview.lines {
        println!("  {}", line.render());
    }
    for finals in final_values {
        for target in &finals.per_target {
            let value = if target.value.is_empty() {
                "(none)".to_string()
            } else {
                target.value.join(", ")
            };
            println!("final {} {}: {value}", finals.field, target.target_id);
        }
    }
    println!("request_body: {}", preview.request_body);
    println!("Run without --dry-run to apply changes.");
}

fn print_summary(command: &str, match_source: Option<MatchSource>, summary: &BatchSummary) {
    println!("{command}");
    if let Some(source) = match_source {
        println!("match_source: {}", match_source_name(source));
    }
    for outcome in summary.outcomes.iter().filter(|outcome| outcome.succeeded) {
        println!("  updated {}", outcome.label);
    }
    for error in summary.remote_errors() {
        println!("  failed {error}");
    }
    println!("success_count: {}", summary.success_count);
    println!("failure_count: {}", summary.failure_count);
    if !summary.is_success() {
        println!("failed_ids: {}", summary.failed_target_ids().join(","));
    }
}

fn resolve_match_config(config: &PlaneToolConfig, args: &MatchArgs) -> Result<MatchConfig> {
    let mut matching = config.match_config()?;
    if let Some(min_score) = args.min_score {
        matching = matching.with_min_score(min_score);
    }
    Ok(matching)
}

fn merge_request<F>(
    mode: MergeMode,
    incoming: &[String],
    targets: &[WorkItem],
    existing: F,
) -> MergeRequest
where
    F: Fn(&WorkItem) -> &Vec<String>,
{
    targets.iter().fold(
        MergeRequest::new(mode, incoming.to_vec()),
        |request, item| request.with_target(item.id.clone(), existing(item).clone()),
    )
}

fn merge_mode(replace: bool, clear: bool) -> MergeMode {
    if clear {
        MergeMode::Clear
    } else if replace {
        MergeMode::Replace
    } else {
        MergeMode::Add
    }
}

fn set_or_clear<T>(value: Option<T>, clear: bool) -> FieldChange<T> {
    if clear {
        FieldChange::Clear
    } else {
        FieldChange::from_option(value)
    }
}

fn target_ids(targets: &[WorkItem]) -> Vec<&str> {
    targets.iter().map(|item| item.id.as_str()).collect()
}

fn match_source_name(source: MatchSource) -> &'static str {
    match source {
        MatchSource::Fuzzy => "fuzzy",
        MatchSource::Substring => "substring",
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, PlaneToolConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
