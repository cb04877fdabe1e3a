use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use cmsedit_core::catalog::{CatalogStats, import_manifest, load_catalog_stats};
use cmsedit_core::config::{EditorConfig, load_config};
use cmsedit_core::engine::SiteEngine;
use cmsedit_core::item::ContentItem;
use cmsedit_core::naming::{NameAffixes, apply_name};
use cmsedit_core::request::RequestParams;
use cmsedit_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_runtime_ready,
    init_layout, inspect_runtime, resolve_paths,
};
use cmsedit_core::services::Navigator;
use cmsedit_core::site::load_manifest;
use cmsedit_core::uploads::UploadFolders;
use serde::Serialize;
use tracing::debug;

mod logging;

#[derive(Debug, Parser)]
#[command(
    name = "cmsedit",
    version,
    about = "Resolve the content item an editing request is working on"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
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
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status,
    Catalog(CatalogArgs),
    Resolve(ResolveArgs),
    #[command(name = "selected-url")]
    SelectedUrl(SelectedUrlArgs),
    #[command(name = "action-url")]
    ActionUrl(ActionUrlArgs),
    Uploads(UploadsArgs),
    Name(NameArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite existing config/manifest files")]
    force: bool,
    #[arg(long, help = "Skip writing .cmsedit/config.toml")]
    no_config: bool,
    #[arg(long, help = "Skip writing the starter site.toml")]
    no_manifest: bool,
}

#[derive(Debug, Args)]
struct CatalogArgs {
    #[command(subcommand)]
    command: CatalogSubcommand,
}

#[derive(Debug, Subcommand)]
enum CatalogSubcommand {
    Import {
        #[arg(long, value_name = "PATH", help = "Site manifest to import")]
        manifest: Option<PathBuf>,
    },
    Stats,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    #[arg(help = "Query string of the editing request, e.g. `selected=/news/`")]
    query: String,
    #[arg(long, value_name = "QUERY", help = "Form body of the request")]
    form: Option<String>,
    #[arg(long, help = "Print the result as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct SelectedUrlArgs {
    base: String,
    query: String,
    #[arg(long, value_name = "PATH", help = "Carry this item instead of the selected one")]
    item: Option<String>,
}

#[derive(Debug, Args)]
struct ActionUrlArgs {
    action: String,
    query: String,
}

#[derive(Debug, Args)]
struct UploadsArgs {
    #[command(subcommand)]
    command: UploadsSubcommand,
}

#[derive(Debug, Subcommand)]
enum UploadsSubcommand {
    List {
        #[arg(long, help = "Print the result as JSON")]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct NameArgs {
    title: String,
    #[arg(long, value_name = "PATH", help = "Apply the cleaned name to this content item")]
    item: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResolveReport {
    selected: ContentItem,
    memorized: Option<ContentItem>,
    name_affixes: NameAffixes,
}

fn main() -> Result<()> {
    logging::init()?;
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Catalog(CatalogArgs { command })) => match command {
            CatalogSubcommand::Import { manifest } => run_catalog_import(&runtime, manifest),
            CatalogSubcommand::Stats => run_catalog_stats(&runtime),
        },
        Some(Commands::Resolve(args)) => run_resolve(&runtime, args),
        Some(Commands::SelectedUrl(args)) => run_selected_url(&runtime, args),
        Some(Commands::ActionUrl(args)) => run_action_url(&runtime, args),
        Some(Commands::Uploads(UploadsArgs { command })) => match command {
            UploadsSubcommand::List { json } => run_uploads_list(&runtime, json),
        },
        Some(Commands::Name(args)) => run_name(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            materialize_manifest: !args.no_manifest,
            force: args.force,
            ..InitOptions::default()
        },
    )?;

    println!("Initialized cmsedit runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("manifest_path: {}", normalize_path(&paths.manifest_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("wrote_manifest: {}", report.wrote_manifest);
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("manifest_exists: {}", format_flag(status.manifest_exists));
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_catalog_import(runtime: &RuntimeOptions, manifest: Option<PathBuf>) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;

    let manifest_path = match manifest {
        Some(path) => path,
        None => match config.site.manifest.as_deref() {
            Some(path) => paths.project_path(path),
            None => paths.manifest_path.clone(),
        },
    };
    let manifest = load_manifest(&manifest_path)?;
    let report = import_manifest(&paths, &manifest)?;

    println!("catalog import");
    println!("manifest_path: {}", normalize_path(&manifest_path));
    println!("db_path: {}", report.db_path);
    println!("inserted_items: {}", report.inserted_items);
    println!("inserted_versions: {}", report.inserted_versions);
    println!("start_item_id: {}", report.start_item_id);
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_catalog_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let stored = load_catalog_stats(&paths)?;

    println!("catalog stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    match stored {
        Some(stats) => print_catalog_stats("catalog", &stats),
        None => println!("catalog.storage: <not built> (run `cmsedit catalog import`)"),
    }
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_resolve(runtime: &RuntimeOptions, args: ResolveArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let engine = open_engine(&paths, &config)?;

    let mut request = RequestParams::parse_query(&args.query);
    if let Some(form) = args.form.as_deref() {
        request = request.with_form(form);
    }
    debug!(?request, "resolving request");

    let mut resolver = engine.resolver(request);
    let selected = resolver.selected_item()?.clone();
    let memorized = resolver.memorized_item().cloned();
    let report = ResolveReport {
        name_affixes: engine.name_affixes(&selected),
        selected,
        memorized,
    };

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialize resolution")?;
        println!("{rendered}");
        return Ok(());
    }

    println!("resolve");
    println!("selected_query_key: {}", engine.settings().selected_query_key);
    print_item("selected", &report.selected);
    match &report.memorized {
        Some(item) => print_item("memorized", item),
        None => println!("memorized: <none>"),
    }
    println!("name.prefix: {}", report.name_affixes.prefix);
    println!("name.suffix: {}", report.name_affixes.suffix);
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_selected_url(runtime: &RuntimeOptions, args: SelectedUrlArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let engine = open_engine(&paths, &config)?;

    let explicit = match args.item.as_deref() {
        Some(path) => match engine.navigate(path) {
            Some(item) => Some(item),
            None => bail!("no content item at `{path}`"),
        },
        None => None,
    };
    let mut resolver = engine.resolver(RequestParams::parse_query(&args.query));
    let url = resolver.selected_url(&args.base, explicit.as_ref())?;
    println!("{url}");

    Ok(())
}

fn run_action_url(runtime: &RuntimeOptions, args: ActionUrlArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let engine = open_engine(&paths, &config)?;

    let mut resolver = engine.resolver(RequestParams::parse_query(&args.query));
    let template = resolver.selected_item()?.template.clone();
    match resolver.action_url(&args.action)? {
        Some(url) => println!("{url}"),
        None => bail!(
            "template `{template}` defines no `{}` action (configure [actions] or [templates.{template}.actions])",
            args.action
        ),
    }

    Ok(())
}

fn run_uploads_list(runtime: &RuntimeOptions, json: bool) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let uploads = UploadFolders::from_config(&config, &paths);
    let files = uploads.list_files()?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&files).context("failed to serialize upload listing")?;
        println!("{rendered}");
        return Ok(());
    }

    println!("uploads list");
    for (folder, directory) in uploads.folders().iter().zip(uploads.directories()) {
        println!(
            "folder: {} -> {}{}",
            folder.path,
            normalize_path(directory),
            folder
                .url_prefix
                .as_deref()
                .map(|prefix| format!(" ({prefix})"))
                .unwrap_or_default()
        );
    }
    println!("files: {}", files.len());
    for file in &files {
        println!("  - {} {} ({} bytes)", file.virtual_path, file.public_url, file.bytes);
    }
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_name(runtime: &RuntimeOptions, args: NameArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let Some(path) = args.item.as_deref() else {
        println!("{}", config.naming.clean_name(&args.title));
        return Ok(());
    };

    let engine = open_engine(&paths, &config)?;
    let Some(mut item) = engine.navigate(path) else {
        bail!("no content item at `{path}`");
    };
    let name = engine.naming().clean_name(&args.title);
    let previous = item.name.clone();
    let changed = apply_name(&mut item, &name);
    let affixes = engine.name_affixes(&item);

    println!("name");
    println!("item.id: {}", item.id);
    println!("item.previous_name: {previous}");
    println!("item.name: {}", item.name);
    println!("changed: {}", format_flag(changed));
    println!("preview: {}{}{}", affixes.prefix, item.name, affixes.suffix);
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn print_item(prefix: &str, item: &ContentItem) {
    println!("{prefix}.id: {}", item.id);
    println!("{prefix}.title: {}", item.title);
    println!("{prefix}.template: {}", item.template);
    println!("{prefix}.path: {}", item.path);
    println!("{prefix}.url: {}", item.url);
    if let Some(index) = item.version_index {
        println!("{prefix}.version_index: {index}");
    }
    if let Some(key) = item.version_key.as_deref() {
        println!("{prefix}.version_key: {key}");
    }
}

fn print_catalog_stats(prefix: &str, stats: &CatalogStats) {
    println!("{prefix}.items: {}", stats.items);
    println!("{prefix}.versions: {}", stats.versions);
    println!(
        "{prefix}.start_item_id: {}",
        stats
            .start_item_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    if stats.by_template.is_empty() {
        println!("{prefix}.by_template: <empty>");
    } else {
        for (template, count) in &stats.by_template {
            println!("{prefix}.template.{template}: {count}");
        }
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, EditorConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn open_engine(paths: &ResolvedPaths, config: &EditorConfig) -> Result<SiteEngine> {
    match SiteEngine::open(paths, config)? {
        Some(engine) => Ok(engine),
        None => bail!(
            "catalog is not built at {}\nRun: cmsedit catalog import",
            normalize_path(&paths.db_path)
        ),
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{CatalogSubcommand, Cli, Commands};

    #[test]
    fn command_surface_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_catalog_import_with_manifest() {
        let cli = Cli::parse_from([
            "cmsedit",
            "--project-root",
            "/tmp/site",
            "catalog",
            "import",
            "--manifest",
            "site.toml",
        ]);
        assert!(cli.project_root.is_some());
        match cli.command {
            Some(Commands::Catalog(args)) => match args.command {
                CatalogSubcommand::Import { manifest } => {
                    assert_eq!(manifest.as_deref(), Some(std::path::Path::new("site.toml")));
                }
                CatalogSubcommand::Stats => panic!("expected import"),
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_name_with_item() {
        let cli = Cli::parse_from(["cmsedit", "name", "Launch Day!", "--item", "/home/news/"]);
        match cli.command {
            Some(Commands::Name(args)) => {
                assert_eq!(args.title, "Launch Day!");
                assert_eq!(args.item.as_deref(), Some("/home/news/"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_resolve_with_form() {
        let cli = Cli::parse_from([
            "cmsedit",
            "resolve",
            "selected=/news/",
            "--form",
            "memory=/trash/",
            "--json",
        ]);
        match cli.command {
            Some(Commands::Resolve(args)) => {
                assert_eq!(args.query, "selected=/news/");
                assert_eq!(args.form.as_deref(), Some("memory=/trash/"));
                assert!(args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
