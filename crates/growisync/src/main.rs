use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use growisync_core::api::GrowiHttpClient;
use growisync_core::config::{
    ClientOverrides, GrowiClientConfig, GrowisyncConfig, ValueSource, load_config,
    resolve_config_path,
};
use growisync_core::migrate::{MigrationOptions, MigrationReport, run_migration};
use growisync_core::publish::{PublishRequest, publish_page};
use growisync_core::source::{RecordKind, SqliteKnowledgeSource};
use growisync_core::sync::{SyncOptions, WikiPageSync};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "growisync",
    version,
    about = "Migrate knowledge-base articles and attachments into a GROWI wiki"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "HOST", help = "GROWI host name")]
    host: Option<String>,
    #[arg(long, global = true, value_name = "PORT", help = "GROWI API port")]
    port: Option<u16>,
    #[arg(long, global = true, help = "Access GROWI over HTTPS")]
    tls: bool,
    #[arg(long, global = true, value_name = "NAME", help = "GROWI user owning the pages")]
    user: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    overrides: ClientOverrides,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            overrides: ClientOverrides {
                host: cli.host.clone(),
                port: cli.port,
                use_tls: cli.tls,
                user: cli.user.clone(),
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Migrate draft and published articles from the knowledge database")]
    Migrate(MigrateArgs),
    #[command(about = "Create or overwrite one page from a markdown file")]
    Publish(PublishArgs),
    #[command(about = "List destination pages under the user's namespace")]
    Inventory(InventoryArgs),
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(long, value_name = "PATH", help = "Knowledge database (SQLite export)")]
    db: Option<PathBuf>,
    #[arg(long, conflicts_with = "published_only", help = "Only migrate draft articles")]
    drafts_only: bool,
    #[arg(long, help = "Only migrate published articles")]
    published_only: bool,
    #[arg(long, value_name = "PATH", help = "Directory attachments are staged in")]
    staging_dir: Option<PathBuf>,
    #[arg(long, help = "Print reports as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct PublishArgs {
    #[arg(long)]
    title: String,
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,
    #[arg(long, value_name = "PATH")]
    body_file: PathBuf,
    #[arg(long = "attach", value_name = "PATH")]
    attachments: Vec<PathBuf>,
    #[arg(long, help = "Publish under the draft namespace")]
    draft: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct InventoryArgs {
    #[arg(long, help = "List the draft namespace")]
    draft: bool,
    #[arg(long, help = "Print pages as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Migrate(args)) => run_migrate(&runtime, args),
        Some(Commands::Publish(args)) => run_publish(&runtime, args),
        Some(Commands::Inventory(args)) => run_inventory(&runtime, args),
        Some(Commands::Config) => run_config(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_migrate(runtime: &RuntimeOptions, args: MigrateArgs) -> Result<()> {
    let (config, _, _) = load_runtime_config(runtime)?;
    let client_config = config.client_config(&runtime.overrides)?;
    let db_path = config
        .source_db_path(args.db.as_deref(), |key| env::var(key).ok())
        .ok_or_else(|| {
            anyhow::anyhow!("knowledge database is not configured (--db, KNOWLEDGE_DB_PATH or [source].db_path)")
        })?;
    let staging_dir = args
        .staging_dir
        .unwrap_or_else(|| config.staging_dir(|key| env::var(key).ok()));

    // Drafts are migrated before published articles.
    let kinds: &[RecordKind] = if args.drafts_only {
        &[RecordKind::Draft]
    } else if args.published_only {
        &[RecordKind::Published]
    } else {
        &[RecordKind::Draft, RecordKind::Published]
    };

    info!(db = %normalize_path(&db_path), kinds = kinds.len(), "opening knowledge database");
    let mut source = SqliteKnowledgeSource::open(&db_path)?;
    let reports = run_migration(
        &client_config,
        &mut source,
        &MigrationOptions { staging_dir },
        kinds,
    )?;
    drop(source);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("migration");
        println!("base_url: {}", client_config.base_url());
        println!("db_path: {}", normalize_path(&db_path));
        for report in &reports {
            print_migration_report(report);
        }
    }

    let failed: usize = reports.iter().map(|report| report.failed).sum();
    if failed > 0 {
        bail!("{failed} record(s) failed to migrate; re-run after fixing the cause");
    }
    Ok(())
}

fn run_publish(runtime: &RuntimeOptions, args: PublishArgs) -> Result<()> {
    let (config, _, _) = load_runtime_config(runtime)?;
    let client_config = config.client_config(&runtime.overrides)?;
    let mut sync = connect(&client_config, args.draft)?;

    let report = publish_page(
        &mut sync,
        &PublishRequest {
            title: args.title,
            tags: args.tags,
            body_file: args.body_file,
            attachments: args.attachments,
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("publish");
    println!("path: {}", report.path);
    println!("action: {}", report.action);
    println!("revision: {}", report.revision);
    println!("attachments: {}", report.attachments.len());
    for attachment in &report.attachments {
        println!(
            "  - {} -> {} (references rewritten: {})",
            attachment.file_name, attachment.reference, attachment.rewritten_references
        );
    }
    println!("request_count: {}", sync.request_count());
    Ok(())
}

fn run_inventory(runtime: &RuntimeOptions, args: InventoryArgs) -> Result<()> {
    let (config, _, _) = load_runtime_config(runtime)?;
    let client_config = config.client_config(&runtime.overrides)?;
    let sync = connect(&client_config, args.draft)?;
    let pages = sync.namespace_pages().collect::<Vec<_>>();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&pages)?);
        return Ok(());
    }
    println!("inventory");
    println!("namespace: {}", if args.draft { "draft" } else { "published" });
    println!("indexed_pages: {}", sync.stats().indexed_pages);
    println!("namespace_pages: {}", pages.len());
    for page in pages {
        println!("  - {} (id={}, revision={})", page.path, page.id, page.revision);
    }
    Ok(())
}

fn run_config(runtime: &RuntimeOptions) -> Result<()> {
    let (config, config_path, config_source) = load_runtime_config(runtime)?;
    println!("config_path: {} ({})", normalize_path(&config_path), config_source.as_str());
    println!("config_exists: {}", format_flag(config_path.exists()));
    match config.client_config(&runtime.overrides) {
        Ok(client_config) => println!("{}", client_config.diagnostics()),
        Err(error) => println!("client: unresolved ({error})"),
    }
    println!(
        "db_path: {}",
        config
            .source_db_path(None, |key| env::var(key).ok())
            .map(|path| normalize_path(&path))
            .unwrap_or_else(|| "<unset>".to_string())
    );
    println!(
        "staging_dir: {}",
        normalize_path(&config.staging_dir(|key| env::var(key).ok()))
    );
    Ok(())
}

fn connect(client_config: &GrowiClientConfig, draft: bool) -> Result<WikiPageSync<GrowiHttpClient>> {
    let api = GrowiHttpClient::new(client_config).context("failed to build GROWI HTTP client")?;
    WikiPageSync::connect(
        api,
        SyncOptions {
            user: client_config.user.clone(),
            draft,
        },
    )
    .with_context(|| format!("failed to index pages on {}", client_config.base_url()))
}

fn load_runtime_config(runtime: &RuntimeOptions) -> Result<(GrowisyncConfig, PathBuf, ValueSource)> {
    dotenvy::dotenv().ok();

    let cwd = env::current_dir().context("failed to read current directory")?;
    let (config_path, source) =
        resolve_config_path(runtime.config.as_deref(), &cwd, |key| env::var(key).ok());
    if source == ValueSource::Flag && !config_path.exists() {
        bail!("config file not found: {}", normalize_path(&config_path));
    }
    let config = load_config(&config_path)?;
    Ok((config, config_path, source))
}

fn print_migration_report(report: &MigrationReport) {
    println!("[{}]", report.kind);
    println!("  processed: {}", report.processed);
    println!("  created: {}", report.created);
    println!("  updated: {}", report.updated);
    println!("  failed: {}", report.failed);
    println!("  attachments_uploaded: {}", report.attachments_uploaded);
    println!("  attachments_replaced: {}", report.attachments_replaced);
    println!("  request_count: {}", report.request_count);
    if !report.errors.is_empty() {
        println!("  errors:");
        for error in &report.errors {
            println!("    - {error}");
        }
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_migrate_flags() {
        let cli = Cli::parse_from([
            "growisync",
            "--host",
            "wiki.example.org",
            "--tls",
            "migrate",
            "--db",
            "kb.db",
            "--drafts-only",
        ]);
        let runtime = RuntimeOptions::from_cli(&cli);
        assert_eq!(runtime.overrides.host.as_deref(), Some("wiki.example.org"));
        assert!(runtime.overrides.use_tls);
        match cli.command {
            Some(Commands::Migrate(args)) => {
                assert_eq!(args.db, Some(PathBuf::from("kb.db")));
                assert!(args.drafts_only);
                assert!(!args.published_only);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_conflicting_migrate_scopes() {
        let result = Cli::try_parse_from(["growisync", "migrate", "--drafts-only", "--published-only"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_collects_repeated_tags_and_attachments() {
        let cli = Cli::parse_from([
            "growisync",
            "publish",
            "--title",
            "Client test",
            "--tag",
            "client",
            "--tag",
            "test",
            "--body-file",
            "page.md",
            "--attach",
            "a.png",
            "--attach",
            "b.png",
        ]);
        match cli.command {
            Some(Commands::Publish(args)) => {
                assert_eq!(args.tags, vec!["client", "test"]);
                assert_eq!(args.attachments.len(), 2);
                assert!(!args.draft);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
