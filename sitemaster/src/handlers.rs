use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sitemaster_core::config::ScanConfig;
use sitemaster_core::data::Database;
use sitemaster_core::marks::{InMemoryMarkCatalog, MarkCatalog};
use sitemaster_core::metrics::builtin_registry;
use sitemaster_core::plugin::PageContext;
use sitemaster_core::registry::{PluginManager, PluginRegistry, UpdateAction};
use sitemaster_core::report::{ReportFormat, gather_report_data, render_report, save_report};
use sitemaster_core::scan::{PassOutcome, ScanOrchestrator, ScanStore};
use sitemaster_scanner::HttpFetcher;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

pub const DEFAULT_DB_PATH: &str = "~/.config/sitemaster/sitemaster.db";

/// Exit status when every page was delivered clean.
pub const EXIT_CLEAN: i32 = 0;
/// Exit status when a page failed or a mark was recorded.
pub const EXIT_FINDINGS: i32 = 1;

// Helper functions for the scan handler

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file. Blank lines and `#` comments are skipped.
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    eprintln!("{} Skipping invalid URL '{}'", "⚠".yellow(), line);
    None
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOverrides {
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub max_redirects: Option<usize>,
    pub no_redirect_marks: bool,
}

impl ScanOverrides {
    pub fn from_matches(args: &ArgMatches) -> Self {
        Self {
            workers: args.get_one::<usize>("workers").copied(),
            timeout_secs: args.get_one::<u64>("timeout").copied(),
            max_redirects: args.get_one::<usize>("max-redirects").copied(),
            no_redirect_marks: args.get_flag("no-redirect-marks"),
        }
    }

    pub fn apply(&self, mut config: ScanConfig) -> ScanConfig {
        if let Some(workers) = self.workers {
            config.link_check = config.link_check.with_workers(workers.max(1));
        }
        if let Some(secs) = self.timeout_secs {
            config.link_check = config.link_check.with_timeout(Duration::from_secs(secs));
        }
        if let Some(max_redirects) = self.max_redirects {
            config.link_check = config.link_check.with_max_redirects(max_redirects);
        }
        if self.no_redirect_marks {
            config.report_redirects = false;
        }
        config
    }
}

/// Config file first (if any), then command-line overrides.
pub fn build_scan_config(config_file: Option<&Path>, overrides: &ScanOverrides) -> Result<ScanConfig> {
    let config = match config_file {
        Some(path) => ScanConfig::from_json_file(path)?,
        None => ScanConfig::default(),
    };
    Ok(overrides.apply(config))
}

pub fn resolve_db_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Open the database, creating its directory on first use.
pub fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

pub fn exit_code(outcomes: &[PassOutcome]) -> i32 {
    let findings = outcomes.iter().any(|outcome| match outcome.result() {
        Some(result) => result.total_marks() > 0,
        None => true,
    });

    if findings { EXIT_FINDINGS } else { EXIT_CLEAN }
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message);
    spinner
}

fn print_scan_summary(outcomes: &[PassOutcome]) {
    for outcome in outcomes {
        match outcome {
            PassOutcome::Delivered(pass) => {
                let marks = pass.result.total_marks();
                let symbol = if marks == 0 { "✓".green().bold() } else { "⚠".yellow().bold() };
                eprintln!(
                    "{} {} ({} marks)",
                    symbol,
                    pass.result.page_url.bright_white(),
                    marks.to_string().cyan()
                );
            }
            PassOutcome::Failed(pass) => {
                eprintln!("{} {} ({})", "✗".red().bold(), pass.page_url.bright_white(), pass.error);
            }
        }
    }
}

pub async fn handle_scan(args: &ArgMatches) -> Result<i32> {
    let url = args.get_one::<Url>("url");
    let hosts_file = args.get_one::<PathBuf>("hosts-file");
    let config_file = args.get_one::<PathBuf>("config");
    let output = args.get_one::<PathBuf>("output");
    let no_persist = args.get_flag("no-persist");
    let format = args
        .get_one::<String>("format")
        .map(|f| ReportFormat::from_str(f))
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or(ReportFormat::Text);

    let urls = load_urls_from_source(url, hosts_file).map_err(anyhow::Error::msg)?;
    let config = build_scan_config(config_file.map(PathBuf::as_path), &ScanOverrides::from_matches(args))?;

    let registry = Arc::new(builtin_registry(&config).context("Failed to set up link checker")?);
    let fetcher = HttpFetcher::new(&config.link_check).context("Failed to set up page fetcher")?;

    let database = if no_persist {
        None
    } else {
        let db_path = resolve_db_path(db_arg(args));
        let db = Arc::new(open_database(&db_path)?);

        let manager = PluginManager::new(registry.clone(), db.clone(), db.clone());
        for (name, result) in manager.perform_all_updates() {
            if let Err(e) = result {
                warn!("Plugin {} could not be installed: {}", name, e);
            }
        }
        Some(db)
    };

    let scan_id = match &database {
        Some(db) => db.create_session(&urls).context("Failed to record scan session")?,
        None => uuid::Uuid::new_v4().to_string(),
    };

    let catalog: Arc<dyn MarkCatalog> = match &database {
        Some(db) => db.clone(),
        None => Arc::new(InMemoryMarkCatalog::new()),
    };
    let mut orchestrator = ScanOrchestrator::new(registry, catalog);
    if let Some(db) = &database {
        let store: Arc<dyn ScanStore> = db.clone();
        orchestrator = orchestrator.with_store(store);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut pages = Vec::with_capacity(urls.len());
    for url in &urls {
        let page_url = Url::parse(url).with_context(|| format!("Invalid URL {}", url))?;
        pages.push(
            PageContext::new(page_url)
                .with_scan_id(scan_id.clone())
                .with_cancel(cancel.child_token()),
        );
    }

    eprintln!(
        "{} Scanning {} page(s) with {} link workers",
        "→".blue(),
        pages.len().to_string().cyan(),
        config.link_check.workers.to_string().cyan()
    );

    let spinner = create_spinner(format!("Auditing {} page(s)...", pages.len()));
    let outcomes = orchestrator
        .scan_site(pages, &fetcher, config.page_concurrency)
        .await;
    spinner.finish_and_clear();

    if let Some(db) = &database {
        let finished = if cancel.is_cancelled() {
            db.fail_session(&scan_id)
        } else {
            db.complete_session(&scan_id)
        };
        if let Err(e) = finished {
            warn!("Failed to close scan session {}: {}", scan_id, e);
        }
    }

    print_scan_summary(&outcomes);

    let report = render_report(&gather_report_data(&outcomes), format).context("Failed to render report")?;
    match output {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            eprintln!("{} Report saved to {}", "✓".green().bold(), path.display());
        }
        None => print!("{}", report),
    }

    if cancel.is_cancelled() {
        bail!("Scan interrupted");
    }
    Ok(exit_code(&outcomes))
}

fn db_arg(args: &ArgMatches) -> &str {
    args.get_one::<String>("db").map(String::as_str).unwrap_or(DEFAULT_DB_PATH)
}

fn plugin_manager(args: &ArgMatches) -> Result<PluginManager> {
    let registry = default_registry()?;
    let db = Arc::new(open_database(&resolve_db_path(db_arg(args)))?);
    Ok(PluginManager::new(Arc::new(registry), db.clone(), db))
}

pub fn handle_plugin_list(args: &ArgMatches) -> Result<i32> {
    let manager = plugin_manager(args)?;

    print_divider();
    println!("{}", "  REGISTERED PLUGINS".bright_white().bold());
    print_divider();
    println!();

    for plugin in manager.active_plugins().iter() {
        let installed = match manager.installed_version(plugin.as_ref())? {
            Some(version) if version == plugin.version() => format!("installed {}", version).green(),
            Some(version) => format!("installed {} (update available)", version).yellow(),
            None => "not installed".to_string().red(),
        };

        println!(
            "{} {}  version {}  [{}]",
            "•".blue(),
            plugin.name().bright_white().bold(),
            plugin.version().to_string().cyan(),
            installed
        );
        if !plugin.description().is_empty() {
            println!("    {}", plugin.description());
        }
    }
    println!();
    Ok(EXIT_CLEAN)
}

pub fn handle_plugin_install(args: &ArgMatches) -> Result<i32> {
    let manager = plugin_manager(args)?;
    let mut failed = false;

    for (name, result) in manager.perform_all_updates() {
        match result {
            Ok((action, applied)) => {
                let symbol = match (action, applied) {
                    (_, true) => "✓".green().bold(),
                    (UpdateAction::UpToDate, _) => "→".blue(),
                    _ => "⚠".yellow().bold(),
                };
                println!("{} {} {}", symbol, name.bright_white(), update_message(action, applied));
            }
            Err(e) => {
                failed = true;
                println!("{} {}: {}", "✗".red().bold(), name.bright_white(), e);
            }
        }
    }

    Ok(if failed { EXIT_FINDINGS } else { EXIT_CLEAN })
}

pub fn handle_plugin_uninstall(args: &ArgMatches) -> Result<i32> {
    let name = args
        .get_one::<String>("name")
        .context("A plugin name is required")?;
    let manager = plugin_manager(args)?;

    let Some(plugin) = manager.registry().get(name) else {
        bail!("No plugin named '{}' (see `sitemaster plugin list`)", name);
    };

    if manager.uninstall(plugin.as_ref())? {
        println!("{} {} uninstalled", "✓".green().bold(), name.bright_white());
    } else {
        println!("{} {} was not installed", "→".blue(), name.bright_white());
    }
    Ok(EXIT_CLEAN)
}

pub fn update_message(action: UpdateAction, applied: bool) -> String {
    match (action, applied) {
        (UpdateAction::Install, true) => "installed".to_string(),
        (UpdateAction::Update { from }, true) => format!("updated from version {}", from),
        (UpdateAction::UpToDate, _) => "already up to date".to_string(),
        (UpdateAction::Install, false) => "install declined".to_string(),
        (UpdateAction::Update { from }, false) => format!("update from version {} declined", from),
    }
}

/// Registry of the built-in plugins with default settings.
pub fn default_registry() -> Result<PluginRegistry> {
    builtin_registry(&ScanConfig::default()).context("Failed to set up plugins")
}
