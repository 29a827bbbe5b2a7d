//! Checkerbox - parallel hardware test-sequence runner CLI
//!
//! The `checkerbox` command drives every configured site through the same
//! sequence plan.
//!
//! ## Commands
//!
//! - `run`: load a plan, run every site once, exit non-zero on any failure
//! - `console`: line-oriented control console (`start`, `noerror`, `config <name>`, `quit`)
//! - `check`: load a plan, build its devices, and report problems

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use checkerbox_core::{
    overall_verdict, AppSettings, ControlEvent, Event, Notification, RunCoordinator,
    SettingsSource, SiteOutcome, UiEngine,
};
use checkerbox_store::{JsonlRecordStore, MemoryRecordStore, RecordStore, Verdict};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};

const UI_INBOX_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "checkerbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parallel hardware test-sequence runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Application settings file (default: app.toml or app.json in the current directory)
    #[arg(long, global = true, env = "CHECKERBOX_APP")]
    app: Option<PathBuf>,

    /// Override the number of sites
    #[arg(long, global = true)]
    sites: Option<usize>,

    /// Directory for JSON-lines reports and logs (in-memory when unset)
    #[arg(long, global = true, env = "CHECKERBOX_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every site once without a UI
    Run {
        /// Sequence file inside the config directory
        #[arg(short, long)]
        config: Option<String>,

        /// Keep running after failing steps
        #[arg(long)]
        no_error: bool,
    },

    /// Interactive console relaying control commands
    Console {
        /// Sequence file loaded before the first command
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Validate a sequence file and its hardware declarations
    Check {
        /// Sequence file inside the config directory
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    checkerbox_core::telemetry::init_tracing(cli.json, level);

    let settings_path = match &cli.app {
        Some(path) => Some(path.clone()),
        None => AppSettings::locate(&std::env::current_dir()?),
    };
    let mut settings = match &settings_path {
        Some(path) => AppSettings::load(path),
        None => Ok(AppSettings::default()),
    }
    .context("Failed to load application settings")?;
    if let Some(sites) = cli.sites {
        settings.sites = sites;
    }
    if cli.store_dir.is_some() {
        settings.store_dir = cli.store_dir.clone();
    }
    settings.validate().context("Invalid application settings")?;

    let store = open_store(&settings).await?;

    // Without a subcommand, the settings file decides between headless and console.
    let command = cli.command.unwrap_or(match settings.ui_engine {
        UiEngine::Console => Commands::Console { config: None },
        UiEngine::None => Commands::Run {
            config: None,
            no_error: false,
        },
    });

    let success = match command {
        Commands::Run { config, no_error } => {
            cmd_run(settings, store, config, no_error).await? == Verdict::Pass
        }
        Commands::Console { config } => {
            // CONFIGPICK re-reads the settings file, keeping `--sites`.
            let source = settings_path.map(|path| SettingsSource::new(path).with_sites(cli.sites));
            cmd_console(settings, source, store, config).await?;
            true
        }
        Commands::Check { config } => cmd_check(settings, store, config).await?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn open_store(settings: &AppSettings) -> Result<Arc<dyn RecordStore>> {
    match &settings.store_dir {
        Some(dir) => {
            let store = JsonlRecordStore::open(dir.clone())
                .await
                .with_context(|| format!("Failed to open record store at {}", dir.display()))?;
            info!(dir = %dir.display(), "Using JSON-lines record store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryRecordStore::new())),
    }
}

/// Load the named (or default) plan into the coordinator. Fatal on failure.
async fn install(coordinator: &mut RunCoordinator, config: Option<String>) -> Result<()> {
    let name = config.unwrap_or_else(|| coordinator.settings().default_config.clone());
    let path = coordinator.settings().config_path(&name);
    let problems = coordinator
        .load_and_install(&path)
        .await
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    for problem in &problems {
        warn!(%problem, "Device problem");
    }
    Ok(())
}

/// Print notifications until every sender is gone.
fn spawn_printer(mut inbox: mpsc::Receiver<Event>, verbose: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            if let Some(line) = event.as_notification().and_then(|n| render(n, verbose)) {
                println!("{line}");
            }
        }
    })
}

/// One console line per notification; `debugInfo` only when verbose.
fn render(notification: &Notification, verbose: bool) -> Option<String> {
    match notification {
        Notification::DeviceInit {
            outcome,
            site,
            label,
        } => {
            let site = site.map_or_else(|| "?".to_string(), |s| s.to_string());
            Some(format!("[device] {label} site {site}: {outcome}"))
        }
        Notification::TestStarted(result) => {
            Some(format!("[site {}] {} {} ...", result.site, result.id, result.label))
        }
        Notification::TestResult(result) => Some(format!(
            "[site {}] {}",
            result.site,
            result.report_line()
        )),
        Notification::SequenceEnd { outcome, site } => {
            Some(format!("[site {site}] Sequence finished: {outcome}"))
        }
        Notification::DebugInfo(entry) if verbose => Some(format!(
            "[{}] {} {}",
            entry.level, entry.source, entry.message
        )),
        Notification::DebugInfo(_) => None,
    }
}

fn summarize(outcomes: &[SiteOutcome]) -> Verdict {
    for outcome in outcomes {
        println!();
        println!("Site {} - {}", outcome.site, outcome.verdict);
        println!("{}", outcome.report.render());
    }
    let verdict = overall_verdict(outcomes);
    println!();
    println!("Overall: {verdict}");
    verdict
}

async fn cmd_run(
    settings: AppSettings,
    store: Arc<dyn RecordStore>,
    config: Option<String>,
    no_error: bool,
) -> Result<Verdict> {
    let mut coordinator = RunCoordinator::new(settings, store);
    let (ui_tx, ui_rx) = mpsc::channel(UI_INBOX_CAPACITY);
    coordinator.subscribe_notifications(ui_tx).await;
    let printer = spawn_printer(ui_rx, false);

    install(&mut coordinator, config).await?;
    coordinator.policy().set_permissive(no_error);

    let outcomes = coordinator.run_headless().await?;
    coordinator.shutdown().await;
    drop(coordinator);
    printer.await?;

    Ok(summarize(&outcomes))
}

async fn cmd_console(
    settings: AppSettings,
    source: Option<SettingsSource>,
    store: Arc<dyn RecordStore>,
    config: Option<String>,
) -> Result<()> {
    let mut coordinator = RunCoordinator::new(settings, store);
    if let Some(source) = source {
        coordinator = coordinator.with_settings_source(source);
    }
    let (ui_tx, ui_rx) = mpsc::channel(UI_INBOX_CAPACITY);
    coordinator.subscribe_notifications(ui_tx).await;
    let printer = spawn_printer(ui_rx, true);

    install(&mut coordinator, config).await?;

    let (control_tx, control_rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Commands: start | noerror | config <name> | quit");
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read console input");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ControlEvent>() {
                Ok(control) => {
                    let quit = control == ControlEvent::Quit;
                    if control_tx.send(control).await.is_err() || quit {
                        break;
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
        }
    });

    coordinator.serve(control_rx).await?;
    drop(coordinator);
    printer.await?;
    Ok(())
}

async fn cmd_check(
    settings: AppSettings,
    store: Arc<dyn RecordStore>,
    config: Option<String>,
) -> Result<bool> {
    let mut coordinator = RunCoordinator::new(settings, store);
    let name = config.unwrap_or_else(|| coordinator.settings().default_config.clone());
    let path = coordinator.settings().config_path(&name);
    let problems = coordinator
        .load_and_install(&path)
        .await
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;

    if let Some(config) = coordinator.active_config() {
        println!(
            "Configuration {}: {} device declaration(s), {} step(s)",
            config.name,
            config.hardware.len(),
            config.sequence.len()
        );
    }
    for device in coordinator.device_names() {
        println!("  device: {device}");
    }

    let fatal = problems.iter().filter(|p| p.is_fatal()).count();
    for problem in &problems {
        let tag = if problem.is_fatal() { "error" } else { "warning" };
        println!("  {tag}: {problem}");
    }
    coordinator.shutdown().await;

    if fatal == 0 {
        println!("OK");
    } else {
        println!("{fatal} device(s) failed to initialize");
    }
    Ok(fatal == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkerbox_core::{LogEntry, Outcome, StepResult};

    fn result(outcome: Outcome) -> StepResult {
        StepResult {
            site: 1,
            id: 0,
            label: "Boot".to_string(),
            outcome,
            message: "TestAction1".to_string(),
            retried: 0,
        }
    }

    #[test]
    fn test_render_step_result() {
        let line = render(&Notification::TestResult(result(Outcome::Done)), false).unwrap();
        assert_eq!(line, "[site 1] 0 Done Boot: TestAction1 (1)");
    }

    #[test]
    fn test_debug_info_only_when_verbose() {
        let note = Notification::DebugInfo(LogEntry::info("mainloop", None, "hello"));
        assert!(render(&note, false).is_none());
        assert_eq!(render(&note, true).unwrap(), "[INFO] mainloop hello");
    }

    #[test]
    fn test_render_device_init_without_site() {
        let note = Notification::DeviceInit {
            outcome: Outcome::Error,
            site: None,
            label: "genericuart".to_string(),
        };
        assert_eq!(
            render(&note, false).unwrap(),
            "[device] genericuart site ?: Error"
        );
    }

    #[tokio::test]
    async fn test_cmd_check_reports_missing_plan_as_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings {
            config_dir: dir.path().to_path_buf(),
            ..AppSettings::default()
        };
        let ok = cmd_check(settings, Arc::new(MemoryRecordStore::new()), None)
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_cmd_run_fails_on_broken_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("plan.json"),
            r#"{"sequence": [{"step_label": "x", "device": "sequence", "function": "Nope"}]}"#,
        )
        .unwrap();
        let settings = AppSettings {
            config_dir: dir.path().to_path_buf(),
            ..AppSettings::default()
        };
        let store = Arc::new(MemoryRecordStore::new());
        let verdict = cmd_run(settings, store.clone(), Some("plan.json".to_string()), false)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Fail);
        assert_eq!(store.reports().await.unwrap().len(), 1);
    }
}
