use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use xwreset_core::archive::DEFAULT_LIST_FILENAME;
use xwreset_core::auth::{AuthOutcome, HttpLoginClient, LoginClientConfig, authenticate};
use xwreset_core::config::{
    DEFAULT_SETTINGS_FILENAME, SettingsPatch, load_settings_file, patch_settings_file,
};
use xwreset_core::driver::{FixReport, RunPlan, RunReport, ScanReport, run};
use xwreset_core::error::ResetError;
use xwreset_core::logging::{init_logging, init_logging_stderr};
use xwreset_core::prompt::{NonInteractive, Prompter, TerminalPrompter};
use xwreset_core::runtime::{RunOverrides, Settings, resolve_settings};
use xwreset_core::site::{BrowserSite, SiteLayout, webdriver_config};
use xwreset_core::webdriver::WebDriverSession;

#[derive(Debug, Parser)]
#[command(
    name = "xwreset",
    version,
    about = "Find crossword archive days marked complete with unfilled grids and reset them"
)]
struct Cli {
    #[arg(long, value_name = "y|n", help = "Run the browser without a window")]
    headless: Option<String>,
    #[arg(
        long,
        value_name = "N",
        allow_negative_numbers = true,
        help = "Number of archive months to scan, ending at --through"
    )]
    months: Option<i64>,
    #[arg(long, value_name = "scan|fix|both")]
    mode: Option<String>,
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SETTINGS_FILENAME)]
    settings: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        default_value = DEFAULT_LIST_FILENAME,
        help = "Date list written by scan and read by fix"
    )]
    list: PathBuf,
    #[arg(long, value_name = "YYYY-MM", help = "Newest month to scan (default: current month)")]
    through: Option<String>,
    #[arg(
        long = "date",
        value_name = "YYYY-MM-DD",
        help = "Date to fix instead of the list file (repeatable)"
    )]
    dates: Vec<String>,
    #[arg(long, value_name = "URL", help = "WebDriver endpoint")]
    webdriver_url: Option<String>,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
    #[arg(long, help = "Print resolved settings and their sources")]
    diagnostics: bool,
    #[arg(long, help = "Fail instead of prompting for missing values")]
    no_input: bool,
    #[arg(long, value_name = "PATH", help = "Append logs to this file instead of stderr")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            mode: self.mode.clone(),
            headless: self.headless.clone(),
            months: self.months,
            through: self.through.clone(),
            list_path: Some(self.list.clone()),
            dates: self.dates.clone(),
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.log_file {
        Some(path) => {
            if let Err(error) = init_logging(path) {
                eprintln!("warning: {error:#}; logging to stderr");
                init_logging_stderr();
            }
        }
        None => init_logging_stderr(),
    }

    let (settings, outcome, report) = match execute(&cli) {
        Ok(result) => result,
        Err(error) => {
            error!(stage = error.stage(), "run halted: {error}");
            return Err(error.into());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&settings, &outcome, &report);
    }
    Ok(())
}

fn execute(cli: &Cli) -> Result<(Settings, AuthOutcome, RunReport), ResetError> {
    let file = load_settings_file(&cli.settings).map_err(ResetError::configuration)?;
    let mut prompter: Box<dyn Prompter> = if cli.no_input {
        Box::new(NonInteractive)
    } else {
        Box::new(TerminalPrompter)
    };
    let settings = resolve_settings(&file, &cli.overrides(), prompter.as_mut())?;
    if cli.diagnostics {
        println!("[diagnostics]\n{}\n", settings.diagnostics());
    }
    let plan = RunPlan::from_settings(&settings);

    let webdriver_url = cli
        .webdriver_url
        .clone()
        .unwrap_or_else(|| file.site.webdriver_url());
    let driver_config = webdriver_config(&file.site, webdriver_url, settings.headless)
        .map_err(ResetError::configuration)?;
    let mut login = HttpLoginClient::new(LoginClientConfig::from_section(&file.site))
        .map_err(ResetError::configuration)?;
    info!(
        url = %driver_config.url,
        headless = driver_config.headless,
        "starting browser session"
    );
    let session = WebDriverSession::start(driver_config).map_err(ResetError::navigation)?;
    let mut site = BrowserSite::new(session, SiteLayout::from_section(&file.site));

    let outcome = authenticate(&mut site, &mut login, &settings, prompter.as_mut())?;
    persist_settings(&cli.settings, &outcome.persist_patch(&settings));

    let report = run(&mut site, &plan)?;
    if let Err(error) = site.close() {
        warn!("failed to close browser session: {error:#}");
    }
    Ok((settings, outcome, report))
}

/// Writes prompted credentials and a refreshed cookie back to the settings file.
/// A failed write is logged; the run itself already succeeded in authenticating.
fn persist_settings(path: &Path, patch: &SettingsPatch) {
    match patch_settings_file(path, patch) {
        Ok(true) => info!("updated {}", normalize_path(path)),
        Ok(false) => {}
        Err(error) => warn!("failed to update settings file: {error:#}"),
    }
}

fn print_report(settings: &Settings, outcome: &AuthOutcome, report: &RunReport) {
    println!("xwreset {}", report.mode.as_str());
    println!("auth: {}", outcome.method.as_str());
    println!("headless: {}", format_flag(settings.headless));
    if let Some(scan) = &report.scan {
        print_scan(scan);
    }
    match (&report.list_written, &report.scan) {
        (Some(path), _) => println!("list_file: {path}"),
        (None, Some(_)) => println!("list_file: not written (see log)"),
        (None, None) => {}
    }
    if let Some(fix) = &report.fix {
        print_fix(fix);
    }
    println!("webdriver_requests: {}", report.request_count);
}

fn print_scan(scan: &ScanReport) {
    let first = scan.months.first().map(ToString::to_string);
    let last = scan.months.last().map(ToString::to_string);
    println!(
        "months: {} ({} .. {})",
        scan.months.len(),
        first.as_deref().unwrap_or("-"),
        last.as_deref().unwrap_or("-")
    );
    println!("days_seen: {}", scan.days_seen);
    println!("marked_complete: {}", scan.marked_complete);
    println!("falsely_complete: {}", scan.falsely_complete.len());
    for entry in &scan.falsely_complete {
        match entry.fill {
            Some(fill) => println!("  - {} {fill}", entry.date),
            None => println!("  - {}", entry.date),
        }
    }
}

fn print_fix(fix: &FixReport) {
    println!("fix.requested: {}", fix.requested);
    println!("fix.verified: {}", fix.verified);
    println!("fix.already_clear: {}", fix.already_clear);
    println!("fix.failed: {}", fix.failed.len());
    for result in &fix.results {
        println!("  - {} {}", result.date, result.state.as_str());
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
