//! remote-deploy CLI
//!
//! Entry point for the `remote-deploy` command-line tool.

use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use deploy_transport::{SshConnector, SshOptions};
use remote_deploy::admission::{AdmissionCheck, LicenseInfo, LicenseValidator};
use remote_deploy::pipeline::{DryRunReport, NoPrompt, PasswordPrompt};
use remote_deploy::schedule::{format_duration, DelaySpec, GateOutcome};
use remote_deploy::signal::SignalHandler;
use remote_deploy::summary::new_run_id;
use remote_deploy::transfer::DEFAULT_MAX_WORKERS;
use remote_deploy::ui::{self, TerminalObserver, TerminalPrompt};
use remote_deploy::{
    resolve, Config, DeploymentPipeline, DeploymentSummary, PipelineOptions, SchedulingGate, SelectionRequest,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "remote-deploy")]
#[command(about = "Deploy files and run commands on remote servers over SSH", version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a deployment
    Deploy {
        /// Path to the deployment config (YAML or TOML)
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Server name from the config
        #[arg(long, short = 's')]
        server: Option<String>,

        /// App types to upload (comma-separated)
        #[arg(long = "upload", short = 'u', value_delimiter = ',')]
        app_types: Vec<String>,

        /// Command groups to run (comma-separated)
        #[arg(long = "groups", short = 'g', value_delimiter = ',')]
        groups: Vec<String>,

        /// Show what would be done without doing it
        #[arg(long)]
        dry_run: bool,

        /// Start after a delay: now, 5m, 10m, 30m, 1h, 2h, minutes, or 90m/3h/2d
        #[arg(long, conflicts_with = "at")]
        delay: Option<String>,

        /// Start at a time: HH:MM, MM-DD HH:MM, YYYY-MM-DD HH:MM[:SS]
        #[arg(long)]
        at: Option<String>,

        /// License key (overrides the config)
        #[arg(long)]
        license_key: Option<String>,

        /// Ignore the cached license verification
        #[arg(long)]
        force_refresh: bool,

        /// Run each remote command separately instead of as one session
        #[arg(long)]
        no_keep_session: bool,

        /// Print the deployment summary as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Never prompt; fail when something is missing
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Validate a config file and list its servers
    Validate {
        #[arg(long, short = 'c')]
        config: PathBuf,
    },

    /// Verify a license key
    License {
        /// Config to read the key from
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// License key (overrides the config)
        #[arg(long)]
        key: Option<String>,

        /// Ignore the cached verification
        #[arg(long)]
        force_refresh: bool,
    },
}

struct DeployArgs {
    config: PathBuf,
    server: Option<String>,
    app_types: Vec<String>,
    groups: Vec<String>,
    dry_run: bool,
    delay: Option<String>,
    at: Option<String>,
    license_key: Option<String>,
    force_refresh: bool,
    no_keep_session: bool,
    json: bool,
    yes: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Deploy {
            config,
            server,
            app_types,
            groups,
            dry_run,
            delay,
            at,
            license_key,
            force_refresh,
            no_keep_session,
            json,
            yes,
        } => {
            let code = run_deploy(DeployArgs {
                config,
                server,
                app_types,
                groups,
                dry_run,
                delay,
                at,
                license_key,
                force_refresh,
                no_keep_session,
                json,
                yes,
            });
            process::exit(code);
        }
        Commands::Validate { config } => {
            run_validate(&config);
        }
        Commands::License {
            config,
            key,
            force_refresh,
        } => {
            run_license(config.as_deref(), key, force_refresh);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: &Path) -> Config {
    match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    }
}

fn validator_for(key: Option<String>, config: Option<&Config>) -> LicenseValidator {
    let key = key
        .or_else(|| config.and_then(|c| c.license_key.clone()))
        .unwrap_or_default();
    let validator = LicenseValidator::new(key);
    match config.and_then(|c| c.license_url.clone()) {
        Some(url) => validator.with_url(url),
        None => validator,
    }
}

fn print_license(info: &LicenseInfo) {
    eprintln!(
        "License: {} ({}), valid until {}, remaining {}",
        info.product_name.as_deref().unwrap_or("-"),
        info.status_text.as_deref().unwrap_or("-"),
        info.valid_end_time.as_deref().unwrap_or("-"),
        info.remaining_text()
    );
}

/// Print the summary and return its exit code
fn report(summary: &DeploymentSummary, json: bool) -> i32 {
    if json {
        match summary.to_json() {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error serializing summary: {}", e),
        }
    } else if summary.status.is_failure() {
        eprintln!("\n✗ {}", summary.human_summary);
        if let Some(output) = summary.output.as_deref().filter(|o| !o.trim().is_empty()) {
            eprintln!("Output:\n{}", output.trim_end());
        }
    } else {
        eprintln!("\n✓ {}", summary.human_summary);
    }
    summary.exit_code
}

fn run_deploy(args: DeployArgs) -> i32 {
    let started = Instant::now();
    let run_id = new_run_id();
    let elapsed = || started.elapsed().as_millis() as u64;
    let interactive = !args.yes && std::io::stdin().is_terminal();

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        tracing::warn!(error = %e, "could not install the interrupt handler");
    }
    let signals = handler.state();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => return report(&DeploymentSummary::error(run_id, None, e.to_string(), elapsed()), args.json),
    };

    let mut request = SelectionRequest {
        server: args.server,
        app_types: args.app_types,
        command_groups: args.groups,
    };
    if interactive {
        request = match ui::complete_request(&config, request) {
            Ok(request) => request,
            Err(e) => return report(&DeploymentSummary::error(run_id, None, e.to_string(), elapsed()), args.json),
        };
    }

    let selection = match resolve(&config, request) {
        Ok(selection) => selection,
        Err(e) => return report(&DeploymentSummary::error(run_id, None, e.to_string(), elapsed()), args.json),
    };
    let server_name = Some(selection.server.name.clone());
    let keep_session = config.keep_session && !args.no_keep_session;

    if args.dry_run {
        return match DryRunReport::build(&selection, keep_session) {
            Ok(plan) => {
                if args.json {
                    match serde_json::to_string_pretty(&plan) {
                        Ok(text) => println!("{}", text),
                        Err(e) => eprintln!("Error serializing dry run: {}", e),
                    }
                } else {
                    print!("{}", plan);
                }
                0
            }
            Err(e) => report(&DeploymentSummary::error(run_id, server_name, e.to_string(), elapsed()), args.json),
        };
    }

    if interactive {
        match ui::confirm(&format!("Deploy to {} ({})?", selection.server.name, selection.server.target())) {
            Ok(true) => {}
            Ok(false) => return report(&DeploymentSummary::cancelled(run_id, server_name, elapsed()), args.json),
            Err(e) => return report(&DeploymentSummary::error(run_id, server_name, e.to_string(), elapsed()), args.json),
        }
    }

    let delay_text = match (args.at, args.delay) {
        (Some(at), _) => Some(at),
        (None, Some(delay)) => Some(delay),
        (None, None) if interactive => match ui::choose_delay() {
            Ok(choice) => Some(choice),
            Err(e) => return report(&DeploymentSummary::error(run_id, server_name, e.to_string(), elapsed()), args.json),
        },
        (None, None) => None,
    };
    let delay = match delay_text.as_deref().map(DelaySpec::parse).transpose() {
        Ok(spec) => spec.unwrap_or(DelaySpec::Immediate),
        Err(e) => return report(&DeploymentSummary::error(run_id, server_name, e.to_string(), elapsed()), args.json),
    };
    // Reject unusable times before the license request; the gate resolves
    // the start again once admission has passed
    if let Err(e) = delay.resolve(chrono::Local::now().naive_local()) {
        return report(&DeploymentSummary::error(run_id, server_name, e.to_string(), elapsed()), args.json);
    }

    let validator = validator_for(args.license_key, Some(&config));
    let mut gate = SchedulingGate::new(delay, &validator, Arc::clone(&signals));
    let mut bar: Option<ProgressBar> = None;
    let outcome = gate.run(args.force_refresh, &mut |tick| {
        let bar = bar.get_or_insert_with(|| {
            eprintln!("Starting in {}, press Ctrl-C to start now", format_duration(tick.total));
            ui::countdown_bar(tick.total)
        });
        ui::update_countdown(bar, tick);
    });
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    match outcome {
        Ok(GateOutcome::Released { license, start, .. }) => {
            print_license(&license);
            tracing::info!(start = %start.target.format("%Y-%m-%d %H:%M:%S"), "deployment starting");
        }
        Ok(GateOutcome::Cancelled) => {
            return report(&DeploymentSummary::cancelled(run_id, server_name, elapsed()), args.json);
        }
        Err(e) => return report(&DeploymentSummary::error(run_id, server_name, e.to_string(), elapsed()), args.json),
    }

    let observer = TerminalObserver::new();
    let prompt: &dyn PasswordPrompt = if interactive { &TerminalPrompt } else { &NoPrompt };
    let options = PipelineOptions {
        keep_session,
        max_transfers: DEFAULT_MAX_WORKERS,
    };
    let pipeline = DeploymentPipeline::new(SshConnector::new(SshOptions::default()), options)
        .with_observer(&observer)
        .with_prompt(prompt)
        .with_signals(signals);

    let summary = match pipeline.run(&selection) {
        Ok(result) => DeploymentSummary::success(run_id, result, elapsed()),
        Err(failure) => DeploymentSummary::failure(run_id, failure, elapsed()),
    };
    report(&summary, args.json)
}

fn run_validate(config_path: &Path) {
    let config = load_config(config_path);

    println!("Configuration OK: {}", config_path.display());
    if let Some(digest) = config.source.digest.get(..12) {
        println!("Digest: {}", digest);
    }
    println!();
    println!(
        "{:<16} {:<28} {:<18} {:<24} {}",
        "SERVER", "TARGET", "AUTH", "APP TYPES", "GROUPS"
    );
    println!("{}", "-".repeat(100));
    for server in &config.servers {
        println!(
            "{:<16} {:<28} {:<18} {:<24} {}",
            server.name,
            server.target().to_string(),
            server.auth.summary(),
            server.app_types().join(","),
            server.group_names().join(",")
        );
    }
    println!();
    println!(
        "License key: {}",
        if config.license_key.is_some() { "configured" } else { "missing" }
    );
}

fn run_license(config_path: Option<&Path>, key: Option<String>, force_refresh: bool) {
    let config = config_path.map(load_config);
    let validator = validator_for(key, config.as_ref());

    match validator.validate(force_refresh) {
        Ok(info) => {
            println!("License valid");
            println!("  Product:   {}", info.product_name.as_deref().unwrap_or("-"));
            println!("  Status:    {}", info.status_text.as_deref().unwrap_or("-"));
            println!("  Valid from {}", info.valid_start_time.as_deref().unwrap_or("-"));
            println!("  Valid to   {}", info.valid_end_time.as_deref().unwrap_or("-"));
            println!("  Remaining: {}", info.remaining_text());
            if let Some(remark) = &info.remark {
                println!("  Remark:    {}", remark);
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("License check failed: {}", e);
            process::exit(1);
        }
    }
}
