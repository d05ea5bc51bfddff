//! mavflow - heartbeat, telemetry and command pipeline

use anyhow::{Result, bail};
use clap::Parser;
use owo_colors::{
    OwoColorize,
    Stream::{Stderr, Stdout},
};

use mavflow::cli::{Cli, Commands, RunArgs, WorkerArgs};
use mavflow::logging::{self, LogConfig};
use mavflow::pipeline::{SessionReport, run_session};
use mavflow::roles;
use mavflow::worker::{ExitSignal, Launcher, ProcessLauncher, run_worker_main};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
        Commands::Worker(args) => std::process::exit(cmd_worker(&cli, args)),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Worker process entry point. Stdout belongs to the broker link.
fn cmd_worker(cli: &Cli, args: &WorkerArgs) -> i32 {
    logging::init(
        LogConfig::for_worker(&args.routine)
            .with_env_overrides()
            .with_verbosity(cli.verbose, cli.quiet)
            .with_ansi(!cli.no_color),
    );
    run_worker_main(&roles::registry(), &args.routine, args.replica)
}

/// Run one pipeline session and print its report.
fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let mut log = LogConfig::for_orchestrator()
        .with_env_overrides()
        .with_verbosity(cli.verbose, cli.quiet)
        .with_ansi(!cli.no_color);
    if let Some(dir) = &args.log_dir {
        log = log.with_log_dir(dir);
    }
    logging::init(log.clone());

    let launcher = if args.threads {
        Launcher::Threads
    } else {
        // Workers log with the same filter and into the same directory.
        let filter = log
            .filter
            .clone()
            .unwrap_or_else(|| log.level.to_string().to_lowercase());
        let mut launcher =
            ProcessLauncher::current_exe(roles::registry())?.env("MAVFLOW_LOG", filter);
        if let Some(dir) = &log.log_dir {
            launcher = launcher.env("MAVFLOW_LOG_DIR", dir);
        }
        if cli.no_color {
            launcher = launcher.arg("--no-color");
        }
        Launcher::Processes(launcher)
    };

    let exit = ExitSignal::new();
    let handler_exit = exit.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, requesting graceful shutdown...");
        handler_exit.request_exit();
    })?;

    let outcome = run_session(&args.to_config(), launcher, &exit);
    if !outcome.is_success() {
        bail!(
            "Failed with return code {}: {}",
            outcome.status,
            outcome.message
        );
    }

    if !cli.quiet {
        println!("{}", outcome.message);
        if let Some(report) = &outcome.report {
            print_report(report);
        }
        println!(
            "{}",
            "Success!".if_supports_color(Stdout, |text| text.green())
        );
    }
    Ok(())
}

fn print_report(report: &SessionReport) {
    let label = |text: &str| {
        format!("{:<11}", text)
            .if_supports_color(Stdout, |t| t.bold())
            .to_string()
    };

    println!(
        "  {} {} ({} disconnected)",
        label("heartbeats"),
        report.heartbeats,
        report.disconnects
    );
    println!("  {} {}", label("commands"), report.commands);
    println!(
        "  {} {} (heartbeat {}, telemetry {}, command {})",
        label("discarded"),
        report.residue.total(),
        report.residue.heartbeat,
        report.residue.telemetry,
        report.residue.command
    );

    let joined: usize = report.joins.iter().map(|j| j.replicas.len()).sum();
    let failed = report.failed_workers();
    println!(
        "  {} {} joined, {} failed",
        label("workers"),
        joined,
        failed
    );
    for join in &report.joins {
        for replica in join.replicas.iter().filter(|r| !r.reason.is_success()) {
            println!(
                "    {} {}#{}: {}",
                "!".if_supports_color(Stdout, |t| t.yellow()),
                join.pool,
                replica.replica,
                replica.reason
            );
        }
    }
}
