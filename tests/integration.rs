//! Integration tests for mavflow.
//!
//! CLI tests drive the built binary with `assert_cmd`. Pipeline tests use the
//! library with the built binary as the worker executable, so every replica
//! is a real child process.

use assert_cmd::Command;
use mavflow::config::SessionConfig;
use mavflow::pipeline::{Pipeline, PipelineState, StopReason, run_session};
use mavflow::roles;
use mavflow::worker::{
    EXIT_CLEAN, EXIT_PROTOCOL, EXIT_UNKNOWN_ROUTINE, EXIT_USAGE, ExitSignal, JoinReport,
    Launcher, ProcessLauncher, TerminationReason,
};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use predicates::prelude::*;
use std::time::Duration;
use tempfile::tempdir;

/// Fast simulated vehicle for short sessions.
const FAST_SIM: &str = "sim:heartbeat_ms=50,telemetry_ms=20";

/// Get a command for the mavflow binary.
fn mavflow() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("mavflow").unwrap();
    cmd.env_remove("MAVFLOW_LOG")
        .env_remove("MAVFLOW_LOG_DIR")
        .env("NO_COLOR", "1");
    cmd
}

/// Short `run` invocation against the fast simulator.
fn short_run() -> Command {
    let mut cmd = mavflow();
    cmd.args([
        "run",
        "--connection",
        FAST_SIM,
        "--duration-secs",
        "1",
        "--poll-ms",
        "20",
        "--heartbeat-period-ms",
        "50",
        "--heartbeat-timeout-ms",
        "200",
        "--join-timeout-secs",
        "20",
    ]);
    cmd
}

fn process_launcher() -> Launcher {
    Launcher::Processes(ProcessLauncher::new(
        env!("CARGO_BIN_EXE_mavflow"),
        roles::registry(),
    ))
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        connection: FAST_SIM.to_string(),
        duration: Duration::from_secs(1),
        poll: Duration::from_millis(20),
        worker_queue_timeout: Duration::from_millis(100),
        heartbeat_period: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_millis(200),
        join_timeout: Some(Duration::from_secs(20)),
        ..SessionConfig::default()
    }
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[test]
fn test_help_displays() {
    mavflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("completions"))
        .stdout(predicate::str::contains("worker").not());
}

#[test]
fn test_run_help_lists_options() {
    mavflow()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--heartbeat-queue"))
        .stdout(predicate::str::contains("--setup-failure"))
        .stdout(predicate::str::contains("--log-dir"));
}

#[test]
fn test_version_displays() {
    mavflow()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_completions_bash() {
    mavflow()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mavflow"));
}

#[test]
fn test_short_session_succeeds() {
    short_run()
        .assert()
        .success()
        .stdout(predicate::str::contains("Session stopped"))
        .stdout(predicate::str::contains("heartbeats"))
        .stdout(predicate::str::contains("4 joined, 0 failed"))
        .stdout(predicate::str::contains("Success!"));
}

#[test]
fn test_short_session_with_threads() {
    short_run()
        .arg("--threads")
        .assert()
        .success()
        .stdout(predicate::str::contains("Success!"));
}

#[test]
fn test_no_color_flag_reaches_process_workers() {
    short_run()
        .env_remove("NO_COLOR")
        .arg("--no-color")
        .assert()
        .success()
        .stdout(predicate::str::contains("4 joined, 0 failed"))
        .stderr(predicate::str::contains("invalid value").not());
}

#[test]
fn test_no_color_env_accepts_standard_value() {
    short_run()
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("4 joined, 0 failed"))
        .stdout(predicate::str::contains("\x1b[").not());
}

#[test]
fn test_quiet_session_prints_nothing() {
    short_run()
        .arg("-q")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_zero_senders_fails_with_negative_status() {
    mavflow()
        .args(["run", "--senders", "0", "--duration-secs", "1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("return code -1"))
        .stderr(predicate::str::contains("heartbeat sender"));
}

#[test]
fn test_invalid_target_rejected() {
    mavflow()
        .args(["run", "--target", "north"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("X,Y,Z"));
}

#[test]
fn test_unsupported_connection_stops_session() {
    mavflow()
        .args([
            "run",
            "--connection",
            "udp:127.0.0.1:14550",
            "--duration-secs",
            "30",
            "--join-timeout-secs",
            "20",
        ])
        .timeout(Duration::from_secs(25))
        .assert()
        .success()
        .stdout(predicate::str::contains("exit requested"))
        .stdout(predicate::str::contains("setup failed"))
        .stderr(predicate::str::contains("unsupported connection"));
}

#[test]
fn test_log_dir_gets_one_file_per_process() {
    let dir = tempdir().unwrap();
    short_run()
        .arg("--log-dir")
        .arg(dir.path())
        .assert()
        .success();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"main.log".to_string()), "{:?}", names);
    for routine in ["heartbeat_sender", "heartbeat_receiver", "telemetry", "command"] {
        let prefix = format!("{}_", routine);
        assert!(
            names.iter().any(|n| n.starts_with(&prefix) && n.ends_with(".log")),
            "no log for {} in {:?}",
            routine,
            names
        );
    }

    let main_log = std::fs::read_to_string(dir.path().join("main.log")).unwrap();
    assert!(main_log.contains("Queues cleared"));
    assert!(main_log.contains("Stopped"));
}

// ---------------------------------------------------------------------------
// Worker mode
// ---------------------------------------------------------------------------

#[test]
fn test_worker_without_launch_is_protocol_error() {
    mavflow()
        .args(["worker", "--routine", "telemetry"])
        .write_stdin("")
        .assert()
        .code(EXIT_PROTOCOL);
}

#[test]
fn test_worker_bad_arguments_use_usage_code() {
    mavflow()
        .args(["worker", "--routine", "telemetry", "--replica", "first"])
        .assert()
        .code(EXIT_USAGE);
    assert_ne!(EXIT_USAGE, EXIT_PROTOCOL);
}

#[test]
fn test_worker_unknown_routine() {
    mavflow()
        .args(["worker", "--routine", "autopilot"])
        .write_stdin("{\"args\":null,\"inputs\":[],\"outputs\":[]}\n")
        .assert()
        .code(EXIT_UNKNOWN_ROUTINE)
        .stderr(predicate::str::contains("Unknown routine"));
}

#[test]
fn test_worker_exits_when_parent_link_closes() {
    mavflow()
        .args(["worker", "--routine", "heartbeat_sender", "--replica", "1"])
        .write_stdin("{\"args\":{\"connection\":\"sim\"},\"inputs\":[],\"outputs\":[]}\n")
        .timeout(Duration::from_secs(10))
        .assert()
        .code(EXIT_CLEAN)
        .stdout(predicate::str::contains("exit_status"));
}

// ---------------------------------------------------------------------------
// Pipeline in process mode
// ---------------------------------------------------------------------------

#[test]
fn test_process_session_end_to_end() {
    let exit = ExitSignal::new();
    let outcome = run_session(&fast_config(), process_launcher(), &exit);
    assert!(outcome.is_success(), "{}", outcome.message);

    let report = outcome.report.unwrap();
    assert_eq!(report.stop_reason, StopReason::Budget);
    assert!(report.heartbeats > 0);
    assert!(report.commands > 0);
    assert_eq!(report.failed_workers(), 0);

    let pids: Vec<u32> = report
        .joins
        .iter()
        .flat_map(|j| &j.replicas)
        .map(|r| r.pid.unwrap())
        .collect();
    assert_eq!(pids.len(), 4);
    assert!(!pids.contains(&std::process::id()));
    assert!(pids.iter().all(|&pid| !is_alive(pid)));
    assert!(!exit.is_exit_requested());
}

#[test]
fn test_process_pipeline_reuse() {
    let mut pipeline = Pipeline::build(&fast_config(), process_launcher()).unwrap();
    for _ in 0..2 {
        pipeline.start_all().unwrap();
        let pids: Vec<u32> = pipeline.pools().iter().flat_map(|p| p.pids()).collect();
        assert_eq!(pids.len(), 4);

        pipeline.run(Duration::from_millis(500)).unwrap();
        let report = pipeline.shutdown().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(report.joins.iter().all(JoinReport::all_succeeded));
        assert!(pids.iter().all(|&pid| !is_alive(pid)));
        assert!(pipeline.heartbeat_queue().is_empty());
        assert!(pipeline.telemetry_queue().is_empty());
        assert!(pipeline.command_queue().is_empty());
    }
}

#[test]
fn test_process_stress_fast_producer_slow_consumer() {
    let config = SessionConfig {
        heartbeat_queue: 1,
        telemetry_queue: 1,
        command_queue: 1,
        telemetry_workers: 3,
        command_interval: Duration::from_millis(150),
        duration: Duration::from_secs(2),
        ..fast_config()
    };
    let mut pipeline = Pipeline::build(&config, process_launcher()).unwrap();
    pipeline.start_all().unwrap();

    let queue = pipeline.telemetry_queue().clone();
    let watcher = std::thread::spawn(move || {
        let mut peak = 0;
        for _ in 0..150 {
            peak = peak.max(queue.len());
            std::thread::sleep(Duration::from_millis(10));
        }
        peak
    });

    pipeline.run(config.duration).unwrap();
    let report = pipeline.shutdown().unwrap();

    assert!(watcher.join().unwrap() <= 1);
    let replicas: Vec<_> = report.joins.iter().flat_map(|j| &j.replicas).collect();
    assert_eq!(replicas.len(), 6);
    assert!(
        replicas
            .iter()
            .all(|r| r.reason == TerminationReason::Exited(EXIT_CLEAN))
    );
    assert!(pipeline.telemetry_queue().is_empty());
}

#[test]
fn test_dropped_pipeline_leaves_no_orphans() {
    let mut pipeline = Pipeline::build(&fast_config(), process_launcher()).unwrap();
    pipeline.start_all().unwrap();
    let pids: Vec<u32> = pipeline.pools().iter().flat_map(|p| p.pids()).collect();
    assert!(pids.iter().all(|&pid| is_alive(pid)));

    drop(pipeline);
    assert!(pids.iter().all(|&pid| !is_alive(pid)));
}

#[test]
fn test_process_setup_failure_isolated() {
    let config = SessionConfig {
        connection: "tcp:localhost:5760".to_string(),
        setup_failure: mavflow::worker::SetupFailurePolicy::Isolate,
        duration: Duration::from_millis(500),
        ..fast_config()
    };
    let outcome = run_session(&config, process_launcher(), &ExitSignal::new());
    assert!(outcome.is_success());
    let report = outcome.report.unwrap();
    assert_eq!(report.stop_reason, StopReason::Budget);
    assert!(report.joins.iter().all(|j| j.setup_failures() == 1));
}
