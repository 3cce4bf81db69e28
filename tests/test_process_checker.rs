#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use mutator_prep::cancel::CancelToken;
use mutator_prep::checker::{
    CheckResult, CheckerError, CheckerLauncher, CheckerPool, CheckerProcess, PoolError, ProcessLauncher,
};
use mutator_prep::concurrency::ConcurrencyTokenProvider;
use mutator_prep::mutants::{Location, Mutant, MutantStatus, Position};

fn sh(script: &str) -> ProcessLauncher {
    ProcessLauncher::new("sh", vec!["-c".into(), script.into()]).handshake_timeout(Duration::from_secs(5))
}

const ECHO_PASSED: &str = r#"echo ready; while read line; do echo '{"status":"passed"}'; done"#;

fn mutant() -> Mutant {
    Mutant {
        id: "7".into(),
        location: Location {
            file: "src/a.ts".into(),
            start: Position { line: 3, column: 5 },
            end: Position { line: 3, column: 6 },
            start_byte: 40,
            end_byte: 41,
        },
        mutator: "negate_cmp".into(),
        original: ">".into(),
        replacement: "<=".into(),
        status: MutantStatus::Pending,
    }
}

fn first_token() -> mutator_prep::concurrency::ConcurrencyToken {
    ConcurrencyTokenProvider::new(1, 0).checker_tokens().next().unwrap()
}

#[test]
fn ready_checker_answers_checks() {
    let checker = sh(ECHO_PASSED).launch(&first_token(), &CancelToken::new()).unwrap();
    assert!(checker.pid().is_some());
    assert_eq!(checker.check(&mutant()).unwrap(), CheckResult::Passed);
    assert_eq!(checker.check(&mutant()).unwrap(), CheckResult::Passed);
    checker.terminate();
    assert!(matches!(checker.check(&mutant()), Err(CheckerError::Terminated)));
}

#[test]
fn compile_errors_are_reported() {
    let script = r#"echo ready; while read line; do echo '{"status":"compileError","reason":"TS2322"}'; done"#;
    let checker = sh(script).launch(&first_token(), &CancelToken::new()).unwrap();
    assert_eq!(
        checker.check(&mutant()).unwrap(),
        CheckResult::CompileError { reason: "TS2322".into() }
    );
}

#[test]
fn checker_receives_the_mutant_as_json() {
    let script = r#"echo ready; read line; case "$line" in *'"id":"7"'*) echo '{"status":"passed"}';; *) echo '{"status":"compileError","reason":"bad request"}';; esac"#;
    let checker = sh(script).launch(&first_token(), &CancelToken::new()).unwrap();
    assert_eq!(checker.check(&mutant()).unwrap(), CheckResult::Passed);
}

#[test]
fn slot_is_exported_to_the_child() {
    let script = r#"echo ready; read line; echo "{\"status\":\"compileError\",\"reason\":\"slot $MUTATOR_CHECKER_SLOT\"}""#;
    let checker = sh(script).launch(&first_token(), &CancelToken::new()).unwrap();
    assert_eq!(
        checker.check(&mutant()).unwrap(),
        CheckResult::CompileError { reason: "slot 0".into() }
    );
}

#[test]
fn exiting_before_ready_fails_the_handshake() {
    let err = sh("exit 1").launch(&first_token(), &CancelToken::new()).err().unwrap();
    assert!(matches!(err, CheckerError::Handshake { slot: 0, .. }));
}

#[test]
fn wrong_handshake_line_is_rejected() {
    let err = sh("echo starting; exec sleep 5").launch(&first_token(), &CancelToken::new()).err().unwrap();
    assert!(matches!(err, CheckerError::Handshake { .. }));
}

#[test]
fn silent_checker_times_out() {
    let launcher = sh("exec sleep 5").handshake_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let err = launcher.launch(&first_token(), &CancelToken::new()).err().unwrap();
    assert!(matches!(err, CheckerError::HandshakeTimeout { slot: 0, .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn missing_program_fails_to_spawn() {
    let launcher = ProcessLauncher::new("definitely-not-a-checker-binary", vec![]);
    let err = launcher.launch(&first_token(), &CancelToken::new()).err().unwrap();
    assert!(matches!(err, CheckerError::Spawn { .. }));
}

#[test]
fn invalid_responses_are_protocol_errors() {
    let checker = sh("echo ready; while read line; do echo nonsense; done").launch(&first_token(), &CancelToken::new()).unwrap();
    assert!(matches!(checker.check(&mutant()), Err(CheckerError::Protocol(_))));
}

#[test]
fn pool_of_processes_fails_as_a_whole() {
    let script = r#"if [ "$MUTATOR_CHECKER_SLOT" = "1" ]; then exit 1; fi; echo ready; while read line; do echo '{"status":"passed"}'; done"#;
    let pool = CheckerPool::new(Arc::new(sh(script)));
    let err = pool
        .initialize(ConcurrencyTokenProvider::new(3, 0).checker_tokens(), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, PoolError::Init(CheckerError::Handshake { slot: 1, .. })));
    assert_eq!(pool.worker_count(), 0);
}

#[test]
fn terminate_does_not_wait_for_a_busy_check() {
    // Never answers, so the check below blocks until the process dies.
    let checker = sh("echo ready; read line; exec sleep 30").launch(&first_token(), &CancelToken::new()).unwrap();
    let busy = Arc::clone(&checker);
    let handle = std::thread::spawn(move || busy.check(&mutant()));
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    checker.terminate();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(handle.join().unwrap().is_err());
}

#[test]
fn cancel_aborts_a_pending_handshake() {
    let dir = tempfile::TempDir::new().unwrap();
    let pid_file = dir.path().join("checker.pid");
    let launcher = sh(&format!("echo $$ > '{}'; exec sleep 30", pid_file.display()));
    let cancel = CancelToken::new();

    let launch = {
        let cancel = cancel.clone();
        std::thread::spawn(move || launcher.launch(&first_token(), &cancel).map(|_| ()))
    };
    std::thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    cancel.cancel();

    let result = launch.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert!(matches!(result, Err(CheckerError::Cancelled)));

    // The aborted checker has been killed and reaped.
    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .unwrap();
    assert!(!alive.success());
}

#[test]
fn pool_fails_fast_when_a_sibling_hangs() {
    let script = r#"if [ "$MUTATOR_CHECKER_SLOT" = "0" ]; then exit 1; fi; exec sleep 30"#;
    let pool = CheckerPool::new(Arc::new(sh(script)));

    let started = Instant::now();
    let err = pool
        .initialize(ConcurrencyTokenProvider::new(2, 0).checker_tokens(), &CancelToken::new())
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert!(matches!(err, PoolError::Init(CheckerError::Handshake { slot: 0, .. })));
    assert_eq!(pool.worker_count(), 0);
}

#[test]
fn pool_initialization_stops_on_cancel() {
    let pool = Arc::new(CheckerPool::new(Arc::new(sh("exec sleep 30"))));
    let cancel = CancelToken::new();

    let init = {
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        std::thread::spawn(move || pool.initialize(ConcurrencyTokenProvider::new(2, 0).checker_tokens(), &cancel))
    };
    std::thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    cancel.cancel();

    assert!(matches!(init.join().unwrap(), Err(PoolError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
}
