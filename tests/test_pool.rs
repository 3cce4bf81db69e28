use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mutator_prep::cancel::CancelToken;
use mutator_prep::checker::{
    CheckResult, CheckerError, CheckerLauncher, CheckerPool, CheckerProcess, PoolError, PoolState, WorkerState,
};
use mutator_prep::concurrency::{ConcurrencyToken, ConcurrencyTokenProvider};
use mutator_prep::mutants::{Location, Mutant, MutantStatus, Position};

#[derive(Default)]
struct FakeChecker {
    terminations: AtomicUsize,
}

impl CheckerProcess for FakeChecker {
    fn check(&self, _mutant: &Mutant) -> Result<CheckResult, CheckerError> {
        if self.terminations.load(Ordering::SeqCst) > 0 {
            return Err(CheckerError::Terminated);
        }
        Ok(CheckResult::Passed)
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeLauncher {
    fail_slot: Option<usize>,
    delay: Duration,
    // Launches that never finish on their own, like a checker stuck before its handshake
    hang: bool,
    launched: Mutex<Vec<Arc<FakeChecker>>>,
}

impl FakeLauncher {
    fn failing_on(slot: usize) -> Self {
        Self {
            fail_slot: Some(slot),
            delay: Duration::from_millis(20),
            ..Self::default()
        }
    }

    fn hanging_except(fail_slot: Option<usize>) -> Self {
        Self {
            fail_slot,
            hang: true,
            ..Self::default()
        }
    }

    fn launched(&self) -> Vec<Arc<FakeChecker>> {
        self.launched.lock().unwrap().clone()
    }
}

impl CheckerLauncher for FakeLauncher {
    fn launch(&self, token: &ConcurrencyToken, cancel: &CancelToken) -> Result<Arc<dyn CheckerProcess>, CheckerError> {
        if self.fail_slot == Some(token.slot()) {
            return Err(CheckerError::Handshake {
                slot: token.slot(),
                reason: "exit code 1".into(),
            });
        }
        if self.hang {
            let give_up = Instant::now() + Duration::from_secs(10);
            while Instant::now() < give_up {
                if cancel.is_cancelled() {
                    return Err(CheckerError::Cancelled);
                }
                thread::sleep(Duration::from_millis(5));
            }
            return Err(CheckerError::HandshakeTimeout {
                slot: token.slot(),
                timeout: Duration::from_secs(10),
            });
        }
        thread::sleep(self.delay);
        let checker = Arc::new(FakeChecker::default());
        self.launched.lock().unwrap().push(Arc::clone(&checker));
        Ok(checker)
    }
}

fn tokens(n: usize) -> impl Iterator<Item = ConcurrencyToken> {
    ConcurrencyTokenProvider::new(n, 0).checker_tokens()
}

fn ready_pool(n: usize) -> (Arc<FakeLauncher>, Arc<CheckerPool>) {
    let launcher = Arc::new(FakeLauncher::default());
    let pool = Arc::new(CheckerPool::new(launcher.clone()));
    pool.initialize(tokens(n), &CancelToken::new()).unwrap();
    (launcher, pool)
}

fn mutant() -> Mutant {
    Mutant {
        id: "0".into(),
        location: Location {
            file: "src/a.ts".into(),
            start: Position { line: 1, column: 1 },
            end: Position { line: 1, column: 2 },
            start_byte: 0,
            end_byte: 1,
        },
        mutator: "boundary".into(),
        original: ">".into(),
        replacement: ">=".into(),
        status: MutantStatus::Pending,
    }
}

#[test]
fn initialize_starts_one_worker_per_token() {
    let (launcher, pool) = ready_pool(3);
    assert_eq!(pool.state(), PoolState::Ready);
    assert_eq!(pool.worker_count(), 3);
    assert_eq!(pool.ready_count(), 3);
    assert_eq!(pool.worker_states(), vec![WorkerState::Ready; 3]);
    assert_eq!(launcher.launched().len(), 3);
}

#[test]
fn failed_worker_tears_down_the_rest() {
    let launcher = Arc::new(FakeLauncher::failing_on(1));
    let pool = CheckerPool::new(launcher.clone());

    let err = pool.initialize(tokens(3), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, PoolError::Init(CheckerError::Handshake { slot: 1, .. })));
    assert_eq!(pool.state(), PoolState::InitFailed);
    assert_eq!(pool.worker_count(), 0);

    let launched = launcher.launched();
    assert_eq!(launched.len(), 2);
    for checker in &launched {
        assert_eq!(checker.terminations.load(Ordering::SeqCst), 1);
    }
    assert!(matches!(pool.acquire(), Err(PoolError::NotReady(PoolState::InitFailed))));
}

#[test]
fn cancelled_initialization_launches_nothing() {
    let launcher = Arc::new(FakeLauncher::default());
    let pool = CheckerPool::new(launcher.clone());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = pool.initialize(tokens(2), &cancel).unwrap_err();
    assert!(matches!(err, PoolError::Cancelled));
    assert_eq!(pool.state(), PoolState::InitFailed);
    assert!(launcher.launched().is_empty());
}

#[test]
fn initialize_runs_only_once() {
    let (_launcher, pool) = ready_pool(1);
    let err = pool.initialize(tokens(1), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, PoolError::NotReady(PoolState::Ready)));
}

#[test]
fn acquire_before_initialize_is_rejected() {
    let pool = CheckerPool::new(Arc::new(FakeLauncher::default()));
    assert!(matches!(pool.acquire(), Err(PoolError::NotReady(PoolState::Uninitialized))));
}

#[test]
fn acquired_workers_are_unavailable_until_released() {
    let (_launcher, pool) = ready_pool(2);
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(pool.ready_count(), 0);
    assert_eq!(pool.worker_states(), vec![WorkerState::Busy, WorkerState::Busy]);
    assert!(pool.acquire_timeout(Duration::from_millis(30)).unwrap().is_none());

    let released = a.id();
    pool.release(a);
    let again = pool.acquire_timeout(Duration::from_millis(30)).unwrap().unwrap();
    assert_eq!(again.id(), released);
    assert_eq!(again.check(&mutant()).unwrap(), CheckResult::Passed);
    pool.release(again);
    pool.release(b);
    assert_eq!(pool.ready_count(), 2);
}

#[test]
fn blocked_acquire_wakes_on_release() {
    let (_launcher, pool) = ready_pool(1);
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire().map(|w| w.id()))
    };
    thread::sleep(Duration::from_millis(30));
    let id = held.id();
    pool.release(held);
    assert_eq!(waiter.join().unwrap().unwrap(), id);
}

#[test]
fn a_worker_is_never_handed_out_twice() {
    let (_launcher, pool) = ready_pool(3);
    let in_use = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            thread::spawn(move || {
                for _ in 0..10 {
                    let worker = pool.acquire().unwrap();
                    assert!(in_use.lock().unwrap().insert(worker.id()), "worker {} handed out twice", worker.id());
                    thread::sleep(Duration::from_millis(1));
                    in_use.lock().unwrap().remove(&worker.id());
                    pool.release(worker);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(pool.ready_count(), 3);
}

#[test]
fn dispose_terminates_every_worker_once() {
    let (launcher, pool) = ready_pool(3);
    let busy = pool.acquire().unwrap();

    pool.dispose();
    pool.dispose();

    assert_eq!(pool.state(), PoolState::Disposed);
    assert_eq!(pool.worker_count(), 0);
    assert_eq!(pool.worker_states(), vec![WorkerState::Disposed; 3]);
    for checker in launcher.launched() {
        assert_eq!(checker.terminations.load(Ordering::SeqCst), 1);
    }
    assert!(matches!(busy.check(&mutant()), Err(CheckerError::Terminated)));
    // Releasing into a disposed pool is a no-op.
    pool.release(busy);
    assert!(matches!(pool.acquire(), Err(PoolError::Disposed)));
    assert!(matches!(pool.acquire_timeout(Duration::from_millis(5)), Err(PoolError::Disposed)));
}

#[test]
fn dispose_wakes_blocked_callers() {
    let (_launcher, pool) = ready_pool(1);
    let _held = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire().map(|w| w.id()))
    };
    thread::sleep(Duration::from_millis(30));
    pool.dispose();
    assert!(matches!(waiter.join().unwrap(), Err(PoolError::Disposed)));
}

#[test]
fn dispose_during_initialization_stops_started_workers() {
    let launcher = Arc::new(FakeLauncher {
        delay: Duration::from_millis(100),
        ..FakeLauncher::default()
    });
    let pool = Arc::new(CheckerPool::new(launcher.clone()));

    let init = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.initialize(tokens(2), &CancelToken::new()))
    };
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pool.state(), PoolState::Initializing);
    assert_eq!(pool.worker_states(), vec![WorkerState::Starting; 2]);
    pool.dispose();

    assert!(matches!(init.join().unwrap(), Err(PoolError::Disposed)));
    assert_eq!(pool.state(), PoolState::Disposed);
    for checker in launcher.launched() {
        assert_eq!(checker.terminations.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn dropping_the_pool_terminates_workers() {
    let (launcher, pool) = ready_pool(2);
    drop(pool);
    for checker in launcher.launched() {
        assert_eq!(checker.terminations.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn zero_tokens_is_an_initialization_error() {
    let launcher = Arc::new(FakeLauncher::default());
    let pool = CheckerPool::new(launcher.clone());

    let err = pool.initialize(std::iter::empty(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, PoolError::NoTokens));
    assert_eq!(pool.state(), PoolState::InitFailed);
    assert!(matches!(pool.acquire(), Err(PoolError::NotReady(PoolState::InitFailed))));
    assert!(launcher.launched().is_empty());
}

#[test]
fn first_failure_aborts_hung_launches() {
    let launcher = Arc::new(FakeLauncher::hanging_except(Some(0)));
    let pool = CheckerPool::new(launcher.clone());

    let started = Instant::now();
    let err = pool.initialize(tokens(3), &CancelToken::new()).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert!(matches!(err, PoolError::Init(CheckerError::Handshake { slot: 0, .. })));
    assert_eq!(pool.state(), PoolState::InitFailed);
    assert!(launcher.launched().is_empty());
}

#[test]
fn cancel_interrupts_launches_in_flight() {
    let launcher = Arc::new(FakeLauncher::hanging_except(None));
    let pool = Arc::new(CheckerPool::new(launcher));
    let cancel = CancelToken::new();

    let init = {
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        thread::spawn(move || pool.initialize(tokens(2), &cancel))
    };
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    cancel.cancel();

    assert!(matches!(init.join().unwrap(), Err(PoolError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(pool.state(), PoolState::InitFailed);
}

#[test]
fn dispose_interrupts_launches_in_flight() {
    let launcher = Arc::new(FakeLauncher::hanging_except(None));
    let pool = Arc::new(CheckerPool::new(launcher));

    let init = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.initialize(tokens(2), &CancelToken::new()))
    };
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    pool.dispose();

    assert!(matches!(init.join().unwrap(), Err(PoolError::Disposed)));
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(pool.state(), PoolState::Disposed);
}
