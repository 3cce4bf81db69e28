use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::{CheckResult, CheckerError, CheckerLauncher, CheckerProcess};
use crate::cancel::CancelToken;
use crate::concurrency::ConcurrencyToken;
use crate::mutants::Mutant;

pub const HANDSHAKE_LINE: &str = "ready";
pub const SLOT_ENV: &str = "MUTATOR_CHECKER_SLOT";
/// How often a pending handshake looks at its cancel token.
const HANDSHAKE_POLL: Duration = Duration::from_millis(25);

pub fn parse_command(cmd: &str) -> Option<(String, Vec<String>)> {
    let mut parts = cmd.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Launches checkers as child processes.
///
/// Protocol: the child prints `ready` on stdout once it can take work, then
/// answers every JSON-encoded mutant written to its stdin with one JSON line
/// such as `{"status":"passed"}`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    handshake_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Build from a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(cmd: &str) -> Option<Self> {
        let (program, args) = parse_command(cmd)?;
        Some(Self::new(program, args))
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl CheckerLauncher for ProcessLauncher {
    fn launch(
        &self,
        token: &ConcurrencyToken,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn CheckerProcess>, CheckerError> {
        let slot = token.slot();
        if cancel.is_cancelled() {
            return Err(CheckerError::Cancelled);
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(SLOT_ENV, slot.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|source| CheckerError::Spawn {
            command: self.command_line(),
            source,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            kill_and_reap(&mut child);
            return Err(CheckerError::Handshake {
                slot,
                reason: "stdio was not captured".to_string(),
            });
        };

        let reader = match handshake(stdout, self.handshake_timeout, slot, cancel) {
            Ok(reader) => reader,
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(e);
            }
        };
        debug!(slot, pid = child.id(), "checker ready");

        Ok(Arc::new(ProcessChecker {
            child: Mutex::new(child),
            io: Mutex::new(CheckerIo { stdin, stdout: reader }),
            terminated: AtomicBool::new(false),
        }))
    }
}

/// Wait for the `ready` line. The read happens on a helper thread so the
/// timeout and `cancel` hold even when the child never writes anything.
/// The caller kills the child on any error, which also ends the helper.
fn handshake(
    stdout: ChildStdout,
    timeout: Duration,
    slot: usize,
    cancel: &CancelToken,
) -> Result<BufReader<ChildStdout>, CheckerError> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let read = reader.read_line(&mut line);
        let _ = tx.send((reader, read.map(|_| line)));
    });

    let deadline = Instant::now() + timeout;
    let received = loop {
        if cancel.is_cancelled() {
            debug!(slot, "checker handshake cancelled");
            return Err(CheckerError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(CheckerError::HandshakeTimeout { slot, timeout });
        }
        match rx.recv_timeout(HANDSHAKE_POLL.min(deadline - now)) {
            Ok(received) => break received,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CheckerError::Handshake {
                    slot,
                    reason: "handshake reader stopped".to_string(),
                });
            }
        }
    };

    match received {
        (reader, Ok(line)) if line.trim() == HANDSHAKE_LINE => Ok(reader),
        (_, Ok(line)) if line.is_empty() => Err(CheckerError::Handshake {
            slot,
            reason: "process exited before reporting ready".to_string(),
        }),
        (_, Ok(line)) => Err(CheckerError::Handshake {
            slot,
            reason: format!("unexpected handshake {:?}", line.trim()),
        }),
        (_, Err(e)) => Err(CheckerError::Io(e)),
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

struct CheckerIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// The child handle and the pipes sit behind separate locks so `terminate`
/// never waits for an in-flight `check`.
struct ProcessChecker {
    child: Mutex<Child>,
    io: Mutex<CheckerIo>,
    terminated: AtomicBool,
}

impl CheckerProcess for ProcessChecker {
    fn check(&self, mutant: &Mutant) -> Result<CheckResult, CheckerError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(CheckerError::Terminated);
        }
        let request =
            serde_json::to_string(mutant).map_err(|e| CheckerError::Protocol(e.to_string()))?;

        let mut io = self.io.lock();
        writeln!(io.stdin, "{request}")?;
        io.stdin.flush()?;

        let mut line = String::new();
        if io.stdout.read_line(&mut line)? == 0 {
            return Err(CheckerError::Terminated);
        }
        serde_json::from_str(line.trim()).map_err(|e| CheckerError::Protocol(format!("{e}: {:?}", line.trim())))
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut child = self.child.lock();
        debug!(pid = child.id(), "terminating checker");
        kill_and_reap(&mut child);
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.lock().id())
    }
}

impl Drop for ProcessChecker {
    fn drop(&mut self) {
        self.terminate();
    }
}
