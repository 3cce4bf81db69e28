use tracing::debug;

/// Cores held back for the test-runner workers that execute mutants later.
pub const DEFAULT_RESERVED_EXECUTION_CORES: usize = 1;

/// A permit to run one checker worker. Only the token provider creates them.
#[derive(Debug, PartialEq, Eq)]
pub struct ConcurrencyToken {
    slot: usize,
}

impl ConcurrencyToken {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Usable checker slots: host cores minus the reserved ones, never below one.
pub fn checker_token_count(cores: usize, reserved: usize) -> usize {
    cores.saturating_sub(reserved).max(1)
}

#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyTokenProvider {
    cores: usize,
    reserved: usize,
}

impl ConcurrencyTokenProvider {
    pub fn new(cores: usize, reserved: usize) -> Self {
        Self { cores, reserved }
    }

    /// Size from the host. `concurrency` overrides the detected core count.
    pub fn from_host(concurrency: Option<usize>, reserved: usize) -> Self {
        let cores = concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        debug!(cores, reserved, "sizing checker concurrency");
        Self::new(cores, reserved)
    }

    pub fn token_count(&self) -> usize {
        checker_token_count(self.cores, self.reserved)
    }

    pub fn checker_tokens(&self) -> CheckerTokens {
        CheckerTokens {
            next: 0,
            total: self.token_count(),
        }
    }
}

/// Finite stream of checker tokens.
#[derive(Debug)]
pub struct CheckerTokens {
    next: usize,
    total: usize,
}

impl Iterator for CheckerTokens {
    type Item = ConcurrencyToken;

    fn next(&mut self) -> Option<ConcurrencyToken> {
        if self.next >= self.total {
            return None;
        }
        let token = ConcurrencyToken { slot: self.next };
        self.next += 1;
        Some(token)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for CheckerTokens {}
