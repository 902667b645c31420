/// Consecutive-failure counter shared by the live channel and the polling
/// fallback. Any successful progress resets it.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_failures: u32,
    failures: u32,
}

impl RetryBudget {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            failures: 0,
        }
    }

    /// Returns the failure count after recording this one.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn exhausted(&self) -> bool {
        self.failures >= self.max_failures
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
