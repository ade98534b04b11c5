use std::sync::OnceLock;

/// Transport used for embedding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Batched requests are still attempted.
    Closed,
    /// Every call is made one text at a time.
    Open,
}

impl BreakerState {
    /// Name reported in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "batch",
            BreakerState::Open => "per_item",
        }
    }
}

/// One-way switch from batched to per-item embedding transport.
///
/// Opens at most once and never closes again for the life of the process.
#[derive(Debug, Default)]
pub struct TransportBreaker {
    reason: OnceLock<String>,
}

impl TransportBreaker {
    /// A closed breaker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the breaker. Returns `true` only for the call that opened it.
    pub fn trip(&self, reason: &str) -> bool {
        self.reason.set(reason.to_string()).is_ok()
    }

    /// Whether per-item transport is in force.
    pub fn is_open(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        if self.is_open() {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    /// Why the breaker opened, if it has.
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}
