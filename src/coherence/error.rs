use std::fmt;

/// Expected, retry-worthy failures of a coherence transaction.  Invariant breaches are not
/// represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoherenceError {
    /// The target line was busy and the requester may not wait on it.
    LockFailed,
    /// A reply came back with its error flag set.
    MessageFailed,
}

impl fmt::Display for CoherenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockFailed => f.write_str("cache line lock unavailable"),
            Self::MessageFailed => f.write_str("coherence message failed"),
        }
    }
}

impl std::error::Error for CoherenceError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRejectReason {
    /// Every port for this access kind already has an access in flight.
    PortsBusy,
    /// A store to the same line is in flight.
    StorePending,
}

/// Admission backpressure from a first-level cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessReject {
    pub retry_at: crate::timeq::Cycle,
    pub reason: AccessRejectReason,
}

impl fmt::Display for AccessReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access rejected ({:?}), retry at {}", self.reason, self.retry_at)
    }
}

impl std::error::Error for AccessReject {}
