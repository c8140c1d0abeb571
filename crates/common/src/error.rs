//! Error classification shared by every service crate.

/// The class a failure belongs to, which decides how it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input shape or tampered price. Rejected synchronously, never retried.
    Validation,
    /// Missing record or insufficient stock/funds. A business outcome, not a fault.
    Resource,
    /// Database or broker unreachable, deadline exceeded. Retryable.
    Transient,
    /// A local commit succeeded but a follow-up step failed. Needs reconciliation.
    ConsistencyHazard,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::Transient => "transient",
            ErrorKind::ConsistencyHazard => "consistency_hazard",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
