//! Server lifecycle states

use std::fmt;

/// Lifecycle of a listener.
///
/// `Created` moves to `Listening` once the address is bound, and from either
/// to one of the two terminal states. A terminal state is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Constructed, not yet bound
    Created,
    /// Bound and accepting connections
    Listening,
    /// Stopped after in-flight calls completed
    GracefullyStopped,
    /// Stopped with in-flight calls aborted
    Stopped,
}

impl ServerState {
    /// Whether the state is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::GracefullyStopped | Self::Stopped)
    }

    /// State name used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Listening => "listening",
            Self::GracefullyStopped => "gracefully_stopped",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
