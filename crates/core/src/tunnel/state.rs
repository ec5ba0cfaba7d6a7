use std::fmt;

/// Lifecycle of a tunnel.
///
/// ```text
/// Constructed --initialize--> Initialized --update--> Active --+
///      |                           |                    ^      | update
///      |                           |                    +------+
///      +---------------------------+--------------------+--dispose--> Disposed
/// ```
///
/// `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TunnelState {
    /// Fields set, initialisation event pending.
    #[default]
    Constructed,
    /// Timer armed with the configured interval, no tick completed yet.
    Initialized,
    /// At least one tick has completed.
    Active,
    Disposed,
}

impl TunnelState {
    pub fn is_disposed(&self) -> bool {
        matches!(self, TunnelState::Disposed)
    }

    /// Whether a timer firing in this state runs a control tick.
    pub fn runs_ticks(&self) -> bool {
        matches!(self, TunnelState::Initialized | TunnelState::Active)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Constructed => write!(f, "constructed"),
            TunnelState::Initialized => write!(f, "initialized"),
            TunnelState::Active => write!(f, "active"),
            TunnelState::Disposed => write!(f, "disposed"),
        }
    }
}
