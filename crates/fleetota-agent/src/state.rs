//! Install state machine.
//!
//! The agent moves along the edges allowed by
//! [`AgentState::can_transition_to`]; anything else is logged.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgentState {
    /// Nothing outstanding; the next poll moves to `AwaitingOrder`.
    #[default]
    Idle,
    /// Polling status for an order.
    AwaitingOrder,
    Downloading,
    /// Decoding the archive and checking digests.
    Verifying,
    /// Replacing the board's files.
    Installing,
    /// Telling the server the install succeeded.
    Confirming,
    /// Handing off to the restart primitive. Terminal.
    Rebooting,
}

impl AgentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingOrder => "awaiting_order",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Installing => "installing",
            Self::Confirming => "confirming",
            Self::Rebooting => "rebooting",
        }
    }

    /// Allowed edges. Every non-terminal state may fall back to
    /// `AwaitingOrder`; `Confirming` returns to `Idle` only on the
    /// already-current path.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::AwaitingOrder)
                | (
                    Self::AwaitingOrder,
                    Self::AwaitingOrder | Self::Downloading | Self::Confirming
                )
                | (
                    Self::Downloading,
                    Self::Verifying | Self::Confirming | Self::AwaitingOrder
                )
                | (Self::Verifying, Self::Installing | Self::AwaitingOrder)
                | (Self::Installing, Self::Confirming | Self::AwaitingOrder)
                | (
                    Self::Confirming,
                    Self::Rebooting | Self::Idle | Self::AwaitingOrder
                )
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rebooting)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
