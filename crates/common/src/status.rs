//! Order lifecycle status.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Completed
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order has been placed and awaits handling.
    #[default]
    Pending,

    /// Order is being fulfilled.
    Processing,

    /// Order has been fulfilled (terminal state).
    Completed,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns true if an order in this status may move to `next`.
    ///
    /// Re-applying the current status is accepted as a no-op.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Processing, OrderStatus::Cancelled)
        )
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    pub value: String,
}

impl std::fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\" is not a valid order status", self.value)
    }
}

impl std::error::Error for ParseStatusError {}

impl std::str::FromStr for OrderStatus {
    type Err = ParseStatusError;

    /// Parses a status name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError {
                value: s.to_string(),
            })
    }
}
