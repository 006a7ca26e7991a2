use thiserror::Error;

/// Typed failures surfaced at the order/broker boundary.
///
/// Transient streaming errors never reach this type - they are retried inside
/// the collector loops. These variants are the caller-visible rejections.
#[derive(Debug, Error, PartialEq)]
pub enum BrokerError {
    /// Order transition rejected (e.g. opening against an open position
    /// while hedge mode is off, or filling a cancelled order).
    #[error("invalid order state: {0}")]
    InvalidOrderState(String),

    #[error("unknown order id {0}")]
    UnknownOrder(u64),

    #[error("unknown trade id {0}")]
    UnknownTrade(u64),

    /// Terminal state: equity hit zero and the broker settled all positions.
    /// No further fills or orders are accepted.
    #[error("broker is liquidated")]
    Liquidated,

    /// The engine was asked for work before initialization finished.
    #[error("engine not ready")]
    NotReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::InvalidOrderState("short against open long".to_string());
        assert_eq!(
            err.to_string(),
            "invalid order state: short against open long"
        );

        assert_eq!(BrokerError::UnknownOrder(7).to_string(), "unknown order id 7");
        assert_eq!(BrokerError::Liquidated.to_string(), "broker is liquidated");
    }
}
