//! SDK error types.
//!
//! Provides error types for validating wire payloads and sync settings.

/// SDK errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    /// Topic string could not be parsed.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Order book levels violate the price ordering invariant.
    #[error("invalid order book for {symbol}: {reason}")]
    InvalidOrderBook {
        /// Book symbol.
        symbol: String,
        /// What was wrong.
        reason: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Invalid sync configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SdkError::InvalidTopic("asset:".to_string());
        assert_eq!(err.to_string(), "invalid topic: asset:");
    }

    #[test]
    fn test_error_invalid_book() {
        let err = SdkError::InvalidOrderBook {
            symbol: "ASM300".to_string(),
            reason: "bids not descending".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid order book for ASM300: bids not descending"
        );
    }

    #[test]
    fn test_error_from_json() {
        let err = serde_json::from_str::<u32>("not json").expect_err("parse error");
        assert!(matches!(SdkError::from(err), SdkError::Deserialization(_)));
    }
}
