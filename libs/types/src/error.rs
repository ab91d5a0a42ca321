//! Error types for the domain model

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, DomainError>;

/// Main error type for domain invariant violations
///
/// Every variant here represents a caller bug rather than a runtime
/// condition: invalid inputs are rejected at construction time so the
/// aggregation pipeline only ever carries well-formed values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    /// Asset symbol empty or not representable
    #[error("Invalid asset symbol: {0:?}")]
    InvalidSymbol(String),

    /// Negative amount where only non-negative values are allowed
    #[error("Amount cannot be negative: {amount}")]
    NegativeAmount {
        /// The rejected amount
        amount: Decimal,
    },

    /// Currency code is not a 3-letter alphabetic code
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Arithmetic across two different currencies
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency on the left-hand side
        left: String,
        /// Currency on the right-hand side
        right: String,
    },

    /// Money multiplication by a negative factor
    #[error("Cannot multiply by negative factor: {factor}")]
    NegativeFactor {
        /// The rejected factor
        factor: Decimal,
    },

    /// Money subtraction would produce a negative result
    #[error("Insufficient amount: {minuend} - {subtrahend} would underflow")]
    InsufficientAmount {
        /// Amount being subtracted from
        minuend: Decimal,
        /// Amount being subtracted
        subtrahend: Decimal,
    },

    /// Merge attempted on two assets that fail the same-asset predicate
    #[error("Assets {left} and {right} are not the same asset and cannot be merged")]
    DifferentAssetsMerged {
        /// Id of the left asset
        left: String,
        /// Id of the right asset
        right: String,
    },

    /// Address does not match the chain's format
    #[error("Invalid address for chain {chain}: {address:?}")]
    InvalidAddress {
        /// Chain the address was validated against
        chain: String,
        /// The rejected address
        address: String,
    },
}

impl DomainError {
    /// Check if this error is recoverable through retry
    ///
    /// Domain errors are caller bugs by definition, so none of them are.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}
