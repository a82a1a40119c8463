use thiserror::Error;

use crate::ledger::{AccountId, Amount, LedgerError};

/// Canonical error type exposed by the dividend engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DividendError {
    /// A deposit arrived while total supply is zero. Nothing was applied and
    /// the funds must be refused by the caller.
    #[error("no tokens to distribute to")]
    NoDistributionTarget,

    /// The deposit is smaller than the configured minimum.
    #[error("deposit of {amount} is below the minimum of {minimum}")]
    DepositBelowMinimum { amount: Amount, minimum: Amount },

    /// Internal accounting is inconsistent (negative owed amount, broken
    /// conservation or arithmetic overflow). Not recoverable by the caller.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The payout primitive declined the transfer. The withdrawal was rolled
    /// back and may be retried later.
    #[error("payout of {amount} to {recipient} failed: {reason}")]
    TransferFailed {
        recipient: AccountId,
        amount: Amount,
        reason: String,
    },

    /// Balance ledger refused the change.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl DividendError {
    pub(crate) fn overflow(context: &str) -> Self {
        DividendError::InvariantViolation(format!("arithmetic overflow in {context}"))
    }

    /// Whether the error belongs to the fatal, programming-error class.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DividendError::InvariantViolation(_))
    }
}
