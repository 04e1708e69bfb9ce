use crate::{
    ledger::{Address, TokenError},
    units::Amount,
};

/// Failures of the staking operations. Any of them aborts the whole
/// operation with no state change.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BankError {
    #[error("amount cannot be 0")]
    InvalidAmount,

    #[error("insufficient allowance from {owner}: approved {approved}, needs {required}")]
    InsufficientAllowance {
        owner: Address,
        approved: Amount,
        required: Amount,
    },

    #[error("insufficient balance in {account}: has {available}, needs {required}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        required: Amount,
    },

    #[error("caller is not staking")]
    NotStaking,

    #[error("caller must be the owner (got {caller})")]
    Unauthorized { caller: Address },

    #[error("reward reserve depleted: holds {reserve}, distribution needs {required}")]
    ReserveDepleted { reserve: Amount, required: Amount },
}

impl BankError {
    /// Stable identifier used on the wire and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BankError::InvalidAmount => "invalid_amount",
            BankError::InsufficientAllowance { .. } => "insufficient_allowance",
            BankError::InsufficientBalance { .. } => "insufficient_balance",
            BankError::NotStaking => "not_staking",
            BankError::Unauthorized { .. } => "unauthorized",
            BankError::ReserveDepleted { .. } => "reserve_depleted",
        }
    }
}

impl From<TokenError> for BankError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InsufficientBalance {
                account,
                available,
                required,
                ..
            } => BankError::InsufficientBalance {
                account,
                available,
                required,
            },
            TokenError::InsufficientAllowance {
                owner,
                approved,
                required,
                ..
            } => BankError::InsufficientAllowance {
                owner,
                approved,
                required,
            },
        }
    }
}
