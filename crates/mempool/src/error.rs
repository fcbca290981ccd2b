use cassius_contracts::EntryPointError;
use cassius_primitives::{constants::rpc_error_codes, UserOperationHash};
use ethers::types::{Address, U256};
use jsonrpsee::types::{ErrorObject, ErrorObjectOwned};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type MempoolResult<T> = Result<T, MempoolError>;

/// Mempool error, tied to the user operation that caused it
#[derive(Debug, Error, Serialize, Deserialize)]
#[error("{kind}")]
pub struct MempoolError {
    /// The user operation hash that caused the error
    pub hash: UserOperationHash,
    /// The error kind
    pub kind: MempoolErrorKind,
}

/// Mempool error kind
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum MempoolErrorKind {
    /// Malformed request parameters, caught before reaching business logic
    #[error("invalid request: {inner}")]
    InvalidRequest {
        /// The inner error message
        inner: String,
    },
    /// Replace-by-fee rejected or per-sender cap exceeded
    #[error("invalid user operation: {inner}")]
    InvalidUserOperation {
        /// The inner error message
        inner: String,
    },
    /// User operation rejected because validation failed
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// User operation rejected because of the reputation of the entities
    #[error(transparent)]
    Reputation(#[from] ReputationError),
    /// Provider error
    #[error("provider error: {inner}")]
    Provider {
        /// The inner error message
        inner: String,
    },
    /// Backing store error
    #[error("store error: {inner}")]
    Store {
        /// The inner error message
        inner: String,
    },
    /// Any other error
    #[error("other error: {inner}")]
    Other {
        /// The inner error message
        inner: String,
    },
}

impl From<EntryPointError> for MempoolErrorKind {
    fn from(err: EntryPointError) -> Self {
        match err {
            EntryPointError::Provider { inner } => MempoolErrorKind::Provider { inner },
            _ => MempoolErrorKind::Other { inner: err.to_string() },
        }
    }
}

impl From<crate::store::StoreError> for MempoolErrorKind {
    fn from(err: crate::store::StoreError) -> Self {
        MempoolErrorKind::Store { inner: err.to_string() }
    }
}

/// Error when shallow or deep validation fails
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// Validation reverted for a reason not attributable to a specific entity
    #[error("validation failed: {inner}")]
    Failed {
        /// The inner error message
        inner: String,
    },
    /// Validation reverted and a non-zero paymaster participated
    #[error("user operation rejected by paymaster {paymaster:?}: {inner}")]
    RejectedByPaymaster { paymaster: Address, inner: String },
    /// Entity executed a banned opcode during validation
    #[error("{entity} {address:?} uses banned opcode: {opcode}")]
    BannedOpcode { entity: String, address: Address, opcode: String },
    /// Unstaked entity wrote to storage during validation
    #[error("unstaked {entity} {address:?} wrote to storage slot {slot}")]
    UnstakedStorageWrite { entity: String, address: Address, slot: String },
    /// Accessed slot is not associated with the sender
    #[error("unstaked entity {address:?} accessed slot {slot}")]
    SlotNotAssociated { address: Address, slot: String },
    /// Value transferred outside the entry point
    #[error("{address:?} transferred value {value} outside the entry point")]
    ValueTransfer { address: Address, value: U256 },
    /// Validity deadline too close
    #[error("user operation expires too soon: deadline {deadline}")]
    Expired { deadline: u64 },
}

/// Error related to reputation of the entities
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ReputationError {
    /// Entity is banned
    #[error("{entity} {address:?} is banned")]
    BannedEntity { entity: String, address: Address },
    /// Entity is throttled
    #[error("{entity} {address:?} is throttled")]
    ThrottledEntity { entity: String, address: Address },
    /// Stake of the entity is too low
    #[error("{entity} {address:?} stake {stake} is too low, expected at least {min_stake}")]
    StakeTooLow { entity: String, address: Address, stake: U256, min_stake: U256 },
    /// Unstake delay of the entity is too low
    #[error("{entity} {address:?} unstake delay {unstake_delay} is too low, expected at least {min_unstake_delay}")]
    UnstakeDelayTooLow {
        entity: String,
        address: Address,
        unstake_delay: U256,
        min_unstake_delay: U256,
    },
}

impl MempoolError {
    pub fn new(hash: UserOperationHash, kind: MempoolErrorKind) -> Self {
        Self { hash, kind }
    }
}

impl From<MempoolError> for ErrorObjectOwned {
    fn from(err: MempoolError) -> Self {
        err.kind.into()
    }
}

impl From<MempoolErrorKind> for ErrorObjectOwned {
    fn from(kind: MempoolErrorKind) -> Self {
        match kind {
            MempoolErrorKind::InvalidRequest { ref inner } => {
                ErrorObject::owned(rpc_error_codes::INVALID_REQUEST, inner.clone(), None::<bool>)
            }
            MempoolErrorKind::InvalidUserOperation { ref inner } => ErrorObject::owned(
                rpc_error_codes::INVALID_USER_OPERATION,
                inner.clone(),
                None::<bool>,
            ),
            MempoolErrorKind::Validation(err) => err.into(),
            MempoolErrorKind::Reputation(err) => err.into(),
            _ => ErrorObject::owned(
                rpc_error_codes::INTERNAL_ERROR,
                "internal error".to_string(),
                None::<bool>,
            ),
        }
    }
}

impl From<ValidationError> for ErrorObjectOwned {
    fn from(err: ValidationError) -> Self {
        let msg = err.to_string();
        match err {
            ValidationError::Failed { .. } => {
                ErrorObject::owned(rpc_error_codes::VALIDATION, msg, None::<bool>)
            }
            ValidationError::RejectedByPaymaster { paymaster, .. } => ErrorObject::owned(
                rpc_error_codes::PAYMASTER,
                msg,
                Some(format!("{paymaster:?}")),
            ),
            ValidationError::BannedOpcode { ref address, .. }
            | ValidationError::UnstakedStorageWrite { ref address, .. }
            | ValidationError::SlotNotAssociated { ref address, .. }
            | ValidationError::ValueTransfer { ref address, .. } => ErrorObject::owned(
                rpc_error_codes::OPCODE_VALIDATION,
                msg,
                Some(format!("{address:?}")),
            ),
            ValidationError::Expired { .. } => {
                ErrorObject::owned(rpc_error_codes::EXPIRATION, msg, None::<bool>)
            }
        }
    }
}

impl From<ReputationError> for ErrorObjectOwned {
    fn from(err: ReputationError) -> Self {
        let msg = err.to_string();
        match err {
            ReputationError::BannedEntity { .. } | ReputationError::ThrottledEntity { .. } => {
                ErrorObject::owned(rpc_error_codes::THROTTLED_OR_BANNED, msg, None::<bool>)
            }
            ReputationError::StakeTooLow { .. } | ReputationError::UnstakeDelayTooLow { .. } => {
                ErrorObject::owned(rpc_error_codes::STAKE_TOO_LOW, msg, None::<bool>)
            }
        }
    }
}
