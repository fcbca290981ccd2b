//! Account abstraction (ERC-4337) primitive types
//!
//! This crate contains the value types shared by the mempool, validation, and
//! bundling crates, together with a few provider helpers.

pub mod bundler;
pub mod constants;
pub mod mempool;
pub mod provider;
pub mod reputation;
pub mod simulation;
mod user_operation;
pub mod utils;
mod wallet;

pub use bundler::Mode as BundlerMode;
pub use mempool::{user_op_key, MempoolEntry};
pub use user_operation::{
    UserOperation, UserOperationByHash, UserOperationGasEstimation, UserOperationHash,
    UserOperationReceipt,
};
pub use utils::get_address;
pub use wallet::Wallet;
