//! Account abstraction (ERC-4337) user operation pool
//!
//! Validation of incoming user operations (a `simulateValidation` call plus a
//! traced replay with the storage-access and opcode rules enforced), the
//! mempool of admitted operations, reputation tracking for the entities they
//! reference, and the sweep of on-chain inclusion events.

pub mod error;
pub mod events;
mod mempool;
pub mod reputation;
pub mod request;
pub mod store;
mod uopool;
mod utils;
pub mod validate;

pub use cassius_primitives::{user_op_key, MempoolEntry};
pub use error::{
    MempoolError, MempoolErrorKind, MempoolResult, ReputationError, ValidationError,
};
pub use events::EventWatcher;
pub use mempool::Mempool;
pub use reputation::Reputation;
pub use store::{MemoryStore, Store, StoreError, StoreExt};
pub use uopool::UoPool;
pub use utils::Overhead;
pub use validate::{ValidationEngine, ValidationOutcome};
