//! Account abstraction (ERC-4337) smart contract interfaces
//!
//! Typed EntryPoint bindings, structured-revert decoding, and the
//! opcode-level trace parser backing deep validation.

pub mod entry_point;
mod error;
mod gen;
pub mod trace;
pub mod utils;

pub use entry_point::{
    AggregatorStakeInfo, DepositInfo, EntryPoint, ReturnInfo, SimulateValidationResult, StakeInfo,
    ValidationResult, ValidationResultWithAggregation,
};
pub use error::{decode_revert_error, decode_revert_string, EntryPointError};
pub use gen::{
    entry_point_api, AccountDeployedFilter, EntryPointAPI, EntryPointAPIEvents, FailedOp,
    SignatureAggregatorForUserOperationsFilter, UserOperationEventFilter,
    UserOperationRevertReasonFilter,
};
pub use trace::{AccessReport, AddressAccess};
pub use utils::parse_from_input_data;
