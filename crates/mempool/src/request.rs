//! Request-parameter validation
//!
//! Malformed parameters are rejected before any business logic runs, so the
//! handlers behind the RPC surface can assume well-formed inputs.

use crate::error::MempoolErrorKind;
use cassius_primitives::{constants::rpc_error_codes, UserOperation};
use ethers::types::Address;
use jsonrpsee::types::{ErrorObject, ErrorObjectOwned};
use serde_json::Value;

/// Parses a user operation out of raw request parameters
pub fn parse_user_operation(value: Value) -> Result<UserOperation, MempoolErrorKind> {
    serde_json::from_value(value)
        .map_err(|err| MempoolErrorKind::InvalidRequest { inner: format!("malformed user operation: {err}") })
}

/// Parses an address out of raw request parameters
pub fn parse_address(value: Value) -> Result<Address, MempoolErrorKind> {
    serde_json::from_value(value)
        .map_err(|err| MempoolErrorKind::InvalidRequest { inner: format!("malformed address: {err}") })
}

/// Rejects a request naming an entry point the pool does not serve
pub fn ensure_entry_point(
    supported: &[Address],
    requested: &Address,
) -> Result<(), MempoolErrorKind> {
    if supported.contains(requested) {
        Ok(())
    } else {
        Err(MempoolErrorKind::InvalidRequest {
            inner: format!("unsupported entry point: {requested:?}"),
        })
    }
}

/// The error returned for a method the transport does not serve
pub fn method_not_found(method: &str) -> ErrorObjectOwned {
    ErrorObject::owned(
        rpc_error_codes::METHOD_NOT_FOUND,
        format!("method not found: {method}"),
        None::<bool>,
    )
}
