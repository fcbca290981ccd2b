//! Mempool-related primitives

use crate::{utils::as_checksum_addr, UserOperation};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// Key of a live mempool entry, `{chainId}:{sender}:{nonce}`.
///
/// At most one entry exists per key; the sender address is lowercase-hex so
/// lookups are insensitive to the caller's checksum casing.
pub fn user_op_key(chain_id: u64, sender: &Address, nonce: U256) -> String {
    format!("{chain_id}:{sender:#x}:{nonce}")
}

/// A user operation admitted to the mempool, together with its admission
/// context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolEntry {
    /// The admitted user operation, immutable once accepted
    pub user_operation: UserOperation,
    /// Entry point the operation was validated against
    #[serde(serialize_with = "as_checksum_addr")]
    pub entry_point: Address,
    /// Prefund amount returned by validation
    pub prefund: U256,
    /// Signature aggregator, if one participated in validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<Address>,
    /// Unix timestamp (seconds) of admission or last replacement
    pub last_updated_time: u64,
}

impl MempoolEntry {
    /// The entry's mempool key
    pub fn key(&self, chain_id: u64) -> String {
        user_op_key(chain_id, &self.user_operation.sender, self.user_operation.nonce)
    }

    /// A new submission replaces an existing entry for the same key only when
    /// it pays a strictly higher priority fee.
    pub fn can_replace(&self, other: &UserOperation) -> bool {
        other.max_priority_fee_per_gas > self.user_operation.max_priority_fee_per_gas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_requires_strictly_higher_priority_fee() {
        let entry = MempoolEntry {
            user_operation: UserOperation::default().max_priority_fee_per_gas(100u64),
            entry_point: Address::zero(),
            prefund: U256::zero(),
            aggregator: None,
            last_updated_time: 0,
        };

        assert!(!entry.can_replace(&UserOperation::default().max_priority_fee_per_gas(99u64)));
        assert!(!entry.can_replace(&UserOperation::default().max_priority_fee_per_gas(100u64)));
        assert!(entry.can_replace(&UserOperation::default().max_priority_fee_per_gas(101u64)));
    }

    #[test]
    fn entry_serde_round_trip_preserves_key_and_fees() {
        let uo = UserOperation::default()
            .sender("0xAB7e2cbFcFb6A5F33A75aD745C3E5fB48d689B54".parse().unwrap())
            .nonce(U256::MAX)
            .max_fee_per_gas(U256::MAX)
            .max_priority_fee_per_gas(U256::MAX - 1);
        let entry = MempoolEntry {
            user_operation: uo,
            entry_point: "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap(),
            prefund: U256::from(123456789u64),
            aggregator: Some(Address::random()),
            last_updated_time: 1700000000,
        };

        let raw = serde_json::to_vec(&entry).unwrap();
        let back: MempoolEntry = serde_json::from_slice(&raw).unwrap();

        assert_eq!(back.key(1), entry.key(1));
        assert_eq!(back.user_operation.max_fee_per_gas, entry.user_operation.max_fee_per_gas);
        assert_eq!(
            back.user_operation.max_priority_fee_per_gas,
            entry.user_operation.max_priority_fee_per_gas
        );
        assert_eq!(back, entry);
    }
}
