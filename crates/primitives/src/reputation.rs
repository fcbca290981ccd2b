//! Reputation-related primitives

use educe::Educe;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// All possible reputation statuses
#[derive(Clone, Copy, Default, Educe, PartialEq, Eq, Serialize, Deserialize)]
#[educe(Debug)]
pub enum ReputationStatus {
    #[default]
    OK,
    THROTTLED,
    BANNED,
}

/// Reputation entry for an entity (sender, factory, paymaster or aggregator)
#[derive(Clone, Copy, Educe, Eq, PartialEq, Serialize, Deserialize)]
#[educe(Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReputationEntry {
    pub address: Address,
    pub ops_seen: u64,
    pub ops_included: u64,
    /// Unix timestamp (seconds) of the last counter update
    pub last_update_time: u64,
    /// Derived field, filled when the entry is served to a caller
    #[serde(default)]
    pub status: ReputationStatus,
}

impl ReputationEntry {
    pub fn default_with_addr(address: Address) -> Self {
        Self {
            address,
            ops_seen: 0,
            ops_included: 0,
            last_update_time: 0,
            status: ReputationStatus::OK,
        }
    }
}

/// Stake info of an entity, obtained from the entry point's validation return
/// data
#[derive(Clone, Copy, Default, Educe, Eq, PartialEq, Serialize, Deserialize)]
#[educe(Debug)]
#[serde(rename_all = "camelCase")]
pub struct StakeInfo {
    pub address: Address,
    pub stake: U256,
    /// Unstake delay in seconds
    pub unstake_delay: U256,
}

impl StakeInfo {
    pub fn is_staked(&self) -> bool {
        self.stake > U256::zero() && self.unstake_delay > U256::zero()
    }
}

/// Response type of `debug_bundler_getStakeStatus`
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeInfoResponse {
    pub stake_info: StakeInfo,
    pub is_staked: bool,
}
