//! Constants used across the crates

/// Entry point smart contract
pub mod entry_point {
    pub const ADDRESS: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";
    pub const VERSION: &str = "0.5.0";
}

/// Mempool
pub mod mempool {
    /// Maximum number of user operations a (yet unstaked) sender may have in
    /// the pool at the same time
    pub const SAME_SENDER_ALLOWED_COUNT: usize = 4;
}

/// Reputation
pub mod reputation {
    pub const MIN_INCLUSION_RATE_DENOMINATOR: u64 = 10;
    pub const THROTTLING_SLACK: u64 = 10;
    pub const BAN_SLACK: u64 = 50;
}

/// Bundler
pub mod bundler {
    /// Default interval of the auto bundling mode (seconds)
    pub const BUNDLE_INTERVAL: u64 = 10;
    /// Number of attempts for a failing RPC call before giving up
    pub const RPC_CALL_RETRIES: usize = 3;
    /// Fixed backoff between RPC retries (seconds)
    pub const RPC_RETRY_BACKOFF: u64 = 1;
}

/// Event watcher
pub mod events {
    /// Blocks scanned back on the first sweep, before a watermark exists
    pub const INITIAL_SCAN_DEPTH: u64 = 1000;
}

/// Suffixes of the keys under which mempool state is persisted
pub mod storage {
    pub const USEROP_KEYS: &str = "USEROPKEYS";
    pub const REPUTATION: &str = "REPUTATION";
    pub const WHITELIST: &str = "WL";
    pub const BLACKLIST: &str = "BL";
    pub const LAST_BLOCK: &str = "LASTBLOCK";
}

/// ERC-4337 defined JSON-RPC error codes
pub mod rpc_error_codes {
    pub const INVALID_REQUEST: i32 = -32602;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const VALIDATION: i32 = -32500;
    pub const PAYMASTER: i32 = -32501;
    pub const OPCODE_VALIDATION: i32 = -32502;
    pub const EXPIRATION: i32 = -32503;
    pub const THROTTLED_OR_BANNED: i32 = -32504;
    pub const STAKE_TOO_LOW: i32 = -32505;
    pub const SIGNATURE_AGGREGATOR: i32 = -32506;
    pub const SIGNATURE: i32 = -32507;
    pub const EXECUTION_REVERTED: i32 = -32521;
    pub const USER_OPERATION_HASH: i32 = -32601;
    pub const SANITY_CHECK: i32 = -32602;
    pub const INVALID_USER_OPERATION: i32 = -32594;
}
