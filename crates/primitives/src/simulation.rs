//! Constants and tables used during user operation simulation

use lazy_static::lazy_static;
use std::collections::HashSet;

/// Maximum allowed distance (seconds) between `now` and the operation's
/// `validUntil` deadline before the operation counts as expiring too soon
pub const EXPIRATION_TIMESTAMP_DIFF: u64 = 30;

/// Width of the slot window associated with a keccak preimage containing the
/// sender address: slots in `[keccak(pad32(sender)), keccak(pad32(sender)) + 128)`
/// are treated as belonging to the sender
pub const SLOT_ASSOCIATION_WINDOW: u64 = 128;

lazy_static! {
    /// Opcodes an account, factory or paymaster may not execute during
    /// validation (checked at call depth > 1)
    pub static ref FORBIDDEN_OPCODES: HashSet<String> = {
        let mut set = HashSet::new();
        set.insert("GASPRICE".to_string());
        set.insert("GASLIMIT".to_string());
        set.insert("DIFFICULTY".to_string());
        set.insert("TIMESTAMP".to_string());
        set.insert("BASEFEE".to_string());
        set.insert("BLOCKHASH".to_string());
        set.insert("NUMBER".to_string());
        set.insert("SELFBALANCE".to_string());
        set.insert("BALANCE".to_string());
        set.insert("ORIGIN".to_string());
        set.insert("COINBASE".to_string());
        set.insert("SELFDESTRUCT".to_string());
        set.insert("CREATE".to_string());
        set.insert("CREATE2".to_string());
        set
    };
    /// Opcodes that transfer value when their value stack argument is
    /// non-zero
    pub static ref VALUE_CALL_OPCODES: HashSet<String> = {
        let mut set = HashSet::new();
        set.insert("CALL".to_string());
        set.insert("CALLCODE".to_string());
        set
    };
}
