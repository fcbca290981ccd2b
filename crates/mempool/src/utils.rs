//! Gas overhead model for pre-verification gas

use cassius_primitives::UserOperation;
use ethers::types::U256;
use std::ops::Deref;

/// Calldata and bundling overhead charged on top of a user operation's own
/// gas limits
// https://github.com/eth-infinitism/bundler/blob/main/packages/sdk/src/calcPreVerificationGas.ts
pub struct Overhead {
    pub fixed: U256,
    pub per_user_op: U256,
    pub per_user_op_word: U256,
    pub zero_byte: U256,
    pub non_zero_byte: U256,
    pub bundle_size: U256,
}

impl Default for Overhead {
    fn default() -> Self {
        Self {
            fixed: U256::from(21000),
            per_user_op: U256::from(18300),
            per_user_op_word: U256::from(4),
            zero_byte: U256::from(4),
            non_zero_byte: U256::from(16),
            bundle_size: U256::from(1),
        }
    }
}

impl Overhead {
    /// Pre-verification gas of a user operation: fixed cost amortized over
    /// the bundle, per-op overhead, and calldata byte costs of the packed
    /// operation
    pub fn calculate_pre_verification_gas(&self, uo: &UserOperation) -> U256 {
        let packed = uo.pack();

        let call_data_cost = packed.deref().iter().fold(U256::zero(), |acc, &byte| {
            let byte_cost = if byte == 0 { &self.zero_byte } else { &self.non_zero_byte };
            acc.saturating_add(*byte_cost)
        });

        let word_cost = div_ceil(
            self.per_user_op_word.saturating_mul(U256::from(packed.len() + 31)),
            U256::from(32),
        );

        div_ceil(self.fixed, self.bundle_size)
            .saturating_add(call_data_cost)
            .saturating_add(self.per_user_op)
            .saturating_add(word_cost)
    }
}

fn div_ceil(a: U256, b: U256) -> U256 {
    let (res, rem) = a.div_mod(b);
    if rem.is_zero() {
        res
    } else {
        res + 1
    }
}
