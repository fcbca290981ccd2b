use crate::gen::entry_point_api::{self, EntryPointAPICalls};
use cassius_primitives::UserOperation;
use ethers::abi::AbiDecode;
use ethers::types::Bytes;

impl From<UserOperation> for entry_point_api::UserOperation {
    fn from(uo: UserOperation) -> Self {
        Self {
            sender: uo.sender,
            nonce: uo.nonce,
            init_code: uo.init_code,
            call_data: uo.call_data,
            call_gas_limit: uo.call_gas_limit,
            verification_gas_limit: uo.verification_gas_limit,
            pre_verification_gas: uo.pre_verification_gas,
            max_fee_per_gas: uo.max_fee_per_gas,
            max_priority_fee_per_gas: uo.max_priority_fee_per_gas,
            paymaster_and_data: uo.paymaster_and_data,
            signature: uo.signature,
        }
    }
}

impl From<entry_point_api::UserOperation> for UserOperation {
    fn from(uo: entry_point_api::UserOperation) -> Self {
        Self {
            sender: uo.sender,
            nonce: uo.nonce,
            init_code: uo.init_code,
            call_data: uo.call_data,
            call_gas_limit: uo.call_gas_limit,
            verification_gas_limit: uo.verification_gas_limit,
            pre_verification_gas: uo.pre_verification_gas,
            max_fee_per_gas: uo.max_fee_per_gas,
            max_priority_fee_per_gas: uo.max_priority_fee_per_gas,
            paymaster_and_data: uo.paymaster_and_data,
            signature: uo.signature,
        }
    }
}

/// Extracts the user operations out of handleOps calldata, if the data is such
/// a call
pub fn parse_from_input_data(data: Bytes) -> Option<Vec<UserOperation>> {
    EntryPointAPICalls::decode(data).ok().and_then(|call| match call {
        EntryPointAPICalls::HandleOps(ops) => {
            Some(ops.ops.into_iter().map(|op| op.into()).collect())
        }
        _ => None,
    })
}
