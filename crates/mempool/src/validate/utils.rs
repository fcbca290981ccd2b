use super::ValidationOutcome;
use cassius_contracts::{entry_point, SimulateValidationResult};
use cassius_primitives::{reputation::StakeInfo, UserOperation};
use ethers::types::Address;

fn stake_info(addr: Address, info: &entry_point::StakeInfo) -> StakeInfo {
    StakeInfo { address: addr, stake: info.stake, unstake_delay: info.unstake_delay_sec }
}

/// Populates entity stake infos from the simulation revert, the entity
/// addresses coming from the user operation's own fields
pub fn extract_outcome(uo: &UserOperation, res: SimulateValidationResult) -> ValidationOutcome {
    let (return_info, sender_info, factory_info, paymaster_info, aggregator_info) = match res {
        SimulateValidationResult::ValidationResult(res) => {
            (res.return_info, res.sender_info, res.factory_info, res.paymaster_info, None)
        }
        SimulateValidationResult::ValidationResultWithAggregation(res) => (
            res.return_info,
            res.sender_info,
            res.factory_info,
            res.paymaster_info,
            Some(res.aggregator_info),
        ),
    };

    ValidationOutcome {
        return_info,
        sender_info: stake_info(uo.sender, &sender_info),
        factory_info: uo.factory().map(|f| stake_info(f, &factory_info)),
        paymaster_info: uo.paymaster().map(|p| stake_info(p, &paymaster_info)),
        aggregator_info: aggregator_info
            .map(|info| stake_info(info.actual_aggregator, &info.stake_info)),
    }
}
