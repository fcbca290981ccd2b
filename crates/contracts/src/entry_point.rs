pub use super::gen::{
    EntryPointAPI, EntryPointAPIEvents, UserOperationEventFilter, UserOperationRevertReasonFilter,
};
use super::gen::entry_point_api::{self, EntryPointAPIErrors, SenderAddressResult, UserOperation};
use crate::error::{decode_revert_error, EntryPointError};
use ethers::{
    prelude::{ContractError, Event},
    providers::Middleware,
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, DefaultFrame,
        GethDebugTracingCallOptions, GethDebugTracingOptions, GethTrace, GethTraceFrame, H256,
        U256,
    },
};
use std::sync::Arc;

// `abigen!` emits the struct-typed error parameters and the `getDepositInfo`
// return as flat ABI tuples. The named views below are built from those
// tuples right where the contract data is decoded, so nothing downstream
// touches tuple fields.

/// Return info of `simulateValidation`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReturnInfo {
    pub pre_op_gas: U256,
    pub prefund: U256,
    pub deadline: U256,
    pub paymaster_context: Bytes,
}

impl From<(U256, U256, U256, Bytes)> for ReturnInfo {
    fn from((pre_op_gas, prefund, deadline, paymaster_context): (U256, U256, U256, Bytes)) -> Self {
        Self { pre_op_gas, prefund, deadline, paymaster_context }
    }
}

/// Stake of an entity as reported by `simulateValidation`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StakeInfo {
    pub stake: U256,
    pub unstake_delay_sec: U256,
}

impl From<(U256, U256)> for StakeInfo {
    fn from((stake, unstake_delay_sec): (U256, U256)) -> Self {
        Self { stake, unstake_delay_sec }
    }
}

/// Aggregator chosen by the account plus its stake
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregatorStakeInfo {
    pub actual_aggregator: Address,
    pub stake_info: StakeInfo,
}

impl From<(Address, (U256, U256))> for AggregatorStakeInfo {
    fn from((actual_aggregator, stake_info): (Address, (U256, U256))) -> Self {
        Self { actual_aggregator, stake_info: stake_info.into() }
    }
}

/// Deposit of an entity at the entry point, return of `getDepositInfo`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DepositInfo {
    pub deposit: u128,
    pub staked: bool,
    pub stake: u128,
    pub unstake_delay_sec: u32,
    pub withdraw_time: u64,
}

impl From<(u128, bool, u128, u32, u64)> for DepositInfo {
    fn from((deposit, staked, stake, unstake_delay_sec, withdraw_time): (u128, bool, u128, u32, u64)) -> Self {
        Self { deposit, staked, stake, unstake_delay_sec, withdraw_time }
    }
}

/// Decoded `ValidationResult` revert
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub return_info: ReturnInfo,
    pub sender_info: StakeInfo,
    pub factory_info: StakeInfo,
    pub paymaster_info: StakeInfo,
}

impl From<entry_point_api::ValidationResult> for ValidationResult {
    fn from(res: entry_point_api::ValidationResult) -> Self {
        Self {
            return_info: res.return_info.into(),
            sender_info: res.sender_info.into(),
            factory_info: res.factory_info.into(),
            paymaster_info: res.paymaster_info.into(),
        }
    }
}

/// Decoded `ValidationResultWithAggregation` revert
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResultWithAggregation {
    pub return_info: ReturnInfo,
    pub sender_info: StakeInfo,
    pub factory_info: StakeInfo,
    pub paymaster_info: StakeInfo,
    pub aggregator_info: AggregatorStakeInfo,
}

impl From<entry_point_api::ValidationResultWithAggregation> for ValidationResultWithAggregation {
    fn from(res: entry_point_api::ValidationResultWithAggregation) -> Self {
        Self {
            return_info: res.return_info.into(),
            sender_info: res.sender_info.into(),
            factory_info: res.factory_info.into(),
            paymaster_info: res.paymaster_info.into(),
            aggregator_info: res.aggregator_info.into(),
        }
    }
}

// error shapes nodes report for RPC methods they do not serve
fn trace_call_unsupported(err: &EntryPointError) -> bool {
    match err {
        EntryPointError::Provider { inner } => {
            let msg = inner.to_lowercase();
            msg.contains("method not found")
                || msg.contains("not supported")
                || msg.contains("does not exist")
        }
        _ => false,
    }
}

/// Successful outcome of `simulateValidation`, decoded from its structured
/// revert
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimulateValidationResult {
    ValidationResult(ValidationResult),
    ValidationResultWithAggregation(ValidationResultWithAggregation),
}

/// Typed wrapper around a deployed entry point contract
#[derive(Clone)]
pub struct EntryPoint<M: Middleware + 'static> {
    eth_client: Arc<M>,
    address: Address,
    entry_point_api: EntryPointAPI<M>,
}

impl<M: Middleware + 'static> EntryPoint<M> {
    pub fn new(eth_client: Arc<M>, address: Address) -> Self {
        let entry_point_api = EntryPointAPI::new(address, eth_client.clone());
        Self { eth_client, address, entry_point_api }
    }

    pub fn entry_point_api(&self) -> &EntryPointAPI<M> {
        &self.entry_point_api
    }

    pub fn events(&self) -> Event<Arc<M>, M, EntryPointAPIEvents> {
        self.entry_point_api.events()
    }

    pub fn eth_client(&self) -> Arc<M> {
        self.eth_client.clone()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn deserialize_error_msg(
        err: ContractError<M>,
    ) -> Result<EntryPointAPIErrors, EntryPointError> {
        match err {
            ContractError::DecodingError(e) => {
                Err(EntryPointError::Decode { inner: e.to_string() })
            }
            ContractError::AbiError(e) => Err(EntryPointError::ABI { inner: e.to_string() }),
            ContractError::MiddlewareError { e } => EntryPointError::from_middleware_error::<M>(e),
            ContractError::ProviderError { e } => EntryPointError::from_provider_error(&e),
            ContractError::Revert(data) => decode_revert_error(data),
            _ => Err(EntryPointError::Other { inner: err.to_string() }),
        }
    }

    /// Static-calls `simulateValidation` and decodes the expected structured
    /// revert
    pub async fn simulate_validation<U: Into<UserOperation>>(
        &self,
        uo: U,
    ) -> Result<SimulateValidationResult, EntryPointError> {
        let res = self.entry_point_api.simulate_validation(uo.into()).await;

        match res {
            Ok(_) => Err(EntryPointError::NoRevert { function: "simulate_validation".into() }),
            Err(e) => Self::deserialize_error_msg(e).and_then(|op| match op {
                EntryPointAPIErrors::FailedOp(err) => Err(EntryPointError::FailedOp(err)),
                EntryPointAPIErrors::ValidationResult(res) => {
                    Ok(SimulateValidationResult::ValidationResult(res.into()))
                }
                EntryPointAPIErrors::ValidationResultWithAggregation(res) => {
                    Ok(SimulateValidationResult::ValidationResultWithAggregation(res.into()))
                }
                EntryPointAPIErrors::RevertString(reason) => {
                    Err(EntryPointError::ExecutionReverted(reason))
                }
                _ => Err(EntryPointError::Other {
                    inner: format!("simulate validation error: {op:?}"),
                }),
            }),
        }
    }

    fn struct_log_tracing_options() -> GethDebugTracingOptions {
        GethDebugTracingOptions {
            disable_storage: Some(false),
            disable_stack: Some(false),
            enable_memory: Some(true),
            enable_return_data: Some(false),
            tracer: None,
            tracer_config: None,
            timeout: None,
        }
    }

    fn into_struct_log_frame(res: GethTrace) -> Result<DefaultFrame, EntryPointError> {
        match res {
            GethTrace::Known(GethTraceFrame::Default(frame)) => Ok(frame),
            other => Err(EntryPointError::Decode {
                inner: format!("expected struct-log trace, got: {other:?}"),
            }),
        }
    }

    /// Replays `simulateValidation` under the node's default struct-log
    /// tracer, returning the raw opcode-level frame. Nodes without
    /// `debug_traceCall` get the call mined as an unchecked transaction and
    /// traced with `debug_traceTransaction` instead.
    pub async fn simulate_validation_trace<U: Into<UserOperation>>(
        &self,
        uo: U,
    ) -> Result<DefaultFrame, EntryPointError> {
        let call = self.entry_point_api.simulate_validation(uo.into());
        let tx: TypedTransaction = call.tx;

        let res = self
            .eth_client
            .debug_trace_call(
                tx.clone(),
                None,
                GethDebugTracingCallOptions {
                    tracing_options: Self::struct_log_tracing_options(),
                    state_overrides: None,
                    block_overrides: None,
                },
            )
            .await;

        match res {
            Ok(res) => Self::into_struct_log_frame(res),
            Err(e) => {
                let err = EntryPointError::from_middleware_error::<M>(e)
                    .expect_err("trace err is expected");
                if !trace_call_unsupported(&err) {
                    return Err(err);
                }
                self.trace_unchecked_transaction(tx).await
            }
        }
    }

    /// Mines the call via `eth_sendUncheckedTransaction` and traces the mined
    /// transaction with the same struct-log tracer
    async fn trace_unchecked_transaction(
        &self,
        tx: TypedTransaction,
    ) -> Result<DefaultFrame, EntryPointError> {
        let tx_hash: H256 = self
            .eth_client
            .provider()
            .request("eth_sendUncheckedTransaction", [&tx])
            .await
            .map_err(|err| EntryPointError::Provider {
                inner: format!("unchecked transaction error: {err:?}"),
            })?;
        self.trace_transaction(tx_hash).await
    }

    /// Traces a mined transaction under the struct-log tracer
    pub async fn trace_transaction(&self, tx_hash: H256) -> Result<DefaultFrame, EntryPointError> {
        let res = self
            .eth_client
            .debug_trace_transaction(tx_hash, Self::struct_log_tracing_options())
            .await
            .map_err(|e| {
                EntryPointError::from_middleware_error::<M>(e).expect_err("trace err is expected")
            })?;
        Self::into_struct_log_frame(res)
    }

    /// Static-calls `handleOps` without submitting a transaction, surfacing a
    /// decoded `FailedOp` if the bundle would revert
    pub async fn handle_ops<U: Into<UserOperation>>(
        &self,
        uos: Vec<U>,
        beneficiary: Address,
    ) -> Result<(), EntryPointError> {
        self.entry_point_api
            .handle_ops(uos.into_iter().map(|u| u.into()).collect(), beneficiary)
            .call()
            .await
            .or_else(|e| {
                Self::deserialize_error_msg(e).and_then(|op| match op {
                    EntryPointAPIErrors::FailedOp(err) => Err(EntryPointError::FailedOp(err)),
                    _ => Err(EntryPointError::Other { inner: format!("handle ops error: {op:?}") }),
                })
            })
    }

    pub async fn get_deposit_info(&self, addr: &Address) -> Result<DepositInfo, EntryPointError> {
        self.entry_point_api
            .get_deposit_info(*addr)
            .call()
            .await
            .map(Into::into)
            .map_err(|err| EntryPointError::Other {
                inner: format!("get deposit info error: {err:?}"),
            })
    }

    pub async fn balance_of(&self, addr: &Address) -> Result<U256, EntryPointError> {
        self.entry_point_api
            .balance_of(*addr)
            .call()
            .await
            .map_err(|err| EntryPointError::Other { inner: format!("balance of error: {err:?}") })
    }

    pub async fn get_nonce(&self, addr: &Address, key: U256) -> Result<U256, EntryPointError> {
        self.entry_point_api
            .get_nonce(*addr, key)
            .call()
            .await
            .map_err(|err| EntryPointError::Other { inner: format!("get nonce error: {err:?}") })
    }

    /// Computes the counterfactual sender address for the given init code via
    /// the entry point's structured revert
    pub async fn get_sender_address(
        &self,
        init_code: Bytes,
    ) -> Result<SenderAddressResult, EntryPointError> {
        let res = self.entry_point_api.get_sender_address(init_code).call().await;

        match res {
            Ok(_) => Err(EntryPointError::NoRevert { function: "get_sender_address".into() }),
            Err(e) => Self::deserialize_error_msg(e).and_then(|op| match op {
                EntryPointAPIErrors::SenderAddressResult(res) => Ok(res),
                EntryPointAPIErrors::FailedOp(err) => Err(EntryPointError::FailedOp(err)),
                _ => Err(EntryPointError::Other {
                    inner: format!("get sender address error: {op:?}"),
                }),
            }),
        }
    }
}
