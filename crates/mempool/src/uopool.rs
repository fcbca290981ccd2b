//! User operation pool facade
//!
//! [`UoPool`] ties the validation engine, the mempool and the reputation
//! tracker together and exposes the operations the RPC surface and the
//! bundling service are built on.

use crate::{
    error::{MempoolError, MempoolErrorKind, MempoolResult},
    mempool::Mempool,
    reputation::Reputation,
    store::Store,
    utils::Overhead,
    validate::ValidationEngine,
    MempoolEntry,
};
use alloy_chains::Chain;
use cassius_contracts::{
    entry_point_api::UserOperationEventFilter, parse_from_input_data, EntryPoint,
};
use cassius_primitives::{
    reputation::{ReputationEntry, StakeInfo, StakeInfoResponse},
    utils::get_address,
    UserOperation, UserOperationByHash, UserOperationGasEstimation, UserOperationHash,
    UserOperationReceipt,
};
use ethers::{
    providers::Middleware,
    types::{Address, BlockNumber, U256},
};
use eyre::format_err;
use std::sync::Arc;
use tracing::debug;

const FILTER_MAX_DEPTH: u64 = 10;
const PRE_VERIFICATION_SAFE_RESERVE: u64 = 1_000;

pub struct UoPool<M: Middleware + 'static, S: Store + Clone> {
    /// The EntryPoint contract the pool serves
    entry_point: EntryPoint<M>,
    /// Validation engine, shallow and deep paths
    validator: ValidationEngine<M, S>,
    /// The mempool of admitted user operations
    pub mempool: Mempool<S>,
    /// Reputation tracker for senders, factories, paymasters and aggregators
    pub reputation: Reputation<S>,
    /// The chain the pool runs on
    chain: Chain,
}

impl<M: Middleware + 'static, S: Store + Clone> UoPool<M, S> {
    pub fn new(
        entry_point: EntryPoint<M>,
        validator: ValidationEngine<M, S>,
        mempool: Mempool<S>,
        reputation: Reputation<S>,
        chain: Chain,
    ) -> Self {
        Self { entry_point, validator, mempool, reputation, chain }
    }

    pub fn entry_point(&self) -> &EntryPoint<M> {
        &self.entry_point
    }

    pub fn entry_point_address(&self) -> Address {
        self.entry_point.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.id()
    }

    pub fn supported_entry_points(&self) -> Vec<Address> {
        vec![self.entry_point.address()]
    }

    pub fn eth_client(&self) -> Arc<M> {
        self.entry_point.eth_client()
    }

    /// Runs deep validation on a submitted user operation and admits it to
    /// the mempool. Invoked by the `eth_sendUserOperation` JSON RPC method.
    pub async fn send_user_operation(
        &self,
        uo: UserOperation,
    ) -> MempoolResult<UserOperationHash> {
        let hash = uo.hash(&self.entry_point.address(), self.chain.id());
        debug!("Validating user operation {hash:?}");

        let outcome = self
            .validator
            .simulate_complete_validation(&uo)
            .await
            .map_err(|kind| MempoolError::new(hash, kind))?;

        let aggregator = outcome.aggregator_info.as_ref().map(|info| info.address);

        self.mempool
            .add_user_op(
                uo,
                self.entry_point.address(),
                outcome.return_info.prefund,
                &outcome.sender_info,
                aggregator,
            )
            .await
    }

    /// Estimates `verification_gas_limit`, `call_gas_limit` and
    /// `pre_verification_gas` for a user operation. Invoked by the
    /// `eth_estimateUserOperationGas` JSON RPC method.
    pub async fn estimate_user_operation_gas(
        &self,
        uo: &UserOperation,
    ) -> MempoolResult<UserOperationGasEstimation> {
        let hash = uo.hash(&self.entry_point.address(), self.chain.id());

        let outcome = self
            .validator
            .call_simulate_validation(uo)
            .await
            .map_err(|kind| MempoolError::new(hash, kind))?;

        let call_gas_limit = self
            .entry_point
            .eth_client()
            .estimate_gas(
                &ethers::types::transaction::eip2718::TypedTransaction::Eip1559(
                    ethers::types::Eip1559TransactionRequest {
                        from: Some(self.entry_point.address()),
                        to: Some(uo.sender.into()),
                        data: Some(uo.call_data.clone()),
                        ..Default::default()
                    },
                ),
                None,
            )
            .await
            .map_err(|err| {
                MempoolError::new(
                    hash,
                    MempoolErrorKind::Provider { inner: err.to_string() },
                )
            })?;

        Ok(UserOperationGasEstimation {
            pre_verification_gas: Overhead::default()
                .calculate_pre_verification_gas(uo)
                .saturating_add(PRE_VERIFICATION_SAFE_RESERVE.into()),
            verification_gas_limit: outcome.return_info.pre_op_gas,
            call_gas_limit,
        })
    }

    /// Gets the block base fee per gas
    pub async fn base_fee_per_gas(&self) -> eyre::Result<U256> {
        let block = self
            .entry_point
            .eth_client()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|err| format_err!("Getting latest block failed: {err}"))?
            .ok_or(format_err!("No block found"))?;
        block.base_fee_per_gas.ok_or(format_err!("No base fee found"))
    }

    /// Filters recent EntryPoint logs for a user operation hash
    pub async fn get_user_operation_event_meta(
        &self,
        uo_hash: &UserOperationHash,
    ) -> eyre::Result<Option<(UserOperationEventFilter, ethers::contract::LogMeta)>> {
        let latest_block = self
            .entry_point
            .eth_client()
            .get_block_number()
            .await
            .map_err(|err| format_err!("Getting latest block number failed: {err}"))?;
        let filter = self
            .entry_point
            .entry_point_api()
            .event::<UserOperationEventFilter>()
            .from_block(latest_block.saturating_sub(FILTER_MAX_DEPTH.into()))
            .topic1(uo_hash.0);
        let res = filter.query_with_meta().await?;
        // the same user operation can appear twice in one bundle; the last
        // occurrence wins
        Ok(res.into_iter().last())
    }

    /// Resolves a user operation and its inclusion context by hash. Invoked
    /// by the `eth_getUserOperationByHash` JSON RPC method.
    pub async fn get_user_operation_by_hash(
        &self,
        uo_hash: &UserOperationHash,
    ) -> eyre::Result<UserOperationByHash> {
        let event = self.get_user_operation_event_meta(uo_hash).await?;

        if let Some((event, log_meta)) = event {
            if let Some((uo, ep)) = self
                .entry_point
                .eth_client()
                .get_transaction(log_meta.transaction_hash)
                .await
                .map_err(|err| format_err!("Getting transaction failed: {err}"))?
                .and_then(|tx| {
                    let uos = parse_from_input_data(tx.input)?;
                    let ep = tx.to?;
                    uos.iter()
                        .find(|uo| uo.sender == event.sender && uo.nonce == event.nonce)
                        .map(|uo| (uo.clone(), ep))
                })
            {
                return Ok(UserOperationByHash {
                    user_operation: uo,
                    entry_point: ep,
                    transaction_hash: log_meta.transaction_hash,
                    block_hash: log_meta.block_hash,
                    block_number: log_meta.block_number,
                });
            }
        }

        Err(format_err!("No user operation found"))
    }

    /// Builds the receipt of an included user operation. Invoked by the
    /// `eth_getUserOperationReceipt` JSON RPC method.
    pub async fn get_user_operation_receipt(
        &self,
        uo_hash: &UserOperationHash,
    ) -> eyre::Result<UserOperationReceipt> {
        let event = self.get_user_operation_event_meta(uo_hash).await?;

        if let Some((event, log_meta)) = event {
            if let Some(tx_receipt) = self
                .entry_point
                .eth_client()
                .get_transaction_receipt(log_meta.transaction_hash)
                .await
                .map_err(|err| format_err!("Getting transaction receipt failed: {err}"))?
            {
                let uo = self.get_user_operation_by_hash(uo_hash).await?;
                return Ok(UserOperationReceipt {
                    user_operation_hash: *uo_hash,
                    sender: event.sender,
                    nonce: event.nonce,
                    paymaster: get_address(&uo.user_operation.paymaster_and_data),
                    actual_gas_cost: event.actual_gas_cost,
                    actual_gas_used: event.actual_gas_used,
                    success: event.success,
                    reason: String::new(),
                    logs: tx_receipt.logs.clone(),
                    tx_receipt,
                });
            }
        }

        Err(format_err!("No user operation found"))
    }

    /// Assembles the next bundle: pool entries sorted by priority fee, one
    /// operation per sender, each re-validated at full depth right before
    /// inclusion. Operations failing re-validation are dropped from the pool
    /// and skipped.
    pub async fn bundle_user_operations(&self) -> eyre::Result<Vec<UserOperation>> {
        let entries = self
            .mempool
            .get_sorted_ops()
            .await
            .map_err(|err| format_err!("Getting sorted user operations failed: {err}"))?;

        let mut senders = std::collections::HashSet::new();
        let mut bundle = Vec::new();

        for entry in entries {
            let uo = entry.user_operation;
            if senders.contains(&uo.sender) {
                continue;
            }

            match self.validator.simulate_complete_validation(&uo).await {
                Ok(_) => {
                    senders.insert(uo.sender);
                    bundle.push(uo);
                }
                Err(err) => {
                    debug!(
                        "Dropping user operation of sender {:?} nonce {} after failed re-validation: {err}",
                        uo.sender, uo.nonce
                    );
                    if let Err(err) = self.mempool.remove_user_op(&uo).await {
                        tracing::warn!("Removing invalid user operation failed: {err}");
                    }
                }
            }
        }

        Ok(bundle)
    }

    /// Removes included user operations from the pool. Inclusion counters are
    /// credited separately when the on-chain events are swept.
    pub async fn remove_user_operations(&self, uos: &[UserOperation]) {
        for uo in uos {
            if let Err(err) = self.mempool.remove_user_op(uo).await {
                tracing::warn!(
                    "Removing user operation of sender {:?} nonce {} failed: {err}",
                    uo.sender,
                    uo.nonce
                );
            }
        }
    }

    /// Stake info of an entity at the EntryPoint. Invoked by the
    /// `debug_bundler_getStakeStatus` JSON RPC method.
    pub async fn get_stake_info(&self, addr: &Address) -> eyre::Result<StakeInfoResponse> {
        let info = self.entry_point.get_deposit_info(addr).await?;
        let stake_info = StakeInfo {
            address: *addr,
            stake: U256::from(info.stake),
            unstake_delay: U256::from(info.unstake_delay_sec),
        };
        let is_staked = self.reputation.check_stake("", &stake_info).await.is_ok();
        Ok(StakeInfoResponse { stake_info, is_staked })
    }

    pub async fn dump_mempool(&self) -> Result<Vec<MempoolEntry>, MempoolErrorKind> {
        self.mempool.dump().await
    }

    pub async fn set_mempool(&self, entries: Vec<MempoolEntry>) -> Result<(), MempoolErrorKind> {
        self.mempool.set_entries(entries).await
    }

    pub async fn dump_reputation(&self) -> Result<Vec<ReputationEntry>, MempoolErrorKind> {
        Ok(self.reputation.dump().await?)
    }

    pub async fn set_reputation(
        &self,
        entries: Vec<ReputationEntry>,
    ) -> Result<(), MempoolErrorKind> {
        Ok(self.reputation.set_entries(entries).await?)
    }

    /// Clears the mempool and the reputation state
    pub async fn clear_state(&self) -> Result<(), MempoolErrorKind> {
        self.mempool.clear_state().await?;
        self.reputation.clear().await?;
        Ok(())
    }
}
