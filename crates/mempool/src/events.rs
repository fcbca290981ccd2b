//! Entry point event reconciliation
//!
//! Polls the entry point's logs since the last processed block, updates
//! included-reputation for the named entities, and drops mined operations
//! from the pool (other bundlers may have included them). The watermark only
//! advances after a fully successful sweep.

use crate::{mempool::Mempool, reputation::Reputation, store::{Store, StoreExt}};
use cassius_contracts::{EntryPoint, EntryPointAPIEvents};
use cassius_primitives::constants::{events::INITIAL_SCAN_DEPTH, storage::LAST_BLOCK};
use ethers::{providers::Middleware, types::Address};

pub struct EventWatcher<M: Middleware + 'static, S: Store + Clone> {
    entry_point: EntryPoint<M>,
    mempool: Mempool<S>,
    reputation: Reputation<S>,
    store: S,
    chain_id: u64,
}

impl<M: Middleware + 'static, S: Store + Clone> EventWatcher<M, S> {
    pub fn new(
        entry_point: EntryPoint<M>,
        mempool: Mempool<S>,
        reputation: Reputation<S>,
        store: S,
        chain_id: u64,
    ) -> Self {
        Self { entry_point, mempool, reputation, store, chain_id }
    }

    fn watermark_key(&self) -> String {
        format!(
            "{chain}:{LAST_BLOCK}:{ep:#x}",
            chain = self.chain_id,
            ep = self.entry_point.address()
        )
    }

    /// Processes all entry point logs since the last sweep, returning the
    /// number of events handled
    pub async fn sweep(&self) -> eyre::Result<usize> {
        let latest = self
            .entry_point
            .eth_client()
            .get_block_number()
            .await
            .map_err(|err| eyre::eyre!("getting latest block number: {err}"))?
            .as_u64();

        let from = match self.store.get_json::<u64>(&self.watermark_key()).await? {
            Some(last) => last + 1,
            None => latest.saturating_sub(INITIAL_SCAN_DEPTH),
        };
        if from > latest {
            return Ok(0);
        }

        let events = self
            .entry_point
            .events()
            .from_block(from)
            .to_block(latest)
            .query()
            .await
            .map_err(|err| eyre::eyre!("querying entry point logs: {err}"))?;

        let count = events.len();
        for event in events {
            match event {
                EntryPointAPIEvents::UserOperationEventFilter(ev) => {
                    self.update_included(ev.sender).await;
                    self.update_included(ev.paymaster).await;

                    // another bundler may have included the operation
                    let mined = cassius_primitives::UserOperation::default()
                        .sender(ev.sender)
                        .nonce(ev.nonce);
                    if let Err(err) = self.mempool.remove_user_op(&mined).await {
                        tracing::warn!(
                            "failed to drop mined user operation {hash:?} from the pool: {err}",
                            hash = ev.user_op_hash,
                        );
                    }
                }
                EntryPointAPIEvents::AccountDeployedFilter(ev) => {
                    self.update_included(ev.factory).await;
                }
                EntryPointAPIEvents::SignatureAggregatorForUserOperationsFilter(ev) => {
                    self.update_included(ev.aggregator).await;
                }
                _ => {}
            }
        }

        self.store.put_json(&self.watermark_key(), &latest).await?;
        tracing::debug!(
            "event sweep processed {count} events over blocks [{from}, {latest}]"
        );
        Ok(count)
    }

    async fn update_included(&self, addr: Address) {
        if addr.is_zero() {
            return;
        }
        if let Err(err) = self.reputation.update_included(&addr).await {
            tracing::warn!("failed to update included reputation for {addr:?}: {err}");
        }
    }
}
