//! Bundling service
//!
//! Drives the bundle cycle: assemble a bundle from the pool, dry-run it
//! against the entry point, submit it, and reconcile inclusion events. In
//! auto mode the cycle runs on a fixed interval; in manual mode it runs only
//! on request.

use crate::bundler::{Bundler, SendBundleOp};
use cassius_contracts::EntryPointError;
use cassius_mempool::{EventWatcher, Store, UoPool};
use cassius_primitives::{BundlerMode, UserOperation};
use ethers::{providers::Middleware, types::{H256, U256}};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

pub struct BundleService<M, S, C>
where
    M: Middleware + 'static,
    S: Store + Clone,
    C: SendBundleOp,
{
    uopool: Arc<UoPool<M, S>>,
    bundler: Bundler<M, C>,
    watcher: EventWatcher<M, S>,
    running: Arc<Mutex<bool>>,
    // at most one bundle cycle in flight; ticks arriving mid-cycle are skipped
    cycle: Arc<AsyncMutex<()>>,
}

impl<M, S, C> BundleService<M, S, C>
where
    M: Middleware + 'static,
    S: Store + Clone,
    C: SendBundleOp,
{
    pub fn new(
        uopool: Arc<UoPool<M, S>>,
        bundler: Bundler<M, C>,
        watcher: EventWatcher<M, S>,
    ) -> Self {
        Self {
            uopool,
            bundler,
            watcher,
            running: Arc::new(Mutex::new(false)),
            cycle: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn stop_bundling(&self) {
        info!("Stopping auto bundling");
        *self.running.lock() = false;
    }

    /// Starts the service in the given mode. Auto mode spawns the interval
    /// loop; manual mode leaves cycles to [`Self::send_bundle_now`].
    pub fn start(self: &Arc<Self>, mode: BundlerMode) {
        match mode.interval() {
            Some(int) => self.start_bundling(int),
            None => info!("Bundling in manual mode"),
        }
    }

    /// Spawns the auto bundling loop with the given interval in seconds
    pub fn start_bundling(self: &Arc<Self>, int: u64) {
        if self.is_running() {
            return;
        }

        info!("Starting auto bundling, interval: {int} seconds");
        *self.running.lock() = true;

        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(int));
            loop {
                interval.tick().await;
                if !this.is_running() {
                    break;
                }

                // cycle failures are logged, never propagated; the next tick
                // starts fresh
                if let Err(err) = this.send_next_bundle().await {
                    error!("Error while sending bundle: {err}");
                }
            }
        });
    }

    /// Runs one bundle cycle immediately, returning the transaction hash when
    /// a bundle was submitted
    pub async fn send_bundle_now(&self) -> eyre::Result<Option<H256>> {
        self.send_next_bundle().await
    }

    async fn send_next_bundle(&self) -> eyre::Result<Option<H256>> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("Skipping bundle cycle, previous cycle still in flight");
            return Ok(None);
        };

        let bundle = self.uopool.bundle_user_operations().await?;
        if bundle.is_empty() {
            return Ok(None);
        }

        // dry run against the entry point before spending gas
        if let Err(err) = self
            .uopool
            .entry_point()
            .handle_ops(bundle.clone(), self.bundler.beneficiary)
            .await
        {
            self.handle_dry_run_failure(&bundle, err).await;
            return Ok(None);
        }

        let hash = self.bundler.send_bundle(&bundle).await?;
        self.uopool.remove_user_operations(&bundle).await;

        if let Err(err) = self.watcher.sweep().await {
            warn!("Sweeping entry point events failed: {err}");
        }

        Ok(Some(hash))
    }

    /// A `FailedOp` revert names the offending operation; it is dropped from
    /// the pool so the next cycle can proceed without it. Any other revert
    /// leaves the pool untouched.
    async fn handle_dry_run_failure(&self, bundle: &[UserOperation], err: EntryPointError) {
        match err {
            EntryPointError::FailedOp(op) => {
                warn!(
                    "Bundle dry run failed at index {}, paymaster {:?}: {}",
                    op.op_index, op.paymaster, op.reason
                );
                match failed_op_target(bundle, op.op_index) {
                    Some(uo) => self.uopool.remove_user_operations(std::slice::from_ref(uo)).await,
                    None => warn!("FailedOp index {} out of bundle bounds", op.op_index),
                }
            }
            other => warn!("Bundle dry run failed: {other}"),
        }
    }
}

/// Resolves a `FailedOp` index to the operation it names
fn failed_op_target(bundle: &[UserOperation], op_index: U256) -> Option<&UserOperation> {
    if op_index > U256::from(usize::MAX) {
        return None;
    }
    bundle.get(op_index.as_usize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_chains::Chain;
    use cassius_contracts::{EntryPoint, FailedOp};
    use cassius_mempool::{MemoryStore, Mempool, Reputation, ValidationEngine};
    use cassius_primitives::{reputation::StakeInfo, Wallet};
    use ethers::{
        providers::{MockProvider, Provider},
        types::{transaction::eip2718::TypedTransaction, Address},
    };

    fn uo(n: u64) -> UserOperation {
        UserOperation::default().sender(Address::from_low_u64_be(n)).nonce(n)
    }

    struct NoopClient;

    #[async_trait::async_trait]
    impl SendBundleOp for NoopClient {
        async fn send_bundle(&self, _bundle: TypedTransaction) -> eyre::Result<H256> {
            Ok(H256::zero())
        }
    }

    fn service() -> BundleService<Provider<MockProvider>, MemoryStore, NoopClient> {
        let (provider, _mock) = Provider::mocked();
        let eth_client = Arc::new(provider);
        let ep_addr: Address =
            "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap();
        let entry_point = EntryPoint::new(eth_client.clone(), ep_addr);

        let store = MemoryStore::new();
        let reputation = Reputation::new(
            store.clone(),
            1,
            10,
            10,
            50,
            U256::from(100),
            U256::from(86400),
        );
        let mempool = Mempool::new(store.clone(), reputation.clone(), 1, 4);
        let validator = ValidationEngine::new(entry_point.clone(), reputation.clone());
        let uopool = Arc::new(UoPool::new(
            entry_point.clone(),
            validator,
            mempool.clone(),
            reputation.clone(),
            Chain::from(1),
        ));
        let watcher = EventWatcher::new(entry_point, mempool, reputation, store, 1);

        let wallet = Wallet::from_key(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            1,
        )
        .unwrap();
        let bundler = Bundler::new(
            wallet,
            Address::random(),
            ep_addr,
            Chain::from(1),
            U256::zero(),
            eth_client,
            Arc::new(NoopClient),
        );

        BundleService::new(uopool, bundler, watcher)
    }

    async fn admit(service: &BundleService<Provider<MockProvider>, MemoryStore, NoopClient>, uo: &UserOperation) {
        let stake = StakeInfo {
            address: uo.sender,
            stake: U256::zero(),
            unstake_delay: U256::zero(),
        };
        service
            .uopool
            .mempool
            .add_user_op(uo.clone(), Address::zero(), U256::zero(), &stake, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dry_run_failed_op_prunes_exactly_the_named_operation() {
        let service = service();
        let (a, b, c) = (uo(1), uo(2), uo(3));
        for op in [&a, &b, &c] {
            admit(&service, op).await;
        }
        assert_eq!(service.uopool.mempool.len().await.unwrap(), 3);

        let bundle = vec![a.clone(), b.clone(), c.clone()];
        let err = EntryPointError::FailedOp(FailedOp {
            op_index: U256::from(1),
            paymaster: Address::zero(),
            reason: "AA25 invalid account nonce".into(),
        });
        service.handle_dry_run_failure(&bundle, err).await;

        let remaining: Vec<Address> = service
            .uopool
            .mempool
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.user_operation.sender)
            .collect();
        assert_eq!(remaining, vec![a.sender, c.sender]);
    }

    #[tokio::test]
    async fn dry_run_out_of_bounds_index_leaves_pool_untouched() {
        let service = service();
        let (a, b) = (uo(1), uo(2));
        admit(&service, &a).await;
        admit(&service, &b).await;

        let bundle = vec![a, b];
        let err = EntryPointError::FailedOp(FailedOp {
            op_index: U256::from(7),
            paymaster: Address::zero(),
            reason: "AA95 out of gas".into(),
        });
        service.handle_dry_run_failure(&bundle, err).await;

        assert_eq!(service.uopool.mempool.len().await.unwrap(), 2);
    }

    #[test]
    fn failed_op_index_names_exactly_one_operation() {
        let bundle = vec![uo(1), uo(2), uo(3)];

        let target = failed_op_target(&bundle, U256::from(1)).unwrap();
        assert_eq!(target.sender, Address::from_low_u64_be(2));

        let remaining: Vec<_> =
            bundle.iter().filter(|op| op.sender != target.sender).collect();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].sender, Address::from_low_u64_be(1));
        assert_eq!(remaining[1].sender, Address::from_low_u64_be(3));
    }

    #[test]
    fn failed_op_index_out_of_bounds_is_none() {
        let bundle = vec![uo(1)];
        assert!(failed_op_target(&bundle, U256::from(5)).is_none());
        assert!(failed_op_target(&bundle, U256::MAX).is_none());
    }
}
