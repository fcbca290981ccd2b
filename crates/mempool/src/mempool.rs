//! User operation mempool
//!
//! One live entry per `(chainId, sender, nonce)` key, persisted in the store
//! together with an ordered key index. Admissions for the same key are
//! serialized through a per-key async mutex, so read-check-write never races.
//! Mutations of the shared key index are serialized through a pool-wide
//! mutex; admissions for different keys would otherwise race on it and drop
//! entries from the index.

use crate::{
    error::{MempoolError, MempoolErrorKind, MempoolResult},
    reputation::Reputation,
    store::{Store, StoreError, StoreExt},
};
use cassius_primitives::{
    constants::storage::USEROP_KEYS,
    reputation::StakeInfo,
    user_op_key,
    utils::unix_timestamp_secs,
    MempoolEntry, UserOperation, UserOperationHash,
};
use ethers::types::{Address, U256};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Lazily created per-key async locks giving single-flight semantics to
/// mempool admissions
#[derive(Clone, Default)]
struct KeyedMutex {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedMutex {
    async fn lock(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // a held lock is referenced by its guard as well, strong count 1
            // means nobody holds it anymore
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct Mempool<S: Store + Clone> {
    store: S,
    reputation: Reputation<S>,
    chain_id: u64,
    /// Entries an unstaked sender may hold at the same time
    max_same_sender: usize,
    key_locks: KeyedMutex,
    /// Serializes read-modify-write cycles on the shared key index
    index_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<S: Store + Clone> Mempool<S> {
    pub fn new(store: S, reputation: Reputation<S>, chain_id: u64, max_same_sender: usize) -> Self {
        Self {
            store,
            reputation,
            chain_id,
            max_same_sender,
            key_locks: KeyedMutex::default(),
            index_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn index_key(&self) -> String {
        format!("{chain}:{USEROP_KEYS}", chain = self.chain_id)
    }

    async fn index(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.store.get_json(&self.index_key()).await?.unwrap_or_default())
    }

    /// Admits a user operation, replacing an existing entry for the same key
    /// only on a strictly higher priority fee. New senders at the per-sender
    /// cap must pass the stake check.
    pub async fn add_user_op(
        &self,
        uo: UserOperation,
        entry_point: Address,
        prefund: U256,
        sender_stake: &StakeInfo,
        aggregator: Option<Address>,
    ) -> MempoolResult<UserOperationHash> {
        let hash = uo.hash(&entry_point, self.chain_id);
        let key = user_op_key(self.chain_id, &uo.sender, uo.nonce);

        let _guard = self.key_locks.lock(&key).await;

        let existing: Option<MempoolEntry> = self
            .store
            .get_json(&key)
            .await
            .map_err(|err| MempoolError::new(hash, err.into()))?;

        match existing {
            Some(ref entry) => {
                if !entry.can_replace(&uo) {
                    return Err(MempoolError::new(
                        hash,
                        MempoolErrorKind::InvalidUserOperation {
                            inner: format!(
                                "replacement maxPriorityFeePerGas {fee} is not higher than {existing}",
                                fee = uo.max_priority_fee_per_gas,
                                existing = entry.user_operation.max_priority_fee_per_gas,
                            ),
                        },
                    ));
                }
            }
            None => {
                self.check_sender_count(&uo.sender, sender_stake)
                    .await
                    .map_err(|kind| MempoolError::new(hash, kind))?;
            }
        }

        let entry = MempoolEntry {
            user_operation: uo,
            entry_point,
            prefund,
            aggregator,
            last_updated_time: unix_timestamp_secs(),
        };

        self.store
            .put_json(&key, &entry)
            .await
            .map_err(|err| MempoolError::new(hash, err.into()))?;

        {
            let _index_guard = self.index_lock.lock().await;
            let mut index =
                self.index().await.map_err(|err| MempoolError::new(hash, err.into()))?;
            if !index.contains(&key) {
                index.push(key);
                self.store
                    .put_json(&self.index_key(), &index)
                    .await
                    .map_err(|err| MempoolError::new(hash, err.into()))?;
            }
        }

        self.update_seen_entities(&entry).await;

        tracing::info!("user operation {hash} added to the mempool");
        Ok(hash)
    }

    /// Rejects a new entry when the sender already holds `max_same_sender`
    /// entries and is not sufficiently staked
    async fn check_sender_count(
        &self,
        sender: &Address,
        sender_stake: &StakeInfo,
    ) -> Result<(), MempoolErrorKind> {
        let prefix = format!("{chain}:{sender:#x}:", chain = self.chain_id);
        let count =
            self.index().await?.iter().filter(|key| key.starts_with(&prefix)).count();

        if count >= self.max_same_sender {
            self.reputation.check_stake("sender", sender_stake).await.map_err(|err| {
                MempoolErrorKind::InvalidUserOperation {
                    inner: format!(
                        "sender {sender:?} already has {count} user operations in the mempool: {err}"
                    ),
                }
            })?;
        }
        Ok(())
    }

    /// Seen-counter side effects of a successful admission. Failed updates
    /// are logged, the admission itself already happened.
    async fn update_seen_entities(&self, entry: &MempoolEntry) {
        let uo = &entry.user_operation;
        let mut entities = vec![uo.sender];
        entities.extend(uo.factory());
        entities.extend(uo.paymaster());
        entities.extend(entry.aggregator);

        for addr in entities {
            if let Err(err) = self.reputation.update_seen(&addr).await {
                tracing::warn!("failed to update seen reputation for {addr:?}: {err}");
            }
        }
    }

    /// Inserts entries directly, bypassing validation and the per-sender cap.
    /// Backs the debug mempool endpoint.
    pub async fn set_entries(&self, entries: Vec<MempoolEntry>) -> Result<(), MempoolErrorKind> {
        for entry in entries {
            let key = entry.key(self.chain_id);
            let _guard = self.key_locks.lock(&key).await;

            self.store.put_json(&key, &entry).await?;

            let _index_guard = self.index_lock.lock().await;
            let mut index = self.index().await?;
            if !index.contains(&key) {
                index.push(key);
                self.store.put_json(&self.index_key(), &index).await?;
            }
        }
        Ok(())
    }

    pub async fn get(
        &self,
        sender: &Address,
        nonce: U256,
    ) -> Result<Option<MempoolEntry>, MempoolErrorKind> {
        let key = user_op_key(self.chain_id, sender, nonce);
        Ok(self.store.get_json(&key).await?)
    }

    /// Removes an entry by its operation's key; a no-op when absent
    pub async fn remove_user_op(&self, uo: &UserOperation) -> Result<(), MempoolErrorKind> {
        self.remove_key(&user_op_key(self.chain_id, &uo.sender, uo.nonce)).await
    }

    /// Removes an entry; a no-op when absent
    pub async fn remove(&self, entry: &MempoolEntry) -> Result<(), MempoolErrorKind> {
        self.remove_key(&entry.key(self.chain_id)).await
    }

    async fn remove_key(&self, key: &str) -> Result<(), MempoolErrorKind> {
        self.store.del(key).await?;

        let _index_guard = self.index_lock.lock().await;
        let mut index = self.index().await?;
        if let Some(pos) = index.iter().position(|k| k == key) {
            index.remove(pos);
            self.store.put_json(&self.index_key(), &index).await?;
        }
        Ok(())
    }

    /// All live entries in insertion order
    pub async fn get_all(&self) -> Result<Vec<MempoolEntry>, MempoolErrorKind> {
        let index = self.index().await?;
        let values = self.store.get_many(&index).await?;

        let mut entries = Vec::with_capacity(values.len());
        for value in values.into_iter().flatten() {
            match serde_json::from_slice::<MempoolEntry>(&value) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::warn!("skipping undecodable mempool entry: {err}"),
            }
        }
        Ok(entries)
    }

    /// All live entries, sorted by descending priority fee; insertion order
    /// breaks ties
    pub async fn get_sorted_ops(&self) -> Result<Vec<MempoolEntry>, MempoolErrorKind> {
        let mut entries = self.get_all().await?;
        entries.sort_by(|a, b| {
            b.user_operation
                .max_priority_fee_per_gas
                .cmp(&a.user_operation.max_priority_fee_per_gas)
        });
        Ok(entries)
    }

    pub async fn len(&self) -> Result<usize, MempoolErrorKind> {
        Ok(self.index().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, MempoolErrorKind> {
        Ok(self.len().await? == 0)
    }

    /// Removes every entry and the key index
    pub async fn clear_state(&self) -> Result<(), MempoolErrorKind> {
        let _index_guard = self.index_lock.lock().await;
        let index = self.index().await?;
        for key in index {
            self.store.del(&key).await?;
        }
        self.store.del(&self.index_key()).await?;
        Ok(())
    }

    /// Serializes all entries for introspection
    pub async fn dump(&self) -> Result<Vec<MempoolEntry>, MempoolErrorKind> {
        self.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use cassius_primitives::constants::{
        mempool::SAME_SENDER_ALLOWED_COUNT,
        reputation::{BAN_SLACK, MIN_INCLUSION_RATE_DENOMINATOR, THROTTLING_SLACK},
    };

    /// Store that yields to the scheduler before every operation, forcing
    /// interleavings between concurrent pool calls
    #[derive(Clone)]
    struct YieldingStore(MemoryStore);

    #[async_trait::async_trait]
    impl Store for YieldingStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            tokio::task::yield_now().await;
            self.0.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.put(key, value).await
        }

        async fn del(&self, key: &str) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.del(key).await
        }
    }

    fn mempool() -> Mempool<MemoryStore> {
        let store = MemoryStore::new();
        let reputation = Reputation::new(
            store.clone(),
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            BAN_SLACK,
            U256::from(100),
            U256::from(86400),
        );
        Mempool::new(store, reputation, 1, SAME_SENDER_ALLOWED_COUNT)
    }

    fn unstaked(addr: Address) -> StakeInfo {
        StakeInfo { address: addr, stake: U256::zero(), unstake_delay: U256::zero() }
    }

    fn staked(addr: Address) -> StakeInfo {
        StakeInfo { address: addr, stake: U256::from(100), unstake_delay: U256::from(86400) }
    }

    async fn add(
        pool: &Mempool<MemoryStore>,
        uo: UserOperation,
        stake: &StakeInfo,
    ) -> MempoolResult<UserOperationHash> {
        pool.add_user_op(uo, Address::zero(), U256::zero(), stake, None).await
    }

    #[tokio::test]
    async fn one_entry_per_key() {
        let pool = mempool();
        let uo = UserOperation::random();
        let stake = unstaked(uo.sender);

        add(&pool, uo.clone(), &stake).await.unwrap();
        add(&pool, uo.clone().max_priority_fee_per_gas(2_000_000_000_u64), &stake)
            .await
            .unwrap();

        assert_eq!(pool.len().await.unwrap(), 1);
        let entry = pool.get(&uo.sender, uo.nonce).await.unwrap().unwrap();
        assert_eq!(
            entry.user_operation.max_priority_fee_per_gas,
            U256::from(2_000_000_000_u64)
        );
    }

    #[tokio::test]
    async fn replacement_law() {
        let pool = mempool();
        let uo = UserOperation::random().max_priority_fee_per_gas(100u64);
        let stake = unstaked(uo.sender);

        add(&pool, uo.clone(), &stake).await.unwrap();

        // equal fee is rejected
        let res = add(&pool, uo.clone(), &stake).await;
        assert!(matches!(
            res.unwrap_err().kind,
            MempoolErrorKind::InvalidUserOperation { .. }
        ));

        // lower fee is rejected
        let res = add(&pool, uo.clone().max_priority_fee_per_gas(99u64), &stake).await;
        assert!(res.is_err());

        // strictly higher fee replaces
        add(&pool, uo.clone().max_priority_fee_per_gas(101u64), &stake).await.unwrap();

        // resubmitting the same higher fee is rejected again
        let res = add(&pool, uo.clone().max_priority_fee_per_gas(101u64), &stake).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn sorted_ops_non_increasing_with_stable_ties() {
        let pool = mempool();
        let fees = [50u64, 200, 100, 100, 75];
        let mut tied_order = Vec::new();
        for fee in fees {
            let uo = UserOperation::random().max_priority_fee_per_gas(fee);
            if fee == 100 {
                tied_order.push(uo.sender);
            }
            add(&pool, uo.clone(), &unstaked(uo.sender)).await.unwrap();
        }

        let sorted = pool.get_sorted_ops().await.unwrap();
        let sorted_fees: Vec<U256> =
            sorted.iter().map(|e| e.user_operation.max_priority_fee_per_gas).collect();
        assert!(sorted_fees.windows(2).all(|w| w[0] >= w[1]));

        // ties keep insertion order
        let tied: Vec<Address> = sorted
            .iter()
            .filter(|e| e.user_operation.max_priority_fee_per_gas == U256::from(100u64))
            .map(|e| e.user_operation.sender)
            .collect();
        assert_eq!(tied, tied_order);
    }

    #[tokio::test]
    async fn unstaked_sender_capped_at_four() {
        let pool = mempool();
        let sender = Address::random();
        let stake = unstaked(sender);

        for nonce in 0u64..4 {
            let uo = UserOperation::random().sender(sender).nonce(nonce);
            add(&pool, uo, &stake).await.unwrap();
        }

        let uo = UserOperation::random().sender(sender).nonce(4u64);
        let res = add(&pool, uo, &stake).await;
        assert!(matches!(
            res.unwrap_err().kind,
            MempoolErrorKind::InvalidUserOperation { .. }
        ));
        assert_eq!(pool.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn staked_sender_is_not_capped() {
        let pool = mempool();
        let sender = Address::random();
        let stake = staked(sender);

        for nonce in 0u64..6 {
            let uo = UserOperation::random().sender(sender).nonce(nonce);
            add(&pool, uo, &stake).await.unwrap();
        }
        assert_eq!(pool.len().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn admission_updates_seen_reputation() {
        let store = MemoryStore::new();
        let reputation = Reputation::new(
            store.clone(),
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            BAN_SLACK,
            U256::from(100),
            U256::from(86400),
        );
        let pool = Mempool::new(store, reputation.clone(), 1, SAME_SENDER_ALLOWED_COUNT);

        let paymaster = Address::random();
        let uo = UserOperation::random()
            .paymaster_and_data(paymaster.as_bytes().to_vec().into());
        let aggregator = Address::random();

        pool.add_user_op(
            uo.clone(),
            Address::zero(),
            U256::zero(),
            &unstaked(uo.sender),
            Some(aggregator),
        )
        .await
        .unwrap();

        assert_eq!(reputation.fetch_one(&uo.sender).await.ops_seen, 1);
        assert_eq!(reputation.fetch_one(&paymaster).await.ops_seen, 1);
        assert_eq!(reputation.fetch_one(&aggregator).await.ops_seen, 1);
    }

    #[tokio::test]
    async fn concurrent_admissions_for_different_keys_both_land_in_index() {
        let store = YieldingStore(MemoryStore::new());
        let reputation = Reputation::new(
            store.clone(),
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            BAN_SLACK,
            U256::from(100),
            U256::from(86400),
        );
        let pool = Mempool::new(store, reputation, 1, SAME_SENDER_ALLOWED_COUNT);

        let a = UserOperation::random();
        let b = UserOperation::random();
        let stake_a = unstaked(a.sender);
        let stake_b = unstaked(b.sender);
        let (res_a, res_b) = tokio::join!(
            pool.add_user_op(a.clone(), Address::zero(), U256::zero(), &stake_a, None),
            pool.add_user_op(b.clone(), Address::zero(), U256::zero(), &stake_b, None),
        );
        res_a.unwrap();
        res_b.unwrap();

        // neither admission may overwrite the other's index update
        assert_eq!(pool.len().await.unwrap(), 2);
        let senders: Vec<Address> =
            pool.get_all().await.unwrap().iter().map(|e| e.user_operation.sender).collect();
        assert!(senders.contains(&a.sender));
        assert!(senders.contains(&b.sender));
    }

    #[tokio::test]
    async fn released_key_locks_are_pruned() {
        let pool = mempool();
        for _ in 0..5 {
            let uo = UserOperation::random();
            add(&pool, uo.clone(), &unstaked(uo.sender)).await.unwrap();
        }

        // each admission prunes the locks released before it, only the last
        // key's lock can remain
        assert_eq!(pool.key_locks.locks.lock().len(), 1);
    }

    #[tokio::test]
    async fn removal_is_idempotent() {
        let pool = mempool();
        let uo = UserOperation::random();
        add(&pool, uo.clone(), &unstaked(uo.sender)).await.unwrap();

        pool.remove_user_op(&uo).await.unwrap();
        assert_eq!(pool.len().await.unwrap(), 0);
        // removing again is a no-op
        pool.remove_user_op(&uo).await.unwrap();
    }

    #[tokio::test]
    async fn clear_state_empties_pool() {
        let pool = mempool();
        for _ in 0..3 {
            let uo = UserOperation::random();
            add(&pool, uo.clone(), &unstaked(uo.sender)).await.unwrap();
        }

        pool.clear_state().await.unwrap();
        assert!(pool.is_empty().await.unwrap());
        assert!(pool.get_sorted_ops().await.unwrap().is_empty());
    }
}
