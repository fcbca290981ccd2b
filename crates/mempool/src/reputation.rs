//! Entity reputation ledger
//!
//! Tracks per-entity seen/included counters in the store and derives the
//! OK/THROTTLED/BANNED status on read. Lookup failures in the backing store
//! fall back to a fresh zero entry and are never surfaced to callers.

use crate::{
    error::ReputationError,
    store::{Store, StoreError, StoreExt},
};
use cassius_primitives::{
    constants::storage::{BLACKLIST, REPUTATION, WHITELIST},
    reputation::{ReputationEntry, ReputationStatus, StakeInfo},
    utils::unix_timestamp_secs,
};
use ethers::types::{Address, U256};

#[derive(Clone)]
pub struct Reputation<S: Store> {
    store: S,
    chain_id: u64,
    min_inclusion_denominator: u64,
    throttling_slack: u64,
    ban_slack: u64,
    min_stake: U256,
    min_unstake_delay: U256,
}

impl<S: Store> Reputation<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        chain_id: u64,
        min_inclusion_denominator: u64,
        throttling_slack: u64,
        ban_slack: u64,
        min_stake: U256,
        min_unstake_delay: U256,
    ) -> Self {
        Self {
            store,
            chain_id,
            min_inclusion_denominator,
            throttling_slack,
            ban_slack,
            min_stake,
            min_unstake_delay,
        }
    }

    fn entry_key(&self, addr: &Address) -> String {
        format!("{chain}:{REPUTATION}:{addr:#x}", chain = self.chain_id)
    }

    fn index_key(&self) -> String {
        format!("{chain}:{REPUTATION}", chain = self.chain_id)
    }

    fn list_key(&self, suffix: &str) -> String {
        format!("{chain}:{REPUTATION}:{suffix}", chain = self.chain_id)
    }

    /// Fetches the entry for an address, lazily creating it on miss and
    /// registering the address in the index used by `dump`/`clear`
    pub async fn fetch_one(&self, addr: &Address) -> ReputationEntry {
        match self.store.get_json::<ReputationEntry>(&self.entry_key(addr)).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                let entry = ReputationEntry::default_with_addr(*addr);
                if let Err(err) = self.persist(&entry).await {
                    tracing::warn!("failed to persist fresh reputation entry for {addr:?}: {err}");
                }
                entry
            }
            Err(err) => {
                tracing::warn!("reputation lookup failed for {addr:?}, assuming absent: {err}");
                ReputationEntry::default_with_addr(*addr)
            }
        }
    }

    async fn persist(&self, entry: &ReputationEntry) -> Result<(), StoreError> {
        self.store.put_json(&self.entry_key(&entry.address), entry).await?;

        let mut index: Vec<String> =
            self.store.get_json(&self.index_key()).await?.unwrap_or_default();
        let addr = format!("{:#x}", entry.address);
        if !index.contains(&addr) {
            index.push(addr);
            self.store.put_json(&self.index_key(), &index).await?;
        }
        Ok(())
    }

    /// Increments the seen counter, called on every mempool submission that
    /// references the entity
    pub async fn update_seen(&self, addr: &Address) -> Result<(), StoreError> {
        let mut entry = self.fetch_one(addr).await;
        entry.ops_seen += 1;
        entry.last_update_time = unix_timestamp_secs();
        self.persist(&entry).await
    }

    /// Increments the included counter, called when an on-chain inclusion
    /// event names the entity
    pub async fn update_included(&self, addr: &Address) -> Result<(), StoreError> {
        let mut entry = self.fetch_one(addr).await;
        entry.ops_included += 1;
        entry.last_update_time = unix_timestamp_secs();
        self.persist(&entry).await
    }

    /// Derives the status of an address from its counters. Blacklisted
    /// addresses are always BANNED, whitelisted addresses always OK.
    pub async fn get_status(&self, addr: &Address) -> ReputationStatus {
        if self.is_whitelisted(addr).await {
            return ReputationStatus::OK;
        }
        if self.is_blacklisted(addr).await {
            return ReputationStatus::BANNED;
        }

        let entry = self.fetch_one(addr).await;
        Self::derive_status(
            &entry,
            self.min_inclusion_denominator,
            self.throttling_slack,
            self.ban_slack,
        )
    }

    fn derive_status(
        entry: &ReputationEntry,
        min_inclusion_denominator: u64,
        throttling_slack: u64,
        ban_slack: u64,
    ) -> ReputationStatus {
        if entry.ops_seen == 0 {
            return ReputationStatus::OK;
        }
        let min_expected_included = entry.ops_seen / min_inclusion_denominator;
        if min_expected_included >= entry.ops_included + ban_slack {
            ReputationStatus::BANNED
        } else if min_expected_included >= entry.ops_included + throttling_slack {
            ReputationStatus::THROTTLED
        } else {
            ReputationStatus::OK
        }
    }

    /// Verifies an entity may take a staked-only action: whitelisted entities
    /// always pass, banned entities and entities below the configured stake
    /// minimums fail
    pub async fn check_stake(
        &self,
        entity: &str,
        info: &StakeInfo,
    ) -> Result<(), ReputationError> {
        if self.is_whitelisted(&info.address).await {
            return Ok(());
        }

        if self.get_status(&info.address).await == ReputationStatus::BANNED {
            return Err(ReputationError::BannedEntity {
                entity: entity.to_string(),
                address: info.address,
            });
        }

        if info.stake < self.min_stake {
            return Err(ReputationError::StakeTooLow {
                entity: entity.to_string(),
                address: info.address,
                stake: info.stake,
                min_stake: self.min_stake,
            });
        }

        if info.unstake_delay < self.min_unstake_delay {
            return Err(ReputationError::UnstakeDelayTooLow {
                entity: entity.to_string(),
                address: info.address,
                unstake_delay: info.unstake_delay,
                min_unstake_delay: self.min_unstake_delay,
            });
        }

        Ok(())
    }

    pub async fn is_whitelisted(&self, addr: &Address) -> bool {
        self.list_contains(WHITELIST, addr).await
    }

    pub async fn is_blacklisted(&self, addr: &Address) -> bool {
        self.list_contains(BLACKLIST, addr).await
    }

    async fn list_contains(&self, suffix: &str, addr: &Address) -> bool {
        match self.store.get_json::<Vec<String>>(&self.list_key(suffix)).await {
            Ok(Some(list)) => {
                let addr = format!("{addr:#x}");
                list.iter().any(|a| a.eq_ignore_ascii_case(&addr))
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!("reputation list lookup failed, assuming empty: {err}");
                false
            }
        }
    }

    pub async fn add_whitelist(&self, addr: &Address) -> Result<(), StoreError> {
        self.list_add(WHITELIST, addr).await
    }

    pub async fn add_blacklist(&self, addr: &Address) -> Result<(), StoreError> {
        self.list_add(BLACKLIST, addr).await
    }

    async fn list_add(&self, suffix: &str, addr: &Address) -> Result<(), StoreError> {
        let key = self.list_key(suffix);
        let mut list: Vec<String> = self.store.get_json(&key).await?.unwrap_or_default();
        let addr = format!("{addr:#x}");
        if !list.iter().any(|a| a.eq_ignore_ascii_case(&addr)) {
            list.push(addr);
            self.store.put_json(&key, &list).await?;
        }
        Ok(())
    }

    /// Overwrites entries in bulk, used by the debug reputation endpoint
    pub async fn set_entries(&self, entries: Vec<ReputationEntry>) -> Result<(), StoreError> {
        for entry in entries {
            self.persist(&entry).await?;
        }
        Ok(())
    }

    /// All known entries, with the derived status filled in
    pub async fn dump(&self) -> Result<Vec<ReputationEntry>, StoreError> {
        let index: Vec<String> =
            self.store.get_json(&self.index_key()).await?.unwrap_or_default();

        let mut entries = Vec::with_capacity(index.len());
        for addr in index {
            let Ok(addr) = addr.parse::<Address>() else {
                continue;
            };
            let mut entry = self.fetch_one(&addr).await;
            entry.status = Self::derive_status(
                &entry,
                self.min_inclusion_denominator,
                self.throttling_slack,
                self.ban_slack,
            );
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Removes every known entry and the index
    pub async fn clear(&self) -> Result<(), StoreError> {
        let index: Vec<String> =
            self.store.get_json(&self.index_key()).await?.unwrap_or_default();
        for addr in index {
            self.store.del(&format!("{chain}:{REPUTATION}:{addr}", chain = self.chain_id)).await?;
        }
        self.store.del(&self.index_key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use cassius_primitives::constants::reputation::{
        BAN_SLACK, MIN_INCLUSION_RATE_DENOMINATOR, THROTTLING_SLACK,
    };

    fn reputation(store: MemoryStore) -> Reputation<MemoryStore> {
        Reputation::new(
            store,
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            BAN_SLACK,
            U256::from(1),
            U256::from(1),
        )
    }

    #[tokio::test]
    async fn zero_seen_is_ok_for_any_included() {
        let rep = reputation(MemoryStore::new());
        let addr = Address::random();
        rep.update_included(&addr).await.unwrap();
        assert_eq!(rep.get_status(&addr).await, ReputationStatus::OK);
    }

    #[tokio::test]
    async fn never_included_entity_gets_banned_with_tight_slack() {
        let store = MemoryStore::new();
        let rep = Reputation::new(
            store,
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            10,
            U256::from(1),
            U256::from(1),
        );
        let addr = Address::random();
        for _ in 0..100 {
            rep.update_seen(&addr).await.unwrap();
        }
        // minExpectedIncluded = 100 / 10 = 10 >= 0 + banSlack
        assert_eq!(rep.get_status(&addr).await, ReputationStatus::BANNED);
    }

    #[tokio::test]
    async fn never_included_entity_gets_throttled_with_default_slack() {
        let rep = reputation(MemoryStore::new());
        let addr = Address::random();
        for _ in 0..100 {
            rep.update_seen(&addr).await.unwrap();
        }
        assert_eq!(rep.get_status(&addr).await, ReputationStatus::THROTTLED);
    }

    #[tokio::test]
    async fn inclusions_keep_entity_ok() {
        let rep = reputation(MemoryStore::new());
        let addr = Address::random();
        for _ in 0..100 {
            rep.update_seen(&addr).await.unwrap();
        }
        for _ in 0..10 {
            rep.update_included(&addr).await.unwrap();
        }
        assert_eq!(rep.get_status(&addr).await, ReputationStatus::OK);
    }

    #[tokio::test]
    async fn whitelist_overrides_ban() {
        let store = MemoryStore::new();
        let rep = Reputation::new(
            store,
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            10,
            U256::from(1),
            U256::from(1),
        );
        let addr = Address::random();
        for _ in 0..100 {
            rep.update_seen(&addr).await.unwrap();
        }
        rep.add_whitelist(&addr).await.unwrap();

        assert_eq!(rep.get_status(&addr).await, ReputationStatus::OK);
        let info = StakeInfo { address: addr, stake: U256::zero(), unstake_delay: U256::zero() };
        assert!(rep.check_stake("paymaster", &info).await.is_ok());
    }

    #[tokio::test]
    async fn blacklisted_entity_is_banned() {
        let rep = reputation(MemoryStore::new());
        let addr = Address::random();
        rep.add_blacklist(&addr).await.unwrap();
        assert_eq!(rep.get_status(&addr).await, ReputationStatus::BANNED);
    }

    #[tokio::test]
    async fn check_stake_rejects_low_stake_and_delay() {
        let store = MemoryStore::new();
        let rep = Reputation::new(
            store,
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            BAN_SLACK,
            U256::from(100),
            U256::from(86400),
        );
        let addr = Address::random();

        let info =
            StakeInfo { address: addr, stake: U256::from(99), unstake_delay: U256::from(86400) };
        assert!(matches!(
            rep.check_stake("paymaster", &info).await,
            Err(ReputationError::StakeTooLow { .. })
        ));

        let info =
            StakeInfo { address: addr, stake: U256::from(100), unstake_delay: U256::from(1) };
        assert!(matches!(
            rep.check_stake("paymaster", &info).await,
            Err(ReputationError::UnstakeDelayTooLow { .. })
        ));

        let info =
            StakeInfo { address: addr, stake: U256::from(100), unstake_delay: U256::from(86400) };
        assert!(rep.check_stake("paymaster", &info).await.is_ok());
    }

    #[tokio::test]
    async fn dump_fills_in_derived_status() {
        let rep = reputation(MemoryStore::new());
        let addr = Address::random();
        for _ in 0..100 {
            rep.update_seen(&addr).await.unwrap();
        }

        let entries = rep.dump().await.unwrap();
        let entry = entries.iter().find(|e| e.address == addr).unwrap();
        assert_eq!(entry.ops_seen, 100);
        assert_eq!(entry.status, ReputationStatus::THROTTLED);
    }

    #[tokio::test]
    async fn clear_removes_entries_and_index() {
        let rep = reputation(MemoryStore::new());
        let addr = Address::random();
        rep.update_seen(&addr).await.unwrap();
        rep.clear().await.unwrap();

        assert!(rep.dump().await.unwrap().is_empty());
        assert_eq!(rep.fetch_one(&addr).await.ops_seen, 0);
    }

    struct FailStore;

    #[async_trait]
    impl Store for FailStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Backend { inner: "down".into() })
        }
        async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::Backend { inner: "down".into() })
        }
        async fn del(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend { inner: "down".into() })
        }
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_fresh_entry() {
        let rep = Reputation::new(
            FailStore,
            1,
            MIN_INCLUSION_RATE_DENOMINATOR,
            THROTTLING_SLACK,
            BAN_SLACK,
            U256::from(1),
            U256::from(1),
        );
        let addr = Address::random();

        let entry = rep.fetch_one(&addr).await;
        assert_eq!(entry.ops_seen, 0);
        assert_eq!(rep.get_status(&addr).await, ReputationStatus::OK);
    }
}
