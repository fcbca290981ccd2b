//! Deep validation rules over the parsed access report

use super::{entity_name, ValidationOutcome};
use crate::{
    error::{MempoolErrorKind, ValidationError},
    reputation::Reputation,
    store::Store,
};
use cassius_contracts::trace::{AccessReport, AddressAccess};
use cassius_primitives::{
    simulation::{EXPIRATION_TIMESTAMP_DIFF, SLOT_ASSOCIATION_WINDOW},
    utils::keccak_padded_address,
    UserOperation,
};
use ethers::types::{Address, U256};

/// Enforces the deep-validation rules per observed address, excluding the
/// entry point and the sender itself
pub async fn enforce<S: Store + Clone>(
    uo: &UserOperation,
    outcome: &ValidationOutcome,
    report: &AccessReport,
    reputation: &Reputation<S>,
    entry_point: Address,
    now: u64,
) -> Result<(), MempoolErrorKind> {
    check_deadline(outcome, now)?;

    let aggregator = outcome.aggregator_info.as_ref().map(|info| info.address);
    let sender_slot_hashes = sender_slot_hashes(uo, report);

    for (addr, access) in report {
        if *addr == entry_point || *addr == uo.sender {
            continue;
        }

        let entity = entity_name(addr, uo, aggregator.as_ref());

        if let Some(opcode) = access.violations.iter().next() {
            return Err(ValidationError::BannedOpcode {
                entity: entity.to_string(),
                address: *addr,
                opcode: opcode.clone(),
            }
            .into());
        }

        if !access.value_transferred.is_zero() {
            return Err(ValidationError::ValueTransfer {
                address: *addr,
                value: access.value_transferred,
            }
            .into());
        }

        let is_entity = outcome.factory_info.as_ref().map(|i| i.address) == Some(*addr)
            || outcome.paymaster_info.as_ref().map(|i| i.address) == Some(*addr);

        if is_entity {
            check_entity_storage_writes(entity, addr, access, outcome, reputation).await?;
        } else {
            check_slot_association(addr, access, &sender_slot_hashes)?;
        }
    }

    if let Some(ref info) = outcome.aggregator_info {
        reputation.check_stake("aggregator", info).await.map_err(|err| {
            MempoolErrorKind::Validation(ValidationError::Failed { inner: err.to_string() })
        })?;
    }

    Ok(())
}

/// The validity deadline must be at least 30 seconds away; a zero deadline
/// means no expiry
fn check_deadline(outcome: &ValidationOutcome, now: u64) -> Result<(), MempoolErrorKind> {
    let deadline = outcome.return_info.deadline;
    if !deadline.is_zero() && deadline < U256::from(now + EXPIRATION_TIMESTAMP_DIFF) {
        return Err(ValidationError::Expired { deadline: deadline.low_u64() }.into());
    }
    Ok(())
}

/// Factory and paymaster storage writes are allowed only when the entity is
/// sufficiently staked
async fn check_entity_storage_writes<S: Store + Clone>(
    entity: &str,
    addr: &Address,
    access: &AddressAccess,
    outcome: &ValidationOutcome,
    reputation: &Reputation<S>,
) -> Result<(), MempoolErrorKind> {
    let Some(slot) = access.writes.keys().next() else {
        return Ok(());
    };

    let info = [outcome.factory_info.as_ref(), outcome.paymaster_info.as_ref()]
        .into_iter()
        .flatten()
        .find(|info| info.address == *addr);

    let staked = match info {
        Some(info) => reputation.check_stake(entity, info).await.is_ok(),
        None => false,
    };
    if !staked {
        return Err(ValidationError::UnstakedStorageWrite {
            entity: entity.to_string(),
            address: *addr,
            slot: format!("{slot:?}"),
        }
        .into());
    }
    Ok(())
}

/// Every slot touched by a non-entity address must fall within a slot window
/// derived from a recorded keccak preimage of the sender's padded address
fn check_slot_association(
    addr: &Address,
    access: &AddressAccess,
    sender_hashes: &[U256],
) -> Result<(), MempoolErrorKind> {
    for slot in access.reads.keys().chain(access.writes.keys()) {
        let slot_value = U256::from_big_endian(slot.as_bytes());
        let associated = sender_hashes.iter().any(|hash| {
            slot_value >= *hash
                && slot_value < hash.saturating_add(U256::from(SLOT_ASSOCIATION_WINDOW))
        });
        if !associated {
            return Err(ValidationError::SlotNotAssociated {
                address: *addr,
                slot: format!("{slot:?}"),
            }
            .into());
        }
    }
    Ok(())
}

/// Hashes of recorded keccak preimages that start with the sender's address
/// padded to 32 bytes, aggregated across all traced frames
fn sender_slot_hashes(uo: &UserOperation, report: &AccessReport) -> Vec<U256> {
    let mut padded_sender = vec![0u8; 12];
    padded_sender.extend_from_slice(uo.sender.as_bytes());

    let mut hashes: Vec<U256> = report
        .values()
        .flat_map(|access| access.keccak.iter())
        .filter(|(preimage, _)| preimage.len() >= 32 && preimage[..32] == padded_sender[..])
        .map(|(_, hash)| U256::from_big_endian(hash.as_bytes()))
        .collect();

    // the sender mapping hash itself counts even if the tracer missed the
    // preimage capture
    hashes.push(U256::from_big_endian(&keccak_padded_address(&uo.sender)));
    hashes
}
