//! Opcode-level trace parsing
//!
//! Turns the struct logs of a traced `simulateValidation` call into a
//! per-address access report: storage reads and writes, captured keccak
//! preimages, opcode violations, observed contract sizes, and accumulated
//! value transfers. The report backs the storage-access and opcode rules of
//! deep validation.

use cassius_primitives::simulation::{FORBIDDEN_OPCODES, VALUE_CALL_OPCODES};
use ethers::{
    types::{Address, Bytes, DefaultFrame, StructLog, H256, U256},
    utils::hex,
};
use std::collections::{HashMap, HashSet};

/// Largest keccak preimage worth capturing. Slot-association proofs hash one
/// or two 32-byte words, so anything beyond this is noise.
const MAX_KECCAK_PREIMAGE_LEN: usize = 512;

/// Per-address view of everything the traced call did with that address
#[derive(Clone, Debug, Default)]
pub struct AddressAccess {
    /// First observed pre-write value per read slot
    pub reads: HashMap<H256, H256>,
    /// Number of writes per slot
    pub writes: HashMap<H256, u64>,
    /// Captured keccak preimage to hash mappings
    pub keccak: HashMap<Bytes, H256>,
    /// Names of the opcode violations detected while this address was
    /// executing
    pub violations: HashSet<String>,
    /// Contract byte size, when observed via EXTCODESIZE
    pub contract_size: u64,
    /// Total value transferred to this address
    pub value_transferred: U256,
}

/// Map from address to its recorded accesses, produced once per validation
/// trace
pub type AccessReport = HashMap<Address, AddressAccess>;

/// Parses the struct logs of one traced call into an [AccessReport]
///
/// Tracks a per-depth current-address stack seeded with the entry point;
/// CALL-family opcodes and CREATE/CREATE2 push the callee (or deployed
/// address) for deeper steps. Steps whose stack carries fewer elements than
/// the opcode requires indicate a tracer quirk and are skipped with a
/// warning.
pub fn parse_trace(frame: &DefaultFrame, entry_point: Address) -> AccessReport {
    let mut report = AccessReport::new();
    // addr_stack[d - 1] is the executing address at depth d
    let mut addr_stack: Vec<Address> = vec![entry_point];

    let steps = &frame.struct_logs;
    for (idx, step) in steps.iter().enumerate() {
        let depth = step.depth as usize;
        if depth == 0 {
            tracing::warn!("struct log with zero depth at pc {pc}, skipping", pc = step.pc);
            continue;
        }
        addr_stack.truncate(depth);
        let Some(current) = addr_stack.last().copied() else {
            tracing::warn!("struct log skipped a depth level at pc {pc}, skipping", pc = step.pc);
            continue;
        };

        let op = step.op.as_str();

        if step.depth > 1 && FORBIDDEN_OPCODES.contains(op) {
            report.entry(current).or_default().violations.insert(op.to_string());
        }

        match op {
            "CALL" | "CALLCODE" | "STATICCALL" | "DELEGATECALL" => {
                let Some(target) = stack_peek(step, 1).map(to_address) else {
                    warn_malformed(step);
                    continue;
                };
                report.entry(target).or_default();

                if VALUE_CALL_OPCODES.contains(op) {
                    let Some(value) = stack_peek(step, 2) else {
                        warn_malformed(step);
                        continue;
                    };
                    if !value.is_zero() {
                        let access = report.entry(target).or_default();
                        access.value_transferred =
                            access.value_transferred.saturating_add(value);
                    }
                }

                if descends(steps, idx) {
                    addr_stack.push(target);
                }
            }
            "CREATE" | "CREATE2" => {
                // the deployed address shows up on our stack once the
                // constructor frame returns
                let deployed = steps[idx + 1..]
                    .iter()
                    .find(|s| s.depth == step.depth)
                    .and_then(|s| stack_peek(s, 0))
                    .map(to_address);
                if let Some(deployed) = deployed {
                    report.entry(deployed).or_default();
                    if descends(steps, idx) {
                        addr_stack.push(deployed);
                    }
                } else if descends(steps, idx) {
                    // constructor ran but the trace ends inside it
                    addr_stack.push(Address::zero());
                }
            }
            "SLOAD" => {
                let Some(slot) = stack_peek(step, 0).map(to_h256) else {
                    warn_malformed(step);
                    continue;
                };
                let value = step
                    .storage
                    .as_ref()
                    .and_then(|s| s.get(&slot).copied())
                    .or_else(|| next_step_same_depth(steps, idx).and_then(|s| stack_peek(s, 0)).map(to_h256));
                let Some(value) = value else {
                    warn_malformed(step);
                    continue;
                };
                let access = report.entry(current).or_default();
                if !access.writes.contains_key(&slot) {
                    access.reads.entry(slot).or_insert(value);
                }
            }
            "SSTORE" => {
                let Some(slot) = stack_peek(step, 0).map(to_h256) else {
                    warn_malformed(step);
                    continue;
                };
                *report.entry(current).or_default().writes.entry(slot).or_insert(0) += 1;
            }
            "KECCAK256" | "SHA3" => {
                let (Some(offset), Some(len)) = (stack_peek(step, 0), stack_peek(step, 1)) else {
                    warn_malformed(step);
                    continue;
                };
                let Some(preimage) = read_memory(step, offset, len) else {
                    continue;
                };
                let Some(hash) =
                    next_step_same_depth(steps, idx).and_then(|s| stack_peek(s, 0)).map(to_h256)
                else {
                    continue;
                };
                report.entry(current).or_default().keccak.insert(preimage, hash);
            }
            "GAS" => {
                if step.depth > 1 {
                    let followed_by_call = next_step_same_depth(steps, idx).is_some_and(|s| {
                        matches!(s.op.as_str(), "CALL" | "CALLCODE" | "STATICCALL" | "DELEGATECALL")
                    });
                    if !followed_by_call {
                        report.entry(current).or_default().violations.insert("GAS".to_string());
                    }
                }
            }
            "EXTCODESIZE" => {
                let Some(target) = stack_peek(step, 0).map(to_address) else {
                    warn_malformed(step);
                    continue;
                };
                if let Some(size) =
                    next_step_same_depth(steps, idx).and_then(|s| stack_peek(s, 0))
                {
                    report.entry(target).or_default().contract_size = size.low_u64();
                }
            }
            _ => {}
        }
    }

    report
}

fn warn_malformed(step: &StructLog) {
    tracing::warn!(
        "malformed stack for {op} at pc {pc}, skipping step",
        op = step.op,
        pc = step.pc
    );
}

/// Whether execution actually entered a deeper frame after the step at `idx`
fn descends(steps: &[StructLog], idx: usize) -> bool {
    steps.get(idx + 1).is_some_and(|s| s.depth == steps[idx].depth + 1)
}

/// Next step executed in the same frame as `idx`, carrying the result the
/// opcode at `idx` pushed
fn next_step_same_depth(steps: &[StructLog], idx: usize) -> Option<&StructLog> {
    steps[idx + 1..].iter().find(|s| s.depth <= steps[idx].depth).filter(|s| s.depth == steps[idx].depth)
}

/// Stack element `n` positions below the top, if present
fn stack_peek(step: &StructLog, n: usize) -> Option<U256> {
    let stack = step.stack.as_ref()?;
    if stack.len() > n {
        Some(stack[stack.len() - 1 - n])
    } else {
        None
    }
}

fn to_address(val: U256) -> Address {
    let mut buf = [0u8; 32];
    val.to_big_endian(&mut buf);
    Address::from_slice(&buf[12..])
}

fn to_h256(val: U256) -> H256 {
    let mut buf = [0u8; 32];
    val.to_big_endian(&mut buf);
    H256::from(buf)
}

/// Reads `[offset, offset + len)` out of the step's memory words
fn read_memory(step: &StructLog, offset: U256, len: U256) -> Option<Bytes> {
    if len.is_zero() || len > U256::from(MAX_KECCAK_PREIMAGE_LEN) {
        return None;
    }
    if offset > U256::from(usize::MAX) {
        return None;
    }
    let offset = offset.as_usize();
    let len = len.as_usize();

    let words = step.memory.as_ref()?;
    let mut mem = Vec::with_capacity(words.len() * 32);
    for word in words {
        mem.extend_from_slice(&hex::decode(word.trim_start_matches("0x")).ok()?);
    }

    if offset + len > mem.len() {
        return None;
    }
    Some(Bytes::from(mem[offset..offset + len].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ep() -> Address {
        "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap()
    }

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    fn step(depth: u64, op: &str, stack: Vec<&str>) -> StructLog {
        step_with(depth, op, stack, json!({}))
    }

    fn step_with(depth: u64, op: &str, stack: Vec<&str>, extra: serde_json::Value) -> StructLog {
        let mut value = json!({
            "depth": depth,
            "gas": 100000,
            "gasCost": 3,
            "op": op,
            "pc": 0,
            "stack": stack,
        });
        if let (Some(obj), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(value).unwrap()
    }

    fn frame(struct_logs: Vec<StructLog>) -> DefaultFrame {
        serde_json::from_value(json!({
            "failed": false,
            "gas": "0x5208",
            "returnValue": "0x",
            "structLogs": [],
        }))
        .map(|mut f: DefaultFrame| {
            f.struct_logs = struct_logs;
            f
        })
        .unwrap()
    }

    fn addr_hex(a: Address) -> String {
        format!("{a:#x}")
    }

    #[test]
    fn call_attributes_storage_writes_to_callee() {
        let account = addr(0xaa);
        let logs = vec![
            step(1, "CALL", vec!["0x0", &addr_hex(account), "0x5208"]),
            // the slot sits on the stack top, both writes hit slot 0x2a
            step(2, "SSTORE", vec!["0x1", "0x2a"]),
            step(2, "SSTORE", vec!["0x2b", "0x2a"]),
        ];
        let report = parse_trace(&frame(logs), ep());

        let access = report.get(&account).expect("callee registered");
        assert_eq!(access.writes.get(&H256::from_low_u64_be(42)), Some(&2));
        assert!(report.get(&ep()).map_or(true, |a| a.writes.is_empty()));
    }

    #[test]
    fn sload_first_read_wins() {
        let account = addr(0xaa);
        let logs = vec![
            step(1, "CALL", vec!["0x0", &addr_hex(account), "0x5208"]),
            step_with(
                2,
                "SLOAD",
                vec!["0x5"],
                json!({"storage": {format!("{:#066x}", 5): format!("{:#066x}", 7)}}),
            ),
            step(2, "POP", vec!["0x7"]),
            step_with(
                2,
                "SLOAD",
                vec!["0x5"],
                json!({"storage": {format!("{:#066x}", 5): format!("{:#066x}", 9)}}),
            ),
        ];
        let report = parse_trace(&frame(logs), ep());

        let access = report.get(&account).unwrap();
        assert_eq!(access.reads.get(&H256::from_low_u64_be(5)), Some(&H256::from_low_u64_be(7)));
    }

    #[test]
    fn sload_value_falls_back_to_next_step_stack() {
        let account = addr(0xaa);
        let logs = vec![
            step(1, "CALL", vec!["0x0", &addr_hex(account), "0x5208"]),
            step(2, "SLOAD", vec!["0x5"]),
            step(2, "POP", vec!["0x2a"]),
        ];
        let report = parse_trace(&frame(logs), ep());

        let access = report.get(&account).unwrap();
        assert_eq!(access.reads.get(&H256::from_low_u64_be(5)), Some(&H256::from_low_u64_be(42)));
    }

    #[test]
    fn keccak_preimage_captured_with_hash_from_next_step() {
        let account = addr(0xaa);
        let word = "11".repeat(32);
        let logs = vec![
            step(1, "CALL", vec!["0x0", &addr_hex(account), "0x5208"]),
            step_with(2, "SHA3", vec!["0x20", "0x0"], json!({"memory": [word]})),
            step(2, "POP", vec!["0xdeadbeef"]),
        ];
        let report = parse_trace(&frame(logs), ep());

        let access = report.get(&account).unwrap();
        let preimage = Bytes::from(vec![0x11; 32]);
        assert_eq!(access.keccak.get(&preimage), Some(&H256::from_low_u64_be(0xdeadbeef)));
    }

    #[test]
    fn gas_not_followed_by_call_is_flagged() {
        let account = addr(0xaa);
        let logs = vec![
            step(1, "CALL", vec!["0x0", &addr_hex(account), "0x5208"]),
            step(2, "GAS", vec![]),
            step(2, "POP", vec!["0x5208"]),
        ];
        let report = parse_trace(&frame(logs), ep());
        assert!(report.get(&account).unwrap().violations.contains("GAS"));
    }

    #[test]
    fn gas_followed_by_call_is_allowed() {
        let account = addr(0xaa);
        let other = addr(0xbb);
        let logs = vec![
            step(1, "CALL", vec!["0x0", &addr_hex(account), "0x5208"]),
            step(2, "GAS", vec![]),
            step(2, "STATICCALL", vec!["0x0", &addr_hex(other), "0x5208"]),
        ];
        let report = parse_trace(&frame(logs), ep());
        assert!(report.get(&account).map_or(true, |a| a.violations.is_empty()));
    }

    #[test]
    fn banned_opcode_flagged_below_top_level_only() {
        let account = addr(0xaa);
        let logs = vec![
            step(1, "TIMESTAMP", vec![]),
            step(1, "CALL", vec!["0x0", &addr_hex(account), "0x5208"]),
            step(2, "TIMESTAMP", vec![]),
        ];
        let report = parse_trace(&frame(logs), ep());

        assert!(report.get(&account).unwrap().violations.contains("TIMESTAMP"));
        assert!(report.get(&ep()).map_or(true, |a| a.violations.is_empty()));
    }

    #[test]
    fn value_transfers_accumulate_per_target() {
        let target = addr(0xcc);
        let logs = vec![
            step(1, "CALL", vec!["0x64", &addr_hex(target), "0x5208"]),
            step(1, "CALL", vec!["0x36", &addr_hex(target), "0x5208"]),
        ];
        let report = parse_trace(&frame(logs), ep());
        assert_eq!(report.get(&target).unwrap().value_transferred, U256::from(0x9a));
    }

    #[test]
    fn malformed_stack_is_skipped() {
        let logs = vec![
            step(1, "CALL", vec![]),
            step(1, "SSTORE", vec![]),
            step(1, "SLOAD", vec![]),
        ];
        // must not panic, and nothing gets recorded
        let report = parse_trace(&frame(logs), ep());
        assert!(report.values().all(|a| a.writes.is_empty() && a.reads.is_empty()));
    }

    #[test]
    fn extcodesize_records_contract_size() {
        let target = addr(0xdd);
        let logs = vec![
            step(1, "EXTCODESIZE", vec![&addr_hex(target)]),
            step(1, "POP", vec!["0x1234"]),
        ];
        let report = parse_trace(&frame(logs), ep());
        assert_eq!(report.get(&target).unwrap().contract_size, 0x1234);
    }
}
