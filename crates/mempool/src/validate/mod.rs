//! User operation validation
//!
//! Two depths: the shallow path static-calls `simulateValidation` and decodes
//! its structured revert; the deep path additionally replays the call under
//! the struct-log tracer and enforces the storage-access and opcode rules on
//! the parsed report.

pub mod rules;
pub mod utils;

use crate::{
    error::{MempoolErrorKind, ValidationError},
    reputation::Reputation,
    store::Store,
};
use cassius_contracts::{trace::parse_trace, EntryPoint, EntryPointError, ReturnInfo};
use cassius_primitives::{
    provider::retry_rpc_call, reputation::StakeInfo, utils::unix_timestamp_secs, UserOperation,
};
use ethers::{providers::Middleware, types::Address};

/// Decoded result of a successful validation
#[derive(Clone, Debug)]
pub struct ValidationOutcome {
    pub return_info: ReturnInfo,
    pub sender_info: StakeInfo,
    pub factory_info: Option<StakeInfo>,
    pub paymaster_info: Option<StakeInfo>,
    pub aggregator_info: Option<StakeInfo>,
}

#[derive(Clone)]
pub struct ValidationEngine<M: Middleware + 'static, S: Store + Clone> {
    entry_point: EntryPoint<M>,
    reputation: Reputation<S>,
}

impl<M: Middleware + 'static, S: Store + Clone> ValidationEngine<M, S> {
    pub fn new(entry_point: EntryPoint<M>, reputation: Reputation<S>) -> Self {
        Self { entry_point, reputation }
    }

    pub fn entry_point(&self) -> &EntryPoint<M> {
        &self.entry_point
    }

    /// Shallow validation: a single `simulateValidation` static call, its
    /// structured revert decoded into stake infos and return info
    pub async fn call_simulate_validation(
        &self,
        uo: &UserOperation,
    ) -> Result<ValidationOutcome, MempoolErrorKind> {
        match self.entry_point.simulate_validation(uo.clone()).await {
            Ok(res) => Ok(utils::extract_outcome(uo, res)),
            Err(err) => Err(Self::validation_failure(uo, err)),
        }
    }

    /// Deep validation: shallow validation plus a traced replay with the
    /// access rules enforced on the parsed report
    pub async fn simulate_complete_validation(
        &self,
        uo: &UserOperation,
    ) -> Result<ValidationOutcome, MempoolErrorKind> {
        let outcome = self.call_simulate_validation(uo).await?;

        let frame = retry_rpc_call(|| self.entry_point.simulate_validation_trace(uo.clone()))
            .await
            .map_err(MempoolErrorKind::from)?;
        let report = parse_trace(&frame, self.entry_point.address());

        rules::enforce(
            uo,
            &outcome,
            &report,
            &self.reputation,
            self.entry_point.address(),
            unix_timestamp_secs(),
        )
        .await?;

        Ok(outcome)
    }

    /// A revert that is not a ValidationResult is attributed to the paymaster
    /// when a non-zero one participated
    fn validation_failure(uo: &UserOperation, err: EntryPointError) -> MempoolErrorKind {
        match err {
            EntryPointError::FailedOp(op) => match uo.paymaster().filter(|p| !p.is_zero()) {
                Some(paymaster) => MempoolErrorKind::Validation(
                    ValidationError::RejectedByPaymaster { paymaster, inner: op.reason },
                ),
                None => MempoolErrorKind::Validation(ValidationError::Failed { inner: op.reason }),
            },
            EntryPointError::ExecutionReverted(reason) => {
                MempoolErrorKind::Validation(ValidationError::Failed { inner: reason })
            }
            EntryPointError::Provider { inner } => MempoolErrorKind::Provider { inner },
            other => {
                MempoolErrorKind::Validation(ValidationError::Failed { inner: other.to_string() })
            }
        }
    }
}

/// Resolves the role an address plays in the user operation, for error
/// messages
pub(crate) fn entity_name(
    addr: &Address,
    uo: &UserOperation,
    aggregator: Option<&Address>,
) -> &'static str {
    if *addr == uo.sender {
        "sender"
    } else if uo.factory().is_some_and(|f| f == *addr) {
        "factory"
    } else if uo.paymaster().is_some_and(|p| p == *addr) {
        "paymaster"
    } else if aggregator.is_some_and(|a| a == addr) {
        "aggregator"
    } else {
        "contract"
    }
}
