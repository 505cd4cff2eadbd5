use chrono::{DateTime, Utc};
use tracing::{debug, info};

use warden_config::schema::PolicyConfig;
use warden_core::{Result, Transaction, TransactionRequest, WalletId};
use warden_store::{Store, policies};

use crate::evaluator::{EvaluationInput, PolicyDecision, PolicyEvaluator, RequestLeg};
use crate::ledger::ReservationLedger;
use crate::rules::ResolvedPolicies;

/// Ties the evaluator to the store.
///
/// `evaluate_and_reserve` runs inside one IMMEDIATE transaction: policy
/// load, spend snapshot, evaluation and reservation write all commit
/// together, so two concurrent requests for the same wallet serialize and
/// the second sees the first's reservation.
pub struct PolicyEngine {
    store: Store,
    evaluator: PolicyEvaluator,
}

impl PolicyEngine {
    pub fn new(store: Store, config: &PolicyConfig) -> Self {
        Self {
            store,
            evaluator: PolicyEvaluator::from_config(config),
        }
    }

    pub fn with_evaluator(store: Store, evaluator: PolicyEvaluator) -> Self {
        Self { store, evaluator }
    }

    pub fn evaluator_mut(&mut self) -> &mut PolicyEvaluator {
        &mut self.evaluator
    }

    /// Evaluate `tx` and, when allowed, write its tier and reservation.
    pub fn evaluate_and_reserve(
        &self,
        tx: &Transaction,
        usd_amount: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PolicyDecision> {
        let input = input_for(tx.wallet_id, &tx.network, &tx.request, usd_amount)?;

        let decision = self.store.with_immediate(|conn| {
            let applicable = policies::applicable_policies(conn, tx.wallet_id, &tx.network)?;
            let resolved = ResolvedPolicies::resolve(&applicable)?;
            let snapshot = ReservationLedger::snapshot(conn, tx.wallet_id, now)?;
            let decision = self.evaluator.evaluate(&input, &resolved, &snapshot);
            if decision.allowed {
                ReservationLedger::reserve(conn, tx.id, decision.tier, usd_amount, input.native_amount)?;
            }
            debug!(
                tx_id = %tx.id,
                daily = snapshot.daily,
                monthly = snapshot.monthly,
                reserved_native = %snapshot.reserved_native,
                tier = %decision.tier,
                "policy evaluated"
            );
            Ok(decision)
        })?;

        if let Some(warning) = &decision.cumulative_warning {
            info!(
                wallet_id = %tx.wallet_id,
                window = warning.window.as_str(),
                ratio = warning.ratio,
                "approaching cumulative limit"
            );
        }
        Ok(decision)
    }

    /// Evaluate without reserving anything.
    pub fn preview(
        &self,
        wallet_id: WalletId,
        network: &str,
        request: &TransactionRequest,
        usd_amount: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PolicyDecision> {
        let input = input_for(wallet_id, network, request, usd_amount)?;
        let conn = self.store.conn();
        let applicable = policies::applicable_policies(&conn, wallet_id, network)?;
        let resolved = ResolvedPolicies::resolve(&applicable)?;
        let snapshot = ReservationLedger::snapshot(&conn, wallet_id, now)?;
        Ok(self.evaluator.evaluate(&input, &resolved, &snapshot))
    }
}

fn input_for(
    wallet_id: WalletId,
    network: &str,
    request: &TransactionRequest,
    usd_amount: Option<f64>,
) -> Result<EvaluationInput> {
    Ok(EvaluationInput {
        wallet_id,
        tx_type: request.tx_type(),
        destinations: request.destinations().into_iter().map(str::to_string).collect(),
        network: network.to_string(),
        native_amount: request.native_amount()?,
        usd_amount,
        legs: RequestLeg::from_request(request),
    })
}
