use std::sync::Arc;

use chrono::Utc;
use console::style;

use warden_approval::{ApprovalOutcome, ApprovalWorkflow, VerifierRegistry};
use warden_channels::ChannelRouter;
use warden_config::WardenConfig;
use warden_core::{EventBus, Result, Transaction, TxStatus};
use warden_store::Store;

use super::{ApprovalAction, TxAction, open_store};

pub(super) fn cmd_tx(config: &WardenConfig, action: TxAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        TxAction::List {
            wallet,
            status,
            limit,
            json,
        } => {
            let txs = store.list_transactions(wallet, status, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&txs)?);
                return Ok(());
            }
            if txs.is_empty() {
                println!("No transactions.");
            }
            for tx in &txs {
                println!("{}", summary_line(tx));
            }
        }
        TxAction::Show { tx_id } => {
            let tx = store.get_transaction(tx_id)?;
            println!("{}", serde_json::to_string_pretty(&tx)?);
            if let Some(approval) = store.approval_for_tx(tx_id)? {
                println!(
                    "approval: required_by={} expires_at={} channel={} decided={}",
                    approval.required_by,
                    approval.expires_at.to_rfc3339(),
                    approval.approval_channel.as_deref().unwrap_or("none"),
                    approval.is_decided()
                );
            }
        }
    }
    Ok(())
}

fn summary_line(tx: &Transaction) -> String {
    let status = match tx.status {
        TxStatus::Confirmed => style(tx.status.as_str()).green(),
        TxStatus::Failed | TxStatus::Expired => style(tx.status.as_str()).red(),
        TxStatus::Queued => style(tx.status.as_str()).yellow(),
        _ => style(tx.status.as_str()).white(),
    };
    let usd = tx
        .amount_usd
        .map(|u| format!("${u:.2}"))
        .unwrap_or_else(|| "-".into());
    format!(
        "{}  {:<14} {:<10} {:<8} {:>24} {:>10}  {}",
        tx.id,
        tx.tx_type.as_str(),
        status,
        tx.tier.map(|t| t.as_str()).unwrap_or("-"),
        tx.amount,
        usd,
        tx.created_at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Decisions made here are unsigned operator decisions. Nothing is dispatched,
/// so the router is empty; the daemon executes approved rows on its next sweep.
fn offline_workflow(config: &WardenConfig, store: Store) -> ApprovalWorkflow {
    ApprovalWorkflow::from_config(
        config,
        store,
        Arc::new(ChannelRouter::new()),
        VerifierRegistry::default(),
        EventBus::default(),
    )
}

pub(super) fn cmd_approvals(config: &WardenConfig, action: ApprovalAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        ApprovalAction::List => {
            let pending = store.undecided_approvals()?;
            if pending.is_empty() {
                println!("No approvals pending.");
                return Ok(());
            }
            let now = Utc::now();
            for a in pending {
                let left = (a.expires_at - now).num_seconds();
                let deadline = if left > 0 {
                    format!("{left}s left")
                } else {
                    style("overdue").red().to_string()
                };
                println!(
                    "{}  owner {}  via {}  {deadline}",
                    a.tx_id,
                    a.required_by,
                    a.approval_channel.as_deref().unwrap_or("none")
                );
            }
        }
        ApprovalAction::Approve { tx_id } => {
            let outcome = offline_workflow(config, store).approve(tx_id, None, Utc::now())?;
            report(outcome);
        }
        ApprovalAction::Reject { tx_id } => {
            let outcome = offline_workflow(config, store).reject(tx_id, Utc::now())?;
            report(outcome);
        }
        ApprovalAction::Expire => {
            let expired = offline_workflow(config, store).process_expired(Utc::now())?;
            println!("Expired {} approval(s)", expired.len());
            for tx_id in expired {
                println!("  {tx_id}");
            }
        }
    }
    Ok(())
}

fn report(outcome: ApprovalOutcome) {
    match outcome {
        ApprovalOutcome::Approved { tx_id, .. } => {
            println!("✅ {tx_id} approved, it executes on the daemon's next sweep");
        }
        ApprovalOutcome::Rejected { tx_id, .. } => {
            println!("🚫 {tx_id} rejected and cancelled");
        }
    }
}
