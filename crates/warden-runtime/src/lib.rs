//! # warden-runtime
//!
//! The transaction pipeline and the services around it: delay queue, kill
//! switch, auto-stop, sweeper, and the [`WalletDaemon`] facade.
//!
//! ## Architecture
//!
//! ```text
//!        submit(request)
//!              │
//!              ▼
//!      ┌───────────────┐
//!      │ 1. Validate   │  ← sync: shape, network, PENDING row
//!      └──────┬────────┘
//!             │ spawned on the TaskTracker
//!             ▼
//!      ┌───────────────┐
//!      │ 2. Auth       │  ← session verifier
//!      │ 3. Policy     │  ← USD value, tier, reservation
//!      │ 4. Wait       │──── DELAY ────▶ Delay Queue ───┐
//!      │               │──── APPROVAL ─▶ Approvals ─────┤
//!      │ 5. Execute    │◀── resume ─────── Sweeper ◀────┘
//!      │ 6. Confirm    │
//!      └──────┬────────┘
//!             │ events
//!             ▼
//!      ┌───────────────┐      ┌─────────────┐
//!      │   Event Bus   │─────▶│  Auto-Stop  │──▶ Kill Switch
//!      └───────────────┘      └─────────────┘
//! ```

pub mod autostop;
pub mod daemon;
pub mod delay_queue;
pub mod kill_switch;
pub mod pipeline;
pub mod sweeper;
pub mod usd;

pub use autostop::{AutoStop, AutoStopRule, AutoStopTrigger, ConsecutiveFailuresRule, UnusualActivityRule};
pub use daemon::{DaemonBuilder, SubmitReceipt, SubmitRequest, WalletDaemon, notifications_from_config};
pub use delay_queue::DelayQueue;
pub use kill_switch::{KillSwitch, KillSwitchInfo};
pub use pipeline::{AdapterRegistry, Collaborators, HaltReason, Pipeline, PipelineContext, StageOutcome};
pub use sweeper::{SweepReport, Sweeper};
pub use usd::resolve_effective_amount_usd;
