//! # warden-approval
//!
//! Owner sign-off for APPROVAL-tier transactions: building sign requests,
//! verifying the responses, committing decisions, and the owner lifecycle.

pub mod owner;
pub mod sign_request;
pub mod sign_response;
pub mod verifier;
pub mod workflow;

pub use owner::{OwnerLifecycle, downgrade_if_no_owner};
pub use sign_request::{SignRequestBuilder, format_units};
pub use sign_response::{EVICTION_GRACE_SECS, SignResponseHandler, VerifiedResponse};
pub use verifier::{Ed25519Verifier, Eip191Verifier, SignatureVerifier, VerifierRegistry};
pub use workflow::{ApprovalOutcome, ApprovalWorkflow, DEFAULT_APPROVAL_TIMEOUT_SECS};
