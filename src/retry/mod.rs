//! Transactions as continuations.
//!
//! Idempotent multi-step operations are modeled as a list of continuations
//! returning `{Complete, BackPressured, Abort}`. A tagged-variant return
//! type plus a cursor-per-transaction replaces exception-based control
//! flow; state lives in the Transaction, not the stack.

mod manager;

pub use manager::RetryManager;

use crate::collaborators::Publication;
use crate::error::GatewayError;
use crate::ids::CorrelationId;

/// Outcome of attempting a single [`Continuation`].
#[derive(Debug)]
pub enum ContinuationResult {
    Complete,
    BackPressured,
    Abort(GatewayError),
}

/// A single resumable step within a [`Transaction`]. Must be idempotent or
/// replay-safe: back-pressure means it may be invoked repeatedly before it
/// finally returns `Complete`.
///
/// Every continuation the Framer enqueues ultimately bottoms out in a
/// publish to the inbound stream (`ManageConnection`, `Logon`, `Catchup`,
/// a typed reply, ...), so `attempt` is handed the inbound [`Publication`]
/// directly rather than requiring each continuation to hold its own
/// reference to shared Framer state.
pub trait Continuation: Send {
    fn attempt(&mut self, inbound: &mut dyn Publication) -> ContinuationResult;

    /// Label used in `tracing` spans; purely diagnostic.
    fn label(&self) -> &'static str {
        "continuation"
    }
}

/// Result of driving a [`Transaction`] forward by one pass.
#[derive(Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Every continuation has now returned `Complete`, in order.
    Complete,
    /// A continuation returned `BackPressured`; the cursor did not move.
    /// Resume at the same continuation next pass.
    StillPending,
}

/// An ordered sequence of [`Continuation`]s plus an internal cursor.
pub struct Transaction {
    correlation_id: CorrelationId,
    continuations: Vec<Box<dyn Continuation>>,
    cursor: usize,
}

impl Transaction {
    pub fn new(correlation_id: CorrelationId, continuations: Vec<Box<dyn Continuation>>) -> Self {
        Self {
            correlation_id,
            continuations,
            cursor: 0,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Advance the transaction by at most one Continuation (the one at the
    /// cursor). On `Complete`, the cursor moves past it; the transaction is
    /// `Complete` only once that was the last continuation, otherwise the
    /// caller sees `StillPending` and the next continuation runs on the
    /// next pass. On `BackPressured`, the cursor does not move. On `Abort`,
    /// propagates as fatal. This one-continuation-per-pass bound is what
    /// makes a transaction of `n` continuations complete after exactly
    /// `n + total BACK_PRESSURED responses` passes.
    pub fn attempt(&mut self, inbound: &mut dyn Publication) -> Result<TransactionOutcome, GatewayError> {
        if self.cursor >= self.continuations.len() {
            return Ok(TransactionOutcome::Complete);
        }

        match self.continuations[self.cursor].attempt(inbound) {
            ContinuationResult::Complete => {
                self.cursor += 1;
                if self.cursor >= self.continuations.len() {
                    Ok(TransactionOutcome::Complete)
                } else {
                    Ok(TransactionOutcome::StillPending)
                }
            }
            ContinuationResult::BackPressured => Ok(TransactionOutcome::StillPending),
            ContinuationResult::Abort(err) => Err(err),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.continuations.len()
    }
}
