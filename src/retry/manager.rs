//! The FIFO queue of in-flight [`Transaction`]s.

use std::collections::VecDeque;

use super::{Transaction, TransactionOutcome};
use crate::collaborators::Publication;
use crate::error::GatewayError;
use crate::ids::CorrelationId;

/// Holds a FIFO queue of in-flight [`Transaction`]s keyed by
/// `correlation_id`. [`has_pending`](Self::has_pending) prevents duplicate
/// issuance: callers check it first and only call
/// [`first_attempt`](Self::first_attempt) when no transaction for that
/// correlation is already in flight.
#[derive(Default)]
pub struct RetryManager {
    in_flight: VecDeque<Transaction>,
}

impl RetryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `correlation_id` already has a pending
    /// transaction (the caller must abort rather than start a second one).
    pub fn has_pending(&self, correlation_id: CorrelationId) -> bool {
        self.in_flight
            .iter()
            .any(|txn| txn.correlation_id() == correlation_id)
    }

    /// Enqueue a brand-new transaction. Callers must first check
    /// [`has_pending`](Self::has_pending) to satisfy the
    /// at-most-one-in-flight-per-correlation invariant.
    pub fn first_attempt(&mut self, transaction: Transaction) {
        self.in_flight.push_back(transaction);
    }

    /// Advance each in-flight transaction by at most one step. Returns the
    /// number of continuations that completed this pass (the unit of
    /// "work done").
    ///
    /// A transaction that errors is dropped from the queue and its error
    /// returned to the caller via `on_error`, so one failing transaction
    /// cannot block every other transaction behind it in the FIFO.
    pub fn attempt_steps(
        &mut self,
        inbound: &mut dyn Publication,
        mut on_error: impl FnMut(GatewayError),
    ) -> usize {
        let mut work_done = 0;
        let pending = std::mem::take(&mut self.in_flight);

        for mut txn in pending {
            match txn.attempt(inbound) {
                Ok(TransactionOutcome::Complete) => {
                    work_done += 1;
                }
                Ok(TransactionOutcome::StillPending) => {
                    work_done += 1;
                    self.in_flight.push_back(txn);
                }
                Err(err) => {
                    on_error(err);
                }
            }
        }

        work_done
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
