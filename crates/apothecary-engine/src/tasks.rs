//! # Background Invoice Tasks
//!
//! Invoice generation detached from the request that scheduled it.
//!
//! ```text
//! create() ── commit ── InvoiceTask::spawn ──► response returned
//!                             │
//!                             ▼  (tokio task)
//!              Scheduled ──► Running ──► Finished(invoice status)
//!                             watch channel, observable by any handle
//! ```
//!
//! Dropping the handle never cancels the task; the terminal status also
//! lands on the transaction record.

use tokio::sync::watch;
use tracing::{debug, warn};

use apothecary_core::InvoiceStatus;

use crate::invoice::InvoicePipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Scheduled,
    Running,
    /// The transaction's invoice status once the task ended.
    Finished(InvoiceStatus),
}

/// Handle to a spawned invoice generation.
#[derive(Debug, Clone)]
pub struct InvoiceTask {
    transaction_id: String,
    state_rx: watch::Receiver<TaskState>,
}

impl InvoiceTask {
    /// Spawns generation for `transaction_id` on the current runtime.
    pub fn spawn(pipeline: InvoicePipeline, transaction_id: impl Into<String>) -> Self {
        let transaction_id = transaction_id.into();
        let (state_tx, state_rx) = watch::channel(TaskState::Scheduled);

        let id = transaction_id.clone();
        tokio::spawn(async move {
            state_tx.send_replace(TaskState::Running);

            let status = match pipeline.generate(&id).await {
                Ok(outcome) => outcome.transaction().invoice_status,
                Err(e) => {
                    warn!(id = %id, error = %e, "Background invoice generation failed");
                    InvoiceStatus::Failed
                }
            };

            debug!(id = %id, status = %status, "Background invoice task finished");
            state_tx.send_replace(TaskState::Finished(status));
        });

        InvoiceTask {
            transaction_id,
            state_rx,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn state(&self) -> TaskState {
        *self.state_rx.borrow()
    }

    /// Waits for the task to finish and returns the final invoice status.
    pub async fn wait(mut self) -> InvoiceStatus {
        loop {
            if let TaskState::Finished(status) = *self.state_rx.borrow_and_update() {
                return status;
            }
            if self.state_rx.changed().await.is_err() {
                // Sender gone without a terminal state: the task panicked.
                return match *self.state_rx.borrow() {
                    TaskState::Finished(status) => status,
                    _ => InvoiceStatus::Failed,
                };
            }
        }
    }
}
