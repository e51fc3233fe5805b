//! # Invoice Pipeline
//!
//! Renders, stores and records an invoice at most once per transaction at
//! a time.
//!
//! ## Status Progression
//! ```text
//!   none ──► pending ──► generating ──┬──► completed
//!     ▲                    ▲          └──► failed ──┐
//!     │                    └────────────────────────┘ retry
//!     └── reset (regenerate / restore), refused while generating
//! ```
//!
//! ## Exactly-Once Under Concurrency
//! ```text
//! caller A ── try_lock_invoice ✓ ── render ── upload ── complete_invoice
//! caller B ── try_lock_invoice ✗ ── Skipped { current state }
//! caller C ── try_lock_invoice ✗ ── Skipped { current state }
//! ```
//! The lock is one conditional UPDATE, so it holds across processes.
//! A failure after the lock is recorded as `failed` with its message; the
//! transaction itself is never rolled back because of an invoice.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use apothecary_core::invoice::{invoice_relative_path, InvoiceDocument, InvoiceIssuer};
use apothecary_core::pricing::total_drift;
use apothecary_core::{InvoiceStatus, Transaction};
use apothecary_db::{Database, TransactionRepository};

use crate::collaborators::{InvoiceRenderer, RemoteStorage};
use crate::error::{EngineError, EngineResult};

/// What an invoice request ended with.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvoiceOutcome {
    /// Rendered and stored by this call.
    Generated {
        transaction: Transaction,
        download_url: String,
    },
    /// A completed invoice already existed.
    Existing {
        transaction: Transaction,
        download_url: String,
    },
    /// Another caller holds the lock or finished first.
    Skipped { transaction: Transaction },
    /// Rendering or upload failed; recorded on the transaction.
    Failed {
        transaction: Transaction,
        error: String,
    },
}

impl InvoiceOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            InvoiceOutcome::Generated { transaction, .. }
            | InvoiceOutcome::Existing { transaction, .. }
            | InvoiceOutcome::Skipped { transaction }
            | InvoiceOutcome::Failed { transaction, .. } => transaction,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            InvoiceOutcome::Generated { transaction, .. }
            | InvoiceOutcome::Existing { transaction, .. }
            | InvoiceOutcome::Skipped { transaction }
            | InvoiceOutcome::Failed { transaction, .. } => transaction,
        }
    }

    pub fn download_url(&self) -> Option<&str> {
        match self {
            InvoiceOutcome::Generated { download_url, .. }
            | InvoiceOutcome::Existing { download_url, .. } => Some(download_url),
            InvoiceOutcome::Skipped { .. } | InvoiceOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            InvoiceOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, InvoiceOutcome::Skipped { .. })
    }
}

#[derive(Clone)]
pub struct InvoicePipeline {
    db: Database,
    transactions: TransactionRepository,
    renderer: Arc<dyn InvoiceRenderer>,
    storage: Arc<dyn RemoteStorage>,
    storage_root: PathBuf,
    issuer: InvoiceIssuer,
}

impl std::fmt::Debug for InvoicePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoicePipeline")
            .field("storage_root", &self.storage_root)
            .field("issuer", &self.issuer.name)
            .finish_non_exhaustive()
    }
}

impl InvoicePipeline {
    pub fn new(
        db: Database,
        renderer: Arc<dyn InvoiceRenderer>,
        storage: Arc<dyn RemoteStorage>,
        storage_root: impl Into<PathBuf>,
        issuer: InvoiceIssuer,
    ) -> Self {
        InvoicePipeline {
            transactions: db.transactions(),
            db,
            renderer,
            storage,
            storage_root: storage_root.into(),
            issuer,
        }
    }

    /// Runs the pipeline if the lock can be taken.
    pub async fn generate(&self, id: &str) -> EngineResult<InvoiceOutcome> {
        if !self.transactions.try_lock_invoice(id).await? {
            let transaction = self.load(id).await?;
            debug!(
                transaction_number = %transaction.transaction_number,
                invoice_status = %transaction.invoice_status,
                "Invoice generation skipped, lock held or already done"
            );
            return Ok(InvoiceOutcome::Skipped { transaction });
        }

        match self.render_locked(id).await {
            Ok(download_url) => {
                let transaction = self.load(id).await?;
                info!(
                    transaction_number = %transaction.transaction_number,
                    invoice_number = transaction.invoice_number.as_deref().unwrap_or_default(),
                    "Invoice generated"
                );
                Ok(InvoiceOutcome::Generated {
                    transaction,
                    download_url,
                })
            }
            Err(err) => {
                let error = err.to_string();
                warn!(id = %id, error = %error, "Invoice generation failed");
                self.transactions.fail_invoice(id, &error).await?;
                let transaction = self.load(id).await?;
                Ok(InvoiceOutcome::Failed { transaction, error })
            }
        }
    }

    /// Returns the existing invoice if its file is present, else generates one.
    pub async fn ensure_invoice(&self, id: &str) -> EngineResult<InvoiceOutcome> {
        let transaction = self.load(id).await?;

        if transaction.invoice_generated && transaction.invoice_status == InvoiceStatus::Completed {
            if let Some(file_name) = self.existing_file_name(&transaction).await {
                let transaction = if self.heal_total(&transaction).await? {
                    self.load(id).await?
                } else {
                    transaction
                };
                return Ok(InvoiceOutcome::Existing {
                    download_url: self.storage.url_for(&file_name),
                    transaction,
                });
            }

            warn!(
                transaction_number = %transaction.transaction_number,
                "Invoice marked completed but its file is missing, regenerating"
            );
            return self.regenerate(id).await;
        }

        self.generate(id).await
    }

    /// Clears the invoice fields and runs the pipeline again.
    ///
    /// ## Errors
    /// `EngineError::Conflict` while another generation is in flight.
    pub async fn regenerate(&self, id: &str) -> EngineResult<InvoiceOutcome> {
        let before = self.load(id).await?;

        let mut uow = self.db.begin().await?;
        let reset = self.transactions.reset_invoice(&mut uow, id).await?;
        uow.commit().await?;
        if !reset {
            return Err(EngineError::Conflict(format!(
                "invoice for {} is being generated",
                before.transaction_number
            )));
        }

        let outcome = self.generate(id).await?;

        // A renamed customer or date changes the file name; drop the stale file.
        if let (Some(old), Some(new)) = (
            before.invoice_path.as_deref(),
            outcome.transaction().invoice_path.as_deref(),
        ) {
            if old != new {
                self.remove_file(old).await;
            }
        }
        Ok(outcome)
    }

    /// Corrects a drifted stored total. Returns true if it wrote a correction.
    pub async fn heal_total(&self, transaction: &Transaction) -> EngineResult<bool> {
        match total_drift(transaction) {
            Some(canonical) => {
                warn!(
                    transaction_number = %transaction.transaction_number,
                    stored = transaction.total_cents,
                    canonical = canonical.cents(),
                    "Stored total drifted"
                );
                Ok(self.transactions.heal_total(&transaction.id, canonical.cents()).await?)
            }
            None => Ok(false),
        }
    }

    /// Best-effort removal of a transaction's invoice artifacts.
    pub async fn delete_artifacts(&self, transaction: &Transaction) {
        if let Some(path) = transaction.invoice_path.as_deref() {
            self.remove_file(path).await;
        }
    }

    /// Local path of a stored invoice (`invoice_path` is relative to the storage root).
    pub fn local_path(&self, invoice_path: &str) -> PathBuf {
        self.storage_root.join(invoice_path)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load(&self, id: &str) -> EngineResult<Transaction> {
        self.transactions
            .get_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Transaction", id))
    }

    /// Everything after the lock. Any error here marks the invoice failed.
    async fn render_locked(&self, id: &str) -> EngineResult<String> {
        let transaction = self.load(id).await?;
        let document = InvoiceDocument::from_transaction(&transaction, self.issuer.clone());
        let file_name = document.file_name();
        let relative = invoice_relative_path(&file_name);
        let path = self.local_path(&relative);

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))?;
        }
        remove_if_exists(&path).await?;

        self.renderer
            .render(&document, &path)
            .await
            .map_err(|e| EngineError::InvoiceFailed(e.to_string()))?;

        let stored = self
            .storage
            .upload(&path, &file_name)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let recorded = self
            .transactions
            .complete_invoice(
                id,
                &document.invoice_number,
                &relative,
                document.totals.total.cents(),
            )
            .await?;
        if !recorded {
            return Err(EngineError::Conflict(format!(
                "invoice lock for {} was lost",
                transaction.transaction_number
            )));
        }

        Ok(stored.url)
    }

    async fn existing_file_name(&self, transaction: &Transaction) -> Option<String> {
        let relative = transaction.invoice_path.as_deref()?;
        let path = self.local_path(relative);
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !exists {
            return None;
        }
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    async fn remove_file(&self, relative: &str) {
        let path = self.local_path(relative);
        if let Err(e) = remove_if_exists(&path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove invoice file");
        }
        if let Some(name) = Path::new(relative).file_name() {
            let name = name.to_string_lossy();
            if let Err(e) = self.storage.delete(&name).await {
                warn!(name = %name, error = %e, "Failed to delete stored invoice");
            }
        }
    }
}

async fn remove_if_exists(path: &Path) -> EngineResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed previous invoice file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::Storage(e.to_string())),
    }
}
