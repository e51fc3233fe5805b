//! # Transaction Service
//!
//! The lifecycle state machine. Each operation validates its input, asks
//! [`plan_transition`] what an update means, and carries out the side
//! effects the plan names.
//!
//! ## Consistency Regimes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CREATE (completed)                 one unit of work                    │
//! │  ┌──────────┐  ┌─────────┐  ┌──────────────┐  ┌──────────────┐         │
//! │  │ capture  │─►│ insert  │─►│  deduct      │─►│ invoice =    │─► commit│
//! │  │ costs    │  │ document│  │  inventory   │  │ pending      │         │
//! │  └──────────┘  └─────────┘  └──────────────┘  └──────────────┘         │
//! │        any fatal error ──► rollback, nothing persisted                  │
//! │        after commit ──► InvoiceTask::spawn (detached)                   │
//! │                                                                         │
//! │  UPDATE                             best effort                         │
//! │  ┌─────────────────────┐   ┌───────────────────────┐   ┌────────────┐  │
//! │  │ UoW 1: costs + save │──►│ UoW 2: deduct/reverse │──►│ invoice    │  │
//! │  │ (optimistic version)│   │ failure ⇒ warning     │   │ (locked)   │  │
//! │  └─────────────────────┘   └───────────────────────┘   └────────────┘  │
//! │        the saved status change is never rolled back by UoW 2           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transaction numbers are drawn from the sequence counter before a unit of
//! work opens. A rolled-back creation burns its number; numbers are never
//! reused.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use apothecary_core::lifecycle::{
    creation_status, plan_transition, TransitionPlan, TransitionRequest,
};
use apothecary_core::pricing::compute_totals;
use apothecary_core::sequence::{format_transaction_number, sequence_key};
use apothecary_core::validation::{validate_discount_cents, validate_items, validate_uuid};
use apothecary_core::{
    Actor, LineItem, Money, Page, PaymentMethod, PaymentStatus, Transaction, TransactionStatus,
};
use apothecary_db::{Database, DbConfig, DbResult, TransactionRepository};

use crate::collaborators::{
    AuditAction, AuditEvent, AuditSink, DiscountPolicy, DiscountScope, EmailSender,
    InvoiceEmail, InvoiceRenderer, LocalDirectoryStorage, LogEmailSender,
    PlainTextInvoiceRenderer, RemoteStorage, RoleDiscountPolicy, TracingAuditSink,
};
use crate::config::EngineConfig;
use crate::cost::CostCaptureResolver;
use crate::error::{EngineError, EngineResult};
use crate::inventory::{InventoryEngine, InventoryReport, ReversalReport};
use crate::invoice::{InvoiceOutcome, InvoicePipeline};
use crate::tasks::InvoiceTask;

const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

// =============================================================================
// Requests
// =============================================================================

fn default_create_status() -> TransactionStatus {
    TransactionStatus::Completed
}

/// Body of a create call. Without a status the sale is completed at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    pub items: Vec<LineItem>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    /// Bill-level discount.
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub paid_cents: i64,
    pub notes: Option<String>,
    #[serde(default = "default_create_status")]
    pub status: TransactionStatus,
    pub transaction_date: Option<DateTime<Utc>>,
}

impl CreateTransactionRequest {
    pub fn new(items: Vec<LineItem>) -> Self {
        CreateTransactionRequest {
            items,
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            customer_address: None,
            discount_cents: 0,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            paid_cents: 0,
            notes: None,
            status: default_create_status(),
            transaction_date: None,
        }
    }
}

/// Partial update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTransactionRequest {
    pub items: Option<Vec<LineItem>>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub discount_cents: Option<i64>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub paid_cents: Option<i64>,
    pub notes: Option<String>,
    pub status: Option<TransactionStatus>,
    pub transaction_date: Option<DateTime<Utc>>,
    /// Version the client last read. A mismatch is a 409.
    pub expected_version: Option<i64>,
}

/// Autosave body, keyed by the client-chosen `draft_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveDraftRequest {
    pub draft_id: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub paid_cents: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<TransactionStatus>,
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug)]
pub struct CreateOutcome {
    pub transaction: Transaction,
    /// Deduction report for a completed sale.
    pub inventory: Option<InventoryReport>,
    /// Background invoice generation for a completed sale.
    pub invoice_task: Option<InvoiceTask>,
}

#[derive(Debug)]
pub struct UpdateOutcome {
    pub transaction: Transaction,
    pub plan: TransitionPlan,
    pub inventory: Option<InventoryReport>,
    pub reversal: Option<ReversalReport>,
    pub invoice: Option<InvoiceOutcome>,
    /// Absorbed side-effect failures.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailOutcome {
    pub transaction: Transaction,
    pub sent_to: String,
    pub download_url: Option<String>,
}

// =============================================================================
// Service
// =============================================================================

/// Orchestrates the transaction lifecycle over the database and collaborators.
#[derive(Clone)]
pub struct TransactionService {
    db: Database,
    config: Arc<EngineConfig>,
    transactions: TransactionRepository,
    costs: CostCaptureResolver,
    inventory: InventoryEngine,
    invoices: InvoicePipeline,
    email_sender: Arc<dyn EmailSender>,
    discount_policy: Arc<dyn DiscountPolicy>,
    audit_sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for TransactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionService")
            .field("store", &self.config.store.name)
            .field("invoices", &self.invoices)
            .finish_non_exhaustive()
    }
}

impl TransactionService {
    pub fn builder(db: Database, config: EngineConfig) -> TransactionServiceBuilder {
        TransactionServiceBuilder {
            db,
            config,
            renderer: None,
            storage: None,
            email_sender: None,
            discount_policy: None,
            audit_sink: None,
        }
    }

    /// Opens the configured database and wires the default collaborators.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let db_config = DbConfig::new(config.database.path.clone())
            .max_connections(config.database.max_connections);
        let db = Database::new(db_config).await?;

        Ok(Self::builder(db, config).build())
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn invoices(&self) -> &InvoicePipeline {
        &self.invoices
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Creates a sale (default) or a draft.
    ///
    /// A completed sale is saved, costed and deducted atomically; its invoice
    /// is rendered by a detached task whose handle is returned.
    pub async fn create(
        &self,
        actor: &Actor,
        request: CreateTransactionRequest,
    ) -> EngineResult<CreateOutcome> {
        require_actor(actor)?;

        if request.status == TransactionStatus::Cancelled {
            return Err(EngineError::Validation(
                "a transaction cannot be created cancelled".to_string(),
            ));
        }

        validate_items(&request.items, true)?;
        validate_bill_discount(&request.items, request.discount_cents)?;
        self.check_discounts(actor, &request.items, request.discount_cents)?;

        let (status, transaction_type) =
            creation_status(request.status, request.payment_status);

        let now = Utc::now();
        let transaction_date = request.transaction_date.unwrap_or(now);
        let number = self.next_transaction_number(transaction_date).await?;

        let mut txn = Transaction::new_draft(Uuid::new_v4().to_string(), number, &actor.id, now);
        txn.status = status;
        txn.transaction_type = transaction_type;
        txn.items = request.items;
        txn.customer_name = request.customer_name;
        txn.customer_email = request.customer_email;
        txn.customer_phone = request.customer_phone;
        txn.customer_address = request.customer_address;
        txn.discount_cents = request.discount_cents;
        txn.payment_status = request.payment_status;
        txn.payment_method = request.payment_method;
        txn.paid_cents = request.paid_cents;
        txn.notes = request.notes;
        txn.transaction_date = transaction_date;
        txn.last_modified_by = Some(actor.id.clone());
        txn.total_cents = compute_totals(&txn.items, txn.bill_discount()).total.cents();

        if status != TransactionStatus::Completed {
            let mut uow = self.db.begin().await?;
            let stored = self.transactions.insert(&mut uow, &txn).await?;
            uow.commit().await?;

            info!(transaction_number = %stored.transaction_number, "Draft transaction created");
            self.audit(AuditAction::Create, &stored, actor, Some("draft"));
            return Ok(CreateOutcome {
                transaction: stored,
                inventory: None,
                invoice_task: None,
            });
        }

        let number = txn.transaction_number.clone();
        let inventory = match self.create_completed(&mut txn, &actor.id).await {
            Ok(report) => report,
            Err(e) => {
                error!(
                    transaction_number = %number,
                    error = %e,
                    "Transaction creation aborted, nothing persisted"
                );
                return Err(e.into());
            }
        };

        for shortfall in &inventory.errors {
            warn!(transaction_number = %number, "{}", shortfall);
        }

        let invoice_task = InvoiceTask::spawn(self.invoices.clone(), &txn.id);
        let stored = self.load(&txn.id).await?;

        info!(
            transaction_number = %stored.transaction_number,
            total = %Money::from_cents(stored.total_cents),
            movements = inventory.movements.len(),
            "Transaction completed"
        );
        self.audit(AuditAction::Create, &stored, actor, Some("completed"));

        Ok(CreateOutcome {
            transaction: stored,
            inventory: Some(inventory),
            invoice_task: Some(invoice_task),
        })
    }

    async fn create_completed(
        &self,
        txn: &mut Transaction,
        actor_id: &str,
    ) -> DbResult<InventoryReport> {
        let mut uow = self.db.begin().await?;

        let costs = self.costs.capture(&mut uow, &mut txn.items).await?;
        debug!(
            captured = costs.captured,
            kept = costs.kept,
            "Costs captured for new sale"
        );

        let stored = self.transactions.insert(&mut uow, txn).await?;
        let report = self
            .inventory
            .process_inventory(&mut uow, &stored, actor_id)
            .await?;
        self.transactions
            .mark_invoice_pending(&mut uow, &stored.id)
            .await?;

        uow.commit().await?;
        Ok(report)
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Applies an update and executes the transition it implies.
    pub async fn update(
        &self,
        actor: &Actor,
        id: &str,
        request: UpdateTransactionRequest,
    ) -> EngineResult<UpdateOutcome> {
        require_actor(actor)?;
        validate_id(id)?;

        let current = self.load(id).await?;
        if let Some(expected) = request.expected_version {
            if expected != current.version {
                return Err(EngineError::Conflict(format!(
                    "transaction {} is at version {}, not {}",
                    current.transaction_number, current.version, expected
                )));
            }
        }

        let mut txn = current.clone();
        let items_supplied = request.items.is_some();
        let discount_changed = request
            .discount_cents
            .is_some_and(|d| d != current.discount_cents);
        let requested_status = request.status;
        apply_update(&mut txn, request);
        let items_changed = txn.items != current.items;

        let plan = plan_transition(TransitionRequest {
            current: current.status,
            current_type: current.transaction_type,
            requested: requested_status,
            payment_status: txn.payment_status,
            invoice_generated: current.invoice_generated,
            items_changed,
        })?;

        validate_items(
            &txn.items,
            items_supplied || plan.to == TransactionStatus::Completed,
        )?;
        validate_bill_discount(&txn.items, txn.discount_cents)?;
        // Autosaves skip the policy, so completion re-checks whatever the draft holds.
        let completing = plan.changes_status() && plan.to == TransactionStatus::Completed;
        if items_changed || discount_changed || completing {
            self.check_discounts(actor, &txn.items, txn.discount_cents)?;
        }

        let now = Utc::now();
        txn.status = plan.to;
        txn.transaction_type = plan.transaction_type;
        txn.total_cents = compute_totals(&txn.items, txn.bill_discount()).total.cents();
        txn.last_modified_by = Some(actor.id.clone());
        txn.updated_at = now;

        let saved = self.save_document(&mut txn, &plan).await?;
        if plan.changes_status() {
            info!(
                transaction_number = %saved.transaction_number,
                from = %plan.from,
                to = %plan.to,
                "Transaction status changed"
            );
        }
        if plan.restored {
            self.invoices.delete_artifacts(&current).await;
        }

        let mut warnings = Vec::new();

        let inventory = if plan.deduct_inventory {
            match self.deduct(&saved, &actor.id).await {
                Ok(report) => {
                    warnings.extend(report.errors.iter().cloned());
                    Some(report)
                }
                Err(e) => {
                    warn!(
                        transaction_number = %saved.transaction_number,
                        error = %e,
                        "Inventory deduction failed, status change kept"
                    );
                    warnings.push(format!("inventory deduction failed: {}", e));
                    None
                }
            }
        } else {
            None
        };

        let reversal = if plan.reverse_inventory {
            match self.reverse(&saved.transaction_number, &actor.id).await {
                Ok(report) => {
                    if !report.is_complete() {
                        warn!(
                            transaction_number = %saved.transaction_number,
                            reversed = report.reversed_count,
                            original = report.original_movement_count,
                            "Partial inventory reversal"
                        );
                    }
                    warnings.extend(report.errors.iter().cloned());
                    warnings.extend(report.warnings.iter().cloned());
                    Some(report)
                }
                Err(e) => {
                    warn!(
                        transaction_number = %saved.transaction_number,
                        error = %e,
                        "Inventory reversal failed, cancellation kept"
                    );
                    warnings.push(format!("inventory reversal failed: {}", e));
                    None
                }
            }
        } else {
            None
        };

        let invoice = if plan.generate_invoice {
            match self.invoices.generate(&saved.id).await {
                Ok(outcome) => {
                    if let Some(err) = outcome.error() {
                        warnings.push(format!("invoice generation failed: {}", err));
                    }
                    Some(outcome)
                }
                Err(e) => {
                    warn!(id = %saved.id, error = %e, "Invoice generation errored");
                    warnings.push(format!("invoice generation failed: {}", e));
                    None
                }
            }
        } else {
            None
        };

        let transaction = self.load(id).await?;
        let action = if plan.changes_status() && plan.to == TransactionStatus::Cancelled {
            AuditAction::Cancel
        } else {
            AuditAction::Update
        };
        let detail = format!("{} -> {}", plan.from, plan.to);
        self.audit(action, &transaction, actor, Some(&detail));

        Ok(UpdateOutcome {
            transaction,
            plan,
            inventory,
            reversal,
            invoice,
            warnings,
        })
    }

    /// Unit of work 1: cost capture, versioned save, invoice reset on restore.
    async fn save_document(
        &self,
        txn: &mut Transaction,
        plan: &TransitionPlan,
    ) -> EngineResult<Transaction> {
        let mut uow = self.db.begin().await?;

        if plan.capture_costs {
            self.costs.capture(&mut uow, &mut txn.items).await?;
        }

        let saved = self.transactions.save(&mut uow, txn).await?;

        if plan.restored && !self.transactions.reset_invoice(&mut uow, &txn.id).await? {
            return Err(EngineError::Conflict(format!(
                "invoice for {} is being generated, retry shortly",
                txn.transaction_number
            )));
        }

        uow.commit().await?;
        Ok(saved)
    }

    async fn deduct(&self, txn: &Transaction, actor_id: &str) -> DbResult<InventoryReport> {
        let mut uow = self.db.begin().await?;
        let report = self.inventory.process_inventory(&mut uow, txn, actor_id).await?;
        uow.commit().await?;
        Ok(report)
    }

    async fn reverse(&self, transaction_number: &str, actor_id: &str) -> DbResult<ReversalReport> {
        let mut uow = self.db.begin().await?;
        let report = self
            .inventory
            .reverse_inventory(&mut uow, transaction_number, actor_id)
            .await?;
        uow.commit().await?;
        Ok(report)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, id: &str) -> EngineResult<Transaction> {
        validate_id(id)?;
        self.load(id).await
    }

    /// Newest-first page of transactions.
    pub async fn list(&self, query: ListQuery) -> EngineResult<Page<Transaction>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let offset = (page - 1).saturating_mul(limit);

        let (items, total) = self.transactions.list(query.status, limit, offset).await?;

        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Removes a transaction and its invoice file. Inventory history stays.
    pub async fn delete(&self, actor: &Actor, id: &str) -> EngineResult<Transaction> {
        require_actor(actor)?;
        validate_id(id)?;

        let deleted = self
            .transactions
            .delete(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Transaction", id))?;

        self.invoices.delete_artifacts(&deleted).await;
        self.audit(AuditAction::Delete, &deleted, actor, None);
        Ok(deleted)
    }

    // =========================================================================
    // Drafts
    // =========================================================================

    /// Idempotent autosave. Retries with the same `draft_id` converge on one row.
    pub async fn save_draft(&self, actor: &Actor, request: SaveDraftRequest) -> EngineResult<Transaction> {
        require_actor(actor)?;

        let draft_id = request.draft_id.trim();
        if draft_id.is_empty() {
            return Err(EngineError::Validation("draft_id is required".to_string()));
        }
        validate_items(&request.items, false)?;

        let (id, number) = match self.transactions.find_draft(draft_id, &actor.id).await? {
            Some(existing) if existing.status != TransactionStatus::Draft => {
                return Err(EngineError::Conflict(format!(
                    "draft {} was already finalised as {}",
                    draft_id, existing.transaction_number
                )));
            }
            Some(existing) => (existing.id, existing.transaction_number),
            None => {
                let number = self.next_transaction_number(Utc::now()).await?;
                (Uuid::new_v4().to_string(), number)
            }
        };

        let now = Utc::now();
        let mut txn = Transaction::new_draft(id, number, &actor.id, now);
        txn.draft_id = Some(draft_id.to_string());
        txn.items = request.items;
        txn.customer_name = request.customer_name;
        txn.customer_email = request.customer_email;
        txn.customer_phone = request.customer_phone;
        txn.customer_address = request.customer_address;
        txn.discount_cents = request.discount_cents;
        txn.payment_status = request.payment_status;
        txn.payment_method = request.payment_method;
        txn.paid_cents = request.paid_cents;
        txn.notes = request.notes;
        txn.last_modified_by = Some(actor.id.clone());
        txn.total_cents = compute_totals(&txn.items, txn.bill_discount()).total.cents();

        let mut uow = self.db.begin().await?;
        let stored = self.transactions.upsert_draft(&mut uow, &txn).await?;
        uow.commit().await?;

        debug!(
            draft_id = %draft_id,
            transaction_number = %stored.transaction_number,
            version = stored.version,
            "Draft autosaved"
        );
        self.audit(AuditAction::DraftSave, &stored, actor, Some(draft_id));
        Ok(stored)
    }

    pub async fn list_drafts(&self, actor: &Actor) -> EngineResult<Vec<Transaction>> {
        require_actor(actor)?;
        Ok(self.transactions.list_drafts(&actor.id).await?)
    }

    pub async fn delete_draft(&self, actor: &Actor, draft_id: &str) -> EngineResult<Transaction> {
        require_actor(actor)?;

        let deleted = self
            .transactions
            .delete_draft(draft_id, &actor.id)
            .await?
            .ok_or_else(|| EngineError::not_found("Draft", draft_id))?;

        self.audit(AuditAction::DraftDelete, &deleted, actor, Some(draft_id));
        Ok(deleted)
    }

    // =========================================================================
    // Duplicate
    // =========================================================================

    /// Copies any transaction into a fresh draft with a new number.
    ///
    /// Items are deep-copied with their captured costs cleared; invoice,
    /// refund and payment state start over.
    pub async fn duplicate(&self, actor: &Actor, id: &str) -> EngineResult<Transaction> {
        require_actor(actor)?;
        validate_id(id)?;

        let source = self.load(id).await?;
        let now = Utc::now();
        let number = self.next_transaction_number(now).await?;

        let mut copy = Transaction::new_draft(Uuid::new_v4().to_string(), number, &actor.id, now);
        copy.items = source
            .items
            .iter()
            .cloned()
            .map(|mut item| {
                item.cost_price_cents = None;
                item
            })
            .collect();
        copy.customer_name = source.customer_name.clone();
        copy.customer_email = source.customer_email.clone();
        copy.customer_phone = source.customer_phone.clone();
        copy.customer_address = source.customer_address.clone();
        copy.discount_cents = source.discount_cents;
        copy.payment_method = source.payment_method;
        copy.notes = source.notes.clone();
        copy.last_modified_by = Some(actor.id.clone());
        copy.total_cents = compute_totals(&copy.items, copy.bill_discount()).total.cents();

        let mut uow = self.db.begin().await?;
        let stored = self.transactions.insert(&mut uow, &copy).await?;
        uow.commit().await?;

        info!(
            source = %source.transaction_number,
            transaction_number = %stored.transaction_number,
            "Transaction duplicated"
        );
        self.audit(
            AuditAction::Duplicate,
            &stored,
            actor,
            Some(&source.transaction_number),
        );
        Ok(stored)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Returns the stored invoice or renders one. Contention is `Skipped`.
    pub async fn generate_invoice(&self, actor: &Actor, id: &str) -> EngineResult<InvoiceOutcome> {
        require_actor(actor)?;
        validate_id(id)?;
        require_completed(&self.load(id).await?)?;

        let outcome = self.invoices.ensure_invoice(id).await?;
        self.audit_invoice(&outcome, actor);
        Ok(outcome)
    }

    /// Discards the current invoice and renders a new one.
    pub async fn regenerate_invoice(&self, actor: &Actor, id: &str) -> EngineResult<InvoiceOutcome> {
        require_actor(actor)?;
        validate_id(id)?;
        require_completed(&self.load(id).await?)?;

        let outcome = self.invoices.regenerate(id).await?;
        self.audit_invoice(&outcome, actor);
        Ok(outcome)
    }

    /// Emails the invoice to the customer, rendering it first if needed.
    pub async fn send_invoice_email(&self, actor: &Actor, id: &str) -> EngineResult<EmailOutcome> {
        require_actor(actor)?;
        if !self.config.is_email_enabled() {
            return Err(EngineError::EmailDisabled);
        }
        validate_id(id)?;

        let txn = self.load(id).await?;
        let to = txn
            .customer_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .ok_or(EngineError::MissingCustomerEmail)?;
        require_completed(&txn)?;

        let outcome = self.invoices.ensure_invoice(id).await?;
        let download_url = match &outcome {
            InvoiceOutcome::Skipped { .. } => {
                return Err(EngineError::Conflict(format!(
                    "invoice for {} is being generated, retry shortly",
                    txn.transaction_number
                )));
            }
            InvoiceOutcome::Failed { error, .. } => {
                return Err(EngineError::InvoiceFailed(error.clone()));
            }
            InvoiceOutcome::Generated { download_url, .. }
            | InvoiceOutcome::Existing { download_url, .. } => download_url.clone(),
        };

        let txn = outcome.into_transaction();
        let (invoice_number, invoice_path) = match (&txn.invoice_number, &txn.invoice_path) {
            (Some(number), Some(path)) => (number.clone(), path.clone()),
            _ => {
                return Err(EngineError::Internal(format!(
                    "completed invoice for {} has no number or path",
                    txn.transaction_number
                )))
            }
        };

        let email = InvoiceEmail {
            to: to.clone(),
            from: self.config.email.sender.clone(),
            customer_name: txn.customer_display_name().to_string(),
            transaction_number: txn.transaction_number.clone(),
            invoice_number,
            attachment: self.invoices.local_path(&invoice_path),
            amount: Money::from_cents(txn.total_cents),
            transaction_date: txn.transaction_date,
            payment_status: txn.payment_status,
        };

        if !self.email_sender.send(email).await {
            warn!(transaction_number = %txn.transaction_number, to = %to, "Invoice email rejected");
            return Err(EngineError::EmailDelivery { to });
        }

        info!(transaction_number = %txn.transaction_number, to = %to, "Invoice emailed");
        self.audit(AuditAction::InvoiceEmail, &txn, actor, Some(&to));

        Ok(EmailOutcome {
            transaction: txn,
            sent_to: to,
            download_url: Some(download_url),
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, id: &str) -> EngineResult<Transaction> {
        self.transactions
            .get_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Transaction", id))
    }

    async fn next_transaction_number(&self, at: DateTime<Utc>) -> EngineResult<String> {
        let seq = self.db.sequences().next_value(&sequence_key(at)).await?;
        Ok(format_transaction_number(at, seq))
    }

    /// Runs every non-zero discount past the policy.
    ///
    /// Item discounts are measured against the line's gross; the bill
    /// discount against the subtotal after item discounts.
    fn check_discounts(&self, actor: &Actor, items: &[LineItem], bill_discount_cents: i64) -> EngineResult<()> {
        for (index, item) in items.iter().enumerate() {
            if item.discount_cents > 0 {
                let percent_bps = item.discount().share_bps_of(item.gross());
                self.enforce(
                    actor,
                    percent_bps,
                    item.discount_cents,
                    DiscountScope::Item { index },
                )?;
            }
        }

        if bill_discount_cents > 0 {
            let totals = compute_totals(items, Money::zero());
            let base = totals.subtotal - totals.item_discounts;
            let percent_bps = Money::from_cents(bill_discount_cents).share_bps_of(base);
            self.enforce(actor, percent_bps, bill_discount_cents, DiscountScope::Bill)?;
        }

        Ok(())
    }

    fn enforce(
        &self,
        actor: &Actor,
        percent_bps: u32,
        amount_cents: i64,
        scope: DiscountScope,
    ) -> EngineResult<()> {
        let decision = self
            .discount_policy
            .check(actor, percent_bps, amount_cents, scope);
        if decision.allowed {
            return Ok(());
        }

        let reason = decision
            .reason
            .unwrap_or_else(|| format!("{} exceeds the limit for your role", scope));
        warn!(actor = %actor.id, role = ?actor.role, %scope, "Discount refused");
        Err(EngineError::DiscountNotAllowed { reason })
    }

    fn audit_invoice(&self, outcome: &InvoiceOutcome, actor: &Actor) {
        let detail = match outcome {
            InvoiceOutcome::Generated { .. } => "generated".to_string(),
            InvoiceOutcome::Existing { .. } => "existing".to_string(),
            InvoiceOutcome::Skipped { .. } => "skipped".to_string(),
            InvoiceOutcome::Failed { error, .. } => format!("failed: {}", error),
        };
        self.audit(AuditAction::InvoiceGenerate, outcome.transaction(), actor, Some(&detail));
    }

    fn audit(&self, action: AuditAction, txn: &Transaction, actor: &Actor, detail: Option<&str>) {
        let event = AuditEvent::new(action, &txn.id, &txn.transaction_number, &actor.id);
        let event = match detail {
            Some(detail) => event.with_detail(detail),
            None => event,
        };
        self.audit_sink.record(event);
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Wires a [`TransactionService`]. Unset collaborators use the defaults
/// derived from the config.
pub struct TransactionServiceBuilder {
    db: Database,
    config: EngineConfig,
    renderer: Option<Arc<dyn InvoiceRenderer>>,
    storage: Option<Arc<dyn RemoteStorage>>,
    email_sender: Option<Arc<dyn EmailSender>>,
    discount_policy: Option<Arc<dyn DiscountPolicy>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl TransactionServiceBuilder {
    pub fn renderer(mut self, renderer: Arc<dyn InvoiceRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn RemoteStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email_sender = Some(sender);
        self
    }

    pub fn discount_policy(mut self, policy: Arc<dyn DiscountPolicy>) -> Self {
        self.discount_policy = Some(policy);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn build(self) -> TransactionService {
        let config = self.config;
        let db = self.db;

        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(PlainTextInvoiceRenderer));
        let storage = self.storage.unwrap_or_else(|| {
            Arc::new(LocalDirectoryStorage::new(
                config.invoice.storage_root.join("published"),
                config.invoice.public_base_url.clone(),
            ))
        });
        let discount_policy = self
            .discount_policy
            .unwrap_or_else(|| Arc::new(RoleDiscountPolicy::new(&config.discounts)));

        let invoices = InvoicePipeline::new(
            db.clone(),
            renderer,
            storage,
            config.invoice.storage_root.clone(),
            config.store.issuer(),
        );

        TransactionService {
            transactions: db.transactions(),
            costs: CostCaptureResolver::new(db.catalog()),
            inventory: InventoryEngine::new(db.catalog(), db.movements()),
            invoices,
            email_sender: self.email_sender.unwrap_or_else(|| Arc::new(LogEmailSender)),
            discount_policy,
            audit_sink: self.audit_sink.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            config: Arc::new(config),
            db,
        }
    }
}

// =============================================================================
// Free Helpers
// =============================================================================

fn require_actor(actor: &Actor) -> EngineResult<()> {
    if actor.is_authenticated() {
        Ok(())
    } else {
        Err(EngineError::Unauthenticated)
    }
}

fn validate_id(id: &str) -> EngineResult<()> {
    validate_uuid(id).map_err(|e| EngineError::InvalidId(e.to_string()))
}

fn require_completed(txn: &Transaction) -> EngineResult<()> {
    if txn.status == TransactionStatus::Completed {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "transaction {} is {}, invoices need a completed transaction",
            txn.transaction_number, txn.status
        )))
    }
}

fn validate_bill_discount(items: &[LineItem], bill_discount_cents: i64) -> EngineResult<()> {
    let totals = compute_totals(items, Money::zero());
    let base = totals.subtotal - totals.item_discounts;
    validate_discount_cents("discount", bill_discount_cents, base.cents())?;
    Ok(())
}

fn apply_update(txn: &mut Transaction, request: UpdateTransactionRequest) {
    if let Some(items) = request.items {
        txn.items = items;
    }
    if let Some(name) = request.customer_name {
        txn.customer_name = Some(name);
    }
    if let Some(email) = request.customer_email {
        txn.customer_email = Some(email);
    }
    if let Some(phone) = request.customer_phone {
        txn.customer_phone = Some(phone);
    }
    if let Some(address) = request.customer_address {
        txn.customer_address = Some(address);
    }
    if let Some(discount) = request.discount_cents {
        txn.discount_cents = discount;
    }
    if let Some(status) = request.payment_status {
        txn.payment_status = status;
    }
    if let Some(method) = request.payment_method {
        txn.payment_method = Some(method);
    }
    if let Some(paid) = request.paid_cents {
        txn.paid_cents = paid;
    }
    if let Some(notes) = request.notes {
        txn.notes = Some(notes);
    }
    if let Some(date) = request.transaction_date {
        txn.transaction_date = date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        harness, harness_with, insert_completed, line, manager, staff, RecordingRenderer,
    };
    use apothecary_core::{InvoiceStatus, ItemKind, Role};
    use std::time::Duration;

    fn product_kind(id: &str) -> ItemKind {
        ItemKind::Product {
            product_id: id.to_string(),
        }
    }

    fn bundle_kind(id: &str) -> ItemKind {
        ItemKind::Bundle {
            bundle_id: id.to_string(),
            components: vec![],
        }
    }

    async fn stock(db: &Database, id: &str) -> i64 {
        match db.catalog().get_product(id).await.unwrap() {
            Some(p) => p.current_stock,
            None => db.catalog().get_composite(id).await.unwrap().unwrap().current_stock,
        }
    }

    fn sale_request() -> CreateTransactionRequest {
        let mut request = CreateTransactionRequest::new(vec![
            line("Chamomile", 2, 1_000, product_kind("p1")),
            line("Valerian root", 1, 500, product_kind("p2")),
        ]);
        request.customer_name = Some("Jane Doe".to_string());
        request.customer_email = Some("jane@example.com".to_string());
        request.discount_cents = 200;
        request
    }

    async fn create_and_settle(service: &TransactionService, request: CreateTransactionRequest) -> Transaction {
        let outcome = service.create(&staff(), request).await.unwrap();
        if let Some(task) = outcome.invoice_task {
            task.wait().await;
        }
        service.get(&outcome.transaction.id).await.unwrap()
    }

    // =========================================================================
    // Creation
    // =========================================================================

    #[tokio::test]
    async fn test_create_completed_sale_deducts_and_invoices() {
        let h = harness().await;

        let outcome = h.service.create(&staff(), sale_request()).await.unwrap();
        let txn = &outcome.transaction;

        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.total_cents, 2_300);
        assert_eq!(txn.items[0].cost_price_cents, Some(300));
        assert_eq!(txn.items[1].cost_price_cents, Some(400));

        let inventory = outcome.inventory.as_ref().unwrap();
        assert_eq!(inventory.movements.len(), 2);
        assert!(inventory.errors.is_empty());

        let status = outcome.invoice_task.unwrap().wait().await;
        assert_eq!(status, InvoiceStatus::Completed);

        assert_eq!(stock(&h.db, "p1").await, 8);
        assert_eq!(stock(&h.db, "p2").await, 9);

        let stored = h.service.get(&txn.id).await.unwrap();
        assert!(stored.invoice_generated);
        assert_eq!(stored.total_cents, 2_300);
        let relative = stored.invoice_path.unwrap();
        assert!(h.dir.path().join(relative).exists());
        assert_eq!(h.audit.actions(), vec![AuditAction::Create]);
    }

    #[tokio::test]
    async fn test_create_draft_moves_no_stock() {
        let h = harness().await;
        let mut request = sale_request();
        request.status = TransactionStatus::Draft;

        let outcome = h.service.create(&staff(), request).await.unwrap();
        let txn = outcome.transaction;

        assert_eq!(txn.status, TransactionStatus::Draft);
        assert_eq!(txn.invoice_status, InvoiceStatus::None);
        assert!(outcome.inventory.is_none());
        assert!(outcome.invoice_task.is_none());
        assert_eq!(
            h.db.movements().count_for_transaction(&txn.transaction_number).await.unwrap(),
            0
        );
        assert_eq!(stock(&h.db, "p1").await, 10);
    }

    #[tokio::test]
    async fn test_paid_draft_creation_is_completed() {
        let h = harness().await;
        let mut request = sale_request();
        request.status = TransactionStatus::Draft;
        request.payment_status = PaymentStatus::Paid;

        let txn = create_and_settle(&h.service, request).await;

        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(stock(&h.db, "p1").await, 8);
    }

    #[tokio::test]
    async fn test_create_rejects_placeholder_names_and_cancelled_status() {
        let h = harness().await;

        let request = CreateTransactionRequest::new(vec![line("New Item", 1, 500, ItemKind::Service)]);
        let err = h.service.create(&staff(), request).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let mut request = sale_request();
        request.status = TransactionStatus::Cancelled;
        let err = h.service.create(&staff(), request).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let request = CreateTransactionRequest::new(vec![line(
            "Chamomile",
            3,
            i64::MAX / 2,
            product_kind("p1"),
        )]);
        let err = h.service.create(&staff(), request).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(stock(&h.db, "p1").await, 10);

        let (items, total) = h.db.transactions().list(None, 10, 0).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_discount_limits_follow_role() {
        let h = harness().await;
        let mut item = line("Chamomile", 1, 1_000, product_kind("p1"));
        item.discount_cents = 400;

        let request = CreateTransactionRequest::new(vec![item.clone()]);
        let err = h.service.create(&staff(), request).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(stock(&h.db, "p1").await, 10);

        let request = CreateTransactionRequest::new(vec![item]);
        let outcome = h.service.create(&manager(), request).await.unwrap();
        assert_eq!(outcome.transaction.total_cents, 600);
    }

    #[tokio::test]
    async fn test_unauthenticated_actor_is_rejected() {
        let h = harness().await;
        let anonymous = Actor::new("", Role::Admin);

        let err = h.service.create(&anonymous, sale_request()).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
        let err = h.service.list_drafts(&anonymous).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creations_get_distinct_numbers() {
        let h = harness().await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = h.service.clone();
            let mut request = sale_request();
            request.status = TransactionStatus::Draft;
            handles.push(tokio::spawn(async move {
                service.create(&staff(), request).await.unwrap().transaction
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().transaction_number);
        }
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 5);
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    #[tokio::test]
    async fn test_completing_bundle_draft_captures_component_cost() {
        let h = harness().await;
        let mut request = CreateTransactionRequest::new(vec![line("Sleep bundle", 1, 1_990, bundle_kind("b1"))]);
        request.status = TransactionStatus::Draft;
        let draft = h.service.create(&staff(), request).await.unwrap().transaction;
        assert_eq!(draft.items[0].cost_price_cents, None);

        let update = UpdateTransactionRequest {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        let outcome = h.service.update(&staff(), &draft.id, update).await.unwrap();

        assert!(outcome.plan.deduct_inventory);
        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert_eq!(outcome.transaction.items[0].cost_price_cents, Some(700));
        assert_eq!(outcome.inventory.unwrap().movements.len(), 1);
        assert_eq!(stock(&h.db, "b1").await, 4);

        assert!(matches!(outcome.invoice, Some(InvoiceOutcome::Generated { .. })));
        assert!(outcome.transaction.invoice_generated);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_payment_marks_draft_completed() {
        let h = harness().await;
        let mut request = sale_request();
        request.status = TransactionStatus::Draft;
        let draft = h.service.create(&staff(), request).await.unwrap().transaction;

        let update = UpdateTransactionRequest {
            payment_status: Some(PaymentStatus::Paid),
            paid_cents: Some(2_300),
            ..Default::default()
        };
        let outcome = h.service.update(&staff(), &draft.id, update).await.unwrap();

        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert_eq!(outcome.transaction.paid_cents, 2_300);
        assert_eq!(stock(&h.db, "p1").await, 8);
    }

    #[tokio::test]
    async fn test_cancel_reverses_every_movement() {
        let h = harness().await;
        let mut request = sale_request();
        request.items.push(line("Sleep bundle", 1, 1_990, bundle_kind("b1")));
        let txn = create_and_settle(&h.service, request).await;
        assert_eq!(stock(&h.db, "b1").await, 4);

        let update = UpdateTransactionRequest {
            status: Some(TransactionStatus::Cancelled),
            ..Default::default()
        };
        let outcome = h.service.update(&staff(), &txn.id, update).await.unwrap();

        let reversal = outcome.reversal.unwrap();
        assert_eq!(reversal.reversed_count, 3);
        assert_eq!(reversal.original_movement_count, 3);
        assert_eq!(outcome.transaction.status, TransactionStatus::Cancelled);
        assert_eq!(
            h.db.movements().net_quantity(&txn.transaction_number).await.unwrap(),
            0
        );
        assert_eq!(stock(&h.db, "p1").await, 10);
        assert_eq!(stock(&h.db, "b1").await, 5);
        let event = h.audit.events().pop().unwrap();
        assert_eq!(event.action, AuditAction::Cancel);
        assert_eq!(event.detail.as_deref(), Some("completed -> cancelled"));
    }

    #[tokio::test]
    async fn test_editing_cancelled_transaction_restores_draft() {
        let h = harness().await;
        let txn = create_and_settle(&h.service, sale_request()).await;
        let old_invoice = txn.invoice_path.clone().unwrap();

        let cancel = UpdateTransactionRequest {
            status: Some(TransactionStatus::Cancelled),
            ..Default::default()
        };
        h.service.update(&staff(), &txn.id, cancel).await.unwrap();

        let edit = UpdateTransactionRequest {
            notes: Some("customer came back".to_string()),
            ..Default::default()
        };
        let outcome = h.service.update(&staff(), &txn.id, edit).await.unwrap();

        assert!(outcome.plan.restored);
        assert_eq!(outcome.transaction.status, TransactionStatus::Draft);
        assert!(!outcome.transaction.invoice_generated);
        assert_eq!(outcome.transaction.invoice_status, InvoiceStatus::None);
        assert_eq!(outcome.transaction.invoice_number, None);
        assert!(!h.dir.path().join(old_invoice).exists());
    }

    #[tokio::test]
    async fn test_completed_cannot_return_to_draft() {
        let h = harness().await;
        let txn = create_and_settle(&h.service, sale_request()).await;

        let update = UpdateTransactionRequest {
            status: Some(TransactionStatus::Draft),
            ..Default::default()
        };
        let err = h.service.update(&staff(), &txn.id, update).await.unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert_eq!(h.service.get(&txn.id).await.unwrap().status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let h = harness().await;
        let txn = create_and_settle(&h.service, sale_request()).await;

        let update = UpdateTransactionRequest {
            notes: Some("first".to_string()),
            expected_version: Some(txn.version),
            ..Default::default()
        };
        h.service.update(&staff(), &txn.id, update.clone()).await.unwrap();

        let err = h.service.update(&staff(), &txn.id, update).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    async fn rename_movements(db: &Database, from: &str, to: &str) {
        sqlx::query(&format!("ALTER TABLE {} RENAME TO {}", from, to))
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_creation_persists_nothing() {
        let h = harness().await;
        rename_movements(&h.db, "inventory_movements", "inventory_movements_offline").await;

        let err = h.service.create(&staff(), sale_request()).await.unwrap_err();
        assert_eq!(err.status_code(), 500);

        rename_movements(&h.db, "inventory_movements_offline", "inventory_movements").await;

        let (items, total) = h.db.transactions().list(None, 10, 0).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
        assert_eq!(stock(&h.db, "p1").await, 10);
        assert_eq!(stock(&h.db, "p2").await, 10);
        let movements: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory_movements")
            .fetch_one(h.db.pool())
            .await
            .unwrap();
        assert_eq!(movements, 0);
        assert!(h.audit.actions().is_empty());
    }

    #[tokio::test]
    async fn test_inventory_failure_keeps_completion_with_warning() {
        let h = harness().await;
        let mut request = sale_request();
        request.status = TransactionStatus::Draft;
        let draft = h.service.create(&staff(), request).await.unwrap().transaction;

        rename_movements(&h.db, "inventory_movements", "inventory_movements_offline").await;
        let complete = UpdateTransactionRequest {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        let outcome = h.service.update(&staff(), &draft.id, complete).await.unwrap();
        rename_movements(&h.db, "inventory_movements_offline", "inventory_movements").await;

        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert!(outcome.inventory.is_none());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("inventory deduction failed"));

        let stored = h.service.get(&draft.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stock(&h.db, "p1").await, 10);
    }

    // =========================================================================
    // Reads and deletes
    // =========================================================================

    #[tokio::test]
    async fn test_get_rejects_bad_and_unknown_ids() {
        let h = harness().await;

        assert_eq!(h.service.get("nope").await.unwrap_err().status_code(), 400);
        let err = h
            .service
            .get("00000000-0000-4000-8000-000000000000")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let h = harness().await;
        for _ in 0..3 {
            let mut request = sale_request();
            request.status = TransactionStatus::Draft;
            h.service.create(&staff(), request).await.unwrap();
        }

        let page = h
            .service
            .list(ListQuery {
                page: Some(1),
                limit: Some(2),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 3);
        assert!(page.items[0].transaction_number > page.items[1].transaction_number);

        let completed = h
            .service
            .list(ListQuery {
                status: Some(TransactionStatus::Completed),
                limit: Some(1_000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.total, 0);
        assert_eq!(completed.limit, 100);
    }

    #[tokio::test]
    async fn test_delete_keeps_movements_and_removes_invoice() {
        let h = harness().await;
        let txn = create_and_settle(&h.service, sale_request()).await;
        let invoice = h.dir.path().join(txn.invoice_path.clone().unwrap());
        assert!(invoice.exists());

        h.service.delete(&staff(), &txn.id).await.unwrap();

        assert!(!invoice.exists());
        assert_eq!(h.service.get(&txn.id).await.unwrap_err().status_code(), 404);
        assert_eq!(
            h.db.movements().count_for_transaction(&txn.transaction_number).await.unwrap(),
            2
        );
        let err = h.service.delete(&staff(), &txn.id).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    // =========================================================================
    // Drafts
    // =========================================================================

    fn autosave(draft_id: &str, notes: &str) -> SaveDraftRequest {
        SaveDraftRequest {
            draft_id: draft_id.to_string(),
            items: vec![line("", 1, 500, ItemKind::Miscellaneous)],
            notes: Some(notes.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_autosave_retries_converge_on_one_draft() {
        let h = harness().await;

        let first = h.service.save_draft(&staff(), autosave("d-1", "one")).await.unwrap();
        let second = h.service.save_draft(&staff(), autosave("d-1", "two")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.transaction_number, second.transaction_number);
        assert_eq!(second.version, first.version + 1);
        assert_eq!(second.notes.as_deref(), Some("two"));

        let drafts = h.service.list_drafts(&staff()).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert!(h.service.list_drafts(&manager()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_autosave_after_completion_conflicts() {
        let h = harness().await;
        let mut request = autosave("d-2", "draft");
        request.items = vec![line("Chamomile", 1, 1_000, product_kind("p1"))];
        let draft = h.service.save_draft(&staff(), request.clone()).await.unwrap();

        let complete = UpdateTransactionRequest {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        h.service.update(&staff(), &draft.id, complete).await.unwrap();

        let err = h.service.save_draft(&staff(), request).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_completing_autosaved_draft_checks_discounts() {
        let h = harness().await;
        let mut item = line("Chamomile", 1, 1_000, product_kind("p1"));
        item.discount_cents = 400;
        let mut request = autosave("d-4", "big discount");
        request.items = vec![item];
        let draft = h.service.save_draft(&staff(), request).await.unwrap();

        let complete = UpdateTransactionRequest {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        let err = h
            .service
            .update(&staff(), &draft.id, complete.clone())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let stored = h.service.get(&draft.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Draft);
        assert_eq!(stock(&h.db, "p1").await, 10);
        assert_eq!(
            h.db.movements().count_for_transaction(&draft.transaction_number).await.unwrap(),
            0
        );

        let outcome = h.service.update(&manager(), &draft.id, complete).await.unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert_eq!(outcome.transaction.total_cents, 600);
    }

    #[tokio::test]
    async fn test_delete_draft() {
        let h = harness().await;
        h.service.save_draft(&staff(), autosave("d-3", "x")).await.unwrap();

        let deleted = h.service.delete_draft(&staff(), "d-3").await.unwrap();
        assert_eq!(deleted.draft_id.as_deref(), Some("d-3"));

        let err = h.service.delete_draft(&staff(), "d-3").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            h.service.save_draft(&staff(), autosave("", "x")).await.unwrap_err().status_code(),
            400
        );
    }

    // =========================================================================
    // Duplicate
    // =========================================================================

    #[tokio::test]
    async fn test_duplicate_yields_fresh_independent_draft() {
        let h = harness().await;
        let mut request = sale_request();
        request.items.push(line("Sleep bundle", 1, 1_990, bundle_kind("b1")));
        let original = create_and_settle(&h.service, request).await;

        let copy = h.service.duplicate(&staff(), &original.id).await.unwrap();

        assert_ne!(copy.id, original.id);
        assert!(copy.transaction_number > original.transaction_number);
        assert_eq!(copy.status, TransactionStatus::Draft);
        assert_eq!(copy.payment_status, PaymentStatus::Pending);
        assert!(!copy.invoice_generated);
        assert_eq!(copy.invoice_status, InvoiceStatus::None);
        assert_eq!(copy.invoice_path, None);
        assert_eq!(copy.refunded_cents, 0);
        assert_eq!(copy.items.len(), 3);
        assert!(copy.items.iter().all(|i| i.cost_price_cents.is_none()));
        assert_eq!(copy.total_cents, original.total_cents);

        let edit = UpdateTransactionRequest {
            items: Some(vec![line("Chamomile", 5, 1_000, product_kind("p1"))]),
            ..Default::default()
        };
        h.service.update(&staff(), &copy.id, edit).await.unwrap();

        let reloaded = h.service.get(&original.id).await.unwrap();
        assert_eq!(reloaded.items, original.items);
    }

    #[tokio::test]
    async fn test_duplicate_of_cancelled_is_a_draft() {
        let h = harness().await;
        let txn = create_and_settle(&h.service, sale_request()).await;
        let cancel = UpdateTransactionRequest {
            status: Some(TransactionStatus::Cancelled),
            ..Default::default()
        };
        h.service.update(&staff(), &txn.id, cancel).await.unwrap();

        let copy = h.service.duplicate(&staff(), &txn.id).await.unwrap();
        assert_eq!(copy.status, TransactionStatus::Draft);
        assert_eq!(
            h.db.movements().count_for_transaction(&copy.transaction_number).await.unwrap(),
            0
        );
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_generation_renders_once() {
        let h = harness_with(RecordingRenderer::new().with_delay(Duration::from_millis(50)), |_| {}).await;
        let txn = insert_completed(&h.db, "Jane Doe").await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pipeline = h.service.invoices().clone();
            let id = txn.id.clone();
            handles.push(tokio::spawn(async move { pipeline.generate(&id).await.unwrap() }));
        }

        let mut generated = 0;
        let mut skipped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                InvoiceOutcome::Generated { .. } => generated += 1,
                InvoiceOutcome::Skipped { .. } => skipped += 1,
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        assert_eq!(generated, 1);
        assert_eq!(skipped, 5);
        assert_eq!(h.renderer.render_count(), 1);
        let files = std::fs::read_dir(h.dir.path().join("invoices")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_generate_invoice_requires_completed() {
        let h = harness().await;
        let mut request = sale_request();
        request.status = TransactionStatus::Draft;
        let draft = h.service.create(&staff(), request).await.unwrap().transaction;

        let err = h.service.generate_invoice(&staff(), &draft.id).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_generate_invoice_returns_existing() {
        let h = harness().await;
        let txn = create_and_settle(&h.service, sale_request()).await;

        let outcome = h.service.generate_invoice(&staff(), &txn.id).await.unwrap();
        assert!(matches!(outcome, InvoiceOutcome::Existing { .. }));
        assert_eq!(h.renderer.render_count(), 1);

        let outcome = h.service.regenerate_invoice(&staff(), &txn.id).await.unwrap();
        assert!(matches!(outcome, InvoiceOutcome::Generated { .. }));
        assert_eq!(h.renderer.render_count(), 2);
    }

    #[tokio::test]
    async fn test_invoice_failure_keeps_completed_transaction() {
        let h = harness_with(RecordingRenderer::failing("out of paper"), |_| {}).await;

        let outcome = h.service.create(&staff(), sale_request()).await.unwrap();
        let status = outcome.invoice_task.unwrap().wait().await;
        assert_eq!(status, InvoiceStatus::Failed);

        let stored = h.service.get(&outcome.transaction.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert!(stored.invoice_error.unwrap().contains("out of paper"));

        h.renderer.set_failure(None);
        let retry = h.service.generate_invoice(&staff(), &stored.id).await.unwrap();
        assert!(matches!(retry, InvoiceOutcome::Generated { .. }));
    }

    #[tokio::test]
    async fn test_send_invoice_email() {
        let h = harness().await;
        let txn = create_and_settle(&h.service, sale_request()).await;

        let outcome = h.service.send_invoice_email(&staff(), &txn.id).await.unwrap();

        assert_eq!(outcome.sent_to, "jane@example.com");
        let sent = h.email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount.cents(), 2_300);
        assert!(sent[0].attachment.exists());
        assert_eq!(h.audit.actions().last(), Some(&AuditAction::InvoiceEmail));
    }

    #[tokio::test]
    async fn test_send_invoice_email_error_paths() {
        let h = harness().await;
        let mut request = sale_request();
        request.customer_email = None;
        let no_email = create_and_settle(&h.service, request).await;
        let err = h.service.send_invoice_email(&staff(), &no_email.id).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let txn = create_and_settle(&h.service, sale_request()).await;
        h.email.reject_all();
        let err = h.service.send_invoice_email(&staff(), &txn.id).await.unwrap_err();
        assert_eq!(err.status_code(), 500);

        let disabled = harness_with(RecordingRenderer::new(), |c| c.email.enabled = false).await;
        let err = disabled
            .service
            .send_invoice_email(&staff(), &txn.id)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
    }
}
