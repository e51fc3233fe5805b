//! # Collaborators
//!
//! Services the engine consumes but does not own: invoice rendering, remote
//! storage, email delivery, discount permissions and the audit log.
//!
//! ## Injection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  TransactionService::builder(db, config)                                │
//! │      .renderer(Arc<dyn InvoiceRenderer>)     default: plain text        │
//! │      .storage(Arc<dyn RemoteStorage>)        default: local mirror dir  │
//! │      .email_sender(Arc<dyn EmailSender>)     default: log only          │
//! │      .discount_policy(Arc<dyn DiscountPolicy>) default: role limits     │
//! │      .audit_sink(Arc<dyn AuditSink>)         default: tracing           │
//! │      .build()                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator is passed in explicitly; nothing here is global state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use apothecary_core::invoice::InvoiceDocument;
use apothecary_core::money::FULL_BPS;
use apothecary_core::{Actor, Money, PaymentStatus, Role};

use crate::config::{DiscountLimit, DiscountSettings};

/// Failure reported by a rendering or storage collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Render failed: {0}")]
    Render(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Invoice Renderer
// =============================================================================

/// Turns an invoice document into a file at `path`.
///
/// The parent directory exists when this is called. An existing file at
/// `path` has already been removed.
#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(&self, document: &InvoiceDocument, path: &Path) -> Result<(), CollaboratorError>;
}

/// Writes a fixed-width text layout of the invoice.
#[derive(Debug, Clone, Default)]
pub struct PlainTextInvoiceRenderer;

impl PlainTextInvoiceRenderer {
    pub fn layout(document: &InvoiceDocument) -> String {
        let mut out = String::new();
        let issuer = &document.issuer;

        let _ = writeln!(out, "{}", issuer.name);
        if let Some(address) = &issuer.address {
            let _ = writeln!(out, "{}", address);
        }
        if let Some(phone) = &issuer.phone {
            let _ = writeln!(out, "Tel: {}", phone);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "INVOICE {}", document.invoice_number);
        let _ = writeln!(out, "Transaction: {}", document.transaction_number);
        let _ = writeln!(out, "Date: {}", document.transaction_date.format("%d/%m/%Y"));
        let _ = writeln!(out, "Customer: {}", document.customer_name);
        if let Some(email) = &document.customer_email {
            let _ = writeln!(out, "Email: {}", email);
        }
        let _ = writeln!(out);

        for line in &document.lines {
            let _ = writeln!(
                out,
                "{:<32} {:>5} x {:>10} {:>10}",
                line.name,
                line.quantity,
                Money::from_cents(line.unit_price_cents),
                Money::from_cents(line.amount_cents),
            );
            if line.discount_cents > 0 {
                let _ = writeln!(out, "    discount -{}", Money::from_cents(line.discount_cents));
            }
        }

        let totals = &document.totals;
        let _ = writeln!(out);
        let _ = writeln!(out, "Subtotal:       {:>12}", totals.subtotal);
        let _ = writeln!(out, "Item discounts: {:>12}", totals.item_discounts);
        let _ = writeln!(out, "Bill discount:  {:>12}", totals.bill_discount);
        let _ = writeln!(out, "TOTAL:          {:>12}", totals.total);
        let _ = writeln!(out, "Paid:           {:>12}", Money::from_cents(document.paid_cents));

        if let Some(notes) = &document.notes {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", notes);
        }
        out
    }
}

#[async_trait]
impl InvoiceRenderer for PlainTextInvoiceRenderer {
    async fn render(&self, document: &InvoiceDocument, path: &Path) -> Result<(), CollaboratorError> {
        tokio::fs::write(path, Self::layout(document)).await?;
        debug!(path = %path.display(), "Invoice rendered");
        Ok(())
    }
}

// =============================================================================
// Remote Storage
// =============================================================================

/// A stored invoice artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Uploads `local_path` under `name`, replacing any existing object.
    async fn upload(&self, local_path: &Path, name: &str) -> Result<StoredObject, CollaboratorError>;

    /// Removes `name`. Removing a missing object is not an error.
    async fn delete(&self, name: &str) -> Result<(), CollaboratorError>;

    /// Public download URL of `name`.
    fn url_for(&self, name: &str) -> String;
}

/// Mirrors uploads into a local directory served under `base_url`.
#[derive(Debug, Clone)]
pub struct LocalDirectoryStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalDirectoryStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        LocalDirectoryStorage {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RemoteStorage for LocalDirectoryStorage {
    async fn upload(&self, local_path: &Path, name: &str) -> Result<StoredObject, CollaboratorError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let target = self.root.join(name);
        if target != local_path {
            tokio::fs::copy(local_path, &target)
                .await
                .map_err(|e| CollaboratorError::Upload(format!("{}: {}", name, e)))?;
        }

        Ok(StoredObject {
            key: name.to_string(),
            url: self.url_for(name),
        })
    }

    async fn delete(&self, name: &str) -> Result<(), CollaboratorError> {
        match tokio::fs::remove_file(self.root.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }
}

// =============================================================================
// Email
// =============================================================================

/// An invoice email with its attachment.
#[derive(Debug, Clone)]
pub struct InvoiceEmail {
    pub to: String,
    pub from: String,
    pub customer_name: String,
    pub transaction_number: String,
    pub invoice_number: String,
    pub attachment: PathBuf,
    pub amount: Money,
    pub transaction_date: DateTime<Utc>,
    pub payment_status: PaymentStatus,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Returns whether the message was accepted for delivery.
    async fn send(&self, email: InvoiceEmail) -> bool;
}

/// Logs outgoing invoices instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, email: InvoiceEmail) -> bool {
        info!(
            to = %email.to,
            transaction_number = %email.transaction_number,
            attachment = %email.attachment.display(),
            amount = %email.amount,
            "Invoice email (not delivered, log sender)"
        );
        true
    }
}

// =============================================================================
// Discount Policy
// =============================================================================

/// Which discount is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountScope {
    Bill,
    Item { index: usize },
}

impl std::fmt::Display for DiscountScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscountScope::Bill => write!(f, "bill discount"),
            DiscountScope::Item { index } => write!(f, "discount on item {}", index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        PolicyDecision {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        PolicyDecision {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether an actor may grant a discount.
///
/// `percent_bps` is the discount's share of the amount it applies to.
pub trait DiscountPolicy: Send + Sync {
    fn check(
        &self,
        actor: &Actor,
        percent_bps: u32,
        amount_cents: i64,
        scope: DiscountScope,
    ) -> PolicyDecision;
}

/// Role-keyed percent and amount limits. Admins are unlimited.
#[derive(Debug, Clone)]
pub struct RoleDiscountPolicy {
    staff: DiscountLimit,
    manager: DiscountLimit,
}

impl RoleDiscountPolicy {
    pub fn new(settings: &DiscountSettings) -> Self {
        RoleDiscountPolicy {
            staff: settings.staff,
            manager: settings.manager,
        }
    }

    fn limit_for(&self, role: Role) -> Option<DiscountLimit> {
        match role {
            Role::Staff => Some(self.staff),
            Role::Manager => Some(self.manager),
            Role::Admin => None,
        }
    }
}

impl DiscountPolicy for RoleDiscountPolicy {
    fn check(
        &self,
        actor: &Actor,
        percent_bps: u32,
        amount_cents: i64,
        scope: DiscountScope,
    ) -> PolicyDecision {
        let Some(limit) = self.limit_for(actor.role) else {
            return PolicyDecision::allow();
        };

        if percent_bps > limit.max_percent_bps {
            return PolicyDecision::deny(format!(
                "{} of {:.2}% exceeds the {:.2}% limit for {:?}",
                scope,
                f64::from(percent_bps) * 100.0 / f64::from(FULL_BPS),
                f64::from(limit.max_percent_bps) * 100.0 / f64::from(FULL_BPS),
                actor.role,
            ));
        }

        if amount_cents > limit.max_amount_cents {
            return PolicyDecision::deny(format!(
                "{} of {} exceeds the {} limit for {:?}",
                scope,
                Money::from_cents(amount_cents),
                Money::from_cents(limit.max_amount_cents),
                actor.role,
            ));
        }

        PolicyDecision::allow()
    }
}

// =============================================================================
// Audit
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Cancel,
    Delete,
    Duplicate,
    DraftSave,
    DraftDelete,
    InvoiceGenerate,
    InvoiceEmail,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub transaction_id: String,
    pub transaction_number: String,
    pub actor_id: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        transaction_id: impl Into<String>,
        transaction_number: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        AuditEvent {
            action,
            transaction_id: transaction_id.into(),
            transaction_number: transaction_number.into(),
            actor_id: actor_id.into(),
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Fire-and-forget audit log. Must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events on the `audit` tracing target.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            action = ?event.action,
            transaction_id = %event.transaction_id,
            transaction_number = %event.transaction_number,
            actor_id = %event.actor_id,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}
