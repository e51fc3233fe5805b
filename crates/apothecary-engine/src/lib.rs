//! # apothecary-engine: Transaction Lifecycle Engine
//!
//! Turns point-of-sale transactions into consistent inventory movements,
//! frozen cost data and exactly one invoice per completion.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Engine Architecture                              │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │               TransactionService (state machine)                 │  │
//! │  │  create • update • duplicate • drafts • invoices • email         │  │
//! │  └──────┬──────────────────┬──────────────────────┬─────────────────┘  │
//! │         ▼                  ▼                      ▼                     │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────────────────┐  │
//! │  │ CostCapture  │  │ InventoryEngine  │  │ InvoicePipeline          │  │
//! │  │ Resolver     │  │                  │  │                          │  │
//! │  │ recursive    │  │ deduct / reverse │  │ atomic status lock       │  │
//! │  │ composites   │  │ errors as data   │  │ render → upload → record │  │
//! │  └──────────────┘  └──────────────────┘  └────────────┬─────────────┘  │
//! │                                                       │                 │
//! │                                          ┌────────────▼─────────────┐  │
//! │                                          │ InvoiceTask (detached)   │  │
//! │                                          │ watch channel for status │  │
//! │                                          └──────────────────────────┘  │
//! │                                                                         │
//! │  Collaborators (injected): InvoiceRenderer, RemoteStorage,             │
//! │  EmailSender, DiscountPolicy, AuditSink                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`service`] - `TransactionService`, requests and outcomes
//! - [`cost`] - Cost capture at completion time
//! - [`inventory`] - Stock deduction and reversal
//! - [`invoice`] - Invoice pipeline with the generation lock
//! - [`tasks`] - Background invoice task handle
//! - [`collaborators`] - Traits for external services plus default implementations
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`error`] - Engine error types with HTTP status mapping
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apothecary_core::{Actor, Role};
//! use apothecary_engine::{CreateTransactionRequest, EngineConfig, TransactionService};
//!
//! let config = EngineConfig::load_or_default(None);
//! let service = TransactionService::open(config).await?;
//!
//! let actor = Actor::new("user-1", Role::Staff);
//! let outcome = service.create(&actor, CreateTransactionRequest::new(items)).await?;
//!
//! // Invoice rendering continues in the background.
//! if let Some(task) = outcome.invoice_task {
//!     println!("Invoice: {}", task.wait().await);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod collaborators;
pub mod config;
pub mod cost;
pub mod error;
pub mod inventory;
pub mod invoice;
pub mod service;
pub mod tasks;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use collaborators::{
    AuditAction, AuditEvent, AuditSink, CollaboratorError, DiscountPolicy, DiscountScope,
    EmailSender, InvoiceEmail, InvoiceRenderer, LocalDirectoryStorage, LogEmailSender,
    PlainTextInvoiceRenderer, PolicyDecision, RemoteStorage, RoleDiscountPolicy, StoredObject,
    TracingAuditSink,
};
pub use config::EngineConfig;
pub use cost::{CostCaptureReport, CostCaptureResolver};
pub use error::{ApiError, EngineError, EngineResult, ErrorCode};
pub use inventory::{InventoryEngine, InventoryReport, ReversalReport};
pub use invoice::{InvoiceOutcome, InvoicePipeline};
pub use service::{
    CreateOutcome, CreateTransactionRequest, EmailOutcome, ListQuery, SaveDraftRequest,
    TransactionService, TransactionServiceBuilder, UpdateOutcome, UpdateTransactionRequest,
};
pub use tasks::{InvoiceTask, TaskState};
