//! # apothecary-db: Database Layer for the Back Office
//!
//! SQLite storage for transaction documents, day-scoped sequence counters,
//! the product/composite catalog and inventory movements.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Back-Office Data Flow                            │
//! │                                                                         │
//! │  TransactionService (apothecary-engine)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  apothecary-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ TransactionRepo    │  │            │  │   │
//! │  │   │ SqlitePool    │◄───│ SequenceRepo       │  │ 001_init   │  │   │
//! │  │   │ UnitOfWork    │    │ CatalogRepo        │  │            │  │   │
//! │  │   │               │    │ MovementRepo       │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, units of work
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apothecary_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("apothecary.db")).await?;
//! let seq = db.sequences().next_value("txn-20260314").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, UnitOfWork};

pub use repository::catalog::{
    CatalogRepository, ComponentKind, Composite, CompositeComponent, CompositeKind, Product,
};
pub use repository::movement::InventoryMovementRepository;
pub use repository::sequence::SequenceRepository;
pub use repository::transaction::TransactionRepository;
