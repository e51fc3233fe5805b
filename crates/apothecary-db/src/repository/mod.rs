//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Two kinds of method live on every repository:                          │
//! │                                                                         │
//! │  &self only          → runs on the pool, one statement, auto-commit     │
//! │  &mut SqliteConnection → runs inside the caller's unit of work          │
//! │                                                                         │
//! │   let mut uow = db.begin().await?;                                      │
//! │   db.transactions().insert(&mut uow, &txn).await?;   ◄─ same UoW        │
//! │   db.movements().insert(&mut uow, &mv).await?;       ◄─ same UoW        │
//! │   uow.commit().await?;                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`transaction::TransactionRepository`] - Transaction documents, drafts, invoice fields
//! - [`sequence::SequenceRepository`] - Day-scoped counters
//! - [`catalog::CatalogRepository`] - Products, bundles, fixed blends
//! - [`movement::InventoryMovementRepository`] - Stock movements

pub mod catalog;
pub mod movement;
pub mod sequence;
pub mod transaction;
