//! # Transaction Repository
//!
//! Storage for transaction documents. Line items live inside the document as
//! a JSON column; they have no table of their own.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Full-document writes (optimistic)                                      │
//! │    insert()        new row, version = 1                                 │
//! │    save()          WHERE id = ? AND version = ?  → version + 1          │
//! │    upsert_draft()  ON CONFLICT (draft_id, created_by) → merge           │
//! │                                                                         │
//! │  Field-level conditional writes (never touch version)                   │
//! │    try_lock_invoice()   none|pending|failed → generating                │
//! │    complete_invoice()   generating → completed (+ total heal)           │
//! │    fail_invoice()       generating → failed                             │
//! │    mark_invoice_pending() none|failed → pending                         │
//! │    reset_invoice()      any but generating → none                       │
//! │    heal_total()         total_cents drifted → canonical                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Full-document saves never write invoice columns, so a background invoice
//! task and a concurrent user edit cannot overwrite each other.

use chrono::Utc;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use apothecary_core::{Transaction, TransactionStatus};

type DocumentQuery<'q> = sqlx::query::QueryAs<'q, Sqlite, Transaction, SqliteArguments<'q>>;

const INSERT_DOCUMENT: &str = r#"
    INSERT INTO transactions (
        id, transaction_number, status, transaction_type, items,
        customer_name, customer_email, customer_phone, customer_address,
        discount_cents, total_cents, payment_status, payment_method, paid_cents,
        invoice_generated, invoice_status, invoice_number, invoice_path, invoice_error,
        refunded_cents, refund_reason, refunded_at,
        notes, transaction_date, draft_id, created_by, last_modified_by,
        created_at, updated_at, version
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5,
        ?6, ?7, ?8, ?9,
        ?10, ?11, ?12, ?13, ?14,
        ?15, ?16, ?17, ?18, ?19,
        ?20, ?21, ?22,
        ?23, ?24, ?25, ?26, ?27,
        ?28, ?29, 1
    )
"#;

/// Binds every column of [`INSERT_DOCUMENT`] in order.
fn bind_document<'q>(query: DocumentQuery<'q>, txn: &'q Transaction) -> DocumentQuery<'q> {
    query
        .bind(&txn.id)
        .bind(&txn.transaction_number)
        .bind(txn.status)
        .bind(txn.transaction_type)
        .bind(Json(&txn.items))
        .bind(&txn.customer_name)
        .bind(&txn.customer_email)
        .bind(&txn.customer_phone)
        .bind(&txn.customer_address)
        .bind(txn.discount_cents)
        .bind(txn.total_cents)
        .bind(txn.payment_status)
        .bind(txn.payment_method)
        .bind(txn.paid_cents)
        .bind(txn.invoice_generated)
        .bind(txn.invoice_status)
        .bind(&txn.invoice_number)
        .bind(&txn.invoice_path)
        .bind(&txn.invoice_error)
        .bind(txn.refunded_cents)
        .bind(&txn.refund_reason)
        .bind(txn.refunded_at)
        .bind(&txn.notes)
        .bind(txn.transaction_date)
        .bind(&txn.draft_id)
        .bind(&txn.created_by)
        .bind(&txn.last_modified_by)
        .bind(txn.created_at)
        .bind(txn.updated_at)
}

/// Repository for transaction documents.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a transaction by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Transaction>> {
        let txn = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(txn)
    }

    /// Gets a transaction by ID inside a unit of work.
    pub async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Transaction>> {
        let txn = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(txn)
    }

    pub async fn get_by_number(&self, transaction_number: &str) -> DbResult<Option<Transaction>> {
        let txn = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE transaction_number = ?1",
        )
        .bind(transaction_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(txn)
    }

    /// Newest-first page of transactions, optionally filtered by status.
    ///
    /// Returns the page and the total number of matching rows.
    pub async fn list(
        &self,
        status: Option<TransactionStatus>,
        limit: u32,
        offset: u32,
    ) -> DbResult<(Vec<Transaction>, i64)> {
        let items = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC, transaction_number DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(status)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE (?1 IS NULL OR status = ?1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((items, total))
    }

    /// Draft transactions created by `created_by`, most recently edited first.
    pub async fn list_drafts(&self, created_by: &str) -> DbResult<Vec<Transaction>> {
        let drafts = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE status = 'draft' AND created_by = ?1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(created_by)
        .fetch_all(&self.pool)
        .await?;

        Ok(drafts)
    }

    /// Looks up the document an autosave key points at.
    pub async fn find_draft(
        &self,
        draft_id: &str,
        created_by: &str,
    ) -> DbResult<Option<Transaction>> {
        let txn = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE draft_id = ?1 AND created_by = ?2",
        )
        .bind(draft_id)
        .bind(created_by)
        .fetch_optional(&self.pool)
        .await?;

        Ok(txn)
    }

    // =========================================================================
    // Full-document writes
    // =========================================================================

    /// Inserts a new document. The stored row starts at version 1.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        txn: &Transaction,
    ) -> DbResult<Transaction> {
        debug!(id = %txn.id, transaction_number = %txn.transaction_number, "Inserting transaction");

        let sql = format!("{} RETURNING *", INSERT_DOCUMENT);
        let stored = bind_document(sqlx::query_as::<_, Transaction>(&sql), txn)
            .fetch_one(&mut *conn)
            .await?;

        Ok(stored)
    }

    /// Saves every non-invoice field if the stored version still matches.
    ///
    /// ## Errors
    /// - `DbError::NotFound` if the row is gone
    /// - `DbError::StaleWrite` if someone saved in between
    pub async fn save(
        &self,
        conn: &mut SqliteConnection,
        txn: &Transaction,
    ) -> DbResult<Transaction> {
        let saved = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions SET
                status = ?1,
                transaction_type = ?2,
                items = ?3,
                customer_name = ?4,
                customer_email = ?5,
                customer_phone = ?6,
                customer_address = ?7,
                discount_cents = ?8,
                total_cents = ?9,
                payment_status = ?10,
                payment_method = ?11,
                paid_cents = ?12,
                refunded_cents = ?13,
                refund_reason = ?14,
                refunded_at = ?15,
                notes = ?16,
                transaction_date = ?17,
                last_modified_by = ?18,
                updated_at = ?19,
                version = version + 1
            WHERE id = ?20 AND version = ?21
            RETURNING *
            "#,
        )
        .bind(txn.status)
        .bind(txn.transaction_type)
        .bind(Json(&txn.items))
        .bind(&txn.customer_name)
        .bind(&txn.customer_email)
        .bind(&txn.customer_phone)
        .bind(&txn.customer_address)
        .bind(txn.discount_cents)
        .bind(txn.total_cents)
        .bind(txn.payment_status)
        .bind(txn.payment_method)
        .bind(txn.paid_cents)
        .bind(txn.refunded_cents)
        .bind(&txn.refund_reason)
        .bind(txn.refunded_at)
        .bind(&txn.notes)
        .bind(txn.transaction_date)
        .bind(&txn.last_modified_by)
        .bind(txn.updated_at)
        .bind(&txn.id)
        .bind(txn.version)
        .fetch_optional(&mut *conn)
        .await?;

        match saved {
            Some(saved) => {
                debug!(id = %saved.id, version = saved.version, "Transaction saved");
                Ok(saved)
            }
            None => match self.find_by_id(conn, &txn.id).await? {
                Some(_) => Err(DbError::stale("Transaction", &txn.id)),
                None => Err(DbError::not_found("Transaction", &txn.id)),
            },
        }
    }

    /// Idempotent autosave keyed by `(draft_id, created_by)`.
    ///
    /// A retried autosave updates the same row instead of creating another.
    /// The row's transaction number is kept on update.
    ///
    /// ## Errors
    /// `DbError::Conflict` if the key points at a document that is no longer a draft.
    pub async fn upsert_draft(
        &self,
        conn: &mut SqliteConnection,
        txn: &Transaction,
    ) -> DbResult<Transaction> {
        let sql = format!(
            r#"{}
            ON CONFLICT (draft_id, created_by) WHERE draft_id IS NOT NULL DO UPDATE SET
                items = excluded.items,
                customer_name = excluded.customer_name,
                customer_email = excluded.customer_email,
                customer_phone = excluded.customer_phone,
                customer_address = excluded.customer_address,
                discount_cents = excluded.discount_cents,
                total_cents = excluded.total_cents,
                payment_status = excluded.payment_status,
                payment_method = excluded.payment_method,
                paid_cents = excluded.paid_cents,
                notes = excluded.notes,
                last_modified_by = excluded.last_modified_by,
                updated_at = excluded.updated_at,
                version = transactions.version + 1
            WHERE transactions.status = 'draft'
            RETURNING *
            "#,
            INSERT_DOCUMENT
        );

        let stored = bind_document(sqlx::query_as::<_, Transaction>(&sql), txn)
            .fetch_optional(&mut *conn)
            .await?;

        stored.ok_or_else(|| {
            DbError::Conflict(format!(
                "draft {} is no longer a draft",
                txn.draft_id.as_deref().unwrap_or_default()
            ))
        })
    }

    /// Deletes a document. Its inventory movements are kept.
    pub async fn delete(&self, id: &str) -> DbResult<Option<Transaction>> {
        let deleted =
            sqlx::query_as::<_, Transaction>("DELETE FROM transactions WHERE id = ?1 RETURNING *")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(txn) = &deleted {
            info!(id = %txn.id, transaction_number = %txn.transaction_number, "Transaction deleted");
        }
        Ok(deleted)
    }

    /// Deletes a draft by its autosave key. Non-draft documents are left alone.
    pub async fn delete_draft(
        &self,
        draft_id: &str,
        created_by: &str,
    ) -> DbResult<Option<Transaction>> {
        let deleted = sqlx::query_as::<_, Transaction>(
            r#"
            DELETE FROM transactions
            WHERE draft_id = ?1 AND created_by = ?2 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(draft_id)
        .bind(created_by)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deleted)
    }

    // =========================================================================
    // Field-level invoice writes
    // =========================================================================

    /// Atomically claims invoice generation.
    ///
    /// ```text
    /// UPDATE … SET invoice_status = 'generating'
    /// WHERE id = ? AND invoice_generated = 0
    ///   AND invoice_status NOT IN ('generating', 'completed')
    /// ```
    /// Returns false when another caller holds the lock or the invoice is done.
    /// Safe across processes: the check and the claim are one statement.
    pub async fn try_lock_invoice(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET invoice_status = 'generating', invoice_error = NULL, updated_at = ?2
            WHERE id = ?1
              AND invoice_generated = 0
              AND invoice_status NOT IN ('generating', 'completed')
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        debug!(id = %id, acquired = acquired, "Invoice lock attempt");
        Ok(acquired)
    }

    /// Records a rendered invoice and corrects the stored total in the same statement.
    pub async fn complete_invoice(
        &self,
        id: &str,
        invoice_number: &str,
        invoice_path: &str,
        total_cents: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                invoice_generated = 1,
                invoice_status = 'completed',
                invoice_number = ?2,
                invoice_path = ?3,
                invoice_error = NULL,
                total_cents = ?4,
                updated_at = ?5
            WHERE id = ?1 AND invoice_status = 'generating'
            "#,
        )
        .bind(id)
        .bind(invoice_number)
        .bind(invoice_path)
        .bind(total_cents)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Releases the lock with an error message.
    pub async fn fail_invoice(&self, id: &str, error: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET invoice_status = 'failed', invoice_error = ?2, updated_at = ?3
            WHERE id = ?1 AND invoice_status = 'generating'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Marks an invoice as scheduled for background generation.
    pub async fn mark_invoice_pending(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET invoice_status = 'pending'
            WHERE id = ?1 AND invoice_generated = 0 AND invoice_status IN ('none', 'failed')
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Clears every invoice field. Refused while generation is in flight.
    pub async fn reset_invoice(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                invoice_generated = 0,
                invoice_status = 'none',
                invoice_number = NULL,
                invoice_path = NULL,
                invoice_error = NULL
            WHERE id = ?1 AND invoice_status <> 'generating'
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Corrects a drifted total. Returns true if a correction was written.
    pub async fn heal_total(&self, id: &str, total_cents: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE transactions SET total_cents = ?2 WHERE id = ?1 AND total_cents <> ?2",
        )
        .bind(id)
        .bind(total_cents)
        .execute(&self.pool)
        .await?;

        let healed = result.rows_affected() == 1;
        if healed {
            info!(id = %id, total_cents = total_cents, "Stored total corrected");
        }
        Ok(healed)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
