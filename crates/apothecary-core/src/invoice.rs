//! # Invoice Documents
//!
//! Everything about an invoice that can be decided without I/O: its number,
//! its deterministic file name, and the document handed to the renderer.
//!
//! ## File Naming
//! ```text
//! invoices/{transaction_number}_{customer}_{ddmmyyyy}.pdf
//!
//! invoices/TXN-20260314-0007_Jane_Doe_14032026.pdf
//! ```
//! The stored `invoice_path` is this relative path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::pricing::{transaction_totals, InvoiceTotals};
use crate::types::{PaymentMethod, PaymentStatus, Transaction};
use crate::{INVOICE_DIR, TRANSACTION_NUMBER_PREFIX};

const INVOICE_NUMBER_PREFIX: &str = "INV";

/// Invoice number for a transaction: `TXN-…` becomes `INV-…`.
///
/// ```rust
/// use apothecary_core::invoice::invoice_number;
///
/// assert_eq!(invoice_number("TXN-20260314-0007"), "INV-20260314-0007");
/// ```
pub fn invoice_number(transaction_number: &str) -> String {
    match transaction_number.strip_prefix(TRANSACTION_NUMBER_PREFIX) {
        Some(rest) => format!("{}{}", INVOICE_NUMBER_PREFIX, rest),
        None => format!("{}-{}", INVOICE_NUMBER_PREFIX, transaction_number),
    }
}

/// Reduces a customer name to characters safe in a file name.
fn sanitize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_sep = false;
    for c in value.trim().chars() {
        if c.is_alphanumeric() || c == '-' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        "Walk-in".to_string()
    } else {
        out
    }
}

/// File name of the invoice for the given transaction facts.
pub fn invoice_file_name(
    transaction_number: &str,
    customer_name: &str,
    transaction_date: DateTime<Utc>,
) -> String {
    format!(
        "{}_{}_{}.pdf",
        transaction_number,
        sanitize_component(customer_name),
        transaction_date.format("%d%m%Y")
    )
}

/// Relative path stored in `invoice_path`.
pub fn invoice_relative_path(file_name: &str) -> String {
    format!("{}/{}", INVOICE_DIR, file_name)
}

// =============================================================================
// Invoice Document
// =============================================================================

/// Business details printed in the invoice header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceIssuer {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceLine {
    pub name: String,
    pub item_type: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    pub amount_cents: i64,
}

/// Everything the renderer needs, built from the transaction's denormalized fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceDocument {
    pub invoice_number: String,
    pub transaction_number: String,
    #[ts(as = "String")]
    pub transaction_date: DateTime<Utc>,
    pub issuer: InvoiceIssuer,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub paid_cents: i64,
    pub lines: Vec<InvoiceLine>,
    pub totals: InvoiceTotals,
    pub notes: Option<String>,
}

impl InvoiceDocument {
    pub fn from_transaction(txn: &Transaction, issuer: InvoiceIssuer) -> Self {
        let lines = txn
            .items
            .iter()
            .map(|item| InvoiceLine {
                name: item.name.clone(),
                item_type: item.kind.type_name().to_string(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
                discount_cents: item.discount_cents,
                amount_cents: item.net().cents(),
            })
            .collect();

        InvoiceDocument {
            invoice_number: invoice_number(&txn.transaction_number),
            transaction_number: txn.transaction_number.clone(),
            transaction_date: txn.transaction_date,
            issuer,
            customer_name: txn.customer_display_name().to_string(),
            customer_email: txn.customer_email.clone(),
            customer_phone: txn.customer_phone.clone(),
            customer_address: txn.customer_address.clone(),
            payment_status: txn.payment_status,
            payment_method: txn.payment_method,
            paid_cents: txn.paid_cents,
            lines,
            totals: transaction_totals(txn),
            notes: txn.notes.clone(),
        }
    }

    pub fn file_name(&self) -> String {
        invoice_file_name(
            &self.transaction_number,
            &self.customer_name,
            self.transaction_date,
        )
    }
}
