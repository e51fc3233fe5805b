//! # Transaction Lifecycle
//!
//! Pure transition planning. The engine asks this module *what* an update
//! means and then carries out the side effects the plan names.
//!
//! ## State Machine
//! ```text
//!                 ┌──────────────── any edit ────────────────┐
//!                 │                                          │
//!                 ▼                                          │
//!  autosave ──► DRAFT ───── status=completed ─────► COMPLETED ──── cancel ───► CANCELLED
//!                 │         or payment=paid           │                          │
//!                 │         (deduct stock,            │ (reverse stock)          │
//!                 │          capture costs,           │                          │
//!                 │          render invoice)          │                          │
//!                 │                                   ✗ back to draft            │
//!                 └────────────── cancel (no stock) ─────────────────────────────┘
//!
//!  create(status=completed) ──► COMPLETED   (atomic with stock deduction)
//! ```
//!
//! Completed → Draft is refused: the document would be editable while its
//! stock stays deducted.

use crate::error::{CoreError, CoreResult};
use crate::types::{PaymentStatus, TransactionStatus, TransactionType};

/// Inputs to a status change, taken from the stored document and the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRequest {
    pub current: TransactionStatus,
    pub current_type: TransactionType,
    /// Status named by the update, if any.
    pub requested: Option<TransactionStatus>,
    /// Payment status after the update is applied.
    pub payment_status: PaymentStatus,
    pub invoice_generated: bool,
    pub items_changed: bool,
}

/// What the engine must do to carry out an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub transaction_type: TransactionType,
    /// Edit of a cancelled transaction: invoice fields must be cleared.
    pub restored: bool,
    pub deduct_inventory: bool,
    pub reverse_inventory: bool,
    pub capture_costs: bool,
    pub generate_invoice: bool,
}

impl TransitionPlan {
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }
}

/// Decides the target status and side effects of an update.
///
/// ## Rules
/// 1. Editing a cancelled transaction restores it to draft and clears its
///    invoice. The same update may still complete it explicitly.
/// 2. A paid transaction is completed, unless the update cancels it.
/// 3. Draft → Completed deducts stock, captures costs and, when no invoice
///    exists yet, renders one.
/// 4. Completed → Cancelled reverses stock.
/// 5. Completed → Draft is an error.
pub fn plan_transition(req: TransitionRequest) -> CoreResult<TransitionPlan> {
    let restored = req.current == TransactionStatus::Cancelled;

    let (base, invoice_generated) = if restored {
        (TransactionStatus::Draft, false)
    } else {
        (req.current, req.invoice_generated)
    };

    let to = if restored {
        match req.requested {
            Some(TransactionStatus::Completed) => TransactionStatus::Completed,
            _ => TransactionStatus::Draft,
        }
    } else {
        let requested = req.requested.unwrap_or(base);
        if req.payment_status == PaymentStatus::Paid && requested != TransactionStatus::Cancelled
        {
            TransactionStatus::Completed
        } else {
            requested
        }
    };

    if base == TransactionStatus::Completed && to == TransactionStatus::Draft {
        return Err(CoreError::InvalidTransition {
            from: req.current,
            to,
        });
    }

    let deduct_inventory = base == TransactionStatus::Draft && to == TransactionStatus::Completed;
    let reverse_inventory =
        base == TransactionStatus::Completed && to == TransactionStatus::Cancelled;
    let capture_costs =
        to == TransactionStatus::Completed && (deduct_inventory || req.items_changed);
    let generate_invoice = deduct_inventory && !invoice_generated;

    let transaction_type = match to {
        TransactionStatus::Completed => TransactionType::Completed,
        TransactionStatus::Draft => TransactionType::Draft,
        TransactionStatus::Cancelled => req.current_type,
    };

    Ok(TransitionPlan {
        from: req.current,
        to,
        transaction_type,
        restored,
        deduct_inventory,
        reverse_inventory,
        capture_costs,
        generate_invoice,
    })
}

/// Status and type for a freshly created transaction.
///
/// A paid creation is always completed.
pub fn creation_status(
    requested: TransactionStatus,
    payment_status: PaymentStatus,
) -> (TransactionStatus, TransactionType) {
    match (requested, payment_status) {
        (TransactionStatus::Cancelled, _) => (TransactionStatus::Cancelled, TransactionType::Draft),
        (_, PaymentStatus::Paid) | (TransactionStatus::Completed, _) => {
            (TransactionStatus::Completed, TransactionType::Completed)
        }
        (TransactionStatus::Draft, _) => (TransactionStatus::Draft, TransactionType::Draft),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(current: TransactionStatus, requested: Option<TransactionStatus>) -> TransitionRequest {
        TransitionRequest {
            current,
            current_type: match current {
                TransactionStatus::Draft => TransactionType::Draft,
                _ => TransactionType::Completed,
            },
            requested,
            payment_status: PaymentStatus::Pending,
            invoice_generated: false,
            items_changed: false,
        }
    }

    #[test]
    fn test_draft_to_completed_deducts_and_invoices() {
        let plan = plan_transition(request(
            TransactionStatus::Draft,
            Some(TransactionStatus::Completed),
        ))
        .unwrap();

        assert_eq!(plan.to, TransactionStatus::Completed);
        assert_eq!(plan.transaction_type, TransactionType::Completed);
        assert!(plan.deduct_inventory);
        assert!(plan.capture_costs);
        assert!(plan.generate_invoice);
        assert!(!plan.reverse_inventory);
    }

    #[test]
    fn test_paid_forces_completion() {
        let mut req = request(TransactionStatus::Draft, None);
        req.payment_status = PaymentStatus::Paid;
        let plan = plan_transition(req).unwrap();
        assert_eq!(plan.to, TransactionStatus::Completed);
        assert!(plan.deduct_inventory);
    }

    #[test]
    fn test_paid_does_not_override_cancel() {
        let mut req = request(TransactionStatus::Completed, Some(TransactionStatus::Cancelled));
        req.payment_status = PaymentStatus::Paid;
        let plan = plan_transition(req).unwrap();
        assert_eq!(plan.to, TransactionStatus::Cancelled);
        assert!(plan.reverse_inventory);
        assert_eq!(plan.transaction_type, TransactionType::Completed);
    }

    #[test]
    fn test_existing_invoice_is_not_rendered_again() {
        let mut req = request(TransactionStatus::Draft, Some(TransactionStatus::Completed));
        req.invoice_generated = true;
        let plan = plan_transition(req).unwrap();
        assert!(plan.deduct_inventory);
        assert!(!plan.generate_invoice);
    }

    #[test]
    fn test_edit_of_cancelled_restores_draft() {
        let mut req = request(TransactionStatus::Cancelled, Some(TransactionStatus::Cancelled));
        req.invoice_generated = true;
        let plan = plan_transition(req).unwrap();

        assert!(plan.restored);
        assert_eq!(plan.to, TransactionStatus::Draft);
        assert_eq!(plan.transaction_type, TransactionType::Draft);
        assert!(!plan.deduct_inventory);
        assert!(!plan.reverse_inventory);
    }

    #[test]
    fn test_restored_transaction_can_complete_in_same_update() {
        let mut req = request(TransactionStatus::Cancelled, Some(TransactionStatus::Completed));
        req.invoice_generated = true;
        let plan = plan_transition(req).unwrap();

        assert_eq!(plan.to, TransactionStatus::Completed);
        assert!(plan.deduct_inventory);
        assert!(plan.generate_invoice);
    }

    #[test]
    fn test_completed_to_draft_rejected() {
        let result = plan_transition(request(
            TransactionStatus::Completed,
            Some(TransactionStatus::Draft),
        ));
        assert!(matches!(result, Err(CoreError::InvalidTransition { .. })));
    }

    #[test]
    fn test_completed_item_edit_recaptures_costs_only() {
        let mut req = request(TransactionStatus::Completed, None);
        req.items_changed = true;
        req.invoice_generated = true;
        let plan = plan_transition(req).unwrap();

        assert!(!plan.changes_status());
        assert!(plan.capture_costs);
        assert!(!plan.deduct_inventory);
        assert!(!plan.generate_invoice);
    }

    #[test]
    fn test_draft_cancel_moves_no_stock() {
        let plan = plan_transition(request(
            TransactionStatus::Draft,
            Some(TransactionStatus::Cancelled),
        ))
        .unwrap();
        assert_eq!(plan.to, TransactionStatus::Cancelled);
        assert!(!plan.reverse_inventory);
        assert_eq!(plan.transaction_type, TransactionType::Draft);
    }

    #[test]
    fn test_creation_status() {
        assert_eq!(
            creation_status(TransactionStatus::Draft, PaymentStatus::Paid),
            (TransactionStatus::Completed, TransactionType::Completed)
        );
        assert_eq!(
            creation_status(TransactionStatus::Draft, PaymentStatus::Pending),
            (TransactionStatus::Draft, TransactionType::Draft)
        );
    }
}
