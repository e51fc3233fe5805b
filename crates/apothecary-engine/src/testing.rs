// Test fixtures and recording fakes shared by the engine's unit tests.
//
// Fakes record what they were asked to do so tests can assert on calls
// without a real renderer, mail server or audit store.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use apothecary_core::invoice::InvoiceDocument;
use apothecary_core::{
    Actor, ItemKind, LineItem, Role, Transaction, TransactionStatus, TransactionType,
};
use apothecary_db::{
    ComponentKind, Composite, CompositeComponent, CompositeKind, Database, DbConfig, Product,
};

use crate::collaborators::{
    AuditAction, AuditEvent, AuditSink, CollaboratorError, EmailSender, InvoiceEmail,
    InvoiceRenderer, LocalDirectoryStorage, PlainTextInvoiceRenderer,
};
use crate::config::EngineConfig;
use crate::service::TransactionService;

// =============================================================================
// Catalog Fixtures
// =============================================================================

pub fn product(id: &str, cost: Option<i64>, stock: i64) -> Product {
    let now = Utc::now();
    Product {
        id: id.to_string(),
        sku: format!("SKU-{}", id.to_uppercase()),
        name: format!("Product {}", id),
        price_cents: 1_000,
        cost_cents: cost,
        current_stock: stock,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// A composite with stock 5 made of `products` and nested `composites`.
pub fn composite(
    id: &str,
    kind: CompositeKind,
    products: &[(&str, i64)],
    composites: &[(&str, i64)],
) -> Composite {
    let now = Utc::now();
    let components = products
        .iter()
        .map(|(component_id, quantity)| CompositeComponent {
            component_kind: ComponentKind::Product,
            component_id: component_id.to_string(),
            quantity: *quantity,
        })
        .chain(composites.iter().map(|(component_id, quantity)| CompositeComponent {
            component_kind: ComponentKind::Composite,
            component_id: component_id.to_string(),
            quantity: *quantity,
        }))
        .collect();

    Composite {
        id: id.to_string(),
        kind,
        name: format!("Composite {}", id),
        price_cents: 2_000,
        current_stock: 5,
        created_at: now,
        updated_at: now,
        components,
    }
}

pub fn line(name: &str, quantity: i64, unit_price_cents: i64, kind: ItemKind) -> LineItem {
    LineItem {
        name: name.to_string(),
        quantity,
        unit_price_cents,
        discount_cents: 0,
        cost_price_cents: None,
        kind,
    }
}

/// p1 (cost 300), p2 (cost 400), bundle b1 = p1 + p2, fixed blend calm = 2×p1 + p2.
pub async fn seed_catalog(db: &Database) {
    let catalog = db.catalog();
    let mut conn = db.pool().acquire().await.unwrap();

    catalog.insert_product(&mut conn, &product("p1", Some(300), 10)).await.unwrap();
    catalog.insert_product(&mut conn, &product("p2", Some(400), 10)).await.unwrap();
    catalog
        .insert_composite(
            &mut conn,
            &composite("b1", CompositeKind::Bundle, &[("p1", 1), ("p2", 1)], &[]),
        )
        .await
        .unwrap();
    catalog
        .insert_composite(
            &mut conn,
            &composite("calm", CompositeKind::FixedBlend, &[("p1", 2), ("p2", 1)], &[]),
        )
        .await
        .unwrap();
}

// =============================================================================
// Transaction Fixtures
// =============================================================================

/// Inserts TXN-20260314-0001: 2×10.00 + 1×5.00, bill discount 2.00, total 23.00.
pub async fn insert_completed(db: &Database, customer: &str) -> Transaction {
    let at = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();
    let mut txn = Transaction::new_draft(
        uuid::Uuid::new_v4().to_string(),
        "TXN-20260314-0001",
        "user-1",
        at,
    );
    txn.status = TransactionStatus::Completed;
    txn.transaction_type = TransactionType::Completed;
    txn.customer_name = Some(customer.to_string());
    txn.items = vec![
        line("Herbal consultation", 2, 1_000, ItemKind::Service),
        line("Follow-up call", 1, 500, ItemKind::Service),
    ];
    txn.discount_cents = 200;
    txn.total_cents = 2_300;

    let mut uow = db.begin().await.unwrap();
    let stored = db.transactions().insert(&mut uow, &txn).await.unwrap();
    uow.commit().await.unwrap();
    stored
}

pub fn staff() -> Actor {
    Actor::new("user-1", Role::Staff)
}

pub fn manager() -> Actor {
    Actor::new("manager-1", Role::Manager)
}

// =============================================================================
// Recording Renderer
// =============================================================================

/// Writes the plain-text layout and counts successful renders.
#[derive(Default)]
pub struct RecordingRenderer {
    failure: Mutex<Option<String>>,
    renders: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let renderer = Self::new();
        renderer.set_failure(Some(message));
        renderer
    }

    /// Holds every render open for `delay`, widening race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InvoiceRenderer for RecordingRenderer {
    async fn render(&self, document: &InvoiceDocument, path: &Path) -> Result<(), CollaboratorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(CollaboratorError::Render(message));
        }

        tokio::fs::write(path, PlainTextInvoiceRenderer::layout(document)).await?;
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Recording Email Sender
// =============================================================================

pub struct RecordingEmailSender {
    sent: Mutex<Vec<InvoiceEmail>>,
    accept: AtomicBool,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            accept: AtomicBool::new(true),
        }
    }

    /// Makes every later send report failure.
    pub fn reject_all(&self) {
        self.accept.store(false, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<InvoiceEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, email: InvoiceEmail) -> bool {
        let accepted = self.accept.load(Ordering::SeqCst);
        if accepted {
            self.sent.lock().unwrap().push(email);
        }
        accepted
    }
}

// =============================================================================
// Recording Audit Sink
// =============================================================================

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().unwrap().iter().map(|e| e.action).collect()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// =============================================================================
// Service Harness
// =============================================================================

/// A service over an in-memory database with a seeded catalog and fakes.
pub struct ServiceHarness {
    pub service: TransactionService,
    pub db: Database,
    pub renderer: Arc<RecordingRenderer>,
    pub email: Arc<RecordingEmailSender>,
    pub audit: Arc<RecordingAuditSink>,
    pub dir: tempfile::TempDir,
}

pub async fn harness() -> ServiceHarness {
    harness_with(RecordingRenderer::new(), |_| {}).await
}

pub async fn harness_with(
    renderer: RecordingRenderer,
    configure: impl FnOnce(&mut EngineConfig),
) -> ServiceHarness {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    seed_catalog(&db).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.store.name = "Green Leaf Apothecary".to_string();
    config.invoice.storage_root = dir.path().to_path_buf();
    config.invoice.public_base_url = "https://files.test".to_string();
    config.email.enabled = true;
    configure(&mut config);

    let renderer = Arc::new(renderer);
    let email = Arc::new(RecordingEmailSender::new());
    let audit = Arc::new(RecordingAuditSink::default());

    let service = TransactionService::builder(db.clone(), config)
        .renderer(renderer.clone())
        .storage(Arc::new(LocalDirectoryStorage::new(
            dir.path().join("remote"),
            "https://files.test",
        )))
        .email_sender(email.clone())
        .audit_sink(audit.clone())
        .build();

    ServiceHarness {
        service,
        db,
        renderer,
        email,
        audit,
        dir,
    }
}
