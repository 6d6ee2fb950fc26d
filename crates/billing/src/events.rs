//! Billing event audit log
//!
//! Append-only record of billing-significant actions. Logging failures are
//! reported but never fail the operation that triggered them.

use sqlx::PgPool;
use studimed_shared::ActorType;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEventType {
    PurchaseCreated,
    EvidenceAttached,
    PurchaseCompleted,
    PurchaseFailed,
    CreditsGranted,
    CreditsDebited,
    PlanCreated,
    PlanUpdated,
    PlanToggled,
    WebhookIgnored,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::PurchaseCreated => "purchase_created",
            BillingEventType::EvidenceAttached => "evidence_attached",
            BillingEventType::PurchaseCompleted => "purchase_completed",
            BillingEventType::PurchaseFailed => "purchase_failed",
            BillingEventType::CreditsGranted => "credits_granted",
            BillingEventType::CreditsDebited => "credits_debited",
            BillingEventType::PlanCreated => "plan_created",
            BillingEventType::PlanUpdated => "plan_updated",
            BillingEventType::PlanToggled => "plan_toggled",
            BillingEventType::WebhookIgnored => "webhook_ignored",
        }
    }
}

/// A single audit entry ready to be written.
#[derive(Debug, Clone)]
pub struct BillingEvent {
    pub event_type: BillingEventType,
    pub actor_type: ActorType,
    pub actor_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub purchase_id: Option<Uuid>,
    pub detail: serde_json::Value,
}

impl BillingEvent {
    pub fn new(event_type: BillingEventType, actor_type: ActorType) -> Self {
        Self {
            event_type,
            actor_type,
            actor_id: None,
            user_id: None,
            purchase_id: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn purchase(mut self, purchase_id: Uuid) -> Self {
        self.purchase_id = Some(purchase_id);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Writer for the `billing_events` table.
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write an audit entry. Errors are logged and swallowed; the audit
    /// trail is best-effort relative to the mutation it describes.
    pub async fn log(&self, event: BillingEvent) {
        let detail = if event.detail.is_null() {
            serde_json::json!({})
        } else {
            event.detail
        };

        let result = sqlx::query(
            r#"
            INSERT INTO billing_events (event_type, actor_type, actor_id, user_id, purchase_id, detail)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.event_type.as_str())
        .bind(event.actor_type.as_str())
        .bind(event.actor_id)
        .bind(event.user_id)
        .bind(event.purchase_id)
        .bind(detail)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                event_type = event.event_type.as_str(),
                user_id = ?event.user_id,
                purchase_id = ?event.purchase_id,
                error = %e,
                "Failed to write billing event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let user = Uuid::new_v4();
        let purchase = Uuid::new_v4();
        let event = BillingEvent::new(BillingEventType::PurchaseCompleted, ActorType::Gateway)
            .user(user)
            .purchase(purchase)
            .detail(serde_json::json!({"credits": 50}));

        assert_eq!(event.event_type.as_str(), "purchase_completed");
        assert_eq!(event.actor_type, ActorType::Gateway);
        assert_eq!(event.user_id, Some(user));
        assert_eq!(event.purchase_id, Some(purchase));
        assert!(event.actor_id.is_none());
    }
}
