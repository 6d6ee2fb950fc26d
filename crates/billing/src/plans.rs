//! Pricing plan catalog
//!
//! Admin-managed catalog of purchasable bundles. Plans are never
//! hard-deleted; visibility is controlled by `is_active` and the shared
//! soft-delete convention.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use studimed_shared::{BundleType, PaymentMethod};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PricingPlan {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub price: i64,
    pub bundle_type: String,
    pub duration_days: Option<i32>,
    pub credits_included: i64,
    pub is_active: bool,
    pub is_popular: bool,
    pub discount_percent: i32,
    pub display_order: i32,
    pub payment_methods: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PricingPlan {
    pub fn bundle(&self) -> BillingResult<BundleType> {
        Ok(BundleType::from_str(&self.bundle_type)?)
    }

    /// Payment methods this plan may be purchased with.
    pub fn allowed_methods(&self) -> Vec<PaymentMethod> {
        self.payment_methods
            .split(',')
            .filter_map(|m| PaymentMethod::from_str(m.trim()).ok())
            .collect()
    }

    pub fn allows_method(&self, method: PaymentMethod) -> bool {
        self.allowed_methods().contains(&method)
    }

    /// Price after the display discount, floored to whole rupiah.
    pub fn discounted_price(&self) -> i64 {
        if self.discount_percent <= 0 {
            return self.price;
        }
        self.price - (self.price * self.discount_percent as i64) / 100
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlan {
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub price: i64,
    pub bundle_type: BundleType,
    pub duration_days: Option<i32>,
    #[serde(default)]
    pub credits_included: i64,
    #[serde(default)]
    pub is_popular: bool,
    #[serde(default)]
    pub discount_percent: i32,
    #[serde(default)]
    pub display_order: i32,
    pub payment_methods: Vec<PaymentMethod>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub duration_days: Option<i32>,
    pub credits_included: Option<i64>,
    pub is_popular: Option<bool>,
    pub discount_percent: Option<i32>,
    pub display_order: Option<i32>,
    pub payment_methods: Option<Vec<PaymentMethod>>,
}

fn validate_new_plan(plan: &NewPlan) -> BillingResult<()> {
    if plan.name.trim().is_empty() {
        return Err(BillingError::Validation("plan name is required".into()));
    }
    if plan.price < 0 {
        return Err(BillingError::Validation("price must be non-negative".into()));
    }
    if plan.credits_included < 0 {
        return Err(BillingError::Validation(
            "credits_included must be non-negative".into(),
        ));
    }
    if !(0..=100).contains(&plan.discount_percent) {
        return Err(BillingError::Validation(
            "discount_percent must be between 0 and 100".into(),
        ));
    }
    if plan.bundle_type.requires_duration() {
        match plan.duration_days {
            Some(days) if days > 0 => {}
            _ => {
                return Err(BillingError::Validation(format!(
                    "duration_days is required for {} plans",
                    plan.bundle_type
                )))
            }
        }
    }
    if plan.payment_methods.is_empty() {
        return Err(BillingError::Validation(
            "at least one payment method is required".into(),
        ));
    }
    Ok(())
}

fn methods_column(methods: &[PaymentMethod]) -> String {
    methods
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

const PLAN_COLUMNS: &str = "id, name, code, description, price, bundle_type, duration_days, \
     credits_included, is_active, is_popular, discount_percent, display_order, \
     payment_methods, created_at, updated_at";

/// Service over `pricing_plans`.
#[derive(Clone)]
pub struct PlanService {
    pool: PgPool,
}

impl PlanService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Plans shown on the public pricing page.
    pub async fn list_active(&self) -> BillingResult<Vec<PricingPlan>> {
        let plans = sqlx::query_as::<_, PricingPlan>(&format!(
            r#"
            SELECT {PLAN_COLUMNS}
            FROM pricing_plans
            WHERE is_active = TRUE AND deleted_at IS NULL
            ORDER BY display_order, created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    /// Full catalog for the admin back office, inactive plans included.
    pub async fn list_all(&self) -> BillingResult<Vec<PricingPlan>> {
        let plans = sqlx::query_as::<_, PricingPlan>(&format!(
            r#"
            SELECT {PLAN_COLUMNS}
            FROM pricing_plans
            WHERE deleted_at IS NULL
            ORDER BY display_order, created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn get(&self, plan_id: Uuid) -> BillingResult<PricingPlan> {
        sqlx::query_as::<_, PricingPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM pricing_plans WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::NotFound("pricing plan"))
    }

    pub async fn create(&self, plan: NewPlan) -> BillingResult<PricingPlan> {
        validate_new_plan(&plan)?;

        let created = sqlx::query_as::<_, PricingPlan>(&format!(
            r#"
            INSERT INTO pricing_plans
                (name, code, description, price, bundle_type, duration_days, credits_included,
                 is_popular, discount_percent, display_order, payment_methods)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(&plan.name)
        .bind(&plan.code)
        .bind(&plan.description)
        .bind(plan.price)
        .bind(plan.bundle_type.as_str())
        .bind(plan.duration_days)
        .bind(plan.credits_included)
        .bind(plan.is_popular)
        .bind(plan.discount_percent)
        .bind(plan.display_order)
        .bind(methods_column(&plan.payment_methods))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(plan_id = %created.id, name = %created.name, "Pricing plan created");

        Ok(created)
    }

    pub async fn update(&self, plan_id: Uuid, update: PlanUpdate) -> BillingResult<PricingPlan> {
        let current = self.get(plan_id).await?;

        if let Some(price) = update.price {
            if price < 0 {
                return Err(BillingError::Validation("price must be non-negative".into()));
            }
        }
        if let Some(discount) = update.discount_percent {
            if !(0..=100).contains(&discount) {
                return Err(BillingError::Validation(
                    "discount_percent must be between 0 and 100".into(),
                ));
            }
        }
        // Bundle type is immutable; duration stays required for plans that
        // already carry one.
        if current.bundle()?.requires_duration() {
            if let Some(days) = update.duration_days {
                if days <= 0 {
                    return Err(BillingError::Validation(
                        "duration_days must be positive".into(),
                    ));
                }
            }
        }
        if let Some(methods) = &update.payment_methods {
            if methods.is_empty() {
                return Err(BillingError::Validation(
                    "at least one payment method is required".into(),
                ));
            }
        }

        let updated = sqlx::query_as::<_, PricingPlan>(&format!(
            r#"
            UPDATE pricing_plans SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                price = COALESCE($4, price),
                duration_days = COALESCE($5, duration_days),
                credits_included = COALESCE($6, credits_included),
                is_popular = COALESCE($7, is_popular),
                discount_percent = COALESCE($8, discount_percent),
                display_order = COALESCE($9, display_order),
                payment_methods = COALESCE($10, payment_methods),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan_id)
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.price)
        .bind(update.duration_days)
        .bind(update.credits_included)
        .bind(update.is_popular)
        .bind(update.discount_percent)
        .bind(update.display_order)
        .bind(update.payment_methods.as_deref().map(methods_column))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::NotFound("pricing plan"))?;

        Ok(updated)
    }

    /// Flip the active flag. Returns the new state.
    pub async fn toggle_active(&self, plan_id: Uuid) -> BillingResult<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            UPDATE pricing_plans
            SET is_active = NOT is_active, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING is_active
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        let (is_active,) = row.ok_or(BillingError::NotFound("pricing plan"))?;

        tracing::info!(plan_id = %plan_id, is_active = is_active, "Pricing plan toggled");

        Ok(is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_fixture(bundle_type: &str) -> PricingPlan {
        PricingPlan {
            id: Uuid::new_v4(),
            name: "Paket Koas".to_string(),
            code: Some("KOAS".to_string()),
            description: None,
            price: 150_000,
            bundle_type: bundle_type.to_string(),
            duration_days: Some(30),
            credits_included: 100,
            is_active: true,
            is_popular: false,
            discount_percent: 0,
            display_order: 1,
            payment_methods: "manual,midtrans".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_allowed_methods_parsing() {
        let plan = plan_fixture("hybrid");
        let methods = plan.allowed_methods();
        assert_eq!(methods, vec![PaymentMethod::Manual, PaymentMethod::Midtrans]);
        assert!(plan.allows_method(PaymentMethod::Manual));
        assert!(!plan.allows_method(PaymentMethod::Xendit));
    }

    #[test]
    fn test_allowed_methods_skips_unknown_tokens() {
        let mut plan = plan_fixture("credits");
        plan.payment_methods = "manual, paypal ,xendit".to_string();
        assert_eq!(
            plan.allowed_methods(),
            vec![PaymentMethod::Manual, PaymentMethod::Xendit]
        );
    }

    #[test]
    fn test_discounted_price_floors() {
        let mut plan = plan_fixture("credits");
        plan.price = 99_999;
        plan.discount_percent = 10;
        // 99_999 - 9_999 (floored tenth)
        assert_eq!(plan.discounted_price(), 90_000);

        plan.discount_percent = 0;
        assert_eq!(plan.discounted_price(), 99_999);
    }

    #[test]
    fn test_new_plan_requires_duration_for_subscription() {
        let plan = NewPlan {
            name: "Langganan 30 Hari".to_string(),
            code: None,
            description: None,
            price: 99_000,
            bundle_type: BundleType::Subscription,
            duration_days: None,
            credits_included: 0,
            is_popular: false,
            discount_percent: 0,
            display_order: 0,
            payment_methods: vec![PaymentMethod::Midtrans],
        };

        let err = validate_new_plan(&plan).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn test_new_plan_credits_bundle_needs_no_duration() {
        let plan = NewPlan {
            name: "100 Kredit".to_string(),
            code: None,
            description: None,
            price: 50_000,
            bundle_type: BundleType::Credits,
            duration_days: None,
            credits_included: 100,
            is_popular: false,
            discount_percent: 0,
            display_order: 0,
            payment_methods: vec![PaymentMethod::Manual],
        };

        assert!(validate_new_plan(&plan).is_ok());
    }

    #[test]
    fn test_new_plan_rejects_empty_methods() {
        let plan = NewPlan {
            name: "100 Kredit".to_string(),
            code: None,
            description: None,
            price: 50_000,
            bundle_type: BundleType::Credits,
            duration_days: None,
            credits_included: 100,
            is_popular: false,
            discount_percent: 0,
            display_order: 0,
            payment_methods: vec![],
        };

        assert!(matches!(
            validate_new_plan(&plan),
            Err(BillingError::Validation(_))
        ));
    }
}
