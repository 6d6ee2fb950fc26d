//! Domain enums shared across the billing crates
//!
//! Stored as TEXT columns; services bind `as_str()` and parse rows back
//! through `FromStr`. Keeping the string forms here means the SQL in the
//! billing crate and the JSON on the wire can never drift apart.

use serde::{Deserialize, Serialize};

/// Error returned when a persisted or client-supplied string does not
/// name a known variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct TypeParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle of a purchase attempt.
///
/// `Pending -> WaitingApproval -> Completed | Failed` for the manual flow,
/// or `Pending -> Completed | Failed` directly via gateway webhook.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    WaitingApproval,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::WaitingApproval => "waiting_approval",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "waiting_approval" => Ok(PaymentStatus::WaitingApproval),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(TypeParseError {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a pricing plan sells: one-time credits, a time-boxed subscription,
/// or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleType {
    Credits,
    Subscription,
    Hybrid,
}

impl BundleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleType::Credits => "credits",
            BundleType::Subscription => "subscription",
            BundleType::Hybrid => "hybrid",
        }
    }

    /// `duration_days` is only meaningful for subscription and hybrid plans.
    pub fn requires_duration(&self) -> bool {
        matches!(self, BundleType::Subscription | BundleType::Hybrid)
    }

    /// Whether completing a purchase of this bundle opens a subscription
    /// period.
    pub fn grants_subscription(&self) -> bool {
        self.requires_duration()
    }
}

impl std::str::FromStr for BundleType {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credits" => Ok(BundleType::Credits),
            "subscription" => Ok(BundleType::Subscription),
            "hybrid" => Ok(BundleType::Hybrid),
            other => Err(TypeParseError {
                kind: "bundle type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for BundleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a purchase is paid for. `Manual` is the bank-transfer flow with
/// uploaded evidence and admin approval; the rest settle via gateway
/// webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Manual,
    Midtrans,
    Xendit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Manual => "manual",
            PaymentMethod::Midtrans => "midtrans",
            PaymentMethod::Xendit => "xendit",
        }
    }

    pub fn all() -> [PaymentMethod; 3] {
        [
            PaymentMethod::Manual,
            PaymentMethod::Midtrans,
            PaymentMethod::Xendit,
        ]
    }

    /// Gateway methods carry an order reference the webhook looks up.
    pub fn is_gateway(&self) -> bool {
        !matches!(self, PaymentMethod::Manual)
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(PaymentMethod::Manual),
            "midtrans" => Ok(PaymentMethod::Midtrans),
            "xendit" => Ok(PaymentMethod::Xendit),
            other => Err(TypeParseError {
                kind: "payment method",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who performed a billing-significant action, for the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Admin,
    Gateway,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Admin => "admin",
            ActorType::Gateway => "gateway",
            ActorType::System => "system",
        }
    }
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
