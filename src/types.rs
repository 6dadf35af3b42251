use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

pub const INVESTMENT_STATUS_ACTIVE: &str = "active";
pub const INVESTMENT_STATUS_COMPLETED: &str = "completed";

pub const PAYMENT_STATUS_PENDING: &str = "pending";
pub const PAYMENT_STATUS_VERIFIED: &str = "verified";

pub const ORDER_STATUS_PENDING: &str = "pending";
pub const ORDER_STATUS_PROCESSING: &str = "processing";
pub const ORDER_STATUS_SHIPPED: &str = "shipped";
pub const ORDER_STATUS_COMPLETED: &str = "completed";
pub const ORDER_STATUS_CANCELLED: &str = "cancelled";

/// Position of an order status in the fulfilment sequence. `cancelled` has no
/// rank; it is handled separately.
pub fn order_status_rank(status: &str) -> Option<u8> {
    match status {
        ORDER_STATUS_PENDING => Some(0),
        ORDER_STATUS_PROCESSING => Some(1),
        ORDER_STATUS_SHIPPED => Some(2),
        ORDER_STATUS_COMPLETED => Some(3),
        _ => None,
    }
}

/// A registered user. `referred_by` is a lookup-only self reference.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// The unique code this user hands out to recruit referrals.
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
    pub wallet_balance: i64,
    pub is_blocked: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// The user fields safe to return to clients.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub referral_code: String,
    pub wallet_balance: i64,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        UserProfile {
            id: u.id,
            name: u.name,
            email: u.email,
            referral_code: u.referral_code,
            wallet_balance: u.wallet_balance,
            is_admin: u.is_admin,
            created_at: u.created_at,
        }
    }
}

/// An investment plan. Percentage fields are validated at save time:
/// company + user-keeps must reconcile to 100, and the referral commission is
/// paid out of the company share.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InvestmentPlan {
    pub id: Uuid,
    pub name: String,
    pub min_amount: i64,
    pub max_amount: i64,
    pub profit_percentage: i32,
    pub referral_commission_percentage: i32,
    pub company_percentage: i32,
    pub user_keeps_percentage: i32,
    pub min_duration_days: i32,
    pub max_duration_days: i32,
    pub logo_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An investment. Percentage and duration are snapshots taken at creation;
/// later plan edits never touch existing rows.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Investment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub profit_percentage: i32,
    pub duration_days: i32,
    pub status: String,
    pub profit_earned: i64,
    pub expected_profit: i64,
    pub company_share: i64,
    pub user_keeps_share: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    pub transaction_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A withdrawal request. `profit_amount` and `referral_amount` record how the
/// requested amount was allocated across earning buckets at creation time and
/// never change afterwards.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub profit_amount: i64,
    pub referral_amount: i64,
    pub payment_method: String,
    pub account_details: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub rejected_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An email-account submission. The payout price is snapshotted from the
/// settings at submission time.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EmailSubmission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email_address: String,
    pub status: String,
    pub price_at_submission: i64,
    pub rejection_reason: Option<String>,
    pub attached_proof: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A payment method offered at shop checkout.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub name: String,
    pub account_name: String,
    pub account_number: String,
    pub instructions: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A product snapshot captured inside an order at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub price: i64,
    pub quantity: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Json<Vec<OrderItem>>,
    pub total_amount: i64,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub shipping_address: String,
    pub payment_method_id: Uuid,
    pub payment_status: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_statuses_rank_in_fulfilment_order() {
        let ranks: Vec<_> = [
            ORDER_STATUS_PENDING,
            ORDER_STATUS_PROCESSING,
            ORDER_STATUS_SHIPPED,
            ORDER_STATUS_COMPLETED,
        ]
        .iter()
        .map(|s| order_status_rank(s).unwrap())
        .collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(order_status_rank(ORDER_STATUS_CANCELLED), None);
        assert_eq!(order_status_rank("bogus"), None);
    }
}
