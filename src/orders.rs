use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_AMOUNT, E_CONFLICT, E_NOT_FOUND, E_VALIDATION,
};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{
    ORDER_STATUS_CANCELLED, Order, OrderItem, PAYMENT_STATUS_PENDING, PAYMENT_STATUS_VERIFIED,
    PaymentMethod, order_status_rank,
};

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItem>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub shipping_address: String,
    pub payment_method_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateOrderRequest {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct CreatePaymentMethodRequest {
    pub name: String,
    pub account_name: String,
    pub account_number: String,
    pub instructions: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdatePaymentMethodRequest {
    pub name: Option<String>,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub instructions: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct AdminOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub items: SqlJson<Vec<OrderItem>>,
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

/// The total is recomputed server-side from the item snapshots; the client's
/// figure is never trusted.
fn order_total(items: &[OrderItem]) -> Option<i64> {
    let mut total: i64 = 0;
    for item in items {
        if item.price < 0 || item.quantity <= 0 {
            return None;
        }
        total = total.checked_add(item.price.checked_mul(item.quantity)?)?;
    }
    Some(total)
}

pub async fn create_order_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<ApiOk<Order>, ApiErrorWithMeta> {
    if req.items.is_empty() {
        return Err(ApiError::BadRequest("order has no items".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }
    if req.customer_name.trim().is_empty()
        || req.customer_phone.trim().is_empty()
        || !req.customer_email.contains('@')
        || req.shipping_address.trim().is_empty()
    {
        return Err(
            ApiError::BadRequest("customer contact and shipping address are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let Some(total_amount) = order_total(&req.items) else {
        return Err(ApiError::BadRequest("invalid item price or quantity".into())
            .with_meta(meta)
            .with_code(E_BAD_AMOUNT));
    };

    let method_active: Option<bool> =
        sqlx::query_scalar(r#"SELECT is_active FROM payment_methods WHERE id = $1"#)
            .bind(req.payment_method_id)
            .fetch_optional(&st.pool)
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
    if method_active != Some(true) {
        return Err(ApiError::BadRequest("unknown or inactive payment method".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let order: Order = sqlx::query_as(
        r#"INSERT INTO orders
               (id, user_id, items, total_amount, customer_name, customer_phone,
                customer_email, shipping_address, payment_method_id, notes)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(SqlJson(&req.items))
    .bind(total_amount)
    .bind(req.customer_name.trim())
    .bind(req.customer_phone.trim())
    .bind(req.customer_email.trim())
    .bind(req.shipping_address.trim())
    .bind(req.payment_method_id)
    .bind(req.notes.as_deref())
    .fetch_one(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::created("order placed", order, meta))
}

pub async fn list_my_orders_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<Vec<Order>>, ApiErrorWithMeta> {
    let orders: Vec<Order> =
        sqlx::query_as(r#"SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC"#)
            .bind(user.id)
            .fetch_all(&st.pool)
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("orders fetched", orders, meta))
}

pub async fn admin_list_orders_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<AdminOrder>>, ApiErrorWithMeta> {
    let orders: Vec<AdminOrder> = sqlx::query_as(
        r#"SELECT o.id, o.user_id, u.name AS user_name, o.items, o.total_amount,
                  o.customer_name, o.customer_phone, o.customer_email, o.shipping_address,
                  o.payment_method_id, o.payment_status, o.status, o.notes, o.created_at
           FROM orders o
           JOIN users u ON u.id = o.user_id
           ORDER BY o.created_at DESC"#,
    )
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("orders fetched", orders, meta))
}

/// Fulfilment status only moves forward; `cancelled` is reachable from
/// pending or processing.
fn order_transition_allowed(current: &str, next: &str) -> bool {
    if next == ORDER_STATUS_CANCELLED {
        return matches!(order_status_rank(current), Some(0) | Some(1));
    }
    match (order_status_rank(current), order_status_rank(next)) {
        (Some(cur), Some(nxt)) => nxt > cur,
        _ => false,
    }
}

/// Advances an order. The statuses the precondition was checked against are
/// folded into the UPDATE, so a concurrent PATCH that commits first makes
/// this one match zero rows and surface a 409 instead of writing a stale,
/// possibly backward transition.
pub async fn admin_update_order_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<ApiOk<Order>, ApiErrorWithMeta> {
    let current: Option<Order> = sqlx::query_as(r#"SELECT * FROM orders WHERE id = $1"#)
        .bind(id)
        .fetch_optional(&st.pool)
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some(current) = current else {
        return Err(ApiError::NotFound("order not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    };

    let status = match req.status.as_deref() {
        None => current.status.clone(),
        Some(next) => {
            if !order_transition_allowed(&current.status, next) {
                return Err(ApiError::Conflict(format!(
                    "cannot move order from {} to {}",
                    current.status, next
                ))
                .with_meta(meta)
                .with_code(E_CONFLICT));
            }
            next.to_string()
        }
    };

    let payment_status = match req.payment_status.as_deref() {
        None => current.payment_status.clone(),
        Some(PAYMENT_STATUS_VERIFIED) if current.payment_status == PAYMENT_STATUS_PENDING => {
            PAYMENT_STATUS_VERIFIED.to_string()
        }
        Some(other) => {
            return Err(ApiError::Conflict(format!(
                "cannot move payment from {} to {}",
                current.payment_status, other
            ))
            .with_meta(meta)
            .with_code(E_CONFLICT));
        }
    };

    let notes = req.notes.or(current.notes.clone());

    let updated: Option<Order> = sqlx::query_as(
        r#"UPDATE orders SET status = $1, payment_status = $2, notes = $3
           WHERE id = $4 AND status = $5 AND payment_status = $6
           RETURNING *"#,
    )
    .bind(&status)
    .bind(&payment_status)
    .bind(notes.as_deref())
    .bind(id)
    .bind(&current.status)
    .bind(&current.payment_status)
    .fetch_optional(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    match updated {
        Some(order) => Ok(ApiOk::ok("order updated", order, meta)),
        None => Err(
            ApiError::Conflict("order was updated concurrently; refetch and retry".into())
                .with_meta(meta)
                .with_code(E_CONFLICT),
        ),
    }
}

pub async fn admin_delete_order_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    let res = sqlx::query(r#"DELETE FROM orders WHERE id = $1"#)
        .bind(id)
        .execute(&st.pool)
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("order not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    }

    Ok(ApiOk::ok(
        "order deleted",
        serde_json::json!({ "deleted": id }),
        meta,
    ))
}

pub async fn list_payment_methods_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<PaymentMethod>>, ApiErrorWithMeta> {
    let methods: Vec<PaymentMethod> =
        sqlx::query_as(r#"SELECT * FROM payment_methods WHERE is_active ORDER BY name"#)
            .fetch_all(&st.pool)
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("payment methods fetched", methods, meta))
}

pub async fn admin_list_payment_methods_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<PaymentMethod>>, ApiErrorWithMeta> {
    let methods: Vec<PaymentMethod> =
        sqlx::query_as(r#"SELECT * FROM payment_methods ORDER BY created_at DESC"#)
            .fetch_all(&st.pool)
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("payment methods fetched", methods, meta))
}

pub async fn admin_create_payment_method_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreatePaymentMethodRequest>,
) -> Result<ApiOk<PaymentMethod>, ApiErrorWithMeta> {
    if req.name.trim().is_empty()
        || req.account_name.trim().is_empty()
        || req.account_number.trim().is_empty()
    {
        return Err(
            ApiError::BadRequest("name, account name and account number are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let method: PaymentMethod = sqlx::query_as(
        r#"INSERT INTO payment_methods (id, name, account_name, account_number, instructions)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(req.account_name.trim())
    .bind(req.account_number.trim())
    .bind(req.instructions.as_deref())
    .fetch_one(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::created("payment method created", method, meta))
}

pub async fn admin_update_payment_method_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdatePaymentMethodRequest>,
) -> Result<ApiOk<PaymentMethod>, ApiErrorWithMeta> {
    let method: Option<PaymentMethod> = sqlx::query_as(
        r#"UPDATE payment_methods
           SET name = COALESCE($1, name),
               account_name = COALESCE($2, account_name),
               account_number = COALESCE($3, account_number),
               instructions = COALESCE($4, instructions),
               is_active = COALESCE($5, is_active)
           WHERE id = $6
           RETURNING *"#,
    )
    .bind(req.name.as_deref())
    .bind(req.account_name.as_deref())
    .bind(req.account_number.as_deref())
    .bind(req.instructions.as_deref())
    .bind(req.is_active)
    .bind(id)
    .fetch_optional(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    match method {
        Some(method) => Ok(ApiOk::ok("payment method updated", method, meta)),
        None => Err(ApiError::NotFound("payment method not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND)),
    }
}

pub async fn admin_delete_payment_method_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    let res = sqlx::query(r#"DELETE FROM payment_methods WHERE id = $1"#)
        .bind(id)
        .execute(&st.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.code().as_deref() == Some("23503") {
                    return ApiError::Conflict(
                        "payment method has orders; deactivate it instead".into(),
                    )
                    .with_meta(meta.clone())
                    .with_code(E_CONFLICT);
                }
            }
            ApiErrorWithMeta::db(&meta, e)
        })?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("payment method not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    }

    Ok(ApiOk::ok(
        "payment method deleted",
        serde_json::json!({ "deleted": id }),
        meta,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: i64, quantity: i64) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            name: "widget".to_string(),
            price,
            quantity,
        }
    }

    #[test]
    fn order_total_sums_snapshots() {
        assert_eq!(order_total(&[item(500, 2), item(250, 1)]), Some(1250));
    }

    #[test]
    fn order_total_rejects_bad_quantities() {
        assert_eq!(order_total(&[item(500, 0)]), None);
        assert_eq!(order_total(&[item(-1, 1)]), None);
        assert_eq!(order_total(&[item(i64::MAX, 2)]), None);
    }

    #[test]
    fn order_transitions_only_move_forward() {
        use crate::types::{
            ORDER_STATUS_COMPLETED, ORDER_STATUS_PENDING, ORDER_STATUS_PROCESSING,
            ORDER_STATUS_SHIPPED,
        };

        assert!(order_transition_allowed(ORDER_STATUS_PENDING, ORDER_STATUS_PROCESSING));
        assert!(order_transition_allowed(ORDER_STATUS_PENDING, ORDER_STATUS_COMPLETED));
        assert!(order_transition_allowed(ORDER_STATUS_PROCESSING, ORDER_STATUS_SHIPPED));

        // A stale writer trying to rewind a shipped order must be refused.
        assert!(!order_transition_allowed(ORDER_STATUS_SHIPPED, ORDER_STATUS_PROCESSING));
        assert!(!order_transition_allowed(ORDER_STATUS_COMPLETED, ORDER_STATUS_SHIPPED));
        assert!(!order_transition_allowed(ORDER_STATUS_PENDING, ORDER_STATUS_PENDING));
        assert!(!order_transition_allowed(ORDER_STATUS_PENDING, "bogus"));
    }

    #[test]
    fn cancellation_is_only_reachable_early() {
        use crate::types::{
            ORDER_STATUS_COMPLETED, ORDER_STATUS_PENDING, ORDER_STATUS_PROCESSING,
            ORDER_STATUS_SHIPPED,
        };

        assert!(order_transition_allowed(ORDER_STATUS_PENDING, ORDER_STATUS_CANCELLED));
        assert!(order_transition_allowed(ORDER_STATUS_PROCESSING, ORDER_STATUS_CANCELLED));
        assert!(!order_transition_allowed(ORDER_STATUS_SHIPPED, ORDER_STATUS_CANCELLED));
        assert!(!order_transition_allowed(ORDER_STATUS_COMPLETED, ORDER_STATUS_CANCELLED));
        assert!(!order_transition_allowed(ORDER_STATUS_CANCELLED, ORDER_STATUS_PENDING));
    }
}
