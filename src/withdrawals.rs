use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_AMOUNT, E_CONFLICT, E_NOT_FOUND, E_VALIDATION,
};
use crate::ledger::{allocate_withdrawal, balance_for_user, classify_withdrawal};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED, Withdrawal};

#[derive(Deserialize)]
pub struct CreateWithdrawalRequest {
    pub amount: i64,
    pub payment_method: String,
    pub account_details: String,
}

#[derive(Deserialize)]
pub struct UpdateWithdrawalRequest {
    pub status: String,
    /// Required on approval.
    pub transaction_id: Option<String>,
    /// Required on rejection.
    pub rejected_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct WithdrawalListQuery {
    /// "email" or "other"; anything else means no filter.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct AdminWithdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub amount: i64,
    pub profit_amount: i64,
    pub referral_amount: i64,
    pub payment_method: String,
    pub account_details: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub rejected_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Derived via the shared classifier, never read from the database.
    #[sqlx(default)]
    pub withdrawal_type: String,
}

#[derive(Serialize)]
pub struct AdminWithdrawalList {
    pub withdrawals: Vec<AdminWithdrawal>,
    pub email_count: usize,
    pub other_count: usize,
}

/// Creates a pending withdrawal. The balance snapshot, the allocation across
/// earning buckets and the insert all happen inside one transaction, with the
/// user row locked so two concurrent requests cannot both spend the same
/// funds. The pending row itself reserves the amount.
pub async fn create_withdrawal_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateWithdrawalRequest>,
) -> Result<ApiOk<Withdrawal>, ApiErrorWithMeta> {
    if req.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into())
            .with_meta(meta)
            .with_code(E_BAD_AMOUNT));
    }
    if req.payment_method.trim().is_empty() || req.account_details.trim().is_empty() {
        return Err(
            ApiError::BadRequest("payment method and account details are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let mut tx = st
        .pool
        .begin()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    sqlx::query(r#"SELECT id FROM users WHERE id = $1 FOR UPDATE"#)
        .bind(user.id)
        .execute(tx.as_mut())
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let balance = balance_for_user(&mut tx, user.id)
        .await
        .map_err(|e| ApiError::Internal(e).with_meta(meta.clone()))?;

    if req.amount > balance.total_balance {
        return Err(ApiError::BadRequest("insufficient balance".into())
            .with_meta(meta)
            .with_code(E_BAD_AMOUNT));
    }

    let (profit_amount, referral_amount) = allocate_withdrawal(req.amount, &balance);

    let withdrawal: Withdrawal = sqlx::query_as(
        r#"INSERT INTO withdrawals
               (id, user_id, amount, profit_amount, referral_amount, payment_method, account_details)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(req.amount)
    .bind(profit_amount)
    .bind(referral_amount)
    .bind(req.payment_method.trim())
    .bind(req.account_details.trim())
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    tx.commit()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::created("withdrawal requested", withdrawal, meta))
}

pub async fn list_my_withdrawals_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<Vec<Withdrawal>>, ApiErrorWithMeta> {
    let withdrawals: Vec<Withdrawal> = sqlx::query_as(
        r#"SELECT * FROM withdrawals WHERE user_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("withdrawals fetched", withdrawals, meta))
}

pub async fn admin_list_withdrawals_handler(
    State(st): State<AppState>,
    Query(query): Query<WithdrawalListQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<AdminWithdrawalList>, ApiErrorWithMeta> {
    let mut withdrawals: Vec<AdminWithdrawal> = sqlx::query_as(
        r#"SELECT w.id, w.user_id, u.name AS user_name, u.email AS user_email,
                  w.amount, w.profit_amount, w.referral_amount, w.payment_method,
                  w.account_details, w.transaction_id, w.status, w.rejected_reason,
                  w.created_at
           FROM withdrawals w
           JOIN users u ON u.id = w.user_id
           ORDER BY w.created_at DESC"#,
    )
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let mut email_count = 0;
    let mut other_count = 0;
    for w in &mut withdrawals {
        let kind = classify_withdrawal(w.profit_amount, w.referral_amount);
        w.withdrawal_type = kind.as_str().to_string();
        match kind.as_str() {
            "email" => email_count += 1,
            _ => other_count += 1,
        }
    }

    if let Some(kind) = query.kind.as_deref() {
        if kind == "email" || kind == "other" {
            withdrawals.retain(|w| w.withdrawal_type == kind);
        }
    }

    Ok(ApiOk::ok(
        "withdrawals fetched",
        AdminWithdrawalList {
            withdrawals,
            email_count,
            other_count,
        },
        meta,
    ))
}

/// Approve (records the payout transaction id) or reject (records the reason)
/// a pending withdrawal. Rejection refunds by omission: balances are derived,
/// and a rejected row no longer counts as withdrawn or reserved, so the
/// user's total returns to exactly its pre-request value.
pub async fn admin_update_withdrawal_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateWithdrawalRequest>,
) -> Result<ApiOk<Withdrawal>, ApiErrorWithMeta> {
    let (transaction_id, rejected_reason) = match req.status.as_str() {
        STATUS_APPROVED => match req.transaction_id.as_deref().map(str::trim) {
            Some(tid) if !tid.is_empty() => (Some(tid.to_string()), None),
            _ => {
                return Err(
                    ApiError::BadRequest("transaction id is required on approval".into())
                        .with_meta(meta)
                        .with_code(E_VALIDATION),
                );
            }
        },
        STATUS_REJECTED => match req.rejected_reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => (None, Some(reason.to_string())),
            _ => {
                return Err(
                    ApiError::BadRequest("a reason is required on rejection".into())
                        .with_meta(meta)
                        .with_code(E_VALIDATION),
                );
            }
        },
        _ => {
            return Err(
                ApiError::BadRequest("status must be approved or rejected".into())
                    .with_meta(meta)
                    .with_code(E_VALIDATION),
            );
        }
    };

    let updated: Option<Withdrawal> = sqlx::query_as(
        r#"UPDATE withdrawals
           SET status = $1, transaction_id = $2, rejected_reason = $3
           WHERE id = $4 AND status = $5
           RETURNING *"#,
    )
    .bind(&req.status)
    .bind(transaction_id)
    .bind(rejected_reason)
    .bind(id)
    .bind(STATUS_PENDING)
    .fetch_optional(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some(withdrawal) = updated else {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM withdrawals WHERE id = $1)"#)
                .bind(id)
                .fetch_one(&st.pool)
                .await
                .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
        return Err(if exists {
            ApiError::Conflict("withdrawal already processed".into())
                .with_meta(meta)
                .with_code(E_CONFLICT)
        } else {
            ApiError::NotFound("withdrawal not found".into())
                .with_meta(meta)
                .with_code(E_NOT_FOUND)
        });
    };

    Ok(ApiOk::ok("withdrawal updated", withdrawal, meta))
}

pub async fn admin_delete_withdrawal_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    let res = sqlx::query(r#"DELETE FROM withdrawals WHERE id = $1"#)
        .bind(id)
        .execute(&st.pool)
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("withdrawal not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    }

    Ok(ApiOk::ok(
        "withdrawal deleted",
        serde_json::json!({ "deleted": id }),
        meta,
    ))
}
