use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_AMOUNT, E_CONFLICT, E_NOT_FOUND, E_VALIDATION,
};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{Deposit, STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED};

#[derive(Deserialize)]
pub struct CreateDepositRequest {
    pub amount: i64,
    pub payment_method: String,
    pub transaction_id: String,
}

#[derive(Deserialize)]
pub struct UpdateDepositRequest {
    pub status: String,
}

/// A deposit row as the admin screen sees it, with the depositor attached.
#[derive(Serialize, sqlx::FromRow)]
pub struct AdminDeposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub amount: i64,
    pub payment_method: String,
    pub transaction_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub async fn create_deposit_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateDepositRequest>,
) -> Result<ApiOk<Deposit>, ApiErrorWithMeta> {
    if req.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into())
            .with_meta(meta)
            .with_code(E_BAD_AMOUNT));
    }
    if req.payment_method.trim().is_empty() || req.transaction_id.trim().is_empty() {
        return Err(
            ApiError::BadRequest("payment method and transaction id are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let deposit: Deposit = sqlx::query_as(
        r#"INSERT INTO deposits (id, user_id, amount, payment_method, transaction_id)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(req.amount)
    .bind(req.payment_method.trim())
    .bind(req.transaction_id.trim())
    .fetch_one(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::created("deposit submitted", deposit, meta))
}

pub async fn list_my_deposits_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<Vec<Deposit>>, ApiErrorWithMeta> {
    let deposits: Vec<Deposit> = sqlx::query_as(
        r#"SELECT * FROM deposits WHERE user_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("deposits fetched", deposits, meta))
}

pub async fn admin_list_deposits_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<AdminDeposit>>, ApiErrorWithMeta> {
    let deposits: Vec<AdminDeposit> = sqlx::query_as(
        r#"SELECT d.id, d.user_id, u.name AS user_name, u.email AS user_email,
                  d.amount, d.payment_method, d.transaction_id, d.status, d.created_at
           FROM deposits d
           JOIN users u ON u.id = d.user_id
           ORDER BY d.created_at DESC"#,
    )
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("deposits fetched", deposits, meta))
}

/// Approve or reject a pending deposit. Approval credits the wallet in the
/// same transaction; the `status = 'pending'` guard means a concurrent second
/// click loses the race and gets a 409 instead of a double credit.
pub async fn admin_update_deposit_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateDepositRequest>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    if req.status != STATUS_APPROVED && req.status != STATUS_REJECTED {
        return Err(
            ApiError::BadRequest("status must be approved or rejected".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let mut tx = st
        .pool
        .begin()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let row: Option<(Uuid, i64)> = sqlx::query_as(
        r#"UPDATE deposits SET status = $1 WHERE id = $2 AND status = $3
           RETURNING user_id, amount"#,
    )
    .bind(&req.status)
    .bind(id)
    .bind(STATUS_PENDING)
    .fetch_optional(tx.as_mut())
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some((user_id, amount)) = row else {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM deposits WHERE id = $1)"#)
                .bind(id)
                .fetch_one(tx.as_mut())
                .await
                .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
        return Err(if exists {
            ApiError::Conflict("deposit already processed".into())
                .with_meta(meta)
                .with_code(E_CONFLICT)
        } else {
            ApiError::NotFound("deposit not found".into())
                .with_meta(meta)
                .with_code(E_NOT_FOUND)
        });
    };

    if req.status == STATUS_APPROVED {
        sqlx::query(r#"UPDATE users SET wallet_balance = wallet_balance + $1 WHERE id = $2"#)
            .bind(amount)
            .bind(user_id)
            .execute(tx.as_mut())
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
    }

    tx.commit()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok(
        "deposit updated",
        serde_json::json!({ "id": id, "status": req.status }),
        meta,
    ))
}
