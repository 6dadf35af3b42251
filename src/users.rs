use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiErrorWithMeta, E_NOT_FOUND};
use crate::ledger::{BalanceBreakdown, SubmissionStats, balance_for_user, submission_stats};
use crate::responses::{ApiOk, Pagination, RequestMeta};
use crate::types::{
    EmailSubmission, INVESTMENT_STATUS_ACTIVE, STATUS_PENDING, User, UserProfile,
};

#[derive(Serialize)]
pub struct Dashboard {
    pub balance: BalanceBreakdown,
    pub submissions: SubmissionStats,
    pub active_investments: i64,
    pub pending_deposits: i64,
    pub pending_withdrawals: i64,
}

#[derive(Serialize)]
pub struct Profile {
    pub user: UserProfile,
    pub balance: BalanceBreakdown,
}

/// A direct referral as shown on the referrals page.
#[derive(Serialize, sqlx::FromRow)]
pub struct ReferralEntry {
    pub id: Uuid,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    /// Commission this referral has earned for the caller so far.
    pub commission_earned: i64,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct AdminUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
    pub wallet_balance: i64,
    pub is_blocked: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub is_blocked: Option<bool>,
    pub is_admin: Option<bool>,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    50
}

#[derive(Deserialize)]
pub struct UserListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

pub async fn dashboard_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<Dashboard>, ApiErrorWithMeta> {
    let mut tx = st
        .pool
        .begin()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let balance = balance_for_user(&mut tx, user.id)
        .await
        .map_err(|e| ApiError::Internal(e).with_meta(meta.clone()))?;

    let submissions: Vec<EmailSubmission> =
        sqlx::query_as(r#"SELECT * FROM email_submissions WHERE user_id = $1"#)
            .bind(user.id)
            .fetch_all(tx.as_mut())
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let active_investments: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM investments WHERE user_id = $1 AND status = $2"#,
    )
    .bind(user.id)
    .bind(INVESTMENT_STATUS_ACTIVE)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let pending_deposits: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM deposits WHERE user_id = $1 AND status = $2"#,
    )
    .bind(user.id)
    .bind(STATUS_PENDING)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let pending_withdrawals: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM withdrawals WHERE user_id = $1 AND status = $2"#,
    )
    .bind(user.id)
    .bind(STATUS_PENDING)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    tx.commit()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok(
        "dashboard fetched",
        Dashboard {
            balance,
            submissions: submission_stats(&submissions),
            active_investments,
            pending_deposits,
            pending_withdrawals,
        },
        meta,
    ))
}

pub async fn profile_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<Profile>, ApiErrorWithMeta> {
    let mut tx = st
        .pool
        .begin()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let row: Option<User> = sqlx::query_as(r#"SELECT * FROM users WHERE id = $1"#)
        .bind(user.id)
        .fetch_optional(tx.as_mut())
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound("user not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    };

    let balance = balance_for_user(&mut tx, user.id)
        .await
        .map_err(|e| ApiError::Internal(e).with_meta(meta.clone()))?;

    tx.commit()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok(
        "profile fetched",
        Profile {
            user: row.into(),
            balance,
        },
        meta,
    ))
}

pub async fn list_my_referrals_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<Vec<ReferralEntry>>, ApiErrorWithMeta> {
    let referrals: Vec<ReferralEntry> = sqlx::query_as(
        r#"SELECT u.id, u.name, u.created_at AS joined_at,
                  COALESCE(SUM(rc.amount), 0)::BIGINT AS commission_earned
           FROM users u
           LEFT JOIN referral_credits rc
             ON rc.user_id = u.id AND rc.beneficiary_id = $1
           WHERE u.referred_by = $1
           GROUP BY u.id, u.name, u.created_at
           ORDER BY u.created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("referrals fetched", referrals, meta))
}

pub async fn admin_list_users_handler(
    State(st): State<AppState>,
    Query(query): Query<UserListQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<AdminUser>>, ApiErrorWithMeta> {
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, 200);

    let total: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM users"#)
        .fetch_one(&st.pool)
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let users: Vec<AdminUser> = sqlx::query_as(
        r#"SELECT id, name, email, referral_code, referred_by, wallet_balance,
                  is_blocked, is_admin, created_at
           FROM users ORDER BY created_at DESC
           LIMIT $1 OFFSET $2"#,
    )
    .bind(per_page as i64)
    .bind((page as i64 - 1) * per_page as i64)
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("users fetched", users, meta)
        .with_pagination(Pagination::new(page, per_page, total as u64)))
}

pub async fn admin_update_user_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<ApiOk<AdminUser>, ApiErrorWithMeta> {
    let user: Option<AdminUser> = sqlx::query_as(
        r#"UPDATE users
           SET is_blocked = COALESCE($1, is_blocked),
               is_admin = COALESCE($2, is_admin)
           WHERE id = $3
           RETURNING id, name, email, referral_code, referred_by, wallet_balance,
                     is_blocked, is_admin, created_at"#,
    )
    .bind(req.is_blocked)
    .bind(req.is_admin)
    .bind(id)
    .fetch_optional(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    match user {
        Some(user) => Ok(ApiOk::ok("user updated", user, meta)),
        None => Err(ApiError::NotFound("user not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND)),
    }
}
