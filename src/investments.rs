use anyhow::Result;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_AMOUNT, E_CONFLICT, E_NOT_FOUND, E_VALIDATION,
};
use crate::ledger::{CommissionSplit, percent_of, validate_plan_percentages};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{
    INVESTMENT_STATUS_ACTIVE, INVESTMENT_STATUS_COMPLETED, Investment, InvestmentPlan,
};

fn default_referral_pct() -> i32 {
    7
}

fn default_company_pct() -> i32 {
    80
}

fn default_user_keeps_pct() -> i32 {
    20
}

#[derive(Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    pub min_amount: i64,
    pub max_amount: i64,
    pub profit_percentage: i32,
    #[serde(default = "default_referral_pct")]
    pub referral_commission_percentage: i32,
    #[serde(default = "default_company_pct")]
    pub company_percentage: i32,
    #[serde(default = "default_user_keeps_pct")]
    pub user_keeps_percentage: i32,
    pub min_duration_days: i32,
    pub max_duration_days: i32,
    pub logo_url: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,
    pub profit_percentage: Option<i32>,
    pub referral_commission_percentage: Option<i32>,
    pub company_percentage: Option<i32>,
    pub user_keeps_percentage: Option<i32>,
    pub min_duration_days: Option<i32>,
    pub max_duration_days: Option<i32>,
    pub logo_url: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct CreateInvestmentRequest {
    pub plan_id: Uuid,
    pub amount: i64,
    /// Defaults to the plan's minimum duration.
    pub duration_days: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdateInvestmentRequest {
    pub status: String,
    pub profit_earned: Option<i64>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct AdminInvestment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub amount: i64,
    pub profit_percentage: i32,
    pub duration_days: i32,
    pub status: String,
    pub profit_earned: i64,
    pub expected_profit: i64,
    pub created_at: DateTime<Utc>,
}

fn check_plan_fields(
    meta: &RequestMeta,
    min_amount: i64,
    max_amount: i64,
    profit_pct: i32,
    referral_pct: i32,
    company_pct: i32,
    user_keeps_pct: i32,
    min_days: i32,
    max_days: i32,
) -> Result<(), ApiErrorWithMeta> {
    if min_amount <= 0 || max_amount < min_amount {
        return Err(
            ApiError::BadRequest("amount range must be positive and ordered".into())
                .with_meta(meta.clone())
                .with_code(E_VALIDATION),
        );
    }
    if profit_pct < 0 {
        return Err(ApiError::BadRequest("profit percentage cannot be negative".into())
            .with_meta(meta.clone())
            .with_code(E_VALIDATION));
    }
    if min_days <= 0 || max_days < min_days {
        return Err(
            ApiError::BadRequest("duration range must be positive and ordered".into())
                .with_meta(meta.clone())
                .with_code(E_VALIDATION),
        );
    }
    validate_plan_percentages(referral_pct, company_pct, user_keeps_pct).map_err(|msg| {
        ApiError::BadRequest(msg)
            .with_meta(meta.clone())
            .with_code(E_VALIDATION)
    })
}

pub async fn list_plans_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<InvestmentPlan>>, ApiErrorWithMeta> {
    let plans: Vec<InvestmentPlan> = sqlx::query_as(
        r#"SELECT * FROM investment_plans WHERE is_active ORDER BY min_amount"#,
    )
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("plans fetched", plans, meta))
}

pub async fn admin_list_plans_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<InvestmentPlan>>, ApiErrorWithMeta> {
    let plans: Vec<InvestmentPlan> =
        sqlx::query_as(r#"SELECT * FROM investment_plans ORDER BY created_at DESC"#)
            .fetch_all(&st.pool)
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("plans fetched", plans, meta))
}

pub async fn admin_create_plan_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<ApiOk<InvestmentPlan>, ApiErrorWithMeta> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("plan name is required".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }
    check_plan_fields(
        &meta,
        req.min_amount,
        req.max_amount,
        req.profit_percentage,
        req.referral_commission_percentage,
        req.company_percentage,
        req.user_keeps_percentage,
        req.min_duration_days,
        req.max_duration_days,
    )?;

    let plan: InvestmentPlan = sqlx::query_as(
        r#"INSERT INTO investment_plans
               (id, name, min_amount, max_amount, profit_percentage,
                referral_commission_percentage, company_percentage, user_keeps_percentage,
                min_duration_days, max_duration_days, logo_url)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(req.min_amount)
    .bind(req.max_amount)
    .bind(req.profit_percentage)
    .bind(req.referral_commission_percentage)
    .bind(req.company_percentage)
    .bind(req.user_keeps_percentage)
    .bind(req.min_duration_days)
    .bind(req.max_duration_days)
    .bind(req.logo_url.as_deref())
    .fetch_one(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::created("plan created", plan, meta))
}

pub async fn admin_update_plan_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<ApiOk<InvestmentPlan>, ApiErrorWithMeta> {
    let current: Option<InvestmentPlan> =
        sqlx::query_as(r#"SELECT * FROM investment_plans WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&st.pool)
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some(current) = current else {
        return Err(ApiError::NotFound("plan not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    };

    let name = req.name.unwrap_or(current.name);
    let min_amount = req.min_amount.unwrap_or(current.min_amount);
    let max_amount = req.max_amount.unwrap_or(current.max_amount);
    let profit_pct = req.profit_percentage.unwrap_or(current.profit_percentage);
    let referral_pct = req
        .referral_commission_percentage
        .unwrap_or(current.referral_commission_percentage);
    let company_pct = req.company_percentage.unwrap_or(current.company_percentage);
    let user_keeps_pct = req
        .user_keeps_percentage
        .unwrap_or(current.user_keeps_percentage);
    let min_days = req.min_duration_days.unwrap_or(current.min_duration_days);
    let max_days = req.max_duration_days.unwrap_or(current.max_duration_days);
    let logo_url = req.logo_url.or(current.logo_url);
    let is_active = req.is_active.unwrap_or(current.is_active);

    check_plan_fields(
        &meta,
        min_amount,
        max_amount,
        profit_pct,
        referral_pct,
        company_pct,
        user_keeps_pct,
        min_days,
        max_days,
    )?;

    let plan: InvestmentPlan = sqlx::query_as(
        r#"UPDATE investment_plans
           SET name = $1, min_amount = $2, max_amount = $3, profit_percentage = $4,
               referral_commission_percentage = $5, company_percentage = $6,
               user_keeps_percentage = $7, min_duration_days = $8, max_duration_days = $9,
               logo_url = $10, is_active = $11
           WHERE id = $12
           RETURNING *"#,
    )
    .bind(&name)
    .bind(min_amount)
    .bind(max_amount)
    .bind(profit_pct)
    .bind(referral_pct)
    .bind(company_pct)
    .bind(user_keeps_pct)
    .bind(min_days)
    .bind(max_days)
    .bind(logo_url.as_deref())
    .bind(is_active)
    .bind(id)
    .fetch_one(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("plan updated", plan, meta))
}

pub async fn admin_delete_plan_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    let res = sqlx::query(r#"DELETE FROM investment_plans WHERE id = $1"#)
        .bind(id)
        .execute(&st.pool)
        .await
        .map_err(|e| {
            // 23503 = foreign_key_violation: the plan has investments.
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.code().as_deref() == Some("23503") {
                    return ApiError::Conflict(
                        "plan has investments; deactivate it instead".into(),
                    )
                    .with_meta(meta.clone())
                    .with_code(E_CONFLICT);
                }
            }
            ApiErrorWithMeta::db(&meta, e)
        })?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("plan not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    }

    Ok(ApiOk::ok(
        "plan deleted",
        serde_json::json!({ "deleted": id }),
        meta,
    ))
}

/// The referrer eligible for commission, if any: the investor's recruiter,
/// skipped when the recruiter's account is blocked.
async fn eligible_referrer(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Option<Uuid>> {
    let referred_by: Option<Uuid> =
        sqlx::query_scalar(r#"SELECT referred_by FROM users WHERE id = $1"#)
            .bind(user_id)
            .fetch_one(tx.as_mut())
            .await?;

    if let Some(rid) = referred_by {
        let blocked: Option<bool> =
            sqlx::query_scalar(r#"SELECT is_blocked FROM users WHERE id = $1"#)
                .bind(rid)
                .fetch_optional(tx.as_mut())
                .await?;
        if blocked == Some(false) {
            return Ok(Some(rid));
        }
    }
    Ok(None)
}

/// Creates an investment. The plan's percentages and the chosen duration are
/// snapshotted onto the row, and the referrer's commission is credited in the
/// same transaction. The company/user-keeps amounts are recorded for
/// reporting only; they post nothing to any balance.
pub async fn create_investment_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateInvestmentRequest>,
) -> Result<ApiOk<Investment>, ApiErrorWithMeta> {
    let mut tx = st
        .pool
        .begin()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let plan: Option<InvestmentPlan> =
        sqlx::query_as(r#"SELECT * FROM investment_plans WHERE id = $1 AND is_active"#)
            .bind(req.plan_id)
            .fetch_optional(tx.as_mut())
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some(plan) = plan else {
        return Err(ApiError::NotFound("plan not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    };

    if req.amount < plan.min_amount || req.amount > plan.max_amount {
        return Err(ApiError::BadRequest(format!(
            "amount must be between {} and {}",
            plan.min_amount, plan.max_amount
        ))
        .with_meta(meta)
        .with_code(E_BAD_AMOUNT));
    }

    let duration_days = req.duration_days.unwrap_or(plan.min_duration_days);
    if duration_days < plan.min_duration_days || duration_days > plan.max_duration_days {
        return Err(ApiError::BadRequest(format!(
            "duration must be between {} and {} days",
            plan.min_duration_days, plan.max_duration_days
        ))
        .with_meta(meta)
        .with_code(E_VALIDATION));
    }

    let split = CommissionSplit::compute(
        req.amount,
        plan.referral_commission_percentage,
        plan.company_percentage,
        plan.user_keeps_percentage,
    );
    let expected_profit = percent_of(req.amount, plan.profit_percentage);

    let investment: Investment = sqlx::query_as(
        r#"INSERT INTO investments
               (id, user_id, plan_id, amount, profit_percentage, duration_days,
                expected_profit, company_share, user_keeps_share)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(plan.id)
    .bind(req.amount)
    .bind(plan.profit_percentage)
    .bind(duration_days)
    .bind(expected_profit)
    .bind(split.company_share)
    .bind(split.user_keeps_share)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    if split.referral_payout > 0 {
        let referrer = eligible_referrer(&mut tx, user.id)
            .await
            .map_err(|e| ApiError::Internal(e).with_meta(meta.clone()))?;
        if let Some(beneficiary_id) = referrer {
            sqlx::query(
                r#"INSERT INTO referral_credits (id, investment_id, user_id, beneficiary_id, amount)
                   VALUES ($1, $2, $3, $4, $5)
                   ON CONFLICT (investment_id, beneficiary_id) DO NOTHING"#,
            )
            .bind(Uuid::new_v4())
            .bind(investment.id)
            .bind(user.id)
            .bind(beneficiary_id)
            .bind(split.referral_payout)
            .execute(tx.as_mut())
            .await
            .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
        }
    }

    tx.commit()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::created("investment created", investment, meta))
}

pub async fn list_my_investments_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<Vec<Investment>>, ApiErrorWithMeta> {
    let investments: Vec<Investment> = sqlx::query_as(
        r#"SELECT * FROM investments WHERE user_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("investments fetched", investments, meta))
}

pub async fn admin_list_investments_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<AdminInvestment>>, ApiErrorWithMeta> {
    let investments: Vec<AdminInvestment> = sqlx::query_as(
        r#"SELECT i.id, i.user_id, u.name AS user_name, i.plan_id, p.name AS plan_name,
                  i.amount, i.profit_percentage, i.duration_days, i.status,
                  i.profit_earned, i.expected_profit, i.created_at
           FROM investments i
           JOIN users u ON u.id = i.user_id
           JOIN investment_plans p ON p.id = i.plan_id
           ORDER BY i.created_at DESC"#,
    )
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("investments fetched", investments, meta))
}

/// Marks an active investment completed and records the realized profit.
pub async fn admin_update_investment_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateInvestmentRequest>,
) -> Result<ApiOk<Investment>, ApiErrorWithMeta> {
    if req.status != INVESTMENT_STATUS_COMPLETED {
        return Err(ApiError::BadRequest("status must be completed".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }
    let profit_earned = req.profit_earned.unwrap_or(0);
    if profit_earned < 0 {
        return Err(ApiError::BadRequest("profit cannot be negative".into())
            .with_meta(meta)
            .with_code(E_BAD_AMOUNT));
    }

    let updated: Option<Investment> = sqlx::query_as(
        r#"UPDATE investments SET status = $1, profit_earned = $2
           WHERE id = $3 AND status = $4
           RETURNING *"#,
    )
    .bind(INVESTMENT_STATUS_COMPLETED)
    .bind(profit_earned)
    .bind(id)
    .bind(INVESTMENT_STATUS_ACTIVE)
    .fetch_optional(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some(investment) = updated else {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM investments WHERE id = $1)"#)
                .bind(id)
                .fetch_one(&st.pool)
                .await
                .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
        return Err(if exists {
            ApiError::Conflict("investment already completed".into())
                .with_meta(meta)
                .with_code(E_CONFLICT)
        } else {
            ApiError::NotFound("investment not found".into())
                .with_meta(meta)
                .with_code(E_NOT_FOUND)
        });
    };

    Ok(ApiOk::ok("investment updated", investment, meta))
}

pub async fn admin_delete_investment_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    let mut tx = st
        .pool
        .begin()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    sqlx::query(r#"DELETE FROM referral_credits WHERE investment_id = $1"#)
        .bind(id)
        .execute(tx.as_mut())
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let res = sqlx::query(r#"DELETE FROM investments WHERE id = $1"#)
        .bind(id)
        .execute(tx.as_mut())
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("investment not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    }

    tx.commit()
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok(
        "investment deleted",
        serde_json::json!({ "deleted": id }),
        meta,
    ))
}
