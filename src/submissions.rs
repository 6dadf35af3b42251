use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiErrorWithMeta, E_CONFLICT, E_NOT_FOUND, E_VALIDATION};
use crate::ledger::{SubmissionStats, submission_stats};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{EmailSubmission, STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED};

#[derive(Deserialize)]
pub struct CreateSubmissionRequest {
    pub email_address: String,
    pub attached_proof: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateSubmissionRequest {
    pub status: String,
    /// Required on rejection.
    pub rejection_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmissionListQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct MySubmissions {
    pub submissions: Vec<EmailSubmission>,
    pub stats: SubmissionStats,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct AdminSubmission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub email_address: String,
    pub status: String,
    pub price_at_submission: i64,
    pub rejection_reason: Option<String>,
    pub attached_proof: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub async fn list_my_submissions_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiOk<MySubmissions>, ApiErrorWithMeta> {
    let submissions: Vec<EmailSubmission> = sqlx::query_as(
        r#"SELECT * FROM email_submissions WHERE user_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let stats = submission_stats(&submissions);

    Ok(ApiOk::ok(
        "submissions fetched",
        MySubmissions { submissions, stats },
        meta,
    ))
}

/// Submits an email account for review. The payout price is snapshotted from
/// the settings so a later price change never retroactively alters earnings.
pub async fn create_submission_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateSubmissionRequest>,
) -> Result<ApiOk<EmailSubmission>, ApiErrorWithMeta> {
    let email_address = req.email_address.trim().to_lowercase();
    if !email_address.contains('@') || email_address.len() < 5 {
        return Err(ApiError::BadRequest("a valid email address is required".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let submission: EmailSubmission = sqlx::query_as(
        r#"INSERT INTO email_submissions
               (id, user_id, email_address, price_at_submission, attached_proof)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(&email_address)
    .bind(st.config.email_submission_price)
    .bind(req.attached_proof.as_deref())
    .fetch_one(&st.pool)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return ApiError::Conflict("email already submitted".into())
                    .with_meta(meta.clone())
                    .with_code(E_CONFLICT);
            }
        }
        ApiErrorWithMeta::db(&meta, e)
    })?;

    Ok(ApiOk::created("submission received", submission, meta))
}

pub async fn admin_list_submissions_handler(
    State(st): State<AppState>,
    Query(query): Query<SubmissionListQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<AdminSubmission>>, ApiErrorWithMeta> {
    let submissions: Vec<AdminSubmission> = sqlx::query_as(
        r#"SELECT s.id, s.user_id, u.name AS user_name, u.email AS user_email,
                  s.email_address, s.status, s.price_at_submission, s.rejection_reason,
                  s.attached_proof, s.approved_at, s.created_at
           FROM email_submissions s
           JOIN users u ON u.id = s.user_id
           WHERE $1::TEXT IS NULL OR s.status = $1
           ORDER BY s.created_at DESC"#,
    )
    .bind(query.status.as_deref())
    .fetch_all(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    Ok(ApiOk::ok("submissions fetched", submissions, meta))
}

/// Approve or reject a pending submission. The `status = 'pending'` guard
/// makes approval idempotent in effect: a repeated approve matches zero rows
/// and returns 409, so `total_earned` can never be credited twice.
pub async fn admin_update_submission_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateSubmissionRequest>,
) -> Result<ApiOk<EmailSubmission>, ApiErrorWithMeta> {
    let rejection_reason = match req.status.as_str() {
        STATUS_APPROVED => None,
        STATUS_REJECTED => match req.rejection_reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => Some(reason.to_string()),
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

    let approved_at = (req.status == STATUS_APPROVED).then(Utc::now);

    let updated: Option<EmailSubmission> = sqlx::query_as(
        r#"UPDATE email_submissions
           SET status = $1, rejection_reason = $2, approved_at = $3
           WHERE id = $4 AND status = $5
           RETURNING *"#,
    )
    .bind(&req.status)
    .bind(rejection_reason)
    .bind(approved_at)
    .bind(id)
    .bind(STATUS_PENDING)
    .fetch_optional(&st.pool)
    .await
    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let Some(submission) = updated else {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM email_submissions WHERE id = $1)"#)
                .bind(id)
                .fetch_one(&st.pool)
                .await
                .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
        return Err(if exists {
            ApiError::Conflict("submission already processed".into())
                .with_meta(meta)
                .with_code(E_CONFLICT)
        } else {
            ApiError::NotFound("submission not found".into())
                .with_meta(meta)
                .with_code(E_NOT_FOUND)
        });
    };

    Ok(ApiOk::ok("submission updated", submission, meta))
}

pub async fn admin_delete_submission_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    let res = sqlx::query(r#"DELETE FROM email_submissions WHERE id = $1"#)
        .bind(id)
        .execute(&st.pool)
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("submission not found".into())
            .with_meta(meta)
            .with_code(E_NOT_FOUND));
    }

    Ok(ApiOk::ok(
        "submission deleted",
        serde_json::json!({ "deleted": id }),
        meta,
    ))
}
