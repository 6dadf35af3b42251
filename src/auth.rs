//! Bearer-token auth: registration with referral chains, login, and the
//! middleware that turns `Authorization: Bearer <token>` into an explicit
//! [`AuthUser`] carried through request extensions.

use axum::{
    Extension, Json,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_CONFLICT, E_FORBIDDEN, E_UNAUTHORIZED, E_VALIDATION,
};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{User, UserProfile};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

/// The authenticated caller. Inserted by [`require_auth`]; handlers never
/// look at ambient storage for authorization decisions.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub is_admin: bool,
}

pub fn mint_token(secret: &str, user_id: Uuid, is_admin: bool, ttl_hours: i64) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        is_admin,
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
        iat: now.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

fn new_referral_code() -> String {
    Alphanumeric
        .sample_string(&mut rand::rng(), 8)
        .to_uppercase()
}

/// Registration can trip two unique constraints: the email column, or the
/// referral code when two signups race past the availability check. The
/// message must name the right one.
fn unique_violation_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_referral_code_key") => "referral code collision, please retry",
        Some("users_email_key") => "email already registered",
        _ => "duplicate user record",
    }
}

fn request_meta(req: &Request) -> RequestMeta {
    req.extensions()
        .get::<RequestMeta>()
        .cloned()
        .unwrap_or_default()
}

pub async fn require_auth(
    State(st): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiErrorWithMeta> {
    let meta = request_meta(&req);
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let claims = token
        .and_then(|t| verify_token(&st.config.jwt_secret, t))
        .ok_or_else(|| {
            ApiError::Unauthorized("missing or invalid token".into())
                .with_meta(meta.clone())
                .with_code(E_UNAUTHORIZED)
        })?;

    req.extensions_mut().insert(AuthUser {
        id: claims.sub,
        is_admin: claims.is_admin,
    });
    Ok(next.run(req).await)
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiErrorWithMeta> {
    let meta = request_meta(&req);
    match req.extensions().get::<AuthUser>() {
        Some(user) if user.is_admin => Ok(next.run(req).await),
        _ => Err(ApiError::Forbidden("admin access required".into())
            .with_meta(meta)
            .with_code(E_FORBIDDEN)),
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Referral code of the recruiting user, if any.
    pub referral_code: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

pub async fn register_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RegisterRequest>,
) -> Result<ApiOk<AuthResponse>, ApiErrorWithMeta> {
    let name = req.name.trim();
    let email = req.email.trim().to_lowercase();
    if name.is_empty() || !email.contains('@') || req.password.len() < 6 {
        return Err(
            ApiError::BadRequest("name, valid email and a password of at least 6 characters are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let referred_by: Option<Uuid> = match req.referral_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => {
            let referrer: Option<Uuid> =
                sqlx::query_scalar(r#"SELECT id FROM users WHERE referral_code = $1"#)
                    .bind(code)
                    .fetch_optional(&st.pool)
                    .await
                    .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
            match referrer {
                Some(id) => Some(id),
                None => {
                    return Err(ApiError::BadRequest("unknown referral code".into())
                        .with_meta(meta)
                        .with_code(E_VALIDATION));
                }
            }
        }
        _ => None,
    };

    let password_hash = hash(&req.password, DEFAULT_COST).map_err(|e| {
        ApiError::Internal(e.into()).with_meta(meta.clone())
    })?;

    // Regenerate on the off chance the 8-char code is taken.
    let mut referral_code = new_referral_code();
    loop {
        let taken: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM users WHERE referral_code = $1)"#)
                .bind(&referral_code)
                .fetch_one(&st.pool)
                .await
                .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;
        if !taken {
            break;
        }
        referral_code = new_referral_code();
    }

    let id = Uuid::new_v4();
    let user: User = sqlx::query_as(
        r#"INSERT INTO users (id, name, email, password_hash, referral_code, referred_by)
           VALUES ($1, $2, $3, $4, $5, $6)
           RETURNING *"#,
    )
    .bind(id)
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .bind(&referral_code)
    .bind(referred_by)
    .fetch_one(&st.pool)
    .await
    .map_err(|e| {
        // NOTE: 23505 = unique_violation
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return ApiError::Conflict(
                    unique_violation_message(db_err.constraint()).into(),
                )
                .with_meta(meta.clone())
                .with_code(E_CONFLICT);
            }
        }
        ApiErrorWithMeta::db(&meta, e)
    })?;

    let token = mint_token(&st.config.jwt_secret, user.id, user.is_admin, st.config.token_ttl_hours)
        .map_err(|e| ApiError::Internal(e).with_meta(meta.clone()))?;

    Ok(ApiOk::created(
        "registered",
        AuthResponse {
            token,
            user: user.into(),
        },
        meta,
    ))
}

pub async fn login_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<LoginRequest>,
) -> Result<ApiOk<AuthResponse>, ApiErrorWithMeta> {
    let email = req.email.trim().to_lowercase();

    let user: Option<User> = sqlx::query_as(r#"SELECT * FROM users WHERE email = $1"#)
        .bind(&email)
        .fetch_optional(&st.pool)
        .await
        .map_err(|e| ApiErrorWithMeta::db(&meta, e))?;

    let user = match user {
        Some(u) if verify(&req.password, &u.password_hash).unwrap_or(false) => u,
        _ => {
            return Err(ApiError::Unauthorized("invalid email or password".into())
                .with_meta(meta)
                .with_code(E_UNAUTHORIZED));
        }
    };

    if user.is_blocked {
        return Err(ApiError::Forbidden("account is blocked".into())
            .with_meta(meta)
            .with_code(E_FORBIDDEN));
    }

    let token = mint_token(&st.config.jwt_secret, user.id, user.is_admin, st.config.token_ttl_hours)
        .map_err(|e| ApiError::Internal(e).with_meta(meta.clone()))?;

    Ok(ApiOk::ok(
        "logged in",
        AuthResponse {
            token,
            user: user.into(),
        },
        meta,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_claims() {
        let id = Uuid::new_v4();
        let token = mint_token("test-secret", id, true, 1).unwrap();
        let claims = verify_token("test-secret", &token).unwrap();
        assert_eq!(claims.sub, id);
        assert!(claims.is_admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_rejects_wrong_secret() {
        let token = mint_token("test-secret", Uuid::new_v4(), false, 1).unwrap();
        assert!(verify_token("other-secret", &token).is_none());
    }

    #[test]
    fn unique_violations_name_the_offending_constraint() {
        assert_eq!(
            unique_violation_message(Some("users_email_key")),
            "email already registered"
        );
        assert_eq!(
            unique_violation_message(Some("users_referral_code_key")),
            "referral code collision, please retry"
        );
        assert_eq!(unique_violation_message(None), "duplicate user record");
    }

    #[test]
    fn referral_codes_are_eight_uppercase_alphanumerics() {
        let code = new_referral_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!code.chars().any(|c| c.is_ascii_lowercase()));
    }
}
