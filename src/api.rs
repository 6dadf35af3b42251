use axum::{
    Router, middleware,
    routing::{get, patch, post},
};
use sqlx::PgPool;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{self, require_admin, require_auth};
use crate::config::Config;
use crate::responses::meta_middleware;
use crate::{deposits, investments, orders, submissions, users, withdrawals};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The database pool.
    pub pool: PgPool,
    /// The application configuration.
    pub config: Config,
}

pub fn init_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/auth/register", post(auth::register_handler))
        .route("/api/auth/login", post(auth::login_handler));

    let user = Router::new()
        .route("/api/user/dashboard", get(users::dashboard_handler))
        .route("/api/user/profile", get(users::profile_handler))
        .route("/api/user/referrals", get(users::list_my_referrals_handler))
        .route(
            "/api/user/deposits",
            get(deposits::list_my_deposits_handler).post(deposits::create_deposit_handler),
        )
        .route("/api/user/withdraw", post(withdrawals::create_withdrawal_handler))
        .route(
            "/api/user/withdrawals",
            get(withdrawals::list_my_withdrawals_handler),
        )
        .route(
            "/api/user/email-submissions",
            get(submissions::list_my_submissions_handler)
                .post(submissions::create_submission_handler),
        )
        .route(
            "/api/user/investments",
            get(investments::list_my_investments_handler)
                .post(investments::create_investment_handler),
        )
        .route(
            "/api/user/orders",
            get(orders::list_my_orders_handler).post(orders::create_order_handler),
        )
        .route("/api/plans", get(investments::list_plans_handler))
        .route(
            "/api/shopping-payment-methods",
            get(orders::list_payment_methods_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin = Router::new()
        .route("/api/admin/deposits", get(deposits::admin_list_deposits_handler))
        .route(
            "/api/admin/deposits/{id}",
            patch(deposits::admin_update_deposit_handler),
        )
        .route(
            "/api/admin/withdrawals",
            get(withdrawals::admin_list_withdrawals_handler),
        )
        .route(
            "/api/admin/withdrawals/{id}",
            patch(withdrawals::admin_update_withdrawal_handler)
                .delete(withdrawals::admin_delete_withdrawal_handler),
        )
        .route(
            "/api/admin/email-service",
            get(submissions::admin_list_submissions_handler),
        )
        .route(
            "/api/admin/email-service/{id}",
            patch(submissions::admin_update_submission_handler)
                .delete(submissions::admin_delete_submission_handler),
        )
        .route(
            "/api/admin/plans",
            get(investments::admin_list_plans_handler)
                .post(investments::admin_create_plan_handler),
        )
        .route(
            "/api/admin/plans/{id}",
            patch(investments::admin_update_plan_handler)
                .delete(investments::admin_delete_plan_handler),
        )
        .route(
            "/api/admin/investments",
            get(investments::admin_list_investments_handler),
        )
        .route(
            "/api/admin/investments/{id}",
            patch(investments::admin_update_investment_handler)
                .delete(investments::admin_delete_investment_handler),
        )
        .route("/api/admin/orders", get(orders::admin_list_orders_handler))
        .route(
            "/api/admin/orders/{id}",
            patch(orders::admin_update_order_handler).delete(orders::admin_delete_order_handler),
        )
        .route(
            "/api/admin/shopping-payment-methods",
            get(orders::admin_list_payment_methods_handler)
                .post(orders::admin_create_payment_method_handler),
        )
        .route(
            "/api/admin/shopping-payment-methods/{id}",
            patch(orders::admin_update_payment_method_handler)
                .delete(orders::admin_delete_payment_method_handler),
        )
        .route("/api/admin/users", get(users::admin_list_users_handler))
        .route("/api/admin/users/{id}", patch(users::admin_update_user_handler))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(user)
        .merge(admin)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}
