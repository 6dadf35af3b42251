//! Backend for a multi-tenant investment platform: registration with referral
//! chains, deposits, investment plans with profit/commission splits,
//! withdrawals, an email-account submission marketplace and a small product
//! order flow, behind user and admin HTTP surfaces.

pub mod api;
pub mod auth;
pub mod config;
pub mod deposits;
pub mod error;
pub mod investments;
pub mod ledger;
pub mod orders;
pub mod responses;
pub mod submissions;
pub mod types;
pub mod users;
pub mod withdrawals;

use anyhow::Context;
use anyhow::Result;
use sqlx::{PgPool, postgres::PgPoolOptions};

pub use api::{AppState, init_router};
pub use config::Config;

/// Initializes the database pool.
pub async fn init_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}
