use serde::Deserialize;

fn default_server_port() -> u16 {
    8000
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_email_submission_price() -> i64 {
    5000
}

fn default_db_max_connections() -> u32 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Amount credited per approved email submission, in minor units.
    #[serde(default = "default_email_submission_price")]
    pub email_submission_price: i64,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }
}
