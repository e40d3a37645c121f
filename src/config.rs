use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Missing key means the collector stays idle; the control API
    /// still serves history queries.
    pub torn_api_key: Option<String>,
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Six-field cron expression for the periodic quantity-only cycle.
    pub poll_schedule: String,
}

impl Config {
    pub fn from_env() -> color_eyre::Result<Self> {
        let torn_api_key = std::env::var("TORN_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| String::from("sqlite://torn-stock.db?mode=rwc"));
        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| String::from("127.0.0.1:3000"))
            .parse()?;
        let poll_schedule =
            std::env::var("POLL_SCHEDULE").unwrap_or_else(|_| String::from("0 */5 * * * *"));

        Ok(Self {
            torn_api_key,
            database_url,
            bind_addr,
            poll_schedule,
        })
    }
}
