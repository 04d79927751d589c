use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Base URL the verification link in outgoing mail points at.
    pub public_base_url: String,
    pub mail_from: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:5174".into());
        let mail_from =
            std::env::var("MAIL_FROM").unwrap_or_else(|_| "noreply@accountd.local".into());
        Ok(Self {
            database_url,
            public_base_url,
            mail_from,
        })
    }
}
