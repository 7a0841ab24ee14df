use anyhow::{Context, bail};

/// JWT secrets shipped in sample env files. Never accepted.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me", "changeme"];

const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";
const DEFAULT_EMAIL_FROM: &str = "Quill <noreply@quill.local>";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub public_url: String,
    /// `None` when `QUILL_EMAIL_API_KEY` is unset; invites then fail.
    pub email: Option<EmailConfig>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("QUILL_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("QUILL_JWT_SECRET is unset or still a placeholder");
        }

        let port = match var("QUILL_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("QUILL_PORT is not a port number: {}", raw))?,
            None => 3000,
        };

        let email = var("QUILL_EMAIL_API_KEY").map(|api_key| EmailConfig {
            api_url: var("QUILL_EMAIL_API_URL").unwrap_or_else(|| DEFAULT_EMAIL_API_URL.into()),
            api_key,
            from: var("QUILL_EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.into()),
        });

        Ok(Self {
            jwt_secret,
            db_path: var("QUILL_DB_PATH").unwrap_or_else(|| "quill.db".into()),
            host: var("QUILL_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            public_url: var("QUILL_PUBLIC_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            email,
        })
    }
}
