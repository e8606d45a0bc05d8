//! Configuration types, built from environment variables.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default subject line for statement emails.
pub const DEFAULT_SUBJECT: &str = "Your Statement from Farmers Choice";

/// Default plaintext body for statement emails.
pub const DEFAULT_BODY: &str = "Please find attached your statement.";

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub directory: DirectoryConfig,
    pub smtp: SmtpConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
}

/// Where statements are read from and moved to.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub statements_dir: PathBuf,
    pub sent_dir: PathBuf,
    /// Upper bound on each customer directory query.
    pub query_timeout: Duration,
}

impl DispatchConfig {
    pub fn new(statements_dir: impl Into<PathBuf>, sent_dir: impl Into<PathBuf>) -> Self {
        Self {
            statements_dir: statements_dir.into(),
            sent_dir: sent_dir.into(),
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Customer directory database settings.
///
/// The table and column names point at an externally owned schema, so
/// none of them are assumed.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Local database path, or a `libsql://` / `https://` URL.
    pub url: String,
    pub auth_token: SecretString,
    pub customer_table: String,
    pub customer_id_column: String,
    pub customer_email_column: String,
    pub cc_table: String,
    pub cc_email_column: String,
}

impl DirectoryConfig {
    /// Settings for a local database using the default schema names.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            url: path.into(),
            auth_token: SecretString::from(String::new()),
            customer_table: "customers".into(),
            customer_id_column: "customer_no".into(),
            customer_email_column: "email".into(),
            cc_table: "default_copy".into(),
            cc_email_column: "email".into(),
        }
    }

    /// Whether `url` names a remote libSQL server rather than a local file.
    pub fn is_remote(&self) -> bool {
        ["libsql://", "http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme))
    }
}

/// Outbound SMTP settings and the fixed message template.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (SMTPS) instead of STARTTLS.
    pub implicit_tls: bool,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub timeout: Duration,
    pub subject: String,
    pub body: String,
}

impl Config {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let server = ServerConfig {
            bind_addr: env.parse_or("BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?,
            port: env.parse_or("PORT", 3000)?,
        };

        let dispatch = DispatchConfig {
            statements_dir: env.string_or("STATEMENTS_DIR", "./Statements").into(),
            sent_dir: env
                .string_or("SENT_STATEMENTS_DIR", "./successful_sent_statements")
                .into(),
            query_timeout: Duration::from_secs(env.parse_or("DIRECTORY_QUERY_TIMEOUT_SECS", 30)?),
        };

        let directory = DirectoryConfig {
            url: env.required("DIRECTORY_DB_URL")?,
            auth_token: SecretString::from(env.string_or("DIRECTORY_DB_AUTH_TOKEN", "")),
            customer_table: env.identifier_or("CUSTOMER_TABLE", "customers")?,
            customer_id_column: env.identifier_or("CUSTOMER_ID_COLUMN", "customer_no")?,
            customer_email_column: env.identifier_or("CUSTOMER_EMAIL_COLUMN", "email")?,
            cc_table: env.identifier_or("CC_TABLE", "default_copy")?,
            cc_email_column: env.identifier_or("CC_EMAIL_COLUMN", "email")?,
        };

        let username = env.required("SMTP_USERNAME")?;
        let smtp = SmtpConfig {
            host: env.string_or("SMTP_HOST", "smtp.office365.com"),
            port: env.parse_or("SMTP_PORT", 587)?,
            implicit_tls: env.parse_or("SMTP_IMPLICIT_TLS", false)?,
            password: SecretString::from(env.required("SMTP_PASSWORD")?),
            from_address: env.string_or("SMTP_FROM", &username),
            username,
            timeout: Duration::from_secs(env.parse_or("SMTP_TIMEOUT_SECS", 30)?),
            subject: env.string_or("STATEMENT_SUBJECT", DEFAULT_SUBJECT),
            body: env.string_or("STATEMENT_BODY", DEFAULT_BODY),
        };

        Ok(Self {
            server,
            dispatch,
            directory,
            smtp,
        })
    }
}

/// Check that `name` can be embedded as a double-quoted SQL identifier.
pub fn validate_identifier(key: &str, name: &str) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid("identifier must not be empty"));
    }
    if name.contains('"') || name.chars().any(char::is_control) {
        return Err(invalid("identifier must not contain quotes or control characters"));
    }
    Ok(())
}

/// Environment accessor. Empty values count as unset.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        }
    }

    fn identifier_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        let name = self.string_or(key, default);
        validate_identifier(key, &name)?;
        Ok(name)
    }
}
