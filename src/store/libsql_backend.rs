//! libSQL backend for `CustomerDirectory` over a local file or remote libSQL server.
//!
//! Queries are built once from the configured table and column names.
//! Identifiers are double-quoted; the customer id is always bound as a
//! parameter.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::{DirectoryConfig, validate_identifier};
use crate::error::DatabaseError;
use crate::store::traits::{CustomerDirectory, DirectorySession};

/// Prepared SQL for the two directory lookups.
#[derive(Debug)]
struct DirectoryQueries {
    customer_email: String,
    cc_recipients: String,
}

impl DirectoryQueries {
    fn from_config(config: &DirectoryConfig) -> Result<Self, DatabaseError> {
        for (key, name) in [
            ("CUSTOMER_TABLE", &config.customer_table),
            ("CUSTOMER_ID_COLUMN", &config.customer_id_column),
            ("CUSTOMER_EMAIL_COLUMN", &config.customer_email_column),
            ("CC_TABLE", &config.cc_table),
            ("CC_EMAIL_COLUMN", &config.cc_email_column),
        ] {
            validate_identifier(key, name).map_err(|e| DatabaseError::Query(e.to_string()))?;
        }

        Ok(Self {
            customer_email: format!(
                "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
                quote_ident(&config.customer_email_column),
                quote_ident(&config.customer_table),
                quote_ident(&config.customer_id_column),
            ),
            cc_recipients: format!(
                "SELECT {} FROM {}",
                quote_ident(&config.cc_email_column),
                quote_ident(&config.cc_table),
            ),
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Read column 0 as a non-blank email address.
fn row_email(row: &libsql::Row) -> Result<Option<String>, libsql::Error> {
    match row.get_value(0)? {
        libsql::Value::Text(s) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        _ => Ok(None),
    }
}

/// libSQL customer directory.
pub struct LibSqlDirectory {
    db: LibSqlDatabase,
    queries: Arc<DirectoryQueries>,
}

impl LibSqlDirectory {
    /// Open the directory described by `config`.
    ///
    /// Local databases must already exist; this service never creates the
    /// customer schema. Remote databases are contacted lazily on first query.
    pub async fn open(config: &DirectoryConfig) -> Result<Self, DatabaseError> {
        let queries = Arc::new(DirectoryQueries::from_config(config)?);

        let db = if config.is_remote() {
            libsql::Builder::new_remote(
                config.url.clone(),
                config.auth_token.expose_secret().to_string(),
            )
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to open remote libSQL database: {e}"))
            })?
        } else {
            let path = Path::new(&config.url);
            if !path.exists() {
                return Err(DatabaseError::Connection(format!(
                    "Database file not found: {}",
                    path.display()
                )));
            }
            libsql::Builder::new_local(path)
                .build()
                .await
                .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?
        };

        info!(remote = config.is_remote(), "Customer directory opened");
        Ok(Self { db, queries })
    }
}

#[async_trait]
impl CustomerDirectory for LibSqlDirectory {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;
        debug!("Directory session opened");
        Ok(Box::new(LibSqlSession {
            conn,
            queries: Arc::clone(&self.queries),
        }))
    }
}

/// One connection, held for the duration of a statement run.
struct LibSqlSession {
    conn: Connection,
    queries: Arc<DirectoryQueries>,
}

#[async_trait]
impl DirectorySession for LibSqlSession {
    async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn
            .query(&self.queries.customer_email, params![customer_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("customer_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                row_email(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("customer_email: {e}"))),
        }
    }

    async fn cc_recipients(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn
            .query(&self.queries.cc_recipients, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("cc_recipients: {e}")))?;

        let mut recipients = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let email = row_email(&row)
                        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                    recipients.extend(email);
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("cc_recipients: {e}"))),
            }
        }
        Ok(recipients)
    }
}

impl Drop for LibSqlSession {
    fn drop(&mut self) {
        debug!("Directory session released");
    }
}
