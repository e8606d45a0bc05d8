//! Directory traits: the two query shapes the dispatcher needs.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// Source of sessions against the customer directory.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Open a session for one statement run.
    ///
    /// The session is released when the returned value is dropped.
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DatabaseError>;
}

/// A live session against the customer directory.
#[async_trait]
pub trait DirectorySession: Send + Sync {
    /// Email address on file for a customer, if any.
    async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, DatabaseError>;

    /// Addresses copied on every statement email.
    async fn cc_recipients(&self) -> Result<Vec<String>, DatabaseError>;
}
