//! Statement dispatcher: the batch run behind `GET /send-statements`.
//!
//! A run takes one snapshot of the statements directory and walks it in
//! order. For each PDF it resolves the customer's email, sends the file,
//! and moves it into the sent directory only when the send succeeded.
//! Per-file problems are recorded and skipped; directory failures abandon
//! the rest of the run.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{BatchError, DatabaseError, DispatchError};
use crate::mailer::{Mailer, StatementEmail, join_cc};
use crate::statement::{StatementFile, list_statements};
use crate::store::{CustomerDirectory, DirectorySession};

/// What happened to one statement file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Emailed and moved to the sent directory.
    Sent,
    /// No customer identifier in the file name.
    InvalidName,
    /// No email address on file for the customer.
    NoEmail { customer_id: String },
    /// The email could not be sent; the file was left in place.
    SendFailed { reason: String },
    /// The email was sent but the file could not be moved.
    MoveFailed { reason: String },
}

impl FileStatus {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::InvalidName | Self::NoEmail { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::SendFailed { .. } | Self::MoveFailed { .. })
    }
}

/// Outcome for a single file in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub file: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Report of one statement run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<FileOutcome>,
}

impl RunSummary {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    fn record(&mut self, file: &StatementFile, status: FileStatus) {
        self.outcomes.push(FileOutcome {
            file: file.file_name.clone(),
            status,
        });
    }

    /// Files that reached a final outcome.
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    /// Files emailed and moved.
    pub fn sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == FileStatus::Sent)
            .count()
    }

    /// Files left in place because of their name or a missing email.
    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_skip()).count()
    }

    /// Files whose send or move failed.
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failure()).count()
    }

    /// One-line `sent=N skipped=N failed=N` tally.
    pub fn counts(&self) -> String {
        format!(
            "sent={} skipped={} failed={}",
            self.sent(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Sends statement PDFs to customers and files them away.
///
/// Only one run is in flight at a time; a trigger that arrives while a run
/// is active gets [`DispatchError::AlreadyRunning`].
pub struct StatementDispatcher {
    config: DispatchConfig,
    directory: Arc<dyn CustomerDirectory>,
    mailer: Arc<dyn Mailer>,
    run_lock: Mutex<()>,
}

impl StatementDispatcher {
    pub fn new(
        config: DispatchConfig,
        directory: Arc<dyn CustomerDirectory>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            directory,
            mailer,
            run_lock: Mutex::new(()),
        }
    }

    /// Process every statement currently in the statements directory.
    pub async fn run(&self) -> Result<RunSummary, DispatchError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Statement run requested while another run is active");
            return Err(DispatchError::AlreadyRunning);
        };

        let mut summary = RunSummary::start();
        info!(
            run_id = %summary.run_id,
            dir = %self.config.statements_dir.display(),
            "Statement run started"
        );

        match self.process(&mut summary).await {
            Ok(()) => {
                let summary = summary.finish();
                info!(run_id = %summary.run_id, "Statement run finished: {}", summary.counts());
                Ok(summary)
            }
            Err(source) => {
                let summary = summary.finish();
                error!(
                    run_id = %summary.run_id,
                    "Error processing statements: {source} ({})",
                    summary.counts()
                );
                Err(DispatchError::Aborted {
                    summary: Box::new(summary),
                    source,
                })
            }
        }
    }

    async fn process(&self, summary: &mut RunSummary) -> Result<(), BatchError> {
        let sent_dir = &self.config.sent_dir;
        tokio::fs::create_dir_all(sent_dir)
            .await
            .map_err(|source| BatchError::PrepareSentDir {
                path: sent_dir.clone(),
                source,
            })?;

        // Dropped on every return path, releasing the connection.
        let session = self.directory.connect().await?;

        let statements_dir = &self.config.statements_dir;
        let files = list_statements(statements_dir)
            .await
            .map_err(|source| BatchError::ListDirectory {
                path: statements_dir.clone(),
                source,
            })?;
        info!(count = files.len(), "Found statement files");

        for file in &files {
            let status = self.process_file(session.as_ref(), file).await?;
            summary.record(file, status);
        }

        Ok(())
    }

    async fn process_file(
        &self,
        session: &dyn DirectorySession,
        file: &StatementFile,
    ) -> Result<FileStatus, DatabaseError> {
        let Some(customer_id) = file.customer_id() else {
            warn!(file = %file.file_name, "Invalid file name format: {}", file.file_name);
            return Ok(FileStatus::InvalidName);
        };

        let timeout = self.config.query_timeout;
        let email = with_timeout("customer_email", timeout, session.customer_email(customer_id))
            .await?;
        let Some(customer_email) = email else {
            warn!(
                file = %file.file_name,
                customer_id,
                "No email found for customer: {customer_id}"
            );
            return Ok(FileStatus::NoEmail {
                customer_id: customer_id.to_string(),
            });
        };

        // Re-read per file so edits to the CC table take effect mid-run.
        let cc = with_timeout("cc_recipients", timeout, session.cc_recipients()).await?;

        let message = StatementEmail {
            to: customer_email,
            cc,
            attachment_path: file.path.clone(),
            attachment_name: file.file_name.clone(),
        };

        if let Err(e) = self.mailer.send_statement(&message).await {
            error!(
                file = %file.file_name,
                to = %message.to,
                "Failed to send email to {}: {e}",
                message.to
            );
            return Ok(FileStatus::SendFailed {
                reason: e.to_string(),
            });
        }
        info!(
            file = %file.file_name,
            customer_id,
            to = %message.to,
            cc = %join_cc(&message.cc),
            "Statement emailed"
        );

        Ok(self.move_to_sent(file).await)
    }

    async fn move_to_sent(&self, file: &StatementFile) -> FileStatus {
        let target = self.config.sent_dir.join(&file.file_name);
        match tokio::fs::rename(&file.path, &target).await {
            Ok(()) => {
                info!(file = %file.file_name, "File moved to {}", target.display());
                FileStatus::Sent
            }
            Err(e) => {
                error!(
                    file = %file.file_name,
                    target = %target.display(),
                    "Failed to move sent statement: {e}"
                );
                FileStatus::MoveFailed {
                    reason: move_error(&file.path, &target, &e),
                }
            }
        }
    }
}

fn move_error(from: &Path, to: &Path, e: &std::io::Error) -> String {
    format!("rename {} -> {}: {e}", from.display(), to.display())
}

async fn with_timeout<T>(
    query: &str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, DatabaseError>>,
) -> Result<T, DatabaseError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DatabaseError::Timeout {
            query: query.to_string(),
            timeout,
        })?
}
