//! Statement files on disk: naming convention and directory snapshots.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

/// Extension (case-sensitive) a statement file must carry.
pub const STATEMENT_EXTENSION: &str = "pdf";

/// A PDF statement found in the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFile {
    pub path: PathBuf,
    pub file_name: String,
}

impl StatementFile {
    pub fn new(path: PathBuf, file_name: impl Into<String>) -> Self {
        Self {
            path,
            file_name: file_name.into(),
        }
    }

    /// Customer identifier encoded in the file name, if any.
    pub fn customer_id(&self) -> Option<&str> {
        customer_id_from_name(&self.file_name)
    }
}

/// Extract the customer identifier from a statement file name.
///
/// The identifier is the second `_`-delimited token with a trailing `.pdf`
/// removed: `STMT_1001.pdf` → `1001`, `STMT_1001_v2.pdf` → `1001`.
/// Returns `None` when there is no second token or it is empty.
pub fn customer_id_from_name(file_name: &str) -> Option<&str> {
    let token = file_name.split('_').nth(1)?;
    let id = token.strip_suffix(".pdf").unwrap_or(token);
    (!id.is_empty()).then_some(id)
}

/// Whether a file name carries the statement extension.
pub fn is_statement_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext == STATEMENT_EXTENSION)
}

/// Snapshot the PDF statements in `dir` (non-recursive), sorted by name.
///
/// Files created after the snapshot is taken are not observed by the run.
pub async fn list_statements(dir: &Path) -> std::io::Result<Vec<StatementFile>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut statements = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let Ok(file_name) = entry.file_name().into_string() else {
            debug!(path = %entry.path().display(), "Skipping non-UTF-8 file name");
            continue;
        };
        if !is_statement_name(&file_name) {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            debug!(file = %file_name, "Skipping non-file entry");
            continue;
        }
        statements.push(StatementFile::new(entry.path(), file_name));
    }

    statements.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(statements)
}
