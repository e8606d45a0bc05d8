//! Customer directory: read-only lookups against the ERP database.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlDirectory;
pub use traits::{CustomerDirectory, DirectorySession};
