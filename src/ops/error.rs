//! Operation error taxonomy.
//!
//! Every fallible step of a package operation folds into [`OpError`].
//! Resolution and conflict errors happen before the transaction does any
//! work; everything else inside an active transaction triggers rollback
//! through the transaction's drop path.

use thiserror::Error;

use crate::core::conflict::ConflictError;
use crate::core::hooks::HookError;
use crate::core::repo::RepoError;
use crate::core::resolver::ResolveError;
use crate::core::version::VersionError;
use crate::io::extract::ExtractError;
use crate::io::fetch::FetchError;
use crate::store::db::DbError;
use crate::store::transaction::TransactionError;

#[derive(Error, Debug)]
pub enum OpError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("package '{0}' is not installed")]
    NotInstalled(String),

    #[error("'{name}' is required by installed packages: {dependants:?} (use --yes or --force to remove anyway)")]
    RequiredBy {
        name: String,
        dependants: Vec<String>,
    },

    #[error("no repository index available; run `basalt sync` first")]
    NoIndices,

    #[error("package '{0}' is not served by any configured repository")]
    NotAvailable(String),
}

impl OpError {
    /// Process exit code: `2` flags an interrupted transaction the user
    /// must recover from; everything else is `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            OpError::Transaction(TransactionError::PendingRecovery(_)) => 2,
            _ => 1,
        }
    }
}
