use thiserror::Error;

/// Crate-wide error type. The webserver maps these onto HTTP statuses and
/// the library surfaces them as-is.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no storage backend configured")]
    NoStorage,

    #[error("no {0} provider configured")]
    NoProvider(&'static str),

    #[error("provider is not capable of {0}")]
    ProviderNotCapable(&'static str),

    #[error("client is closed")]
    ClientClosed,

    #[error("embedding dimension mismatch: table has {existing}, provider produces {provided}")]
    DimensionMismatch { existing: usize, provided: usize },

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("git error: {0}")]
    Git(#[from] crate::git::GitError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
