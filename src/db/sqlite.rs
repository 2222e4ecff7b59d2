use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

/// Shared handle to the sqlite pool. Everything that persists goes through
/// this: content rows, the task queue, task statuses and the embedding
/// tables.
pub type SqlDb = Arc<SqlitePool>;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open (or create) the database file and bring the schema up to date.
pub async fn init(path: &Path) -> Result<SqlDb> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    connect(options).await
}

/// An in-memory database, used by tests and throwaway clients.
pub async fn init_in_memory() -> Result<SqlDb> {
    // a single connection keeps the :memory: db alive for the pool's lifetime
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory dsn")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(Arc::new(pool))
}

async fn connect(options: SqliteConnectOptions) -> Result<SqlDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(Arc::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_cleanly() {
        let db = init_in_memory().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
            .fetch_one(db.as_ref())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
