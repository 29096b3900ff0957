use carelink_core::errors::StoreError;

/// Error type inside a [`Database::with_conn`](crate::Database::with_conn)
/// closure. Lets repo code use `?` on both rusqlite calls and row helpers;
/// it always leaves the crate as a [`StoreError`].
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Store(StoreError::from(e))
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(msg.unwrap_or_else(|| err.to_string()))
            }
            DbError::Sqlite(e) => StoreError::Database(e.to_string()),
            DbError::Store(e) => e,
        }
    }
}
