use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL must start with postgres:// or postgresql://")]
    InvalidDatabaseUrl,
}

/// True when the error is a Postgres unique-constraint violation (SQLSTATE
/// 23505). Settlement relies on this to turn a lost insert race on
/// `payments.provider_tx_id` into an idempotent no-op.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}
