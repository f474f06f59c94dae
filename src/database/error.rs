use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Row not found")]
    NotFound,

    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),
}

impl DatabaseError {
    pub fn from_sqlx(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseError::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(e.to_string())
            }
            _ => DatabaseError::Query(e.to_string()),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::UniqueViolation { .. })
    }
}
