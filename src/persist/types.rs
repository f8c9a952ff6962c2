use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O failure: {0}")]
    Io(String),
    #[error("order {0} not found")]
    NotFound(u64),
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

impl From<sqlx::Error> for PersistError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => PersistError::InvalidRow(e.to_string()),
            other => PersistError::Io(other.to_string()),
        }
    }
}

pub type PersistResult<T> = Result<T, PersistError>;
