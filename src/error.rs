use thiserror::Error;

#[derive(Debug, Error)]
pub enum RowBlockError {
    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Index ({row}, {col}) out of bounds for {rows}x{cols} matrix")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Partition error: {0}")]
    Partition(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RowBlockError>;
