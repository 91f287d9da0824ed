use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPageOffsetError {
    #[error("value does not fit in a 16-bit page offset")]
    OutOfRange,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("no backing buffer supplied for the page")]
    MissingBuffer,
    #[error("buffer of {len} bytes is too small, at least {required} bytes are needed")]
    BufferTooSmall { len: usize, required: usize },
    #[error("buffer of {len} bytes does not match the page capacity of {capacity} bytes")]
    CapacityMismatch { len: usize, capacity: usize },
    #[error("tuple size must be positive")]
    InvalidTupleSize,
    #[error("invalid page capacity {capacity}")]
    InvalidPageCapacity { capacity: usize },
    #[error("corrupted page header: {reason}")]
    CorruptedHeader { reason: String },
    #[error(transparent)]
    Offset(#[from] InvalidPageOffsetError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema '{0}' has no fields")]
    EmptySchema(String),
    #[error("expected {expected} values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("field '{field}' expects a value of type {expected}")]
    TypeMismatch { field: String, expected: String },
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("field '{field}' holds text that is not valid UTF-8")]
    InvalidText { field: String },
    #[error("unknown field '{0}'")]
    UnknownField(String),
}
