use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no tag with slug {slug:?}")]
    TagNotFound { slug: String },
    #[error("tag name must not be empty")]
    EmptyTagName,
    #[error("page size must be positive, got {limit}")]
    InvalidLimit { limit: i64 },
    #[error("conflicting writes for tag slug {slug:?} did not settle")]
    ConflictRetryExhausted { slug: String },
    #[error(transparent)]
    Storage(#[from] diesel::result::Error),
}
