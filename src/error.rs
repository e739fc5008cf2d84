use thiserror::Error;

/// Taxonomy of errors surfaced by the core (see the error-handling design).
///
/// Validation and filter-syntax errors never touch the store. `NotFound` is
/// distinguished from a generic store failure so read paths can return a
/// 404-shaped result instead of a 500-shaped one. `Duplicate` is reported as
/// a count by the ingestion coordinator, not propagated as a hard failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("empty filter expression")]
    EmptyFilter,

    #[error("missing value at position {0}")]
    MissingValue(usize),

    #[error("missing operator at position {0}")]
    MissingOperator(usize),

    #[error("invalid filter syntax: {0}")]
    InvalidFilterSyntax(String),

    #[error("unexpected token {found:?} at position {pos}")]
    UnexpectedToken { pos: usize, found: String },

    #[error("unexpected end of input")]
    UnexpectedEndOfInput,

    #[error("unclosed parenthesis at position {0}")]
    UnclosedParenthesis(usize),

    #[error("invalid IN clause: {0}")]
    InvalidInClause(String),

    #[error("invalid string value at position {0}")]
    InvalidStringValue(usize),

    #[error("invalid numeric value at position {0}")]
    InvalidNumericValue(usize),

    #[error("filter expression too long: {len} > {max}")]
    FilterTooLong { len: usize, max: usize },

    #[error("filter expression too complex: {clauses} clauses > {max}")]
    FilterTooComplex { clauses: usize, max: usize },

    #[error("invalid field name: {0}")]
    InvalidFieldName(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("fingerprint already claimed: {0}")]
    Duplicate(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation was cancelled")]
    ContextCancelled,
}

impl CoreError {
    /// Whether the caller may usefully retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::PublishFailed(_) | CoreError::Internal(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
