use thiserror::Error;

pub type SharedResult<T> = Result<T, SharedTypeError>;

/// Errors raised while building model values from text or loose JSON.
#[derive(Debug, Error)]
pub enum SharedTypeError {
    /// A field value outside its accepted set, such as an unknown chain name.
    #[error("invalid {field} '{value}'")]
    InvalidValue { field: &'static str, value: String },
    /// Input of the wrong shape altogether.
    #[error("unsupported input: {0}")]
    Unsupported(String),
}
