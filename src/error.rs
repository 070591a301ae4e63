use std::fmt::Display;

#[derive(Debug)]
pub enum Error {
    NotFound,
    Configuration(String),
    UnsupportedCombination(String),
    WriteFailure(String),
    /// A deferred write action failed after the primary write was committed.
    /// `completed` counts the actions that ran before the failing one.
    PostAction { completed: usize, message: String },
    Storage { query: String, message: String },
    Serialize(String),
    Deserialize(String),
}

impl Error {
    pub(crate) fn storage(query: impl Into<String>, err: impl Display) -> Self {
        Error::Storage {
            query: query.into(),
            message: err.to_string(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "Not found"),
            Error::Configuration(err) => write!(f, "Configuration error: {}", err),
            Error::UnsupportedCombination(err) => write!(f, "Unsupported combination: {}", err),
            Error::WriteFailure(err) => write!(f, "Write failure: {}", err),
            Error::PostAction { completed, message } => write!(
                f,
                "Post-write action failed after {} completed action(s): {}",
                completed, message
            ),
            Error::Storage { query, message } => {
                write!(f, "Storage error: {} (query: {})", message, query)
            }
            Error::Serialize(err) => write!(f, "Serialization error: {}", err),
            Error::Deserialize(err) => write!(f, "Deserialization error: {}", err),
        }
    }
}

impl std::error::Error for Error {}
