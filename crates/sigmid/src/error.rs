/// The single error enum every fallible API in this crate returns.
///
/// Errors bubble up unchanged through `?`; the XML validator is the one exception, wrapping
/// whatever it hits as [Error::InvalidValue] with the reason logged alongside the byte position.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required argument was absent.
    #[error("required argument was absent")]
    NullPointer,

    /// An internal precondition was violated, for instance a tag where the schema required
    /// another.
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },

    /// Malformed external input, for instance a document that is not well formed.
    #[error("malformed input: {reason}")]
    ExtInvalidValue { reason: String },

    /// Slab exhaustion.
    #[error("slab pool exhausted")]
    MemoryAllocFailure,

    /// An OS interaction failed (file, thread, transport).
    #[error("system failure: {reason}")]
    SystemFailure { reason: String },
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Error {
        Error::InvalidValue {
            reason: reason.into(),
        }
    }

    pub fn ext_invalid(reason: impl Into<String>) -> Error {
        Error::ExtInvalidValue {
            reason: reason.into(),
        }
    }

    pub fn system(reason: impl Into<String>) -> Error {
        Error::SystemFailure {
            reason: reason.into(),
        }
    }
}

impl From<premem::Error> for Error {
    fn from(_: premem::Error) -> Error {
        Error::MemoryAllocFailure
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
