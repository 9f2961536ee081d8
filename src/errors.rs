use std::collections::TryReserveError;

use failure::Fail;

/// The result type used across the kvstore.
pub type Result<T> = std::result::Result<T, KvError>;

/// The Error type of the kvstore and its dicts.
/// Allocation failures wrap `std::collections::TryReserveError`, report failures wrap `serde_json::Error`.
#[derive(Debug, Fail)]
pub enum KvError {
    #[fail(
        display = "Failed to allocate {} because error [{}].",
        what, alloc_error
    )]
    /// a table or index could not be allocated.
    OutOfMemory {
        /// what was being allocated.
        what: String,
        #[cause]
        /// the original allocation failure.
        alloc_error: TryReserveError,
    },
    /// Throws when the dict type given to a kvstore already has a listener.
    #[fail(display = "the dict type already carries rehash hooks; a kvstore must own them exclusively.")]
    HooksAlreadyInstalled,
    #[fail(display = "Failed to serialize report because error [{}]", serde_error)]
    /// The simulation report could not be serialized.
    /// It wraps `serde_json::Error`
    FailToSerialize {
        #[cause]
        /// the inner error.
        serde_error: serde_json::Error,
    },
    #[fail(display = "other exception: {}", reason)]
    /// Any other failure, described by `reason`.
    Other {
        /// why it failed.
        reason: String
    },
}

impl KvError {
    pub(crate) fn out_of_memory(what: impl Into<String>) -> impl FnOnce(TryReserveError) -> KvError {
        let what = what.into();
        move |alloc_error| KvError::OutOfMemory { what, alloc_error }
    }
}

impl From<serde_json::Error> for KvError {
    fn from(serde_error: serde_json::Error) -> Self {
        KvError::FailToSerialize { serde_error }
    }
}
