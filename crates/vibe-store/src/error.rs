use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule was violated inside the collection's critical section.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("written file {} did not read back: {source}", path.display())]
    Verify {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("gave up writing {collection} after {attempts} attempts: {source}")]
    RetriesExhausted {
        collection: &'static str,
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// True when the collection may not have been written.
    pub fn is_persistence(&self) -> bool {
        !matches!(self, Self::Conflict(_) | Self::NotFound(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
