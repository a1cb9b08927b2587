use std::path::PathBuf;

/// Errors that abort a normalization run.
///
/// Each variant names the archive path or entry involved; the underlying
/// cause is kept as the error source.
#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    /// The input could not be opened or is not a valid archive.
    #[error("failed to open input JAR file '{}'", path.display())]
    OpenInputFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The output archive could not be created.
    #[error("failed to create output JAR file '{}'", path.display())]
    CreateOutputFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// A source entry's content could not be located or decoded.
    #[error("failed to open input entry '{name}'")]
    EntryOpenFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// An entry could not be written to the output.
    #[error("failed to write entry '{name}'")]
    EntryWriteFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Reading, checking or recompressing an entry's content failed.
    #[error("failed to copy content for '{name}'")]
    ContentCopyFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The central directory could not be written or the output flushed.
    #[error("failed to finalize output JAR file")]
    FinalizeOutputFailed {
        #[source]
        source: anyhow::Error,
    },
}

impl NormalizeError {
    /// The entry name this error concerns, if it is entry-specific
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            NormalizeError::EntryOpenFailed { name, .. }
            | NormalizeError::EntryWriteFailed { name, .. }
            | NormalizeError::ContentCopyFailed { name, .. } => Some(name),
            _ => None,
        }
    }
}
