use thiserror::Error;

/// Everything that can go wrong while serving an edit.
///
/// The first three variants are caused by the request itself and map to HTTP
/// 400; [`EditError::Inference`] covers model and I/O failures and maps to
/// HTTP 500.
#[derive(Debug, Error)]
pub enum EditError {
    /// The request shape is wrong: missing instruction, or zero or two image
    /// sources.
    #[error("{0}")]
    Validation(String),

    /// The supplied bytes do not decode as an image.
    #[error("Cannot identify image file")]
    InvalidImage,

    /// The image could not be fetched from the given URL.
    #[error("Could not download image from URL: {0}")]
    Download(String),

    /// The edit itself failed.
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

impl EditError {
    /// True when the caller, not the server, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidImage | Self::Download(_)
        )
    }
}
