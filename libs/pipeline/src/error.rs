use http::{HeaderMap, StatusCode};

/// Media download or re-upload failure. Always fatal for the envelope.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media fetch for {url} returned {status}")]
    Status {
        url: String,
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },
    #[error("media fetch for {url} timed out")]
    Timeout { url: String },
    #[error("media fetch for {url} failed")]
    Transport {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("attachment upload failed")]
    Upload(#[source] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("store operation failed")]
    Store(#[source] anyhow::Error),
    #[error("attachment upload failed")]
    Upload(#[source] anyhow::Error),
}

impl DispatchError {
    /// Short stage name used for error records and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            DispatchError::Media(MediaError::Upload(_)) | DispatchError::Upload(_) => "upload",
            DispatchError::Media(_) => "media",
            DispatchError::Store(_) => "store",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Media(MediaError::Status { .. }) => "E_MEDIA_STATUS",
            DispatchError::Media(MediaError::Timeout { .. }) => "E_MEDIA_TIMEOUT",
            DispatchError::Media(MediaError::Transport { .. }) => "E_MEDIA_TRANSPORT",
            DispatchError::Media(MediaError::Upload(_)) | DispatchError::Upload(_) => "E_UPLOAD",
            DispatchError::Store(_) => "E_STORE",
        }
    }
}

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        DispatchError::Store(err)
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
