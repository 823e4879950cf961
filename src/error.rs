use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("no items selected for download")]
    EmptySelection,

    #[error("cannot create download directory {path}: {source}")]
    DownloadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("API returned {status}: {body}")]
    ApiStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("request error: {0}")]
    RequestError(#[from] reqwest::Error),
}
