#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStorageError {
    #[error("invalid object key {key:?}")]
    InvalidKey { key: String },

    #[error("object {key:?} not found")]
    NotFound { key: String },

    #[error("permission denied on object {key:?}: {raw_error_message}")]
    PermissionDenied { key: String, raw_error_message: String },

    #[error("object storage unavailable: {raw_error_message}")]
    Unavailable { raw_error_message: String },
}
