use serde::Serialize;

use crate::io_models::procfile::ProcessTable;
use crate::io_models::AppConfig;

pub mod hooks;

/// Controller api version this engine speaks. A server answering with a
/// different version is logged and tolerated; the response is used as is.
pub const API_VERSION: &str = "2.3";

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("controller api version mismatch: server speaks {server}, client speaks {client}")]
    ApiMismatch { server: String, client: String },

    #[error("controller api version {server} is incompatible with client {client}")]
    IncompatibleApi { server: String, client: String },

    #[error("controller rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("controller request failed: {raw_error_message}")]
    Request { raw_error_message: String },

    #[error("controller response cannot be decoded: {raw_error_message}")]
    InvalidResponse { raw_error_message: String },
}

/// Payload of a release publication.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuildHook {
    pub sha: String,
    pub receive_user: String,
    pub receive_repo: String,
    pub image: String,
    pub stack: String,
    pub procfile: ProcessTable,
    pub is_container: bool,
}

/// Typed rpc surface of the platform controller.
pub trait ControllerClient: Send + Sync {
    /// Fetches the application configuration consumed by the build.
    fn app_config(&self, user: &str, app: &str) -> Result<AppConfig, ControllerError>;

    /// Publishes a release, returning its monotonically increasing version.
    fn create_build(&self, hook: &BuildHook) -> Result<u64, ControllerError>;
}

/// Compares the version advertised by the controller with our own. Absence
/// of the header is treated as compatible (older controllers do not send
/// it). A minor skew is an `ApiMismatch` the callers downgrade to a
/// warning; a different major version, or a version we cannot parse, is
/// `IncompatibleApi` and fatal.
pub fn check_api_compatibility(server_version: Option<&str>) -> Result<(), ControllerError> {
    let server = match server_version {
        None => return Ok(()),
        Some(version) => version,
    };
    if server == API_VERSION {
        return Ok(());
    }

    let major_of = |version: &str| version.split('.').next().and_then(|major| major.parse::<u32>().ok());
    match (major_of(server), major_of(API_VERSION)) {
        (Some(server_major), Some(client_major)) if server_major == client_major => {
            Err(ControllerError::ApiMismatch {
                server: server.to_string(),
                client: API_VERSION.to_string(),
            })
        }
        _ => Err(ControllerError::IncompatibleApi {
            server: server.to_string(),
            client: API_VERSION.to_string(),
        }),
    }
}
