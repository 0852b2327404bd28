use thiserror::Error;

use crate::cmd::command::CommandError;
use crate::controller::ControllerError;
use crate::object_storage::errors::ObjectStorageError;
use crate::pod_watcher::WaitError;
use crate::scheduler::SchedulerError;

/// Terminal classification of a build. Every kind maps to a distinct user
/// visible message and a distinct non zero process exit code.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid configuration: {raw_error_message}")]
    InvalidConfig { raw_error_message: String },

    #[error("object storage error: {raw_error}")]
    Storage {
        #[from]
        raw_error: ObjectStorageError,
    },

    #[error("git archive failed: {raw_error}")]
    GitArchive { raw_error: CommandError },

    #[error("io error while {action_description}: {raw_error}")]
    Io {
        action_description: String,
        raw_error: std::io::Error,
    },

    #[error("build pod {pod_name} never reached running state: {raw_error}")]
    BuilderStartTimeout { pod_name: String, raw_error: WaitError },

    #[error("build pod {pod_name} never terminated: {raw_error}")]
    BuilderHang { pod_name: String, raw_error: WaitError },

    #[error("build pod exited with code {code}")]
    BuilderFailed { code: i32 },

    #[error("invalid Procfile: {raw_error_message}")]
    ProcfileInvalid { raw_error_message: String },

    #[error("release publish rejected: {raw_error}")]
    PublishFailed { raw_error: ControllerError },

    #[error("controller error while {action_description}: {raw_error}")]
    Controller {
        action_description: String,
        raw_error: ControllerError,
    },

    #[error("kubernetes error: {raw_error}")]
    Kubernetes {
        #[from]
        raw_error: SchedulerError,
    },

    #[error("build canceled at user request")]
    Canceled,
}

impl BuildError {
    pub fn new_invalid_config(raw_error_message: impl Into<String>) -> BuildError {
        BuildError::InvalidConfig {
            raw_error_message: raw_error_message.into(),
        }
    }

    pub fn new_io_error(action_description: &str, raw_error: std::io::Error) -> BuildError {
        BuildError::Io {
            action_description: action_description.to_string(),
            raw_error,
        }
    }

    /// Process exit code reported to the git hook.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::InvalidConfig { .. } => 2,
            BuildError::Storage { .. } => 3,
            BuildError::GitArchive { .. } => 4,
            BuildError::BuilderStartTimeout { .. } => 5,
            BuildError::BuilderHang { .. } => 6,
            BuildError::BuilderFailed { .. } => 7,
            BuildError::ProcfileInvalid { .. } => 8,
            BuildError::PublishFailed { .. } => 9,
            BuildError::Canceled => 10,
            BuildError::Kubernetes { .. } => 11,
            BuildError::Io { .. } => 12,
            BuildError::Controller { .. } => 13,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BuildError;
    use crate::object_storage::errors::ObjectStorageError;

    #[test]
    fn test_builder_failed_message_carries_exit_code() {
        let err = BuildError::BuilderFailed { code: 7 };
        assert_eq!(err.to_string(), "build pod exited with code 7");
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_exit_codes_are_distinct_and_non_zero() {
        let errors = vec![
            BuildError::new_invalid_config("x"),
            BuildError::from(ObjectStorageError::Unavailable {
                raw_error_message: "down".to_string(),
            }),
            BuildError::BuilderFailed { code: 1 },
            BuildError::ProcfileInvalid {
                raw_error_message: "x".to_string(),
            },
            BuildError::Canceled,
        ];

        let mut codes: Vec<i32> = errors.iter().map(BuildError::exit_code).collect();
        assert!(codes.iter().all(|code| *code != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
