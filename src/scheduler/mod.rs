use std::collections::BTreeMap;
use std::io::Write;

use k8s_openapi::api::core::v1::Pod;

use crate::pod_watcher::PodWatch;

pub mod kube;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("kubernetes api error while {action_description}: {raw_error_message}")]
    Api {
        action_description: String,
        raw_error_message: String,
    },

    #[error("build log stream interrupted: {raw_error_message}")]
    LogStream { raw_error_message: String },
}

impl SchedulerError {
    pub fn new_api_error(action_description: &str, raw_error_message: String) -> SchedulerError {
        SchedulerError::Api {
            action_description: action_description.to_string(),
            raw_error_message,
        }
    }
}

/// Kubernetes surface the orchestrator drives. One implementation talks to
/// a real cluster; tests substitute their own.
pub trait Scheduler: Send + Sync {
    fn namespace(&self) -> &str;

    /// Posts the builder pod. Pods are not deleted afterwards; failed ones
    /// are left around for debugging.
    fn create_build_pod(&self, pod: &Pod) -> Result<(), SchedulerError>;

    /// Creates or replaces the per app environment secret.
    fn upsert_env_secret(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), SchedulerError>;

    /// Deletes the per app environment secret; absent secrets are fine.
    fn delete_env_secret(&self, name: &str) -> Result<(), SchedulerError>;

    /// Reads the off cluster registry credentials secret of the build
    /// namespace.
    fn registry_credentials(&self) -> Result<BTreeMap<String, String>, SchedulerError>;

    /// Starts a pod list-watch for the build namespace.
    fn watch_pods(&self) -> Result<Box<dyn PodWatch>, SchedulerError>;

    /// Follows the builder container log until it closes, copying it to
    /// `out`.
    fn stream_pod_logs(&self, pod_name: &str, out: &mut dyn Write) -> Result<(), SchedulerError>;

    /// Exit codes of all terminated containers of the pod.
    fn pod_exit_codes(&self, pod_name: &str) -> Result<Vec<i32>, SchedulerError>;
}
