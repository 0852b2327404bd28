use std::collections::BTreeMap;
use std::io::Write;

use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};

use crate::build_pod::{BUILDER_CONTAINER_NAME, HERITAGE_LABEL_VALUE};
use crate::pod_watcher::{KubePodWatcher, PodWatch};
use crate::runtime::block_on;
use crate::scheduler::{Scheduler, SchedulerError};

/// Name of the secret holding off cluster registry credentials.
pub const REGISTRY_SECRET_NAME: &str = "registry-secret";

const FIELD_MANAGER: &str = "builder-engine";

pub struct KubeScheduler {
    client: Client,
    namespace: String,
}

impl KubeScheduler {
    pub fn new(client: Client, namespace: String) -> KubeScheduler {
        KubeScheduler { client, namespace }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

impl Scheduler for KubeScheduler {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn create_build_pod(&self, pod: &Pod) -> Result<(), SchedulerError> {
        block_on(self.pods().create(&PostParams::default(), pod))
            .map(|_| ())
            .map_err(|err| SchedulerError::new_api_error("creating build pod", err.to_string()))
    }

    fn upsert_env_secret(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), SchedulerError> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "heritage".to_string(),
                    HERITAGE_LABEL_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            string_data: Some(data.clone()),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        let params = PatchParams::apply(FIELD_MANAGER).force();
        block_on(self.secrets().patch(name, &params, &Patch::Apply(&secret)))
            .map(|_| ())
            .map_err(|err| SchedulerError::new_api_error("upserting build env secret", err.to_string()))
    }

    fn delete_env_secret(&self, name: &str) -> Result<(), SchedulerError> {
        match block_on(self.secrets().delete(name, &DeleteParams::default())) {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(err) => Err(SchedulerError::new_api_error("deleting build env secret", err.to_string())),
        }
    }

    fn registry_credentials(&self) -> Result<BTreeMap<String, String>, SchedulerError> {
        let secret = block_on(self.secrets().get(REGISTRY_SECRET_NAME))
            .map_err(|err| SchedulerError::new_api_error("reading registry secret", err.to_string()))?;

        let mut credentials = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            credentials.insert(key, String::from_utf8_lossy(&value.0).into_owned());
        }
        Ok(credentials)
    }

    fn watch_pods(&self) -> Result<Box<dyn PodWatch>, SchedulerError> {
        Ok(Box::new(KubePodWatcher::start(self.client.clone(), &self.namespace)))
    }

    fn stream_pod_logs(&self, pod_name: &str, out: &mut dyn Write) -> Result<(), SchedulerError> {
        let params = LogParams {
            container: Some(BUILDER_CONTAINER_NAME.to_string()),
            follow: true,
            ..Default::default()
        };

        block_on(async {
            let mut lines = self
                .pods()
                .log_stream(pod_name, &params)
                .await
                .map_err(|err| SchedulerError::LogStream {
                    raw_error_message: err.to_string(),
                })?
                .lines();

            loop {
                match lines.try_next().await {
                    Ok(Some(line)) => {
                        writeln!(out, "{line}").map_err(|err| SchedulerError::LogStream {
                            raw_error_message: err.to_string(),
                        })?;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        return Err(SchedulerError::LogStream {
                            raw_error_message: err.to_string(),
                        })
                    }
                }
            }
            let _ = out.flush();
            Ok(())
        })
    }

    fn pod_exit_codes(&self, pod_name: &str) -> Result<Vec<i32>, SchedulerError> {
        let pod = block_on(self.pods().get(pod_name))
            .map_err(|err| SchedulerError::new_api_error("reading build pod status", err.to_string()))?;

        let codes = pod
            .status
            .and_then(|status| status.container_statuses)
            .unwrap_or_default()
            .iter()
            .filter_map(|container| {
                container
                    .state
                    .as_ref()
                    .and_then(|state| state.terminated.as_ref())
                    .map(|terminated| terminated.exit_code)
            })
            .collect();
        Ok(codes)
    }
}
