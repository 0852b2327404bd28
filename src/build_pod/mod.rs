use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::io_models::config::ImagePullPolicy;

pub const BUILDER_CONTAINER_NAME: &str = "builder";
pub const HERITAGE_LABEL_VALUE: &str = "drycc";

/// Secret holding the object storage credentials, mounted read only into
/// every builder pod.
pub const OBJECT_STORE_SECRET_NAME: &str = "objectstorage-keyfile";
pub const OBJECT_STORE_CREDS_MOUNT: &str = "/var/run/secrets/drycc/objectstore/creds";

/// Mount point of the per app environment secret inside slug builder pods.
pub const APP_ENV_SECRET_MOUNT: &str = "/var/run/secrets/app/env";

/// Inputs shared by both builder pod kinds.
pub struct BuilderPodParams<'a> {
    pub debug: bool,
    pub name: &'a str,
    pub namespace: &'a str,
    /// Per application configuration values, exported verbatim.
    pub env: &'a BTreeMap<String, String>,
    pub tar_key: &'a str,
    pub short_sha: &'a str,
    pub storage_type: &'a str,
    pub image: &'a str,
    pub pull_policy: ImagePullPolicy,
    pub node_selector: &'a BTreeMap<String, String>,
}

/// Pod running the slug builder. The per app environment secret is mounted
/// so the builder can source the app environment; `cache_key` may be empty,
/// which the builder reads as "no cache".
pub fn slug_builder_pod(params: &BuilderPodParams, env_secret_name: &str, push_key: &str, cache_key: &str) -> Pod {
    let mut env = builder_env(params);
    env.insert("PUT_PATH".to_string(), push_key.to_string());
    env.insert("CACHE_PATH".to_string(), cache_key.to_string());

    let mut pod = builder_pod(params, env);
    if let Some(spec) = pod.spec.as_mut() {
        spec.volumes.get_or_insert_with(Vec::new).push(Volume {
            name: "app-env".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(env_secret_name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        if let Some(container) = spec.containers.first_mut() {
            container.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
                name: "app-env".to_string(),
                mount_path: APP_ENV_SECRET_MOUNT.to_string(),
                read_only: Some(true),
                ..Default::default()
            });
        }
    }
    pod
}

/// Pod running the container (Dockerfile) builder, pushing `image_name`
/// to the on cluster proxy or to the remote registry described by
/// `registry_env`.
pub fn container_builder_pod(
    params: &BuilderPodParams,
    image_name: &str,
    registry_proxy_host: &str,
    registry_proxy_port: u16,
    registry_env: &BTreeMap<String, String>,
) -> Pod {
    let mut env = builder_env(params);
    env.insert("IMG_NAME".to_string(), image_name.to_string());
    env.insert("DRYCC_REGISTRY_PROXY_HOST".to_string(), registry_proxy_host.to_string());
    env.insert("DRYCC_REGISTRY_PROXY_PORT".to_string(), registry_proxy_port.to_string());
    for (key, value) in registry_env {
        env.insert(format!("DRYCC_REGISTRY_{}", key.to_uppercase()), value.to_string());
    }

    builder_pod(params, env)
}

fn builder_env(params: &BuilderPodParams) -> BTreeMap<String, String> {
    let mut env = params.env.clone();
    env.insert("TAR_PATH".to_string(), params.tar_key.to_string());
    env.insert("SOURCE_VERSION".to_string(), params.short_sha.to_string());
    env.insert("BUILDER_STORAGE".to_string(), params.storage_type.to_string());
    if params.debug {
        env.insert("DRYCC_DEBUG".to_string(), "1".to_string());
    }
    env
}

fn builder_pod(params: &BuilderPodParams, env: BTreeMap<String, String>) -> Pod {
    let labels = BTreeMap::from([("heritage".to_string(), HERITAGE_LABEL_VALUE.to_string())]);

    Pod {
        metadata: ObjectMeta {
            name: Some(params.name.to_string()),
            namespace: Some(params.namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            node_selector: if params.node_selector.is_empty() {
                None
            } else {
                Some(params.node_selector.clone())
            },
            containers: vec![Container {
                name: BUILDER_CONTAINER_NAME.to_string(),
                image: Some(params.image.to_string()),
                image_pull_policy: Some(params.pull_policy.to_string()),
                env: Some(to_env_vars(env)),
                volume_mounts: Some(vec![VolumeMount {
                    name: OBJECT_STORE_SECRET_NAME.to_string(),
                    mount_path: OBJECT_STORE_CREDS_MOUNT.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: OBJECT_STORE_SECRET_NAME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(OBJECT_STORE_SECRET_NAME.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_env_vars(env: BTreeMap<String, String>) -> Vec<EnvVar> {
    env.into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect()
}
