use std::collections::BTreeMap;
use std::env;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::io_models::stack::Stack;
use crate::utilities::parse_node_selector;

/// Policy applied to the builder image of a build pod. Values are the
/// literal Kubernetes identifiers; anything else (including other casings)
/// is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl FromStr for ImagePullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(ImagePullPolicy::Always),
            "IfNotPresent" => Ok(ImagePullPolicy::IfNotPresent),
            "Never" => Ok(ImagePullPolicy::Never),
            _ => Err(format!(
                "unknown image pull policy {s:?}, expected one of Always, IfNotPresent, Never"
            )),
        }
    }
}

impl Display for ImagePullPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ImagePullPolicy::Always => f.write_str("Always"),
            ImagePullPolicy::IfNotPresent => f.write_str("IfNotPresent"),
            ImagePullPolicy::Never => f.write_str("Never"),
        }
    }
}

/// Where container builds push their image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryLocation {
    /// The platform registry reachable through the in-cluster proxy.
    OnCluster,
    /// A remote registry whose credentials live in the `registry-secret`
    /// Kubernetes secret of the build namespace.
    OffCluster(String),
}

impl RegistryLocation {
    pub fn parse(raw: &str) -> RegistryLocation {
        match raw {
            "on-cluster" => RegistryLocation::OnCluster,
            other => RegistryLocation::OffCluster(other.to_string()),
        }
    }
}

/// Operator configuration, read once per process from the environment.
/// Environment names are fixed for compatibility with existing deployments.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub builder_key: String,
    pub pod_namespace: String,
    pub storage_type: String,
    pub controller_url: Url,
    pub registry_location: RegistryLocation,
    pub registry_proxy_host: String,
    pub registry_proxy_port: u16,
    pub slug_builder_pull_policy: ImagePullPolicy,
    pub docker_builder_pull_policy: ImagePullPolicy,
    pub pod_node_selector: BTreeMap<String, String>,
    pub session_idle_interval: Duration,
    pub pod_tick_duration: Duration,
    pub pod_wait_duration: Duration,
    pub stacks: Vec<Stack>,
    pub bucket: String,
    pub storage_creds_dir: PathBuf,
    pub debug: bool,
}

const DEFAULT_STACKS: &str = r#"[
  {"name": "container", "image": "drycc/dockerbuilder:canary"},
  {"name": "heroku-18", "image": "drycc/slugbuilder:canary"}
]"#;

impl BuilderConfig {
    pub fn from_env() -> Result<BuilderConfig, String> {
        let controller_url = env_or("DRYCC_CONTROLLER_URL", "http://drycc-controller-api:80");
        let controller_url =
            Url::parse(&controller_url).map_err(|err| format!("invalid DRYCC_CONTROLLER_URL: {err}"))?;

        let stacks_json = env_or("DRYCC_STACKS", DEFAULT_STACKS);
        let stacks: Vec<Stack> =
            serde_json::from_str(&stacks_json).map_err(|err| format!("invalid DRYCC_STACKS: {err}"))?;
        if stacks.is_empty() {
            return Err("DRYCC_STACKS must declare at least one stack".to_string());
        }

        Ok(BuilderConfig {
            builder_key: env::var("DRYCC_BUILDER_KEY").map_err(|_| "DRYCC_BUILDER_KEY is not set".to_string())?,
            pod_namespace: env_or("POD_NAMESPACE", "drycc"),
            storage_type: env_or("BUILDER_STORAGE", "minio"),
            controller_url,
            registry_location: RegistryLocation::parse(&env_or("DRYCC_REGISTRY_LOCATION", "on-cluster")),
            registry_proxy_host: env_or("DRYCC_REGISTRY_PROXY_HOST", "127.0.0.1"),
            registry_proxy_port: parse_env("DRYCC_REGISTRY_PROXY_PORT", 5555)?,
            slug_builder_pull_policy: env_or("SLUGBUILDER_IMAGE_PULL_POLICY", "IfNotPresent")
                .parse::<ImagePullPolicy>()?,
            docker_builder_pull_policy: env_or("DOCKERBUILDER_IMAGE_PULL_POLICY", "IfNotPresent")
                .parse::<ImagePullPolicy>()?,
            pod_node_selector: parse_node_selector(&env_or("BUILDER_POD_NODE_SELECTOR", ""))?,
            session_idle_interval: Duration::from_secs(parse_env("SESSION_IDLE_INTERVAL", 10)?),
            pod_tick_duration: Duration::from_secs(parse_env("BUILDER_POD_TICK_DURATION", 1)?),
            pod_wait_duration: Duration::from_secs(parse_env("BUILDER_POD_WAIT_DURATION", 1200)?),
            stacks,
            bucket: env_or("BUILDER_BUCKET", "builder"),
            storage_creds_dir: PathBuf::from(env_or(
                "BUILDER_STORAGE_CREDS_DIR",
                "/var/run/secrets/drycc/objectstore/creds",
            )),
            debug: env::var("DRYCC_DEBUG").is_ok(),
        })
    }

    pub fn pull_policy_for(&self, container: bool) -> ImagePullPolicy {
        if container {
            self.docker_builder_pull_policy
        } else {
            self.slug_builder_pull_policy
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|err| format!("invalid {name}: {err}")),
        Err(_) => Ok(default),
    }
}
