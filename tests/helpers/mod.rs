use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use url::Url;

use builder_engine::controller::{BuildHook, ControllerClient, ControllerError};
use builder_engine::io_models::config::{BuilderConfig, ImagePullPolicy, RegistryLocation};
use builder_engine::io_models::stack::Stack;
use builder_engine::io_models::AppConfig;
use builder_engine::object_storage::errors::ObjectStorageError;
use builder_engine::object_storage::{validate_key, ObjectStat, ObjectStorage};
use builder_engine::pod_watcher::{PodPhase, PodWatch, WaitError};
use builder_engine::scheduler::{Scheduler, SchedulerError};

/// Ordered record of cross component side effects, shared between the fake
/// collaborators so tests can assert sequencing.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn event_index(events: &EventLog, needle: &str) -> Option<usize> {
    events.lock().unwrap().iter().position(|event| event.contains(needle))
}

// ---------------------------------------------------------------------------
// stdout capture

#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// object storage fake

#[derive(Clone)]
pub struct MemoryObjectStorage {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    events: EventLog,
}

impl MemoryObjectStorage {
    pub fn new(events: EventLog) -> MemoryObjectStorage {
        MemoryObjectStorage {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            events,
        }
    }

    pub fn seed(&self, key: &str, content: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), content.to_vec());
    }

    pub fn content_of(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

impl ObjectStorage for MemoryObjectStorage {
    fn put_content(&self, key: &str, content: &[u8]) -> Result<(), ObjectStorageError> {
        validate_key(key)?;
        self.events.lock().unwrap().push(format!("put {key}"));
        self.objects.lock().unwrap().insert(key.to_string(), content.to_vec());
        Ok(())
    }

    fn get_content(&self, key: &str) -> Result<Vec<u8>, ObjectStorageError> {
        validate_key(key)?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStorageError::NotFound { key: key.to_string() })
    }

    fn stat(&self, key: &str) -> Result<ObjectStat, ObjectStorageError> {
        validate_key(key)?;
        if self.objects.lock().unwrap().contains_key(key) {
            Ok(ObjectStat::Exists)
        } else {
            Ok(ObjectStat::NotFound)
        }
    }

    fn delete(&self, key: &str) -> Result<(), ObjectStorageError> {
        validate_key(key)?;
        self.events.lock().unwrap().push(format!("delete {key}"));
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// controller stub

#[derive(Clone)]
pub struct StubController {
    pub values: BTreeMap<String, String>,
    pub hooks: Arc<Mutex<Vec<BuildHook>>>,
    releases: Arc<Mutex<u64>>,
}

impl StubController {
    pub fn new(values: BTreeMap<String, String>) -> StubController {
        StubController {
            values,
            hooks: Arc::new(Mutex::new(Vec::new())),
            releases: Arc::new(Mutex::new(0)),
        }
    }
}

impl ControllerClient for StubController {
    fn app_config(&self, _user: &str, _app: &str) -> Result<AppConfig, ControllerError> {
        Ok(AppConfig {
            values: self.values.clone(),
        })
    }

    fn create_build(&self, hook: &BuildHook) -> Result<u64, ControllerError> {
        self.hooks.lock().unwrap().push(hook.clone());
        let mut releases = self.releases.lock().unwrap();
        *releases += 1;
        Ok(*releases)
    }
}

// ---------------------------------------------------------------------------
// scheduler fake

pub struct SchedulerState {
    pub created_pods: Vec<Pod>,
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    pub deleted_secrets: Vec<String>,
    pub registry_credentials: BTreeMap<String, String>,
    pub exit_codes: Vec<i32>,
    pub pod_logs: String,
    pub end_phase: PodPhase,
    pub start_times_out: bool,
    pub watch_stopped: bool,
}

#[derive(Clone)]
pub struct RecordingScheduler {
    pub state: Arc<Mutex<SchedulerState>>,
    events: EventLog,
}

impl RecordingScheduler {
    pub fn new(events: EventLog) -> RecordingScheduler {
        RecordingScheduler {
            state: Arc::new(Mutex::new(SchedulerState {
                created_pods: Vec::new(),
                secrets: BTreeMap::new(),
                deleted_secrets: Vec::new(),
                registry_credentials: BTreeMap::new(),
                exit_codes: vec![0],
                pod_logs: String::new(),
                end_phase: PodPhase::Succeeded,
                start_times_out: false,
                watch_stopped: false,
            })),
            events,
        }
    }

    pub fn with_exit_codes(self, exit_codes: Vec<i32>) -> RecordingScheduler {
        {
            let mut state = self.state.lock().unwrap();
            state.end_phase = if exit_codes.iter().any(|code| *code != 0) {
                PodPhase::Failed
            } else {
                PodPhase::Succeeded
            };
            state.exit_codes = exit_codes;
        }
        self
    }

    pub fn with_pod_logs(self, logs: &str) -> RecordingScheduler {
        self.state.lock().unwrap().pod_logs = logs.to_string();
        self
    }

    pub fn created_pod_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .created_pods
            .iter()
            .filter_map(|pod| pod.metadata.name.clone())
            .collect()
    }

    pub fn pod_env_value(&self, pod_index: usize, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.created_pods.get(pod_index)?.spec.as_ref()?.containers.first()?.env.as_ref()?
            .iter()
            .find(|var| var.name == name)
            .and_then(|var| var.value.clone())
    }
}

struct ScriptedWatch {
    state: Arc<Mutex<SchedulerState>>,
    events: EventLog,
}

impl PodWatch for ScriptedWatch {
    fn wait_for_pod_running(&self, pod_name: &str, _tick: Duration, total: Duration) -> Result<PodPhase, WaitError> {
        if self.state.lock().unwrap().start_times_out {
            return Err(WaitError::Timeout {
                pod_name: pod_name.to_string(),
                after: total,
            });
        }
        Ok(PodPhase::Running)
    }

    fn wait_for_pod_end(&self, _pod_name: &str, _tick: Duration, _total: Duration) -> Result<PodPhase, WaitError> {
        Ok(self.state.lock().unwrap().end_phase)
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().watch_stopped = true;
        self.events.lock().unwrap().push("watch-stop".to_string());
    }
}

impl Scheduler for RecordingScheduler {
    fn namespace(&self) -> &str {
        "drycc"
    }

    fn create_build_pod(&self, pod: &Pod) -> Result<(), SchedulerError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.events.lock().unwrap().push(format!("create-pod {name}"));
        self.state.lock().unwrap().created_pods.push(pod.clone());
        Ok(())
    }

    fn upsert_env_secret(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), SchedulerError> {
        self.events.lock().unwrap().push(format!("upsert-secret {name}"));
        self.state.lock().unwrap().secrets.insert(name.to_string(), data.clone());
        Ok(())
    }

    fn delete_env_secret(&self, name: &str) -> Result<(), SchedulerError> {
        self.events.lock().unwrap().push(format!("delete-secret {name}"));
        let mut state = self.state.lock().unwrap();
        state.secrets.remove(name);
        state.deleted_secrets.push(name.to_string());
        Ok(())
    }

    fn registry_credentials(&self) -> Result<BTreeMap<String, String>, SchedulerError> {
        Ok(self.state.lock().unwrap().registry_credentials.clone())
    }

    fn watch_pods(&self) -> Result<Box<dyn PodWatch>, SchedulerError> {
        Ok(Box::new(ScriptedWatch {
            state: self.state.clone(),
            events: self.events.clone(),
        }))
    }

    fn stream_pod_logs(&self, _pod_name: &str, out: &mut dyn Write) -> Result<(), SchedulerError> {
        let logs = self.state.lock().unwrap().pod_logs.clone();
        out.write_all(logs.as_bytes()).map_err(|err| SchedulerError::LogStream {
            raw_error_message: err.to_string(),
        })?;
        Ok(())
    }

    fn pod_exit_codes(&self, _pod_name: &str) -> Result<Vec<i32>, SchedulerError> {
        Ok(self.state.lock().unwrap().exit_codes.clone())
    }
}

// ---------------------------------------------------------------------------
// git fixture

pub fn git(dir: &std::path::Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "tester")
        .env("GIT_AUTHOR_EMAIL", "tester@localhost")
        .env("GIT_COMMITTER_NAME", "tester")
        .env("GIT_COMMITTER_EMAIL", "tester@localhost")
        .output()
        .expect("cannot run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Creates a repository holding `files` in a single commit and returns its
/// full commit sha alongside the directory.
pub fn init_git_repo(files: &[(&str, &str)]) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("cannot create temp dir");
    git(dir.path(), &["init", "--initial-branch=main", "."]);
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).expect("cannot write fixture file");
    }
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-m", "fixture"]);
    let sha = git(dir.path(), &["rev-parse", "HEAD"]);
    (dir, sha)
}

// ---------------------------------------------------------------------------
// configuration

pub fn test_config() -> BuilderConfig {
    BuilderConfig {
        builder_key: "secret-key".to_string(),
        pod_namespace: "drycc".to_string(),
        storage_type: "minio".to_string(),
        controller_url: Url::parse("http://127.0.0.1:8000").expect("valid url"),
        registry_location: RegistryLocation::OnCluster,
        registry_proxy_host: "127.0.0.1".to_string(),
        registry_proxy_port: 5555,
        slug_builder_pull_policy: ImagePullPolicy::IfNotPresent,
        docker_builder_pull_policy: ImagePullPolicy::IfNotPresent,
        pod_node_selector: BTreeMap::new(),
        session_idle_interval: Duration::from_secs(30),
        pod_tick_duration: Duration::from_millis(10),
        pod_wait_duration: Duration::from_secs(5),
        stacks: vec![
            Stack {
                name: "container".to_string(),
                image: "drycc/dockerbuilder:canary".to_string(),
            },
            Stack {
                name: "heroku-18".to_string(),
                image: "drycc/slugbuilder:canary".to_string(),
            },
        ],
        bucket: "builder".to_string(),
        storage_creds_dir: PathBuf::from("/var/run/secrets/drycc/objectstore/creds"),
        debug: false,
    }
}
