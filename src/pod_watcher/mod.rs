use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }

    pub fn of(pod: &Pod) -> PodPhase {
        pod.status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .and_then(|phase| PodPhase::from_str(phase).ok())
            .unwrap_or(PodPhase::Unknown)
    }
}

impl FromStr for PodPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PodPhase::Pending),
            "Running" => Ok(PodPhase::Running),
            "Succeeded" => Ok(PodPhase::Succeeded),
            "Failed" => Ok(PodPhase::Failed),
            "Unknown" => Ok(PodPhase::Unknown),
            other => Err(format!("unknown pod phase {other:?}")),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WaitError {
    #[error("timed out after {after:?} waiting for pod {pod_name}")]
    Timeout { pod_name: String, after: Duration },
}

/// Synchronous waits against the pod cache of one namespace.
pub trait PodWatch: Send {
    /// Resolves once the pod is `Running` or already terminal.
    fn wait_for_pod_running(&self, pod_name: &str, tick: Duration, total: Duration) -> Result<PodPhase, WaitError>;

    /// Resolves once the pod reached `Succeeded` or `Failed`.
    fn wait_for_pod_end(&self, pod_name: &str, tick: Duration, total: Duration) -> Result<PodPhase, WaitError>;

    /// Signals the watch worker to quit. Safe to call more than once.
    fn stop(&mut self);
}

/// List-watch over the pods of the build namespace feeding a local store.
/// The worker runs on the shared runtime until stopped; the orchestrator
/// stops it on every exit path.
pub struct KubePodWatcher {
    namespace: String,
    reader: Store<Pod>,
    stop_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl KubePodWatcher {
    pub fn start(client: Client, namespace: &str) -> KubePodWatcher {
        let api: Api<Pod> = Api::namespaced(client, namespace);
        let (reader, writer) = reflector::store();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let worker = crate::runtime::spawn(async move {
            let stream = reflector(writer, watcher(api, watcher::Config::default())).applied_objects();
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    event = stream.next() => match event {
                        Some(Ok(_)) => {}
                        Some(Err(err)) => warn!("pod watch stream error: {}", err),
                        None => break,
                    },
                }
            }
        });

        KubePodWatcher {
            namespace: namespace.to_string(),
            reader,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        }
    }

    fn phase_of(&self, pod_name: &str) -> Option<PodPhase> {
        let key = ObjectRef::new(pod_name).within(&self.namespace);
        self.reader.get(&key).map(|pod| PodPhase::of(pod.as_ref()))
    }
}

impl PodWatch for KubePodWatcher {
    fn wait_for_pod_running(&self, pod_name: &str, tick: Duration, total: Duration) -> Result<PodPhase, WaitError> {
        wait_for_phase(pod_name, tick, total, || self.phase_of(pod_name), |phase| {
            phase == PodPhase::Running || phase.is_terminal()
        })
    }

    fn wait_for_pod_end(&self, pod_name: &str, tick: Duration, total: Duration) -> Result<PodPhase, WaitError> {
        wait_for_phase(pod_name, tick, total, || self.phase_of(pod_name), |phase| phase.is_terminal())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = crate::runtime::block_on(worker);
        }
    }
}

impl Drop for KubePodWatcher {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

/// Polls `phase_of` every `tick` until `is_done` accepts the phase, or the
/// `total` bound elapses. The tick only bounds polling granularity and idle
/// logging, never correctness.
pub(crate) fn wait_for_phase(
    pod_name: &str,
    tick: Duration,
    total: Duration,
    phase_of: impl Fn() -> Option<PodPhase>,
    is_done: impl Fn(PodPhase) -> bool,
) -> Result<PodPhase, WaitError> {
    let deadline = Instant::now() + total;
    loop {
        match phase_of() {
            Some(phase) if is_done(phase) => return Ok(phase),
            phase => debug!("still waiting for pod {} (phase: {:?})", pod_name, phase),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Timeout {
                pod_name: pod_name.to_string(),
                after: total,
            });
        }
        thread::sleep(tick.min(deadline - now));
    }
}
