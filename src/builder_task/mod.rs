use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::build_pod::{self, BuilderPodParams};
use crate::cmd::command::{CommandError, CommandKiller};
use crate::cmd::git;
use crate::controller::{BuildHook, ControllerClient};
use crate::errors::BuildError;
use crate::io_models::config::{BuilderConfig, RegistryLocation};
use crate::io_models::procfile::{parse_procfile, ProcessTable};
use crate::io_models::stack::BuilderKind;
use crate::io_models::{BuildKeys, BuildRequest};
use crate::object_storage::{ObjectStat, ObjectStorage};
use crate::scheduler::Scheduler;
use crate::transaction::CleanupStack;

pub mod progress;

use progress::ProgressTicker;

const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Terminal artifact of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub release: u64,
    pub image: String,
}

/// Drives one validated push to a release or a classified failure.
///
/// The task is a linear state machine: each state advances or terminates
/// the build, and cleanups registered along the way run in reverse order on
/// every exit path.
pub struct BuildTask {
    request: BuildRequest,
    config: BuilderConfig,
    storage: Box<dyn ObjectStorage>,
    controller: Box<dyn ControllerClient>,
    scheduler: Box<dyn Scheduler>,
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    cancel_requested: Arc<AtomicBool>,
    created_at: DateTime<Utc>,
}

impl BuildTask {
    pub fn new(
        request: BuildRequest,
        config: BuilderConfig,
        storage: Box<dyn ObjectStorage>,
        controller: Box<dyn ControllerClient>,
        scheduler: Box<dyn Scheduler>,
        out: Box<dyn Write + Send>,
    ) -> BuildTask {
        BuildTask {
            request,
            config,
            storage,
            controller,
            scheduler,
            out: Arc::new(Mutex::new(out)),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}:git-{}", self.request.app, self.request.sha.short())
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    /// Shared flag external callers flip to cancel the build.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel_requested.clone()
    }

    fn is_canceled(&self) -> bool {
        self.cancel_requested.load(Ordering::Relaxed)
    }

    fn abort_if_canceled(&self) -> Result<(), BuildError> {
        if self.is_canceled() {
            return Err(BuildError::Canceled);
        }
        Ok(())
    }

    fn send_progress(&self, message: impl AsRef<str>) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = writeln!(out, "{}", message.as_ref());
        let _ = out.flush();
    }

    pub fn execute(&self) -> Result<BuildOutcome, BuildError> {
        info!("build task {} started for user {}", self.id(), self.request.user);
        let _finished_guard = scopeguard::guard(self.id(), |id| {
            info!("build task {} finished", id);
        });

        let mut cleanups = CleanupStack::new();
        let ret = self.run(&mut cleanups);

        if ret.is_ok() {
            if let Err(err) = git::gc(&self.request.repo_dir) {
                warn!("git gc failed in {}: {}", self.request.repo_dir.display(), err);
            }
        }
        cleanups.run_all();

        match &ret {
            Ok(outcome) => {
                self.send_progress(format!("Done, {}:v{} deployed to the platform", self.request.app, outcome.release));
            }
            Err(err) => {
                self.send_progress(format!("{err}"));
            }
        }
        ret
    }

    fn run<'a>(&'a self, cleanups: &mut CleanupStack<'a>) -> Result<BuildOutcome, BuildError> {
        let app = self.request.app.as_str();
        let short_sha = self.request.sha.short();
        let should_abort = || self.is_canceled();
        let killer = CommandKiller::from(GIT_COMMAND_TIMEOUT, &should_abort);

        // Validate
        self.abort_if_canceled()?;
        if !self.request.repo_dir.is_dir() {
            return Err(BuildError::new_invalid_config(format!(
                "repository directory {} does not exist",
                self.request.repo_dir.display()
            )));
        }

        // Prepare filesystem
        let tmp_dir = crate::fs::build_workspace_directory(&self.request.repo_dir)
            .map_err(|err| BuildError::new_io_error("creating build workspace", err))?;
        let workspace_to_remove = tmp_dir.clone();
        cleanups.register("remove build workspace", move || {
            crate::fs::remove_workspace_directory(&workspace_to_remove);
        });

        // Fetch app config
        let app_config = self
            .controller
            .app_config(&self.request.user, app)
            .map_err(|raw_error| BuildError::Controller {
                action_description: "fetching app configuration".to_string(),
                raw_error,
            })?;
        let disable_caching = app_config.cache_disabled();
        let keys = BuildKeys::new(app, short_sha, disable_caching);

        // Invalidate cache
        if disable_caching {
            let cache_key = BuildKeys::app_cache_key(app);
            if self.storage.stat(&cache_key)? == ObjectStat::Exists {
                self.send_progress("🗑️ Clearing the build cache");
                self.storage.delete(&cache_key)?;
            }
        }

        // Snapshot revision
        self.abort_if_canceled()?;
        self.send_progress(format!("📦 Archiving revision {short_sha}"));
        let tarball = tmp_dir.join(format!("{app}.tar.gz"));
        git::archive(&self.request.repo_dir, short_sha, &tarball, &killer).map_err(|raw_error| match raw_error {
            CommandError::Killed(_) => BuildError::Canceled,
            raw_error => BuildError::GitArchive { raw_error },
        })?;

        // Unpack for local tree inspection; the builder reads from object
        // storage, not from this copy.
        crate::fs::unpack_archive(&tarball, &tmp_dir, &killer).map_err(|raw_error| match raw_error {
            CommandError::Killed(_) => BuildError::Canceled,
            raw_error => BuildError::new_io_error(
                "unpacking source archive",
                std::io::Error::new(std::io::ErrorKind::Other, raw_error),
            ),
        })?;

        // Select stack
        let stack = crate::io_models::stack::select_stack(&self.config.stacks, &app_config, &tmp_dir)
            .map_err(BuildError::new_invalid_config)?;
        let kind = stack.kind();
        self.send_progress(format!("⛏️ Building {} with the {} stack", app, stack.name));

        // Upload tarball
        let content = std::fs::read(&tarball).map_err(|err| BuildError::new_io_error("reading source archive", err))?;
        self.storage.put_content(&keys.tar_key, &content)?;

        // Resolve registry
        let (image, registry_env) = match kind {
            BuilderKind::Slug => (keys.slug_key.clone(), BTreeMap::new()),
            BuilderKind::Container => match &self.config.registry_location {
                RegistryLocation::OnCluster => (format!("{app}:git-{short_sha}"), BTreeMap::new()),
                RegistryLocation::OffCluster(location) => {
                    let credentials = self.scheduler.registry_credentials()?;
                    let image = match credentials.get("hostname") {
                        Some(hostname) => format!("{hostname}/{app}:git-{short_sha}"),
                        None => format!("{app}:git-{short_sha}"),
                    };
                    info!("pushing {} to the {} registry", image, location);
                    (image, credentials)
                }
            },
        };

        // Prepare the per app env secret
        let pod_name = format!("{}-{}-{}", kind.pod_prefix(), app, short_sha);
        let env_secret_name = format!("{app}-build-env");
        if kind == BuilderKind::Slug {
            self.scheduler.upsert_env_secret(&env_secret_name, &app_config.values)?;
            let secret_to_delete = env_secret_name.clone();
            cleanups.register("delete build env secret", move || {
                if let Err(err) = self.scheduler.delete_env_secret(&secret_to_delete) {
                    error!("cannot delete build env secret {}: {}", secret_to_delete, err);
                }
            });
        }

        // Create the build pod. The watch starts first so no pod event is
        // missed; it is stopped on every exit path below.
        let params = BuilderPodParams {
            debug: self.config.debug,
            name: &pod_name,
            namespace: self.scheduler.namespace(),
            env: &app_config.values,
            tar_key: &keys.tar_key,
            short_sha,
            storage_type: &self.config.storage_type,
            image: &stack.image,
            pull_policy: self.config.pull_policy_for(kind == BuilderKind::Container),
            node_selector: &self.config.pod_node_selector,
        };
        let pod = match kind {
            BuilderKind::Slug => build_pod::slug_builder_pod(&params, &env_secret_name, &keys.push_key, &keys.cache_key),
            BuilderKind::Container => build_pod::container_builder_pod(
                &params,
                &image,
                &self.config.registry_proxy_host,
                self.config.registry_proxy_port,
                &registry_env,
            ),
        };

        let watch = scopeguard::guard(self.scheduler.watch_pods()?, |mut watch| watch.stop());
        self.abort_if_canceled()?;
        self.scheduler.create_build_pod(&pod)?;
        self.send_progress("🚀 Starting build... but first, coffee!");

        // Wait for start
        let ticker = ProgressTicker::start(self.config.session_idle_interval, self.out.clone());
        let started = watch.wait_for_pod_running(&pod_name, self.config.pod_tick_duration, self.config.pod_wait_duration);
        ticker.stop();
        if let Err(raw_error) = started {
            return Err(BuildError::BuilderStartTimeout { pod_name, raw_error });
        }

        // Stream logs; a broken stream does not fail the build, the
        // terminal exit code stays authoritative.
        {
            let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(err) = self.scheduler.stream_pod_logs(&pod_name, &mut **out) {
                warn!("{}", err);
            }
        }

        // Wait for end
        watch
            .wait_for_pod_end(&pod_name, self.config.pod_tick_duration, self.config.pod_wait_duration)
            .map_err(|raw_error| BuildError::BuilderHang {
                pod_name: pod_name.clone(),
                raw_error,
            })?;
        drop(watch);

        // Inspect exit codes
        let exit_codes = self.scheduler.pod_exit_codes(&pod_name)?;
        if let Some(code) = exit_codes.into_iter().find(|code| *code != 0) {
            return Err(BuildError::BuilderFailed { code });
        }
        self.send_progress("✅ Build complete.");

        // Resolve Procfile
        let procfile = self.resolve_procfile(&tmp_dir, kind, &keys)?;

        // Publish release
        self.abort_if_canceled()?;
        self.send_progress("🚀 Launching App.");
        let hook = BuildHook {
            sha: short_sha.to_string(),
            receive_user: self.request.user.clone(),
            receive_repo: app.to_string(),
            image: image.clone(),
            stack: stack.name.clone(),
            procfile,
            is_container: kind == BuilderKind::Container,
        };
        let ticker = ProgressTicker::start(self.config.session_idle_interval, self.out.clone());
        let published = self.controller.create_build(&hook);
        ticker.stop();
        let release = published.map_err(|raw_error| BuildError::PublishFailed { raw_error })?;

        Ok(BuildOutcome { release, image })
    }

    fn resolve_procfile(&self, tmp_dir: &Path, kind: BuilderKind, keys: &BuildKeys) -> Result<ProcessTable, BuildError> {
        let local_procfile = tmp_dir.join("Procfile");
        if local_procfile.is_file() {
            let content = std::fs::read(&local_procfile)
                .map_err(|err| BuildError::new_io_error("reading Procfile", err))?;
            return parse_procfile(&content).map_err(|err| BuildError::ProcfileInvalid {
                raw_error_message: err.raw_error_message,
            });
        }

        // Container images declare their processes through their own
        // manifest downstream.
        if kind == BuilderKind::Container {
            return Ok(ProcessTable::new());
        }

        let content = self
            .storage
            .get_content(&keys.procfile_key)
            .map_err(|err| BuildError::ProcfileInvalid {
                raw_error_message: format!("no Procfile in the build artifact: {err}"),
            })?;
        parse_procfile(&content).map_err(|err| BuildError::ProcfileInvalid {
            raw_error_message: err.raw_error_message,
        })
    }
}
