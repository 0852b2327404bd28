use std::env;
use std::io;
use std::process;
use std::sync::atomic::Ordering;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use builder_engine::builder_task::BuildTask;
use builder_engine::controller::hooks::HooksClient;
use builder_engine::errors::BuildError;
use builder_engine::io_models::config::BuilderConfig;
use builder_engine::io_models::BuildRequest;
use builder_engine::object_storage::s3::S3ObjectStorage;
use builder_engine::scheduler::kube::KubeScheduler;
use builder_engine::{runtime, utilities};

const USAGE: &str = "usage: builder <user> <app> <sha> <repo-dir>";

fn main() {
    // Operator diagnostics go to stderr; stdout belongs to the pusher.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let (user, app, sha, repo_dir) = match args.as_slice() {
        [_, user, app, sha, repo_dir] => (user, app, sha, repo_dir),
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    let config = match BuilderConfig::from_env() {
        Ok(config) => config,
        Err(err) => fail(BuildError::new_invalid_config(err)),
    };

    let request = match BuildRequest::new(user, app, sha, repo_dir, config.builder_key.clone()) {
        Ok(request) => request,
        Err(err) => fail(BuildError::new_invalid_config(err)),
    };

    let storage = match S3ObjectStorage::from_creds_dir(&config.storage_creds_dir, &config.bucket) {
        Ok(storage) => storage,
        Err(err) => fail(BuildError::from(err)),
    };

    let controller = HooksClient::new(config.controller_url.clone(), &request.builder_key);

    let kube_client = match utilities::create_kube_client() {
        Ok(client) => client,
        Err(err) => fail(BuildError::Kubernetes {
            raw_error: builder_engine::scheduler::SchedulerError::new_api_error(
                "connecting to the cluster",
                err.to_string(),
            ),
        }),
    };
    let scheduler = KubeScheduler::new(kube_client, config.pod_namespace.clone());

    let task = BuildTask::new(
        request,
        config,
        Box::new(storage),
        Box::new(controller),
        Box::new(scheduler),
        Box::new(io::stdout()),
    );

    // A SIGINT flips the cancel flag; the task runs its cleanups and
    // reports the cancellation.
    let cancel = task.cancel_flag();
    runtime::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::Relaxed);
        }
    });

    match task.execute() {
        Ok(outcome) => {
            info!("released v{} as {}", outcome.release, outcome.image);
        }
        Err(err) => {
            error!("{}", err);
            process::exit(err.exit_code());
        }
    }
}

fn fail(err: BuildError) -> ! {
    error!("{}", err);
    println!("{err}");
    process::exit(err.exit_code());
}
