use std::future::Future;

use lazy_static::lazy_static;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

lazy_static! {
    // All async clients (kube, reqwest, rusoto) are driven from synchronous
    // build code through this shared runtime.
    static ref RUNTIME: Runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("engine-runtime")
        .build()
        .expect("cannot initialize tokio runtime");
}

pub fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}

pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    RUNTIME.spawn(future)
}
