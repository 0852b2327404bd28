#[macro_use]
extern crate tracing;

pub mod build_pod;
pub mod builder_task;
pub mod cmd;
pub mod controller;
pub mod errors;
pub mod fs;
pub mod io_models;
pub mod object_storage;
pub mod pod_watcher;
pub mod runtime;
pub mod scheduler;
pub mod transaction;
pub mod utilities;
