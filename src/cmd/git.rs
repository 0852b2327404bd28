use std::path::Path;

use crate::cmd::command::{CommandError, CommandKiller, EngineCommand};

/// Snapshots `treeish` of the bare repository into a gzipped tarball.
pub fn archive(repo_dir: &Path, treeish: &str, output: &Path, killer: &CommandKiller) -> Result<(), CommandError> {
    let output_arg = format!("--output={}", output.display());
    EngineCommand::new("git", &["archive", "--format=tar.gz", &output_arg, treeish], &[])
        .with_current_dir(repo_dir)
        .exec(killer)
}

/// Repacks the repository after a successful build. Callers treat failures
/// as non fatal.
pub fn gc(repo_dir: &Path) -> Result<(), CommandError> {
    EngineCommand::new("git", &["gc"], &[])
        .with_current_dir(repo_dir)
        .exec(&CommandKiller::never())
}
