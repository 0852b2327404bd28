use std::io;
use std::path::{Path, PathBuf};

use crate::cmd::command::{CommandError, CommandKiller, EngineCommand};

/// Creates a fresh scratch directory under `{repo_dir}/build` for the
/// current push. The caller owns its deletion.
pub fn build_workspace_directory(repo_dir: &Path) -> Result<PathBuf, io::Error> {
    let build_root = repo_dir.join("build");
    std::fs::create_dir_all(&build_root)?;

    let workspace = tempfile::Builder::new().prefix("tmp").tempdir_in(&build_root)?;
    Ok(workspace.into_path())
}

/// Removes a build workspace, logging instead of raising on failure.
pub fn remove_workspace_directory(workspace: &Path) {
    if let Err(err) = std::fs::remove_dir_all(workspace) {
        if err.kind() != io::ErrorKind::NotFound {
            error!("cannot remove build workspace {}: {}", workspace.display(), err);
        }
    }
}

/// Extracts a gzipped tarball into `dest` for local tree inspection.
pub fn unpack_archive(archive: &Path, dest: &Path, killer: &CommandKiller) -> Result<(), CommandError> {
    let archive_arg = archive.display().to_string();
    let dest_arg = dest.display().to_string();
    EngineCommand::new("tar", &["-xzf", &archive_arg, "-C", &dest_arg], &[]).exec(killer)
}
