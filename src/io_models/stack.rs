use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io_models::AppConfig;

/// Identity of the build environment. `image` is the fully qualified
/// builder image run inside the build pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub image: String,
}

impl Stack {
    pub fn kind(&self) -> BuilderKind {
        if self.name.contains("container") {
            BuilderKind::Container
        } else {
            BuilderKind::Slug
        }
    }
}

/// Which pipeline a build runs. Decided once when the stack is resolved
/// and carried forward, never rediscovered from the stack name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderKind {
    Slug,
    Container,
}

impl BuilderKind {
    pub fn pod_prefix(&self) -> &'static str {
        match self {
            BuilderKind::Slug => "slug",
            BuilderKind::Container => "docker",
        }
    }
}

/// Picks the stack for an unpacked source tree:
/// an explicit `DRYCC_STACK` value wins, then a `Dockerfile` at the tree
/// root selects the container stack, and everything else falls back to the
/// platform buildpack stack.
pub fn select_stack<'a>(
    stacks: &'a [Stack],
    app_config: &AppConfig,
    source_dir: &Path,
) -> Result<&'a Stack, String> {
    if let Some(name) = app_config.stack_override() {
        return stacks
            .iter()
            .find(|stack| stack.name == name)
            .ok_or_else(|| format!("unknown stack {name:?} requested via DRYCC_STACK"));
    }

    if source_dir.join("Dockerfile").is_file() {
        if let Some(stack) = stacks.iter().find(|stack| stack.kind() == BuilderKind::Container) {
            return Ok(stack);
        }
    }

    stacks
        .iter()
        .find(|stack| stack.kind() == BuilderKind::Slug)
        .ok_or_else(|| "no buildpack stack configured".to_string())
}
