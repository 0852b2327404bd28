use std::collections::BTreeMap;
use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

pub mod config;
pub mod procfile;
pub mod stack;

/// Config key a user sets to opt out of the build cache.
pub const DISABLE_CACHE_KEY: &str = "DRYCC_DISABLE_CACHE";
/// Config key a user sets to force a stack instead of marker-file detection.
pub const STACK_OVERRIDE_KEY: &str = "DRYCC_STACK";

lazy_static! {
    static ref APP_NAME_PATTERN: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

/// Full commit identifier of the pushed revision. All external names use
/// the 8 character short form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSha(String);

impl CommitSha {
    pub fn new(sha: &str) -> Result<CommitSha, String> {
        if sha.len() != 40 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("expected a full 40 hex commit sha, got {sha:?}"));
        }
        Ok(CommitSha(sha.to_lowercase()))
    }

    pub fn full(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

/// One validated push, immutable for the lifetime of the build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub app: String,
    pub sha: CommitSha,
    pub user: String,
    pub repo_dir: PathBuf,
    pub builder_key: String,
}

impl BuildRequest {
    pub fn new(user: &str, app: &str, sha: &str, repo_dir: &str, builder_key: String) -> Result<BuildRequest, String> {
        if !APP_NAME_PATTERN.is_match(app) || app.len() > 63 {
            return Err(format!("application name {app:?} is not a lowercase dns label"));
        }
        if user.is_empty() {
            return Err("user name cannot be empty".to_string());
        }

        Ok(BuildRequest {
            app: app.to_string(),
            sha: CommitSha::new(sha)?,
            user: user.to_string(),
            repo_dir: PathBuf::from(repo_dir),
            builder_key,
        })
    }
}

/// Per application configuration fetched from the controller before each
/// build. Values are exported into the builder pod environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl AppConfig {
    pub fn cache_disabled(&self) -> bool {
        self.values.contains_key(DISABLE_CACHE_KEY)
    }

    pub fn stack_override(&self) -> Option<&str> {
        self.values.get(STACK_OVERRIDE_KEY).map(String::as_str)
    }
}

/// Object storage keys scoped to one `(app, short sha)` build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildKeys {
    pub tar_key: String,
    pub push_key: String,
    pub slug_key: String,
    pub procfile_key: String,
    /// Empty string when caching is disabled; builder pods treat empty as
    /// "no cache".
    pub cache_key: String,
}

impl BuildKeys {
    pub fn new(app: &str, short_sha: &str, disable_caching: bool) -> BuildKeys {
        let push_key = format!("home/{app}:git-{short_sha}/push");
        BuildKeys {
            tar_key: format!("home/{app}:git-{short_sha}/tar"),
            slug_key: format!("{push_key}/slug.tgz"),
            procfile_key: format!("{push_key}/Procfile"),
            push_key,
            cache_key: if disable_caching {
                String::new()
            } else {
                Self::app_cache_key(app)
            },
        }
    }

    /// Canonical per app cache location, independent of the per build
    /// cache_key (which may be blanked out).
    pub fn app_cache_key(app: &str) -> String {
        format!("home/{app}/cache")
    }
}
