//! # Chart Source
//!
//! Produces the ordered list of [`ChartEntry`] values a refresh works from.
//!
//! ## Remote
//!
//! The URL must parse and use `https`; anything else fails with
//! [`SourceError::InsecureScheme`] before a request is made. The body is
//! capped at `max_remote_bytes`: the limit travels with the request so the
//! adapter stops reading once it is passed, and the length is checked again
//! before decoding.
//!
//! ## Local
//!
//! The chart file is searched for in this order, first existing path wins:
//!
//! 1. `<cwd>/docs/<file>`
//! 2. `<exe_dir>/docs/<file>` and `<exe_dir>/../docs/<file>`
//! 3. `<dir>/docs/<file>` for the working directory and its ancestors (6 levels)
//! 4. `<bundle>/<file>` and `<bundle>/docs/<file>` for every `*.bundle`
//!    directory next to the executable, one level above it, in the working
//!    directory, and under `.build` in the working directory or up to three
//!    of its ancestors
//! 5. `<dir>/<file>` and `<dir>/docs/<file>` for configured resource dirs
//!
//! A file that exists but does not parse is an error; the search does not
//! move on to the next candidate.

use crate::error::{Result, SourceError};
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use core_metadata::ChartEntry;
use core_runtime::config::RankingDefaults;
use core_runtime::logging::strip_path;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

const ANCESTOR_DEPTH: usize = 6;
const BUILD_DIR_DEPTH: usize = 4;

/// Where a refresh reads its chart from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Local,
    Remote(String),
}

impl SourceSpec {
    /// Remote when `url` is set, local otherwise.
    pub fn from_optional_url(url: Option<&str>) -> Self {
        match url {
            Some(url) => SourceSpec::Remote(url.to_string()),
            None => SourceSpec::Local,
        }
    }
}

/// Reads chart entries from disk or over HTTPS.
pub struct SourceListProvider {
    http_client: Arc<dyn HttpClient>,
    file_system: Arc<dyn FileSystemAccess>,
    local_file_name: String,
    resource_dirs: Vec<PathBuf>,
    max_remote_bytes: usize,
    remote_timeout: Duration,
    working_dir: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
}

impl SourceListProvider {
    /// Search roots default to the process working directory and the
    /// directory of the running executable.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        file_system: Arc<dyn FileSystemAccess>,
        defaults: &RankingDefaults,
    ) -> Self {
        let working_dir = std::env::current_dir().ok();
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        Self {
            http_client,
            file_system,
            local_file_name: defaults.local_file_name.clone(),
            resource_dirs: defaults.resource_dirs.clone(),
            max_remote_bytes: defaults.max_remote_bytes,
            remote_timeout: defaults.remote_timeout,
            working_dir,
            exe_dir,
        }
    }

    /// Replace the working directory and executable directory used to build
    /// local candidates.
    pub fn with_search_roots(mut self, working_dir: Option<PathBuf>, exe_dir: Option<PathBuf>) -> Self {
        self.working_dir = working_dir;
        self.exe_dir = exe_dir;
        self
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, spec: &SourceSpec) -> Result<Vec<ChartEntry>> {
        match spec {
            SourceSpec::Local => self.fetch_local().await,
            SourceSpec::Remote(url) => self.fetch_remote(url).await,
        }
    }

    async fn fetch_remote(&self, raw_url: &str) -> Result<Vec<ChartEntry>> {
        let url = url::Url::parse(raw_url)
            .map_err(|e| SourceError::Network(format!("Invalid chart URL {}: {}", raw_url, e)))?;
        if url.scheme() != "https" {
            return Err(SourceError::InsecureScheme(raw_url.to_string()));
        }

        let request = HttpRequest::get(url.as_str())
            .timeout(self.remote_timeout)
            .max_body_bytes(self.max_remote_bytes);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| match e {
                BridgeError::BodyTooLarge { received, limit } => SourceError::TooLarge {
                    size: received,
                    limit,
                },
                other => SourceError::Network(other.to_string()),
            })?;

        if !response.is_success() {
            return Err(SourceError::Network(format!(
                "Chart download failed with HTTP {}",
                response.status
            )));
        }

        // Not every adapter honors `max_body_bytes`
        if response.body.len() > self.max_remote_bytes {
            return Err(SourceError::TooLarge {
                size: response.body.len(),
                limit: self.max_remote_bytes,
            });
        }

        let entries = parse_entries(&response.body, raw_url)?;
        info!(count = entries.len(), url = %raw_url, "Loaded remote chart");
        Ok(entries)
    }

    async fn fetch_local(&self) -> Result<Vec<ChartEntry>> {
        let candidates = self.local_candidates().await;

        for candidate in &candidates {
            match self.file_system.exists(candidate).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(path = ?candidate, error = %e, "Skipping unreadable candidate");
                    continue;
                }
            }

            let data = self.file_system.read_file(candidate).await?;
            let location = candidate.display().to_string();
            let entries = parse_entries(&data, &location)?;
            info!(count = entries.len(), file = %strip_path(&location), "Loaded local chart");
            debug!(path = %location, "Local chart candidate selected");
            return Ok(entries);
        }

        Err(SourceError::NotFound {
            file_name: self.local_file_name.clone(),
            searched: candidates.len(),
        })
    }

    /// Every path probed for the local chart, in probe order and without
    /// duplicates.
    pub async fn local_candidates(&self) -> Vec<PathBuf> {
        let file = self.local_file_name.as_str();
        let mut candidates = Vec::new();

        if let Some(cwd) = &self.working_dir {
            candidates.push(cwd.join("docs").join(file));
        }

        if let Some(exe_dir) = &self.exe_dir {
            candidates.push(exe_dir.join("docs").join(file));
            if let Some(parent) = exe_dir.parent() {
                candidates.push(parent.join("docs").join(file));
            }
        }

        if let Some(cwd) = &self.working_dir {
            for dir in cwd.ancestors().take(ANCESTOR_DEPTH) {
                candidates.push(dir.join("docs").join(file));
            }
        }

        for bundle in self.bundle_dirs().await {
            candidates.push(bundle.join(file));
            candidates.push(bundle.join("docs").join(file));
        }

        for dir in &self.resource_dirs {
            candidates.push(dir.join(file));
            candidates.push(dir.join("docs").join(file));
        }

        let mut seen = HashSet::new();
        candidates.retain(|path| seen.insert(path.clone()));
        candidates
    }

    async fn bundle_dirs(&self) -> Vec<PathBuf> {
        let mut search_dirs = Vec::new();
        if let Some(exe_dir) = &self.exe_dir {
            search_dirs.push(exe_dir.clone());
            if let Some(parent) = exe_dir.parent() {
                search_dirs.push(parent.to_path_buf());
            }
        }
        if let Some(cwd) = &self.working_dir {
            search_dirs.push(cwd.clone());
            for dir in cwd.ancestors().take(BUILD_DIR_DEPTH) {
                search_dirs.push(dir.join(".build"));
            }
        }

        let mut bundles = Vec::new();
        for dir in search_dirs {
            let Ok(mut children) = self.file_system.list_directory(&dir).await else {
                continue;
            };
            children.sort();
            bundles.extend(children.into_iter().filter(|child| is_bundle(child)));
        }
        bundles
    }
}

fn is_bundle(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == "bundle")
}

/// Decode a chart JSON array (`[{"rank":1,"title":"..","artist":".."}]`).
pub fn parse_entries(data: &[u8], location: &str) -> Result<Vec<ChartEntry>> {
    serde_json::from_slice(data).map_err(|e| SourceError::Parse {
        location: location.to_string(),
        message: e.to_string(),
    })
}
