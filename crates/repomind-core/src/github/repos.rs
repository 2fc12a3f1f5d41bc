// SPDX-License-Identifier: Apache-2.0

//! Repository metadata, file trees and file contents.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use octocrab::Octocrab;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::get_json;
use crate::error::RepoMindError;

/// Characters escaped inside a single path segment of a contents URL.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Directory names that never contain source worth showing the model.
const NOISE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "out",
    ".next",
    ".nuxt",
    "target",
    "vendor",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
    ".turbo",
    ".idea",
    ".vscode",
];

/// Lock files and generated artifacts.
const NOISE_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "Cargo.lock",
    "poetry.lock",
    "composer.lock",
    "Gemfile.lock",
    ".DS_Store",
];

/// Binary and media extensions.
const NOISE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "webp", "bmp", "svg", "mp4", "mov", "mp3", "wav", "woff",
    "woff2", "ttf", "eot", "otf", "pdf", "zip", "gz", "tar", "jar", "exe", "dll", "so", "dylib",
    "wasm", "min.js", "map",
];

/// Repository metadata from `GET /repos/{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoMetadata {
    /// Repository name.
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    /// Repository description.
    #[serde(default)]
    pub description: Option<String>,
    /// Default branch (e.g. `main`).
    pub default_branch: String,
    /// Primary language.
    #[serde(default)]
    pub language: Option<String>,
    /// Star count.
    #[serde(default)]
    pub stargazers_count: u64,
    /// Fork count.
    #[serde(default)]
    pub forks_count: u64,
    /// Open issue count.
    #[serde(default)]
    pub open_issues_count: u64,
    /// Repository topics.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Web URL.
    pub html_url: String,
    /// Last push or update timestamp (ISO 8601).
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Entry in a recursive git tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Path relative to the repository root.
    pub path: String,
    /// `blob` or `tree`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Object SHA.
    pub sha: String,
    /// Size in bytes (blobs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl TreeEntry {
    /// Whether this entry is a file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.type_ == "blob"
    }
}

#[derive(Debug, Deserialize)]
struct GitTreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

/// Decoded file from the contents API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Path relative to the repository root.
    pub path: String,
    /// Blob SHA.
    pub sha: String,
    /// UTF-8 text (lossily decoded).
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    type_: String,
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl ContentsResponse {
    fn decode(self) -> Result<FileContent> {
        if self.type_ != "file" {
            anyhow::bail!("{} is a {}, not a file", self.path, self.type_);
        }
        let raw = self.content.unwrap_or_default();
        let content = match self.encoding.as_deref() {
            Some("base64") => {
                let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = STANDARD
                    .decode(compact)
                    .with_context(|| format!("Invalid base64 content for {}", self.path))?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            _ => raw,
        };
        Ok(FileContent {
            path: self.path,
            sha: self.sha,
            content,
        })
    }
}

/// Percent-encodes each segment of a repository path, keeping `/` separators.
#[must_use]
pub fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Drops VCS metadata, dependency folders, build output, lock files and
/// binary assets from a tree listing.
#[must_use]
pub fn filter_noise_paths(entries: Vec<TreeEntry>) -> Vec<TreeEntry> {
    entries
        .into_iter()
        .filter(|entry| !is_noise_path(&entry.path))
        .collect()
}

fn is_noise_path(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| NOISE_DIRS.contains(s)) {
        return true;
    }
    let Some(file_name) = segments.last() else {
        return false;
    };
    if NOISE_FILES.contains(file_name) {
        return true;
    }
    let lower = file_name.to_lowercase();
    NOISE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Fetches repository metadata.
///
/// # Errors
///
/// Returns `RepoMindError::NotFound` if the repository does not exist.
#[instrument(skip(client))]
pub async fn fetch_repo(client: &Octocrab, owner: &str, repo: &str) -> Result<RepoMetadata> {
    let route = format!("/repos/{owner}/{repo}");
    let metadata: RepoMetadata = get_json(client, &route, &format!("{owner}/{repo}")).await?;
    debug!(branch = %metadata.default_branch, "Fetched repository metadata");
    Ok(metadata)
}

/// Fetches the recursive file tree for a branch, with noise paths removed.
///
/// # Errors
///
/// Returns `RepoMindError::NotFound` if the repository or branch does not exist.
#[instrument(skip(client))]
pub async fn fetch_tree(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    branch: &str,
) -> Result<Vec<TreeEntry>> {
    let route = format!(
        "/repos/{owner}/{repo}/git/trees/{}?recursive=1",
        encode_path(branch)
    );
    let response: GitTreeResponse =
        get_json(client, &route, &format!("{owner}/{repo}@{branch}")).await?;

    if response.truncated {
        debug!("Tree listing was truncated by GitHub");
    }
    let total = response.tree.len();
    let filtered = filter_noise_paths(response.tree);
    debug!(total, kept = filtered.len(), "Fetched repository tree");
    Ok(filtered)
}

/// Fetches and decodes one file.
///
/// `git_ref` selects a branch, tag or commit; the default branch is used when
/// `None`.
///
/// # Errors
///
/// Returns `RepoMindError::NotFound` if the path does not exist, or an error
/// if the path is a directory or the payload cannot be decoded.
#[instrument(skip(client))]
pub async fn fetch_file_content(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    path: &str,
    git_ref: Option<&str>,
) -> Result<FileContent> {
    let mut route = format!("/repos/{owner}/{repo}/contents/{}", encode_path(path));
    if let Some(r) = git_ref {
        route.push_str("?ref=");
        route.push_str(&encode_path(r));
    }
    let response: ContentsResponse =
        get_json(client, &route, &format!("{owner}/{repo}:{path}")).await?;
    response.decode()
}

/// Fetches the repository README, if there is one.
///
/// # Errors
///
/// Returns an error for failures other than a missing README.
#[instrument(skip(client))]
pub async fn fetch_readme(client: &Octocrab, owner: &str, repo: &str) -> Result<Option<FileContent>> {
    let route = format!("/repos/{owner}/{repo}/readme");
    match get_json::<ContentsResponse>(client, &route, &format!("{owner}/{repo} README")).await {
        Ok(response) => response.decode().map(Some),
        Err(e) if matches!(e.downcast_ref::<RepoMindError>(), Some(RepoMindError::NotFound { .. })) => {
            debug!("Repository has no README");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
