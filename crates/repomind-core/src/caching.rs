// SPDX-License-Identifier: Apache-2.0

//! Fixed-TTL cache helpers for GitHub data and AI file selections.
//!
//! Key conventions:
//!
//! | Data | Key | TTL |
//! |---|---|---|
//! | File content | `file:{owner}/{repo}:{path}:{sha}` | 1 h |
//! | Repository metadata | `repo:{owner}/{repo}` | 15 min |
//! | Profile | `profile:{username}` | 30 min |
//! | File tree | `tree:{owner}/{repo}:{branch}` | 15 min |
//! | File selection | `query:{owner}/{repo}:{normalized query}` | 24 h |
//!
//! File keys embed the blob SHA, so an edited file misses without any
//! invalidation. Every helper degrades to `None`/`false` when the cache is
//! unavailable.

use tracing::debug;

use crate::cache::CacheProvider;
use crate::github::{GitHubProfile, RepoMetadata, TreeEntry};

/// File content TTL in seconds.
pub const FILE_TTL_SECS: u64 = 60 * 60;
/// Repository metadata TTL in seconds.
pub const REPO_TTL_SECS: u64 = 15 * 60;
/// Profile TTL in seconds.
pub const PROFILE_TTL_SECS: u64 = 30 * 60;
/// File tree TTL in seconds.
pub const TREE_TTL_SECS: u64 = 15 * 60;
/// File-selection TTL in seconds.
pub const QUERY_TTL_SECS: u64 = 24 * 60 * 60;

/// Normalizes a question for selection caching: trimmed and lower-cased.
///
/// Matching stays exact after normalization.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Key for a file at a specific blob SHA.
#[must_use]
pub fn file_key(owner: &str, repo: &str, path: &str, sha: &str) -> String {
    format!("file:{owner}/{repo}:{path}:{sha}")
}

/// Key for repository metadata.
#[must_use]
pub fn repo_key(owner: &str, repo: &str) -> String {
    format!("repo:{owner}/{repo}")
}

/// Key for a user profile.
#[must_use]
pub fn profile_key(username: &str) -> String {
    format!("profile:{username}")
}

/// Key for a branch's file tree.
#[must_use]
pub fn tree_key(owner: &str, repo: &str, branch: &str) -> String {
    format!("tree:{owner}/{repo}:{branch}")
}

/// Key for a file selection; the query is normalized first.
#[must_use]
pub fn query_key(owner: &str, repo: &str, query: &str) -> String {
    format!("query:{owner}/{repo}:{}", normalize_query(query))
}

/// Cached file content for a specific blob SHA.
pub async fn get_cached_file(
    cache: &dyn CacheProvider,
    owner: &str,
    repo: &str,
    path: &str,
    sha: &str,
) -> Option<String> {
    let hit = cache.get::<String>(&file_key(owner, repo, path, sha)).await;
    debug!(path, hit = hit.is_some(), "File cache lookup");
    hit
}

/// Caches file content for one hour.
pub async fn cache_file(
    cache: &dyn CacheProvider,
    owner: &str,
    repo: &str,
    path: &str,
    sha: &str,
    content: &str,
) -> bool {
    cache
        .setex(&file_key(owner, repo, path, sha), FILE_TTL_SECS, content)
        .await
}

/// Cached repository metadata.
pub async fn get_cached_repo(cache: &dyn CacheProvider, owner: &str, repo: &str) -> Option<RepoMetadata> {
    cache.get(&repo_key(owner, repo)).await
}

/// Caches repository metadata for 15 minutes.
pub async fn cache_repo(
    cache: &dyn CacheProvider,
    owner: &str,
    repo: &str,
    metadata: &RepoMetadata,
) -> bool {
    cache
        .setex(&repo_key(owner, repo), REPO_TTL_SECS, metadata)
        .await
}

/// Cached user profile.
pub async fn get_cached_profile(cache: &dyn CacheProvider, username: &str) -> Option<GitHubProfile> {
    cache.get(&profile_key(username)).await
}

/// Caches a user profile for 30 minutes.
pub async fn cache_profile(cache: &dyn CacheProvider, username: &str, profile: &GitHubProfile) -> bool {
    cache
        .setex(&profile_key(username), PROFILE_TTL_SECS, profile)
        .await
}

/// Cached file tree for a branch.
pub async fn get_cached_tree(
    cache: &dyn CacheProvider,
    owner: &str,
    repo: &str,
    branch: &str,
) -> Option<Vec<TreeEntry>> {
    cache.get(&tree_key(owner, repo, branch)).await
}

/// Caches a file tree for 15 minutes.
pub async fn cache_tree(
    cache: &dyn CacheProvider,
    owner: &str,
    repo: &str,
    branch: &str,
    tree: &[TreeEntry],
) -> bool {
    cache
        .setex(&tree_key(owner, repo, branch), TREE_TTL_SECS, tree)
        .await
}

/// Cached AI file selection for a question.
pub async fn get_cached_query_selection(
    cache: &dyn CacheProvider,
    owner: &str,
    repo: &str,
    query: &str,
) -> Option<Vec<String>> {
    let hit = cache.get::<Vec<String>>(&query_key(owner, repo, query)).await;
    debug!(hit = hit.is_some(), "Selection cache lookup");
    hit
}

/// Caches a file selection for 24 hours.
pub async fn cache_query_selection(
    cache: &dyn CacheProvider,
    owner: &str,
    repo: &str,
    query: &str,
    files: &[String],
) -> bool {
    cache
        .setex(&query_key(owner, repo, query), QUERY_TTL_SECS, files)
        .await
}
