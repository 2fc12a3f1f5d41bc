// SPDX-License-Identifier: Apache-2.0

//! User profiles and their public repositories.

use anyhow::Result;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::get_json;

/// Public profile from `GET /users/{username}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubProfile {
    /// Login handle.
    pub login: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Profile bio.
    #[serde(default)]
    pub bio: Option<String>,
    /// Avatar image URL.
    pub avatar_url: String,
    /// Profile page URL.
    pub html_url: String,
    /// Location free text.
    #[serde(default)]
    pub location: Option<String>,
    /// Company free text.
    #[serde(default)]
    pub company: Option<String>,
    /// Personal website.
    #[serde(default)]
    pub blog: Option<String>,
    /// Number of public repositories.
    #[serde(default)]
    pub public_repos: u64,
    /// Follower count.
    #[serde(default)]
    pub followers: u64,
    /// Following count.
    #[serde(default)]
    pub following: u64,
}

/// Repository entry in a user's repository listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSummary {
    /// Repository name.
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Primary language.
    #[serde(default)]
    pub language: Option<String>,
    /// Star count.
    #[serde(default)]
    pub stargazers_count: u64,
    /// Fork count.
    #[serde(default)]
    pub forks_count: u64,
    /// Whether this is a fork.
    #[serde(default)]
    pub fork: bool,
    /// Web URL.
    pub html_url: String,
    /// Last update timestamp (ISO 8601).
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Fetches a user's public profile.
///
/// # Errors
///
/// Returns `RepoMindError::NotFound` if the user does not exist.
#[instrument(skip(client))]
pub async fn fetch_profile(client: &Octocrab, username: &str) -> Result<GitHubProfile> {
    let route = format!("/users/{username}");
    let profile: GitHubProfile = get_json(client, &route, &format!("user {username}")).await?;
    debug!(repos = profile.public_repos, "Fetched profile");
    Ok(profile)
}

/// Fetches up to 100 of a user's repositories, most recently updated first.
///
/// # Errors
///
/// Returns `RepoMindError::NotFound` if the user does not exist.
#[instrument(skip(client))]
pub async fn fetch_user_repos(client: &Octocrab, username: &str) -> Result<Vec<RepoSummary>> {
    let route = format!("/users/{username}/repos?sort=updated&per_page=100");
    let repos: Vec<RepoSummary> =
        get_json(client, &route, &format!("repositories of {username}")).await?;
    debug!(count = repos.len(), "Fetched user repositories");
    Ok(repos)
}

/// Orders repositories by stars, breaking ties by most recent update.
#[must_use]
pub fn top_repos(mut repos: Vec<RepoSummary>, limit: usize) -> Vec<RepoSummary> {
    repos.sort_by(|a, b| {
        b.stargazers_count
            .cmp(&a.stargazers_count)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
    repos.truncate(limit);
    repos
}
