// SPDX-License-Identifier: Apache-2.0

//! GitHub integration module.
//!
//! REST access to profiles, repositories, trees, contents and READMEs, plus one
//! GraphQL query for language and commit statistics.

use std::time::Duration;

use anyhow::{Context, Result};
use backon::Retryable;
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::config::GitHubConfig;
use crate::error::RepoMindError;
use crate::retry::{DEFAULT_MAX_RETRIES, is_retryable_anyhow, retry_backoff};

pub mod graphql;
pub mod profile;
pub mod repos;

pub use graphql::{CommitSummary, LanguageShare, RepoStats, fetch_repo_stats};
pub use profile::{GitHubProfile, RepoSummary, fetch_profile, fetch_user_repos, top_repos};
pub use repos::{
    FileContent, RepoMetadata, TreeEntry, fetch_file_content, fetch_readme, fetch_repo,
    fetch_tree, filter_noise_paths,
};

/// Creates an Octocrab client from configuration.
///
/// Requests are unauthenticated when no token is configured, which works for
/// public data at a lower rate limit.
///
/// # Errors
///
/// Returns an error if the base URL is invalid or the client cannot be built.
#[instrument(skip(config))]
pub fn create_client(config: &GitHubConfig) -> Result<Octocrab> {
    let timeout = Duration::from_secs(config.api_timeout_seconds);
    let mut builder = Octocrab::builder()
        .set_connect_timeout(Some(timeout))
        .set_read_timeout(Some(timeout));

    if let Some(base) = config.api_base_url.as_deref() {
        builder = builder
            .base_uri(base)
            .with_context(|| format!("Invalid GitHub API base URL: {base}"))?;
    }

    match config.token.as_deref() {
        Some(token) => {
            info!("Creating authenticated GitHub client");
            builder = builder.personal_token(token.to_string());
        }
        None => warn!("GITHUB_TOKEN not set, using unauthenticated GitHub access"),
    }

    let client = builder.build().context("Failed to build GitHub client")?;
    debug!("Created GitHub client");
    Ok(client)
}

/// Parses an owner/repo string to extract owner and repo.
///
/// Validates format: exactly one `/`, non-empty parts.
///
/// # Errors
///
/// Returns an error if the format is invalid.
pub fn parse_owner_repo(s: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = s.trim().split('/').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        anyhow::bail!(
            "Invalid owner/repo format.\n\
             Expected: owner/repo\n\
             Got: {s}"
        );
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Returns the HTTP status of a GitHub API error, if it carries one.
fn status_of(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

/// Converts an octocrab error, turning 404 into [`RepoMindError::NotFound`].
pub(crate) fn classify(err: octocrab::Error, resource: &str) -> anyhow::Error {
    if status_of(&err) == Some(404) {
        return RepoMindError::NotFound {
            resource: resource.to_string(),
        }
        .into();
    }
    anyhow::Error::new(err).context(format!("GitHub request for {resource} failed"))
}

/// GETs a REST route with retry on transient failures.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Octocrab,
    route: &str,
    resource: &str,
) -> Result<T> {
    (|| async {
        client
            .get::<T, _, _>(route, None::<&()>)
            .await
            .map_err(|e| classify(e, resource))
    })
    .retry(retry_backoff(DEFAULT_MAX_RETRIES))
    .when(is_retryable_anyhow)
    .notify(|err, dur| {
        warn!(
            error = %err,
            retry_after = ?dur,
            resource,
            "Retrying GitHub request"
        );
    })
    .await
}
