// SPDX-License-Identifier: Apache-2.0

//! GraphQL queries for GitHub API.
//!
//! One query fetches the language breakdown and recent commit history of a
//! repository, which would otherwise take two REST calls.

use anyhow::{Context, Result};
use backon::Retryable;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::error::RepoMindError;
use crate::retry::{DEFAULT_MAX_RETRIES, is_retryable_anyhow, retry_backoff};

const REPO_STATS_QUERY: &str = r"
query RepoStats($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    languages(first: 10, orderBy: { field: SIZE, direction: DESC }) {
      totalSize
      edges { size node { name color } }
    }
    defaultBranchRef {
      target {
        ... on Commit {
          history(first: 20) {
            nodes {
              oid
              messageHeadline
              committedDate
              author { name user { login } }
            }
          }
        }
      }
    }
  }
}";

/// A language and its share of the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageShare {
    /// Language name.
    pub name: String,
    /// Linguist color, if known.
    pub color: Option<String>,
    /// Bytes of code in this language.
    pub size: u64,
    /// Percentage of total bytes, rounded to one decimal.
    pub percent: f64,
}

/// A commit on the default branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Commit SHA.
    pub oid: String,
    /// First line of the commit message.
    pub message: String,
    /// Author login, falling back to the git author name.
    pub author: Option<String>,
    /// Commit timestamp (ISO 8601).
    pub committed_date: String,
}

/// Language breakdown and recent history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStats {
    /// Up to ten languages, largest first.
    pub languages: Vec<LanguageShare>,
    /// Up to twenty most recent commits.
    pub commits: Vec<CommitSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    languages: Option<LanguagesConnection>,
    default_branch_ref: Option<BranchRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguagesConnection {
    total_size: u64,
    edges: Vec<LanguageEdge>,
}

#[derive(Debug, Deserialize)]
struct LanguageEdge {
    size: u64,
    node: LanguageNode,
}

#[derive(Debug, Deserialize)]
struct LanguageNode {
    name: String,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    target: Option<CommitTarget>,
}

#[derive(Debug, Deserialize)]
struct CommitTarget {
    history: Option<HistoryConnection>,
}

#[derive(Debug, Deserialize)]
struct HistoryConnection {
    nodes: Vec<CommitNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitNode {
    oid: String,
    message_headline: String,
    committed_date: String,
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: Option<String>,
    user: Option<AuthorUser>,
}

#[derive(Debug, Deserialize)]
struct AuthorUser {
    login: String,
}

#[allow(clippy::cast_precision_loss)]
fn percent_of(size: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (size as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Parses a `RepoStats` GraphQL response.
///
/// # Errors
///
/// Returns an error if the response carries GraphQL errors, or
/// `RepoMindError::NotFound` if the repository is null.
pub fn parse_repo_stats(response: &Value, resource: &str) -> Result<RepoStats> {
    if let Some(errors) = response.get("errors") {
        let not_found = errors
            .as_array()
            .is_some_and(|errs| errs.iter().any(|e| e["type"] == "NOT_FOUND"));
        if not_found {
            return Err(RepoMindError::NotFound {
                resource: resource.to_string(),
            }
            .into());
        }
        let error_msg = serde_json::to_string_pretty(errors).unwrap_or_default();
        anyhow::bail!("GraphQL error: {error_msg}");
    }

    let repo = response
        .get("data")
        .and_then(|d| d.get("repository"))
        .context("Missing 'data.repository' field in GraphQL response")?;
    if repo.is_null() {
        return Err(RepoMindError::NotFound {
            resource: resource.to_string(),
        }
        .into());
    }

    let node: RepositoryNode =
        serde_json::from_value(repo.clone()).context("Failed to parse repository stats")?;

    let languages = node
        .languages
        .map(|conn| {
            conn.edges
                .into_iter()
                .map(|edge| LanguageShare {
                    percent: percent_of(edge.size, conn.total_size),
                    name: edge.node.name,
                    color: edge.node.color,
                    size: edge.size,
                })
                .collect()
        })
        .unwrap_or_default();

    let commits = node
        .default_branch_ref
        .and_then(|r| r.target)
        .and_then(|t| t.history)
        .map(|h| {
            h.nodes
                .into_iter()
                .map(|c| CommitSummary {
                    oid: c.oid,
                    message: c.message_headline,
                    author: c
                        .author
                        .and_then(|a| a.user.map(|u| u.login).or(a.name)),
                    committed_date: c.committed_date,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(RepoStats { languages, commits })
}

/// Fetches language breakdown and recent commits in one GraphQL call.
///
/// # Errors
///
/// Returns `RepoMindError::NotFound` if the repository does not exist, or an
/// error if the query fails.
#[instrument(skip(client))]
pub async fn fetch_repo_stats(client: &Octocrab, owner: &str, repo: &str) -> Result<RepoStats> {
    let body = json!({
        "query": REPO_STATS_QUERY,
        "variables": { "owner": owner, "name": repo },
    });

    debug!("Executing GraphQL query");
    let response: Value = (|| async {
        client
            .graphql::<Value>(&body)
            .await
            .map_err(|e| anyhow::Error::new(e).context("Failed to execute GraphQL query"))
    })
    .retry(retry_backoff(DEFAULT_MAX_RETRIES))
    .when(is_retryable_anyhow)
    .notify(|err, dur| {
        warn!(error = %err, retry_after = ?dur, "Retrying GraphQL query");
    })
    .await?;

    let stats = parse_repo_stats(&response, &format!("{owner}/{repo}"))?;
    debug!(
        languages = stats.languages.len(),
        commits = stats.commits.len(),
        "Fetched repository stats"
    );
    Ok(stats)
}
