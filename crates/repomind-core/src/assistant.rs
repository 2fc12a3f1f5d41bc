// SPDX-License-Identifier: Apache-2.0

//! Question answering about a repository or a profile.
//!
//! For repositories the flow is: metadata and tree (cached), AI file selection
//! (cached per normalized question), file contents (cached per blob SHA),
//! prompt assembly, generation. Profiles skip file selection and use the
//! profile plus its top repositories as context.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use octocrab::Octocrab;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::ai::{AiProvider, FunctionDeclaration, GenerateOptions, TextStream};
use crate::analytics::{EventMetadata, EventType, track_event};
use crate::cache::CacheProvider;
use crate::caching;
use crate::github::{
    self, FileContent, GitHubProfile, RepoMetadata, RepoStats, RepoSummary, TreeEntry,
};
use crate::state::AppState;
use crate::utils::{truncate, truncate_with_suffix};

/// Most files fed to the model per question.
pub const MAX_SELECTED_FILES: usize = 10;

/// Per-file character budget in prompts.
pub const MAX_FILE_CHARS: usize = 12_000;

/// Most tree paths offered to the model during selection.
pub const MAX_TREE_PATHS: usize = 800;

/// Repositories listed in profile prompts.
pub const PROFILE_TOP_REPOS: usize = 10;

const SELECT_FILES_FN: &str = "select_files";

const SYSTEM_PROMPT: &str = "You are RepoMind, an assistant that explains GitHub repositories \
and developer profiles. Ground every answer in the provided context, cite file paths when \
referring to code, and use fenced code blocks for snippets. Say so when the context does not \
contain the answer.";

/// What a question is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A repository.
    Repo {
        /// Owner login.
        owner: String,
        /// Repository name.
        repo: String,
    },
    /// A user profile.
    Profile {
        /// User login.
        username: String,
    },
}

impl Subject {
    /// Parses `owner/repo` as a repository and a bare login as a profile.
    ///
    /// # Errors
    ///
    /// Returns an error for empty input or a malformed `owner/repo`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().trim_matches('/');
        if s.is_empty() {
            anyhow::bail!("Subject must be a username or owner/repo");
        }
        if s.contains('/') {
            let (owner, repo) = github::parse_owner_repo(s)?;
            Ok(Self::Repo { owner, repo })
        } else {
            Ok(Self::Profile {
                username: s.to_string(),
            })
        }
    }
}

/// Who asked, for analytics.
#[derive(Debug, Clone, Default)]
pub struct Visitor {
    /// Stable visitor id.
    pub id: String,
    /// Request attributes.
    pub metadata: EventMetadata,
}

/// Declaration offered to the model for file selection.
#[must_use]
pub fn select_files_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: SELECT_FILES_FN.to_string(),
        description: format!(
            "Select up to {MAX_SELECTED_FILES} repository files most relevant to the question."
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "File paths exactly as listed in the repository tree"
                }
            },
            "required": ["files"]
        }),
    }
}

/// Pulls the first JSON array of strings out of free text, tolerating code fences.
#[must_use]
pub fn extract_json_array(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let items = parsed.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

/// Keeps paths that are files in the tree, in order, without duplicates, capped.
#[must_use]
pub fn validate_selection(candidates: Vec<String>, tree: &[TreeEntry]) -> Vec<String> {
    let files: HashSet<&str> = tree
        .iter()
        .filter(|e| e.is_file())
        .map(|e| e.path.as_str())
        .collect();
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|p| p.trim().trim_start_matches("./").to_string())
        .filter(|p| files.contains(p.as_str()) && seen.insert(p.clone()))
        .take(MAX_SELECTED_FILES)
        .collect()
}

fn selection_prompt(metadata: &RepoMetadata, tree: &[TreeEntry], question: &str) -> String {
    let paths: Vec<&str> = tree
        .iter()
        .filter(|e| e.is_file())
        .take(MAX_TREE_PATHS)
        .map(|e| e.path.as_str())
        .collect();
    format!(
        "Repository: {}\n\nFiles:\n{}\n\nQuestion: {question}\n\n\
         Choose up to {MAX_SELECTED_FILES} files whose contents best answer the question. \
         Call `{SELECT_FILES_FN}`, or reply with only a JSON array of paths.",
        metadata.full_name,
        paths.join("\n"),
    )
}

/// Assembles the answer prompt for a repository question.
///
/// Output is deterministic for the same inputs; each file is truncated to
/// [`MAX_FILE_CHARS`].
#[must_use]
pub fn build_prompt(
    metadata: &RepoMetadata,
    stats: Option<&RepoStats>,
    files: &[FileContent],
    question: &str,
) -> String {
    let mut prompt = format!("# Repository: {}\n", metadata.full_name);
    if let Some(description) = &metadata.description {
        prompt.push_str(&format!("Description: {description}\n"));
    }
    if let Some(language) = &metadata.language {
        prompt.push_str(&format!("Primary language: {language}\n"));
    }
    prompt.push_str(&format!(
        "Stars: {} | Forks: {} | Open issues: {} | Default branch: {}\n",
        metadata.stargazers_count,
        metadata.forks_count,
        metadata.open_issues_count,
        metadata.default_branch
    ));
    if !metadata.topics.is_empty() {
        prompt.push_str(&format!("Topics: {}\n", metadata.topics.join(", ")));
    }

    if let Some(stats) = stats {
        if !stats.languages.is_empty() {
            let languages: Vec<String> = stats
                .languages
                .iter()
                .map(|l| format!("{} {:.1}%", l.name, l.percent))
                .collect();
            prompt.push_str(&format!("Languages: {}\n", languages.join(", ")));
        }
        if !stats.commits.is_empty() {
            prompt.push_str("\n## Recent commits\n");
            for commit in &stats.commits {
                let headline = commit.message.lines().next().unwrap_or_default();
                prompt.push_str(&format!(
                    "- {} {} ({})\n",
                    &commit.oid.chars().take(7).collect::<String>(),
                    truncate(headline, 100),
                    commit.author.as_deref().unwrap_or("unknown")
                ));
            }
        }
    }

    if !files.is_empty() {
        prompt.push_str("\n## Files\n");
        for file in files {
            let body = truncate_with_suffix(&file.content, MAX_FILE_CHARS, "\n... [truncated]");
            prompt.push_str(&format!("\n### {}\n```\n{body}\n```\n", file.path));
        }
    }

    prompt.push_str(&format!("\n## Question\n{question}\n"));
    prompt
}

/// Assembles the answer prompt for a profile question.
#[must_use]
pub fn build_profile_prompt(profile: &GitHubProfile, repos: &[RepoSummary], question: &str) -> String {
    let mut prompt = format!(
        "# Developer: {}{}\n",
        profile.login,
        profile
            .name
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default()
    );
    for (label, value) in [
        ("Bio", &profile.bio),
        ("Location", &profile.location),
        ("Company", &profile.company),
        ("Website", &profile.blog),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            prompt.push_str(&format!("{label}: {value}\n"));
        }
    }
    prompt.push_str(&format!(
        "Public repos: {} | Followers: {} | Following: {}\n",
        profile.public_repos, profile.followers, profile.following
    ));

    if !repos.is_empty() {
        prompt.push_str("\n## Top repositories\n");
        for repo in repos {
            prompt.push_str(&format!(
                "- {} [{}] ★{}{}\n",
                repo.full_name,
                repo.language.as_deref().unwrap_or("n/a"),
                repo.stargazers_count,
                repo.description
                    .as_deref()
                    .map(|d| format!(": {}", truncate(d, 160)))
                    .unwrap_or_default()
            ));
        }
    }

    prompt.push_str(&format!("\n## Question\n{question}\n"));
    prompt
}

/// Answers questions using shared providers.
#[derive(Clone)]
pub struct Assistant {
    ai: Arc<dyn AiProvider>,
    cache: Arc<dyn CacheProvider>,
    github: Arc<Octocrab>,
}

impl Assistant {
    /// Assistant over explicit providers.
    #[must_use]
    pub fn new(ai: Arc<dyn AiProvider>, cache: Arc<dyn CacheProvider>, github: Arc<Octocrab>) -> Self {
        Self { ai, cache, github }
    }

    /// Assistant over the application's providers.
    ///
    /// # Errors
    ///
    /// Fails if any provider cannot be initialised.
    pub fn from_state(state: &AppState) -> Result<Self> {
        Ok(Self::new(state.ai()?, state.cache()?, state.github()?))
    }

    fn options() -> GenerateOptions {
        GenerateOptions::builder().system(SYSTEM_PROMPT).build()
    }

    /// Repository metadata through the 15-minute cache.
    ///
    /// # Errors
    ///
    /// Propagates GitHub failures, including `NotFound`.
    pub async fn repo_metadata(&self, owner: &str, repo: &str) -> Result<RepoMetadata> {
        let cache = self.cache.as_ref();
        if let Some(hit) = caching::get_cached_repo(cache, owner, repo).await {
            return Ok(hit);
        }
        let metadata = github::fetch_repo(&self.github, owner, repo).await?;
        caching::cache_repo(cache, owner, repo, &metadata).await;
        Ok(metadata)
    }

    /// File tree through the 15-minute cache.
    ///
    /// # Errors
    ///
    /// Propagates GitHub failures.
    pub async fn repo_tree(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<TreeEntry>> {
        let cache = self.cache.as_ref();
        if let Some(hit) = caching::get_cached_tree(cache, owner, repo, branch).await {
            return Ok(hit);
        }
        let tree = github::fetch_tree(&self.github, owner, repo, branch).await?;
        caching::cache_tree(cache, owner, repo, branch, &tree).await;
        Ok(tree)
    }

    /// Profile through the 30-minute cache.
    ///
    /// # Errors
    ///
    /// Propagates GitHub failures, including `NotFound`.
    pub async fn profile(&self, username: &str) -> Result<GitHubProfile> {
        let cache = self.cache.as_ref();
        if let Some(hit) = caching::get_cached_profile(cache, username).await {
            return Ok(hit);
        }
        let profile = github::fetch_profile(&self.github, username).await?;
        caching::cache_profile(cache, username, &profile).await;
        Ok(profile)
    }

    /// Picks files relevant to `question`.
    ///
    /// Uses the cached selection when present. Otherwise asks the model via
    /// function calling, falling back to a JSON array in plain text. Only
    /// files present in `tree` survive.
    ///
    /// # Errors
    ///
    /// Propagates AI provider failures.
    #[instrument(skip(self, metadata, tree), fields(full_name = %metadata.full_name))]
    pub async fn select_files(
        &self,
        owner: &str,
        repo: &str,
        metadata: &RepoMetadata,
        tree: &[TreeEntry],
        question: &str,
    ) -> Result<Vec<String>> {
        let cache = self.cache.as_ref();
        if let Some(hit) = caching::get_cached_query_selection(cache, owner, repo, question).await {
            return Ok(validate_selection(hit, tree));
        }

        let prompt = selection_prompt(metadata, tree, question);
        let options = GenerateOptions::builder().temperature(0.0).build();
        let result = self
            .ai
            .generate_with_functions(&prompt, &[select_files_declaration()], &options)
            .await?;

        let from_call = result
            .function_calls
            .iter()
            .find(|call| call.name == SELECT_FILES_FN)
            .and_then(|call| call.args.get("files"))
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            });

        let candidates = match from_call {
            Some(files) => files,
            None => match result.text.as_deref().and_then(extract_json_array) {
                Some(files) => files,
                None => {
                    debug!("No function call, asking for a plain JSON array");
                    let text = self.ai.generate_content(&prompt, &options).await?;
                    extract_json_array(&text).unwrap_or_default()
                }
            },
        };

        let selection = validate_selection(candidates, tree);
        info!(count = selection.len(), "Selected files");
        if !selection.is_empty() {
            caching::cache_query_selection(cache, owner, repo, question, &selection).await;
        }
        Ok(selection)
    }

    /// Loads selected files, from the SHA-keyed cache where possible.
    ///
    /// Misses are fetched concurrently; files that cannot be read are skipped.
    pub async fn load_files(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        tree: &[TreeEntry],
        selection: &[String],
    ) -> Vec<FileContent> {
        let cache = self.cache.as_ref();
        let loads = selection.iter().filter_map(|path| {
            let entry = tree.iter().find(|e| &e.path == path)?;
            Some(async move {
                if let Some(content) =
                    caching::get_cached_file(cache, owner, repo, &entry.path, &entry.sha).await
                {
                    return Some(FileContent {
                        path: entry.path.clone(),
                        sha: entry.sha.clone(),
                        content,
                    });
                }
                match github::fetch_file_content(&self.github, owner, repo, &entry.path, Some(branch))
                    .await
                {
                    Ok(file) => {
                        caching::cache_file(cache, owner, repo, &entry.path, &entry.sha, &file.content)
                            .await;
                        Some(file)
                    }
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "Skipping unreadable file");
                        None
                    }
                }
            })
        });

        join_all(loads).await.into_iter().flatten().collect()
    }

    /// Builds the full answer prompt for a subject.
    ///
    /// # Errors
    ///
    /// Propagates GitHub and AI selection failures.
    pub async fn prepare_prompt(&self, subject: &Subject, question: &str) -> Result<String> {
        match subject {
            Subject::Repo { owner, repo } => {
                let metadata = self.repo_metadata(owner, repo).await?;
                let tree = self.repo_tree(owner, repo, &metadata.default_branch).await?;
                let selection = self
                    .select_files(owner, repo, &metadata, &tree, question)
                    .await?;

                let (files, stats) = futures::join!(
                    self.load_files(owner, repo, &metadata.default_branch, &tree, &selection),
                    github::fetch_repo_stats(&self.github, owner, repo)
                );
                let stats = stats
                    .inspect_err(|e| debug!(error = %e, "Repository stats unavailable"))
                    .ok();
                Ok(build_prompt(&metadata, stats.as_ref(), &files, question))
            }
            Subject::Profile { username } => {
                let profile = self.profile(username).await?;
                let repos = match github::fetch_user_repos(&self.github, username).await {
                    Ok(repos) => github::top_repos(repos, PROFILE_TOP_REPOS),
                    Err(e) => {
                        warn!(error = %e, "Repository listing unavailable");
                        Vec::new()
                    }
                };
                Ok(build_profile_prompt(&profile, &repos, question))
            }
        }
    }

    async fn record_query(&self, visitor: Option<&Visitor>) {
        if let Some(visitor) = visitor {
            track_event(self.cache.as_ref(), &visitor.id, EventType::Query, &visitor.metadata).await;
        }
    }

    /// Answers a question in one piece and records a query event.
    ///
    /// # Errors
    ///
    /// Propagates GitHub and AI failures.
    pub async fn answer(
        &self,
        subject: &Subject,
        question: &str,
        visitor: Option<&Visitor>,
    ) -> Result<String> {
        let prompt = self.prepare_prompt(subject, question).await?;
        let answer = self.ai.generate_content(&prompt, &Self::options()).await?;
        self.record_query(visitor).await;
        Ok(answer)
    }

    /// Answers a question as a text stream and records a query event.
    ///
    /// # Errors
    ///
    /// Propagates GitHub failures and failures to open the stream.
    pub async fn answer_stream(
        &self,
        subject: &Subject,
        question: &str,
        visitor: Option<&Visitor>,
    ) -> Result<TextStream> {
        let prompt = self.prepare_prompt(subject, question).await?;
        let stream = self
            .ai
            .generate_content_stream(&prompt, &Self::options())
            .await?;
        self.record_query(visitor).await;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, kind: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            type_: kind.to_string(),
            sha: format!("sha-{path}"),
            size: None,
        }
    }

    fn metadata() -> RepoMetadata {
        RepoMetadata {
            name: "demo".to_string(),
            full_name: "octo/demo".to_string(),
            description: Some("A demo".to_string()),
            default_branch: "main".to_string(),
            language: Some("Rust".to_string()),
            stargazers_count: 42,
            forks_count: 3,
            open_issues_count: 1,
            topics: vec!["cli".to_string()],
            html_url: "https://github.com/octo/demo".to_string(),
            updated_at: None,
        }
    }

    #[test]
    fn subject_parsing() {
        assert_eq!(
            Subject::parse("octo/demo").expect("repo"),
            Subject::Repo {
                owner: "octo".to_string(),
                repo: "demo".to_string()
            }
        );
        assert_eq!(
            Subject::parse(" octocat ").expect("profile"),
            Subject::Profile {
                username: "octocat".to_string()
            }
        );
        assert!(Subject::parse("a/b/c").is_err());
        assert!(Subject::parse("  ").is_err());
    }

    #[test]
    fn json_array_extraction_tolerates_fences() {
        assert_eq!(
            extract_json_array("```json\n[\"src/main.rs\", \"README.md\"]\n```"),
            Some(vec!["src/main.rs".to_string(), "README.md".to_string()])
        );
        assert_eq!(extract_json_array("no array here"), None);
        assert_eq!(extract_json_array("] backwards ["), None);
    }

    #[test]
    fn selection_is_validated_against_tree() {
        let tree = vec![entry("src/main.rs", "blob"), entry("src", "tree"), entry("README.md", "blob")];
        let picked = validate_selection(
            vec![
                "./src/main.rs".to_string(),
                "src".to_string(),
                "missing.rs".to_string(),
                "src/main.rs".to_string(),
                "README.md".to_string(),
            ],
            &tree,
        );
        assert_eq!(picked, vec!["src/main.rs".to_string(), "README.md".to_string()]);
    }

    #[test]
    fn selection_is_capped() {
        let tree: Vec<TreeEntry> = (0..20).map(|i| entry(&format!("f{i}.rs"), "blob")).collect();
        let all: Vec<String> = tree.iter().map(|e| e.path.clone()).collect();
        assert_eq!(validate_selection(all, &tree).len(), MAX_SELECTED_FILES);
    }

    #[test]
    fn prompt_is_deterministic_and_truncates() {
        let files = vec![FileContent {
            path: "src/big.rs".to_string(),
            sha: "s".to_string(),
            content: "x".repeat(MAX_FILE_CHARS + 50),
        }];
        let a = build_prompt(&metadata(), None, &files, "What does it do?");
        let b = build_prompt(&metadata(), None, &files, "What does it do?");
        assert_eq!(a, b);
        assert!(a.starts_with("# Repository: octo/demo\n"));
        assert!(a.contains("### src/big.rs"));
        assert!(a.contains("... [truncated]"));
        assert!(a.ends_with("## Question\nWhat does it do?\n"));
    }

    #[test]
    fn declaration_schema_is_object() {
        let decl = select_files_declaration();
        assert_eq!(decl.name, "select_files");
        assert_eq!(decl.parameters["type"], "object");
        assert_eq!(decl.parameters["required"][0], "files");
    }

    #[test]
    fn profile_prompt_lists_repos() {
        let profile = GitHubProfile {
            login: "octocat".to_string(),
            name: Some("The Octocat".to_string()),
            bio: None,
            avatar_url: String::new(),
            html_url: String::new(),
            location: Some("SF".to_string()),
            company: None,
            blog: Some(String::new()),
            public_repos: 8,
            followers: 100,
            following: 0,
        };
        let repos = vec![RepoSummary {
            name: "hello".to_string(),
            full_name: "octocat/hello".to_string(),
            description: Some("Hi".to_string()),
            language: None,
            stargazers_count: 5,
            forks_count: 0,
            fork: false,
            html_url: String::new(),
            updated_at: None,
        }];
        let prompt = build_profile_prompt(&profile, &repos, "Who is this?");
        assert!(prompt.starts_with("# Developer: octocat (The Octocat)\n"));
        assert!(prompt.contains("Location: SF\n"));
        assert!(!prompt.contains("Website"));
        assert!(prompt.contains("- octocat/hello [n/a] ★5: Hi"));
    }
}
