//! GitHub REST extraction of pull-request activity.
//!
//! Produces the raw activity document consumed by `ekb build`:
//!
//! 1. Repository metadata (`GET /repos/{repo}`).
//! 2. Closed pull requests, most recently updated first, paginated until
//!    `max_pull_requests` have been examined. Unmerged ones are skipped.
//! 3. Per merged PR: issue comments, commits, and each commit's files with
//!    their patches.
//!
//! Rate limiting (403/429 with `x-ratelimit-remaining: 0` or `retry-after`)
//! sleeps until the advertised reset plus a 5 second buffer, for a bounded
//! number of attempts. A PR that fails to extract is logged and skipped.

use anyhow::Result;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, GithubConfig};
use crate::error::{KbError, Service};
use crate::models::{RawComment, RawCommit, RawFile, RawPullRequest, RawRepository};

const RATE_LIMIT_BUFFER_SECS: u64 = 5;
const PAGE_SIZE: usize = 100;

// ============ API types ============

#[derive(Debug, Deserialize)]
struct ApiRepo {
    full_name: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    language: Option<String>,
    html_url: String,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    id: u64,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    html_url: String,
    created_at: String,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    requested_reviewers: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiComment {
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPullCommit {
    sha: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<ApiGitAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiGitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    #[serde(default)]
    files: Vec<ApiFile>,
}

#[derive(Debug, Deserialize)]
struct ApiFile {
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    patch: Option<String>,
}

/// How long to wait before retrying a rate-limited response, or `None` if
/// the response is not a rate-limit rejection.
pub fn rate_limit_wait(status: u16, headers: &HeaderMap, now: i64) -> Option<Duration> {
    if status != 403 && status != 429 {
        return None;
    }

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(secs) = header("retry-after").and_then(|v| v.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs + RATE_LIMIT_BUFFER_SECS));
    }

    if header("x-ratelimit-remaining") == Some("0") {
        let reset = header("x-ratelimit-reset")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(now);
        let remaining = (reset - now).max(0) as u64;
        return Some(Duration::from_secs(remaining + RATE_LIMIT_BUFFER_SECS));
    }

    if status == 429 {
        return Some(Duration::from_secs(60 + RATE_LIMIT_BUFFER_SECS));
    }

    None
}

// ============ Client ============

pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    rate_limit_attempts: u32,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            warn!("GITHUB_TOKEN not set; running with lower API rate limits");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("expertise-kb/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            rate_limit_attempts: config.rate_limit_attempts,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);
        let mut waits = 0u32;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(query)
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            let response = request
                .send()
                .await
                .map_err(|e| KbError::upstream(Service::SourceControl, e))?;
            let status = response.status();

            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    anyhow::Error::from(KbError::upstream(
                        Service::SourceControl,
                        format!("invalid response from {}: {}", path, e),
                    ))
                });
            }

            let now = chrono::Utc::now().timestamp();
            if let Some(wait) = rate_limit_wait(status.as_u16(), response.headers(), now) {
                waits += 1;
                if waits > self.rate_limit_attempts {
                    return Err(KbError::RateLimited {
                        attempts: self.rate_limit_attempts,
                    }
                    .into());
                }
                warn!(
                    path,
                    wait_secs = wait.as_secs(),
                    attempt = waits,
                    "rate limit exceeded, waiting for reset"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(KbError::upstream(
                Service::SourceControl,
                format!("GET {} returned {}: {}", path, status, body),
            )
            .into());
        }
    }

    /// All pages of a list endpoint.
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: Vec<T> = self
                .get(
                    path,
                    &[
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            items.extend(batch);
            if done {
                return Ok(items);
            }
            page += 1;
        }
    }

    pub async fn repository(&self, repo: &str) -> Result<RawRepository> {
        let api: ApiRepo = self.get(&format!("/repos/{}", repo), &[]).await?;
        Ok(RawRepository {
            full_name: api.full_name,
            name: api.name,
            description: api.description,
            language: api.language,
            url: api.html_url,
            topics: api.topics,
            pull_requests: Vec::new(),
        })
    }

    /// Closed PRs, most recently updated first; at most `max` are examined.
    async fn closed_pull_requests(&self, repo: &str, max: usize) -> Result<Vec<ApiPull>> {
        let mut pulls = Vec::new();
        let mut page = 1usize;
        while pulls.len() < max {
            let batch: Vec<ApiPull> = self
                .get(
                    &format!("/repos/{}/pulls", repo),
                    &[
                        ("state", "closed".to_string()),
                        ("sort", "updated".to_string()),
                        ("direction", "desc".to_string()),
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            pulls.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        pulls.truncate(max);
        Ok(pulls)
    }

    async fn pull_request_detail(&self, repo: &str, pull: ApiPull) -> Result<RawPullRequest> {
        let comments: Vec<ApiComment> = self
            .get_all(&format!("/repos/{}/issues/{}/comments", repo, pull.number))
            .await?;
        let pull_commits: Vec<ApiPullCommit> = self
            .get_all(&format!("/repos/{}/pulls/{}/commits", repo, pull.number))
            .await?;

        let mut commits = Vec::with_capacity(pull_commits.len());
        for pc in pull_commits {
            let detail: ApiCommit = self
                .get(&format!("/repos/{}/commits/{}", repo, pc.sha), &[])
                .await?;
            let author = pc.commit.author;
            commits.push(RawCommit {
                sha: pc.sha,
                author: author.as_ref().and_then(|a| a.name.clone()),
                email: author.as_ref().and_then(|a| a.email.clone()),
                message: pc.commit.message,
                committed_at: author.as_ref().and_then(|a| a.date.clone()),
                files: detail
                    .files
                    .into_iter()
                    .map(|f| RawFile {
                        filename: f.filename,
                        status: f.status,
                        additions: f.additions,
                        deletions: f.deletions,
                        patch: f.patch,
                    })
                    .collect(),
            });
        }

        Ok(RawPullRequest {
            id: pull.id,
            number: pull.number,
            title: pull.title,
            body: pull.body,
            state: pull.state,
            url: pull.html_url,
            created_at: pull.created_at,
            merged_at: pull.merged_at,
            author: pull.user.map(|u| u.login),
            reviewers: pull
                .requested_reviewers
                .into_iter()
                .map(|u| u.login)
                .collect(),
            comments: comments
                .into_iter()
                .map(|c| RawComment {
                    author: c.user.map(|u| u.login),
                    body: c.body,
                    created_at: c.created_at,
                })
                .collect(),
            commits,
        })
    }

    /// Repository metadata plus its merged pull requests.
    pub async fn extract(&self, repo: &str, max_pull_requests: usize) -> Result<RawRepository> {
        let mut raw = self.repository(repo).await?;
        let pulls = self.closed_pull_requests(repo, max_pull_requests).await?;
        info!(repo, examined = pulls.len(), "closed pull requests listed");

        for pull in pulls {
            if pull.merged_at.is_none() {
                continue;
            }
            let number = pull.number;
            match self.pull_request_detail(repo, pull).await {
                Ok(pr) => {
                    info!(number, commits = pr.commits.len(), "pull request extracted");
                    raw.pull_requests.push(pr);
                }
                Err(e) => {
                    warn!(number, error = %e, "could not fully process pull request, skipping");
                }
            }
        }

        Ok(raw)
    }
}

/// `ekb extract`: write the raw activity document for one repository.
pub async fn run_extract(config: &Config, repo: Option<&str>, output: &Path) -> Result<()> {
    let repo = match repo.or(config.github.repo.as_deref()) {
        Some(r) => r.to_string(),
        None => {
            return Err(KbError::Config(
                "no repository given; pass --repo or set github.repo".to_string(),
            )
            .into())
        }
    };

    let client = GithubClient::new(&config.github)?;
    let raw = client.extract(&repo, config.github.max_pull_requests).await?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pull_requests = raw.pull_requests.len();
    std::fs::write(output, serde_json::to_string_pretty(&vec![raw])?)?;

    println!("extract {}", repo);
    println!("  merged pull requests: {}", pull_requests);
    println!("  written to {}", output.display());
    Ok(())
}
