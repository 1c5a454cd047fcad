//! `reqwest` client for the GitHub repository hooks API.
//!
//! Endpoints used:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | repository | `GET /repos/{owner}/{repo}` (reads `permissions.admin`) |
//! | list_hooks | `GET /repos/{owner}/{repo}/hooks?per_page=100`, following `Link: rel="next"` |
//! | create_hook | `POST /repos/{owner}/{repo}/hooks` |
//! | delete_hook | `DELETE /repos/{owner}/{repo}/hooks/{id}` |

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, LINK, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;
use webhooks::{
    CreateHookRequest, HookApi, HookApiError, HookId, RemoteHook, RemoteRepository,
    RepositoryIdentity,
};

/// Base URL of the public GitHub API.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("hooksync/", env!("CARGO_PKG_VERSION"));
const GITHUB_JSON: &str = "application/vnd.github+json";
const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    #[serde(default)]
    permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize)]
struct Permissions {
    #[serde(default)]
    admin: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// Host name repositories served by `api_url` live on.
///
/// `api.github.com` serves `github.com`; a GitHub Enterprise API
/// (`https://ghe.example.com/api/v3`) serves its own host.
pub fn web_host(api_url: &Url) -> Option<String> {
    let host = api_url.host_str()?.to_ascii_lowercase();
    Some(match host.strip_prefix("api.") {
        Some(rest) if rest == "github.com" => rest.to_string(),
        _ => host,
    })
}

/// [`HookApi`] implementation for one GitHub server and credential.
#[derive(Clone)]
pub struct GithubHookClient {
    http: Client,
    api_url: Url,
    token: Option<String>,
}

impl GithubHookClient {
    /// Creates a client for the API at `api_url`, authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`HookApiError::Configuration`] if `api_url` is not an HTTP(S)
    /// URL or the HTTP client cannot be built.
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self, HookApiError> {
        let api_url = Url::parse(api_url).map_err(|err| HookApiError::Configuration {
            message: format!("invalid API URL '{api_url}': {err}"),
        })?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(HookApiError::Configuration {
                message: format!("API URL '{api_url}' must use http or https"),
            });
        }
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| HookApiError::Configuration {
                message: format!("could not build HTTP client: {err}"),
            })?;
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    /// The API base URL.
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn repo_url(&self, repo: &RepositoryIdentity, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_url.as_str().trim_end_matches('/'),
            repo.owner(),
            repo.name(),
            suffix
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, GITHUB_JSON);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<Response, HookApiError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| HookApiError::Transport {
                message: err.to_string(),
            })?;
        check_status(response, resource).await
    }
}

impl fmt::Debug for GithubHookClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubHookClient")
            .field("api_url", &self.api_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

#[async_trait]
impl HookApi for GithubHookClient {
    #[instrument(skip(self), fields(repository = %repo))]
    async fn repository(
        &self,
        repo: &RepositoryIdentity,
    ) -> Result<Option<RemoteRepository>, HookApiError> {
        let url = self.repo_url(repo, "");
        let response = match self.send(self.http.get(&url), &url).await {
            Ok(response) => response,
            Err(HookApiError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let body: RepositoryResponse = decode(response).await?;
        Ok(Some(RemoteRepository {
            identity: repo.clone(),
            admin: body.permissions.is_some_and(|p| p.admin),
        }))
    }

    #[instrument(skip(self), fields(repository = %repo))]
    async fn list_hooks(&self, repo: &RepositoryIdentity) -> Result<Vec<RemoteHook>, HookApiError> {
        let mut hooks = Vec::new();
        let mut next = Some(self.repo_url(repo, &format!("/hooks?per_page={PAGE_SIZE}")));
        while let Some(url) = next.take() {
            let response = self.send(self.http.get(&url), &url).await?;
            next = next_page(response.headers());
            let page: Vec<RemoteHook> = decode(response).await?;
            debug!(count = page.len(), more = next.is_some(), "Fetched hook page");
            hooks.extend(page);
        }
        Ok(hooks)
    }

    #[instrument(skip(self, request), fields(repository = %repo, events = request.events.len()))]
    async fn create_hook(
        &self,
        repo: &RepositoryIdentity,
        request: &CreateHookRequest,
    ) -> Result<RemoteHook, HookApiError> {
        let url = self.repo_url(repo, "/hooks");
        let response = self.send(self.http.post(&url).json(request), &url).await?;
        decode(response).await
    }

    #[instrument(skip(self), fields(repository = %repo))]
    async fn delete_hook(&self, repo: &RepositoryIdentity, id: HookId) -> Result<(), HookApiError> {
        let url = self.repo_url(repo, &format!("/hooks/{id}"));
        self.send(self.http.delete(&url), &url).await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, HookApiError> {
    response.json::<T>().await.map_err(|err| HookApiError::Decode {
        message: err.to_string(),
    })
}

/// Maps a non-success response to the matching [`HookApiError`].
async fn check_status(response: Response, resource: &str) -> Result<Response, HookApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    let body = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::NOT_FOUND => HookApiError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => HookApiError::RateLimited { retry_after },
        StatusCode::FORBIDDEN if exhausted => HookApiError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HookApiError::Unauthorized {
            status: status.as_u16(),
            message: serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| truncate(&body)),
        },
        _ => HookApiError::UnexpectedStatus {
            status: status.as_u16(),
            body: truncate(&body),
        },
    })
}

/// Delay from `Retry-After` (seconds), else from `x-ratelimit-reset` (epoch seconds).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if let Some(secs) = header(RETRY_AFTER.as_str()).and_then(|v| v.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = header("x-ratelimit-reset").and_then(|v| v.trim().parse::<i64>().ok())?;
    let wait = reset - chrono::Utc::now().timestamp();
    Some(Duration::from_secs(u64::try_from(wait).unwrap_or(0)))
}

/// The `rel="next"` target of a `Link` header, if any.
fn next_page(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
