//! GitHub REST client
//!
//! Lists files through the Git Trees API and fetches bodies through the
//! Contents API (falling back to the Blobs API for files the Contents API
//! will not inline).

use super::{ContentFetcher, FailedFetch, FetchOutcome, FileFilter, LoadedFile, RemoteLister, RequestPacer};
use crate::config::GitHubConfig;
use crate::error::{Error, Result};
use crate::manifest::FileEntry;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    path: String,
    sha: String,
    size: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// GitHub API client implementing both [`RemoteLister`] and [`ContentFetcher`]
pub struct GitHubClient {
    client: Client,
    api_url: Url,
    token: Option<String>,
    retries: usize,
    pacer: RequestPacer,
}

impl GitHubClient {
    /// Create a client; the token is read from `config.token_env`
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| Error::GitHub(format!("Failed to create HTTP client: {}", e)))?;

        let token = config.token();
        if token.is_none() {
            info!(
                "No GitHub token in ${}; using unauthenticated requests",
                config.token_env
            );
        }

        Ok(Self {
            client,
            api_url: Url::parse(&config.api_url)?,
            token,
            retries: config.retries,
            pacer: RequestPacer::new(config.requests_per_second),
        })
    }

    /// Check the token against `/user`. Returns the login, or `None` without a token.
    pub async fn validate_token(&self) -> Result<Option<String>> {
        if self.token.is_none() {
            return Ok(None);
        }
        let url = self.endpoint(&["user"])?;
        let user: UserResponse = self.send_with_retry(self.get(url), "token check").await?;
        Ok(Some(user.login))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid GitHub API URL: {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            self.pacer.wait().await;
            let req = request
                .try_clone()
                .ok_or_else(|| Error::GitHub("Failed to clone GitHub request".to_string()))?;

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<T>().await?);
                    }
                    let body = response.text().await.unwrap_or_default();
                    let err = Error::GitHub(format!(
                        "HTTP {} for {}: {}",
                        status.as_u16(),
                        what,
                        error_message(&body)
                    ));
                    if !is_retryable(status) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => last_err = Some(Error::GitHub(format!("{}: {}", what, e))),
            }

            if attempt < self.retries {
                debug!("Retrying {} (attempt {})", what, attempt + 2);
                tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| Error::GitHub(format!("{} failed", what))))
    }

    async fn fetch_blob(&self, owner: &str, repo: &str, sha: &str) -> Result<String> {
        let url = self.endpoint(&["repos", owner, repo, "git", "blobs", sha])?;
        let blob: BlobResponse = self.send_with_retry(self.get(url), sha).await?;
        if blob.encoding != "base64" {
            return Err(Error::GitHub(format!(
                "Unsupported blob encoding '{}'",
                blob.encoding
            )));
        }
        decode_base64(&blob.content)
    }
}

fn split_repository(repository: &str) -> Result<(&str, &str)> {
    crate::manifest::validate_repository_name(repository)?;
    repository
        .split_once('/')
        .ok_or_else(|| Error::InvalidRepositoryName(repository.to_string()))
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

fn decode_base64(content: &str) -> Result<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| Error::GitHub(format!("Invalid base64 content: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl RemoteLister for GitHubClient {
    async fn list_files(
        &self,
        repository: &str,
        branch: &str,
        filter: &FileFilter,
    ) -> Result<Vec<FileEntry>> {
        let (owner, repo) = split_repository(repository)?;
        let mut url = self.endpoint(&["repos", owner, repo, "git", "trees", branch])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        debug!("Listing {}@{}", repository, branch);
        let tree: TreeResponse = self
            .send_with_retry(self.get(url), &format!("tree of {}@{}", repository, branch))
            .await?;

        if tree.truncated {
            warn!(
                repository = %repository,
                branch = %branch,
                "GitHub truncated the tree listing; some files may be missing"
            );
        }

        let files: Vec<FileEntry> = tree
            .tree
            .into_iter()
            .filter(|item| item.kind == "blob" && filter.matches(&item.path))
            .map(|item| FileEntry::new(item.path, item.size.unwrap_or(0), item.sha))
            .collect();

        info!(
            "Found {} matching files in {}@{}",
            files.len(),
            repository,
            branch
        );
        Ok(files)
    }
}

#[async_trait]
impl ContentFetcher for GitHubClient {
    async fn fetch_file(&self, repository: &str, branch: &str, path: &str) -> Result<LoadedFile> {
        let (owner, repo) = split_repository(repository)?;
        let mut segments = vec!["repos", owner, repo, "contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.endpoint(&segments)?;
        url.query_pairs_mut().append_pair("ref", branch);

        debug!("Fetching: {}", url);
        let contents: ContentsResponse = self.send_with_retry(self.get(url), path).await?;

        let content = match (contents.encoding.as_deref(), contents.content.as_deref()) {
            (Some("base64"), Some(body)) => decode_base64(body)?,
            // Large files are not inlined
            _ => self.fetch_blob(owner, repo, &contents.sha).await?,
        };

        Ok(LoadedFile {
            entry: FileEntry::new(contents.path, contents.size, contents.sha),
            content,
        })
    }

    async fn fetch_files(
        &self,
        repository: &str,
        branch: &str,
        paths: &[String],
        max_concurrent: usize,
    ) -> FetchOutcome {
        let results: Vec<(String, Result<LoadedFile>)> = stream::iter(paths.iter().cloned())
            .map(|path: String| async move {
                let result = self.fetch_file(repository, branch, &path).await;
                (path, result)
            })
            .buffered(max_concurrent.max(1))
            .collect()
            .await;

        let mut outcome = FetchOutcome::default();
        for (path, result) in results {
            match result {
                Ok(file) => outcome.loaded.push(file),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to fetch file");
                    outcome.failed.push(FailedFetch {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use wiremock::matchers::{header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn client_for(server: &MockServer) -> GitHubClient {
        let config = GitHubConfig {
            api_url: server.uri(),
            token_env: "DOCS_KB_TEST_UNSET_TOKEN".to_string(),
            requests_per_second: 1000,
            retries: 1,
            ..GitHubConfig::default()
        };
        GitHubClient::new(&config).unwrap()
    }

    fn encoded(text: &str) -> String {
        STANDARD.encode(text)
    }

    #[tokio::test]
    async fn test_list_files_filters_blobs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/docs/git/trees/main"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "root",
                "truncated": false,
                "tree": [
                    {"path": "README.md", "type": "blob", "sha": "s1", "size": 12},
                    {"path": "docs", "type": "tree", "sha": "t1"},
                    {"path": "docs/guide.MDX", "type": "blob", "sha": "s2", "size": 40},
                    {"path": "src/main.rs", "type": "blob", "sha": "s3", "size": 99}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let files = client
            .list_files("octo/docs", "main", &FileFilter::default())
            .await
            .unwrap();

        assert_eq!(
            files,
            vec![
                FileEntry::new("README.md", 12, "s1"),
                FileEntry::new("docs/guide.MDX", 40, "s2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_files_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/missing/git/trees/main"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .list_files("octo/missing", "main", &FileFilter::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("Not Found"));
    }

    #[tokio::test]
    async fn test_fetch_file_decodes_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/docs/contents/docs/guide.md"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/docs/contents/docs/guide.md"))
            .and(query_param("ref", "dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "path": "docs/guide.md",
                "name": "guide.md",
                "sha": "abc",
                "size": 7,
                "encoding": "base64",
                "content": format!("{}\n", encoded("# Guide"))
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let file = client
            .fetch_file("octo/docs", "dev", "docs/guide.md")
            .await
            .unwrap();
        assert_eq!(file.content, "# Guide");
        assert_eq!(file.entry, FileEntry::new("docs/guide.md", 7, "abc"));
    }

    #[tokio::test]
    async fn test_fetch_large_file_uses_blob() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/docs/contents/big.md"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "path": "big.md",
                "sha": "bigsha",
                "size": 2_000_000,
                "encoding": "none",
                "content": ""
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/docs/git/blobs/bigsha"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "encoding": "base64",
                "content": encoded("lots of text")
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let file = client.fetch_file("octo/docs", "main", "big.md").await.unwrap();
        assert_eq!(file.content, "lots of text");
        assert_eq!(file.entry.sha, "bigsha");
    }

    #[tokio::test]
    async fn test_fetch_files_keeps_order_and_collects_failures() {
        let server = MockServer::start().await;
        for (name, sha) in [("a.md", "sa"), ("c.md", "sc")] {
            Mock::given(method("GET"))
                .and(path(format!("/repos/octo/docs/contents/{}", name)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "path": name,
                    "sha": sha,
                    "size": 1,
                    "encoding": "base64",
                    "content": encoded(name)
                })))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/repos/octo/docs/contents/b.md"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let paths: Vec<String> = ["a.md", "b.md", "c.md"].iter().map(|s| s.to_string()).collect();
        let outcome = client.fetch_files("octo/docs", "main", &paths, 2).await;

        let loaded: Vec<&str> = outcome.loaded.iter().map(|f| f.entry.path.as_str()).collect();
        assert_eq!(loaded, vec!["a.md", "c.md"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].path, "b.md");
    }

    /// Serves any contents request after a delay and records when it arrived
    struct DelayedContents {
        arrivals: Arc<Mutex<Vec<Instant>>>,
        delay: Duration,
    }

    impl Respond for DelayedContents {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            self.arrivals.lock().unwrap().push(Instant::now());
            let name = request.url.path().rsplit('/').next().unwrap_or_default().to_string();
            ResponseTemplate::new(200)
                .set_delay(self.delay)
                .set_body_json(json!({
                    "path": name,
                    "sha": format!("sha-{}", name),
                    "size": 1,
                    "encoding": "base64",
                    "content": encoded(&name)
                }))
        }
    }

    #[tokio::test]
    async fn test_fetch_files_respects_concurrency_bound() {
        let server = MockServer::start().await;
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let delay = Duration::from_millis(300);
        Mock::given(method("GET"))
            .and(path_regex(r"^/repos/octo/docs/contents/.+$"))
            .respond_with(DelayedContents {
                arrivals: arrivals.clone(),
                delay,
            })
            .mount(&server)
            .await;

        let client = client_for(&server);
        let paths: Vec<String> = (0..6).map(|i| format!("doc{}.md", i)).collect();
        let outcome = client.fetch_files("octo/docs", "main", &paths, 2).await;
        assert_eq!(outcome.loaded.len(), 6);
        assert!(outcome.failed.is_empty());

        // A request arriving less than one delay after another overlapped it
        let arrivals = arrivals.lock().unwrap().clone();
        assert_eq!(arrivals.len(), 6);
        let window = delay * 2 / 3;
        let peak = arrivals
            .iter()
            .map(|t| {
                arrivals
                    .iter()
                    .filter(|other| **other <= *t && t.duration_since(**other) < window)
                    .count()
            })
            .max()
            .unwrap_or_default();
        assert!(peak <= 2, "{} requests in flight at once", peak);
    }

    #[tokio::test]
    async fn test_token_is_sent_and_validated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        assert_eq!(client.validate_token().await.unwrap(), None);

        client.token = Some("secret-token".to_string());
        assert_eq!(
            client.validate_token().await.unwrap().as_deref(),
            Some("octocat")
        );
    }

    #[tokio::test]
    async fn test_invalid_repository_name() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let err = client.fetch_file("nope", "main", "a.md").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRepositoryName(_)));
    }
}
