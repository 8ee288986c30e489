//! Cookie-bearing HTTP client with throttling, retries and challenge detection.
//!
//! Every request first takes a token from the shared [`Throttler`]. Retryable
//! statuses and transport errors are retried with exponential backoff. Text
//! bodies are checked for anti-bot markers, and a hit comes back as
//! [`PaheError::ProtectionChallenge`] so the caller can escalate to a browser.

mod challenge;
mod response;
mod retry;
mod user_agent;

pub use challenge::find_challenge_marker;
pub use response::{is_file_response, parse_content_disposition_filename, HttpResponse};
pub use retry::{parse_retry_after, AttemptOutcome, RetryDecision, RetryPolicy};
pub use user_agent::{random_user_agent, DEFAULT_USER_AGENTS};

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{PaheError, Result};
use crate::rate_limit::Throttler;

/// HTTP client shared by the resolver and the download engine.
///
/// Clones share the cookie jar, connection pools and throttler. Use
/// [`HttpClient::fork`] for an independent cookie jar.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    stream_client: Client,
    jar: Arc<Jar>,
    throttler: Throttler,
    retry: RetryPolicy,
    challenge_markers: Arc<Vec<String>>,
    user_agent: String,
    options: ClientOptions,
}

#[derive(Debug, Clone)]
struct ClientOptions {
    connect_timeout: Duration,
    read_timeout: Duration,
    stream_read_timeout: Duration,
    referer: Option<String>,
    pool_size: usize,
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    throttler: Throttler,
    retry: RetryPolicy,
    challenge_markers: Vec<String>,
    user_agent: Option<String>,
    jar: Option<Arc<Jar>>,
    options: ClientOptions,
}

impl HttpClientBuilder {
    pub fn new(throttler: Throttler) -> Self {
        Self {
            throttler,
            retry: RetryPolicy::default(),
            challenge_markers: Vec::new(),
            user_agent: None,
            jar: None,
            options: ClientOptions {
                connect_timeout: Duration::from_secs(10),
                read_timeout: Duration::from_secs(30),
                stream_read_timeout: Duration::from_secs(300),
                referer: None,
                pool_size: 20,
            },
        }
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn challenge_markers(mut self, markers: Vec<String>) -> Self {
        self.challenge_markers = markers;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn timeouts(mut self, connect: Duration, read: Duration, stream_read: Duration) -> Self {
        self.options.connect_timeout = connect;
        self.options.read_timeout = read;
        self.options.stream_read_timeout = stream_read;
        self
    }

    /// Default `Referer` sent with page requests.
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.options.referer = Some(referer.into());
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.options.pool_size = pool_size;
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| random_user_agent(&[]));
        let jar = self.jar.unwrap_or_default();

        let client = build_reqwest_client(
            &jar,
            &user_agent,
            &self.options,
            self.options.read_timeout,
        )?;
        let stream_client = build_reqwest_client(
            &jar,
            &user_agent,
            &self.options,
            self.options.stream_read_timeout,
        )?;

        Ok(HttpClient {
            client,
            stream_client,
            jar,
            throttler: self.throttler,
            retry: self.retry,
            challenge_markers: Arc::new(self.challenge_markers),
            user_agent,
            options: self.options,
        })
    }
}

/// Permissive TLS: the file host rotates certificates that do not always
/// validate. rustls only offers ECDHE AEAD suites, which matches what the
/// target sites negotiate.
fn build_reqwest_client(
    jar: &Arc<Jar>,
    user_agent: &str,
    options: &ClientOptions,
    read_timeout: Duration,
) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        reqwest::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(reqwest::header::PRAGMA, HeaderValue::from_static("no-cache"));
    if let Some(referer) = options
        .referer
        .as_deref()
        .and_then(|r| HeaderValue::from_str(r).ok())
    {
        headers.insert(reqwest::header::REFERER, referer);
    }

    Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .cookie_provider(jar.clone())
        .user_agent(user_agent)
        .default_headers(headers)
        .connect_timeout(options.connect_timeout)
        .read_timeout(read_timeout)
        .pool_max_idle_per_host(options.pool_size)
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| PaheError::Config(format!("failed to build HTTP client: {e}")))
}

impl HttpClient {
    pub fn builder(throttler: Throttler) -> HttpClientBuilder {
        HttpClientBuilder::new(throttler)
    }

    /// Client configured from settings, with a random identity.
    pub fn from_settings(settings: &Settings, throttler: Throttler) -> Result<Self> {
        Self::builder(throttler)
            .retry_policy(settings.retry_policy())
            .challenge_markers(settings.challenge_markers.clone())
            .user_agent(random_user_agent(&settings.user_agents))
            .timeouts(
                settings.connect_timeout(),
                settings.read_timeout(),
                settings.download_read_timeout(),
            )
            .referer(settings.base_url.clone())
            .pool_size(settings.workers.max(1) * 4)
            .build()
    }

    /// A client with its own cookie jar, seeded with the cookies this client
    /// would send to each of `seed_urls`. Throttler and identity are shared.
    pub fn fork(&self, seed_urls: &[&str]) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        for seed in seed_urls {
            let Ok(url) = Url::parse(seed) else {
                continue;
            };
            if let Some(header) = self.cookie_header(url.as_str()) {
                for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                    jar.add_cookie_str(pair, &url);
                }
            }
        }

        let client = build_reqwest_client(
            &jar,
            &self.user_agent,
            &self.options,
            self.options.read_timeout,
        )?;
        let stream_client = build_reqwest_client(
            &jar,
            &self.user_agent,
            &self.options,
            self.options.stream_read_timeout,
        )?;

        Ok(Self {
            client,
            stream_client,
            jar,
            throttler: self.throttler.clone(),
            retry: self.retry.clone(),
            challenge_markers: self.challenge_markers.clone(),
            user_agent: self.user_agent.clone(),
            options: self.options.clone(),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn throttler(&self) -> &Throttler {
        &self.throttler
    }

    /// Install one cookie into the jar.
    ///
    /// A cookie with the same name, domain and path replaces the old value.
    pub fn set_cookie(&self, name: &str, value: &str, domain: &str, path: &str, secure: bool) {
        let host = domain.trim_start_matches('.');
        if host.is_empty() || name.is_empty() {
            return;
        }
        let scheme = if secure { "https" } else { "http" };
        let path = if path.is_empty() { "/" } else { path };
        let Ok(url) = Url::parse(&format!("{scheme}://{host}{path}")) else {
            debug!("Skipping cookie {} with unusable domain {}", name, domain);
            return;
        };

        let mut cookie = format!("{name}={value}; Domain={domain}; Path={path}");
        if secure {
            cookie.push_str("; Secure");
        }
        self.jar.add_cookie_str(&cookie, &url);
    }

    /// `Cookie` header value this client would send to `url`.
    pub fn cookie_header(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        self.jar
            .cookies(&url)
            .and_then(|h| h.to_str().ok().map(|s| s.to_string()))
    }

    /// Check a text body for anti-bot markers.
    pub fn detect_challenge(&self, url: &str, body: &str) -> Result<()> {
        match find_challenge_marker(body, &self.challenge_markers) {
            Some(marker) => Err(PaheError::ProtectionChallenge {
                url: url.to_string(),
                marker: marker.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// GET with retries. Non-retryable error statuses are returned as-is.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.send_with_retry(url, &self.retry, || self.client.get(url))
            .await
    }

    /// GET a page or API body as text.
    ///
    /// Challenge markers win over the status code, since challenge pages
    /// usually arrive as 403 or 503.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        let status = response.status;
        let body = response.text().await?;
        self.detect_challenge(url, &body)?;
        if !status.is_success() {
            return Err(PaheError::network(url, format!("HTTP {status}")));
        }
        Ok(body)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| PaheError::Parse(format!("invalid JSON from {url}: {e}")))
    }

    /// Streaming GET for media, using the long read timeout.
    pub async fn get_stream(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse> {
        let headers = to_header_map(headers);
        self.send_with_retry(url, &self.retry, || {
            self.stream_client.get(url).headers(headers.clone())
        })
        .await
    }

    /// Form POST whose response may be a media stream.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(&str, String)],
    ) -> Result<HttpResponse> {
        let headers = to_header_map(headers);
        self.send_with_retry(url, &self.retry, || {
            self.stream_client
                .post(url)
                .headers(headers.clone())
                .form(form)
        })
        .await
    }

    async fn send_with_retry<F>(
        &self,
        url: &str,
        policy: &RetryPolicy,
        build: F,
    ) -> Result<HttpResponse>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry = 0u32;
        loop {
            self.throttler.acquire().await;

            let (outcome, response, failure) = match build().send().await {
                Ok(response) => (
                    AttemptOutcome::Status(response.status().as_u16()),
                    Some(response),
                    None,
                ),
                Err(e) => (AttemptOutcome::Transport, None, Some(e)),
            };

            let retry_after = response.as_ref().and_then(|r| {
                parse_retry_after(
                    r.headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                )
            });

            match policy.decide(retry, outcome, retry_after) {
                RetryDecision::Done => match response {
                    Some(response) => return Ok(HttpResponse::new(response)),
                    None => {
                        return Err(failure
                            .map(PaheError::from)
                            .unwrap_or_else(|| PaheError::network(url, "no response")))
                    }
                },
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "Request to {} failed ({}), retry {}/{} in {:?}",
                        url,
                        describe(outcome, failure.as_ref()),
                        retry + 1,
                        policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                RetryDecision::GiveUp => {
                    return Err(PaheError::network(
                        url,
                        format!(
                            "{} after {} attempts",
                            describe(outcome, failure.as_ref()),
                            retry + 1
                        ),
                    ));
                }
            }
        }
    }
}

fn describe(outcome: AttemptOutcome, failure: Option<&reqwest::Error>) -> String {
    match (outcome, failure) {
        (AttemptOutcome::Status(status), _) => format!("HTTP {status}"),
        (AttemptOutcome::Transport, Some(e)) => e.to_string(),
        (AttemptOutcome::Transport, None) => "transport error".to_string(),
    }
}

fn to_header_map(headers: &[(&str, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => debug!("Dropping invalid header {}", name),
        }
    }
    map
}
