//! Catalog search and episode listing against the site's JSON API.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::clear_challenge;
use crate::browser::BrowserPool;
use crate::config::Settings;
use crate::error::{PaheError, Result};
use crate::http_client::HttpClient;
use crate::random;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    /// Opaque anime session id used by the listing API.
    pub session: String,
}

/// Search hits in API order, titles unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults(Vec<SearchResult>);

impl SearchResults {
    pub fn new(results: Vec<SearchResult>) -> Self {
        let mut unique: Vec<SearchResult> = Vec::with_capacity(results.len());
        for result in results {
            if !unique.iter().any(|r| r.title == result.title) {
                unique.push(result);
            }
        }
        Self(unique)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchResult> {
        self.0.iter()
    }

    pub fn session_for(&self, title: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|r| r.title == title)
            .map(|r| r.session.as_str())
    }

    /// Case-insensitive exact title match, else the first hit.
    pub fn select(&self, query: &str) -> Option<&SearchResult> {
        let wanted = query.trim().to_lowercase();
        self.0
            .iter()
            .find(|r| r.title.to_lowercase() == wanted)
            .or_else(|| self.0.first())
    }

    /// `{title: session}` object, as printed by `--search-only`.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .0
            .iter()
            .map(|r| (r.title.clone(), serde_json::Value::String(r.session.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// An episode of one anime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRef {
    pub number: u32,
    /// Episode page carrying the download menu.
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    title: String,
    session: String,
}

#[derive(Debug, Deserialize)]
struct ReleasePage {
    #[serde(default)]
    data: Vec<ReleaseItem>,
    #[serde(default = "default_last_page")]
    last_page: u32,
}

fn default_last_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ReleaseItem {
    episode: serde_json::Value,
    session: String,
}

/// Episode numbers arrive as numbers or strings and may be fractional
/// ("13.5"); fractions are truncated.
fn episode_number(raw: &serde_json::Value) -> Option<u32> {
    let value = match raw {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return None;
    }
    Some(value.trunc() as u32)
}

/// Client for the search and release APIs.
///
/// A challenge on an API call is cleared once through a pooled browser,
/// after which the call is retried.
#[derive(Clone)]
pub struct Catalog {
    client: HttpClient,
    settings: Arc<Settings>,
    pool: Option<Arc<BrowserPool>>,
}

impl Catalog {
    pub fn new(client: HttpClient, settings: Arc<Settings>) -> Self {
        Self {
            client,
            settings,
            pool: None,
        }
    }

    /// Clear anti-bot challenges through browsers from `pool`.
    pub fn with_browser_pool(mut self, pool: Arc<BrowserPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }

    pub fn play_url(&self, anime_session: &str, episode_session: &str) -> String {
        format!("{}/play/{}/{}", self.base_url(), anime_session, episode_session)
    }

    pub async fn search(&self, query: &str) -> Result<SearchResults> {
        info!("Searching for: {}", query);
        let url = format!(
            "{}/api?m=search&q={}",
            self.base_url(),
            urlencoding::encode(query)
        );
        let response: SearchResponse = self.fetch_json(&url).await?;
        let results = SearchResults::new(
            response
                .data
                .into_iter()
                .map(|item| SearchResult {
                    title: item.title,
                    session: item.session,
                })
                .collect(),
        );
        info!("Found {} results", results.len());
        Ok(results)
    }

    /// All episodes numbered within `[start, end]`, ordered by number.
    ///
    /// Pages are fetched strictly in sequence until `last_page`. A failure
    /// on the first page is an error; a later failure ends the listing with
    /// what was collected so far.
    pub async fn fetch_episodes(
        &self,
        anime_session: &str,
        start: u32,
        end: Option<u32>,
    ) -> Result<BTreeMap<u32, EpisodeRef>> {
        match end {
            Some(end) => info!("Fetching episodes {}-{}", start, end),
            None => info!("Fetching episodes {}-end", start),
        }
        let end = end.unwrap_or(u32::MAX);
        let mut episodes = BTreeMap::new();
        let mut page = 1u32;

        loop {
            let url = format!(
                "{}/api?m=release&id={}&sort=episode_asc&page={}",
                self.base_url(),
                anime_session,
                page
            );
            let listing: ReleasePage = match self.fetch_json(&url).await {
                Ok(listing) => listing,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    warn!("Episode listing stopped at page {}: {}", page, e);
                    break;
                }
            };

            for item in &listing.data {
                let Some(number) = episode_number(&item.episode) else {
                    debug!("Skipping episode with unusable number {}", item.episode);
                    continue;
                };
                if number < start || number > end {
                    continue;
                }
                episodes.entry(number).or_insert_with(|| EpisodeRef {
                    number,
                    url: self.play_url(anime_session, &item.session),
                });
            }

            if page >= listing.last_page {
                break;
            }
            page += 1;
            tokio::time::sleep(random::jitter(
                self.settings.pagination_delay_min_secs,
                self.settings.pagination_delay_max_secs,
            ))
            .await;
        }

        info!("Found {} episodes", episodes.len());
        Ok(episodes)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        match self.client.get_json(url).await {
            Err(err @ PaheError::ProtectionChallenge { .. }) => {
                let Some(pool) = &self.pool else {
                    return Err(err);
                };
                warn!("{}; clearing it in a browser", err);
                clear_challenge(pool, &self.client, url, self.settings.element_wait()).await?;
                self.client.get_json(url).await
            }
            other => other,
        }
    }
}
