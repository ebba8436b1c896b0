//! Primary source: AniList GraphQL search by title

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::season::season_or_fallback;
use crate::types::{MediaRecord, UNKNOWN};

const MEDIA_QUERY: &str = r#"
query ($title: String) {
  Media(search: $title, type: ANIME, format_in: [TV, TV_SHORT, MOVIE, SPECIAL, ONA, OVA]) {
    season
    seasonYear
    startDate { year month }
    siteUrl
    studios { edges { isMain node { name } } }
    staff(perPage: 1, sort: RELEVANCE) { edges { role node { name { full } } } }
    genres
    tags { name rank }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<MediaData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<Media>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Media {
    season: Option<String>,
    season_year: Option<i32>,
    start_date: Option<FuzzyDate>,
    site_url: Option<String>,
    studios: Option<Connection<StudioNode>>,
    staff: Option<Connection<StaffNode>>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct FuzzyDate {
    year: Option<i32>,
    month: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Edge<T> {
    #[serde(default)]
    is_main: bool,
    role: Option<String>,
    node: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StudioNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StaffNode {
    name: Option<StaffName>,
}

#[derive(Debug, Deserialize)]
struct StaffName {
    full: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
    rank: Option<u32>,
}

/// Outcome of one GraphQL round trip
#[derive(Debug)]
enum Fetched {
    Media(Media),
    NotFound,
    RateLimited,
}

pub struct AniListClient {
    client: Client,
    url: String,
    cooldown: Duration,
    tag_min_rank: u32,
    max_tags: usize,
}

impl AniListClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.primary_timeout())
            .build()
            .context("Failed to build AniList HTTP client")?;
        Ok(Self {
            client,
            url: config.anilist_url.clone(),
            cooldown: config.primary_cooldown(),
            tag_min_rank: config.tag_min_rank,
            max_tags: config.max_tags,
        })
    }

    /// Search AniList for `title`.
    ///
    /// Every failure is logged and reported as `None`. A 429 also sleeps for the
    /// configured cool-down before returning; the title is not retried here.
    pub fn lookup(&self, title: &str) -> Option<MediaRecord> {
        match self.fetch_media(title) {
            Ok(Fetched::Media(media)) => Some(media_to_record(media, self.tag_min_rank, self.max_tags)),
            Ok(Fetched::NotFound) => {
                log::debug!("AniList has no entry for '{}'", title);
                None
            }
            Ok(Fetched::RateLimited) => {
                log::warn!(
                    "AniList rate limit hit on '{}', cooling down for {}s",
                    title,
                    self.cooldown.as_secs_f64()
                );
                thread::sleep(self.cooldown);
                None
            }
            Err(e) => {
                log::warn!("AniList lookup failed for '{}': {:#}", title, e);
                None
            }
        }
    }

    fn fetch_media(&self, title: &str) -> Result<Fetched> {
        let body = json!({
            "query": MEDIA_QUERY,
            "variables": { "title": title }
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .context("AniList request failed")?;

        log_rate_limit_headers(response.headers());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Fetched::RateLimited);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(Fetched::NotFound);
        }
        if !status.is_success() {
            return Err(anyhow!("AniList HTTP error (status {})", status));
        }

        let parsed: GraphQlResponse = response
            .json()
            .context("Failed to parse AniList JSON")?;

        match parsed.data.and_then(|d| d.media) {
            Some(media) => Ok(Fetched::Media(media)),
            None => {
                if let Some(errors) = parsed.errors {
                    let msg = errors
                        .into_iter()
                        .map(|e| e.message)
                        .collect::<Vec<_>>()
                        .join("; ");
                    log::debug!("AniList GraphQL errors for '{}': {}", title, msg);
                }
                Ok(Fetched::NotFound)
            }
        }
    }
}

/// Log the rate-limit headers; returns true when the minute's budget is spent
fn log_rate_limit_headers(headers: &HeaderMap) -> bool {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let mut exhausted = false;
    if let Some(remaining) = header("X-RateLimit-Remaining") {
        log::debug!("AniList requests remaining this minute: {}", remaining);
        if remaining.trim() == "0" {
            log::warn!("AniList rate limit budget exhausted");
            exhausted = true;
        }
    }
    if let Some(retry_after) = header("Retry-After") {
        log::info!("AniList asked to retry after {}s", retry_after);
    }
    exhausted
}

/// Studio credit: main studio, then any studio, then the top staff credit
fn pick_studio(media: &Media) -> String {
    let studios: Vec<&Edge<StudioNode>> = media
        .studios
        .as_ref()
        .map(|c| c.edges.iter().filter(|e| e.node.is_some()).collect())
        .unwrap_or_default();

    let studio = studios
        .iter()
        .find(|e| e.is_main)
        .or_else(|| studios.first())
        .and_then(|e| e.node.as_ref())
        .map(|n| n.name.clone());
    if let Some(studio) = studio {
        return studio;
    }

    let staff = media
        .staff
        .as_ref()
        .and_then(|c| c.edges.first())
        .and_then(|e| {
            let name = e.node.as_ref()?.name.as_ref()?.full.clone()?;
            Some(format!("{} ({})", name, e.role.as_deref().unwrap_or(UNKNOWN)))
        });
    staff.unwrap_or_else(|| UNKNOWN.to_string())
}

fn media_to_record(media: Media, tag_min_rank: u32, max_tags: usize) -> MediaRecord {
    let (start_year, start_month) = media
        .start_date
        .as_ref()
        .map_or((None, None), |d| (d.year, d.month));
    let season = season_or_fallback(
        media.season.as_deref(),
        media.season_year,
        start_year,
        start_month,
    );

    let studio = pick_studio(&media);

    let tags = media
        .tags
        .iter()
        .filter(|t| t.rank.unwrap_or(0) > tag_min_rank)
        .take(max_tags)
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    MediaRecord {
        source_id: None,
        season,
        studio: Some(studio),
        genres: media.genres.join(", "),
        tags,
        link: media.site_url.unwrap_or_default(),
    }
}
