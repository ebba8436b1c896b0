//! Secondary source: Jikan (MyAnimeList) REST search and staff credits

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::season::{season_or_fallback, year_month_of};
use crate::types::{MediaRecord, UNKNOWN};

/// Roles preferred when crediting a person in place of a studio
const PREFERRED_ROLES: &[&str] = &["Director", "Original Creator"];

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct Anime {
    mal_id: Option<u64>,
    url: Option<String>,
    season: Option<String>,
    year: Option<i32>,
    aired: Option<Aired>,
    #[serde(default)]
    studios: Vec<Named>,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    themes: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct Aired {
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StaffEntry {
    person: Option<Named>,
    #[serde(default)]
    positions: Vec<String>,
}

#[derive(Debug)]
enum Fetched<T> {
    Body(T),
    RateLimited,
}

pub struct JikanClient {
    client: Client,
    base_url: String,
    delay: Duration,
    rate_limit_pause: Duration,
    max_tags: usize,
}

impl JikanClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.secondary_timeout())
            .build()
            .context("Failed to build Jikan HTTP client")?;
        Ok(Self {
            client,
            base_url: config.jikan_url.trim_end_matches('/').to_string(),
            delay: config.secondary_delay(),
            rate_limit_pause: config.secondary_rate_limit_pause(),
            max_tags: config.max_tags,
        })
    }

    /// Search by title and map the best-ranked hit.
    ///
    /// `studio` is left as `None` when the entry lists no studio; callers fill it
    /// from [`JikanClient::lookup_staff`] with the returned `source_id`.
    pub fn lookup(&self, title: &str) -> Option<MediaRecord> {
        let url = format!("{}/anime", self.base_url);
        let query = [("q", title), ("limit", "1")];

        match self.get_json::<ListResponse<Anime>>(&url, &query) {
            Ok(Fetched::Body(list)) => match list.data.into_iter().next() {
                Some(anime) => Some(anime_to_record(anime, self.max_tags)),
                None => {
                    log::debug!("Jikan has no entry for '{}'", title);
                    None
                }
            },
            Ok(Fetched::RateLimited) => {
                self.back_off("search", title);
                None
            }
            Err(e) => {
                log::warn!("Jikan lookup failed for '{}': {:#}", title, e);
                None
            }
        }
    }

    /// "{name} ({role})" for the most relevant credited person, or "Unknown"
    pub fn lookup_staff(&self, mal_id: u64) -> String {
        let url = format!("{}/anime/{}/staff", self.base_url, mal_id);

        match self.get_json::<ListResponse<StaffEntry>>(&url, &[]) {
            Ok(Fetched::Body(list)) => pick_staff(&list.data),
            Ok(Fetched::RateLimited) => {
                self.back_off("staff", &mal_id.to_string());
                UNKNOWN.to_string()
            }
            Err(e) => {
                log::warn!("Jikan staff lookup failed for id {}: {:#}", mal_id, e);
                UNKNOWN.to_string()
            }
        }
    }

    fn back_off(&self, what: &str, key: &str) {
        log::warn!(
            "Jikan rate limit hit on {} '{}', pausing {}s",
            what,
            key,
            self.rate_limit_pause.as_secs_f64()
        );
        thread::sleep(self.rate_limit_pause);
    }

    /// GET with the mandatory pre-call delay
    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<Fetched<T>> {
        thread::sleep(self.delay);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .with_context(|| format!("Failed to fetch: {}", url))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Fetched::RateLimited);
        }
        if !status.is_success() {
            return Err(anyhow!("Jikan HTTP error (status {}) for {}", status, url));
        }

        let body = response
            .json()
            .with_context(|| format!("Failed to parse JSON: {}", url))?;
        Ok(Fetched::Body(body))
    }
}

fn join_names(names: &[Named], limit: usize) -> String {
    names
        .iter()
        .take(limit)
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn anime_to_record(anime: Anime, max_tags: usize) -> MediaRecord {
    let (start_year, start_month) = anime
        .aired
        .as_ref()
        .and_then(|a| a.from.as_deref())
        .map_or((None, None), year_month_of);
    let season = season_or_fallback(anime.season.as_deref(), anime.year, start_year, start_month);

    MediaRecord {
        source_id: anime.mal_id,
        season,
        studio: anime.studios.first().map(|s| s.name.clone()),
        genres: join_names(&anime.genres, usize::MAX),
        tags: join_names(&anime.themes, max_tags),
        link: anime.url.unwrap_or_default(),
    }
}

fn pick_staff(staff: &[StaffEntry]) -> String {
    let credited: Vec<(&str, &[String])> = staff
        .iter()
        .filter_map(|s| Some((s.person.as_ref()?.name.as_str(), s.positions.as_slice())))
        .collect();

    let preferred = credited.iter().find_map(|(name, positions)| {
        positions
            .iter()
            .find(|p| PREFERRED_ROLES.contains(&p.as_str()))
            .map(|role| (*name, role.as_str()))
    });

    let chosen = preferred.or_else(|| {
        credited
            .first()
            .map(|(name, positions)| (*name, positions.first().map_or(UNKNOWN, String::as_str)))
    });

    match chosen {
        Some((name, role)) => format!("{} ({})", name, role),
        None => UNKNOWN.to_string(),
    }
}
