//! Endpoints, timeouts and pacing, fixed for the whole run

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ANILIST_API_URL: &str = "https://graphql.anilist.co";
pub const JIKAN_API_URL: &str = "https://api.jikan.moe/v4";
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; AnimeSheet/0.1)";

/// Run configuration. Built once in `main` and handed to each client.
///
/// Durations are seconds so the CONL file stays readable:
///
/// ```text
/// primary_cooldown = 60
/// secondary_delay = 1.5
/// checkpoint_every = 5
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub anilist_url: String,
    pub jikan_url: String,
    pub user_agent: String,

    pub primary_timeout: f64,
    pub secondary_timeout: f64,
    /// Pause after a 429 from the primary source
    pub primary_cooldown: f64,
    /// Mandatory pause before every secondary request
    pub secondary_delay: f64,
    /// Pause after a 429 from the secondary source
    pub secondary_rate_limit_pause: f64,

    /// Tags at or below this rank are dropped
    pub tag_min_rank: u32,
    pub max_tags: usize,

    pub checkpoint_every: usize,
    pub title_pause: f64,
    pub long_pause: f64,
    pub long_pause_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anilist_url: ANILIST_API_URL.to_string(),
            jikan_url: JIKAN_API_URL.to_string(),
            user_agent: USER_AGENT.to_string(),
            primary_timeout: 5.0,
            secondary_timeout: 10.0,
            primary_cooldown: 60.0,
            secondary_delay: 1.5,
            secondary_rate_limit_pause: 3.0,
            tag_min_rank: 40,
            max_tags: 5,
            checkpoint_every: 5,
            title_pause: 2.0,
            long_pause: 5.0,
            long_pause_every: 30,
        }
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() {
        Duration::from_secs_f64(value.max(0.0))
    } else {
        Duration::ZERO
    }
}

impl Config {
    /// Load overrides from a CONL file; keys that are absent keep their defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_conl(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_conl(content: &str) -> Result<Self> {
        let config: Config = serde_conl::from_str(content)?;
        Ok(config.validated())
    }

    fn validated(mut self) -> Self {
        if self.checkpoint_every == 0 {
            log::warn!("checkpoint_every must be at least 1, using 1");
            self.checkpoint_every = 1;
        }

        let defaults = Config::default();
        let durations = [
            ("primary_timeout", &mut self.primary_timeout, defaults.primary_timeout),
            ("secondary_timeout", &mut self.secondary_timeout, defaults.secondary_timeout),
            ("primary_cooldown", &mut self.primary_cooldown, defaults.primary_cooldown),
            ("secondary_delay", &mut self.secondary_delay, defaults.secondary_delay),
            (
                "secondary_rate_limit_pause",
                &mut self.secondary_rate_limit_pause,
                defaults.secondary_rate_limit_pause,
            ),
            ("title_pause", &mut self.title_pause, defaults.title_pause),
            ("long_pause", &mut self.long_pause, defaults.long_pause),
        ];
        for (name, value, default) in durations {
            if !value.is_finite() || *value < 0.0 {
                log::warn!("{} must be a finite number of seconds, using {}", name, default);
                *value = default;
            }
        }
        self
    }

    pub fn primary_timeout(&self) -> Duration {
        secs(self.primary_timeout)
    }

    pub fn secondary_timeout(&self) -> Duration {
        secs(self.secondary_timeout)
    }

    pub fn primary_cooldown(&self) -> Duration {
        secs(self.primary_cooldown)
    }

    pub fn secondary_delay(&self) -> Duration {
        secs(self.secondary_delay)
    }

    pub fn secondary_rate_limit_pause(&self) -> Duration {
        secs(self.secondary_rate_limit_pause)
    }

    /// Pause to take after the `processed`-th title of the batch
    pub fn pause_after(&self, processed: usize) -> Duration {
        if self.long_pause_every > 0 && processed % self.long_pause_every == 0 {
            secs(self.long_pause)
        } else {
            secs(self.title_pause)
        }
    }

    /// Same settings with every sleep removed
    #[cfg(test)]
    pub fn without_pauses() -> Self {
        Self {
            primary_cooldown: 0.0,
            secondary_delay: 0.0,
            secondary_rate_limit_pause: 0.0,
            title_pause: 0.0,
            long_pause: 0.0,
            ..Self::default()
        }
    }
}
