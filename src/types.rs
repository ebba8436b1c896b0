//! Title records and resolution results shared by the sources and the sheet store

use serde::Serialize;

/// Sentinel written for any field no source could supply
pub const UNKNOWN: &str = "Unknown";

/// Header of the title column
pub const TITLE_COLUMN: &str = "title";

/// Output columns, in the order they are written after the title
pub const FIELD_COLUMNS: [&str; 5] = ["season", "studio", "genres", "tags", "link"];

/// Returns true when a link cell means "not resolved yet"
pub fn is_unresolved(link: &str) -> bool {
    let link = link.trim();
    link.is_empty() || link == UNKNOWN
}

/// One spreadsheet row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleRecord {
    pub title: String,
    pub season: String,
    pub studio: String,
    pub genres: String,
    pub tags: String,
    pub link: String,
}

impl TitleRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn needs_resolution(&self) -> bool {
        is_unresolved(&self.link)
    }

    /// Field value by output column name
    pub fn field(&self, column: &str) -> Option<&str> {
        match column {
            "season" => Some(&self.season),
            "studio" => Some(&self.studio),
            "genres" => Some(&self.genres),
            "tags" => Some(&self.tags),
            "link" => Some(&self.link),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, column: &str) -> Option<&mut String> {
        match column {
            "season" => Some(&mut self.season),
            "studio" => Some(&mut self.studio),
            "genres" => Some(&mut self.genres),
            "tags" => Some(&mut self.tags),
            "link" => Some(&mut self.link),
            _ => None,
        }
    }

    /// All six cells in column order
    pub fn cells(&self) -> [&str; 6] {
        [
            &self.title,
            &self.season,
            &self.studio,
            &self.genres,
            &self.tags,
            &self.link,
        ]
    }

    pub fn apply(&mut self, resolution: Resolution) {
        self.season = resolution.season;
        self.studio = resolution.studio;
        self.genres = resolution.genres;
        self.tags = resolution.tags;
        self.link = resolution.link;
    }
}

/// Media entry as returned by one source, before sentinel substitution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaRecord {
    /// Source-side id, used for follow-up queries (staff credits)
    pub source_id: Option<u64>,
    pub season: String,
    /// `None` when the source lists no studio and a staff credit should be used instead
    pub studio: Option<String>,
    pub genres: String,
    pub tags: String,
    pub link: String,
}

/// The five derived fields of a title; never empty once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub season: String,
    pub studio: String,
    pub genres: String,
    pub tags: String,
    pub link: String,
}

fn or_unknown(value: String) -> String {
    if value.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

impl Resolution {
    pub fn unknown() -> Self {
        Self {
            season: UNKNOWN.to_string(),
            studio: UNKNOWN.to_string(),
            genres: UNKNOWN.to_string(),
            tags: UNKNOWN.to_string(),
            link: UNKNOWN.to_string(),
        }
    }

    /// Build from a media record, substituting the sentinel for empty fields
    pub fn from_media(media: MediaRecord, studio: String) -> Self {
        Self {
            season: or_unknown(media.season),
            studio: or_unknown(studio),
            genres: or_unknown(media.genres),
            tags: or_unknown(media.tags),
            link: or_unknown(media.link),
        }
    }

    #[cfg(test)]
    pub fn as_tuple(&self) -> (&str, &str, &str, &str, &str) {
        (
            &self.season,
            &self.studio,
            &self.genres,
            &self.tags,
            &self.link,
        )
    }
}
