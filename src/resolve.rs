//! Two-tier resolution: AniList first, Jikan as fallback, "Unknown" otherwise

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::anilist::AniListClient;
use crate::config::Config;
use crate::jikan::JikanClient;
use crate::types::{MediaRecord, Resolution, UNKNOWN};

/// Blocking lookups against the metadata sources
pub trait MetadataSource {
    fn lookup_primary(&self, title: &str) -> Option<MediaRecord>;
    fn lookup_secondary(&self, title: &str) -> Option<MediaRecord>;
    fn lookup_staff(&self, id: u64) -> String;
}

/// The real sources over HTTP
pub struct HttpSources {
    anilist: AniListClient,
    jikan: JikanClient,
}

impl HttpSources {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            anilist: AniListClient::new(config)?,
            jikan: JikanClient::new(config)?,
        })
    }
}

impl MetadataSource for HttpSources {
    fn lookup_primary(&self, title: &str) -> Option<MediaRecord> {
        self.anilist.lookup(title)
    }

    fn lookup_secondary(&self, title: &str) -> Option<MediaRecord> {
        self.jikan.lookup(title)
    }

    fn lookup_staff(&self, id: u64) -> String {
        self.jikan.lookup_staff(id)
    }
}

/// Which tier produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
    Unresolved,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "AniList",
            Tier::Secondary => "Jikan",
            Tier::Unresolved => "none",
        }
    }
}

/// Resolve one title. Never fails; every field is a value or "Unknown".
pub fn resolve<S: MetadataSource + ?Sized>(sources: &S, title: &str) -> (Resolution, Tier) {
    let never = AtomicBool::new(false);
    resolve_unless_stopped(sources, title, &never)
        .unwrap_or_else(|| (Resolution::unknown(), Tier::Unresolved))
}

/// Like [`resolve`], but gives up with `None` when `stop` is raised before the
/// secondary tier is tried, so an interrupted title stays pending.
pub fn resolve_unless_stopped<S: MetadataSource + ?Sized>(
    sources: &S,
    title: &str,
    stop: &AtomicBool,
) -> Option<(Resolution, Tier)> {
    if let Some(media) = sources.lookup_primary(title) {
        let studio = studio_of(sources, &media);
        return Some((Resolution::from_media(media, studio), Tier::Primary));
    }

    if stop.load(Ordering::SeqCst) {
        log::debug!("Stopping before the Jikan fallback for '{}'", title);
        return None;
    }

    log::debug!("Falling back to Jikan for '{}'", title);
    if let Some(media) = sources.lookup_secondary(title) {
        let studio = studio_of(sources, &media);
        return Some((Resolution::from_media(media, studio), Tier::Secondary));
    }

    log::info!("No source knows '{}'", title);
    Some((Resolution::unknown(), Tier::Unresolved))
}

fn studio_of<S: MetadataSource + ?Sized>(sources: &S, media: &MediaRecord) -> String {
    match (&media.studio, media.source_id) {
        (Some(studio), _) => studio.clone(),
        (None, Some(id)) => sources.lookup_staff(id),
        (None, None) => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    const TOO_MANY_REQUESTS: &str = "HTTP/1.1 429 Too Many Requests\r\n\
        X-RateLimit-Remaining: 0\r\n\
        Retry-After: 1\r\n\
        Content-Length: 0\r\n\
        Connection: close\r\n\r\n";

    /// Local HTTP server answering every request with a 429.
    ///
    /// Returns its base URL and the number of requests it has seen.
    pub fn rate_limited_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut stream);
                let _ = stream.write_all(TOO_MANY_REQUESTS.as_bytes());
            }
        });
        (url, hits)
    }

    /// Consume the request head and body so the client sees a clean response
    fn read_request(stream: &mut TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut content_length = 0;
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0; content_length];
        let _ = reader.read_exact(&mut body);
    }

    /// Canned responses keyed by title, with call counters
    #[derive(Default)]
    pub struct FakeSources {
        pub primary: HashMap<String, MediaRecord>,
        pub secondary: HashMap<String, MediaRecord>,
        pub staff: HashMap<u64, String>,
        pub primary_calls: Cell<usize>,
        pub secondary_calls: Cell<usize>,
        pub staff_calls: Cell<usize>,
        pub seen: RefCell<Vec<String>>,
        /// Called after every primary lookup
        pub on_lookup: Option<Box<dyn Fn(usize)>>,
    }

    impl MetadataSource for FakeSources {
        fn lookup_primary(&self, title: &str) -> Option<MediaRecord> {
            self.primary_calls.set(self.primary_calls.get() + 1);
            self.seen.borrow_mut().push(title.to_string());
            if let Some(hook) = &self.on_lookup {
                hook(self.primary_calls.get());
            }
            self.primary.get(title).cloned()
        }

        fn lookup_secondary(&self, title: &str) -> Option<MediaRecord> {
            self.secondary_calls.set(self.secondary_calls.get() + 1);
            self.secondary.get(title).cloned()
        }

        fn lookup_staff(&self, id: u64) -> String {
            self.staff_calls.set(self.staff_calls.get() + 1);
            self.staff.get(&id).cloned().unwrap_or_else(|| UNKNOWN.to_string())
        }
    }

    pub fn media(link: &str) -> MediaRecord {
        MediaRecord {
            source_id: None,
            season: "SPRING 2001".to_string(),
            studio: Some("Studio".to_string()),
            genres: "Drama".to_string(),
            tags: "Tag".to_string(),
            link: link.to_string(),
        }
    }

    #[test]
    fn test_primary_hit_skips_secondary() {
        let mut sources = FakeSources::default();
        sources.primary.insert(
            "TestShow".to_string(),
            MediaRecord {
                source_id: None,
                season: "WINTER 2020".to_string(),
                studio: Some("StudioX".to_string()),
                genres: "Comedy".to_string(),
                tags: "SliceOfLife".to_string(),
                link: "http://x".to_string(),
            },
        );
        sources.secondary.insert("TestShow".to_string(), media("http://other"));

        let (resolution, tier) = resolve(&sources, "TestShow");
        assert_eq!(
            resolution.as_tuple(),
            ("WINTER 2020", "StudioX", "Comedy", "SliceOfLife", "http://x")
        );
        assert_eq!(tier, Tier::Primary);
        assert_eq!(sources.secondary_calls.get(), 0);
        assert_eq!(sources.staff_calls.get(), 0);
    }

    #[test]
    fn test_secondary_uses_staff_when_no_studio() {
        let mut sources = FakeSources::default();
        sources.secondary.insert(
            "Obscure".to_string(),
            MediaRecord {
                source_id: Some(42),
                studio: None,
                ..media("https://myanimelist.net/anime/42")
            },
        );
        sources.staff.insert(42, "Jane Doe (Director)".to_string());

        let (resolution, tier) = resolve(&sources, "Obscure");
        assert_eq!(tier, Tier::Secondary);
        assert_eq!(resolution.studio, "Jane Doe (Director)");
        assert_eq!(sources.primary_calls.get(), 1);
        assert_eq!(sources.staff_calls.get(), 1);
    }

    #[test]
    fn test_total_failure_is_all_unknown() {
        let sources = FakeSources::default();
        let (resolution, tier) = resolve(&sources, "Nothing");
        assert_eq!(tier, Tier::Unresolved);
        assert_eq!(resolution, Resolution::unknown());
    }

    #[test]
    fn test_usable_record_with_empty_genres() {
        let mut sources = FakeSources::default();
        sources.primary.insert(
            "Sparse".to_string(),
            MediaRecord {
                genres: String::new(),
                ..media("http://sparse")
            },
        );
        let (resolution, tier) = resolve(&sources, "Sparse");
        assert_eq!(tier, Tier::Primary);
        assert_eq!(resolution.genres, "Unknown");
        assert_eq!(resolution.link, "http://sparse");
        assert_eq!(sources.secondary_calls.get(), 0);
    }

    #[test]
    fn test_unreachable_http_sources_are_all_unknown() {
        let config = Config {
            anilist_url: "http://127.0.0.1:9/".to_string(),
            jikan_url: "http://127.0.0.1:9".to_string(),
            ..Config::without_pauses()
        };
        let sources = HttpSources::new(&config).unwrap();
        let (resolution, tier) = resolve(&sources, "Anything");
        assert_eq!(tier, Tier::Unresolved);
        assert_eq!(resolution, Resolution::unknown());
    }

    #[test]
    fn test_rate_limited_sources_are_all_unknown() {
        let (url, hits) = rate_limited_server();
        let config = Config {
            anilist_url: url.clone(),
            jikan_url: url,
            ..Config::without_pauses()
        };
        let sources = HttpSources::new(&config).unwrap();

        let (resolution, tier) = resolve(&sources, "Busy Show");
        assert_eq!(tier, Tier::Unresolved);
        assert_eq!(resolution, Resolution::unknown());
        // One request per tier, no retries and no staff query
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_skips_secondary_tier() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut sources = FakeSources::default();
        sources.secondary.insert("Late".to_string(), media("http://late"));
        let hook_stop = stop.clone();
        sources.on_lookup = Some(Box::new(move |_| hook_stop.store(true, Ordering::SeqCst)));

        assert_eq!(resolve_unless_stopped(&sources, "Late", &stop), None);
        assert_eq!(sources.primary_calls.get(), 1);
        assert_eq!(sources.secondary_calls.get(), 0);
    }

    #[test]
    fn test_stop_keeps_primary_hit() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut sources = FakeSources::default();
        sources.primary.insert("Quick".to_string(), media("http://quick"));
        let hook_stop = stop.clone();
        sources.on_lookup = Some(Box::new(move |_| hook_stop.store(true, Ordering::SeqCst)));

        let (resolution, tier) = resolve_unless_stopped(&sources, "Quick", &stop).unwrap();
        assert_eq!(tier, Tier::Primary);
        assert_eq!(resolution.link, "http://quick");
    }
}
