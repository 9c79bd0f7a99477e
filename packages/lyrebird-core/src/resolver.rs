//! Query resolution: opaque queries → playable [`Track`]s.
//!
//! Dispatches on the shape of the query (a cross-catalog URL, a media-catalog
//! URL, or free text), fans out per-item lookups with explicit timeouts, and
//! never retries internally — retry is exactly-once and lives at the
//! scheduler layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ResolverError;
use crate::extractor::{ExtractedInfo, Extractor, PlaylistEntry};
use crate::track::{duration_from_extractor_secs, Track, TrackSource};

/// Prefix yt-dlp-style extractors treat as "search instead of fetch a URL"
/// ("a `--default-search` flag selects first result by a pseudo-URL").
const SEARCH_PREFIX: &str = "ytsearch1:";

/// Resource kind named in a cross-catalog (tag X) URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossCatalogKind {
    Track,
    Playlist,
    Album,
    Artist,
}

/// A parsed cross-catalog reference: `(X-type, id)`.
#[derive(Debug, Clone)]
pub struct CrossCatalogRef {
    pub kind: CrossCatalogKind,
    pub id: String,
}

/// One result item from a cross-catalog lookup, matched against the media
/// catalog by free-text search.
#[derive(Debug, Clone)]
pub struct CrossCatalogItem {
    pub title: String,
    pub artist: Option<String>,
}

/// The external cross-catalog metadata client (opaque to the core; the
/// credentials and transport are the caller's concern).
#[async_trait]
pub trait CrossCatalogClient: Send + Sync {
    async fn resolve(
        &self,
        reference: &CrossCatalogRef,
        timeout: Duration,
    ) -> Result<Vec<CrossCatalogItem>, ResolverError>;
}

/// Explicit per-call deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ResolverTimeouts {
    pub search: Duration,
    pub playlist_listing: Duration,
    pub prefetch: Duration,
    pub playlist_prefetch_count: usize,
}

enum MediaCatalogRef {
    Video,
    Playlist,
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split("://").nth(1)?;
    rest.split(['/', '?']).next()
}

fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Parses a cross-catalog URL of the shape `https://crosscatalog.example/<kind>/<id>`.
fn parse_cross_catalog_url(query: &str) -> Option<CrossCatalogRef> {
    if host_of(query)? != "crosscatalog.example" {
        return None;
    }
    let path = query.split_once("crosscatalog.example")?.1;
    let mut segments = path.trim_start_matches('/').split(['/', '?']);
    let kind = match segments.next()? {
        "track" => CrossCatalogKind::Track,
        "playlist" => CrossCatalogKind::Playlist,
        "album" => CrossCatalogKind::Album,
        "artist" => CrossCatalogKind::Artist,
        _ => return None,
    };
    let id = segments.next()?.to_string();
    if id.is_empty() {
        return None;
    }
    Some(CrossCatalogRef { kind, id })
}

/// Parses a media-catalog URL (`/watch?v=...` for a single video, `/playlist?list=...`).
fn parse_media_catalog_url(query: &str) -> Option<MediaCatalogRef> {
    if host_of(query)? != "media.example" {
        return None;
    }
    if query.contains("/playlist") && query_param(query, "list").is_some() {
        Some(MediaCatalogRef::Playlist)
    } else if query.contains("/watch") && query_param(query, "v").is_some() {
        Some(MediaCatalogRef::Video)
    } else {
        None
    }
}

fn track_from_info(info: ExtractedInfo, source: TrackSource) -> Track {
    let best_stream_url = crate::extractor::pick_best_audio_format(&info.formats)
        .map(|f| f.url.clone());
    Track {
        id: info.id,
        title: info.title,
        artist: info.uploader,
        thumbnail: info.thumbnail,
        duration: duration_from_extractor_secs(info.duration.unwrap_or(0.0)),
        source,
        canonical_url: info.webpage_url,
        stream_url: best_stream_url,
        local_path: None,
        is_live: info.is_live,
        requested_by: None,
    }
}

fn track_from_playlist_entry(entry: PlaylistEntry, source: TrackSource) -> Track {
    Track {
        id: entry.id,
        title: entry.title,
        artist: None,
        thumbnail: None,
        duration: duration_from_extractor_secs(entry.duration.unwrap_or(0.0)),
        source,
        canonical_url: entry.webpage_url,
        stream_url: None,
        local_path: None,
        is_live: false,
        requested_by: None,
    }
}

/// Maps a query to zero or more [`Track`]s.
pub struct Resolver {
    extractor: Arc<dyn Extractor>,
    cross_catalog: Option<Arc<dyn CrossCatalogClient>>,
    timeouts: ResolverTimeouts,
}

impl Resolver {
    #[must_use]
    pub fn new(
        extractor: Arc<dyn Extractor>,
        cross_catalog: Option<Arc<dyn CrossCatalogClient>>,
        timeouts: ResolverTimeouts,
    ) -> Self {
        Self {
            extractor,
            cross_catalog,
            timeouts,
        }
    }

    /// Dispatches on the query's shape and resolves it to playable tracks.
    /// `requested_by` is left unset; the caller fills it in after return.
    pub async fn resolve(&self, query: &str) -> Result<Vec<Track>, ResolverError> {
        let tracks = if let Some(reference) = parse_cross_catalog_url(query) {
            self.resolve_cross_catalog(&reference).await?
        } else if let Some(media_ref) = parse_media_catalog_url(query) {
            match media_ref {
                MediaCatalogRef::Playlist => self.resolve_playlist(query).await?,
                MediaCatalogRef::Video => vec![self.resolve_single(query).await?],
            }
        } else {
            vec![self.resolve_single_search(query).await?]
        };

        if tracks.is_empty() {
            return Err(ResolverError::NoResults);
        }
        Ok(tracks)
    }

    async fn resolve_cross_catalog(
        &self,
        reference: &CrossCatalogRef,
    ) -> Result<Vec<Track>, ResolverError> {
        let client = self
            .cross_catalog
            .as_ref()
            .ok_or(ResolverError::NoResults)?;
        let items = client
            .resolve(reference, self.timeouts.playlist_listing)
            .await?;

        let mut tracks = Vec::with_capacity(items.len());
        for item in items {
            let search_query = match &item.artist {
                Some(artist) => format!("{SEARCH_PREFIX}{artist} {}", item.title),
                None => format!("{SEARCH_PREFIX}{}", item.title),
            };
            // A cross-catalog item with no media-catalog match is skipped,
            // not fatal.
            if let Ok(info) = self
                .extractor
                .info(&search_query, self.timeouts.search)
                .await
            {
                tracks.push(track_from_info(info, TrackSource::PlatformA));
            }
        }
        Ok(tracks)
    }

    async fn resolve_single(&self, url: &str) -> Result<Track, ResolverError> {
        let info = self.extractor.info(url, self.timeouts.search).await?;
        Ok(track_from_info(info, TrackSource::PlatformB))
    }

    async fn resolve_single_search(&self, query: &str) -> Result<Track, ResolverError> {
        let search_query = format!("{SEARCH_PREFIX}{query}");
        let info = self
            .extractor
            .info(&search_query, self.timeouts.search)
            .await?;
        Ok(track_from_info(info, TrackSource::PlatformB))
    }

    async fn resolve_playlist(&self, url: &str) -> Result<Vec<Track>, ResolverError> {
        let entries = self
            .extractor
            .flat_playlist(url, self.timeouts.playlist_listing)
            .await?;
        let mut tracks: Vec<Track> = entries
            .into_iter()
            .map(|entry| track_from_playlist_entry(entry, TrackSource::PlatformB))
            .collect();

        self.prefetch_leading_stream_urls(&mut tracks).await;
        Ok(tracks)
    }

    /// Best-effort, opportunistic prefetch of the first N tracks' direct
    /// stream URLs, run in parallel with a short per-item timeout. Absence
    /// never blocks playback — the Encoder fetches on demand.
    async fn prefetch_leading_stream_urls(&self, tracks: &mut [Track]) {
        let n = self.timeouts.playlist_prefetch_count.min(tracks.len());
        let mut handles = Vec::with_capacity(n);
        for track in &tracks[..n] {
            let extractor = Arc::clone(&self.extractor);
            let url = track.canonical_url.clone();
            let timeout = self.timeouts.prefetch;
            handles.push(tokio::spawn(async move {
                extractor.best_audio_url(&url, timeout).await.ok()
            }));
        }
        for (track, handle) in tracks[..n].iter_mut().zip(handles) {
            if let Ok(Some(stream_url)) = handle.await {
                track.stream_url = Some(stream_url);
            }
        }
    }
}
