//! Chart data model shared by the enrichment and ranking crates.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SIZE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+x\d+").expect("size token pattern is valid"));

/// One row of the source chart.
///
/// Deserialized from the chart JSON array (`[{"rank":1,"title":"..","artist":".."}]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartEntry {
    pub rank: u32,
    pub title: String,
    pub artist: String,
}

impl ChartEntry {
    pub fn new(rank: u32, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            rank,
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// Free-text search term for this entry: `"<title> <artist>"`.
    pub fn search_term(&self) -> String {
        format!("{} {}", self.title, self.artist)
    }
}

/// A chart row as presented to consumers. `rank` is its stable identity.
///
/// Title and artist always come from the chart entry; the remaining fields
/// are filled in by enrichment when a lookup succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedItem {
    pub rank: u32,
    pub title: String,
    pub artist: String,
    pub artwork_url: Option<String>,
    pub preview_url: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub collection_name: Option<String>,
}

impl RankedItem {
    /// Un-enriched form of `entry`: rank, title and artist only.
    pub fn fallback(entry: &ChartEntry) -> Self {
        Self {
            rank: entry.rank,
            title: entry.title.clone(),
            artist: entry.artist.clone(),
            artwork_url: None,
            preview_url: None,
            release_date: None,
            collection_name: None,
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.artwork_url.is_some()
            || self.preview_url.is_some()
            || self.release_date.is_some()
            || self.collection_name.is_some()
    }
}

/// One track from the search API, using the API's field names on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    #[serde(default)]
    pub track_name: Option<String>,
    #[serde(default)]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub artwork_url100: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub collection_name: Option<String>,
}

impl TrackMetadata {
    /// Merge this result into the chart row it was looked up for.
    ///
    /// The artwork URL's first `NxN` size token is rewritten to
    /// `artwork_dimension`; `releaseDate` is parsed as RFC 3339 and dropped
    /// when malformed.
    pub fn to_ranked_item(&self, entry: &ChartEntry, artwork_dimension: u32) -> RankedItem {
        let release_date = self
            .release_date
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|date| date.with_timezone(&Utc));

        RankedItem {
            rank: entry.rank,
            title: entry.title.clone(),
            artist: entry.artist.clone(),
            artwork_url: self
                .artwork_url100
                .as_deref()
                .map(|url| upsize_artwork_url(url, artwork_dimension)),
            preview_url: self.preview_url.clone(),
            release_date,
            collection_name: self.collection_name.clone(),
        }
    }
}

/// Search API response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub result_count: u32,
    pub results: Vec<TrackMetadata>,
}

/// Per-row enrichment outcome exposed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrichmentStatus {
    Pending,
    Success,
    Failed,
}

/// Replace the first `NxN` token in `url` with `<dimension>x<dimension>`.
///
/// URLs without a size token are returned unchanged.
pub fn upsize_artwork_url(url: &str, dimension: u32) -> String {
    SIZE_TOKEN
        .replace(url, format!("{0}x{0}", dimension).as_str())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn track() -> TrackMetadata {
        TrackMetadata {
            track_name: Some("Espresso".to_string()),
            artist_name: Some("Sabrina Carpenter".to_string()),
            artwork_url100: Some(
                "https://is1-ssl.mzstatic.com/image/thumb/Music/v4/ab/cd/100x100bb.jpg".to_string(),
            ),
            preview_url: Some("https://audio.example.com/preview.m4a".to_string()),
            release_date: Some("2024-04-11T12:00:00Z".to_string()),
            collection_name: Some("Espresso - Single".to_string()),
        }
    }

    #[test]
    fn test_to_ranked_item_merges_fields() {
        let entry = ChartEntry::new(3, "Espresso", "Sabrina Carpenter");
        let item = track().to_ranked_item(&entry, 600);

        assert_eq!(item.rank, 3);
        assert_eq!(item.title, "Espresso");
        assert_eq!(
            item.artwork_url.as_deref(),
            Some("https://is1-ssl.mzstatic.com/image/thumb/Music/v4/ab/cd/600x600bb.jpg")
        );
        assert_eq!(
            item.release_date,
            Some(Utc.with_ymd_and_hms(2024, 4, 11, 12, 0, 0).unwrap())
        );
        assert_eq!(item.collection_name.as_deref(), Some("Espresso - Single"));
        assert!(item.is_enriched());
    }

    #[test]
    fn test_chart_fields_win_over_search_fields() {
        let entry = ChartEntry::new(1, "Chart Title", "Chart Artist");
        let item = track().to_ranked_item(&entry, 600);

        assert_eq!(item.title, "Chart Title");
        assert_eq!(item.artist, "Chart Artist");
    }

    #[test]
    fn test_malformed_release_date_is_dropped() {
        let mut metadata = track();
        metadata.release_date = Some("April 2024".to_string());

        let item = metadata.to_ranked_item(&ChartEntry::new(1, "a", "b"), 600);
        assert!(item.release_date.is_none());
    }

    #[test]
    fn test_upsize_only_rewrites_first_token() {
        assert_eq!(
            upsize_artwork_url("https://x/60x60/100x100bb.jpg", 1200),
            "https://x/1200x1200/100x100bb.jpg"
        );
        assert_eq!(upsize_artwork_url("https://x/art.jpg", 600), "https://x/art.jpg");
    }

    #[test]
    fn test_fallback_is_not_enriched() {
        let entry = ChartEntry::new(7, "Song", "Singer");
        let item = RankedItem::fallback(&entry);

        assert_eq!(item.rank, 7);
        assert!(!item.is_enriched());
    }

    #[test]
    fn test_search_response_uses_api_field_names() {
        let body = r#"{
            "resultCount": 1,
            "results": [{
                "trackName": "Espresso",
                "artistName": "Sabrina Carpenter",
                "artworkUrl100": "https://x/100x100bb.jpg",
                "previewUrl": "https://x/p.m4a",
                "releaseDate": "2024-04-11T12:00:00Z",
                "collectionName": "Espresso - Single",
                "trackId": 123
            }]
        }"#;

        let response: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.result_count, 1);
        assert_eq!(
            response.results[0].artwork_url100.as_deref(),
            Some("https://x/100x100bb.jpg")
        );

        let reserialized = serde_json::to_string(&response.results[0]).unwrap();
        assert!(reserialized.contains("\"artworkUrl100\""));
        assert!(reserialized.contains("\"trackName\""));
    }
}
