//! Playlist parsing
//!
//! Well-formed playlists go through `hls_m3u8`. Playlists it rejects (missing
//! target duration, segments longer than advertised, unknown attribute
//! values) are read again with a line scanner that only looks at the tags
//! needed to find segment and variant URIs.

use std::time::Duration;

use hls_m3u8::{tags::VariantStream as HlsVariantStream, MasterPlaylist, MediaPlaylist};
use url::Url;

use crate::error::ResolutionError;

const EXTM3U: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF:";
const STREAM_INF: &str = "#EXT-X-STREAM-INF";
const BANDWIDTH: &str = "BANDWIDTH=";

/// One entry of a playlist, in document order
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEntry {
    /// Media segment URI, relative to the playlist
    Segment {
        uri: String,
        duration: Option<Duration>,
    },
    /// Nested playlist URI from a master playlist
    Variant { uri: String, bandwidth: Option<u64> },
}

/// Parse playlist text retrieved from `url` into its entries.
///
/// I-frame variants are not listed; they reference byte ranges of the
/// regular renditions.
pub fn parse_manifest(url: &Url, text: &str) -> Result<Vec<ManifestEntry>, ResolutionError> {
    let text = text.trim_start_matches('\u{feff}');
    if !text.trim_start().starts_with(EXTM3U) {
        return Err(ResolutionError::Parse {
            url: url.to_string(),
            reason: "missing #EXTM3U header".to_string(),
        });
    }

    let strict = if is_master(text) {
        parse_master(text)
    } else {
        parse_media(text)
    };

    match strict {
        Ok(entries) => Ok(entries),
        Err(reason) => {
            tracing::debug!(url = %url, %reason, "Strict playlist parse failed, using line scanner");
            Ok(parse_lines(text))
        }
    }
}

fn is_master(text: &str) -> bool {
    text.lines().any(|l| l.trim_start().starts_with(STREAM_INF))
}

fn parse_master(text: &str) -> Result<Vec<ManifestEntry>, String> {
    let master = MasterPlaylist::try_from(text).map_err(|e| e.to_string())?;
    let entries = master
        .variant_streams
        .iter()
        .filter_map(|vs| match vs {
            HlsVariantStream::ExtXStreamInf {
                uri, stream_data, ..
            } => Some(ManifestEntry::Variant {
                uri: uri.to_string(),
                bandwidth: Some(stream_data.bandwidth()),
            }),
            HlsVariantStream::ExtXIFrame { .. } => None,
        })
        .collect();
    Ok(entries)
}

fn parse_media(text: &str) -> Result<Vec<ManifestEntry>, String> {
    let media = MediaPlaylist::try_from(text).map_err(|e| e.to_string())?;
    let entries = media
        .segments
        .values()
        .map(|seg| ManifestEntry::Segment {
            uri: seg.uri().to_string(),
            duration: Some(seg.duration.duration()),
        })
        .collect();
    Ok(entries)
}

/// Pending tag that claims the next URI line
enum Pending {
    None,
    Segment(Option<Duration>),
    Variant(Option<u64>),
}

fn parse_lines(text: &str) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();
    let mut pending = Pending::None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(EXTINF) {
            pending = Pending::Segment(parse_extinf(rest));
            continue;
        }
        if let Some(rest) = line.strip_prefix(STREAM_INF) {
            pending = Pending::Variant(parse_bandwidth(rest));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let uri = line.to_string();
        let entry = match std::mem::replace(&mut pending, Pending::None) {
            Pending::Variant(bandwidth) => ManifestEntry::Variant { uri, bandwidth },
            Pending::Segment(duration) => ManifestEntry::Segment { uri, duration },
            Pending::None => ManifestEntry::Segment {
                uri,
                duration: None,
            },
        };
        entries.push(entry);
    }

    entries
}

fn parse_extinf(rest: &str) -> Option<Duration> {
    let secs = rest.split(',').next()?.trim();
    secs.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn parse_bandwidth(attrs: &str) -> Option<u64> {
    attrs
        .trim_start_matches(':')
        .split(',')
        .find_map(|attr| attr.trim().strip_prefix(BANDWIDTH))
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://cdn.example/vod/index.m3u8").unwrap()
    }

    fn uri_of(entry: &ManifestEntry) -> &str {
        match entry {
            ManifestEntry::Segment { uri, .. } | ManifestEntry::Variant { uri, .. } => uri,
        }
    }

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:9.009,
seg0.ts
#EXTINF:9.009,
seg1.ts
#EXTINF:3.003,
sub/seg2.ts
#EXT-X-ENDLIST
";

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720
high/index.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=86000,URI=\"low/iframe.m3u8\"
";

    #[test]
    fn test_media_playlist() {
        let entries = parse_manifest(&url(), MEDIA).unwrap();
        let uris: Vec<_> = entries.iter().map(uri_of).collect();
        assert_eq!(uris, vec!["seg0.ts", "seg1.ts", "sub/seg2.ts"]);
        match &entries[2] {
            ManifestEntry::Segment { duration, .. } => {
                let secs = duration.unwrap().as_secs_f64();
                assert!((secs - 3.003).abs() < 1e-3, "duration {}", secs);
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_master_playlist_skips_iframe_variants() {
        let entries = parse_manifest(&url(), MASTER).unwrap();
        assert_eq!(
            entries,
            vec![
                ManifestEntry::Variant {
                    uri: "low/index.m3u8".into(),
                    bandwidth: Some(1_280_000)
                },
                ManifestEntry::Variant {
                    uri: "high/index.m3u8".into(),
                    bandwidth: Some(2_560_000)
                },
            ]
        );
    }

    #[test]
    fn test_lenient_fallback_without_target_duration() {
        let text = "#EXTM3U\n#EXTINF:12.5,title\nhttp://other.example/a.ts\nb.ts\n";
        let entries = parse_manifest(&url(), text).unwrap();
        assert_eq!(
            entries,
            vec![
                ManifestEntry::Segment {
                    uri: "http://other.example/a.ts".into(),
                    duration: Some(Duration::from_secs_f64(12.5)),
                },
                ManifestEntry::Segment {
                    uri: "b.ts".into(),
                    duration: None,
                },
            ]
        );
    }

    #[test]
    fn test_master_with_odd_attributes() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=640000,CODECS=\"bogus\"\n\nv1.m3u8\n";
        let entries = parse_manifest(&url(), text).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(&entries[0], ManifestEntry::Variant { uri, .. } if uri == "v1.m3u8"));
    }

    #[test]
    fn test_header_only_has_no_entries() {
        let entries = parse_manifest(&url(), "#EXTM3U\n#EXT-X-ENDLIST\n").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_missing_header_is_parse_error() {
        let err = parse_manifest(&url(), "<html>not found</html>").unwrap_err();
        assert!(matches!(err, ResolutionError::Parse { .. }));
    }

    #[test]
    fn test_bandwidth_attr() {
        assert_eq!(parse_bandwidth(":BANDWIDTH=123,AVERAGE-BANDWIDTH=99"), Some(123));
        assert_eq!(parse_bandwidth(":AVERAGE-BANDWIDTH=99,BANDWIDTH=123"), Some(123));
        assert_eq!(parse_bandwidth(":RESOLUTION=1x1"), None);
    }
}
