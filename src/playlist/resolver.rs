//! Manifest URL -> ordered list of media playlists

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use url::Url;

use super::parser::{parse_manifest, ManifestEntry};
use super::{Manifest, SegmentRef};
use crate::error::ResolutionError;
use crate::net::HttpFetch;

/// Deepest chain of master -> variant references that is followed
pub const MAX_VARIANT_DEPTH: usize = 4;

pub struct ManifestResolver {
    http: Arc<dyn HttpFetch>,
}

impl ManifestResolver {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }

    /// Fetch `url` and flatten it into media playlists.
    ///
    /// A media playlist yields one `Manifest`. A master playlist yields the
    /// manifests of every variant, in listing order. Segment URIs are joined
    /// against the URL of the document that lists them.
    ///
    /// Returns `ResolutionError::Empty` when nothing downloadable was found.
    pub async fn resolve(&self, url: &Url) -> Result<Vec<Manifest>, ResolutionError> {
        self.resolve_at(url.clone(), 0).await
    }

    fn resolve_at(&self, url: Url, depth: usize) -> BoxFuture<'_, Result<Vec<Manifest>, ResolutionError>> {
        async move {
            let text = self
                .http
                .get_text(&url)
                .await
                .map_err(|source| ResolutionError::Fetch {
                    url: url.to_string(),
                    source,
                })?;

            let entries = parse_manifest(&url, &text)?;
            if entries.is_empty() {
                return Err(ResolutionError::Empty {
                    url: url.to_string(),
                });
            }

            let mut manifests = Vec::new();
            let mut segments = Vec::new();

            for entry in entries {
                match entry {
                    ManifestEntry::Segment { uri, duration } => {
                        let resolved = join(&url, &uri)?;
                        segments.push(SegmentRef {
                            index: segments.len(),
                            uri,
                            url: resolved,
                            duration,
                        });
                    }
                    ManifestEntry::Variant { uri, bandwidth } => {
                        if depth >= MAX_VARIANT_DEPTH {
                            return Err(ResolutionError::TooDeep {
                                url: url.to_string(),
                                max_depth: MAX_VARIANT_DEPTH,
                            });
                        }
                        let variant_url = join(&url, &uri)?;
                        tracing::debug!(master = %url, variant = %variant_url, ?bandwidth, "Resolving variant");

                        match self.resolve_at(variant_url, depth + 1).await {
                            Ok(found) => manifests.extend(found),
                            Err(e) if e.is_empty() => {
                                tracing::warn!(master = %url, error = %e, "Skipping empty variant");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            if !segments.is_empty() {
                tracing::debug!(url = %url, segments = segments.len(), "Parsed media playlist");
                manifests.insert(0, Manifest { url: url.clone(), segments });
            }

            if manifests.is_empty() {
                return Err(ResolutionError::Empty {
                    url: url.to_string(),
                });
            }
            Ok(manifests)
        }
        .boxed()
    }
}

fn join(base: &Url, uri: &str) -> Result<Url, ResolutionError> {
    base.join(uri).map_err(|e| ResolutionError::InvalidUri {
        url: base.to_string(),
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::fixtures::{media_playlist, FakeHttp};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_media_playlist_relative_uris() {
        let http = Arc::new(FakeHttp::new());
        http.serve(
            "http://cdn.example/vod/rec/index.m3u8",
            media_playlist(&["a.ts", "../shared/b.ts", "/root.ts", "http://other.example/c.ts"]),
        );
        let resolver = ManifestResolver::new(http.clone());

        let manifests = resolver
            .resolve(&url("http://cdn.example/vod/rec/index.m3u8"))
            .await
            .unwrap();

        assert_eq!(manifests.len(), 1);
        let urls: Vec<_> = manifests[0].segments.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://cdn.example/vod/rec/a.ts",
                "http://cdn.example/vod/shared/b.ts",
                "http://cdn.example/root.ts",
                "http://other.example/c.ts",
            ]
        );
        let indexes: Vec<_> = manifests[0].segments.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_master_pulls_every_variant_resolved_against_variant_url() {
        let http = Arc::new(FakeHttp::new());
        http.serve(
            "http://cdn.example/master.m3u8",
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=800000\n\
             low/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1600000\n\
             http://mirror.example/high/index.m3u8\n",
        );
        http.serve("http://cdn.example/low/index.m3u8", media_playlist(&["s0.ts", "s1.ts"]));
        http.serve("http://mirror.example/high/index.m3u8", media_playlist(&["h0.ts"]));
        let resolver = ManifestResolver::new(http.clone());

        let manifests = resolver
            .resolve(&url("http://cdn.example/master.m3u8"))
            .await
            .unwrap();

        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].url.as_str(), "http://cdn.example/low/index.m3u8");
        assert_eq!(manifests[0].segments[1].url.as_str(), "http://cdn.example/low/s1.ts");
        assert_eq!(manifests[1].segments[0].url.as_str(), "http://mirror.example/high/h0.ts");
    }

    #[tokio::test]
    async fn test_empty_variant_skipped_unless_all_empty() {
        let http = Arc::new(FakeHttp::new());
        http.serve(
            "http://cdn.example/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\na.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2\nb.m3u8\n",
        );
        http.serve("http://cdn.example/a.m3u8", media_playlist(&[]));
        http.serve("http://cdn.example/b.m3u8", media_playlist(&["b0.ts"]));
        let resolver = ManifestResolver::new(http.clone());

        let manifests = resolver
            .resolve(&url("http://cdn.example/master.m3u8"))
            .await
            .unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].url.as_str(), "http://cdn.example/b.m3u8");

        http.serve("http://cdn.example/b.m3u8", media_playlist(&[]));
        let err = resolver
            .resolve(&url("http://cdn.example/master.m3u8"))
            .await
            .unwrap_err();
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn test_unfetchable_variant_fails() {
        let http = Arc::new(FakeHttp::new());
        http.serve(
            "http://cdn.example/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nmissing.m3u8\n",
        );
        let resolver = ManifestResolver::new(http.clone());

        let err = resolver
            .resolve(&url("http://cdn.example/master.m3u8"))
            .await
            .unwrap_err();
        match err {
            ResolutionError::Fetch { url, .. } => assert_eq!(url, "http://cdn.example/missing.m3u8"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unfetchable_manifest_fails() {
        let http = Arc::new(FakeHttp::new());
        http.fail("http://cdn.example/index.m3u8", 503);
        let resolver = ManifestResolver::new(http.clone());

        let err = resolver
            .resolve(&url("http://cdn.example/index.m3u8"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_self_referencing_master_stops() {
        let http = Arc::new(FakeHttp::new());
        http.serve(
            "http://cdn.example/loop.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nloop.m3u8\n",
        );
        let resolver = ManifestResolver::new(http.clone());

        let err = resolver
            .resolve(&url("http://cdn.example/loop.m3u8"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::TooDeep { max_depth: MAX_VARIANT_DEPTH, .. }));
        assert_eq!(http.request_count("http://cdn.example/loop.m3u8"), MAX_VARIANT_DEPTH + 1);
    }
}
