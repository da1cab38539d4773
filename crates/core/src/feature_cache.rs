//! Feature cache and fetcher
//!
//! Materializes a [`FeatureRef`] into a directory on disk containing an
//! executable `install.sh`, caching OCI and HTTPS references under a
//! deterministic directory keyed by the reference's last path segment.
//!
//! Concurrent launches racing to populate the same cache entry never
//! observe a partially-extracted directory: extraction happens into a
//! scratch directory beside the cache, which is atomically renamed into
//! place only once extraction succeeds.
//!
//! `Oci` references go through [`crate::oci`]'s manifest/blob pull (real
//! registry auth, not a plain GET); `Https` references are fetched directly
//! as already-assembled tarballs.
//!
//! ## References
//!
//! Grounded on the OCI client/fetcher split in `oci/client.rs` (the
//! `HttpClient`/`ReqwestClient` trait boundary, so fetch logic can be
//! exercised against a fake client in tests) and `oci/fetcher.rs`'s
//! tar-extraction idiom.

use crate::errors::{FeatureError, Result};
use crate::features::FeatureRef;
use crate::lockfile::LockFile;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, instrument, warn};

/// Minimal HTTP surface a direct (non-OCI) fetch needs; split out so tests
/// can substitute a fake client instead of hitting the network.
#[allow(async_fn_in_trait)]
pub trait HttpClient: Send + Sync {
    async fn get_bytes(&self, url: &str) -> std::result::Result<Bytes, String>;
}

/// Default client backed by `reqwest` with a pure-Rust (rustls) TLS stack.
/// Implements both [`HttpClient`] (for `Https` references) and
/// [`crate::oci::HttpClient`] (for `Oci` references, via manifest/blob
/// pull), so a single instance serves [`materialize`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
    oci_client: crate::oci::ReqwestClient,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            oci_client: crate::oci::ReqwestClient::new(),
        }
    }
}

impl HttpClient for ReqwestClient {
    async fn get_bytes(&self, url: &str) -> std::result::Result<Bytes, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("unexpected status {}", response.status()));
        }
        response.bytes().await.map_err(|e| e.to_string())
    }
}

impl crate::oci::HttpClient for ReqwestClient {
    async fn get_with_headers(
        &self,
        url: &str,
        headers: HashMap<String, String>,
    ) -> std::result::Result<crate::oci::HttpResponse, String> {
        self.oci_client.get_with_headers(url, headers).await
    }
}

/// Root directory features are cached under:
/// `<cache_root>/oci-cache/<cache-key>`.
pub fn cache_dir_for(cache_root: &Path, feature_ref: &FeatureRef) -> PathBuf {
    cache_root.join("oci-cache").join(feature_ref.cache_key())
}

/// Materialize a feature reference into a directory containing
/// `install.sh`, using and populating the cache for `Oci`/`Https`
/// references. `Local` references are returned as-is relative to
/// `workspace_root`, never cached.
#[instrument(skip(client, lockfile), fields(reference = %feature_ref.as_str()))]
pub async fn materialize<C: HttpClient + crate::oci::HttpClient>(
    client: &C,
    cache_root: &Path,
    workspace_root: &Path,
    feature_ref: &FeatureRef,
    lockfile: Option<&LockFile>,
) -> Result<PathBuf> {
    match feature_ref {
        FeatureRef::Local(path) => {
            let resolved = if Path::new(path).is_absolute() {
                PathBuf::from(path)
            } else {
                workspace_root.join(path)
            };
            Ok(resolved)
        }
        FeatureRef::Oci(_) => {
            let cache_dir = cache_dir_for(cache_root, feature_ref);
            if cache_dir.join("install.sh").exists() {
                debug!("cache hit at {}", cache_dir.display());
                return Ok(cache_dir);
            }

            let reference = resolve_fetch_url(feature_ref, lockfile);
            debug!("cache miss, pulling {} via OCI registry", reference);
            let bytes = crate::oci::pull_feature_layer(client, &reference).await?;

            extract_into_cache(&bytes, &cache_dir, feature_ref.as_str())
        }
        FeatureRef::Https(_) => {
            let cache_dir = cache_dir_for(cache_root, feature_ref);
            if cache_dir.join("install.sh").exists() {
                debug!("cache hit at {}", cache_dir.display());
                return Ok(cache_dir);
            }

            let fetch_url = resolve_fetch_url(feature_ref, lockfile);
            debug!("cache miss, fetching {}", fetch_url);

            let bytes = client
                .get_bytes(&fetch_url)
                .await
                .map_err(|cause| FeatureError::Fetch {
                    reference: feature_ref.as_str().to_string(),
                    cause,
                })?;

            extract_into_cache(&bytes, &cache_dir, feature_ref.as_str())
        }
    }
}

/// Extract a downloaded archive into a scratch directory and atomically
/// rename it into `cache_dir`, tolerating a concurrent launch winning the
/// same race.
fn extract_into_cache(bytes: &Bytes, cache_dir: &Path, reference: &str) -> Result<PathBuf> {
    let scratch_dir = cache_dir.with_extension(format!("tmp-{}", fastrand::u64(..)));
    std::fs::create_dir_all(&scratch_dir).map_err(FeatureError::Io)?;

    extract_archive(bytes, &scratch_dir).map_err(|cause| FeatureError::Extract {
        reference: reference.to_string(),
        cause,
    })?;

    if !scratch_dir.join("install.sh").exists() {
        let _ = std::fs::remove_dir_all(&scratch_dir);
        return Err(FeatureError::Integrity {
            reference: reference.to_string(),
            reason: "install.sh missing after extraction".to_string(),
        }
        .into());
    }

    if let Some(parent) = cache_dir.parent() {
        std::fs::create_dir_all(parent).map_err(FeatureError::Io)?;
    }

    match std::fs::rename(&scratch_dir, cache_dir) {
        Ok(()) => {}
        Err(_) if cache_dir.join("install.sh").exists() => {
            // A concurrent launch won the race and populated the cache
            // first; our extraction is redundant.
            let _ = std::fs::remove_dir_all(&scratch_dir);
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(&scratch_dir);
            return Err(FeatureError::Io(e).into());
        }
    }

    Ok(cache_dir.to_path_buf())
}

/// A lockfile's `resolved` entry (a digest-bearing reference) takes
/// precedence over the mutable tag in the configuration.
fn resolve_fetch_url(feature_ref: &FeatureRef, lockfile: Option<&LockFile>) -> String {
    if let Some(lock) = lockfile {
        if let Some(entry) = lock.features.get(feature_ref.as_str()) {
            return entry.resolved.clone();
        }
    }
    feature_ref.as_str().to_string()
}

fn extract_archive(bytes: &Bytes, dest: &Path) -> std::result::Result<(), String> {
    let cursor = Cursor::new(bytes.as_ref());
    let decoder = GzDecoder::new(cursor);
    let mut archive = Archive::new(decoder);
    archive.unpack(dest).map_err(|e| e.to_string())?;
    Ok(())
}

/// Remove a feature archive once extraction has succeeded and been renamed
/// into place. No-op if `path` doesn't exist.
pub fn cleanup_archive(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("failed to remove staged feature archive {}: {}", path.display(), e);
        }
    }
}
