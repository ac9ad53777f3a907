//! File-backed identity with hot reload.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::IdentityConfig;
use crate::identity::{parse_certificates, parse_private_key, Identity, IdentityError, IdentitySource};

/// Identity read from the PEM files a SPIFFE helper maintains.
pub struct FileIdentitySource {
    cert_path: PathBuf,
    key_path: PathBuf,
    bundle_path: PathBuf,
    current: ArcSwap<Identity>,
}

impl FileIdentitySource {
    /// Load the initial identity. Fails if any file is missing or empty.
    pub fn load(config: &IdentityConfig) -> Result<Arc<Self>, IdentityError> {
        let identity = read_identity(&config.cert_path, &config.key_path, &config.bundle_path, 0)?;
        tracing::info!(
            cert = %config.cert_path.display(),
            bundle = %config.bundle_path.display(),
            "Workload identity loaded"
        );

        Ok(Arc::new(Self {
            cert_path: config.cert_path.clone(),
            key_path: config.key_path.clone(),
            bundle_path: config.bundle_path.clone(),
            current: ArcSwap::from_pointee(identity),
        }))
    }

    /// Re-read the files and publish them as a new generation.
    ///
    /// On error the current identity stays in place.
    pub fn reload(&self) -> Result<u64, IdentityError> {
        let generation = self.current.load().generation + 1;
        let identity = read_identity(&self.cert_path, &self.key_path, &self.bundle_path, generation)?;
        self.current.store(Arc::new(identity));
        Ok(generation)
    }

    /// Reload whenever one of the files changes.
    ///
    /// The returned watcher must be kept alive for as long as reloads are
    /// wanted.
    pub fn watch(self: &Arc<Self>) -> Result<RecommendedWatcher, IdentityError> {
        let source = Arc::downgrade(self);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let Some(source) = source.upgrade() else {
                        return;
                    };
                    tracing::info!("Identity file change detected, reloading...");
                    match source.reload() {
                        Ok(generation) => tracing::info!(generation, "Workload identity rotated"),
                        Err(e) => tracing::error!(
                            error = %e,
                            "Failed to reload identity. Keeping current material."
                        ),
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Identity watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let mut dirs: Vec<&Path> = [&self.cert_path, &self.key_path, &self.bundle_path]
            .into_iter()
            .map(|p| p.parent().unwrap_or(Path::new(".")))
            .collect();
        dirs.sort();
        dirs.dedup();
        for dir in dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(cert = ?self.cert_path, "Identity watcher started");
        Ok(watcher)
    }
}

impl IdentitySource for FileIdentitySource {
    fn current(&self) -> Result<Arc<Identity>, IdentityError> {
        Ok(self.current.load_full())
    }
}

fn read_identity(cert: &Path, key: &Path, bundle: &Path, generation: u64) -> Result<Identity, IdentityError> {
    Ok(Identity {
        cert_chain: parse_certificates(cert, &read(cert)?)?,
        private_key: parse_private_key(key, &read(key)?)?,
        trust_anchors: parse_certificates(bundle, &read(bundle)?)?,
        generation,
    })
}

fn read(path: &Path) -> Result<Vec<u8>, IdentityError> {
    fs::read(path).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })
}
