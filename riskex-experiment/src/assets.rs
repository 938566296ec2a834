use std::path::PathBuf;

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use riskex_cache::{CachedImage, ImageCache};

use crate::config::SessionParameters;
use crate::error::{AssetError, ParameterError};
use crate::surface::AudioClip;

/// Source of stimulus images and sounds.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    /// Image paths in `folder`.
    async fn fetch_folder(&self, folder: &str) -> Result<Vec<String>, AssetError>;

    async fn fetch_image(&self, path: &str) -> Result<CachedImage, AssetError>;

    async fn fetch_audio(&self, path: &str) -> Result<AudioClip, AssetError>;
}

/// Wraps a provider and keeps everything it served, so a later session can
/// still load while the provider is unreachable.
pub struct OfflineCache<P> {
    provider: P,
    cache: Mutex<ImageCache>,
}

impl<P: AssetProvider> OfflineCache<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            cache: Mutex::new(ImageCache::new()),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

#[async_trait]
impl<P: AssetProvider> AssetProvider for OfflineCache<P> {
    async fn fetch_folder(&self, folder: &str) -> Result<Vec<String>, AssetError> {
        match self.provider.fetch_folder(folder).await {
            Ok(entries) => {
                self.cache.lock().remember_folder(folder, &entries);
                Ok(entries)
            }
            Err(e) => {
                let cached = self.cache.lock().folder(folder);
                match cached {
                    Some(entries) => {
                        warn!("{e}; using cached listing of {folder}");
                        Ok(entries)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fetch_image(&self, path: &str) -> Result<CachedImage, AssetError> {
        match self.provider.fetch_image(path).await {
            Ok(image) => {
                self.cache.lock().insert(image.clone());
                Ok(image)
            }
            Err(e) => {
                let cached = self.cache.lock().get(path).cloned();
                match cached {
                    Some(image) => {
                        info!("Using cached image: {path}");
                        Ok(image)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fetch_audio(&self, path: &str) -> Result<AudioClip, AssetError> {
        self.provider.fetch_audio(path).await
    }
}

/// Where per-subject parameters come from.
#[async_trait]
pub trait ParameterLoader: Send + Sync {
    async fn load(&self, subject: &str) -> Result<SessionParameters, ParameterError>;
}

/// Reads `<dir>/<subject>_params.txt`.
#[derive(Debug, Clone)]
pub struct ParameterFiles {
    dir: PathBuf,
}

impl ParameterFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, subject: &str) -> PathBuf {
        self.dir.join(format!("{subject}_params.txt"))
    }
}

#[async_trait]
impl ParameterLoader for ParameterFiles {
    async fn load(&self, subject: &str) -> Result<SessionParameters, ParameterError> {
        let path = self.path_for(subject);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ParameterError::Io {
                path: path.clone(),
                source,
            })?;
        let params = SessionParameters::from_json(&text)?;
        info!("Loaded parameters for {subject} from {}", path.display());
        Ok(params)
    }
}

/// Fixed parameters, for dry runs and tests.
#[async_trait]
impl ParameterLoader for SessionParameters {
    async fn load(&self, _subject: &str) -> Result<SessionParameters, ParameterError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Default)]
    struct Flaky {
        down: AtomicBool,
        images: HashMap<String, CachedImage>,
    }

    #[async_trait]
    impl AssetProvider for Flaky {
        async fn fetch_folder(&self, folder: &str) -> Result<Vec<String>, AssetError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AssetError::NotFound(folder.to_string()));
            }
            let mut paths: Vec<String> = self.images.keys().cloned().collect();
            paths.sort();
            Ok(paths)
        }

        async fn fetch_image(&self, path: &str) -> Result<CachedImage, AssetError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AssetError::NotFound(path.to_string()));
            }
            self.images
                .get(path)
                .cloned()
                .ok_or_else(|| AssetError::NotFound(path.to_string()))
        }

        async fn fetch_audio(&self, path: &str) -> Result<AudioClip, AssetError> {
            Err(AssetError::NotFound(path.to_string()))
        }
    }

    #[tokio::test]
    async fn serves_cached_assets_while_offline() {
        let mut images = HashMap::new();
        images.insert(
            "sure/sure2.png".to_string(),
            CachedImage::new("sure/sure2.png", 1, 1, vec![0, 0, 0, 255]),
        );
        let assets = OfflineCache::new(Flaky {
            down: AtomicBool::new(false),
            images,
        });

        let listing = assets.fetch_folder("sure").await.unwrap();
        assets.fetch_image(&listing[0]).await.unwrap();
        assert_eq!(assets.cached(), 1);

        assets.provider.down.store(true, Ordering::SeqCst);
        assert_eq!(assets.fetch_folder("sure").await.unwrap(), listing);
        let image = assets.fetch_image("sure/sure2.png").await.unwrap();
        assert_eq!(image.width, 1);
        assert!(matches!(
            assets.fetch_image("sure/sure9.png").await,
            Err(AssetError::NotFound(_))
        ));
        assert!(assets.fetch_folder("gamble").await.is_err());
    }

    #[tokio::test]
    async fn reads_subject_parameter_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Setta_params.txt"),
            r#"{"ChoiceTimeOut": 4000, "Species": "macaque"}"#,
        )
        .unwrap();
        let files = ParameterFiles::new(dir.path());

        let params = files.load("Setta").await.unwrap();
        assert_eq!(params.choice_time_out, 4_000);
        assert_eq!(params.inter_trial_interval, 1_000);

        assert!(matches!(
            files.load("Nobody").await,
            Err(ParameterError::Io { .. })
        ));
    }
}
