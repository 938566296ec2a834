use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use riskex_cache::CachedImage;
use riskex_experiment::{AssetError, AssetProvider, AudioClip};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Image bags and sounds read from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct DirectoryAssets;

fn io_error(path: &str, source: std::io::Error) -> AssetError {
    if source.kind() == std::io::ErrorKind::NotFound {
        AssetError::NotFound(path.to_string())
    } else {
        AssetError::Io {
            path: PathBuf::from(path),
            source,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[async_trait]
impl AssetProvider for DirectoryAssets {
    async fn fetch_folder(&self, folder: &str) -> Result<Vec<String>, AssetError> {
        let mut entries = tokio::fs::read_dir(folder)
            .await
            .map_err(|e| io_error(folder, e))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(folder, e))? {
            let path = entry.path();
            if is_image(&path) {
                paths.push(path.to_string_lossy().into_owned());
            }
        }
        paths.sort();
        debug!("{folder}: {} images", paths.len());
        Ok(paths)
    }

    async fn fetch_image(&self, path: &str) -> Result<CachedImage, AssetError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| AssetError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(CachedImage::new(path, width, height, rgba.into_raw()))
    }

    async fn fetch_audio(&self, path: &str) -> Result<AudioClip, AssetError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        Ok(AudioClip {
            path: path.to_string(),
            bytes,
        })
    }
}
