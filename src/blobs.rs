use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Flat file store for generated binaries. Images and models live under
/// separate roots; files are named by prefix and second-resolution
/// timestamp so a directory listing reads chronologically.
pub struct BlobStore {
    images_dir: PathBuf,
    models_dir: PathBuf,
}

impl BlobStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            images_dir: output_dir.join("images"),
            models_dir: output_dir.join("models"),
        }
    }

    pub async fn save_image(&self, data: &[u8]) -> Result<PathBuf> {
        Self::save(&self.images_dir, "generated", "png", data).await
    }

    pub async fn save_model(&self, data: &[u8]) -> Result<PathBuf> {
        Self::save(&self.models_dir, "model", "glb", data).await
    }

    pub async fn load(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path).await?)
    }

    async fn save(dir: &Path, prefix: &str, extension: &str, data: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(dir).await?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.{}", prefix, timestamp, extension));
        fs::write(&path, data).await?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saved_image_lands_under_images_root() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path());

        let path = blobs.save_image(b"png data").await.unwrap();

        assert!(path.starts_with(dir.path().join("images")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("generated_"));
        assert!(name.ends_with(".png"));
    }

    #[tokio::test]
    async fn saved_model_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path());

        let path = blobs.save_model(b"glb data").await.unwrap();
        assert!(path.extension().is_some_and(|e| e == "glb"));

        let loaded = blobs.load(&path).await.unwrap();
        assert_eq!(loaded, b"glb data");
    }
}
