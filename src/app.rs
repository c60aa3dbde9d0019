use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tracing::info;

use crate::blobs::BlobStore;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::metadata::{EditHistory, GenerationMetadata};
use crate::store::{GenerationStore, NewGeneration};
use crate::upstream::UpstreamClient;

/// Wires the enhancement, generation, blob and record layers into the
/// three user-facing pipelines: generate, edit and convert.
pub struct App {
    store: GenerationStore,
    upstream: UpstreamClient,
    llm: LlmClient,
    blobs: BlobStore,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let store = GenerationStore::new(&config.data_dir).await?;

        Ok(Self {
            store,
            upstream: UpstreamClient::new(config),
            llm: LlmClient::new(config),
            blobs: BlobStore::new(&config.output_dir),
        })
    }

    pub fn store(&self) -> &GenerationStore {
        &self.store
    }

    /// Turn a text prompt into an image: enhance, generate, persist the
    /// blob, record the generation. Returns the new record id.
    pub async fn generate(&self, prompt: &str) -> Result<i64> {
        let enhanced = self.llm.enhance_prompt(prompt).await;
        info!("Enhanced prompt: {}", enhanced);

        let image = self
            .upstream
            .generate_image(&enhanced)
            .await
            .context("Image generation failed")?;
        let image_path = self.blobs.save_image(&image).await?;

        self.store
            .save(NewGeneration {
                prompt: prompt.to_string(),
                enhanced_prompt: Some(enhanced),
                image_path: Some(image_path.to_string_lossy().into_owned()),
                ..Default::default()
            })
            .await
            .context("Failed to record generation")
    }

    /// Regenerate an existing image with a requested change. The result is
    /// a brand-new record linked to its parent; the parent is untouched.
    pub async fn edit(&self, id: i64, edit_prompt: &str) -> Result<i64> {
        let parent = self.store.get(id).await.context("No such generation")?;

        let previous_enhanced = parent
            .enhanced_prompt
            .clone()
            .unwrap_or_else(|| parent.prompt.clone());
        let enhanced = self
            .llm
            .enhance_edit_prompt(&previous_enhanced, edit_prompt)
            .await;
        info!("Enhanced edit prompt: {}", enhanced);

        let image = self
            .upstream
            .generate_image(&enhanced)
            .await
            .context("Image generation failed")?;
        let image_path = self.blobs.save_image(&image).await?;

        // The edit chain's root prompt travels with every edit record.
        let original_prompt = parent
            .metadata
            .as_ref()
            .and_then(|m| m.edit_history())
            .map(|h| h.original_prompt.clone())
            .unwrap_or_else(|| parent.prompt.clone());

        self.store
            .save(NewGeneration {
                prompt: edit_prompt.to_string(),
                enhanced_prompt: Some(enhanced),
                image_path: Some(image_path.to_string_lossy().into_owned()),
                parent_id: Some(parent.id),
                metadata: Some(GenerationMetadata::edit(EditHistory {
                    original_prompt,
                    edit_prompt: edit_prompt.to_string(),
                    previous_enhanced_prompt: previous_enhanced,
                    timestamp: Utc::now().to_rfc3339(),
                })),
                ..Default::default()
            })
            .await
            .context("Failed to record edit")
    }

    /// Convert a generation's image into a 3D model, recording the result
    /// as a new record carrying both blob paths.
    pub async fn convert(&self, id: i64) -> Result<i64> {
        let source = self.store.get(id).await.context("No such generation")?;
        let image_path = source
            .image_path
            .clone()
            .context("Generation has no image to convert")?;
        let image = self.blobs.load(Path::new(&image_path)).await?;

        let output = self
            .upstream
            .convert_to_3d(&image)
            .await
            .context("3D conversion failed")?;
        let model = output.model.context("Upstream returned no model object")?;
        let model_path = self.blobs.save_model(&model).await?;

        self.store
            .save(NewGeneration {
                prompt: source.prompt.clone(),
                enhanced_prompt: source.enhanced_prompt.clone(),
                image_path: Some(image_path),
                model_path: Some(model_path.to_string_lossy().into_owned()),
                ..Default::default()
            })
            .await
            .context("Failed to record conversion")
    }
}
