//! # Thumbnail Stage
//!
//! Produces the small and medium preview artifacts. Aspect ratio is
//! preserved; images already smaller than a target are passed through at
//! their own size rather than upscaled.

use super::decode_image;
use crate::stage::{ProducedArtifact, Stage, StageContext, StageError, StageOutput};
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Thumbnail generation with configurable target edges.
pub struct Thumbnails {
    /// (role, max edge) pairs, produced in order.
    pub targets: Vec<(&'static str, u32)>,
}

impl Default for Thumbnails {
    fn default() -> Self {
        Self {
            targets: vec![("thumb_small", 150), ("thumb_medium", 512)],
        }
    }
}

fn encode_png(image: &DynamicImage) -> Result<Bytes, StageError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|err| StageError::Retryable(format!("thumbnail encode failed: {err}")))?;
    Ok(Bytes::from(buffer))
}

#[async_trait]
impl Stage for Thumbnails {
    fn name(&self) -> &'static str {
        "thumbnails"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let image = decode_image(ctx.bytes.clone()).await?;
        let targets = self.targets.clone();

        let artifacts = tokio::task::spawn_blocking(move || {
            let mut artifacts = Vec::with_capacity(targets.len());
            for (role, edge) in targets {
                let scaled = image.thumbnail(edge, edge);
                let (width, height) = scaled.dimensions();
                let bytes = encode_png(&scaled)?;
                artifacts.push(ProducedArtifact {
                    role: role.to_string(),
                    bytes,
                    content_type: "image/png".to_string(),
                    width: Some(width),
                    height: Some(height),
                });
            }
            Ok::<_, StageError>(artifacts)
        })
        .await
        .map_err(|join_err| StageError::Retryable(format!("thumbnail task failed: {join_err}")))??;

        if ctx.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        debug!(photo_id = %ctx.photo.id, count = artifacts.len(), "thumbnails produced");
        Ok(StageOutput {
            artifacts,
            extracted: None,
        })
    }
}
