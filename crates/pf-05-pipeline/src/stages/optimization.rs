//! # Optimization Stage
//!
//! Re-encodes the original as a flattened JPEG. When the result is not
//! actually smaller than the original (already-optimized JPEGs, tiny
//! images), no artifact is produced; the stage still succeeds.

use super::decode_image;
use crate::stage::{ProducedArtifact, Stage, StageContext, StageError, StageOutput};
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// JPEG re-encode optimization.
pub struct Optimization;

#[async_trait]
impl Stage for Optimization {
    fn name(&self) -> &'static str {
        "optimization"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let image = decode_image(ctx.bytes.clone()).await?;
        let original_size = ctx.bytes.len();

        let encoded = tokio::task::spawn_blocking(move || {
            // JPEG has no alpha channel; flatten before encoding.
            let flat = DynamicImage::ImageRgb8(image.to_rgb8());
            let (width, height) = flat.dimensions();
            let mut buffer = Vec::new();
            flat.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
                .map_err(|err| StageError::Retryable(format!("jpeg encode failed: {err}")))?;
            Ok::<_, StageError>((Bytes::from(buffer), width, height))
        })
        .await
        .map_err(|join_err| StageError::Retryable(format!("optimize task failed: {join_err}")))??;

        if ctx.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let (bytes, width, height) = encoded;
        if bytes.len() >= original_size {
            debug!(
                photo_id = %ctx.photo.id,
                original_size,
                encoded_size = bytes.len(),
                "re-encode gained nothing, skipping artifact"
            );
            return Ok(StageOutput {
                artifacts: Vec::new(),
                extracted: Some(serde_json::json!({"optimized": false})),
            });
        }

        let saved = original_size - bytes.len();
        debug!(photo_id = %ctx.photo.id, saved, "optimized artifact produced");
        Ok(StageOutput {
            artifacts: vec![ProducedArtifact {
                role: "optimized".to_string(),
                bytes,
                content_type: "image/jpeg".to_string(),
                width: Some(width),
                height: Some(height),
            }],
            extracted: Some(serde_json::json!({
                "optimized": true,
                "bytes_saved": saved,
            })),
        })
    }
}
