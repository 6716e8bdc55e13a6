//! # Metadata Extraction Stage
//!
//! Pulls intrinsic facts out of the image: dimensions, detected format,
//! orientation, alpha. The extracted object rides on the stage-completed
//! event and is not persisted separately.

use super::decode_image;
use crate::stage::{Stage, StageContext, StageError, StageOutput};
use async_trait::async_trait;
use image::GenericImageView;
use tracing::debug;

/// Intrinsic-metadata extraction.
pub struct MetadataExtraction;

#[async_trait]
impl Stage for MetadataExtraction {
    fn name(&self) -> &'static str {
        "metadata_extraction"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        let format = image::guess_format(&ctx.bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| ctx.photo.mime_type.as_mime().to_string());
        let image = decode_image(ctx.bytes.clone()).await?;
        let (width, height) = image.dimensions();
        let orientation = if width >= height { "landscape" } else { "portrait" };

        debug!(photo_id = %ctx.photo.id, format, "metadata extracted");
        Ok(StageOutput {
            artifacts: Vec::new(),
            extracted: Some(serde_json::json!({
                "width": width,
                "height": height,
                "format": format,
                "orientation": orientation,
                "has_alpha": image.color().has_alpha(),
                "size_bytes": ctx.bytes.len(),
            })),
        })
    }
}
