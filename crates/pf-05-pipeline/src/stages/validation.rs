//! # Validation Stage
//!
//! First stage of every pipeline: prove the blob decodes as an image at
//! all. Ingress already sniffed magic bytes; this stage pays for a real
//! decode so later stages never see corrupt input.

use super::decode_image;
use crate::stage::{Stage, StageContext, StageError, StageOutput};
use async_trait::async_trait;
use image::GenericImageView;
use tracing::debug;

/// Decode-probe validation.
pub struct Validation;

#[async_trait]
impl Stage for Validation {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        let image = decode_image(ctx.bytes.clone()).await?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(StageError::Fatal("image has zero dimensions".into()));
        }

        debug!(photo_id = %ctx.photo.id, width, height, "image validated");
        Ok(StageOutput {
            artifacts: Vec::new(),
            extracted: Some(serde_json::json!({
                "width": width,
                "height": height,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests_support::{context_for, png_bytes};

    #[tokio::test]
    async fn test_valid_png_passes() {
        let ctx = context_for(png_bytes(8, 6));
        let output = Validation.run(&ctx).await.expect("valid");
        let extracted = output.extracted.expect("dims");
        assert_eq!(extracted["width"], 8);
        assert_eq!(extracted["height"], 6);
    }

    #[tokio::test]
    async fn test_garbage_is_fatal() {
        let ctx = context_for(bytes::Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]));
        let err = Validation.run(&ctx).await.expect_err("fatal");
        assert!(matches!(err, StageError::Fatal(_)));
    }
}
