//! # Default Stages
//!
//! The built-in image stages. Decode and encode run on the blocking pool;
//! the async executor only awaits them. Resampling quality is deliberately
//! plain: these stages exist to drive the engine, not to compete with an
//! image-processing suite.

mod metadata;
mod optimization;
mod thumbnails;
mod validation;

pub use metadata::MetadataExtraction;
pub use optimization::Optimization;
pub use thumbnails::Thumbnails;
pub use validation::Validation;

use crate::stage::StageError;
use bytes::Bytes;
use image::DynamicImage;

/// Decode image bytes on the blocking pool.
///
/// Undecodable input is a fatal stage failure: retrying the same bytes
/// cannot succeed.
pub(crate) async fn decode_image(bytes: Bytes) -> Result<DynamicImage, StageError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|join_err| StageError::Retryable(format!("decode task failed: {join_err}")))?
        .map_err(|decode_err| StageError::Fatal(format!("undecodable image: {decode_err}")))
}

#[cfg(test)]
pub(crate) mod tests_support {
    use crate::stage::StageContext;
    use bytes::Bytes;
    use chrono::Utc;
    use image::{ImageFormat, RgbaImage};
    use shared_types::{ClientId, MediaType, PhotoId, PhotoRecord, TraceId};
    use std::io::Cursor;
    use tokio::sync::watch;

    /// A real encoded PNG with a simple gradient so encoders have content.
    pub fn png_bytes(width: u32, height: u32) -> Bytes {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x * 31 % 256) as u8, (y * 53 % 256) as u8, 128, 255])
        });
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .expect("encode fixture");
        Bytes::from(buffer)
    }

    /// A context over the given bytes with a fresh record.
    pub fn context_for(bytes: Bytes) -> StageContext {
        let (_tx, cancelled) = watch::channel(false);
        // The sender side is dropped; the flag stays false forever.
        let photo = PhotoRecord::new(
            PhotoId::generate(),
            "photos/fixture.png",
            "photos",
            bytes.len() as u64,
            MediaType::Png,
            "fixture.png",
            "sum",
            ClientId::from("c1"),
            Utc::now(),
        );
        StageContext {
            photo,
            bytes,
            trace_id: TraceId::generate(),
            cancelled,
        }
    }
}
