//! # Upload Validation
//!
//! Every precondition the coordinator enforces before touching a backend.
//! All failures surface as [`PlatformError::ValidationFailed`] and are never
//! retried.

use shared_types::{MediaType, PlatformError};

/// Characters allowed in `original_name`.
fn is_allowed_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ')
}

/// Sniff the media type from magic bytes.
#[must_use]
pub fn sniff_media_type(bytes: &[u8]) -> Option<MediaType> {
    infer::get(bytes).map(|kind| MediaType::from_mime(kind.mime_type()))
}

/// Validate an upload and resolve its media type.
///
/// Rules:
/// - non-empty buffer, at most `max_bytes`
/// - `original_name` non-empty, charset `[A-Za-z0-9_.\- ]`
/// - non-empty `client_id`
/// - a declared content type must be on the allowlist and must agree with
///   the magic-byte sniff
/// - without a declared type, the sniffed type (or `octet-stream` when the
///   sniff fails) must be on the allowlist
///
/// # Errors
///
/// `ValidationFailed` describing the first violated rule.
pub fn validate_upload(
    bytes: &[u8],
    original_name: &str,
    client_id_value: &str,
    declared_content_type: Option<&str>,
    max_bytes: u64,
    allowed_types: &[MediaType],
) -> Result<MediaType, PlatformError> {
    if bytes.is_empty() {
        return Err(PlatformError::ValidationFailed("empty upload buffer".into()));
    }
    if bytes.len() as u64 > max_bytes {
        return Err(PlatformError::ValidationFailed(format!(
            "upload of {} bytes exceeds the {max_bytes} byte cap",
            bytes.len()
        )));
    }
    if original_name.is_empty() || !original_name.chars().all(is_allowed_name_char) {
        return Err(PlatformError::ValidationFailed(format!(
            "invalid original name '{original_name}'"
        )));
    }
    if client_id_value.trim().is_empty() {
        return Err(PlatformError::ValidationFailed("client_id is required".into()));
    }

    let sniffed = sniff_media_type(bytes);
    let resolved = match declared_content_type {
        Some(declared) => {
            let declared_type = MediaType::from_mime(declared);
            if !allowed_types.contains(&declared_type) {
                return Err(PlatformError::ValidationFailed(format!(
                    "content type '{declared}' is not allowed"
                )));
            }
            // The sniff is authoritative: a declared type the bytes do not
            // back is rejected, not silently corrected.
            match sniffed {
                Some(actual) if actual == declared_type => declared_type,
                Some(actual) => {
                    return Err(PlatformError::ValidationFailed(format!(
                        "declared type '{declared}' does not match sniffed '{actual}'"
                    )))
                }
                None => {
                    return Err(PlatformError::ValidationFailed(format!(
                        "buffer does not look like the declared type '{declared}'"
                    )))
                }
            }
        }
        None => sniffed.unwrap_or(MediaType::OctetStream),
    };

    if !allowed_types.contains(&resolved) {
        return Err(PlatformError::ValidationFailed(format!(
            "media type '{resolved}' is not allowed"
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG_MAGIC: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];

    fn png_stub() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        bytes
    }

    fn image_allowlist() -> Vec<MediaType> {
        vec![
            MediaType::Jpeg,
            MediaType::Png,
            MediaType::Gif,
            MediaType::Webp,
        ]
    }

    fn check(
        bytes: &[u8],
        name: &str,
        declared: Option<&str>,
    ) -> Result<MediaType, PlatformError> {
        validate_upload(bytes, name, "c1", declared, 1024, &image_allowlist())
    }

    #[test]
    fn test_valid_png_without_declared_type() {
        assert_eq!(check(&png_stub(), "cat.png", None).expect("valid"), MediaType::Png);
    }

    #[test]
    fn test_valid_png_with_matching_declared_type() {
        assert_eq!(
            check(&png_stub(), "cat.png", Some("image/png")).expect("valid"),
            MediaType::Png
        );
    }

    #[test]
    fn test_empty_buffer_rejected() {
        assert!(matches!(
            check(&[], "cat.png", None),
            Err(PlatformError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_size_cap_boundary() {
        let at_cap = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
            .into_iter()
            .chain(std::iter::repeat(0u8))
            .take(1024)
            .collect::<Vec<_>>();
        // Exactly the cap passes validation sizing.
        assert!(check(&at_cap, "cat.png", None).is_ok());

        let over_cap: Vec<u8> = at_cap.into_iter().chain(std::iter::once(0)).collect();
        assert!(matches!(
            check(&over_cap, "cat.png", None),
            Err(PlatformError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_bad_names_rejected() {
        for name in ["", "../../etc/passwd", "photo?.png", "emoji\u{1F4F7}.png"] {
            assert!(
                matches!(
                    check(&png_stub(), name, None),
                    Err(PlatformError::ValidationFailed(_))
                ),
                "name '{name}' should be rejected"
            );
        }
        assert!(check(&png_stub(), "legal name-1.png", None).is_ok());
    }

    #[test]
    fn test_missing_client_id_rejected() {
        let err = validate_upload(&png_stub(), "cat.png", "  ", None, 1024, &image_allowlist())
            .expect_err("no client");
        assert!(matches!(err, PlatformError::ValidationFailed(_)));
    }

    #[test]
    fn test_declared_type_must_match_sniff() {
        let mut jpeg = JPEG_MAGIC.to_vec();
        jpeg.extend_from_slice(&[0u8; 32]);
        // JPEG bytes declared as PNG.
        assert!(matches!(
            check(&jpeg, "cat.png", Some("image/png")),
            Err(PlatformError::ValidationFailed(_))
        ));
        assert!(check(&jpeg, "cat.jpg", Some("image/jpeg")).is_ok());
    }

    #[test]
    fn test_random_bytes_rejected() {
        // No recognizable magic and nothing declared: octet-stream, which
        // the image allowlist refuses.
        let noise = [0x13, 0x37, 0x42, 0x99, 0x00, 0x01, 0x02, 0x03];
        assert!(matches!(
            check(&noise, "noise.bin", None),
            Err(PlatformError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_disallowed_declared_type_rejected() {
        assert!(matches!(
            check(&png_stub(), "cat.png", Some("video/mp4")),
            Err(PlatformError::ValidationFailed(_))
        ));
    }
}
