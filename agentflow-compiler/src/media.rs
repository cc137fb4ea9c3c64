use base64::{engine::general_purpose, Engine as _};

/// A decoded file payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub mime_type: String,
    /// Normalized base64 text of the payload (no data-URL prefix).
    pub base64: String,
    pub bytes: Vec<u8>,
}

impl DecodedPayload {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
            || matches!(
                self.mime_type.as_str(),
                "application/json" | "application/xml"
            )
    }
}

/// Decodes a `data:<mime>;base64,<payload>` URL or bare base64.
pub fn decode_payload(raw: &str) -> Result<DecodedPayload, String> {
    let raw = raw.trim();
    let (declared, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| "data URL without payload".to_string())?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| "data URL is not base64 encoded".to_string())?;
            (Some(mime.to_string()).filter(|m| !m.is_empty()), payload)
        }
        None => (None, raw),
    };

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("empty payload".to_string());
    }
    let bytes = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| e.to_string())?;
    let mime_type = declared.unwrap_or_else(|| sniff_mime(&bytes).to_string());

    Ok(DecodedPayload {
        mime_type,
        base64: compact,
        bytes,
    })
}

/// Media type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.starts_with(b"%PDF-") {
        "application/pdf"
    } else if bytes.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if std::str::from_utf8(bytes).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const PNG_1PX: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn test_sniff_png_from_bare_base64() {
        let payload = decode_payload(PNG_1PX).unwrap();
        assert_eq!(payload.mime_type, "image/png");
        assert!(payload.is_image());
        assert_eq!(payload.base64, PNG_1PX);
    }

    #[test]
    fn test_data_url_mime_wins() {
        let payload = decode_payload("data:text/markdown;base64,IyBUaXRsZQ==").unwrap();
        assert_eq!(payload.mime_type, "text/markdown");
        assert!(payload.is_text());
        assert_eq!(payload.bytes, b"# Title");
    }

    #[test]
    fn test_pdf_and_text_sniffing() {
        assert_eq!(sniff_mime(b"%PDF-1.7\n..."), "application/pdf");
        assert_eq!(sniff_mime(b"plain words"), "text/plain");
        assert_eq!(sniff_mime(&[0xC3, 0x28, 0x00]), "application/octet-stream");
    }

    #[test]
    fn test_corrupt_payload() {
        assert!(decode_payload("not base64 at all!").is_err());
        assert!(decode_payload("data:image/png,abc").is_err());
        assert!(decode_payload("   ").is_err());
    }
}
