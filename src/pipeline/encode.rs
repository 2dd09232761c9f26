//! Image encoding: [`PageImage`] bytes → base64 payload for multimodal APIs.
//!
//! Page images arrive already rendered, so nothing is re-encoded; the bytes
//! are wrapped as-is. The MIME type comes from the collaborator when given,
//! otherwise it is sniffed from the magic bytes. `detail: "high"` asks
//! GPT-4-class models for the full tile budget; without it fine print in
//! item tables is lost.

use crate::document::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Fallback when neither the collaborator nor the magic bytes name a format.
const DEFAULT_MIME: &str = "image/png";

/// A page image ready to be embedded in a request body.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub page_number: u32,
    pub mime_type: String,
    /// Base64 (standard alphabet, padded).
    pub data: String,
    pub detail: String,
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("page_number", &self.page_number)
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("<{} chars>", self.data.len()))
            .finish()
    }
}

impl EncodedImage {
    /// `data:` URL for OpenAI-compatible `image_url` parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Convert for an `edgequake-llm` provider.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.mime_type.clone()).with_detail(self.detail.as_str())
    }
}

/// Encode one page image.
pub fn encode_image(image: &PageImage) -> EncodedImage {
    let mime_type = image
        .mime_type
        .clone()
        .filter(|m| m.starts_with("image/"))
        .or_else(|| {
            image::guess_format(&image.data)
                .ok()
                .map(|f| f.to_mime_type().to_string())
        })
        .unwrap_or_else(|| DEFAULT_MIME.to_string());

    let data = STANDARD.encode(&image.data);
    debug!(
        "Encoded page {} image ({}) → {} bytes base64",
        image.page_number,
        mime_type,
        data.len()
    );

    EncodedImage {
        page_number: image.page_number,
        mime_type,
        data,
        detail: "high".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        buf
    }

    fn page(data: Vec<u8>, mime: Option<&str>) -> PageImage {
        PageImage {
            page_number: 2,
            width: 10,
            height: 10,
            mime_type: mime.map(str::to_string),
            data,
        }
    }

    #[test]
    fn sniffs_png_from_bytes() {
        let bytes = png_bytes();
        let enc = encode_image(&page(bytes.clone(), None));
        assert_eq!(enc.mime_type, "image/png");
        assert_eq!(enc.page_number, 2);
        assert_eq!(STANDARD.decode(&enc.data).expect("valid base64"), bytes);
        assert!(enc.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn declared_mime_wins() {
        let enc = encode_image(&page(png_bytes(), Some("image/jpeg")));
        assert_eq!(enc.mime_type, "image/jpeg");
    }

    #[test]
    fn unknown_bytes_default_to_png() {
        let enc = encode_image(&page(vec![1, 2, 3], Some("application/octet-stream")));
        assert_eq!(enc.mime_type, DEFAULT_MIME);
    }

    #[test]
    fn converts_to_provider_image() {
        let data = encode_image(&page(png_bytes(), None)).to_image_data();
        assert_eq!(data.mime_type, "image/png");
        assert!(!data.data.is_empty());
    }
}
