//! Input types supplied by the page/OCR collaborator.
//!
//! The library never renders documents or runs OCR itself. Whatever does
//! (pdf.js, pdfium, tesseract, a scanner SDK) hands over a [`SourceDocument`]:
//! positioned text fragments per page, optional rendered page images, and
//! optionally the original file bytes for whole-file strategies.
//!
//! The JSON form uses camelCase keys and base64 for binary payloads:
//!
//! ```json
//! {
//!   "pages": [
//!     { "pageNumber": 1, "text": "...",
//!       "elements": [{ "text": "RAČUN", "x": 40, "y": 52, "width": 80, "height": 14, "page": 1 }] }
//!   ],
//!   "images": [{ "pageNumber": 1, "width": 1240, "height": 1754, "data": "iVBORw0..." }]
//! }
//! ```

use serde::{Deserialize, Serialize};

/// One text fragment with its bounding box, in page coordinates (y grows down).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedTextElement {
    pub text: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    /// 1-indexed page number.
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

impl PositionedTextElement {
    pub fn new(text: impl Into<String>, x: f64, y: f64, width: f64, height: f64, page: u32) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            width,
            height,
            page,
        }
    }
}

/// Text content of one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub page_number: u32,
    /// Plain text as reported by the collaborator. Used when `elements` is empty.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub elements: Vec<PositionedTextElement>,
}

/// A rendered page image.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageImage {
    pub page_number: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Detected from the bytes when absent.
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .finish()
    }
}

/// The original file, forwarded untouched by the upload and raw-file strategies.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub name: String,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Everything the pipeline knows about one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    #[serde(default)]
    pub pages: Vec<PageContent>,
    #[serde(default)]
    pub images: Vec<PageImage>,
    #[serde(default)]
    pub file: Option<SourceFile>,
}

impl SourceDocument {
    /// Total number of positioned elements over all pages.
    pub fn element_count(&self) -> usize {
        self.pages.iter().map(|p| p.elements.len()).sum()
    }

    /// Byte size used for complexity assessment: the original file when
    /// present, otherwise the sum of text and image payloads.
    pub fn byte_size(&self) -> u64 {
        if let Some(ref f) = self.file {
            return f.bytes.len() as u64;
        }
        let text: usize = self.pages.iter().map(|p| p.text.len()).sum();
        let images: usize = self.images.iter().map(|i| i.data.len()).sum();
        (text + images) as u64
    }
}

/// Serde adapter: `Vec<u8>` as a standard base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        // Tolerate data-URI prefixes ("data:image/png;base64,....").
        let payload = match encoded.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => encoded.as_str(),
        };
        STANDARD
            .decode(payload.trim())
            .map_err(serde::de::Error::custom)
    }
}
