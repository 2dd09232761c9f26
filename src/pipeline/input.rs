//! Input resolution: turn a user-supplied path or URL into a
//! [`SourceDocument`].
//!
//! Two kinds of input are accepted:
//!
//! * **Collaborator JSON** — the positioned-text export of a page/OCR tool
//!   (`{"pages": [...], "images": [...]}`), the normal case.
//! * **Anything else** (PDF, PNG, JPEG, ...) — kept untouched as the
//!   document's [`SourceFile`] so whole-file strategies can forward it; image
//!   inputs also become page 1 for the vision strategy.
//!
//! URLs are downloaded into memory; no temp files are involved because
//! nothing downstream needs a file-system path.

use crate::document::{PageImage, SourceDocument, SourceFile};
use crate::error::DocExtractError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a document.
///
/// # Errors
/// - [`DocExtractError::FileNotFound`] / [`DocExtractError::PermissionDenied`]
/// - [`DocExtractError::DownloadFailed`] / [`DocExtractError::DownloadTimeout`]
/// - [`DocExtractError::InvalidDocument`] — JSON that is not a source document
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<SourceDocument, DocExtractError> {
    if input.trim().is_empty() {
        return Err(DocExtractError::InvalidInput {
            input: input.to_string(),
        });
    }
    let (bytes, name) = if is_url(input) {
        let bytes = download_url(input, timeout_secs).await?;
        (bytes, filename_from_url(input))
    } else {
        let path = PathBuf::from(input);
        let bytes = read_local(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| input.to_string());
        (bytes, name)
    };
    parse_document(bytes, &name)
}

/// Interpret downloaded or read bytes.
pub fn parse_document(bytes: Vec<u8>, source_name: &str) -> Result<SourceDocument, DocExtractError> {
    let looks_like_json = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{');

    if looks_like_json {
        let doc: SourceDocument =
            serde_json::from_slice(&bytes).map_err(|e| DocExtractError::InvalidDocument {
                source_name: source_name.to_string(),
                detail: e.to_string(),
            })?;
        debug!(
            "Loaded '{}': {} page(s), {} element(s), {} image(s)",
            source_name,
            doc.pages.len(),
            doc.element_count(),
            doc.images.len()
        );
        return Ok(doc);
    }

    let file = source_file(bytes, source_name);
    let images = if file.mime_type.starts_with("image/") {
        vec![PageImage {
            page_number: 1,
            width: 0,
            height: 0,
            mime_type: Some(file.mime_type.clone()),
            data: file.bytes.clone(),
        }]
    } else {
        Vec::new()
    };
    debug!("Loaded '{}' as raw {} file", source_name, file.mime_type);
    Ok(SourceDocument {
        pages: Vec::new(),
        images,
        file: Some(file),
    })
}

/// Read a file to attach as the document's original for whole-file strategies.
pub async fn load_raw_file(path: &Path) -> Result<SourceFile, DocExtractError> {
    let bytes = read_local(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    Ok(source_file(bytes, &name))
}

fn source_file(bytes: Vec<u8>, name: &str) -> SourceFile {
    let mime_type = mime_for(name, &bytes).to_string();
    SourceFile {
        name: name.to_string(),
        mime_type,
        bytes,
    }
}

/// MIME type from the extension, falling back to magic bytes.
pub fn mime_for(name: &str, bytes: &[u8]) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ if bytes.starts_with(b"%PDF") => "application/pdf",
        _ => image::guess_format(bytes)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream"),
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>, DocExtractError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            debug!("Read {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DocExtractError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(DocExtractError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, DocExtractError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DocExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DocExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.json"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.json"));
        assert!(!is_url("doc.json"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://x.hr/a/racun-17.pdf?dl=1"), "racun-17.pdf");
        assert_eq!(filename_from_url("https://x.hr/a/"), "downloaded");
    }

    #[test]
    fn json_input_is_a_collaborator_export() {
        let json = br#"  {"pages":[{"pageNumber":1,"elements":[{"text":"RACUN","x":1,"y":2}]}]}"#;
        let doc = parse_document(json.to_vec(), "r.json").unwrap();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.element_count(), 1);
        assert!(doc.file.is_none());
    }

    #[test]
    fn broken_json_is_invalid_document() {
        let err = parse_document(b"{\"pages\": 3}".to_vec(), "bad.json").unwrap_err();
        assert!(matches!(err, DocExtractError::InvalidDocument { .. }));
    }

    #[test]
    fn pdf_bytes_become_the_source_file() {
        let doc = parse_document(b"%PDF-1.7 ...".to_vec(), "scan").unwrap();
        let file = doc.file.unwrap();
        assert_eq!(file.mime_type, "application/pdf");
        assert!(doc.images.is_empty());
        assert!(doc.pages.is_empty());
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for("a.JPG", b""), "image/jpeg");
        assert_eq!(mime_for("a.bin", b"\x89PNG\r\n\x1a\n"), "image/png");
        assert_eq!(mime_for("a.bin", b"zzz"), "application/octet-stream");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = load_document("/definitely/not/here.json", 5).await.unwrap_err();
        assert!(matches!(err, DocExtractError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn raw_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ponuda.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let file = load_raw_file(&path).await.unwrap();
        assert_eq!(file.name, "ponuda.pdf");
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.bytes, b"%PDF-1.4");
    }
}
