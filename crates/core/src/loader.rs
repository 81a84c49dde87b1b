use crate::error::LoadError;
use crate::extractor::{LopdfExtractor, OcrEngine, PdfTextExtractor, TesseractOcr};
use crate::models::Document;
use crate::office::{FileExtractor, StructuredFileLoader};
use std::path::Path;
use tracing::{debug, info};

pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Pdf,
    Other,
}

pub fn classify(path: &Path) -> FileKind {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        FileKind::Image
    } else if extension == "pdf" {
        FileKind::Pdf
    } else {
        FileKind::Other
    }
}

/// Routes a file to OCR, the PDF text layer or the structured-file extractor.
pub struct DocumentLoader {
    pdf: Box<dyn PdfTextExtractor>,
    ocr: Box<dyn OcrEngine>,
    files: Box<dyn FileExtractor>,
    scanned_pdf_min_chars: usize,
}

impl DocumentLoader {
    pub fn new(
        pdf: Box<dyn PdfTextExtractor>,
        ocr: Box<dyn OcrEngine>,
        files: Box<dyn FileExtractor>,
        scanned_pdf_min_chars: usize,
    ) -> Self {
        Self {
            pdf,
            ocr,
            files,
            scanned_pdf_min_chars,
        }
    }

    /// lopdf for text layers, tesseract for OCR.
    pub fn local(scanned_pdf_min_chars: usize) -> Self {
        Self::new(
            Box::new(LopdfExtractor),
            Box::new(TesseractOcr::default()),
            Box::new(StructuredFileLoader),
            scanned_pdf_min_chars,
        )
    }

    pub fn with_ocr(mut self, ocr: Box<dyn OcrEngine>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn load(&self, path: &Path) -> Result<Vec<Document>, LoadError> {
        let source = path.to_string_lossy().to_string();

        match classify(path) {
            FileKind::Image => {
                let content = self.ocr.image_to_text(path)?;
                Ok(vec![Document::new(content, source)])
            }
            FileKind::Pdf => {
                let content = self.load_pdf(path)?;
                Ok(vec![Document::new(content, source)])
            }
            FileKind::Other => self.files.extract(path),
        }
    }

    /// The cheap text layer is always tried first. A short result is taken as
    /// a sign of a scanned document, which is a guess rather than a
    /// classification.
    fn load_pdf(&self, path: &Path) -> Result<String, LoadError> {
        match self.pdf.extract_text(path) {
            Ok(text) => {
                let text = text.trim().to_string();
                let length = text.chars().count();
                if length >= self.scanned_pdf_min_chars {
                    return Ok(text);
                }
                info!(
                    path = %path.display(),
                    extracted_chars = length,
                    threshold = self.scanned_pdf_min_chars,
                    "pdf text layer too short, falling back to OCR"
                );
                self.ocr.pdf_to_text(path)
            }
            Err(LoadError::PdfParse(parse_error)) => {
                debug!(path = %path.display(), error = %parse_error, "pdf text layer unreadable, trying OCR");
                self.ocr.pdf_to_text(path).map_err(|ocr_error| {
                    LoadError::PdfParse(format!("{parse_error}; OCR fallback failed: {ocr_error}"))
                })
            }
            Err(error) => Err(error),
        }
    }
}
