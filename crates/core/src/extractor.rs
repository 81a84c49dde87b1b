use crate::error::LoadError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Native text layer of a PDF.
pub trait PdfTextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, LoadError>;
}

/// Image-to-text conversion. `pdf_to_text` renders each page and reads it.
pub trait OcrEngine: Send + Sync {
    fn image_to_text(&self, path: &Path) -> Result<String, LoadError>;

    fn pdf_to_text(&self, path: &Path) -> Result<String, LoadError>;
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, LoadError> {
        let document =
            Document::load(path).map_err(|error| LoadError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| LoadError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        Ok(pages)
    }
}

impl PdfTextExtractor for LopdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, LoadError> {
        Ok(self
            .extract_pages(path)?
            .into_iter()
            .map(|page| page.text)
            .collect::<String>())
    }
}

/// Local OCR through the `tesseract` binary; PDF pages are rasterised with
/// `pdftoppm` first.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
    pub dpi: u32,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            tesseract_bin: "tesseract".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            dpi: 300,
        }
    }
}

impl TesseractOcr {
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<Vec<u8>, LoadError> {
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(LoadError::OcrFailed(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    fn render_pages(&self, pdf: &Path, workdir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let prefix = workdir.join("page");
        let dpi = self.dpi.to_string();
        self.run(
            &self.pdftoppm_bin,
            &[
                OsStr::new("-r"),
                OsStr::new(&dpi),
                OsStr::new("-png"),
                pdf.as_os_str(),
                prefix.as_os_str(),
            ],
        )?;

        let mut pages = std::fs::read_dir(workdir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
            .collect::<Vec<_>>();
        // pdftoppm zero-pads page numbers, so lexical order is page order.
        pages.sort();
        Ok(pages)
    }
}

impl OcrEngine for TesseractOcr {
    fn image_to_text(&self, path: &Path) -> Result<String, LoadError> {
        let stdout = self.run(&self.tesseract_bin, &[path.as_os_str(), OsStr::new("stdout")])?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn pdf_to_text(&self, path: &Path) -> Result<String, LoadError> {
        let workdir = std::env::temp_dir().join(format!("qa-rag-ocr-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&workdir)?;

        let result = self.render_pages(path, &workdir).and_then(|pages| {
            debug!(path = %path.display(), pages = pages.len(), "running OCR over rendered pages");
            pages
                .iter()
                .map(|page| self.image_to_text(page))
                .collect::<Result<Vec<_>, _>>()
        });

        if let Err(error) = remove_workdir(&workdir) {
            warn!(workdir = %workdir.display(), error = %error, "could not remove OCR scratch directory");
        }
        Ok(result?.join("\n"))
    }
}

fn remove_workdir(workdir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(workdir) {
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum OcrContent {
    PdfBase64(String),
    ImageBase64(String),
}

#[derive(Debug, Serialize)]
struct OcrJob {
    #[serde(flatten)]
    content: OcrContent,
    source_path: String,
}

impl OcrJob {
    fn read(path: &Path, wrap: fn(String) -> OcrContent) -> Result<Self, LoadError> {
        Ok(Self {
            content: wrap(STANDARD.encode(std::fs::read(path)?)),
            source_path: path.to_string_lossy().into_owned(),
        })
    }
}

/// Either per-page text or one string with form feeds between pages.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcrReply {
    pages: Vec<OcrReplyPage>,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcrReplyPage {
    page: Option<u32>,
    text: String,
}

/// OCR delegated to a multimodal HTTP service that takes base64 content.
#[derive(Debug, Clone)]
pub struct HttpOcrEngine {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl HttpOcrEngine {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    /// Reads `LLM_OCR_ENDPOINT` and the optional `LLM_OCR_API_KEY`.
    pub fn from_env() -> Option<Self> {
        std::env::var("LLM_OCR_ENDPOINT")
            .ok()
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| Self::new(endpoint, std::env::var("LLM_OCR_API_KEY").ok()))
    }

    fn submit(&self, job: OcrJob) -> Result<String, LoadError> {
        let source = job.source_path.clone();
        let call = || -> Result<OcrReply, LoadError> {
            let mut builder = Client::new().post(&self.endpoint).json(&job);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }
            let response = builder.send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(LoadError::OcrFailed(format!(
                    "OCR service at {} answered {status} for {source}",
                    self.endpoint
                )));
            }
            Ok(response.json()?)
        };

        // Blocking reqwest must not run on an async worker thread.
        let reply = std::thread::scope(|scope| scope.spawn(call).join())
            .map_err(|_| LoadError::OcrFailed("OCR request thread panicked".to_string()))??;

        let pages = reply_pages(reply);
        if pages.is_empty() {
            return Err(LoadError::OcrFailed(format!("OCR service found no text in {source}")));
        }
        debug!(source = %source, pages = pages.len(), "remote OCR finished");
        Ok(pages
            .into_iter()
            .map(|page| page.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl OcrEngine for HttpOcrEngine {
    fn image_to_text(&self, path: &Path) -> Result<String, LoadError> {
        self.submit(OcrJob::read(path, OcrContent::ImageBase64)?)
    }

    fn pdf_to_text(&self, path: &Path) -> Result<String, LoadError> {
        self.submit(OcrJob::read(path, OcrContent::PdfBase64)?)
    }
}

/// Non-blank pages of a reply. Listed pages win; the form-feed text is used
/// only when no listed page carries text.
fn reply_pages(reply: OcrReply) -> Vec<PageText> {
    let listed: Vec<PageText> = reply
        .pages
        .into_iter()
        .zip(1u32..)
        .map(|(page, position)| PageText {
            number: page.page.unwrap_or(position),
            text: page.text.trim().to_string(),
        })
        .filter(|page| !page.text.is_empty())
        .collect();
    if !listed.is_empty() {
        return listed;
    }

    reply
        .text
        .unwrap_or_default()
        .split('\u{000c}')
        .zip(1u32..)
        .map(|(text, number)| PageText {
            number,
            text: text.trim().to_string(),
        })
        .filter(|page| !page.text.is_empty())
        .collect()
}
