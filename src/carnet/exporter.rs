//! PDF stage: hands the card document to headless Chromium.
//!
//! Every robustness knob lives in [`PdfExportOptions`]; the exporter itself is
//! behind the [`PdfExporter`] trait so tests can swap in a fake.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::renderer::HtmlDocument;
use super::CarnetError;
use crate::metrics::{InFlightGuard, CARNET_EXPORT_SECONDS};

const DISMISS_DIALOGS_SCRIPT: &str = "<script>window.alert=function(){};window.confirm=function(){return true;};window.prompt=function(){return null;};window.print=function(){};window.onbeforeunload=null;</script>";
const STDERR_TAIL: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    A4,
    Letter,
}

impl PageFormat {
    fn css_size(self) -> &'static str {
        match self {
            PageFormat::A4 => "A4",
            PageFormat::Letter => "letter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top_mm: f32,
    pub right_mm: f32,
    pub bottom_mm: f32,
    pub left_mm: f32,
}

impl Margins {
    pub const ZERO: Margins = Margins {
        top_mm: 0.0,
        right_mm: 0.0,
        bottom_mm: 0.0,
        left_mm: 0.0,
    };
}

/// Fixed export configuration. Cards are laid out edge to edge by the
/// template, so margins default to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfExportOptions {
    pub timeout: Duration,
    pub disable_sandbox: bool,
    pub disable_gpu: bool,
    pub disable_dev_shm: bool,
    pub dismiss_dialogs: bool,
    pub page_format: PageFormat,
    pub margins: Margins,
    pub print_background: bool,
}

impl Default for PdfExportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            disable_sandbox: true,
            disable_gpu: true,
            disable_dev_shm: true,
            dismiss_dialogs: true,
            page_format: PageFormat::A4,
            margins: Margins::ZERO,
            print_background: true,
        }
    }
}

impl PdfExportOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line for one headless Chromium print.
    pub fn chromium_args(&self, html: &Path, output: &Path, profile_dir: &Path) -> Vec<String> {
        let mut args = vec!["--headless=new".to_string()];
        if self.disable_sandbox {
            args.push("--no-sandbox".to_string());
        }
        if self.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if self.disable_dev_shm {
            args.push("--disable-dev-shm-usage".to_string());
        }
        args.extend(
            [
                "--disable-extensions",
                "--no-first-run",
                "--no-default-browser-check",
                "--mute-audio",
                "--hide-scrollbars",
                "--run-all-compositor-stages-before-draw",
                "--virtual-time-budget=15000",
                "--no-pdf-header-footer",
            ]
            .map(String::from),
        );
        args.push(format!("--user-data-dir={}", profile_dir.display()));
        args.push(format!("--print-to-pdf={}", output.display()));
        args.push(format!("file://{}", html.display()));
        args
    }

    /// Inject page geometry, background printing, and dialog suppression
    /// ahead of any document content.
    pub fn prepare_html(&self, html: &str) -> String {
        let m = &self.margins;
        let mut injected = format!(
            "<style>@page {{ size: {}; margin: {}mm {}mm {}mm {}mm; }}</style>",
            self.page_format.css_size(),
            m.top_mm,
            m.right_mm,
            m.bottom_mm,
            m.left_mm
        );
        if self.print_background {
            injected.push_str(
                "<style>* { -webkit-print-color-adjust: exact !important; print-color-adjust: exact !important; }</style>",
            );
        }
        if self.dismiss_dialogs {
            injected.push_str(DISMISS_DIALOGS_SCRIPT);
        }

        match html.find("<head>") {
            Some(index) => {
                let at = index + "<head>".len();
                format!("{}{}{}", &html[..at], injected, &html[at..])
            }
            None => format!("{}{}", injected, html),
        }
    }
}

/// A complete PDF starts with the `%PDF-` header and carries an `%%EOF`
/// marker near its end.
pub fn is_complete_pdf(bytes: &[u8]) -> bool {
    if !bytes.starts_with(b"%PDF-") {
        return false;
    }
    let tail_start = bytes.len().saturating_sub(1024);
    bytes[tail_start..].windows(5).any(|w| w == b"%%EOF")
}

#[async_trait]
pub trait PdfExporter: Send + Sync {
    /// Convert the document to PDF bytes. Either the full PDF or an error;
    /// never partial output.
    async fn export(&self, document: &HtmlDocument) -> Result<Vec<u8>, CarnetError>;
}

/// Runs a headless Chromium binary per export.
pub struct ChromiumExporter {
    binary: PathBuf,
    options: PdfExportOptions,
}

impl ChromiumExporter {
    pub fn new(binary: impl Into<PathBuf>, options: PdfExportOptions) -> Self {
        Self {
            binary: binary.into(),
            options,
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

#[async_trait]
impl PdfExporter for ChromiumExporter {
    async fn export(&self, document: &HtmlDocument) -> Result<Vec<u8>, CarnetError> {
        let started = Instant::now();

        // Dropped on every return path, removing the HTML copy, profile, and PDF.
        let workdir = tempdir().map_err(|e| {
            CarnetError::ExportFailure(format!("failed to create temporary directory: {}", e))
        })?;
        let html_path = workdir.path().join("carnets.html");
        let output_path = workdir.path().join("carnets.pdf");
        let profile_dir = workdir.path().join("profile");

        tokio::fs::write(&html_path, self.options.prepare_html(&document.html))
            .await
            .map_err(|e| CarnetError::ExportFailure(format!("failed to stage HTML: {}", e)))?;

        let child = Command::new(&self.binary)
            .args(self.options.chromium_args(&html_path, &output_path, &profile_dir))
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CarnetError::ExportFailure(format!(
                    "failed to start {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        // On timeout the child is dropped and killed.
        let output = match tokio::time::timeout(self.options.timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| {
                CarnetError::ExportFailure(format!("failed to wait for Chromium: {}", e))
            })?,
            Err(_) => {
                log::warn!(
                    "Chromium export of {} exceeded {:?}, killed",
                    document.path,
                    self.options.timeout
                );
                return Err(CarnetError::RenderTimeout(self.options.timeout));
            }
        };

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(CarnetError::ExportFailure(format!(
                "Chromium exited with status {}: {}",
                code,
                stderr_tail(&output.stderr)
            )));
        }

        let pdf = tokio::fs::read(&output_path).await.map_err(|e| {
            CarnetError::ExportFailure(format!("Chromium produced no PDF: {}", e))
        })?;

        if !is_complete_pdf(&pdf) {
            return Err(CarnetError::ExportFailure(format!(
                "Chromium produced an incomplete PDF ({} bytes)",
                pdf.len()
            )));
        }

        let elapsed = started.elapsed();
        CARNET_EXPORT_SECONDS.observe(elapsed.as_secs_f64());
        log::info!(
            "Exported {} carnets from {} to PDF ({} bytes) in {:.1}s",
            document.cards,
            document.path,
            pdf.len(),
            elapsed.as_secs_f64()
        );

        Ok(pdf)
    }
}

/// Caps concurrent exports across every transport and tenant. Each Chromium
/// process can take up to ~2GB, so the slot count is sized to memory.
///
/// Waiting for a slot is bounded: a caller that cannot get one within `wait`
/// fails with `RenderTimeout` instead of queueing indefinitely.
pub struct ExportSlots {
    permits: Arc<Semaphore>,
    wait: Duration,
}

/// A held export slot; released on drop.
pub struct ExportSlot {
    _permit: OwnedSemaphorePermit,
    _in_flight: InFlightGuard,
}

impl ExportSlots {
    pub fn new(max_concurrent: usize, wait: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            wait,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(&self) -> Result<ExportSlot, CarnetError> {
        match tokio::time::timeout(self.wait, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(ExportSlot {
                _permit: permit,
                _in_flight: InFlightGuard::enter(),
            }),
            Ok(Err(_)) => Err(CarnetError::ExportFailure(
                "export pool is shut down".to_string(),
            )),
            Err(_) => {
                log::warn!("No export slot became free within {:?}", self.wait);
                Err(CarnetError::RenderTimeout(self.wait))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_server_safe() {
        let options = PdfExportOptions::default();
        let args = options.chromium_args(
            Path::new("/tmp/x/carnets.html"),
            Path::new("/tmp/x/carnets.pdf"),
            Path::new("/tmp/x/profile"),
        );
        for flag in ["--headless=new", "--no-sandbox", "--disable-gpu", "--disable-dev-shm-usage"] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert!(args.contains(&"--print-to-pdf=/tmp/x/carnets.pdf".to_string()));
        assert_eq!(args.last().unwrap(), "file:///tmp/x/carnets.html");
    }

    #[test]
    fn test_sandbox_flag_follows_option() {
        let options = PdfExportOptions {
            disable_sandbox: false,
            ..PdfExportOptions::default()
        };
        let args = options.chromium_args(Path::new("a"), Path::new("b"), Path::new("c"));
        assert!(!args.iter().any(|a| a == "--no-sandbox"));
    }

    #[test]
    fn test_prepare_html_injects_after_head() {
        let options = PdfExportOptions::default();
        let html = options.prepare_html("<html><head><title>x</title></head><body></body></html>");
        let head = html.find("<head>").unwrap();
        let page = html.find("@page { size: A4; margin: 0mm 0mm 0mm 0mm; }").unwrap();
        let script = html.find("window.alert=function(){}").unwrap();
        let title = html.find("<title>").unwrap();
        assert!(head < page && page < script && script < title);
        assert!(html.contains("print-color-adjust: exact"));
    }

    #[test]
    fn test_prepare_html_without_dialog_suppression() {
        let options = PdfExportOptions {
            dismiss_dialogs: false,
            print_background: false,
            page_format: PageFormat::Letter,
            ..PdfExportOptions::default()
        };
        let html = options.prepare_html("<p>no head</p>");
        assert!(html.starts_with("<style>@page { size: letter;"));
        assert!(!html.contains("<script>"));
        assert!(!html.contains("print-color-adjust"));
    }

    #[test]
    fn test_pdf_completeness_check() {
        assert!(is_complete_pdf(b"%PDF-1.7\n1 0 obj\n%%EOF\n"));
        assert!(!is_complete_pdf(b"%PDF-1.7\n1 0 obj\n"));
        assert!(!is_complete_pdf(b"<html>%%EOF"));
        assert!(!is_complete_pdf(b""));
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(2000) + "fatal: boom";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.ends_with("fatal: boom"));
        assert!(tail.chars().count() <= STDERR_TAIL + 1);
    }

    #[tokio::test]
    async fn test_slots_release_on_drop() {
        let slots = ExportSlots::new(2, Duration::from_millis(50));
        let first = slots.acquire().await.unwrap();
        let _second = slots.acquire().await.unwrap();
        assert_eq!(slots.available(), 0);

        drop(first);
        assert_eq!(slots.available(), 1);
    }

    #[tokio::test]
    async fn test_waiting_for_a_slot_times_out() {
        let slots = ExportSlots::new(1, Duration::from_millis(30));
        let _held = slots.acquire().await.unwrap();

        match slots.acquire().await {
            Err(CarnetError::RenderTimeout(wait)) => assert_eq!(wait, Duration::from_millis(30)),
            other => panic!("expected a timeout, got {:?}", other.map(|_| ())),
        }
    }
}
