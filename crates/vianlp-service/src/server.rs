//! Request loop over stdin/stdout
//!
//! Reads one JSON request per line and writes one JSON response per line.
//! A bad request produces an error line and the loop keeps going; only EOF
//! or a failed write ends it.

use crate::protocol::{ExtractionWire, Request, Response};
use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::time::Instant;
use vianlp_core::Extractor;

/// Counters for one run of the request loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub requests: u64,
    pub errors: u64,
}

/// Line-delimited JSON server around an [`Extractor`]
pub struct Server {
    extractor: Extractor,
    handled: u64,
}

impl Server {
    pub fn new(extractor: Extractor) -> Self {
        Self {
            extractor,
            handled: 0,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Serve requests until EOF
    pub fn serve<R: BufRead, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> Result<ServeStats> {
        let mut stats = ServeStats::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .context("Failed to read request line")?;
            if n == 0 {
                break;
            }

            // Invalid UTF-8 becomes a JSON parse error, not a fatal read error
            let line = String::from_utf8_lossy(&buf);
            if line.trim().is_empty() {
                continue;
            }

            let response = self.handle_line(&line);
            stats.requests += 1;
            if response.is_error() {
                stats.errors += 1;
            }
            write_response(&mut writer, &response)?;
        }

        tracing::info!(
            requests = stats.requests,
            errors = stats.errors,
            "Input closed, stopping"
        );
        Ok(stats)
    }

    /// Parse and process one request line
    pub fn handle_line(&mut self, line: &str) -> Response {
        self.handled += 1;
        let seq = self.handled;

        let request: Request = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(seq, "Invalid request: {}", e);
                return Response::error(format!("Invalid request: {e}"), None);
            }
        };

        let started = Instant::now();
        match self.extractor.process_base64(&request.content) {
            Ok(analysis) => {
                tracing::info!(
                    seq,
                    payload_chars = request.content.len(),
                    pages = analysis.page_count,
                    entities = analysis.entities.len(),
                    matches = analysis.matches.len(),
                    tables = analysis.tables.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request processed"
                );
                Response::Extraction(ExtractionWire::from_analysis(analysis, request.id))
            }
            Err(e) => {
                tracing::error!(seq, "Error processing request: {:#}", e);
                Response::error(format!("Error processing request: {e:#}"), request.id)
            }
        }
    }

    /// Write a lifecycle notice
    pub fn announce<W: Write>(writer: &mut W, message: &str) -> Result<()> {
        write_response(writer, &Response::message(message))
    }
}

/// Serialize one response as a line and flush it
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let response_json = serde_json::to_string(response)?;
    writer
        .write_all(response_json.as_bytes())
        .context("Failed to write response")?;
    writer.write_all(b"\n").context("Failed to write response")?;
    writer.flush().context("Failed to flush response")?;
    Ok(())
}
