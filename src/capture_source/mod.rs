//! CaptureSource - Blocking Frame Sources
//!
//! ## Responsibilities
//!
//! - `VideoSource` contract used by the capture worker (open / read / release)
//! - RTSP capture through a long-running ffmpeg process emitting MJPEG
//! - Splitting the MJPEG byte stream into individual JPEG frames
//!
//! Sources are owned by exactly one worker thread and block on reads.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

/// Default ffmpeg socket I/O timeout
const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

/// Give up on a frame that never terminates
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// One decoded-on-demand frame (JPEG bytes)
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    /// Sequence number since the source was created
    pub index: u64,
}

/// Sequential, blocking frame source
pub trait VideoSource: Send {
    /// Open the underlying stream; on error nothing stays open
    fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Next frame; `StreamInterrupted` when the stream broke
    fn read(&mut self) -> Result<Frame>;

    /// Close the handle; safe to call when already closed
    fn release(&mut self);
}

/// Incremental splitter for concatenated JPEG images
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete image, dropping any bytes before its SOI marker
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = match find_marker(&self.buf, SOI, 0) {
            Some(start) => start,
            None => {
                // keep a trailing 0xFF, it may be the first half of an SOI
                let keep_from = match self.buf.last() {
                    Some(0xFF) => self.buf.len() - 1,
                    _ => self.buf.len(),
                };
                self.buf.drain(..keep_from);
                return None;
            }
        };
        if start > 0 {
            self.buf.drain(..start);
        }

        match find_marker(&self.buf, EOI, SOI.len()) {
            Some(end) => Some(self.buf.drain(..end + EOI.len()).collect()),
            None => {
                if self.buf.len() > MAX_FRAME_BYTES {
                    tracing::warn!(buffered = self.buf.len(), "Unterminated frame discarded");
                    self.buf.clear();
                }
                None
            }
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn ffmpeg_args(url: &str, io_timeout: Duration) -> Vec<String> {
    // -timeout is in microseconds for the rtsp demuxer
    let timeout_us = io_timeout.as_micros().to_string();
    [
        "-rtsp_transport", "tcp",
        "-timeout", timeout_us.as_str(),
        "-i", url,
        "-f", "image2pipe",
        "-vcodec", "mjpeg",
        "-q:v", "5",
        "-loglevel", "error",
        "-",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect()
}

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// RTSP source backed by `ffmpeg -f image2pipe -vcodec mjpeg`
pub struct FfmpegSource {
    url: String,
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    splitter: MjpegSplitter,
    /// First frame, read while opening to prove the stream works
    pending: Option<Frame>,
    next_index: u64,
}

impl FfmpegSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, io_timeout: Duration) -> Self {
        let url = url.into();
        let args = ffmpeg_args(&url, io_timeout);
        Self::with_command(url, "ffmpeg", args)
    }

    /// Any program that writes concatenated JPEGs to stdout
    pub fn with_command(url: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            url: url.into(),
            program: program.into(),
            args,
            child: None,
            stdout: None,
            splitter: MjpegSplitter::new(),
            pending: None,
            next_index: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::StreamInterrupted("stream not open".to_string()))?;

        let mut chunk = [0u8; 64 * 1024];
        loop {
            if let Some(jpeg) = self.splitter.next_frame() {
                return Ok(jpeg);
            }
            let n = stdout
                .read(&mut chunk)
                .map_err(|e| Error::StreamInterrupted(format!("capture read failed: {}", e)))?;
            if n == 0 {
                return Err(Error::StreamInterrupted("capture output ended".to_string()));
            }
            self.splitter.push(&chunk[..n]);
        }
    }

    fn make_frame(&mut self, data: Vec<u8>) -> Frame {
        let frame = Frame {
            data,
            captured_at: Utc::now(),
            index: self.next_index,
        };
        self.next_index += 1;
        frame
    }
}

impl VideoSource for FfmpegSource {
    fn open(&mut self) -> Result<()> {
        self.release();

        let mut child = self
            .spawn()
            .map_err(|e| Error::StreamUnavailable(format!("{} spawn failed: {}", self.program, e)))?;
        self.stdout = child.stdout.take();
        self.child = Some(child);

        match self.next_jpeg() {
            Ok(jpeg) => {
                let frame = self.make_frame(jpeg);
                tracing::info!(url = %self.url, size = frame.data.len(), "Stream opened");
                self.pending = Some(frame);
                Ok(())
            }
            Err(e) => {
                self.release();
                Err(Error::StreamUnavailable(format!("{}: {}", self.url, e)))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.child.is_some()
    }

    fn read(&mut self) -> Result<Frame> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        let jpeg = self.next_jpeg()?;
        Ok(self.make_frame(jpeg))
    }

    fn release(&mut self) {
        self.stdout = None;
        self.pending = None;
        self.splitter.clear();
        if let Some(mut child) = self.child.take() {
            // kill fails only when the process already exited; wait reaps it either way
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(url = %self.url, program = %self.program, "Capture process released");
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}
