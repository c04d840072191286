//! Terminal rendering of session events, plus the optional preview image.

use facecheck_core::{SessionEvent, SessionState, Verdict};
use std::io::{self, Write};
use std::path::PathBuf;

const BAR_WIDTH: usize = 20;

/// `[#########-----------]` with `confidence` in [0, 1] filled.
pub fn confidence_bar(confidence: f32, width: usize) -> String {
    let filled = if confidence.is_nan() {
        0
    } else {
        (confidence.clamp(0.0, 1.0) * width as f32).round() as usize
    };
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

/// Prints a status line per compared face and a line whenever the verdict changes.
pub struct TerminalRenderer<W: Write> {
    out: W,
    preview: Option<PathBuf>,
    last_verdict: Option<Verdict>,
    faces_seen: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, preview: Option<PathBuf>) -> Self {
        Self {
            out,
            preview,
            last_verdict: None,
            faces_seen: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_preview(&self, frame: &image::RgbImage) {
        let Some(path) = &self.preview else {
            return;
        };
        // Always PNG, whatever the path's extension says.
        if let Err(e) = frame.save_with_format(path, image::ImageFormat::Png) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write preview frame");
        }
    }

    fn render(&mut self, event: SessionEvent<'_>) -> io::Result<()> {
        match event {
            SessionEvent::Started => {
                writeln!(
                    self.out,
                    "Camera ready. Looking for a matching face (Ctrl+C to cancel)..."
                )?;
            }
            SessionEvent::Face(face) => {
                let verdict = face.decision.verdict;
                if self.last_verdict != Some(verdict) {
                    if self.faces_seen {
                        writeln!(self.out)?;
                    }
                    writeln!(self.out, "{}", verdict.status())?;
                }
                self.last_verdict = Some(verdict);
                self.faces_seen = true;
                write!(
                    self.out,
                    "\rframe {:>5}  {} {:.2}  distance {:.3}",
                    face.frame_index,
                    confidence_bar(face.decision.confidence, BAR_WIDTH),
                    face.decision.confidence,
                    face.decision.distance,
                )?;
            }
            SessionEvent::Frame { image, .. } => self.write_preview(image),
            SessionEvent::Finished(state) => {
                if self.faces_seen {
                    writeln!(self.out)?;
                }
                match state {
                    SessionState::Cancelled => writeln!(self.out, "Verification cancelled.")?,
                    SessionState::Expired => {
                        writeln!(self.out, "No matching face before the frame/time limit.")?
                    }
                    _ => {}
                }
            }
        }
        self.out.flush()
    }
}

impl<W: Write> facecheck_core::EventSink for TerminalRenderer<W> {
    fn handle(&mut self, event: SessionEvent<'_>) {
        if let Err(e) = self.render(event) {
            tracing::debug!(error = %e, "terminal write failed");
        }
    }
}
