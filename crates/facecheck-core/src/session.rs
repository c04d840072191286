//! Live matcher loop.
//!
//! A [`VerificationSession`] owns the reference face and runs the capture →
//! detect → embed → compare loop until the first match, a camera failure,
//! cancellation, or a configured frame/time bound. Progress is reported as
//! [`SessionEvent`]s to an [`EventSink`]; the loop itself knows nothing about
//! how results are displayed.
//!
//! The camera is opened at loop start and owned by the loop's stack frame, so
//! it is dropped (released) exactly once whichever way the loop exits.

use crate::analyzer::FaceAnalyzer;
use crate::annotate;
use crate::detector::DetectorMode;
use crate::matcher::{DistanceMatcher, MatchDecision, Matcher};
use crate::reference::ReferenceFace;
use crate::types::FaceRegion;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Open(String),
    #[error("frame read failed: {0}")]
    Read(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to access camera: {0}")]
    CameraAccessFailure(#[source] CaptureError),
    #[error("session already finished in state {0:?}")]
    AlreadyFinished(SessionState),
}

/// A stream of RGB frames. Dropping the source releases the device.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Acquires a [`FrameSource`] when a session starts.
pub trait CameraOpener {
    type Source: FrameSource;

    fn open(&mut self) -> Result<Self::Source, CaptureError>;
}

impl<F, S> CameraOpener for F
where
    F: FnMut() -> Result<S, CaptureError>,
    S: FrameSource,
{
    type Source = S;

    fn open(&mut self) -> Result<S, CaptureError> {
        self()
    }
}

/// Shared cancellation flag, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Matched,
    Failed,
    Cancelled,
    Expired,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        *self != SessionState::Running
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Detector mode for live frames.
    pub live_detector: DetectorMode,
    /// Frames read and discarded after opening the camera, while exposure settles.
    pub warmup_frames: usize,
    /// Stop after this many analysed frames. `None` = unbounded.
    pub max_frames: Option<u64>,
    /// Stop after this much wall-clock time. `None` = unbounded.
    pub timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            live_detector: DetectorMode::LowLatency,
            warmup_frames: 0,
            max_frames: None,
            timeout: None,
        }
    }
}

/// One live face compared against the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    /// Zero-based index of the analysed frame (warm-up frames are not counted).
    pub frame_index: u64,
    /// Position of the face in detector order within its frame.
    pub face_index: usize,
    pub region: FaceRegion,
    pub decision: MatchDecision,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Matched(MatchEvent),
    Cancelled { frames: u64 },
    Expired { frames: u64 },
}

#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// Camera opened; matching is about to begin.
    Started,
    /// A face in the current frame was compared.
    Face(&'a MatchEvent),
    /// The frame, with any annotations, is ready for display.
    Frame { index: u64, image: &'a RgbImage },
    /// The session reached a terminal state.
    Finished(SessionState),
}

/// Consumer of session events (a renderer, a logger, a test recorder).
pub trait EventSink {
    fn handle(&mut self, event: SessionEvent<'_>);
}

impl<F> EventSink for F
where
    F: FnMut(SessionEvent<'_>),
{
    fn handle(&mut self, event: SessionEvent<'_>) {
        self(event)
    }
}

/// One verification attempt against a fixed reference face.
pub struct VerificationSession<M: Matcher = DistanceMatcher> {
    reference: ReferenceFace,
    matcher: M,
    config: SessionConfig,
    state: SessionState,
}

impl<M: Matcher> VerificationSession<M> {
    pub fn new(reference: ReferenceFace, matcher: M, config: SessionConfig) -> Self {
        Self {
            reference,
            matcher,
            config,
            state: SessionState::Running,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reference(&self) -> &ReferenceFace {
        &self.reference
    }

    /// Run the loop to a terminal state. A session runs at most once.
    pub fn run<O, A, S>(
        &mut self,
        opener: &mut O,
        analyzer: &mut A,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<SessionOutcome, SessionError>
    where
        O: CameraOpener + ?Sized,
        A: FaceAnalyzer + ?Sized,
        S: EventSink + ?Sized,
    {
        if self.state.is_terminal() {
            return Err(SessionError::AlreadyFinished(self.state));
        }

        let result = self.drive(opener, analyzer, sink, cancel);

        self.state = match &result {
            Ok(SessionOutcome::Matched(_)) => SessionState::Matched,
            Ok(SessionOutcome::Cancelled { .. }) => SessionState::Cancelled,
            Ok(SessionOutcome::Expired { .. }) => SessionState::Expired,
            Err(_) => SessionState::Failed,
        };

        match &result {
            Ok(outcome) => tracing::info!(state = ?self.state, ?outcome, "verification session finished"),
            Err(e) => tracing::warn!(state = ?self.state, error = %e, "verification session failed"),
        }
        sink.handle(SessionEvent::Finished(self.state));

        result
    }

    fn drive<O, A, S>(
        &self,
        opener: &mut O,
        analyzer: &mut A,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<SessionOutcome, SessionError>
    where
        O: CameraOpener + ?Sized,
        A: FaceAnalyzer + ?Sized,
        S: EventSink + ?Sized,
    {
        let mut camera = opener.open().map_err(SessionError::CameraAccessFailure)?;
        tracing::info!(
            live_detector = ?self.config.live_detector,
            max_frames = ?self.config.max_frames,
            timeout = ?self.config.timeout,
            "camera opened; verification started"
        );
        sink.handle(SessionEvent::Started);

        for _ in 0..self.config.warmup_frames {
            camera.next_frame().map_err(SessionError::CameraAccessFailure)?;
        }
        if self.config.warmup_frames > 0 {
            tracing::debug!(count = self.config.warmup_frames, "discarded warmup frames");
        }

        let started = Instant::now();
        let mut frames: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled { frames });
            }
            let frames_exhausted = self.config.max_frames.is_some_and(|max| frames >= max);
            let time_exhausted = self.config.timeout.is_some_and(|t| started.elapsed() >= t);
            if frames_exhausted || time_exhausted {
                return Ok(SessionOutcome::Expired { frames });
            }

            let mut frame = camera.next_frame().map_err(SessionError::CameraAccessFailure)?;
            let index = frames;
            frames += 1;

            let matched = self.process_frame(index, &mut frame, analyzer, sink);
            sink.handle(SessionEvent::Frame {
                index,
                image: &frame,
            });

            if let Some(event) = matched {
                return Ok(SessionOutcome::Matched(event));
            }
        }
    }

    /// Compare every face in `frame` in detector order, stopping at the first match.
    ///
    /// Annotations are painted after all comparisons so that one face's box
    /// never bleeds into the next face's embedding crop.
    fn process_frame<A, S>(
        &self,
        index: u64,
        frame: &mut RgbImage,
        analyzer: &mut A,
        sink: &mut S,
    ) -> Option<MatchEvent>
    where
        A: FaceAnalyzer + ?Sized,
        S: EventSink + ?Sized,
    {
        let faces = match analyzer.detect(frame, self.config.live_detector) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(frame = index, error = %e, "face detection failed; skipping frame");
                return None;
            }
        };
        tracing::debug!(frame = index, faces = faces.len(), "frame analysed");

        let mut compared = Vec::with_capacity(faces.len());
        let mut matched = None;

        for (face_index, face) in faces.iter().enumerate() {
            let embedding = match analyzer.embed(frame, face) {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(frame = index, face = face_index, error = %e, "embedding failed; skipping face");
                    continue;
                }
            };

            let decision = self.matcher.compare(self.reference.embedding(), &embedding);
            let event = MatchEvent {
                frame_index: index,
                face_index,
                region: FaceRegion::from_bbox(face, frame.width(), frame.height()),
                decision,
            };
            tracing::debug!(
                frame = index,
                face = face_index,
                distance = decision.distance,
                matched = decision.matched,
                "face compared"
            );
            sink.handle(SessionEvent::Face(&event));
            compared.push(event);

            if decision.matched {
                matched = compared.last().cloned();
                break;
            }
        }

        for event in &compared {
            annotate::annotate_face(frame, &event.region, &event.decision);
        }

        matched
    }
}
