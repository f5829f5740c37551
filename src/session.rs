//! One admission attempt: pull frames until the gate decides, the source
//! fails, or the caller cancels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use image::DynamicImage;
use log::{debug, info};
use thiserror::Error;

use crate::catalog::FaceCatalog;
use crate::gate::{Decision, GateParams, GateStatus, PresenceGate};
use crate::preview::Preview;
use crate::recognizer::Recognizer;

/// A captured frame and the instant it was taken.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: Instant,
}

/// Where frames come from. `release` is called exactly once when a session
/// ends, whatever the reason.
pub trait FrameSource {
    /// Block for the next frame; `Ok(None)` means the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Admitted { identities: Vec<String> },
    RejectedTimeout,
    /// Stopped through the cancellation flag before any decision.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("frame source ended before the gate reached a decision")]
    StreamEnded,
    #[error("frame capture failed: {0:#}")]
    Capture(anyhow::Error),
    #[error("face recognition failed: {0:#}")]
    Recognizer(anyhow::Error),
}

/// Releases the source and tears down the preview on every exit path.
struct Scoped<'a, S: FrameSource + ?Sized, P: Preview + ?Sized> {
    source: &'a mut S,
    preview: &'a mut P,
}

impl<S: FrameSource + ?Sized, P: Preview + ?Sized> Drop for Scoped<'_, S, P> {
    fn drop(&mut self) {
        self.preview.close();
        self.source.release();
    }
}

pub struct Session<'a> {
    catalog: &'a FaceCatalog,
    gate: PresenceGate,
    frames: u64,
    admitted: Vec<String>,
}

impl<'a> Session<'a> {
    pub fn new(catalog: &'a FaceCatalog, params: GateParams) -> Self {
        Self {
            catalog,
            gate: PresenceGate::new(params),
            frames: 0,
            admitted: Vec::new(),
        }
    }

    pub fn gate(&self) -> &PresenceGate {
        &self.gate
    }

    /// Frames processed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Identities recognized on the admitting frame, empty until admission.
    pub fn admitted(&self) -> &[String] {
        &self.admitted
    }

    /// Run until a terminal outcome. `cancelled` is polled once per frame,
    /// and again when capture fails, so an interrupt that lands while the
    /// source is blocked reports `Cancelled` rather than a capture error.
    ///
    /// The source and preview are released before this returns, including
    /// when the gate was already terminal.
    pub fn run<S, R, P>(
        &mut self,
        source: &mut S,
        recognizer: &mut R,
        preview: &mut P,
        cancelled: &AtomicBool,
    ) -> Result<SessionOutcome, SessionError>
    where
        S: FrameSource + ?Sized,
        R: Recognizer + ?Sized,
        P: Preview + ?Sized,
    {
        let mut scoped = Scoped { source, preview };

        match self.gate.status() {
            GateStatus::Waiting => {}
            GateStatus::Admitted => {
                return Ok(SessionOutcome::Admitted {
                    identities: self.admitted.clone(),
                })
            }
            GateStatus::RejectedTimeout => return Ok(SessionOutcome::RejectedTimeout),
        }

        let params = self.gate.params();
        info!(
            "waiting for a known face: hold {:?} to enter, giving up after {:?} without one",
            params.dwell, params.absence
        );

        loop {
            if cancelled.load(Ordering::SeqCst) {
                info!("session cancelled after {} frames", self.frames);
                return Ok(SessionOutcome::Cancelled);
            }

            let frame = match scoped.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(SessionError::StreamEnded),
                Err(_) if cancelled.load(Ordering::SeqCst) => {
                    info!("session cancelled while waiting for a frame");
                    return Ok(SessionOutcome::Cancelled);
                }
                Err(e) => return Err(SessionError::Capture(e)),
            };

            let observations = recognizer
                .observe(&frame.image)
                .map_err(SessionError::Recognizer)?;

            let was_present = self.gate.state().presence_started_at().is_some();
            let verdict = self
                .gate
                .process_frame(self.catalog, &observations, frame.captured_at);
            self.frames += 1;

            debug!(
                "frame {}: {} faces, recognized {:?}, {:?}",
                self.frames,
                observations.len(),
                verdict.recognized,
                verdict.decision
            );
            match (was_present, verdict.has_presence()) {
                (false, true) => info!("recognized {}", verdict.recognized.join(", ")),
                (true, false) => info!("known face lost, dwell timer reset"),
                _ => {}
            }

            if let Err(e) = scoped.preview.show(&frame, &observations, &verdict) {
                log::warn!("preview: {:#}", e);
            }

            match verdict.decision {
                Decision::Continue => {}
                Decision::Admit => {
                    info!("admitted: {}", verdict.recognized.join(", "));
                    self.admitted = verdict.recognized;
                    return Ok(SessionOutcome::Admitted {
                        identities: self.admitted.clone(),
                    });
                }
                Decision::Reject => {
                    info!("no known face for {:?}, rejecting", params.absence);
                    return Ok(SessionOutcome::RejectedTimeout);
                }
            }
        }
    }
}
