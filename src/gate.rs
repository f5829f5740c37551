//! Admission state machine.
//!
//! Two mutually exclusive clocks drive the decision: the presence clock runs
//! while every frame contains a recognized face and admits once it reaches
//! the dwell time; the absence clock runs while no frame does and rejects once
//! it reaches the absence limit. A single frame of the other kind resets the
//! running clock to zero.

use std::time::{Duration, Instant};

use crate::catalog::{FaceCatalog, MatchResult};
use crate::recognizer::FaceObservation;

pub const DEFAULT_DWELL: Duration = Duration::from_secs(10);
pub const DEFAULT_ABSENCE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateParams {
    /// Continuous presence required to admit.
    pub dwell: Duration,
    /// Continuous absence that rejects the attempt.
    pub absence: Duration,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            dwell: DEFAULT_DWELL,
            absence: DEFAULT_ABSENCE,
        }
    }
}

/// Timer state carried from frame to frame. At most one clock is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateState {
    presence_started_at: Option<Instant>,
    absence_started_at: Option<Instant>,
}

impl GateState {
    pub fn presence_started_at(&self) -> Option<Instant> {
        self.presence_started_at
    }

    pub fn absence_started_at(&self) -> Option<Instant> {
        self.absence_started_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Waiting,
    Admitted,
    RejectedTimeout,
}

impl GateStatus {
    pub fn is_terminal(self) -> bool {
        self != GateStatus::Waiting
    }
}

/// What the caller should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Admit,
    Reject,
}

/// Per-frame result: the decision plus what a renderer needs to annotate
/// the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameVerdict {
    pub decision: Decision,
    /// One entry per observation, in the same order.
    pub matches: Vec<MatchResult>,
    /// Recognized identities, each listed once.
    pub recognized: Vec<String>,
    /// Time on the presence clock, when it is running.
    pub dwell_elapsed: Option<Duration>,
    /// Time left until admission, when the presence clock is running.
    pub dwell_remaining: Option<Duration>,
}

impl FrameVerdict {
    pub fn has_presence(&self) -> bool {
        !self.recognized.is_empty()
    }

    /// Fraction of the dwell time completed, 0.0..=1.0.
    pub fn dwell_progress(&self) -> Option<f32> {
        let elapsed = self.dwell_elapsed?;
        let total = elapsed + self.dwell_remaining.unwrap_or_default();
        if total.is_zero() {
            return Some(1.0);
        }
        Some((elapsed.as_secs_f32() / total.as_secs_f32()).min(1.0))
    }
}

#[derive(Debug, Clone)]
pub struct PresenceGate {
    params: GateParams,
    state: GateState,
    status: GateStatus,
}

impl PresenceGate {
    pub fn new(params: GateParams) -> Self {
        Self {
            params,
            state: GateState::default(),
            status: GateStatus::Waiting,
        }
    }

    pub fn params(&self) -> GateParams {
        self.params
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn status(&self) -> GateStatus {
        self.status
    }

    /// Match every observation in the frame and fold the result into the
    /// clocks. Once the gate is terminal the state is left untouched and the
    /// terminal decision is repeated.
    pub fn process_frame(
        &mut self,
        catalog: &FaceCatalog,
        observations: &[FaceObservation],
        now: Instant,
    ) -> FrameVerdict {
        let matches: Vec<MatchResult> = observations
            .iter()
            .map(|obs| catalog.match_observation(obs))
            .collect();

        let mut recognized: Vec<String> = Vec::new();
        for name in matches.iter().filter_map(|m| m.identity.as_ref()) {
            if !recognized.contains(name) {
                recognized.push(name.clone());
            }
        }

        let decision = self.advance(!recognized.is_empty(), now);
        let dwell_elapsed = self.dwell_elapsed(now);

        FrameVerdict {
            decision,
            matches,
            recognized,
            dwell_elapsed,
            dwell_remaining: dwell_elapsed.map(|e| self.params.dwell.saturating_sub(e)),
        }
    }

    /// Advance the clocks by one frame.
    pub fn advance(&mut self, has_presence: bool, now: Instant) -> Decision {
        if self.status.is_terminal() {
            return self.decision();
        }

        if has_presence {
            self.state.absence_started_at = None;
            match self.state.presence_started_at {
                None => self.state.presence_started_at = Some(now),
                Some(start) => {
                    if now.saturating_duration_since(start) >= self.params.dwell {
                        self.status = GateStatus::Admitted;
                    }
                }
            }
        } else {
            self.state.presence_started_at = None;
            match self.state.absence_started_at {
                None => self.state.absence_started_at = Some(now),
                Some(start) => {
                    if now.saturating_duration_since(start) >= self.params.absence {
                        self.status = GateStatus::RejectedTimeout;
                    }
                }
            }
        }

        self.decision()
    }

    fn decision(&self) -> Decision {
        match self.status {
            GateStatus::Waiting => Decision::Continue,
            GateStatus::Admitted => Decision::Admit,
            GateStatus::RejectedTimeout => Decision::Reject,
        }
    }

    fn dwell_elapsed(&self, now: Instant) -> Option<Duration> {
        self.state
            .presence_started_at
            .map(|start| now.saturating_duration_since(start))
    }
}
