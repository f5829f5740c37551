pub mod catalog;
pub mod config;
pub mod gate;
pub mod overlay;
pub mod preview;
pub mod recognizer;
pub mod session;
pub mod source;

pub use catalog::{FaceCatalog, KnownIdentity, MatchResult};
pub use gate::{Decision, FrameVerdict, GateParams, GateState, GateStatus, PresenceGate};
pub use recognizer::{BoundingBox, FaceObservation, Recognizer};
pub use session::{Frame, FrameSource, Session, SessionError, SessionOutcome};

// Re-export vision types for convenience
pub use facegate_vision::{Embedding, Pipeline};
