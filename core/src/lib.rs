//! Streaming execution-session engine.
//!
//! Consumes the line-framed JSON event stream of a remote command-execution
//! agent and maintains a structured, displayable session: classified steps,
//! progress, pending command approvals, and a flattened transcript that can
//! be reconstructed later for history display.
//!
//! The pipeline is `FrameDecoder` -> `StepClassifier` -> `SessionTracker`,
//! driven by [`stream::drive_session`]; approval handshake frames are routed
//! to the [`approval::ApprovalCoordinator`] instead of becoming steps.

pub mod approval;
pub mod auth;
pub mod classify;
pub mod config;
pub mod decoder;
pub mod error;
pub mod session;
pub mod store;
pub mod stream;
pub mod summary;
pub mod transcript;

pub use approval::ApprovalCoordinator;
pub use auth::AuthGate;
pub use auth::UserId;
pub use classify::StepClassifier;
pub use classify::StepEvent;
pub use config::EngineConfig;
pub use decoder::DecodedFrame;
pub use decoder::FrameDecoder;
pub use error::EngineError;
pub use error::SummaryError;
pub use session::SessionOutcome;
pub use session::SessionTracker;
pub use store::MemorySessionStore;
pub use store::SessionStore;
pub use stream::SessionReport;
pub use stream::SessionRunner;
pub use stream::drive_session;
pub use summary::Summarizer;
