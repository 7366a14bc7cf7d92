//! Wire-level and session-level data types for the opstream engine.
//!
//! This crate is types-only: serde models for the event frames emitted by
//! the remote execution agent, plus the step/session/approval structures the
//! engine derives from them. All behavior lives in `opstream-core`.

mod approval;
mod frames;
mod steps;

pub use approval::ApprovalDecision;
pub use approval::ApprovalId;
pub use approval::ApprovalRequest;
pub use approval::ApprovalResolution;
pub use approval::ApprovalStatus;
pub use frames::CommandResult;
pub use frames::EventFrame;
pub use frames::FrameKind;
pub use frames::FrameMetadata;
pub use frames::HostInfo;
pub use steps::Session;
pub use steps::SessionStatus;
pub use steps::Step;
pub use steps::StepId;
pub use steps::StepKind;
pub use steps::StepMetadata;
pub use steps::StepStatus;
