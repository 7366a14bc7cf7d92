//! Mutable kernel of a live session: applies step events, keeps progress
//! monotone, and drives the session to a terminal state.

use chrono::Utc;
use opstream_protocol::Session;
use opstream_protocol::SessionStatus;
use opstream_protocol::Step;
use opstream_protocol::StepId;
use opstream_protocol::StepKind;
use opstream_protocol::StepStatus;

use crate::classify::StepEvent;

/// Terminal disposition for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Failed,
}

/// Owns one [`Session`] and mutates it in response to classified step
/// events.
///
/// Invariants held here:
/// - terminal step statuses are never demoted;
/// - `progress` never decreases while streaming and is pinned to 100 by
///   `finalize`;
/// - an issued command stays `in_progress` until its completion event
///   arrives, no matter what streams in between.
#[derive(Debug)]
pub struct SessionTracker {
    session: Session,
    /// Command step awaiting its second, result-bearing occurrence.
    open_command: Option<StepId>,
    finalized: bool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::from_session(Session::new())
    }

    pub fn with_session_id(id: impl Into<String>) -> Self {
        Self::from_session(Session::with_id(id))
    }

    fn from_session(session: Session) -> Self {
        Self {
            session,
            open_command: None,
            finalized: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Outcome the session would finalize with right now.
    pub fn outcome_from_steps(&self) -> SessionOutcome {
        if self.session.any_failed() {
            SessionOutcome::Failed
        } else {
            SessionOutcome::Completed
        }
    }

    /// Append a new step or merge a command completion into the open
    /// command step.
    pub fn apply(&mut self, event: StepEvent) {
        if self.finalized {
            tracing::warn!(session_id = %self.session.id, "step event after finalize ignored");
            return;
        }
        match event {
            StepEvent::Started(step) => {
                self.handoff();
                self.push_step(step, false);
            }
            StepEvent::CommandIssued(step) => {
                self.handoff();
                self.push_step(step, true);
            }
            StepEvent::CommandCompleted { result } => {
                let Some(id) = self.open_command.take() else {
                    tracing::warn!(
                        session_id = %self.session.id,
                        "command result arrived with no open command"
                    );
                    return;
                };
                let Some(step) = self.session.steps.iter_mut().find(|step| step.id == id) else {
                    return;
                };
                if step.status.is_terminal() {
                    tracing::warn!(step_id = id, "open command already terminal, not demoting");
                } else {
                    let failed = result.is_failure();
                    step.status = if failed {
                        StepStatus::Failed
                    } else {
                        StepStatus::Completed
                    };
                    step.metadata.exit_code = Some(i32::from(failed));
                    let elapsed = Utc::now().signed_duration_since(step.timestamp);
                    step.metadata.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
                    self.session.current_step_id = Some(id);
                }
            }
        }
        self.recompute();
    }

    fn push_step(&mut self, step: Step, opens_command: bool) {
        let id = step.id;
        self.session.steps.push(step);
        self.session.current_step_id = Some(id);
        if opens_command {
            self.open_command = Some(id);
        }
    }

    /// A new step arriving completes every earlier non-terminal step, except
    /// a command still waiting for its result.
    fn handoff(&mut self) {
        let open = self.open_command;
        for step in &mut self.session.steps {
            if Some(step.id) != open && !step.status.is_terminal() {
                step.status = StepStatus::Completed;
            }
        }
    }

    fn recompute(&mut self) {
        self.session.total_steps = self.session.steps.len();
        let total = self.session.total_steps;
        let computed = if total > 0 {
            ((self.session.terminal_steps() * 100) as f64 / total as f64).round() as u8
        } else {
            0
        };
        // New steps enlarge the denominator; the high-water clamp keeps the
        // displayed percentage from moving backwards mid-run.
        self.session.progress = self.session.progress.max(computed);

        let current = self
            .session
            .current_step_id
            .and_then(|id| self.session.step(id));
        self.session.status = match current {
            Some(step) if step.kind == StepKind::Thinking && !step.status.is_terminal() => {
                SessionStatus::Thinking
            }
            Some(_) => SessionStatus::Executing,
            None => SessionStatus::Idle,
        };
    }

    /// Force the session terminal. Remaining non-terminal steps take the
    /// outcome's status, progress becomes exactly 100, and any failed step
    /// makes the whole session failed. Idempotent.
    pub fn finalize(&mut self, outcome: SessionOutcome) {
        if self.finalized {
            return;
        }
        let forced = match outcome {
            SessionOutcome::Completed => StepStatus::Completed,
            SessionOutcome::Failed => StepStatus::Failed,
        };
        for step in &mut self.session.steps {
            if !step.status.is_terminal() {
                step.status = forced;
            }
        }
        self.open_command = None;
        self.session.total_steps = self.session.steps.len();
        self.session.progress = 100;
        self.session.status = if outcome == SessionOutcome::Failed || self.session.any_failed() {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        self.finalized = true;
    }

    /// Clear all steps and counters for a fresh run under the same id.
    pub fn reset(&mut self) {
        let id = std::mem::take(&mut self.session.id);
        self.session = Session::with_id(id);
        self.open_command = None;
        self.finalized = false;
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;
    use opstream_protocol::CommandResult;
    use opstream_protocol::StepMetadata;
    use pretty_assertions::assert_eq;

    fn started(id: StepId, kind: StepKind, content: &str) -> StepEvent {
        StepEvent::Started(Step::new(id, kind, content))
    }

    fn issued(id: StepId, command: &str) -> StepEvent {
        StepEvent::CommandIssued(
            Step::new(id, StepKind::Command, command).with_metadata(StepMetadata {
                command: Some(command.into()),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn thinking_step_sets_thinking_status() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(started(0, StepKind::Thinking, "looking around"));
        assert_eq!(tracker.session().status, SessionStatus::Thinking);
        assert_eq!(tracker.session().progress, 0);
    }

    #[test]
    fn new_step_completes_the_previous_one() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(started(0, StepKind::Thinking, "a"));
        tracker.apply(started(1, StepKind::Output, "b"));
        assert_eq!(tracker.session().step(0).unwrap().status, StepStatus::Completed);
        assert_eq!(tracker.session().step(1).unwrap().status, StepStatus::InProgress);
        assert_eq!(tracker.session().status, SessionStatus::Executing);
    }

    #[test]
    fn command_stays_open_until_its_result_merges() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(issued(0, "kubectl get pods"));
        tracker.apply(started(1, StepKind::Output, "NAME READY"));
        // Interleaved output does not close the command.
        assert_eq!(tracker.session().step(0).unwrap().status, StepStatus::InProgress);

        tracker.apply(StepEvent::CommandCompleted {
            result: CommandResult {
                stdout: Some("web-0 1/1".into()),
                ..Default::default()
            },
        });
        let command = tracker.session().step(0).unwrap();
        assert_eq!(command.status, StepStatus::Completed);
        assert_eq!(command.metadata.exit_code, Some(0));
        assert!(command.metadata.duration_ms.is_some());
        assert_eq!(tracker.session().current_step_id, Some(0));
    }

    #[test]
    fn failed_result_marks_command_failed() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(issued(0, "kubectl drain node-3"));
        tracker.apply(StepEvent::CommandCompleted {
            result: CommandResult {
                stderr: Some("cannot evict pod".into()),
                ..Default::default()
            },
        });
        let command = tracker.session().step(0).unwrap();
        assert_eq!(command.status, StepStatus::Failed);
        assert_eq!(command.metadata.exit_code, Some(1));
        assert_eq!(tracker.outcome_from_steps(), SessionOutcome::Failed);
    }

    #[test]
    fn orphan_command_result_is_ignored() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(started(0, StepKind::Thinking, "a"));
        tracker.apply(StepEvent::CommandCompleted {
            result: CommandResult::default(),
        });
        assert_eq!(tracker.session().total_steps, 1);
        assert_eq!(tracker.session().step(0).unwrap().status, StepStatus::InProgress);
    }

    #[test]
    fn progress_never_regresses_while_streaming() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(started(0, StepKind::Thinking, "a"));
        tracker.apply(started(1, StepKind::Output, "b"));
        let halfway = tracker.session().progress;
        assert_eq!(halfway, 50);

        // Two more open steps would push the raw ratio back down to 33%.
        tracker.apply(started(2, StepKind::Result, "c"));
        assert!(tracker.session().progress >= halfway);
    }

    #[test]
    fn finalize_pins_progress_and_closes_steps() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(started(0, StepKind::Thinking, "a"));
        tracker.apply(issued(1, "kubectl get pods"));
        tracker.finalize(SessionOutcome::Completed);

        let session = tracker.session();
        assert_eq!(session.progress, 100);
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.steps.iter().all(|step| step.status.is_terminal()));
        assert!(tracker.is_finalized());
    }

    #[test]
    fn finalize_failed_never_demotes_completed_steps() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(started(0, StepKind::Thinking, "a"));
        tracker.apply(started(1, StepKind::Output, "b"));
        tracker.finalize(SessionOutcome::Failed);

        let session = tracker.session();
        assert_eq!(session.status, SessionStatus::Failed);
        // Step 0 completed via handoff before the failure and stays that way.
        assert_eq!(session.step(0).unwrap().status, StepStatus::Completed);
        assert_eq!(session.step(1).unwrap().status, StepStatus::Failed);
    }

    #[test]
    fn any_failed_step_fails_the_finalized_session() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(StepEvent::Started(
            Step::new(0, StepKind::Error, "boom").with_status(StepStatus::Failed),
        ));
        tracker.finalize(SessionOutcome::Completed);
        assert_eq!(tracker.session().status, SessionStatus::Failed);
    }

    #[test]
    fn events_after_finalize_are_dropped() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.finalize(SessionOutcome::Completed);
        tracker.apply(started(0, StepKind::Thinking, "late"));
        assert!(tracker.session().steps.is_empty());
        assert_eq!(tracker.session().progress, 100);
    }

    #[test]
    fn reset_clears_steps_but_keeps_identity() {
        let mut tracker = SessionTracker::with_session_id("s1");
        tracker.apply(started(0, StepKind::Thinking, "a"));
        tracker.finalize(SessionOutcome::Completed);
        tracker.reset();

        let session = tracker.session();
        assert_eq!(session.id, "s1");
        assert!(session.steps.is_empty());
        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.progress, 0);
        assert!(!tracker.is_finalized());
    }
}
