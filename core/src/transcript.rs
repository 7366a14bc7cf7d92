//! Flattening a session to plain text and reconstructing it back.
//!
//! The flattened form is what gets persisted: one line per step, marked so
//! the heuristic classifier can recover `(kind, status, order)` on replay.
//! Content with interior newlines is collapsed to a single line, so the
//! round trip preserves classification, not byte-exact content.

use opstream_protocol::Session;
use opstream_protocol::Step;
use opstream_protocol::StepKind;
use opstream_protocol::StepStatus;

use crate::classify::StepClassifier;
use crate::session::SessionTracker;

pub const THINKING_MARKER: &str = "🤔 ";
pub const COMMAND_MARKER: &str = "$ ";
pub const REPLY_MARKER: &str = "🤖 ";
pub const OUTPUT_MARKER: &str = "📋 ";
pub const SUCCESS_GLYPH: &str = "✅";
pub const FAILURE_GLYPH: &str = "❌";

/// Render a session as marked plain text, one line per step.
pub fn flatten(session: &Session) -> String {
    let mut out = String::new();
    for step in &session.steps {
        let content = single_line(&step.content);
        let line = match step.kind {
            StepKind::Thinking => format!("{THINKING_MARKER}{content}"),
            StepKind::Command => flatten_command(step, &content),
            StepKind::Output => format!("{OUTPUT_MARKER}{content}"),
            StepKind::Analysis => format!("{REPLY_MARKER}{content}"),
            StepKind::Result => content,
            StepKind::Error => format!("{FAILURE_GLYPH} {content}"),
        };
        out.push_str(&line);
        // Non-command steps that failed carry the glyph as a suffix; error
        // steps already lead with it.
        if step.status == StepStatus::Failed
            && !matches!(step.kind, StepKind::Command | StepKind::Error)
        {
            out.push(' ');
            out.push_str(FAILURE_GLYPH);
        }
        out.push('\n');
    }
    out
}

fn flatten_command(step: &Step, content: &str) -> String {
    let command = step
        .metadata
        .command
        .as_deref()
        .map_or_else(|| content.to_string(), single_line);
    let glyph = if step.status == StepStatus::Failed {
        FAILURE_GLYPH
    } else {
        SUCCESS_GLYPH
    };
    match step.metadata.tool_name.as_deref() {
        Some(tool) => format!("[{tool}] {COMMAND_MARKER}{command} {glyph}"),
        None => format!("{COMMAND_MARKER}{command} {glyph}"),
    }
}

fn single_line(content: &str) -> String {
    content
        .split('\n')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rebuild a session from a flattened transcript via the heuristic
/// classifier. The result is terminal: failed when any replayed step
/// failed, completed otherwise.
pub fn reconstruct(transcript: &str) -> Session {
    reconstruct_with_id(uuid::Uuid::new_v4().to_string(), transcript)
}

pub fn reconstruct_with_id(id: impl Into<String>, transcript: &str) -> Session {
    let mut tracker = SessionTracker::with_session_id(id);
    let mut classifier = StepClassifier::new();
    for line in transcript.lines() {
        if let Some(event) = classifier.classify_line(line) {
            tracker.apply(event);
        }
    }
    let outcome = tracker.outcome_from_steps();
    tracker.finalize(outcome);
    tracker.into_session()
}
