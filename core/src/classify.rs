//! Maps raw event frames, or flattened transcript lines, to typed step
//! events.
//!
//! Two modes share one output contract (`raw input -> zero-or-one
//! StepEvent`). Structured mode reads the frame's explicit `type` field.
//! Heuristic mode classifies plain text through `HEURISTIC_RULES`, an
//! ordered `(predicate, kind)` table evaluated in fixed precedence so the
//! result is deterministic and each predicate can be unit-tested alone.
//!
//! A classifier instance is created per session and owns the monotonic
//! step-id counter; there is no shared default instance.

use opstream_protocol::CommandResult;
use opstream_protocol::EventFrame;
use opstream_protocol::FrameKind;
use opstream_protocol::Step;
use opstream_protocol::StepId;
use opstream_protocol::StepKind;
use opstream_protocol::StepMetadata;
use opstream_protocol::StepStatus;

use crate::transcript::COMMAND_MARKER;
use crate::transcript::FAILURE_GLYPH;
use crate::transcript::OUTPUT_MARKER;
use crate::transcript::REPLY_MARKER;
use crate::transcript::SUCCESS_GLYPH;
use crate::transcript::THINKING_MARKER;

/// Tool identity assumed when a command frame names no pluggable tool.
pub const DEFAULT_TOOL: &str = "shell";

/// Output of classification, consumed by the session tracker.
///
/// `command` frames arrive twice for one logical command, so the two phases
/// are distinct variants rather than a positional "find the last command"
/// match: `CommandIssued` opens the step, `CommandCompleted` closes it.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    Started(Step),
    CommandIssued(Step),
    CommandCompleted { result: CommandResult },
}

#[derive(Debug, Default)]
pub struct StepClassifier {
    next_id: StepId,
}

impl StepClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> StepId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Structured mode: the frame already carries an explicit type.
    ///
    /// Approval handshake frames and the `done` marker produce no step; the
    /// stream driver routes them elsewhere.
    pub fn classify_frame(&mut self, frame: &EventFrame) -> Option<StepEvent> {
        match frame.kind {
            FrameKind::Thinking => {
                let content = frame.content_str();
                if content.is_empty() {
                    return None;
                }
                Some(StepEvent::Started(Step::new(
                    self.next_id(),
                    StepKind::Thinking,
                    content,
                )))
            }
            FrameKind::Command => {
                let metadata = frame.metadata.clone().unwrap_or_default();
                if let Some(result) = metadata.result {
                    return Some(StepEvent::CommandCompleted { result });
                }
                let command = metadata
                    .command
                    .unwrap_or_else(|| frame.content_str().to_string());
                if command.is_empty() {
                    return None;
                }
                let tool_name = metadata.tool.filter(|tool| tool != DEFAULT_TOOL);
                let step = Step::new(self.next_id(), StepKind::Command, command.clone())
                    .with_metadata(StepMetadata {
                        command: Some(command),
                        tool_name,
                        ..Default::default()
                    });
                Some(StepEvent::CommandIssued(step))
            }
            FrameKind::Output => {
                let content = frame.content_str();
                if content.is_empty() {
                    return None;
                }
                Some(StepEvent::Started(Step::new(
                    self.next_id(),
                    StepKind::Output,
                    content,
                )))
            }
            FrameKind::Text => {
                let content = frame.content_str();
                if content.is_empty() {
                    return None;
                }
                // Free-form model text goes through the same prose rules the
                // heuristic path uses, so live and replayed sessions agree.
                let kind = classify_prose(content);
                let status = if kind == StepKind::Error {
                    StepStatus::Failed
                } else {
                    StepStatus::InProgress
                };
                Some(StepEvent::Started(
                    Step::new(self.next_id(), kind, content).with_status(status),
                ))
            }
            FrameKind::Error => {
                let content = frame.content.clone().filter(|c| !c.is_empty());
                let content = content.unwrap_or_else(|| "unknown error".to_string());
                Some(StepEvent::Started(
                    Step::new(self.next_id(), StepKind::Error, content)
                        .with_status(StepStatus::Failed),
                ))
            }
            FrameKind::CommandApprovalRequest
            | FrameKind::CommandApproved
            | FrameKind::CommandRejected
            | FrameKind::Done => None,
        }
    }

    /// Heuristic mode: classify one line of flattened plain text.
    ///
    /// Only used when no structured `type` is available (history replay).
    /// Inherently lossier than the structured path, so every hit is logged
    /// to keep divergence observable.
    pub fn classify_line(&mut self, line: &str) -> Option<StepEvent> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return None;
        }

        let rule = HEURISTIC_RULES.iter().find(|rule| (rule.matches)(line));
        let kind = rule.map_or(StepKind::Result, |rule| rule.kind);
        tracing::debug!(
            rule = rule.map_or("default-result", |rule| rule.name),
            kind = %kind,
            "heuristic fallback classification"
        );

        let (body, glyph_status) = split_status_glyph(line);
        let event = match kind {
            StepKind::Command => {
                let (tool_name, command) = parse_command_line(body);
                let step = Step::new(self.next_id(), StepKind::Command, command.clone())
                    .with_metadata(StepMetadata {
                        command: Some(command),
                        tool_name,
                        ..Default::default()
                    });
                match glyph_status {
                    // A glyph means the command already finished; no merge
                    // phase will follow during replay.
                    Some(status) => StepEvent::Started(step.with_status(status)),
                    None => StepEvent::CommandIssued(step),
                }
            }
            StepKind::Error => {
                let content = body
                    .strip_prefix(FAILURE_GLYPH)
                    .unwrap_or(body)
                    .trim()
                    .to_string();
                StepEvent::Started(
                    Step::new(self.next_id(), StepKind::Error, content)
                        .with_status(StepStatus::Failed),
                )
            }
            _ => {
                let content = strip_kind_marker(body, kind).trim().to_string();
                let status = glyph_status.unwrap_or(StepStatus::InProgress);
                StepEvent::Started(Step::new(self.next_id(), kind, content).with_status(status))
            }
        };
        Some(event)
    }
}

/// One heuristic classification rule. Precedence is the position in
/// [`HEURISTIC_RULES`]; the first matching rule wins.
pub struct HeuristicRule {
    pub name: &'static str,
    pub kind: StepKind,
    pub matches: fn(&str) -> bool,
}

/// Fixed-precedence rule table for heuristic classification. Order matters:
/// output shapes are tested before failure phrasing so "Error" inside a
/// captured command table never marks a failure, and summary vocabulary only
/// applies to lines nothing above claimed. Lines matching no rule default to
/// `result`.
pub const HEURISTIC_RULES: &[HeuristicRule] = &[
    HeuristicRule {
        name: "thinking-marker",
        kind: StepKind::Thinking,
        matches: is_thinking_line,
    },
    HeuristicRule {
        name: "command-marker",
        kind: StepKind::Command,
        matches: is_command_line,
    },
    HeuristicRule {
        name: "output-shape",
        kind: StepKind::Output,
        matches: is_output_shape,
    },
    HeuristicRule {
        name: "failure-phrase",
        kind: StepKind::Error,
        matches: is_failure_phrase,
    },
    HeuristicRule {
        name: "analysis-vocabulary",
        kind: StepKind::Analysis,
        matches: is_analysis_line,
    },
];

/// Prose-only classification shared by the structured `text` path and the
/// heuristic default: output shape, failure phrasing, then analysis
/// vocabulary, else `result`.
fn classify_prose(content: &str) -> StepKind {
    HEURISTIC_RULES
        .iter()
        .skip(2)
        .find(|rule| (rule.matches)(content))
        .map_or(StepKind::Result, |rule| rule.kind)
}

fn is_thinking_line(line: &str) -> bool {
    line.starts_with(THINKING_MARKER)
}

fn is_command_line(line: &str) -> bool {
    if line.starts_with(COMMAND_MARKER) {
        return true;
    }
    // Bracketed tool prefix: `[helm] $ helm list`.
    line.starts_with('[')
        && line
            .split_once("] ")
            .is_some_and(|(_, rest)| rest.starts_with(COMMAND_MARKER))
}

fn is_output_shape(line: &str) -> bool {
    if line.starts_with(OUTPUT_MARKER) {
        return true;
    }
    if line.contains("No resources found") || line.contains("not found") {
        return true;
    }
    is_table_header(line)
}

const TABLE_HEADER_TOKENS: &[&str] = &[
    "NAME",
    "STATUS",
    "READY",
    "AGE",
    "RESTARTS",
    "TYPE",
    "NAMESPACE",
    "CLUSTER-IP",
    "EXTERNAL-IP",
    "VERSION",
];

fn is_table_header(line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return false;
    }
    let all_header_shaped = tokens.iter().all(|token| {
        token
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '(' || c == ')' || c == '%')
    });
    all_header_shaped && tokens.iter().any(|token| TABLE_HEADER_TOKENS.contains(token))
}

/// Failure phrasing is prefix-scoped on purpose: a line that merely contains
/// "error" somewhere (e.g. a log table row) must not become a failure step.
/// Table shapes have already been claimed by the rule above.
fn is_failure_phrase(line: &str) -> bool {
    line.starts_with(FAILURE_GLYPH)
        || line.starts_with("Error:")
        || line.starts_with("error:")
        || line.starts_with("Failed to ")
}

const ANALYSIS_VOCABULARY: &[&str] = &[
    "In summary",
    "In conclusion",
    "To summarize",
    "Summary:",
    "Overall,",
    "Based on the output",
];

fn is_analysis_line(line: &str) -> bool {
    if line.starts_with(REPLY_MARKER) {
        return true;
    }
    ANALYSIS_VOCABULARY.iter().any(|term| line.contains(term))
}

/// Split a trailing success/failure glyph off a transcript line.
fn split_status_glyph(line: &str) -> (&str, Option<StepStatus>) {
    if let Some(body) = line.strip_suffix(SUCCESS_GLYPH) {
        (body.trim_end(), Some(StepStatus::Completed))
    } else if let Some(body) = line.strip_suffix(FAILURE_GLYPH) {
        // A leading glyph is an error marker, not a status suffix.
        if body.trim_end().is_empty() {
            (line, None)
        } else {
            (body.trim_end(), Some(StepStatus::Failed))
        }
    } else {
        (line, None)
    }
}

/// Extract `(tool, command)` from a command transcript line.
fn parse_command_line(line: &str) -> (Option<String>, String) {
    if let Some(rest) = line.strip_prefix('[')
        && let Some((tool, tail)) = rest.split_once("] ")
        && let Some(command) = tail.strip_prefix(COMMAND_MARKER)
    {
        return (Some(tool.to_string()), command.trim().to_string());
    }
    let command = line.strip_prefix(COMMAND_MARKER).unwrap_or(line);
    (None, command.trim().to_string())
}

fn strip_kind_marker(line: &str, kind: StepKind) -> &str {
    let marker = match kind {
        StepKind::Thinking => THINKING_MARKER,
        StepKind::Output => OUTPUT_MARKER,
        StepKind::Analysis => REPLY_MARKER,
        _ => return line,
    };
    line.strip_prefix(marker).unwrap_or(line)
}
