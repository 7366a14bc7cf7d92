use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Event type discriminator carried in the `type` field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Thinking,
    Command,
    Output,
    Text,
    CommandApprovalRequest,
    CommandApproved,
    CommandRejected,
    Done,
    Error,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Thinking => "thinking",
            FrameKind::Command => "command",
            FrameKind::Output => "output",
            FrameKind::Text => "text",
            FrameKind::CommandApprovalRequest => "command_approval_request",
            FrameKind::CommandApproved => "command_approved",
            FrameKind::CommandRejected => "command_rejected",
            FrameKind::Done => "done",
            FrameKind::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// One decoded JSON event from the agent stream.
///
/// `command` frames arrive twice for the same logical command: first without
/// `metadata.result` (command issued), then again with it populated (command
/// finished). Everything else is a single occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FrameMetadata>,
}

impl EventFrame {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            content: None,
            timestamp: None,
            metadata: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, metadata: FrameMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Text to display for this frame, if any.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Optional per-frame metadata. Field names are camelCase on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_info: Option<HostInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Target host identity attached to approval requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.hostname.as_deref(), self.cluster.as_deref()) {
            (Some(host), Some(cluster)) => write!(f, "{host} ({cluster})"),
            (Some(host), None) => write!(f, "{host}"),
            (None, Some(cluster)) => write!(f, "{cluster}"),
            (None, None) => write!(f, "unknown host"),
        }
    }
}

/// Execution outcome delivered on the second occurrence of a `command` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// A result fails the command when it carries an error or any stderr
    /// output. An empty stderr string is not a failure.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.stderr.as_deref().is_some_and(|s| !s.is_empty())
    }
}
