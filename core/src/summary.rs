//! Summarizer seam and its degraded-mode fallback.

use async_trait::async_trait;
use opstream_protocol::Session;
use opstream_protocol::StepKind;
use opstream_protocol::StepStatus;

use crate::error::SummaryError;

/// External summary generation, invoked once per finished session.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, query: &str, transcript: &str) -> Result<String, SummaryError>;
}

/// Summarize, or degrade to a transcript-derived message. Never fails:
/// summary generation is cosmetic and must not fail a finished session.
pub async fn summarize_or_fallback(
    summarizer: &dyn Summarizer,
    query: &str,
    transcript: &str,
    session: &Session,
) -> String {
    match summarizer.summarize(query, transcript).await {
        Ok(summary) => summary,
        Err(err) => {
            tracing::warn!(
                session_id = %session.id,
                error = %err,
                "summary generation failed, falling back to transcript digest"
            );
            fallback_summary(session)
        }
    }
}

/// Deterministic digest built from the session itself. The last analysis or
/// result step is the closest thing to a conclusion the transcript holds.
pub fn fallback_summary(session: &Session) -> String {
    let conclusion = session
        .steps
        .iter()
        .rev()
        .find(|step| matches!(step.kind, StepKind::Analysis | StepKind::Result))
        .map(|step| step.content.trim())
        .filter(|content| !content.is_empty());
    if let Some(conclusion) = conclusion {
        return conclusion.to_string();
    }

    let commands = session
        .steps
        .iter()
        .filter(|step| step.kind == StepKind::Command)
        .count();
    let failed = session
        .steps
        .iter()
        .filter(|step| step.status == StepStatus::Failed)
        .count();
    format!(
        "Session {} ended {} after {} steps ({commands} commands, {failed} failed).",
        session.id, session.status, session.total_steps
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use opstream_protocol::SessionStatus;
    use opstream_protocol::Step;
    use pretty_assertions::assert_eq;

    struct FixedSummarizer;

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _query: &str, _transcript: &str) -> Result<String, SummaryError> {
            Ok("all pods healthy".to_string())
        }
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn summarize(&self, _query: &str, _transcript: &str) -> Result<String, SummaryError> {
            Err(SummaryError("upstream 503".to_string()))
        }
    }

    #[tokio::test]
    async fn successful_summary_is_passed_through() {
        let session = Session::with_id("s1");
        let summary = summarize_or_fallback(&FixedSummarizer, "check pods", "", &session).await;
        assert_eq!(summary, "all pods healthy");
    }

    #[tokio::test]
    async fn failure_degrades_to_last_conclusion() {
        let mut session = Session::with_id("s1");
        session.steps = vec![
            Step::new(0, StepKind::Thinking, "looking").with_status(StepStatus::Completed),
            Step::new(1, StepKind::Analysis, "In summary, nothing is on fire.")
                .with_status(StepStatus::Completed),
        ];
        let summary = summarize_or_fallback(&BrokenSummarizer, "check pods", "", &session).await;
        assert_eq!(summary, "In summary, nothing is on fire.");
    }

    #[tokio::test]
    async fn failure_without_conclusion_reports_counts() {
        let mut session = Session::with_id("s1");
        session.status = SessionStatus::Failed;
        session.steps = vec![
            Step::new(0, StepKind::Command, "kubectl get pods").with_status(StepStatus::Failed),
        ];
        session.total_steps = 1;
        let summary = summarize_or_fallback(&BrokenSummarizer, "check pods", "", &session).await;
        assert_eq!(
            summary,
            "Session s1 ended failed after 1 steps (1 commands, 1 failed)."
        );
    }
}
