//! End-to-end stream driver: bytes in, terminal session out.
//!
//! `drive_session` wires decoder, classifier, tracker and approval
//! coordinator together for one live stream. [`SessionRunner`] adds the
//! collaborator seams around it (auth gate, transcript store, summarizer).

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use opstream_protocol::ApprovalDecision;
use opstream_protocol::ApprovalId;
use opstream_protocol::ApprovalResolution;
use opstream_protocol::EventFrame;
use opstream_protocol::FrameKind;
use opstream_protocol::Session;

use crate::approval::ApprovalCoordinator;
use crate::approval::request_from_metadata;
use crate::auth::AuthGate;
use crate::auth::UserId;
use crate::classify::StepClassifier;
use crate::config::EngineConfig;
use crate::decoder::DecodedFrame;
use crate::decoder::FrameDecoder;
use crate::error::EngineError;
use crate::session::SessionOutcome;
use crate::session::SessionTracker;
use crate::store::SessionStore;
use crate::summary::Summarizer;
use crate::summary::summarize_or_fallback;
use crate::transcript;

const ABORT_REASON: &str = "stream closed before a decision arrived";

/// Consume an event stream to completion, mutating `tracker` as frames
/// arrive.
///
/// The session is guaranteed terminal on return, whether the stream closed
/// with `[DONE]`, was cut off mid-run, or failed with a transport error.
/// Transport errors additionally surface as `Err` after the session has
/// been force-finalized as failed.
pub async fn drive_session<S, E>(
    tracker: &mut SessionTracker,
    classifier: &mut StepClassifier,
    approvals: &ApprovalCoordinator,
    mut stream: S,
) -> Result<(), EngineError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                approvals.expire_all(ABORT_REASON);
                tracker.finalize(SessionOutcome::Failed);
                return Err(EngineError::stream(err));
            }
        };
        let text = String::from_utf8_lossy(&chunk);
        for frame in decoder.decode_chunk(&text) {
            if handle_frame(tracker, classifier, approvals, frame) {
                finish(tracker, approvals);
                return Ok(());
            }
        }
    }

    // Stream ended without the sentinel. Flush the tail, then finalize from
    // the last known state.
    for frame in decoder.finish() {
        if handle_frame(tracker, classifier, approvals, frame) {
            finish(tracker, approvals);
            return Ok(());
        }
    }
    tracing::warn!(
        session_id = %tracker.session().id,
        "stream ended without done sentinel, finalizing from last known state"
    );
    finish(tracker, approvals);
    Ok(())
}

/// Route one decoded frame. Returns true when the stream is done.
fn handle_frame(
    tracker: &mut SessionTracker,
    classifier: &mut StepClassifier,
    approvals: &ApprovalCoordinator,
    frame: DecodedFrame,
) -> bool {
    let frame = match frame {
        DecodedFrame::Done => return true,
        DecodedFrame::Event(frame) => frame,
    };
    match frame.kind {
        FrameKind::Done => true,
        FrameKind::CommandApprovalRequest => {
            match request_from_metadata(frame.content_str(), frame.metadata.as_ref()) {
                Some(request) => approvals.begin(request),
                None => {
                    tracing::warn!("approval request frame without approval id ignored");
                }
            }
            false
        }
        FrameKind::CommandApproved => {
            resolve_from_frame(approvals, &frame, ApprovalDecision::Approved);
            false
        }
        FrameKind::CommandRejected => {
            resolve_from_frame(approvals, &frame, ApprovalDecision::Rejected);
            false
        }
        _ => {
            if let Some(event) = classifier.classify_frame(&frame) {
                tracker.apply(event);
            }
            false
        }
    }
}

fn resolve_from_frame(
    approvals: &ApprovalCoordinator,
    frame: &EventFrame,
    decision: ApprovalDecision,
) {
    let id = frame
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.approval_id.clone());
    let Some(id) = id else {
        tracing::warn!(kind = %frame.kind, "approval decision frame without approval id ignored");
        return;
    };
    let id = ApprovalId::new(id);
    if !approvals.resolve(&id, decision) {
        tracing::warn!(approval_id = %id, "approval decision for unknown or settled request");
    }
}

fn finish(tracker: &mut SessionTracker, approvals: &ApprovalCoordinator) {
    approvals.expire_all("session finished with the approval unresolved");
    let outcome = tracker.outcome_from_steps();
    tracker.finalize(outcome);
}

/// Everything produced by one finished run.
#[derive(Debug)]
pub struct SessionReport {
    pub session: Session,
    pub transcript: String,
    pub summary: String,
    pub resolutions: Vec<ApprovalResolution>,
}

/// Session engine with its collaborators plugged in.
pub struct SessionRunner {
    auth: Arc<dyn AuthGate>,
    store: Arc<dyn SessionStore>,
    summarizer: Arc<dyn Summarizer>,
    config: EngineConfig,
}

impl SessionRunner {
    pub fn new(
        auth: Arc<dyn AuthGate>,
        store: Arc<dyn SessionStore>,
        summarizer: Arc<dyn Summarizer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            auth,
            store,
            summarizer,
            config,
        }
    }

    /// Run one live session end to end: authenticate, consume the stream,
    /// persist the flattened transcript, summarize.
    ///
    /// A failed run is still persisted before the transport error is
    /// returned. Summary failures never fail the run.
    pub async fn run_live<S, E>(
        &self,
        token: &str,
        query: &str,
        stream: S,
    ) -> Result<SessionReport, EngineError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        let user = self
            .auth
            .authenticate(token)
            .await
            .ok_or(EngineError::Unauthorized)?;
        tracing::info!(user = %user, "session authorized");

        let mut tracker = SessionTracker::new();
        let mut classifier = StepClassifier::new();
        let (approvals, mut resolutions_rx) = ApprovalCoordinator::new(&self.config);

        let drive_result = drive_session(&mut tracker, &mut classifier, &approvals, stream).await;

        let mut resolutions = Vec::new();
        while let Ok(resolution) = resolutions_rx.try_recv() {
            resolutions.push(resolution);
        }

        let session = tracker.into_session();
        let flattened = transcript::flatten(&session);
        self.store.append(&session.id, &flattened).await?;
        drive_result?;

        let summary =
            summarize_or_fallback(self.summarizer.as_ref(), query, &flattened, &session).await;
        Ok(SessionReport {
            session,
            transcript: flattened,
            summary,
            resolutions,
        })
    }

    /// Reconstruct the user's stored sessions for history display.
    pub async fn history(&self, token: &str) -> Result<Vec<Session>, EngineError> {
        let user = self
            .auth
            .authenticate(token)
            .await
            .ok_or(EngineError::Unauthorized)?;
        let transcripts = self.store.list(&user).await?;
        Ok(transcripts
            .into_iter()
            .map(|text| transcript::reconstruct(&text))
            .collect())
    }

    /// The user behind a token, if any. Convenience for callers that link
    /// sessions to users in their store implementation.
    pub async fn authenticate(&self, token: &str) -> Option<UserId> {
        self.auth.authenticate(token).await
    }
}
