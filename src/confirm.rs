//! Open-transition confirmation.
//!
//! A single poll cycle classifies one frame. `Closed` and `Unknown` are final
//! right away. `Open` is only reported after re-observing the scene:
//!
//! ```text
//! frame1 ─ Open ─► frame2 ─ Open ──────────────► Open (result 2, frame 2)
//!   │                │  └─ Closed/Unknown ─► frame3 ─► result 3, frame 3
//!   │                │                          └ capture failed ─► result 2, frame 2
//!   │                └─ capture failed ─────────────► Unknown (no confidence)
//!   └─ Closed/Unknown ──────────────────────────────► result 1, frame 1
//! ```
//!
//! A classification error at any step aborts the cycle. Nothing is carried
//! between cycles.

use crate::classify::{Classification, Classify, ClassifyError, GateStatus};
use crate::frame::CapturedFrame;
use crate::ingest::FrameSource;

/// Final output of one poll cycle.
#[derive(Clone, Debug)]
pub struct GateDecision {
    pub status: GateStatus,
    /// `None` when the status was forced rather than observed.
    pub confidence: Option<u8>,
    /// Capture the decision was made on; its full frame is the alert snapshot.
    pub snapshot: CapturedFrame,
    /// Number of classifications performed (1..=3).
    pub observations: u8,
}

impl GateDecision {
    fn observed(result: Classification, snapshot: CapturedFrame, observations: u8) -> Self {
        Self {
            status: result.status,
            confidence: Some(result.confidence),
            snapshot,
            observations,
        }
    }
}

/// How a poll cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The primary capture failed; nothing was classified.
    CaptureFailed(anyhow::Error),
    /// A classification failed; nothing may be published.
    Aborted(ClassifyError),
    Decided(GateDecision),
}

/// Run one capture/classify/confirm cycle.
pub fn evaluate<S, C>(source: &mut S, classifier: &mut C) -> CycleOutcome
where
    S: FrameSource + ?Sized,
    C: Classify + ?Sized,
{
    let frame1 = match source.capture() {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("skipping analysis due to capture failure: {:#}", e);
            return CycleOutcome::CaptureFailed(e);
        }
    };
    let first = match classifier.classify(frame1.analysis_frame()) {
        Ok(result) => result,
        Err(e) => return CycleOutcome::Aborted(e),
    };
    if first.status != GateStatus::Open {
        return CycleOutcome::Decided(GateDecision::observed(first, frame1, 1));
    }

    log::info!(
        "[1/3] gate appears OPEN (confidence: {}%); confirming immediately",
        first.confidence
    );
    let frame2 = match source.capture() {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!(
                "[2/3] confirmation capture failed, discarding OPEN detection: {:#}",
                e
            );
            return CycleOutcome::Decided(GateDecision {
                status: GateStatus::Unknown,
                confidence: None,
                snapshot: frame1,
                observations: 1,
            });
        }
    };
    let second = match classifier.classify(frame2.analysis_frame()) {
        Ok(result) => result,
        Err(e) => return CycleOutcome::Aborted(e),
    };
    if second.status == GateStatus::Open {
        log::info!(
            "[2/3] confirmed OPEN (confidence: {}%)",
            second.confidence
        );
        return CycleOutcome::Decided(GateDecision::observed(second, frame2, 2));
    }

    log::info!(
        "[2/3] got {} (confidence: {}%); disagreement, running tiebreaker",
        second.status,
        second.confidence
    );
    let frame3 = match source.capture() {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!(
                "[3/3] tiebreaker capture failed, keeping second result ({}): {:#}",
                second.status,
                e
            );
            return CycleOutcome::Decided(GateDecision::observed(second, frame2, 2));
        }
    };
    match classifier.classify(frame3.analysis_frame()) {
        Ok(third) => {
            log::info!(
                "[3/3] tiebreaker: {} (confidence: {}%)",
                third.status,
                third.confidence
            );
            CycleOutcome::Decided(GateDecision::observed(third, frame3, 3))
        }
        Err(e) => CycleOutcome::Aborted(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::OracleError;
    use crate::frame::{Frame, Region};
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;

    /// Hands out frames tagged with their capture number, or scripted failures.
    struct ScriptedSource {
        script: VecDeque<bool>,
        captures: u8,
    }

    impl ScriptedSource {
        fn new(script: &[bool]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                captures: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn capture(&mut self) -> Result<CapturedFrame> {
            let ok = self.script.pop_front().expect("unexpected capture");
            self.captures += 1;
            if !ok {
                return Err(anyhow!("no frame"));
            }
            let tag = vec![self.captures];
            Ok(CapturedFrame {
                full: Frame::new(tag.clone(), 640, 480, Region::Full),
                crop: Some(Frame::new(tag, 160, 216, Region::Crop(Default::default()))),
            })
        }
    }

    struct ScriptedClassifier {
        results: VecDeque<Result<Classification, ClassifyError>>,
        seen: Vec<u8>,
    }

    impl ScriptedClassifier {
        fn new(results: Vec<Result<Classification, ClassifyError>>) -> Self {
            Self {
                results: results.into(),
                seen: Vec::new(),
            }
        }
    }

    impl Classify for ScriptedClassifier {
        fn classify(&mut self, frame: &Frame) -> Result<Classification, ClassifyError> {
            assert_eq!(frame.region, Region::Crop(Default::default()));
            self.seen.push(frame.jpeg()[0]);
            self.results.pop_front().expect("unexpected classification")
        }
    }

    fn ok(status: GateStatus, confidence: u8) -> Result<Classification, ClassifyError> {
        Ok(Classification::new(status, confidence))
    }

    fn decided(outcome: CycleOutcome) -> GateDecision {
        match outcome {
            CycleOutcome::Decided(decision) => decision,
            other => panic!("expected decision, got {:?}", other),
        }
    }

    fn snapshot_tag(decision: &GateDecision) -> u8 {
        decision.snapshot.full.jpeg()[0]
    }

    #[test]
    fn closed_is_final_after_one_capture() {
        let mut source = ScriptedSource::new(&[true]);
        let mut classifier = ScriptedClassifier::new(vec![ok(GateStatus::Closed, 95)]);
        let decision = decided(evaluate(&mut source, &mut classifier));
        assert_eq!(decision.status, GateStatus::Closed);
        assert_eq!(decision.confidence, Some(95));
        assert_eq!(decision.observations, 1);
        assert_eq!(source.captures, 1);
    }

    #[test]
    fn unknown_is_final_after_one_capture() {
        let mut source = ScriptedSource::new(&[true]);
        let mut classifier = ScriptedClassifier::new(vec![ok(GateStatus::Unknown, 40)]);
        let decision = decided(evaluate(&mut source, &mut classifier));
        assert_eq!(decision.status, GateStatus::Unknown);
        assert_eq!(decision.confidence, Some(40));
        assert_eq!(source.captures, 1);
    }

    #[test]
    fn two_agreeing_opens_confirm_with_second_frame() {
        let mut source = ScriptedSource::new(&[true, true]);
        let mut classifier = ScriptedClassifier::new(vec![
            ok(GateStatus::Open, 90),
            ok(GateStatus::Open, 85),
        ]);
        let decision = decided(evaluate(&mut source, &mut classifier));
        assert_eq!(decision.status, GateStatus::Open);
        assert_eq!(decision.confidence, Some(85));
        assert_eq!(snapshot_tag(&decision), 2);
        assert_eq!(classifier.seen, vec![1, 2]);
    }

    #[test]
    fn disagreement_is_settled_by_tiebreak() {
        let mut source = ScriptedSource::new(&[true, true, true]);
        let mut classifier = ScriptedClassifier::new(vec![
            ok(GateStatus::Open, 80),
            ok(GateStatus::Closed, 60),
            ok(GateStatus::Closed, 75),
        ]);
        let decision = decided(evaluate(&mut source, &mut classifier));
        assert_eq!(decision.status, GateStatus::Closed);
        assert_eq!(decision.confidence, Some(75));
        assert_eq!(snapshot_tag(&decision), 3);
        assert_eq!(decision.observations, 3);
    }

    #[test]
    fn tiebreak_may_still_report_open() {
        let mut source = ScriptedSource::new(&[true, true, true]);
        let mut classifier = ScriptedClassifier::new(vec![
            ok(GateStatus::Open, 80),
            ok(GateStatus::Unknown, 30),
            ok(GateStatus::Open, 88),
        ]);
        let decision = decided(evaluate(&mut source, &mut classifier));
        assert_eq!(decision.status, GateStatus::Open);
        assert_eq!(decision.confidence, Some(88));
        assert_eq!(snapshot_tag(&decision), 3);
    }

    #[test]
    fn failed_tiebreak_capture_keeps_second_result() {
        let mut source = ScriptedSource::new(&[true, true, false]);
        let mut classifier = ScriptedClassifier::new(vec![
            ok(GateStatus::Open, 80),
            ok(GateStatus::Unknown, 40),
        ]);
        let decision = decided(evaluate(&mut source, &mut classifier));
        assert_eq!(decision.status, GateStatus::Unknown);
        assert_eq!(decision.confidence, Some(40));
        assert_eq!(snapshot_tag(&decision), 2);
        assert_eq!(source.captures, 3);
    }

    #[test]
    fn failed_confirmation_capture_forces_unknown() {
        let mut source = ScriptedSource::new(&[true, false]);
        let mut classifier = ScriptedClassifier::new(vec![ok(GateStatus::Open, 99)]);
        let decision = decided(evaluate(&mut source, &mut classifier));
        assert_eq!(decision.status, GateStatus::Unknown);
        assert_eq!(decision.confidence, None);
        // no third capture attempted
        assert_eq!(source.captures, 2);
        assert!(source.script.is_empty());
    }

    #[test]
    fn primary_capture_failure_skips_classification() {
        let mut source = ScriptedSource::new(&[false]);
        let mut classifier = ScriptedClassifier::new(vec![]);
        assert!(matches!(
            evaluate(&mut source, &mut classifier),
            CycleOutcome::CaptureFailed(_)
        ));
        assert!(classifier.seen.is_empty());
    }

    #[test]
    fn error_on_any_step_aborts() {
        let failing = || -> Result<Classification, ClassifyError> {
            Err(ClassifyError::Oracle(OracleError::failed("boom")))
        };

        let mut source = ScriptedSource::new(&[true]);
        let mut classifier = ScriptedClassifier::new(vec![failing()]);
        assert!(matches!(
            evaluate(&mut source, &mut classifier),
            CycleOutcome::Aborted(_)
        ));

        let mut source = ScriptedSource::new(&[true, true]);
        let mut classifier =
            ScriptedClassifier::new(vec![ok(GateStatus::Open, 90), failing()]);
        assert!(matches!(
            evaluate(&mut source, &mut classifier),
            CycleOutcome::Aborted(_)
        ));

        let mut source = ScriptedSource::new(&[true, true, true]);
        let mut classifier = ScriptedClassifier::new(vec![
            ok(GateStatus::Open, 90),
            ok(GateStatus::Closed, 90),
            Err(ClassifyError::RateLimited { attempts: 3 }),
        ]);
        assert!(matches!(
            evaluate(&mut source, &mut classifier),
            CycleOutcome::Aborted(_)
        ));
    }
}
