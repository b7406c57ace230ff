//! Confidence-gated, rate-limit-aware classification.

use std::sync::Arc;
use std::time::Duration;

use super::oracle::VisionOracle;
use super::parse::parse_gate_response;
use super::prompt::{build_request, ReferenceSet};
use super::result::{Classification, ClassifyError};
use crate::frame::Frame;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Backoff unit; attempt `n` (1-based) waits `n` times this long.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Something that classifies a single frame.
pub trait Classify {
    fn classify(&mut self, frame: &Frame) -> Result<Classification, ClassifyError>;
}

impl<T: Classify + ?Sized> Classify for &mut T {
    fn classify(&mut self, frame: &Frame) -> Result<Classification, ClassifyError> {
        (**self).classify(frame)
    }
}

/// Blocking wait used between rate-limited attempts.
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`. Returns `false` if the wait was cut short by a
    /// shutdown request.
    fn sleep(&self, duration: Duration) -> bool;
}

/// Plain `std::thread::sleep`.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        std::thread::sleep(duration);
        true
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Wait before retrying after the given 1-based attempt failed.
    pub fn wait_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            backoff: RATE_LIMIT_BACKOFF,
        }
    }
}

/// Classifies gate crops through a `VisionOracle`.
///
/// Holds the selected model and the reference set for the life of the process.
pub struct GateClassifier<O> {
    oracle: O,
    model: String,
    references: ReferenceSet,
    threshold: u8,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<O: VisionOracle> GateClassifier<O> {
    pub fn new(oracle: O, model: impl Into<String>, references: ReferenceSet, threshold: u8) -> Self {
        Self {
            oracle,
            model: model.into(),
            references,
            threshold,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One classification with retry on rate limiting and threshold gating.
    pub fn classify_jpeg(&self, jpeg: &[u8]) -> Result<Classification, ClassifyError> {
        log::info!("analyzing image with {}", self.model);
        let request = build_request(&self.references, jpeg, 0.0);

        for attempt in 1..=self.retry.max_attempts {
            match self.oracle.generate(&self.model, &request) {
                Ok(raw) => {
                    let raw = raw.trim();
                    log::debug!("oracle reply: {}", raw);
                    let parsed = parse_gate_response(raw);
                    log::info!(
                        "parsed: status={}, confidence={}",
                        parsed.status,
                        parsed.confidence
                    );
                    let gated = parsed.gated(self.threshold);
                    if gated != parsed {
                        log::info!(
                            "confidence {} below threshold {}, treating as unknown",
                            parsed.confidence,
                            self.threshold
                        );
                    }
                    return Ok(gated);
                }
                Err(e) if e.is_rate_limited() => {
                    let wait = self.retry.wait_after(attempt);
                    log::warn!(
                        "rate limited; waiting {}s before retry {}/{}",
                        wait.as_secs(),
                        attempt,
                        self.retry.max_attempts
                    );
                    if !self.sleeper.sleep(wait) {
                        return Err(ClassifyError::Interrupted);
                    }
                }
                Err(e) => {
                    log::error!("oracle call failed: {}", e);
                    return Err(ClassifyError::Oracle(e));
                }
            }
        }

        log::error!("max retries exceeded due to rate limiting");
        Err(ClassifyError::RateLimited {
            attempts: self.retry.max_attempts,
        })
    }
}

impl<O: VisionOracle> Classify for GateClassifier<O> {
    fn classify(&mut self, frame: &Frame) -> Result<Classification, ClassifyError> {
        self.classify_jpeg(frame.jpeg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::oracle::{OracleError, OracleRequest};
    use crate::classify::result::GateStatus;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedOracle {
        replies: RefCell<VecDeque<Result<String, OracleError>>>,
        calls: RefCell<u32>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<Result<String, OracleError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl VisionOracle for ScriptedOracle {
        fn generate(&self, _model: &str, request: &OracleRequest) -> Result<String, OracleError> {
            assert_eq!(request.temperature, 0.0);
            *self.calls.borrow_mut() += 1;
            self.replies
                .borrow_mut()
                .pop_front()
                .expect("unexpected oracle call")
        }

        fn list_models(&self) -> Result<Vec<String>, OracleError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> bool {
            self.waits.lock().unwrap().push(duration);
            true
        }
    }

    fn classifier(
        replies: Vec<Result<String, OracleError>>,
        sleeper: Arc<RecordingSleeper>,
    ) -> GateClassifier<ScriptedOracle> {
        GateClassifier::new(
            ScriptedOracle::new(replies),
            "gemini-2.5-flash",
            ReferenceSet::empty(),
            70,
        )
        .with_sleeper(sleeper)
    }

    #[test]
    fn confident_result_passes_through() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let c = classifier(
            vec![Ok(r#"{"status": "OPEN", "confidence": 92}"#.to_string())],
            sleeper.clone(),
        );
        let result = c.classify_jpeg(b"jpeg").expect("classify");
        assert_eq!(result, Classification::new(GateStatus::Open, 92));
        assert!(sleeper.waits.lock().unwrap().is_empty());
    }

    #[test]
    fn low_confidence_open_is_gated_to_unknown() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let c = classifier(
            vec![Ok(r#"{"status": "OPEN", "confidence": 55}"#.to_string())],
            sleeper,
        );
        let result = c.classify_jpeg(b"jpeg").expect("classify");
        assert_eq!(result, Classification::new(GateStatus::Unknown, 55));
    }

    #[test]
    fn keyword_fallback_is_gated_like_any_other_result() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let c = classifier(vec![Ok("it is open".to_string())], sleeper);
        let result = c.classify_jpeg(b"jpeg").expect("classify");
        assert_eq!(result, Classification::new(GateStatus::Unknown, 50));
    }

    #[test]
    fn rate_limits_back_off_linearly_then_fail() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let c = classifier(
            vec![
                Err(OracleError::rate_limited("429")),
                Err(OracleError::rate_limited("429")),
                Err(OracleError::rate_limited("429")),
            ],
            sleeper.clone(),
        );
        let err = c.classify_jpeg(b"jpeg").unwrap_err();
        assert!(matches!(err, ClassifyError::RateLimited { attempts: 3 }));
        assert_eq!(
            *sleeper.waits.lock().unwrap(),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(180)
            ]
        );
        assert_eq!(*c.oracle.calls.borrow(), 3);
    }

    #[test]
    fn rate_limit_then_success_recovers() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let c = classifier(
            vec![
                Err(OracleError::rate_limited("429")),
                Ok(r#"{"status": "CLOSED", "confidence": 97}"#.to_string()),
            ],
            sleeper.clone(),
        );
        let result = c.classify_jpeg(b"jpeg").expect("classify");
        assert_eq!(result, Classification::new(GateStatus::Closed, 97));
        assert_eq!(*sleeper.waits.lock().unwrap(), vec![Duration::from_secs(60)]);
    }

    #[test]
    fn other_errors_fail_immediately_without_sleeping() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let c = classifier(vec![Err(OracleError::failed("boom"))], sleeper.clone());
        let err = c.classify_jpeg(b"jpeg").unwrap_err();
        assert!(matches!(err, ClassifyError::Oracle(_)));
        assert!(sleeper.waits.lock().unwrap().is_empty());
        assert_eq!(*c.oracle.calls.borrow(), 1);
    }

    #[test]
    fn interrupted_backoff_aborts() {
        struct Interrupting;
        impl Sleeper for Interrupting {
            fn sleep(&self, _duration: Duration) -> bool {
                false
            }
        }
        let c = GateClassifier::new(
            ScriptedOracle::new(vec![Err(OracleError::rate_limited("429"))]),
            "gemini-2.5-flash",
            ReferenceSet::empty(),
            70,
        )
        .with_sleeper(Arc::new(Interrupting));
        assert!(matches!(
            c.classify_jpeg(b"jpeg"),
            Err(ClassifyError::Interrupted)
        ));
    }
}
