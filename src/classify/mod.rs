//! Gate classification against a remote vision oracle.
//!
//! - `oracle`: the request/response seam (`VisionOracle`) and its error kinds
//! - `gemini`: REST implementation of the oracle
//! - `models`: startup model selection
//! - `prompt`: prompts and the few-shot reference set
//! - `parse`: tolerant reply parsing
//! - `client`: retrying, threshold-gated `GateClassifier`

pub mod client;
pub mod gemini;
pub mod models;
pub mod oracle;
pub mod parse;
pub mod prompt;
pub mod result;

pub use client::{
    Classify, GateClassifier, RetryPolicy, Sleeper, ThreadSleeper, DEFAULT_MAX_RETRIES,
    RATE_LIMIT_BACKOFF,
};
pub use gemini::GeminiClient;
pub use models::{find_best_model, select_model, vision_models, PREFERRED_MODELS};
pub use oracle::{OracleError, OracleErrorKind, OracleRequest, RequestPart, VisionOracle};
pub use parse::{parse_gate_response, KEYWORD_FALLBACK_CONFIDENCE};
pub use prompt::{build_request, ReferenceExample, ReferenceSet};
pub use result::{Classification, ClassifyError, GateStatus};
