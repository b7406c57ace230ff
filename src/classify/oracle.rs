use std::fmt;

/// One piece of a multi-part classification request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestPart {
    Text(String),
    Jpeg(Vec<u8>),
}

/// A multi-part prompt plus sampling settings.
#[derive(Clone, Debug, PartialEq)]
pub struct OracleRequest {
    pub parts: Vec<RequestPart>,
    pub temperature: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OracleErrorKind {
    /// Quota or rate limit hit (HTTP 429 / RESOURCE_EXHAUSTED). Worth retrying later.
    RateLimited,
    /// Anything else: transport failure, bad request, unusable reply.
    Failed,
}

/// Error returned by a vision oracle call.
#[derive(Debug)]
pub struct OracleError {
    kind: OracleErrorKind,
    message: String,
}

impl OracleError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: OracleErrorKind::RateLimited,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: OracleErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> OracleErrorKind {
        self.kind
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == OracleErrorKind::RateLimited
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OracleErrorKind::RateLimited => write!(f, "rate limited: {}", self.message),
            OracleErrorKind::Failed => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for OracleError {}

/// Remote image classification service.
///
/// Implementations make exactly one network call per method invocation and
/// never retry; retry policy lives in `GateClassifier`.
pub trait VisionOracle {
    /// Send a request to `model` and return the free-form reply text.
    fn generate(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError>;

    /// Identifiers of every model the credential can use, as reported by the service.
    fn list_models(&self) -> Result<Vec<String>, OracleError>;
}

impl<T: VisionOracle + ?Sized> VisionOracle for &T {
    fn generate(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError> {
        (**self).generate(model, request)
    }

    fn list_models(&self) -> Result<Vec<String>, OracleError> {
        (**self).list_models()
    }
}

impl<T: VisionOracle + ?Sized> VisionOracle for Box<T> {
    fn generate(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError> {
        (**self).generate(model, request)
    }

    fn list_models(&self) -> Result<Vec<String>, OracleError> {
        (**self).list_models()
    }
}

impl<T: VisionOracle + ?Sized> VisionOracle for std::sync::Arc<T> {
    fn generate(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError> {
        (**self).generate(model, request)
    }

    fn list_models(&self) -> Result<Vec<String>, OracleError> {
        (**self).list_models()
    }
}
