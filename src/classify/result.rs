use std::fmt;

use super::oracle::OracleError;

/// Gate state as reported by the classifier and published on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateStatus {
    Open,
    Closed,
    Unknown,
}

impl GateStatus {
    /// Lower-case wire form used in MQTT payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Open => "open",
            GateStatus::Closed => "closed",
            GateStatus::Unknown => "unknown",
        }
    }

    /// Case-insensitive parse of `OPEN` / `CLOSED` / `UNKNOWN`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "OPEN" => Some(GateStatus::Open),
            "CLOSED" => Some(GateStatus::Closed),
            "UNKNOWN" => Some(GateStatus::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful classification. Confidence is always within 0..=100.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub status: GateStatus,
    pub confidence: u8,
}

impl Classification {
    pub fn new(status: GateStatus, confidence: u8) -> Self {
        Self {
            status,
            confidence: confidence.min(100),
        }
    }

    /// Downgrade to `Unknown` when confidence is below `threshold`, keeping the
    /// reported confidence.
    pub fn gated(self, threshold: u8) -> Self {
        if self.confidence < threshold {
            Self {
                status: GateStatus::Unknown,
                confidence: self.confidence,
            }
        } else {
            self
        }
    }
}

/// Classification failure. Any of these aborts the poll cycle without publishing.
#[derive(Debug)]
pub enum ClassifyError {
    /// The oracle call failed for a reason other than rate limiting.
    Oracle(OracleError),
    /// Every attempt was rate limited.
    RateLimited { attempts: u32 },
    /// Shutdown was requested while waiting to retry.
    Interrupted,
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::Oracle(err) => write!(f, "oracle call failed: {}", err),
            ClassifyError::RateLimited { attempts } => {
                write!(f, "rate limited on all {} attempts", attempts)
            }
            ClassifyError::Interrupted => f.write_str("interrupted during retry backoff"),
        }
    }
}

impl std::error::Error for ClassifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClassifyError::Oracle(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_downgrades_low_confidence_and_keeps_value() {
        let gated = Classification::new(GateStatus::Open, 65).gated(70);
        assert_eq!(gated, Classification::new(GateStatus::Unknown, 65));
    }

    #[test]
    fn gating_keeps_results_at_or_above_threshold() {
        let open = Classification::new(GateStatus::Open, 70);
        assert_eq!(open.gated(70), open);
        let closed = Classification::new(GateStatus::Closed, 95);
        assert_eq!(closed.gated(70), closed);
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(GateStatus::parse("open"), Some(GateStatus::Open));
        assert_eq!(GateStatus::parse("Closed"), Some(GateStatus::Closed));
        assert_eq!(GateStatus::parse("UNKNOWN"), Some(GateStatus::Unknown));
        assert_eq!(GateStatus::parse("ajar"), None);
    }
}
