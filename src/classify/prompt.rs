//! Prompt construction and the few-shot reference set.

use std::path::Path;
use std::sync::Arc;

use super::oracle::{OracleRequest, RequestPart};

pub const PROMPT_WITH_REFERENCES: &str = r#"You are a gate status classifier. Your task is to determine if a gate is OPEN or CLOSED by comparing the query image against the reference examples provided.

INSTRUCTIONS:
- Compare the query image carefully against the labeled reference images
- CLOSED: The gate is upright and aligned with the fence/wall, bars are vertical
- OPEN: The gate is rotated/swung inward, creating an angle or gap
- If unsure, respond UNKNOWN with low confidence

Respond ONLY with valid JSON (no markdown, no extra text):
{"status": "OPEN", "confidence": 85}
{"status": "CLOSED", "confidence": 95}
{"status": "UNKNOWN", "confidence": 30}"#;

pub const PROMPT_ZERO_SHOT: &str = r#"You are a gate status classifier analyzing a cropped image of a metal bar gate.

INSTRUCTIONS:
- CLOSED: The gate is upright, vertical bars aligned with the fence/wall
- OPEN: The gate is rotated/swung inward, creating an angle or visible gap
- If unsure, respond UNKNOWN with low confidence

Respond ONLY with valid JSON (no markdown, no extra text):
{"status": "OPEN", "confidence": 85}
{"status": "CLOSED", "confidence": 95}
{"status": "UNKNOWN", "confidence": 30}"#;

const QUERY_LEAD_IN: &str = "Now classify this image:";

/// Reference files looked up in the reference directory, in request order.
pub const REFERENCE_FILES: [(&str, &str); 4] = [
    ("closed_day.jpg", "Example - CLOSED gate (daytime):"),
    ("closed_night.jpg", "Example - CLOSED gate (nighttime):"),
    ("open_day.jpg", "Example - OPEN gate (daytime):"),
    ("open_night.jpg", "Example - OPEN gate (nighttime):"),
];

/// Labelled example image used to steer the oracle.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceExample {
    pub label: String,
    pub jpeg: Vec<u8>,
}

/// Reference examples loaded once at startup. Cheap to clone, never mutated.
#[derive(Clone, Debug, Default)]
pub struct ReferenceSet {
    examples: Arc<[ReferenceExample]>,
}

impl ReferenceSet {
    pub fn new(examples: Vec<ReferenceExample>) -> Self {
        Self {
            examples: examples.into(),
        }
    }

    /// The zero-shot set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the known reference files from `dir`. Missing files are skipped;
    /// files that cannot be read or decoded are logged and skipped.
    pub fn load(dir: &Path) -> Self {
        if !dir.is_dir() {
            log::info!("reference directory not found: {}", dir.display());
            log::info!("running in zero-shot mode (no reference images)");
            return Self::empty();
        }

        let mut examples = Vec::new();
        for (filename, label) in REFERENCE_FILES {
            let path = dir.join(filename);
            if !path.exists() {
                log::info!("reference not found (optional): {}", filename);
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("failed to read reference {}: {}", filename, e);
                    continue;
                }
            };
            if let Err(e) = image::load_from_memory(&bytes) {
                log::warn!("failed to decode reference {}: {}", filename, e);
                continue;
            }
            log::info!("loaded reference: {}", filename);
            examples.push(ReferenceExample {
                label: label.to_string(),
                jpeg: bytes,
            });
        }

        if examples.is_empty() {
            log::info!("no reference images found, running in zero-shot mode");
        } else {
            log::info!(
                "loaded {} reference images for few-shot mode",
                examples.len()
            );
        }
        Self::new(examples)
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceExample> {
        self.examples.iter()
    }
}

/// Assemble the request for one query image.
pub fn build_request(references: &ReferenceSet, query_jpeg: &[u8], temperature: f32) -> OracleRequest {
    let mut parts = Vec::with_capacity(references.len() * 2 + 3);
    if references.is_empty() {
        parts.push(RequestPart::Text(PROMPT_ZERO_SHOT.to_string()));
    } else {
        parts.push(RequestPart::Text(PROMPT_WITH_REFERENCES.to_string()));
        for example in references.iter() {
            parts.push(RequestPart::Text(example.label.clone()));
            parts.push(RequestPart::Jpeg(example.jpeg.clone()));
        }
        parts.push(RequestPart::Text(QUERY_LEAD_IN.to_string()));
    }
    parts.push(RequestPart::Jpeg(query_jpeg.to_vec()));
    OracleRequest { parts, temperature }
}
