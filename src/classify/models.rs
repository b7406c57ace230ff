//! Startup model selection.

use anyhow::{anyhow, Result};

use super::oracle::VisionOracle;

/// Preferred vision models, best first. Flash variants have the higher free
/// tier limits so they rank ahead of pro; newer versions rank ahead of older.
pub const PREFERRED_MODELS: [&str; 9] = [
    "gemini-3-flash",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-3-pro",
    "gemini-2.5-pro",
    "gemini-2.0-pro",
    "gemini-1.5-pro",
    "gemini-pro",
];

const MODEL_NAMESPACE: &str = "models/";
const VISION_FAMILY: &str = "gemini";

/// Strip the namespace prefix and keep only vision-capable family names,
/// preserving service order.
pub fn vision_models(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|name| name.strip_prefix(MODEL_NAMESPACE).unwrap_or(name))
        .filter(|name| name.to_lowercase().contains(VISION_FAMILY))
        .map(|name| name.to_string())
        .collect()
}

/// Pick a model from the (already filtered) available list.
pub fn select_model(available: &[String]) -> Option<String> {
    for preferred in PREFERRED_MODELS {
        if let Some(found) = available.iter().find(|name| name.starts_with(preferred)) {
            return Some(found.clone());
        }
    }

    if let Some(found) = available.iter().find(|name| {
        let lower = name.to_lowercase();
        lower.contains(VISION_FAMILY) && lower.contains("pro")
    }) {
        log::info!("fallback model: {}", found);
        return Some(found.clone());
    }

    available.first().cloned()
}

/// List the oracle's models and choose one. Fails when nothing usable exists.
pub fn find_best_model<O: VisionOracle + ?Sized>(oracle: &O) -> Result<String> {
    log::info!("listing available models");
    let raw = oracle
        .list_models()
        .map_err(|e| anyhow!("failed to list models: {}", e))?;
    let available = vision_models(&raw);
    for name in &available {
        log::debug!("found model: {}", name);
    }
    let selected =
        select_model(&available).ok_or_else(|| anyhow!("no suitable vision model available"))?;
    log::info!("selected model: {}", selected);
    Ok(selected)
}
