//! QR multi-engine extractor (spec §4.2): adaptive-DPI rasterization plus an
//! ordered engine chain with debug capture on full-page failure.

pub mod engines;
pub mod extractor;

use std::time::Duration;

/// One decoded symbol, after UTF-8 and QR-type filtering.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DecodedCode {
    pub text: String,
}

/// Result of a single engine's attempt on a single rasterized page.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineOutcome {
    pub engine: String,
    pub success: bool,
    pub codes: Vec<DecodedCode>,
    pub processing_time_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Capability contract every engine implements (spec §4.2).
pub trait QrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Static capability probe — false when a native dependency is missing.
    fn available(&self) -> bool;

    /// Per-call time budget; engines are expected to self-enforce this.
    fn timeout(&self) -> Duration;

    /// Decode QR symbols from a grayscale image. Must never panic on
    /// malformed input; return an `error` outcome instead.
    fn extract(&self, image: &image::DynamicImage) -> EngineOutcome;
}
