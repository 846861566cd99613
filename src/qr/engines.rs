//! The three engines named in spec §4.2: a baseline 2D decoder, an
//! alternate "try-harder" decoder, and a preprocessing decoder that feeds
//! the baseline several derived images.

use std::time::{Duration, Instant};

use image::{DynamicImage, GrayImage};

use super::{DecodedCode, EngineOutcome, QrEngine};

fn outcome(engine: &str, start: Instant, codes: Vec<DecodedCode>, error: Option<String>) -> EngineOutcome {
    EngineOutcome {
        engine: engine.to_string(),
        success: !codes.is_empty(),
        codes,
        processing_time_ms: start.elapsed().as_millis(),
        error,
    }
}

/// Baseline decoder backed by `rqrr` — pure-Rust, no native dependency, so
/// `available()` is always `true`.
pub struct BaselineEngine;

impl QrEngine for BaselineEngine {
    fn name(&self) -> &'static str {
        "ZBAR"
    }

    fn available(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn extract(&self, image: &DynamicImage) -> EngineOutcome {
        let start = Instant::now();
        let gray = image.to_luma8();
        let mut prepared = rqrr::PreparedImage::prepare(gray);
        let grids = prepared.detect_grids();

        let mut codes = Vec::new();
        for grid in grids {
            if let Ok((_meta, text)) = grid.decode() {
                codes.push(DecodedCode { text });
            }
        }
        outcome(self.name(), start, codes, None)
    }
}

/// Alternate "try-harder" decoder backed by `rxing`, tolerant of rotation
/// and partial damage that trips up the baseline.
pub struct AlternateEngine;

impl QrEngine for AlternateEngine {
    fn name(&self) -> &'static str {
        "ZXING"
    }

    fn available(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(8)
    }

    fn extract(&self, image: &DynamicImage) -> EngineOutcome {
        let start = Instant::now();
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();

        let mut hints = rxing::DecodingHintDictionary::default();
        hints.insert(
            rxing::DecodeHintType::TRY_HARDER,
            rxing::DecodeHintValue::TryHarder(true),
        );
        hints.insert(
            rxing::DecodeHintType::POSSIBLE_FORMATS,
            rxing::DecodeHintValue::PossibleFormats(std::collections::HashSet::from([
                rxing::BarcodeFormat::QR_CODE,
            ])),
        );

        match rxing::helpers::detect_in_luma_with_hints(gray.into_raw(), width, height, None, &mut hints) {
            Ok(result) => {
                let text = result.getText().to_string();
                outcome(self.name(), start, vec![DecodedCode { text }], None)
            }
            Err(_) => outcome(self.name(), start, Vec::new(), None),
        }
    }
}

/// Preprocessing decoder: re-runs the baseline on several derived images
/// and deduplicates the union of codes found.
pub struct PreprocessingEngine;

impl PreprocessingEngine {
    fn derived_images(gray: &GrayImage) -> Vec<GrayImage> {
        let mut derived = Vec::new();

        derived.push(imageproc::contrast::adaptive_threshold(gray, 15));

        let dyn_img = DynamicImage::ImageLuma8(gray.clone());
        derived.push(dyn_img.unsharpen(1.5, 10).to_luma8());

        derived.push(imageproc::filter::median_filter(gray, 2, 2));

        if let Some(angle) = deskew_angle(gray) {
            let rotated = imageproc::geometric_transformations::rotate_about_center(
                gray,
                angle,
                imageproc::geometric_transformations::Interpolation::Bilinear,
                image::Luma([255u8]),
            );
            derived.push(rotated);
        }

        derived
    }
}

/// Estimates skew from the dominant Hough line angle; returns `None` when
/// no confident line is found (flat page, no ruling).
fn deskew_angle(gray: &GrayImage) -> Option<f32> {
    let edges = imageproc::edges::canny(gray, 20.0, 50.0);
    let lines = imageproc::hough::detect_lines(
        &edges,
        imageproc::hough::LineDetectionOptions { vote_threshold: 100, suppression_radius: 8 },
    );
    if lines.is_empty() {
        return None;
    }
    let mut angles: Vec<f32> = lines.iter().map(|l| l.angle_in_degrees as f32).collect();
    angles.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = angles[angles.len() / 2];
    // Lines near-vertical (text baselines, QR finder edges) imply near-zero skew.
    let skew = median - 90.0;
    if skew.abs() < 0.1 || skew.abs() > 15.0 {
        None
    } else {
        Some(-skew.to_radians())
    }
}

impl QrEngine for PreprocessingEngine {
    fn name(&self) -> &'static str {
        "PYZBAR_PREPROC"
    }

    fn available(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn extract(&self, image: &DynamicImage) -> EngineOutcome {
        let start = Instant::now();
        let gray = image.to_luma8();

        let mut seen = std::collections::HashSet::new();
        let mut codes = Vec::new();
        for derived in Self::derived_images(&gray) {
            let mut prepared = rqrr::PreparedImage::prepare(derived);
            for grid in prepared.detect_grids() {
                if let Ok((_meta, text)) = grid.decode() {
                    if seen.insert(text.clone()) {
                        codes.push(DecodedCode { text });
                    }
                }
            }
        }
        outcome(self.name(), start, codes, None)
    }
}

/// Builds the configured engine chain, skipping any name that isn't
/// recognized (treated as "unavailable at runtime").
pub fn build_chain(engine_order: &[String]) -> Vec<Box<dyn QrEngine>> {
    engine_order
        .iter()
        .filter_map(|name| -> Option<Box<dyn QrEngine>> {
            match name.as_str() {
                "ZBAR" => Some(Box::new(BaselineEngine)),
                "ZXING" => Some(Box::new(AlternateEngine)),
                "PYZBAR_PREPROC" => Some(Box::new(PreprocessingEngine)),
                _ => None,
            }
        })
        .filter(|engine| engine.available())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_skips_unknown_engine_names() {
        let chain = build_chain(&["ZBAR".to_string(), "BOGUS".to_string(), "ZXING".to_string()]);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name(), "ZBAR");
        assert_eq!(chain[1].name(), "ZXING");
    }

    #[test]
    fn baseline_returns_empty_on_blank_image() {
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 100, image::Luma([255u8])));
        let outcome = BaselineEngine.extract(&blank);
        assert!(!outcome.success);
        assert!(outcome.codes.is_empty());
    }
}
