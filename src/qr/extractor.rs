//! Adaptive-DPI rasterization and the per-document extraction pipeline
//! (spec §4.2): rasterize via `mupdf`, run the engine chain per page,
//! filter to identifier-shaped codes, and capture debug artifacts on
//! full-page failure.

use std::collections::HashMap;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, Rgba};
use mupdf::{Document, Matrix};
use regex::Regex;

use crate::error::QrError;
use super::engines::build_chain;
use super::{DecodedCode, EngineOutcome};

#[derive(Debug, Clone, serde::Serialize)]
pub struct PageAudit {
    pub page: usize,
    pub engine_outcomes: Vec<EngineOutcome>,
    pub codes_found: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtractionInfo {
    pub pages_scanned: usize,
    pub pages_with_any_code: usize,
    pub engine_success_counts: HashMap<String, u32>,
    pub dpi_used: u16,
    pub page_audit: Vec<PageAudit>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub enum Classification {
    Success { code: String },
    Unrecognized,
    Ambiguous { candidates: Vec<String> },
}

pub struct ExtractorConfig<'a> {
    pub pattern: &'a Regex,
    pub adaptive_dpi: bool,
    pub fixed_dpi: u16,
    pub dpi_candidates: &'a [u16],
    pub engine_order: &'a [String],
    pub save_failed_images: bool,
    pub failed_images_path: &'a Path,
}

/// Result of running the extractor on one document.
pub struct ExtractionResult {
    pub valid_codes: Vec<String>,
    pub all_codes: Vec<String>,
    pub info: ExtractionInfo,
    pub classification: Classification,
}

pub fn extract(pdf_path: &Path, cfg: &ExtractorConfig) -> Result<ExtractionResult, QrError> {
    let doc = Document::open(pdf_path.to_str().ok_or_else(|| QrError::OpenFailed("non-utf8 path".into()))?)
        .map_err(|e| QrError::OpenFailed(e.to_string()))?;
    let page_count = doc.page_count().map_err(|e| QrError::OpenFailed(e.to_string()))? as usize;
    if page_count == 0 {
        return Err(QrError::OpenFailed("document has no pages".to_string()));
    }

    let chain = build_chain(cfg.engine_order);
    if chain.is_empty() {
        return Err(QrError::NoEngineAvailable);
    }

    let dpi_used = select_dpi(&doc, cfg, &chain)?;

    let mut all_codes: Vec<String> = Vec::new();
    let mut engine_success_counts: HashMap<String, u32> = HashMap::new();
    let mut page_audit = Vec::new();
    let mut pages_with_any_code = 0usize;

    for page_index in 0..page_count {
        let image = rasterize_page(&doc, page_index, dpi_used)?;
        let mut page_codes: Vec<String> = Vec::new();
        let mut outcomes = Vec::new();

        for engine in &chain {
            let result = engine.extract(&image);
            if result.success {
                *engine_success_counts.entry(result.engine.clone()).or_insert(0) += 1;
                for code in &result.codes {
                    if !page_codes.contains(&code.text) {
                        page_codes.push(code.text.clone());
                    }
                }
                outcomes.push(result);
                break;
            }
            outcomes.push(result);
        }

        if page_codes.is_empty() && cfg.save_failed_images {
            capture_debug(cfg.failed_images_path, pdf_path, page_index, &image, &outcomes);
        }

        if !page_codes.is_empty() {
            pages_with_any_code += 1;
        }
        all_codes.extend(page_codes.iter().cloned());
        page_audit.push(PageAudit { page: page_index, codes_found: page_codes.len(), engine_outcomes: outcomes });
    }

    let valid_codes: Vec<String> = {
        let mut seen = std::collections::HashSet::new();
        all_codes.iter().filter(|c| cfg.pattern.is_match(c) && seen.insert((*c).clone())).cloned().collect()
    };

    let classification = match valid_codes.len() {
        0 => Classification::Unrecognized,
        1 => Classification::Success { code: valid_codes[0].clone() },
        _ => Classification::Ambiguous { candidates: valid_codes.clone() },
    };

    let info = ExtractionInfo {
        pages_scanned: page_count,
        pages_with_any_code,
        engine_success_counts,
        dpi_used,
        page_audit,
    };

    Ok(ExtractionResult { valid_codes, all_codes, info, classification })
}

/// Rasterizes only page 1 at each candidate DPI until one yields any code;
/// falls back to `fixed_dpi` if no candidate does. Disabled adaptive mode
/// uses `fixed_dpi` directly.
fn select_dpi(
    doc: &Document,
    cfg: &ExtractorConfig,
    chain: &[Box<dyn super::QrEngine>],
) -> Result<u16, QrError> {
    if !cfg.adaptive_dpi {
        return Ok(cfg.fixed_dpi);
    }

    for &candidate in cfg.dpi_candidates {
        let image = rasterize_page(doc, 0, candidate)?;
        for engine in chain {
            if engine.extract(&image).success {
                return Ok(candidate);
            }
        }
    }
    Ok(cfg.fixed_dpi)
}

fn rasterize_page(doc: &Document, page_index: usize, dpi: u16) -> Result<DynamicImage, QrError> {
    let page = doc
        .load_page(page_index as i32)
        .map_err(|e| QrError::RasterFailed { page: page_index, reason: e.to_string() })?;
    let scale = dpi as f32 / 72.0;
    let matrix = Matrix::new_scale(scale, scale);
    let pixmap = page
        .to_pixmap(&matrix, &mupdf::Colorspace::device_rgb(), 0.0, true)
        .map_err(|e| QrError::RasterFailed { page: page_index, reason: e.to_string() })?;

    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples().to_vec();
    let has_alpha = pixmap.n() == 4;

    let buffer = if has_alpha {
        ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, samples)
            .ok_or_else(|| QrError::RasterFailed { page: page_index, reason: "buffer size mismatch".into() })?
    } else {
        let rgb = image::RgbImage::from_raw(width, height, samples)
            .ok_or_else(|| QrError::RasterFailed { page: page_index, reason: "buffer size mismatch".into() })?;
        DynamicImage::ImageRgb8(rgb).to_rgba8()
    };

    Ok(DynamicImage::ImageRgba8(buffer))
}

/// On full-page failure, save the rasterized page PNG plus a JSON of every
/// engine's result, timestamped (spec §4.2 "Debug capture").
fn capture_debug(debug_dir: &Path, pdf_path: &Path, page_index: usize, image: &DynamicImage, outcomes: &[EngineOutcome]) {
    if let Err(e) = std::fs::create_dir_all(debug_dir) {
        tracing::warn!(error = %e, "failed to create qr debug directory");
        return;
    }
    let stem = pdf_path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown");
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let base = debug_dir.join(format!("{stem}_p{page_index}_{timestamp}"));

    if let Err(e) = image.save(base.with_extension("png")) {
        tracing::warn!(error = %e, "failed to save qr debug image");
    }
    let payload = serde_json::json!({ "page": page_index, "engines": outcomes });
    if let Err(e) = std::fs::write(base.with_extension("json"), serde_json::to_vec_pretty(&payload).unwrap_or_default()) {
        tracing::warn!(error = %e, "failed to save qr debug metadata");
    }
}

pub fn default_pattern() -> Regex {
    Regex::new(r"^[0-9]{14}$").unwrap()
}

pub fn filter_valid(codes: &[DecodedCode], pattern: &Regex) -> Vec<String> {
    codes.iter().map(|c| c.text.clone()).filter(|t| pattern.is_match(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_single_code_as_success() {
        let pattern = default_pattern();
        let valid = vec!["20251010123456".to_string()];
        let classification = match valid.len() {
            0 => Classification::Unrecognized,
            1 => Classification::Success { code: valid[0].clone() },
            _ => Classification::Ambiguous { candidates: valid.clone() },
        };
        assert!(matches!(classification, Classification::Success { .. }));
        assert!(pattern.is_match(&valid[0]));
    }

    #[test]
    fn classifies_two_codes_as_ambiguous() {
        let valid = vec!["11111111111111".to_string(), "22222222222222".to_string()];
        let classification = match valid.len() {
            0 => Classification::Unrecognized,
            1 => Classification::Success { code: valid[0].clone() },
            _ => Classification::Ambiguous { candidates: valid.clone() },
        };
        assert!(matches!(classification, Classification::Ambiguous { .. }));
    }
}
