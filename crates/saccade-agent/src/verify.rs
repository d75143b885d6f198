//! Verification engine — did the last action visibly change anything?
//!
//! The loop never trusts the oracle's self-report of success, only the
//! observed pixel change between the pre-action baseline and a fresh
//! screenshot. No change within the threshold triggers self-healing: retry,
//! then human escalation.

use eoka::Page;
use image::{DynamicImage, GenericImageView};
use tracing::{debug, info};

use crate::session::Status;
use crate::{Error, Result};

/// Settle delay before the post-action screenshot.
const VERIFY_SETTLE_MS: u64 = 1000;
/// Per-pixel tolerance: summed RGB channel delta above this counts as changed.
const CHANNEL_DELTA_TOLERANCE: i16 = 30;
/// Consecutive no-effect cycles tolerated before asking a human.
const MAX_NO_EFFECT_RETRIES: u32 = 2;

/// Outcome of one verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub status: Status,
    pub error_count: u32,
}

/// Difference ratio between two encoded images: 0.0 identical, 1.0 fully
/// different. Dimension mismatches are reconciled by resizing the second
/// image to the first's geometry.
pub fn pixel_diff(first: &[u8], second: &[u8]) -> Result<f64> {
    let img1 = load(first)?;
    let img2 = load(second)?;

    let (w1, h1) = img1.dimensions();
    let img2 = if img2.dimensions() != (w1, h1) {
        img2.resize_exact(w1, h1, image::imageops::FilterType::Nearest)
    } else {
        img2
    };

    let total = w1 as u64 * h1 as u64;
    if total == 0 {
        return Ok(0.0);
    }

    let rgb1 = img1.to_rgb8();
    let rgb2 = img2.to_rgb8();

    let mut changed = 0u64;
    for (p1, p2) in rgb1.pixels().zip(rgb2.pixels()) {
        let delta = (p1[0] as i16 - p2[0] as i16).abs()
            + (p1[1] as i16 - p2[1] as i16).abs()
            + (p1[2] as i16 - p2[2] as i16).abs();
        if delta > CHANNEL_DELTA_TOLERANCE {
            changed += 1;
        }
    }

    Ok(changed as f64 / total as f64)
}

fn load(data: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(data).map_err(|e| Error::Image(e.to_string()))
}

/// The self-healing law. Pure so every branch is testable without a browser:
/// below-threshold ratios retry until the retry budget is spent, then
/// escalate; anything at or above the threshold resets the counter.
pub fn self_heal(ratio: f64, threshold: f64, error_count: u32) -> Verdict {
    if ratio < threshold {
        if error_count >= MAX_NO_EFFECT_RETRIES {
            return Verdict {
                status: Status::WaitForHuman,
                error_count,
            };
        }
        return Verdict {
            status: Status::Retry,
            error_count: error_count + 1,
        };
    }
    Verdict {
        status: Status::Running,
        error_count: 0,
    }
}

/// Wait for the page to settle, re-screenshot, and judge the action's effect
/// against the pre-action baseline.
pub async fn check(
    page: &Page,
    baseline: &[u8],
    threshold: f64,
    error_count: u32,
) -> Result<Verdict> {
    page.wait(VERIFY_SETTLE_MS).await;
    let current = page.screenshot().await?;
    let ratio = pixel_diff(baseline, &current)?;
    debug!("screen change ratio: {:.4}", ratio);

    let verdict = self_heal(ratio, threshold, error_count);
    if verdict.status != Status::Running {
        info!("self-healing triggered: action had no visible effect");
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, fill: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb(fill));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_identical_images_diff_zero() {
        let a = png(16, 16, [120, 120, 120]);
        assert_eq!(pixel_diff(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_fully_different_images_diff_one() {
        let black = png(16, 16, [0, 0, 0]);
        let white = png(16, 16, [255, 255, 255]);
        assert_eq!(pixel_diff(&black, &white).unwrap(), 1.0);
    }

    #[test]
    fn test_change_within_tolerance_ignored() {
        // Summed channel delta of exactly 30 does not exceed the tolerance
        let a = png(16, 16, [100, 100, 100]);
        let b = png(16, 16, [110, 110, 110]);
        assert_eq!(pixel_diff(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_change_above_tolerance_counted() {
        let a = png(16, 16, [100, 100, 100]);
        let b = png(16, 16, [111, 111, 111]);
        assert_eq!(pixel_diff(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn test_dimension_mismatch_is_reconciled() {
        let a = png(16, 16, [50, 50, 50]);
        let b = png(8, 8, [50, 50, 50]);
        assert_eq!(pixel_diff(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_image_data_errors() {
        assert!(pixel_diff(b"not a png", b"also not").is_err());
    }

    #[test]
    fn test_no_effect_first_retry() {
        let verdict = self_heal(0.0, 0.01, 0);
        assert_eq!(verdict.status, Status::Retry);
        assert_eq!(verdict.error_count, 1);
    }

    #[test]
    fn test_no_effect_second_retry() {
        let verdict = self_heal(0.004, 0.01, 1);
        assert_eq!(verdict.status, Status::Retry);
        assert_eq!(verdict.error_count, 2);
    }

    #[test]
    fn test_third_no_effect_escalates() {
        // Scenario: two consecutive no-effect cycles, then a third
        let first = self_heal(0.0, 0.01, 0);
        let second = self_heal(0.0, 0.01, first.error_count);
        let third = self_heal(0.0, 0.01, second.error_count);
        assert_eq!(first.status, Status::Retry);
        assert_eq!(second.status, Status::Retry);
        assert_eq!(third.status, Status::WaitForHuman);
        assert_eq!(third.error_count, 2);
    }

    #[test]
    fn test_effective_action_resets_counter() {
        let verdict = self_heal(0.5, 0.01, 2);
        assert_eq!(verdict.status, Status::Running);
        assert_eq!(verdict.error_count, 0);
    }

    #[test]
    fn test_ratio_at_threshold_is_effective() {
        let verdict = self_heal(0.01, 0.01, 1);
        assert_eq!(verdict.status, Status::Running);
        assert_eq!(verdict.error_count, 0);
    }

    #[test]
    fn test_identical_screens_never_running() {
        // Identical pre/post screenshots must never be judged effective
        let a = png(16, 16, [10, 20, 30]);
        let ratio = pixel_diff(&a, &a).unwrap();
        for error_count in 0..4 {
            assert_ne!(self_heal(ratio, 0.01, error_count).status, Status::Running);
        }
    }
}
