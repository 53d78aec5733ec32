//! Visual regression checks against local screenshot baselines
//!
//! Screenshots from one run land in `<actual_dir>/<batch_id>/`; baselines
//! are shared across batches. A missing baseline is reported, never
//! silently accepted, unless baselines are being updated.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Per-channel difference tolerated before a pixel counts as changed
const CHANNEL_TOLERANCE: u8 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDiff {
    pub name: String,

    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,
}

/// Pixel-level comparison of two images
#[derive(Debug, Clone, PartialEq)]
pub struct PixelDiff {
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub diff_image: Option<RgbaImage>,
}

impl PixelDiff {
    pub fn percent(&self) -> f64 {
        if self.total_pixels == 0 {
            return 0.0;
        }
        (self.diff_pixels as f64 / self.total_pixels as f64) * 100.0
    }
}

/// Compare two images pixel by pixel
///
/// Pixels outside the overlap of differently sized images count as
/// changed. The diff image paints changed pixels red over a dimmed copy of
/// the actual screenshot.
pub fn compare_images(actual: &RgbaImage, baseline: &RgbaImage) -> PixelDiff {
    let width = actual.width().max(baseline.width());
    let height = actual.height().max(baseline.height());
    let total_pixels = width as u64 * height as u64;

    let mut diff_image = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = (x < actual.width() && y < actual.height()).then(|| actual.get_pixel(x, y));
            let b = (x < baseline.width() && y < baseline.height()).then(|| baseline.get_pixel(x, y));

            match (a, b) {
                (Some(a), Some(b)) if !pixels_differ(a, b) => {
                    diff_image.put_pixel(x, y, Rgba([a[0] / 2, a[1] / 2, a[2] / 2, 128]));
                }
                _ => {
                    diff_pixels += 1;
                    diff_image.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                }
            }
        }
    }

    PixelDiff {
        diff_pixels,
        total_pixels,
        diff_image: (diff_pixels > 0).then_some(diff_image),
    }
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.0.iter().zip(b.0.iter()).any(|(x, y)| x.abs_diff(*y) > CHANNEL_TOLERANCE)
}

fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Baseline comparison for one batch of screenshots
pub struct VisualTester {
    baseline_dir: PathBuf,
    actual_dir: PathBuf,
    diff_dir: PathBuf,
    threshold: f64,
    update_baselines: bool,
}

impl VisualTester {
    pub fn new(config: &VisualConfig) -> E2eResult<Self> {
        let tester = Self {
            baseline_dir: config.baseline_dir.clone(),
            actual_dir: config.batch_actual_dir(),
            diff_dir: config.batch_diff_dir(),
            threshold: config.threshold,
            update_baselines: config.update_baselines,
        };

        std::fs::create_dir_all(&tester.baseline_dir)?;
        std::fs::create_dir_all(&tester.actual_dir)?;
        std::fs::create_dir_all(&tester.diff_dir)?;
        Ok(tester)
    }

    pub fn actual_dir(&self) -> &Path {
        &self.actual_dir
    }

    /// Compare `<name>.png` from this batch against its baseline
    pub fn compare(&self, name: &str, threshold: Option<f64>) -> E2eResult<VisualDiff> {
        let threshold = threshold.unwrap_or(self.threshold);
        let actual_path = self.actual_dir.join(format!("{}.png", name));
        let baseline_path = self.baseline_dir.join(format!("{}.png", name));

        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "Actual screenshot not found: {}",
                actual_path.display()
            )));
        }

        if !baseline_path.exists() {
            if !self.update_baselines {
                return Err(E2eError::BaselineNotFound(baseline_path.display().to_string()));
            }
            info!("Creating baseline for '{}'", name);
            std::fs::copy(&actual_path, &baseline_path)?;
            return Ok(VisualDiff {
                name: name.to_string(),
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: 0,
                diff_image_path: None,
            });
        }

        if hash_file(&actual_path)? == hash_file(&baseline_path)? {
            debug!("Screenshot '{}' identical to baseline", name);
            return Ok(VisualDiff {
                name: name.to_string(),
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: 0,
                diff_image_path: None,
            });
        }

        let actual = image::open(&actual_path)?.to_rgba8();
        let baseline = image::open(&baseline_path)?.to_rgba8();
        if actual.dimensions() != baseline.dimensions() {
            warn!(
                "Screenshot '{}' dimensions differ: actual {:?} vs baseline {:?}",
                name,
                actual.dimensions(),
                baseline.dimensions()
            );
        }

        let diff = compare_images(&actual, &baseline);
        let diff_percent = diff.percent();
        let matches = diff_percent <= threshold;

        let diff_image_path = match &diff.diff_image {
            Some(img) => {
                let path = self.diff_dir.join(format!("{}-diff.png", name));
                img.save(&path)?;
                Some(path)
            }
            None => None,
        };

        if self.update_baselines && !matches {
            std::fs::copy(&actual_path, &baseline_path)?;
            info!("Updated baseline for '{}'", name);
        } else if !matches {
            warn!(
                "Visual regression in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
                name, diff_percent, threshold
            );
        }

        Ok(VisualDiff {
            name: name.to_string(),
            matches: matches || self.update_baselines,
            diff_percent,
            diff_pixels: diff.diff_pixels,
            total_pixels: diff.total_pixels,
            diff_image_path,
        })
    }

    /// Copy every screenshot of this batch over its baseline
    pub fn update_all(&self) -> E2eResult<usize> {
        let mut updated = 0;
        for entry in std::fs::read_dir(&self.actual_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "png").unwrap_or(false) {
                if let Some(file_name) = path.file_name() {
                    std::fs::copy(&path, self.baseline_dir.join(file_name))?;
                    updated += 1;
                }
            }
        }
        info!("Updated {} baseline(s)", updated);
        Ok(updated)
    }
}

/// Configuration for visual checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Compare screenshots at all
    pub enabled: bool,

    /// Fail the script on a mismatch instead of only reporting it
    pub fail_on_diff: bool,

    /// Names this run's screenshot directory
    pub batch_id: String,

    /// Allowed share of changed pixels (0.0 - 100.0 percent)
    pub threshold: f64,

    /// Ceiling for capturing and comparing one screenshot
    pub timeout_ms: u64,

    /// Overwrite baselines with this run's screenshots
    pub update_baselines: bool,

    pub baseline_dir: PathBuf,
    pub actual_dir: PathBuf,
    pub diff_dir: PathBuf,
}

impl VisualConfig {
    pub fn batch_actual_dir(&self) -> PathBuf {
        self.actual_dir.join(&self.batch_id)
    }

    pub fn batch_diff_dir(&self) -> PathBuf {
        self.diff_dir.join(&self.batch_id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_on_diff: true,
            batch_id: "f8da1590-2b07-4ea1-82a4-13a9dc0c64d9".to_string(),
            threshold: 0.5,
            timeout_ms: 180_000,
            update_baselines: false,
            baseline_dir: PathBuf::from("test-results/baselines"),
            actual_dir: PathBuf::from("test-results/screenshots"),
            diff_dir: PathBuf::from("test-results/diffs"),
        }
    }
}
