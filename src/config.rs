use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup-fatal checks. Per-frame anomalies are absorbed downstream;
    /// only a broken site configuration stops the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.fps <= 0.0 {
            bail!("fps must be positive, got {}", self.fps);
        }
        if !self.lane.polygon.is_empty() && self.lane.polygon.len() < 3 {
            bail!(
                "lane polygon needs at least 3 vertices, got {}",
                self.lane.polygon.len()
            );
        }
        if self.speed.ema_alpha <= 0.0 || self.speed.ema_alpha > 1.0 {
            bail!(
                "speed.ema_alpha must be in (0, 1], got {}",
                self.speed.ema_alpha
            );
        }
        if let Some(h) = &self.calibration.homography {
            if h.image_points.len() != h.world_points.len() {
                bail!(
                    "homography point lists differ in length: {} image vs {} world",
                    h.image_points.len(),
                    h.world_points.len()
                );
            }
        }
        Ok(())
    }
}
