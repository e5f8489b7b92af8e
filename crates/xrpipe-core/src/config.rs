//! Persisted pipeline configuration, read once at device init.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xrpipe_common::{Error, Result};

use crate::{
    adaptive::AdaptiveConfig,
    settings::{MAX_PIXEL_DENSITY, MIN_PIXEL_DENSITY},
    types::StereoLayout,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pixel_density: f32,
    pub pixel_density_min: f32,
    pub pixel_density_max: f32,
    pub pixel_density_adaptive: bool,
    /// World units.
    pub near_clipping_plane: f32,
    /// World units, 0 for an infinite far plane.
    pub far_clipping_plane: f32,
    pub stereo_layout: StereoLayout,
    /// World units per meter.
    pub world_to_meters: f32,
    pub adaptive: AdaptiveConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pixel_density: 1.0,
            pixel_density_min: 0.5,
            pixel_density_max: 1.0,
            pixel_density_adaptive: false,
            near_clipping_plane: 10.0,
            far_clipping_plane: 0.0,
            stereo_layout: StereoLayout::DoubleWide,
            world_to_meters: 100.0,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("loading pipeline config from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Normalizes recoverable values in place and rejects the rest.
    pub fn validate(&mut self) -> Result<()> {
        for value in [
            &mut self.pixel_density,
            &mut self.pixel_density_min,
            &mut self.pixel_density_max,
        ] {
            if !value.is_finite() {
                return Err(Error::config("pixel density must be finite"));
            }
            *value = value.clamp(MIN_PIXEL_DENSITY, MAX_PIXEL_DENSITY);
        }
        if self.pixel_density_min > self.pixel_density_max {
            warn!(
                "pixel density min {} above max {}, swapping",
                self.pixel_density_min, self.pixel_density_max
            );
            std::mem::swap(&mut self.pixel_density_min, &mut self.pixel_density_max);
        }
        self.pixel_density = self
            .pixel_density
            .clamp(self.pixel_density_min, self.pixel_density_max);

        self.near_clipping_plane = self.near_clipping_plane.max(0.0);
        self.far_clipping_plane = self.far_clipping_plane.max(0.0);

        if !(self.world_to_meters.is_finite() && self.world_to_meters > 0.0) {
            return Err(Error::config(format!(
                "world_to_meters must be positive, got {}",
                self.world_to_meters
            )));
        }

        self.adaptive.validate()
    }
}
