use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Milliseconds between interactive time updates; 0 redraws continuously.
    #[serde(default = "default_update_rate_ms")]
    pub interactive_update_rate_ms: u64,
    /// Delay the first periodic update to the next whole wall-clock second.
    #[serde(default = "default_true")]
    pub align_to_whole_second: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interactive_update_rate_ms: default_update_rate_ms(),
            align_to_whole_second: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 320,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    /// RGBA8 color of the clock hands.
    #[serde(default = "default_hand_color")]
    pub hand_color: [u8; 4],
    /// Tint multiplied into the animated background, each channel in 0..=1.
    #[serde(default = "default_background_tint")]
    pub background_tint: [f32; 4],
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            hand_color: default_hand_color(),
            background_tint: default_background_tint(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaceConfig {
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

impl FaceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.surface.width == 0 || self.surface.height == 0 {
            bail!(
                "surface must be positive, got {}x{}",
                self.surface.width,
                self.surface.height
            );
        }

        for (index, channel) in self.demo.background_tint.iter().enumerate() {
            if !(0.0..=1.0).contains(channel) {
                bail!("demo.background_tint[{index}] must be within 0..=1, got {channel}");
            }
        }
        Ok(())
    }
}

pub fn load_face_config(path: &Path) -> Result<FaceConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read face config {}", path.display()))?;
    let config: FaceConfig = serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse yaml in {} at {}: {}",
            path.display(),
            location,
            error
        )
    })?;

    config
        .validate()
        .with_context(|| format!("invalid face config {}", path.display()))?;
    Ok(config)
}

fn default_update_rate_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_hand_color() -> [u8; 4] {
    [255, 255, 255, 255]
}

fn default_background_tint() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}
