//! Renderer configuration.
//!
//! Sources, later wins: built-in defaults, an optional YAML file, then
//! command-line flags applied by the host.

use dxrt_common::{Color, Extent};
use serde::{Deserialize, Serialize};

use crate::surface::BUFFER_COUNT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("RendererConfig validation failed: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    /// Use a software (WARP) adapter instead of hardware ones.
    pub use_software_adapter: bool,
    pub prefer_high_performance: bool,
    /// Enable the backend's validation layer. Adds diagnostics only.
    pub debug_layer: bool,
    /// Vertical blanks to wait per present; 0 presents immediately.
    pub vsync_interval: u32,
    pub clear_color: Color,
    pub buffer_count: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            title: "DXRT".into(),
            use_software_adapter: false,
            prefer_high_performance: false,
            debug_layer: cfg!(debug_assertions),
            vsync_interval: 1,
            clear_color: Color::default(),
            buffer_count: BUFFER_COUNT,
        }
    }
}

impl RendererConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_count != BUFFER_COUNT {
            return Err(ConfigError::Invalid(format!(
                "buffer_count must be {BUFFER_COUNT}, got {}",
                self.buffer_count
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// Turn on software mode if any argument is the software-adapter flag.
    pub fn apply_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if args.into_iter().any(|a| is_software_flag(a.as_ref())) {
            self.use_software_adapter = true;
        }
    }
}

/// `-warp`, `/warp`, `--warp` or `--software`, in any case.
pub fn is_software_flag(arg: &str) -> bool {
    let arg = arg.to_ascii_lowercase();
    matches!(arg.as_str(), "-warp" | "/warp" | "--warp" | "--software")
}
