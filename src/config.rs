//! Engine configuration.
//!
//! Construct with [`EngineConfig::default`] and adjust with the builder
//! methods. The configuration is validated when a component is mounted.

use crate::error::MountError;
use crate::expression::is_identifier;

/// Default name of the element local when a directive omits `local:`.
pub const DEFAULT_LOCAL: &str = "item";

/// Per-surface engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Element local name used when a directive has no `local:` prefix.
    pub default_local: String,
    /// Render a `null` source as an empty list instead of failing.
    pub null_as_empty: bool,
    /// Rebuild every instance frame each pass instead of reusing unchanged
    /// frames.
    pub rebuild_all_frames: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_local: DEFAULT_LOCAL.to_string(),
            null_as_empty: false,
            rebuild_all_frames: false,
        }
    }
}

impl EngineConfig {
    pub fn with_default_local(mut self, name: impl Into<String>) -> Self {
        self.default_local = name.into();
        self
    }

    pub fn with_null_as_empty(mut self, enabled: bool) -> Self {
        self.null_as_empty = enabled;
        self
    }

    pub fn with_rebuild_all_frames(mut self, enabled: bool) -> Self {
        self.rebuild_all_frames = enabled;
        self
    }

    /// Check the settings before they reach a surface.
    pub fn validate(&self) -> Result<(), MountError> {
        if !is_identifier(&self.default_local) {
            return Err(MountError::Config(format!(
                "default local `{}` is not an identifier",
                self.default_local
            )));
        }
        Ok(())
    }
}
