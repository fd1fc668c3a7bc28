use serde::{Deserialize, Serialize};

use crate::error::{Result, VgaError};

/// Default physical base address of the VBE linear framebuffer.
pub const DEFAULT_LFB_BASE: u32 = 0xE000_0000;

/// Default VRAM size (16MiB).
pub const DEFAULT_VRAM_SIZE: u32 = 16 * 1024 * 1024;

/// Smallest VRAM size accepted: four full 64KiB planes.
pub const VGA_VRAM_MIN: u32 = 256 * 1024;

pub const VGA_VRAM_MAX: u32 = 256 * 1024 * 1024;

/// VRAM must be a whole number of planar banks so bank switching never ends in a partial bank.
pub const VGA_VRAM_ALIGN: u32 = 256 * 1024;

/// Configuration for [`crate::VgaDevice`].
///
/// Deserializes from the platform's JSON device configuration; missing keys take the defaults
/// below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VgaConfig {
    /// Total VRAM size in bytes.
    pub vram_size: u32,
    /// Model status register 1 timing from the CRTC registers instead of toggling the retrace
    /// bits on every read.
    pub real_retrace: bool,
    /// Guest physical base of the linear framebuffer, reported through `FB_BASE_HI`.
    pub lfb_base: u32,
    /// Initial refresh timer interval; zero leaves the timer stopped.
    pub refresh_interval_ms: u32,
}

impl Default for VgaConfig {
    fn default() -> Self {
        Self {
            vram_size: DEFAULT_VRAM_SIZE,
            real_retrace: false,
            lfb_base: DEFAULT_LFB_BASE,
            refresh_interval_ms: 0,
        }
    }
}

impl VgaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vram_size > VGA_VRAM_MAX {
            return Err(VgaError::InvalidConfig("vram size is too large"));
        }
        if self.vram_size < VGA_VRAM_MIN {
            return Err(VgaError::InvalidConfig("vram size is too small"));
        }
        if self.vram_size % VGA_VRAM_ALIGN != 0 {
            return Err(VgaError::InvalidConfig(
                "vram size is not a multiple of 256KiB",
            ));
        }
        Ok(())
    }

    pub fn with_vram_size(mut self, vram_size: u32) -> Self {
        self.vram_size = vram_size;
        self
    }

    pub fn with_real_retrace(mut self, real_retrace: bool) -> Self {
        self.real_retrace = real_retrace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        VgaConfig::default().validate().unwrap();
    }

    #[test]
    fn vram_size_limits_are_enforced() {
        let too_small = VgaConfig::default().with_vram_size(128 * 1024);
        assert!(matches!(
            too_small.validate(),
            Err(VgaError::InvalidConfig(_))
        ));

        let too_large = VgaConfig::default().with_vram_size(VGA_VRAM_MAX + VGA_VRAM_ALIGN);
        assert!(too_large.validate().is_err());

        let unaligned = VgaConfig::default().with_vram_size(VGA_VRAM_MIN + 4096);
        assert!(unaligned.validate().is_err());

        VgaConfig::default()
            .with_vram_size(VGA_VRAM_MAX)
            .validate()
            .unwrap();
    }

    #[test]
    fn config_deserializes_with_defaults_for_missing_keys() {
        let cfg: VgaConfig = serde_json::from_str(r#"{ "vramSize": 4194304 }"#).unwrap();
        assert_eq!(cfg.vram_size, 4 * 1024 * 1024);
        assert!(!cfg.real_retrace);
        assert_eq!(cfg.lfb_base, DEFAULT_LFB_BASE);

        let json = serde_json::to_string(&cfg.with_real_retrace(true)).unwrap();
        assert!(json.contains("\"realRetrace\":true"));
    }
}
