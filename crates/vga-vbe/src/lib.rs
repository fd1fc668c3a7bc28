//! Legacy VGA adapter with Bochs-compatible VBE extensions.
//!
//! The device model covers:
//! - the VGA register file (sequencer, graphics controller, attribute controller, CRTC, DAC)
//!   behind the legacy I/O ports, with the hardware write masks applied,
//! - the `A0000-BFFFF` aperture decoder (chain-4, odd/even and latched planar access with all
//!   four write modes and both read modes),
//! - the Bochs VBE ("VBE_DISPI") register interface and a flat linear framebuffer,
//! - a display composer that turns VRAM into host pixels for text, planar, packed and direct
//!   colour modes, pushing dirty rectangles to a [`DisplayConnector`],
//! - retrace timing for input status 1, screenshots, a refresh timer and snapshots.
//!
//! All state is owned by [`VgaDevice`]; callers serialize access (one device-wide lock on the
//! platform side).

mod compose;
mod config;
mod display;
mod error;
mod expand;
mod firmware;
mod memory;
mod palette;
mod ports;
pub mod regs;
mod retrace;
mod snapshot;
mod timer;
mod vbe;

use tracing::debug;

pub use compose::{FrameReport, FrameStatus, GraphicMode, Rect, Screenshot, UpdateOptions};
pub use config::{
    VgaConfig, DEFAULT_LFB_BASE, DEFAULT_VRAM_SIZE, VGA_VRAM_ALIGN, VGA_VRAM_MAX, VGA_VRAM_MIN,
};
pub use display::{DisplayConnector, MemoryConnector, ResizeRequest, ResizeStatus, Surface};
pub use error::{Result, SnapshotError, SnapshotResult, VgaError};
pub use memory::{DirtyBitmap, OPEN_BUS, VRAM_PAGE_SIZE};
pub use palette::{default_dac_palette, HostDepth, EGA_PALETTE};
pub use regs::{RegisterBank, VbeEnable};
pub use snapshot::{IoSnapshot, SnapshotVersion};

use compose::ComposerState;
use expand::ExpandTables;
use retrace::RetraceState;
use timer::RefreshTimer;

/// Full legacy VGA I/O decode range, including the mono and colour CRTC aliases.
pub const VGA_LEGACY_IO_START: u16 = 0x3B0;
pub const VGA_LEGACY_IO_END: u16 = 0x3DF;

/// Bochs VBE ("VBE_DISPI") index register port.
pub const VBE_DISPI_INDEX_PORT: u16 = 0x01CE;
/// Bochs VBE ("VBE_DISPI") data register port.
pub const VBE_DISPI_DATA_PORT: u16 = 0x01CF;

/// Legacy VGA memory window covering the 128KiB aperture (`A0000-BFFFF`).
pub const VGA_LEGACY_MEM_START: u32 = 0xA0000;
pub const VGA_LEGACY_MEM_END: u32 = 0xBFFFF;
pub const VGA_LEGACY_MEM_LEN: u32 = VGA_LEGACY_MEM_END - VGA_LEGACY_MEM_START + 1;

fn io_all_ones(size: usize) -> u32 {
    match size {
        0 => 0,
        1 => 0xFF,
        2 => 0xFFFF,
        _ => 0xFFFF_FFFF,
    }
}

/// Port I/O trait (shared with the CPU/machine).
pub trait PortIO {
    fn port_read(&mut self, port: u16, size: usize) -> u32;
    fn port_write(&mut self, port: u16, size: usize, val: u32);
}

/// VGA/VBE adapter.
pub struct VgaDevice {
    config: VgaConfig,

    pub(crate) regs: RegisterBank,
    pub(crate) vram: Vec<u8>,
    pub(crate) dirty: DirtyBitmap,
    pub(crate) tables: ExpandTables,

    pub(crate) composer: ComposerState,
    pub(crate) retrace: RetraceState,
    /// Planes written since the last text compose (bit `n` = plane `n`); a plane 2 write means
    /// the font may have changed.
    pub(crate) plane_updated: u8,

    /// Deterministic device clock in nanoseconds, advanced by [`VgaDevice::tick`].
    pub(crate) clock_ns: u64,
    pub(crate) refresh: RefreshTimer,
    /// Last LFB mode change not yet delivered to a connector.
    pub(crate) pending_lfb_change: Option<bool>,
}

impl VgaDevice {
    pub fn new(config: VgaConfig) -> Result<Self> {
        config.validate()?;

        let mut vram = Vec::new();
        vram.try_reserve_exact(config.vram_size as usize)
            .map_err(|_| VgaError::NoMemory(config.vram_size as usize))?;
        vram.resize(config.vram_size as usize, 0);

        let mut dev = Self {
            config,
            regs: RegisterBank::reset_state(config.vram_size, config.lfb_base),
            vram,
            dirty: DirtyBitmap::new(config.vram_size),
            tables: ExpandTables::new(),
            composer: ComposerState::default(),
            retrace: RetraceState::default(),
            plane_updated: 0,
            clock_ns: 0,
            refresh: RefreshTimer::new(config.refresh_interval_ms),
            pending_lfb_change: None,
        };
        dev.reset();
        Ok(dev)
    }

    /// Hardware reset: registers back to power-on values, VRAM cleared, composer caches dropped.
    ///
    /// The device clock and the refresh timer keep running.
    pub fn reset(&mut self) {
        debug!("vga reset");
        self.vram.fill(0);
        self.dirty.clear();
        self.regs = RegisterBank::reset_state(self.config.vram_size, self.config.lfb_base);
        self.composer = ComposerState::default();
        self.retrace = RetraceState::default();
        self.plane_updated = 0;
        self.pending_lfb_change = None;
    }

    pub fn config(&self) -> &VgaConfig {
        &self.config
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    pub fn vram_size(&self) -> u32 {
        self.config.vram_size
    }

    /// Guest physical base of the linear framebuffer.
    pub fn lfb_base(&self) -> u32 {
        self.config.lfb_base
    }

    pub fn regs(&self) -> &RegisterBank {
        &self.regs
    }

    pub fn vbe_enabled(&self) -> bool {
        self.regs.vbe_enabled()
    }

    /// Advances the device clock used for blink phase, retrace sampling and the refresh timer.
    pub fn tick(&mut self, delta_ns: u64) {
        self.clock_ns = self.clock_ns.saturating_add(delta_ns);
    }

    pub fn now_ns(&self) -> u64 {
        self.clock_ns
    }

    /// Takes the LFB mode change recorded by the last accepted VBE `ENABLE` write, if it has not
    /// been delivered to a connector yet.
    pub fn take_lfb_mode_change(&mut self) -> Option<bool> {
        self.pending_lfb_change.take()
    }

    fn vbe_index_read(&mut self, size: usize) -> u32 {
        let index = self.regs.vbe_index;
        match size {
            1 => {
                if !self.regs.vbe_index_read_lo {
                    self.regs.vbe_index_read_lo = true;
                    u32::from(index >> 8)
                } else {
                    self.regs.vbe_index_read_lo = false;
                    u32::from(index & 0xff)
                }
            }
            2 => u32::from(index),
            _ => io_all_ones(size),
        }
    }

    fn vbe_index_write(&mut self, size: usize, val: u32) {
        match size {
            1 => match self.regs.vbe_index_hi.take() {
                None => self.regs.vbe_index_hi = Some(val as u8),
                Some(hi) => self.regs.vbe_index = u16::from_be_bytes([hi, val as u8]),
            },
            2 => self.regs.vbe_index = val as u16,
            _ => debug!(size, val, "unsupported vbe index write size"),
        }
    }

    fn vbe_data_read(&mut self, size: usize) -> u32 {
        match size {
            1 => {
                let data = self.vbe_read_data();
                if !self.regs.vbe_data_read_lo {
                    self.regs.vbe_data_read_lo = true;
                    (data >> 8) & 0xff
                } else {
                    self.regs.vbe_data_read_lo = false;
                    data & 0xff
                }
            }
            2 => self.vbe_read_data() & 0xffff,
            4 => {
                if self.regs.vbe(regs::VBE_DISPI_INDEX_ID) == regs::VBE_DISPI_ID_CFG {
                    self.vbe_read_data()
                } else {
                    self.config.vram_size
                }
            }
            _ => io_all_ones(size),
        }
    }

    fn vbe_data_write(&mut self, size: usize, val: u32) {
        match size {
            1 => {
                let byte = val as u8;
                match self.regs.vbe_data_hi.take() {
                    None => {
                        if self.regs.vbe_index == regs::VBE_DISPI_INDEX_ENABLE
                            && u16::from(byte) & VbeEnable::ENABLED.bits() != 0
                        {
                            self.vbe_write_data(u16::from(byte));
                        } else {
                            self.regs.vbe_data_hi = Some(byte);
                        }
                    }
                    Some(hi) => self.vbe_write_data(u16::from_be_bytes([hi, byte])),
                }
            }
            2 | 4 => self.vbe_write_data(val as u16),
            _ => debug!(size, val, "unsupported vbe data write size"),
        }
    }
}

impl PortIO for VgaDevice {
    fn port_read(&mut self, port: u16, size: usize) -> u32 {
        if size == 0 {
            return 0;
        }
        match port {
            VBE_DISPI_INDEX_PORT => return self.vbe_index_read(size),
            VBE_DISPI_DATA_PORT => return self.vbe_data_read(size),
            _ => {}
        }
        match size {
            1 => u32::from(self.port_read_u8(port)),
            2 => {
                let lo = self.port_read_u8(port);
                let hi = self.port_read_u8(port.wrapping_add(1));
                u32::from(u16::from_le_bytes([lo, hi]))
            }
            4 => {
                let b0 = self.port_read_u8(port);
                let b1 = self.port_read_u8(port.wrapping_add(1));
                let b2 = self.port_read_u8(port.wrapping_add(2));
                let b3 = self.port_read_u8(port.wrapping_add(3));
                u32::from_le_bytes([b0, b1, b2, b3])
            }
            _ => io_all_ones(size),
        }
    }

    fn port_write(&mut self, port: u16, size: usize, val: u32) {
        if size == 0 {
            return;
        }
        match port {
            VBE_DISPI_INDEX_PORT => return self.vbe_index_write(size, val),
            VBE_DISPI_DATA_PORT => return self.vbe_data_write(size, val),
            _ => {}
        }
        match size {
            1 => self.port_write_u8(port, val as u8),
            2 => {
                let [b0, b1] = (val as u16).to_le_bytes();
                self.port_write_u8(port, b0);
                self.port_write_u8(port.wrapping_add(1), b1);
            }
            4 => {
                let [b0, b1, b2, b3] = val.to_le_bytes();
                self.port_write_u8(port, b0);
                self.port_write_u8(port.wrapping_add(1), b1);
                self.port_write_u8(port.wrapping_add(2), b2);
                self.port_write_u8(port.wrapping_add(3), b3);
            }
            _ => {}
        }
    }
}
