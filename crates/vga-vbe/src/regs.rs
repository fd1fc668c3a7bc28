//! VGA/VBE register bank.
//!
//! Every programmable register group lives here as plain integers. Bit fields are decoded through
//! accessor methods and the bit constants below rather than packed structs, so the layout is
//! exactly what the guest wrote (after write masks).

use bitflags::bitflags;

pub const SR_COUNT: usize = 8;
pub const GR_COUNT: usize = 16;
pub const AR_COUNT: usize = 21;
pub const CR_COUNT: usize = 256;
/// 256 DAC entries × (R, G, B).
pub const PALETTE_LEN: usize = 256 * 3;

/// Writable bits of each sequencer register. Reserved bits always read back as zero.
pub const SR_WRITE_MASK: [u8; SR_COUNT] = [!0xfc, !0xc2, !0xf0, !0xc0, !0xf1, !0xff, !0xff, !0x01];

/// Writable bits of each graphics controller register.
pub const GR_WRITE_MASK: [u8; GR_COUNT] = [
    !0xf0, !0xf0, !0xf0, !0xe0, !0xfc, !0x84, !0xf0, !0xf0, !0x00, !0xff, !0xff, !0xff, !0xff,
    !0xff, !0xff, !0xff,
];

pub const MSR_COLOR_EMULATION: u8 = 0x01;
pub const ST01_V_RETRACE: u8 = 0x08;
pub const ST01_DISP_ENABLE: u8 = 0x01;
/// Switch sense pattern of a high-resolution colour EGA display (off-on-on-off).
pub const EGA_SWITCHES: u8 = 0x90;
/// Status register 0 after reset; only bit 4 (switch sense) ever changes.
pub const ST00_RESET: u8 = 0x70;

/// Attribute controller index bit 5: palette address source (display enabled).
pub const AR_INDEX_PAS: u8 = 0x20;

// Bochs VBE ("VBE_DISPI") register indices.
pub const VBE_DISPI_INDEX_ID: u16 = 0x0;
pub const VBE_DISPI_INDEX_XRES: u16 = 0x1;
pub const VBE_DISPI_INDEX_YRES: u16 = 0x2;
pub const VBE_DISPI_INDEX_BPP: u16 = 0x3;
pub const VBE_DISPI_INDEX_ENABLE: u16 = 0x4;
pub const VBE_DISPI_INDEX_BANK: u16 = 0x5;
pub const VBE_DISPI_INDEX_VIRT_WIDTH: u16 = 0x6;
pub const VBE_DISPI_INDEX_VIRT_HEIGHT: u16 = 0x7;
pub const VBE_DISPI_INDEX_X_OFFSET: u16 = 0x8;
pub const VBE_DISPI_INDEX_Y_OFFSET: u16 = 0x9;
pub const VBE_DISPI_INDEX_VBOX_VIDEO: u16 = 0xa;
pub const VBE_DISPI_INDEX_FB_BASE_HI: u16 = 0xb;
pub const VBE_DISPI_INDEX_CFG: u16 = 0xc;
pub const VBE_DISPI_INDEX_NB: u16 = 0xd;

pub const VBE_REG_COUNT: usize = VBE_DISPI_INDEX_NB as usize;

pub const VBE_DISPI_MAX_XRES: u16 = 16384;
pub const VBE_DISPI_MAX_YRES: u16 = 16384;
pub const VBE_DISPI_MAX_BPP: u16 = 32;

pub const VBE_DISPI_ID0: u16 = 0xB0C0;
pub const VBE_DISPI_ID1: u16 = 0xB0C1;
pub const VBE_DISPI_ID2: u16 = 0xB0C2;
pub const VBE_DISPI_ID3: u16 = 0xB0C3;
pub const VBE_DISPI_ID4: u16 = 0xB0C4;
pub const VBE_DISPI_ID_VBOX_VIDEO: u16 = 0xBE00;
pub const VBE_DISPI_ID_ANYX: u16 = 0xBE01;
pub const VBE_DISPI_ID_HGSMI: u16 = 0xBE02;
pub const VBE_DISPI_ID_CFG: u16 = 0xBE03;

pub const VBE_DISPI_CFG_MASK_ID: u16 = 0x0FFF;
pub const VBE_DISPI_CFG_MASK_SUPPORT: u16 = 0x1000;
pub const VBE_DISPI_CFG_ID_VERSION: u16 = 0x0000;
pub const VBE_DISPI_CFG_ID_VRAM_SIZE: u16 = 0x0001;
pub const VBE_DISPI_CFG_ID_3D: u16 = 0x0002;

bitflags! {
    /// Bits of the VBE `ENABLE` register.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct VbeEnable: u16 {
        const ENABLED = 0x01;
        const GETCAPS = 0x02;
        const DAC_8BIT = 0x20;
        const LFB_ENABLED = 0x40;
        const NO_CLEAR_MEM = 0x80;
    }
}

/// Persistent register state of one adapter.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    pub sr_index: u8,
    pub sr: [u8; SR_COUNT],
    pub gr_index: u8,
    pub gr: [u8; GR_COUNT],
    pub ar_index: u8,
    pub ar: [u8; AR_COUNT],
    /// `false` while the next 0x3C0 write is an index, `true` while it is data.
    pub ar_flip_flop: bool,
    pub cr_index: u8,
    pub cr: [u8; CR_COUNT],
    pub msr: u8,
    pub fcr: u8,
    pub st00: u8,
    pub st01: u8,

    pub dac_state: u8,
    pub dac_sub_index: u8,
    pub dac_read_index: u8,
    pub dac_write_index: u8,
    pub dac_cache: [u8; 3],
    pub palette: [u8; PALETTE_LEN],

    /// Last latched-mode read of all four planes (plane 0 in the low byte).
    pub latch: u32,
    pub bank_offset: u32,

    pub vbe_index: u16,
    pub vbe_regs: [u16; VBE_REG_COUNT],
    pub vbe_start_addr: u32,
    pub vbe_line_offset: u32,
    pub vbe_bank_max: u32,

    /// High byte of a bytewise VBE index/data write waiting for its low byte.
    pub vbe_index_hi: Option<u8>,
    pub vbe_data_hi: Option<u8>,
    /// Bytewise VBE reads return the high byte first; set once it has been handed out.
    pub vbe_index_read_lo: bool,
    pub vbe_data_read_lo: bool,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self {
            sr_index: 0,
            sr: [0; SR_COUNT],
            gr_index: 0,
            gr: [0; GR_COUNT],
            ar_index: 0,
            ar: [0; AR_COUNT],
            ar_flip_flop: false,
            cr_index: 0,
            cr: [0; CR_COUNT],
            msr: 0,
            fcr: 0,
            st00: 0,
            st01: 0,
            dac_state: 0,
            dac_sub_index: 0,
            dac_read_index: 0,
            dac_write_index: 0,
            dac_cache: [0; 3],
            palette: [0; PALETTE_LEN],
            latch: 0,
            bank_offset: 0,
            vbe_index: 0,
            vbe_regs: [0; VBE_REG_COUNT],
            vbe_start_addr: 0,
            vbe_line_offset: 0,
            vbe_bank_max: 0,
            vbe_index_hi: None,
            vbe_data_hi: None,
            vbe_index_read_lo: false,
            vbe_data_read_lo: false,
        }
    }
}

impl RegisterBank {
    /// Register state after a hardware reset of an adapter with `vram_size` bytes of VRAM.
    pub fn reset_state(vram_size: u32, lfb_base: u32) -> Self {
        let mut regs = Self::default();
        regs.vbe_regs[VBE_DISPI_INDEX_ID as usize] = VBE_DISPI_ID0;
        regs.vbe_regs[VBE_DISPI_INDEX_VBOX_VIDEO as usize] = 0;
        regs.vbe_regs[VBE_DISPI_INDEX_FB_BASE_HI as usize] = (lfb_base >> 16) as u16;
        regs.vbe_bank_max = bank_max_for(vram_size);
        regs.st00 = ST00_RESET;
        regs
    }

    #[inline]
    pub fn vbe(&self, index: u16) -> u16 {
        self.vbe_regs[usize::from(index)]
    }

    #[inline]
    pub fn set_vbe(&mut self, index: u16, value: u16) {
        self.vbe_regs[usize::from(index)] = value;
    }

    #[inline]
    pub fn vbe_enable(&self) -> VbeEnable {
        VbeEnable::from_bits_retain(self.vbe(VBE_DISPI_INDEX_ENABLE))
    }

    #[inline]
    pub fn vbe_enabled(&self) -> bool {
        self.vbe_enable().contains(VbeEnable::ENABLED)
    }

    /// The DAC delivers 8 bits per channel (VBE enabled with `8BIT_DAC`).
    #[inline]
    pub fn wide_dac(&self) -> bool {
        self.vbe_enable()
            .contains(VbeEnable::ENABLED | VbeEnable::DAC_8BIT)
    }

    /// Effective bits per pixel of the VBE mode, or zero for legacy modes.
    #[inline]
    pub fn vbe_bpp(&self) -> u16 {
        if self.vbe_enabled() {
            self.vbe(VBE_DISPI_INDEX_BPP)
        } else {
            0
        }
    }

    #[inline]
    pub fn color_emulation(&self) -> bool {
        self.msr & MSR_COLOR_EMULATION != 0
    }

    /// SR4 bit 3.
    #[inline]
    pub fn chain4(&self) -> bool {
        self.sr[4] & 0x08 != 0
    }

    /// SR4 bit 2 clear selects odd/even host addressing.
    #[inline]
    pub fn odd_even(&self) -> bool {
        self.sr[4] & 0x04 == 0
    }

    #[inline]
    pub fn plane_write_mask(&self) -> u8 {
        self.sr[2] & 0x0f
    }

    /// GR6 bits 3:2.
    #[inline]
    pub fn memory_map_mode(&self) -> u8 {
        (self.gr[6] >> 2) & 3
    }

    #[inline]
    pub fn graphics_mode(&self) -> bool {
        self.gr[6] & 0x01 != 0
    }

    #[inline]
    pub fn write_mode(&self) -> u8 {
        self.gr[5] & 3
    }

    #[inline]
    pub fn read_mode(&self) -> u8 {
        (self.gr[5] >> 3) & 1
    }

    /// GR5 bits 6:5.
    #[inline]
    pub fn shift_control(&self) -> u8 {
        (self.gr[5] >> 5) & 3
    }

    #[inline]
    pub fn read_plane(&self) -> u8 {
        self.gr[4] & 3
    }

    #[inline]
    pub fn rotate_count(&self) -> u32 {
        u32::from(self.gr[3] & 7)
    }

    /// GR3 bits 4:3: 0 replace, 1 AND, 2 OR, 3 XOR.
    #[inline]
    pub fn logical_op(&self) -> u8 {
        (self.gr[3] >> 3) & 3
    }

    /// Display is blanked: palette address source clear or screen off.
    #[inline]
    pub fn display_blanked(&self) -> bool {
        self.ar_index & AR_INDEX_PAS == 0 || self.sr[1] & 0x20 != 0
    }

    /// CR11 bit 7 write-protects CR0..CR7.
    #[inline]
    pub fn crtc_protected(&self) -> bool {
        self.cr[0x11] & 0x80 != 0
    }

    #[inline]
    pub fn double_scan(&self) -> u8 {
        self.cr[0x09] >> 7
    }

    /// Vertical display end, in scanlines minus one.
    #[inline]
    pub fn vertical_display_end(&self) -> u32 {
        u32::from(self.cr[0x12])
            | (u32::from(self.cr[0x07] & 0x02) << 7)
            | (u32::from(self.cr[0x07] & 0x40) << 3)
    }
}

/// Highest selectable 64KiB bank.
pub fn bank_max_for(vram_size: u32) -> u32 {
    (vram_size >> 16).saturating_sub(1)
}
