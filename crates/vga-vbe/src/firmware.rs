//! Out-of-band setup used by the firmware before the guest runs: fonts, the DAC and the text
//! mode register set. These write device state directly and bypass the guest access paths.

use tracing::debug;

use crate::palette::default_dac_palette;
use crate::regs::{AR_INDEX_PAS, VBE_DISPI_INDEX_ENABLE};
use crate::VgaDevice;

/// Bytes reserved per glyph in a font block.
const GLYPH_STRIDE: usize = 32;

/// Standard mode 3 CRTC values, CR00..CR18.
const MODE3_CRTC: [u8; 25] = [
    0x5f, 0x4f, 0x50, 0x82, 0x55, 0x81, 0xbf, 0x1f, 0x00, 0x4f, 0x0e, 0x0f, 0x00, 0x00, 0x00,
    0x00, 0x9c, 0x8e, 0x8f, 0x28, 0x1f, 0x96, 0xb9, 0xa3, 0xff,
];

/// VRAM dword index of font block `block` (0-7, numbered as in the SR3 character map select).
fn font_block_base(block: u8) -> usize {
    let block = block & 7;
    let physical = usize::from(((block >> 2) & 1) | ((block << 1) & 6));
    physical * 8192
}

impl VgaDevice {
    /// Writes a 256 glyph font of `char_height` rows per glyph into plane 2 font block `block`.
    ///
    /// Rows beyond 32 per glyph and glyphs past 255 are ignored.
    pub fn load_font(&mut self, block: u8, font: &[u8], char_height: usize) {
        let char_height = char_height.min(GLYPH_STRIDE);
        if char_height == 0 {
            return;
        }
        let base = font_block_base(block);
        for (ch, glyph) in font.chunks(char_height).take(256).enumerate() {
            for (row, &bits) in glyph.iter().enumerate() {
                let off = (base + ch * GLYPH_STRIDE + row) * 4 + 2;
                if let Some(slot) = self.vram.get_mut(off) {
                    *slot = bits;
                    self.dirty.mark(off as u32);
                }
            }
        }
        self.plane_updated |= 1 << 2;
        debug!(block, char_height, "font loaded");
    }

    /// Loads the power-on DAC contents (6 bits per channel).
    pub fn load_default_palette(&mut self) {
        self.regs.palette = default_dac_palette();
    }

    /// Programs 80x25 colour text (mode 3): 9 dot characters, 16 scanline cells, cursor on
    /// lines 14-15, font block 0, VBE off.
    pub fn set_text_mode_80x25(&mut self) {
        let regs = &mut self.regs;
        regs.set_vbe(VBE_DISPI_INDEX_ENABLE, 0);
        regs.bank_offset = 0;

        regs.msr = 0x67;
        regs.sr[..5].copy_from_slice(&[0x03, 0x00, 0x03, 0x00, 0x02]);
        regs.gr[..9].copy_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x0e, 0x00, 0xff]);
        regs.cr[..MODE3_CRTC.len()].copy_from_slice(&MODE3_CRTC);

        for (i, ar) in regs.ar[..16].iter_mut().enumerate() {
            *ar = i as u8;
        }
        regs.ar[0x10] = 0x0c;
        regs.ar[0x11] = 0x00;
        regs.ar[0x12] = 0x0f;
        regs.ar[0x13] = 0x08;
        regs.ar[0x14] = 0x00;
        regs.ar_flip_flop = false;
        regs.ar_index |= AR_INDEX_PAS;

        self.load_default_palette();
        if self.config().real_retrace {
            self.update_retrace_timing();
        }
        debug!("text mode 80x25 set");
    }
}
