//! Host pixel formats and the DAC/attribute palette cache.

use crate::regs::{RegisterBank, PALETTE_LEN};

/// Pixel depth of the host surface the composer draws into.
///
/// 24-bit and unknown host depths fall back to the 8-bit routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostDepth {
    Bpp8,
    Bpp15,
    Bpp16,
    Bpp32,
}

impl HostDepth {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            15 => Self::Bpp15,
            16 => Self::Bpp16,
            32 => Self::Bpp32,
            _ => Self::Bpp8,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Bpp8 => 8,
            Self::Bpp15 => 15,
            Self::Bpp16 => 16,
            Self::Bpp32 => 32,
        }
    }

    /// Column of the line/glyph dispatch tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Bpp8 => 0,
            Self::Bpp15 => 1,
            Self::Bpp16 => 2,
            Self::Bpp32 => 3,
        }
    }

    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bpp8 => 1,
            Self::Bpp15 | Self::Bpp16 => 2,
            Self::Bpp32 => 4,
        }
    }

    #[inline]
    pub fn rgb_to_pixel(self, r: u8, g: u8, b: u8) -> u32 {
        match self {
            Self::Bpp8 => rgb_to_pixel8(r, g, b),
            Self::Bpp15 => rgb_to_pixel15(r, g, b),
            Self::Bpp16 => rgb_to_pixel16(r, g, b),
            Self::Bpp32 => rgb_to_pixel32(r, g, b),
        }
    }
}

/// RGB 3:3:2.
#[inline]
pub fn rgb_to_pixel8(r: u8, g: u8, b: u8) -> u32 {
    let (r, g, b) = (u32::from(r), u32::from(g), u32::from(b));
    ((r >> 5) << 5) | ((g >> 5) << 2) | (b >> 6)
}

/// RGB 5:5:5.
#[inline]
pub fn rgb_to_pixel15(r: u8, g: u8, b: u8) -> u32 {
    let (r, g, b) = (u32::from(r), u32::from(g), u32::from(b));
    ((r >> 3) << 10) | ((g >> 3) << 5) | (b >> 3)
}

/// RGB 5:6:5.
#[inline]
pub fn rgb_to_pixel16(r: u8, g: u8, b: u8) -> u32 {
    let (r, g, b) = (u32::from(r), u32::from(g), u32::from(b));
    ((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3)
}

/// XRGB 8:8:8:8.
#[inline]
pub fn rgb_to_pixel32(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Expands a 6-bit DAC channel to 8 bits, replicating the low bit into the new low bits.
#[inline]
pub fn c6_to_8(v: u8) -> u8 {
    let v = v & 0x3f;
    let b = v & 1;
    (v << 2) | (b << 1) | b
}

/// Host-format colours for the current palette, compared entry by entry on every refresh.
#[derive(Debug, Clone)]
pub struct PaletteCache {
    entries: [u32; 256],
}

impl Default for PaletteCache {
    fn default() -> Self {
        Self { entries: [0; 256] }
    }
}

impl PaletteCache {
    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        self.entries[index & 0xff]
    }

    pub fn entries(&self) -> &[u32; 256] {
        &self.entries
    }

    fn store(&mut self, index: usize, col: u32) -> bool {
        if self.entries[index] != col {
            self.entries[index] = col;
            true
        } else {
            false
        }
    }

    /// Rebuilds the 16 attribute-mapped entries. Returns whether any entry changed.
    pub fn update_palette16(&mut self, regs: &RegisterBank, depth: HostDepth) -> bool {
        let mut changed = false;
        for i in 0..16 {
            let v = usize::from(attribute_color(regs, i as u8)) * 3;
            let col = depth.rgb_to_pixel(
                c6_to_8(regs.palette[v]),
                c6_to_8(regs.palette[v + 1]),
                c6_to_8(regs.palette[v + 2]),
            );
            changed |= self.store(i, col);
        }
        changed
    }

    /// Rebuilds all 256 DAC entries. Returns whether any entry changed.
    pub fn update_palette256(&mut self, regs: &RegisterBank, depth: HostDepth) -> bool {
        let wide_dac = regs.wide_dac();
        let mut changed = false;
        for i in 0..256 {
            let v = i * 3;
            let [r, g, b] = [regs.palette[v], regs.palette[v + 1], regs.palette[v + 2]];
            let col = if wide_dac {
                depth.rgb_to_pixel(r, g, b)
            } else {
                depth.rgb_to_pixel(c6_to_8(r), c6_to_8(g), c6_to_8(b))
            };
            changed |= self.store(i, col);
        }
        changed
    }

    pub fn clear(&mut self) {
        self.entries = [0; 256];
    }
}

/// DAC index for attribute palette entry `index`, after the colour-select substitution of AR14.
pub fn attribute_color(regs: &RegisterBank, index: u8) -> u8 {
    let v = regs.ar[usize::from(index & 0x0f)];
    if regs.ar[0x10] & 0x80 != 0 {
        ((regs.ar[0x14] & 0x0f) << 4) | (v & 0x0f)
    } else {
        ((regs.ar[0x14] & 0x0c) << 4) | (v & 0x3f)
    }
}

/// The 16 EGA colours in 6-bit DAC units.
pub const EGA_PALETTE: [[u8; 3]; 16] = [
    [0, 0, 0],
    [0, 0, 42],
    [0, 42, 0],
    [0, 42, 42],
    [42, 0, 0],
    [42, 0, 42],
    [42, 21, 0],
    [42, 42, 42],
    [21, 21, 21],
    [21, 21, 63],
    [21, 63, 21],
    [21, 63, 63],
    [63, 21, 21],
    [63, 21, 63],
    [63, 63, 21],
    [63, 63, 63],
];

/// Power-on DAC contents in 6-bit units: EGA colours, a 16 step grey ramp, then a 6x6x6 colour
/// cube. The last 8 entries stay black.
pub fn default_dac_palette() -> [u8; PALETTE_LEN] {
    let mut pal = [0u8; PALETTE_LEN];
    for (i, rgb) in EGA_PALETTE.iter().enumerate() {
        pal[i * 3..i * 3 + 3].copy_from_slice(rgb);
    }
    for i in 0..16usize {
        let v = (i * 63 / 15) as u8;
        let off = (16 + i) * 3;
        pal[off..off + 3].copy_from_slice(&[v, v, v]);
    }
    let level = |v: usize| (v * 63 / 5) as u8;
    let mut idx = 32usize;
    for r in 0..6 {
        for g in 0..6 {
            for b in 0..6 {
                let off = idx * 3;
                pal[off..off + 3].copy_from_slice(&[level(r), level(g), level(b)]);
                idx += 1;
            }
        }
    }
    pal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{VbeEnable, VBE_DISPI_INDEX_ENABLE};

    #[test]
    fn c6_to_8_covers_full_range() {
        assert_eq!(c6_to_8(0), 0);
        assert_eq!(c6_to_8(0x3f), 0xff);
        assert_eq!(c6_to_8(42), 0xa8);
        assert_eq!(c6_to_8(21), 0x57);
        // High bits are ignored.
        assert_eq!(c6_to_8(0xff), 0xff);
    }

    #[test]
    fn host_formats_pack_channels() {
        assert_eq!(rgb_to_pixel8(0xff, 0xff, 0xff), 0xff);
        assert_eq!(rgb_to_pixel8(0xe0, 0, 0), 0xe0);
        assert_eq!(rgb_to_pixel15(0xff, 0, 0), 0x7c00);
        assert_eq!(rgb_to_pixel16(0, 0xff, 0), 0x07e0);
        assert_eq!(rgb_to_pixel32(0x12, 0x34, 0x56), 0x0012_3456);
        assert_eq!(HostDepth::from_bits(24), HostDepth::Bpp8);
        assert_eq!(HostDepth::from_bits(32).index(), 3);
    }

    #[test]
    fn palette16_applies_color_select() {
        let mut regs = RegisterBank::default();
        regs.palette = default_dac_palette();
        for i in 0..16 {
            regs.ar[i] = i as u8;
        }

        // Bit 7 of AR10 set: AR14 bits 3:0 provide DAC index bits 7:4.
        regs.ar[0x10] = 0x80;
        regs.ar[0x14] = 0x01;
        assert_eq!(attribute_color(&regs, 3), 0x13);

        // Bit 7 clear: AR14 bits 3:2 provide DAC index bits 7:6.
        regs.ar[0x10] = 0x00;
        regs.ar[0x14] = 0x0c;
        regs.ar[5] = 0x3f;
        assert_eq!(attribute_color(&regs, 5), 0xff);
    }

    #[test]
    fn palette_update_reports_changes_once() {
        let mut regs = RegisterBank::default();
        regs.palette = default_dac_palette();
        for i in 0..16 {
            regs.ar[i] = i as u8;
        }
        let mut cache = PaletteCache::default();
        assert!(cache.update_palette16(&regs, HostDepth::Bpp32));
        assert!(!cache.update_palette16(&regs, HostDepth::Bpp32));
        assert_eq!(cache.get(7), 0x00a8_a8a8);

        regs.palette[7 * 3] = 63;
        assert!(cache.update_palette16(&regs, HostDepth::Bpp32));
        assert_eq!(cache.get(7), 0x00ff_a8a8);
    }

    #[test]
    fn wide_dac_skips_six_bit_expansion() {
        let mut regs = RegisterBank::default();
        regs.palette[3..6].copy_from_slice(&[0x80, 0x40, 0x20]);
        let mut cache = PaletteCache::default();
        cache.update_palette256(&regs, HostDepth::Bpp32);
        // Six-bit DAC: only the low six bits of each channel count.
        assert_eq!(cache.get(1), 0x0000_0080);

        regs.set_vbe(
            VBE_DISPI_INDEX_ENABLE,
            (VbeEnable::ENABLED | VbeEnable::DAC_8BIT).bits(),
        );
        assert!(cache.update_palette256(&regs, HostDepth::Bpp32));
        assert_eq!(cache.get(1), 0x0080_4020);
    }
}
