//! Legacy aperture decoder (`A0000-BFFFF`), linear framebuffer access and VRAM dirty tracking.
//!
//! VRAM is stored plane-interleaved: byte `4 * n + p` is offset `n` of plane `p`, so one latched
//! access touches a single little-endian dword.

use tracing::trace;

use crate::VgaDevice;

/// Dirty tracking granularity.
pub const VRAM_PAGE_SIZE: u32 = 4096;
pub const VRAM_PAGE_SHIFT: u32 = 12;

/// Reads of unmapped or out-of-range addresses float high.
pub const OPEN_BUS: u8 = 0xff;

const fn build_mask16() -> [u32; 16] {
    let mut table = [0u32; 16];
    let mut i = 0;
    while i < 16 {
        let mut v = 0u32;
        let mut plane = 0;
        while plane < 4 {
            if i & (1 << plane) != 0 {
                v |= 0xff << (plane * 8);
            }
            plane += 1;
        }
        table[i] = v;
        i += 1;
    }
    table
}

/// Expands a 4-bit plane selector to a byte mask per plane (plane 0 in the low byte).
pub(crate) const MASK16: [u32; 16] = build_mask16();

#[inline]
pub(crate) fn mask16(bits: u8) -> u32 {
    MASK16[usize::from(bits & 0x0f)]
}

#[inline]
pub(crate) fn get_plane(data: u32, plane: u8) -> u8 {
    (data >> (u32::from(plane & 3) * 8)) as u8
}

/// One bit per [`VRAM_PAGE_SIZE`] page of VRAM.
#[derive(Debug, Clone)]
pub struct DirtyBitmap {
    words: Vec<u64>,
    pages: u32,
}

impl DirtyBitmap {
    pub fn new(vram_size: u32) -> Self {
        let pages = vram_size.div_ceil(VRAM_PAGE_SIZE);
        Self {
            words: vec![0; pages.div_ceil(64) as usize],
            pages,
        }
    }

    #[inline]
    pub fn mark(&mut self, offset: u32) {
        let page = offset >> VRAM_PAGE_SHIFT;
        if page < self.pages {
            self.words[(page / 64) as usize] |= 1 << (page % 64);
        }
    }

    pub fn mark_range(&mut self, offset: u32, len: u32) {
        if len == 0 {
            return;
        }
        let first = offset >> VRAM_PAGE_SHIFT;
        let last = offset.saturating_add(len - 1) >> VRAM_PAGE_SHIFT;
        for page in first..=last.min(self.pages.saturating_sub(1)) {
            self.words[(page / 64) as usize] |= 1 << (page % 64);
        }
    }

    #[inline]
    pub fn is_dirty(&self, offset: u32) -> bool {
        let page = offset >> VRAM_PAGE_SHIFT;
        page < self.pages && self.words[(page / 64) as usize] & (1 << (page % 64)) != 0
    }

    /// Clears every page in `[start, end)` (byte offsets, page aligned by truncation).
    pub fn reset_range(&mut self, start: u32, end: u32) {
        let first = start >> VRAM_PAGE_SHIFT;
        let last = (end >> VRAM_PAGE_SHIFT).min(self.pages);
        for page in first..last {
            self.words[(page / 64) as usize] &= !(1 << (page % 64));
        }
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn any_dirty(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }
}

impl VgaDevice {
    /// Reduces a legacy aperture address to a VRAM-relative offset through the memory map mode.
    ///
    /// Returns `None` for addresses outside the selected window.
    fn map_legacy_window(&self, paddr: u32) -> Option<u32> {
        let addr = paddr & 0x1ffff;
        match self.regs.memory_map_mode() {
            0 => Some(addr),
            1 => (addr < 0x10000).then(|| addr.wrapping_add(self.regs.bank_offset)),
            2 => {
                let addr = addr.wrapping_sub(0x10000);
                (addr < 0x8000).then_some(addr)
            }
            _ => {
                let addr = addr.wrapping_sub(0x18000);
                (addr < 0x8000).then_some(addr)
            }
        }
    }

    #[inline]
    fn vram_dword(&self, index: u32) -> Option<u32> {
        let off = index.checked_mul(4)? as usize;
        let bytes = self.vram.get(off..off + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Guest read from the legacy aperture (`A0000-BFFFF`).
    pub fn mem_read_u8(&mut self, paddr: u32) -> u8 {
        let Some(addr) = self.map_legacy_window(paddr) else {
            return OPEN_BUS;
        };

        if self.regs.chain4() {
            return self.vram.get(addr as usize).copied().unwrap_or(OPEN_BUS);
        }

        if self.regs.odd_even() {
            let plane = (self.regs.gr[4] & 2) | (addr & 1) as u8;
            let off = ((addr & !1).wrapping_mul(4)) | u32::from(plane);
            return self.vram.get(off as usize).copied().unwrap_or(OPEN_BUS);
        }

        let Some(latch) = self.vram_dword(addr) else {
            return OPEN_BUS;
        };
        self.regs.latch = latch;
        if self.regs.read_mode() == 0 {
            get_plane(latch, self.regs.gr[4])
        } else {
            // Colour compare: a bit is set where every "care" plane matches GR2.
            let mut ret = (latch ^ mask16(self.regs.gr[2])) & mask16(self.regs.gr[7]);
            ret |= ret >> 16;
            ret |= ret >> 8;
            !(ret as u8)
        }
    }

    /// Guest write to the legacy aperture (`A0000-BFFFF`).
    pub fn mem_write_u8(&mut self, paddr: u32, val: u8) {
        let Some(addr) = self.map_legacy_window(paddr) else {
            return;
        };

        if self.regs.chain4() {
            let mask = 1u8 << (addr & 3);
            if self.regs.sr[2] & mask != 0 {
                if let Some(slot) = self.vram.get_mut(addr as usize) {
                    *slot = val;
                    self.plane_updated |= mask;
                    self.dirty.mark(addr);
                }
            }
            return;
        }

        if self.regs.odd_even() {
            // GR4 does not affect writes.
            let plane = addr & 1;
            let mask = 1u8 << plane;
            if self.regs.sr[2] & mask != 0 {
                let off = (addr & !1).wrapping_mul(4) | plane;
                if let Some(slot) = self.vram.get_mut(off as usize) {
                    *slot = val;
                    self.plane_updated |= mask;
                    self.dirty.mark(off);
                }
            }
            return;
        }

        let Some(old) = self.vram_dword(addr) else {
            trace!(addr, "latched write past end of vram ignored");
            return;
        };
        let value = self.latched_write_value(val);
        let write_mask = mask16(self.regs.sr[2]);
        let new = (old & !write_mask) | (value & write_mask);
        let off = (addr * 4) as usize;
        self.vram[off..off + 4].copy_from_slice(&new.to_le_bytes());
        self.plane_updated |= self.regs.sr[2];
        self.dirty.mark(addr * 4);
    }

    /// Runs a CPU byte through the write mode, logical function and bit mask stages.
    fn latched_write_value(&self, val: u8) -> u32 {
        let regs = &self.regs;
        let latch = regs.latch;
        let mut val = u32::from(val);
        let bit_mask: u32;

        match regs.write_mode() {
            1 => return latch,
            2 => {
                val = mask16(val as u8);
                bit_mask = u32::from(regs.gr[8]);
            }
            3 => {
                let b = regs.rotate_count();
                val = (val >> b) | (val << (8 - b));
                bit_mask = u32::from(regs.gr[8]) & val;
                val = mask16(regs.gr[0]);
            }
            _ => {
                let b = regs.rotate_count();
                val = ((val >> b) | (val << (8 - b))) & 0xff;
                val |= val << 8;
                val |= val << 16;
                let set_mask = mask16(regs.gr[1]);
                val = (val & !set_mask) | (mask16(regs.gr[0]) & set_mask);
                bit_mask = u32::from(regs.gr[8]);
            }
        }

        val = match regs.logical_op() {
            1 => val & latch,
            2 => val | latch,
            3 => val ^ latch,
            _ => val,
        };

        let mut bit_mask = bit_mask & 0xff;
        bit_mask |= bit_mask << 8;
        bit_mask |= bit_mask << 16;
        (val & bit_mask) | (latch & !bit_mask)
    }

    /// Guest read from the linear framebuffer at `offset` bytes into VRAM.
    pub fn lfb_read_u8(&self, offset: u32) -> u8 {
        self.vram.get(offset as usize).copied().unwrap_or(OPEN_BUS)
    }

    /// Guest write to the linear framebuffer at `offset` bytes into VRAM.
    pub fn lfb_write_u8(&mut self, offset: u32, val: u8) {
        if let Some(slot) = self.vram.get_mut(offset as usize) {
            *slot = val;
            self.dirty.mark(offset);
        }
    }

    /// Copies `data` into VRAM at `offset` through the linear framebuffer, clipping at the end.
    pub fn lfb_write(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        if start >= self.vram.len() {
            return;
        }
        let len = data.len().min(self.vram.len() - start);
        self.vram[start..start + len].copy_from_slice(&data[..len]);
        self.dirty.mark_range(offset, len as u32);
    }

    /// Whether the page holding VRAM byte `offset` changed since it was last composed.
    pub fn is_page_dirty(&self, offset: u32) -> bool {
        self.dirty.is_dirty(offset)
    }

    /// Contents of the latch register (plane 0 in the low byte).
    pub fn latch(&self) -> u32 {
        self.regs.latch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VgaConfig, VgaDevice};

    const A0000: u32 = 0xA0000;

    fn dev() -> VgaDevice {
        VgaDevice::new(VgaConfig::default()).unwrap()
    }

    fn set_planar(dev: &mut VgaDevice) {
        // Latched mode: chain-4 off, odd/even off, map mode 1 (A0000, 64K).
        dev.regs.sr[4] = 0x06;
        dev.regs.sr[2] = 0x0f;
        dev.regs.gr[6] = 0x05;
        dev.regs.gr[8] = 0xff;
    }

    fn plane_bytes(dev: &VgaDevice, offset: u32) -> [u8; 4] {
        let off = (offset * 4) as usize;
        [
            dev.vram[off],
            dev.vram[off + 1],
            dev.vram[off + 2],
            dev.vram[off + 3],
        ]
    }

    #[test]
    fn mask16_expands_plane_selectors() {
        assert_eq!(MASK16[0x0], 0x0000_0000);
        assert_eq!(MASK16[0x1], 0x0000_00ff);
        assert_eq!(MASK16[0x5], 0x00ff_00ff);
        assert_eq!(MASK16[0xf], 0xffff_ffff);
    }

    #[test]
    fn dirty_bitmap_marks_and_resets_pages() {
        let mut bm = DirtyBitmap::new(256 * 1024);
        bm.mark(0x1234);
        assert!(bm.is_dirty(0x1000));
        assert!(!bm.is_dirty(0x2000));
        bm.mark_range(0x2fff, 2);
        assert!(bm.is_dirty(0x2000));
        assert!(bm.is_dirty(0x3000));
        bm.reset_range(0x1000, 0x3000);
        assert!(!bm.is_dirty(0x1000));
        assert!(!bm.is_dirty(0x2000));
        assert!(bm.is_dirty(0x3000));
        // Out of range offsets are ignored.
        bm.mark(256 * 1024);
        assert!(!bm.is_dirty(256 * 1024));
    }

    #[test]
    fn map_mode_windows_float_high_outside_range() {
        let mut dev = dev();
        dev.regs.sr[4] = 0x08;
        dev.regs.sr[2] = 0x0f;

        // Mode 2: B0000-B7FFF.
        dev.regs.gr[6] = 0x08;
        assert_eq!(dev.mem_read_u8(A0000), OPEN_BUS);
        dev.mem_write_u8(0xB0000, 0x12);
        assert_eq!(dev.vram[0], 0x12);
        assert_eq!(dev.mem_read_u8(0xB8000), OPEN_BUS);

        // Mode 3: B8000-BFFFF.
        dev.regs.gr[6] = 0x0c;
        dev.mem_write_u8(0xB8001, 0x34);
        assert_eq!(dev.vram[1], 0x34);
        assert_eq!(dev.mem_read_u8(0xB0000), OPEN_BUS);

        // Mode 1: A0000-AFFFF with bank offset.
        dev.regs.gr[6] = 0x04;
        dev.regs.bank_offset = 0x10000;
        dev.mem_write_u8(A0000, 0x56);
        assert_eq!(dev.vram[0x10000], 0x56);
        assert_eq!(dev.mem_read_u8(0xB0000), OPEN_BUS);

        // Mode 0: full 128K window.
        dev.regs.gr[6] = 0x00;
        dev.mem_write_u8(0xB0002, 0x78);
        assert_eq!(dev.vram[0x10002], 0x78);
    }

    #[test]
    fn chain4_write_respects_plane_mask() {
        let mut dev = dev();
        dev.regs.sr[4] = 0x08;
        dev.regs.sr[2] = 0x05;
        dev.regs.gr[6] = 0x04;
        for i in 0..4 {
            dev.mem_write_u8(A0000 + i, 0xaa);
        }
        assert_eq!(&dev.vram[0..4], &[0xaa, 0x00, 0xaa, 0x00]);
        assert_eq!(dev.plane_updated, 0x05);
    }

    #[test]
    fn odd_even_reads_use_gr4_bit1_as_plane_high_bit() {
        let mut dev = dev();
        dev.regs.sr[4] = 0x02;
        dev.regs.gr[6] = 0x0e;
        dev.vram[2] = 0x11;
        dev.vram[3] = 0x22;
        dev.regs.gr[4] = 0x02;
        assert_eq!(dev.mem_read_u8(0xB8000), 0x11);
        assert_eq!(dev.mem_read_u8(0xB8001), 0x22);
    }

    #[test]
    fn write_mode0_set_reset_and_rotate() {
        let mut dev = dev();
        set_planar(&mut dev);

        // Set/reset forces planes 0 and 2 to ones, others take the rotated CPU byte.
        dev.regs.gr[0] = 0x05;
        dev.regs.gr[1] = 0x05;
        dev.regs.gr[3] = 0x01; // rotate right by 1
        dev.mem_write_u8(A0000, 0x03);
        assert_eq!(plane_bytes(&dev, 0), [0xff, 0x81, 0xff, 0x81]);
    }

    #[test]
    fn write_mode0_bit_mask_keeps_latched_bits() {
        let mut dev = dev();
        set_planar(&mut dev);
        dev.vram[0..4].copy_from_slice(&[0x0f, 0x0f, 0x0f, 0x0f]);

        let _ = dev.mem_read_u8(A0000);
        dev.regs.gr[8] = 0xf0;
        dev.mem_write_u8(A0000, 0xff);
        assert_eq!(plane_bytes(&dev, 0), [0xff; 4]);

        dev.vram[4..8].copy_from_slice(&[0xff; 4]);
        let _ = dev.mem_read_u8(A0000 + 1);
        dev.mem_write_u8(A0000 + 1, 0x00);
        assert_eq!(plane_bytes(&dev, 1), [0x0f; 4]);
    }

    #[test]
    fn write_mode0_logical_functions_combine_with_latch() {
        let mut dev = dev();
        set_planar(&mut dev);
        dev.vram[0..4].copy_from_slice(&[0xf0, 0xf0, 0xf0, 0xf0]);

        for (func, expected) in [(1u8, 0x30u8), (2, 0xfc), (3, 0xcc)] {
            dev.vram[0..4].copy_from_slice(&[0xf0; 4]);
            let _ = dev.mem_read_u8(A0000);
            dev.regs.gr[3] = func << 3;
            dev.mem_write_u8(A0000, 0x3c);
            assert_eq!(plane_bytes(&dev, 0), [expected; 4], "function {func}");
        }
    }

    #[test]
    fn write_mode1_copies_latch() {
        let mut dev = dev();
        set_planar(&mut dev);
        dev.vram[0..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        let _ = dev.mem_read_u8(A0000);
        dev.regs.gr[5] = 0x01;
        dev.mem_write_u8(A0000 + 10, 0x99);
        assert_eq!(plane_bytes(&dev, 10), [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn write_mode2_expands_low_nibble_to_planes() {
        let mut dev = dev();
        set_planar(&mut dev);
        dev.regs.gr[5] = 0x02;
        dev.regs.gr[8] = 0x0f;
        dev.mem_write_u8(A0000, 0x0a);
        assert_eq!(plane_bytes(&dev, 0), [0x00, 0x0f, 0x00, 0x0f]);
    }

    #[test]
    fn write_mode3_uses_cpu_byte_as_bit_mask() {
        let mut dev = dev();
        set_planar(&mut dev);
        dev.regs.gr[5] = 0x03;
        dev.regs.gr[0] = 0x0c;
        dev.regs.gr[8] = 0x3c;
        dev.mem_write_u8(A0000, 0xf0);
        assert_eq!(plane_bytes(&dev, 0), [0x00, 0x00, 0x30, 0x30]);
    }

    #[test]
    fn sequencer_plane_mask_limits_latched_writes() {
        let mut dev = dev();
        set_planar(&mut dev);
        dev.regs.sr[2] = 0x02;
        dev.mem_write_u8(A0000, 0xff);
        assert_eq!(plane_bytes(&dev, 0), [0x00, 0xff, 0x00, 0x00]);
        assert!(dev.is_page_dirty(0));
    }

    #[test]
    fn read_mode1_color_compare() {
        let mut dev = dev();
        set_planar(&mut dev);
        dev.vram[0..4].copy_from_slice(&[0b1010_0000, 0b1100_0000, 0, 0]);
        dev.regs.gr[5] = 0x08;
        dev.regs.gr[2] = 0x03; // colour 3
        dev.regs.gr[7] = 0x0f;
        assert_eq!(dev.mem_read_u8(A0000), 0b1000_0000);

        // Planes 2 and 3 become "don't care".
        dev.regs.gr[7] = 0x03;
        assert_eq!(dev.mem_read_u8(A0000), 0b1000_0000);
        dev.regs.gr[7] = 0x00;
        assert_eq!(dev.mem_read_u8(A0000), 0xff);
    }

    #[test]
    fn lfb_access_is_flat_and_bounded() {
        let mut dev = VgaDevice::new(VgaConfig::default().with_vram_size(256 * 1024)).unwrap();
        dev.lfb_write_u8(0x3ffff, 0x5a);
        assert_eq!(dev.lfb_read_u8(0x3ffff), 0x5a);
        assert!(dev.is_page_dirty(0x3f000));
        dev.lfb_write_u8(0x40000, 0x5a);
        assert_eq!(dev.lfb_read_u8(0x40000), OPEN_BUS);
    }
}
