//! Bochs VBE ("VBE_DISPI") register file behind ports `0x1CE`/`0x1CF`.

use tracing::debug;

use crate::regs::*;
use crate::VgaDevice;

/// Bytes per scanline for `width` pixels at `bpp`, rounded up to a dword.
pub(crate) fn calc_line_pitch(bpp: u16, width: u16) -> u32 {
    let width = u32::from(width);
    let pitch = if bpp <= 4 {
        width >> 1
    } else {
        width * ((u32::from(bpp) + 7) >> 3)
    };
    (pitch + 3) & !3
}

fn valid_id(id: u16) -> bool {
    matches!(
        id,
        VBE_DISPI_ID0
            | VBE_DISPI_ID1
            | VBE_DISPI_ID2
            | VBE_DISPI_ID3
            | VBE_DISPI_ID4
            | VBE_DISPI_ID_VBOX_VIDEO
            | VBE_DISPI_ID_ANYX
            | VBE_DISPI_ID_HGSMI
            | VBE_DISPI_ID_CFG
    )
}

impl VgaDevice {
    /// Value of the register selected by the VBE index port.
    pub(crate) fn vbe_read_data(&self) -> u32 {
        let index = self.regs.vbe_index;
        if index >= VBE_DISPI_INDEX_NB {
            return 0;
        }

        if self.regs.vbe_enable().contains(VbeEnable::GETCAPS) {
            return match index {
                VBE_DISPI_INDEX_XRES => u32::from(VBE_DISPI_MAX_XRES),
                VBE_DISPI_INDEX_YRES => u32::from(VBE_DISPI_MAX_YRES),
                VBE_DISPI_INDEX_BPP => u32::from(VBE_DISPI_MAX_BPP),
                _ => u32::from(self.regs.vbe(index)),
            };
        }

        match index {
            VBE_DISPI_INDEX_VBOX_VIDEO => 1,
            VBE_DISPI_INDEX_CFG => self.vbe_cfg_query(),
            _ => u32::from(self.regs.vbe(index)),
        }
    }

    /// Answers the capability query selected by the last `CFG` write.
    fn vbe_cfg_query(&self) -> u32 {
        let cfg = self.regs.vbe(VBE_DISPI_INDEX_CFG);
        let id = cfg & VBE_DISPI_CFG_MASK_ID;
        let value = match id {
            VBE_DISPI_CFG_ID_VERSION => 1,
            VBE_DISPI_CFG_ID_VRAM_SIZE => self.vram_size(),
            VBE_DISPI_CFG_ID_3D => 0,
            _ => return 0,
        };
        if cfg & VBE_DISPI_CFG_MASK_SUPPORT != 0 {
            1
        } else {
            value
        }
    }

    /// Recomputes the scanline pitch, start address and virtual height after a geometry change.
    fn vbe_recalculate(&mut self) {
        let vram_size = self.config().vram_size;
        let regs = &mut self.regs;
        let bpp = regs.vbe(VBE_DISPI_INDEX_BPP);
        let xres = regs.vbe(VBE_DISPI_INDEX_XRES);
        if bpp == 0 || xres == 0 {
            return;
        }

        let mut pitch = calc_line_pitch(bpp, regs.vbe(VBE_DISPI_INDEX_VIRT_WIDTH));
        if pitch == 0 {
            pitch = calc_line_pitch(bpp, xres);
        }
        if pitch == 0 {
            return;
        }

        let virt_height = vram_size / pitch;
        let x_offset = u32::from(regs.vbe(VBE_DISPI_INDEX_X_OFFSET));
        let y_offset = u32::from(regs.vbe(VBE_DISPI_INDEX_Y_OFFSET));
        let x_bytes = if bpp == 4 {
            x_offset >> 1
        } else {
            x_offset * ((u32::from(bpp) + 7) >> 3)
        };
        let start = pitch.wrapping_mul(y_offset).wrapping_add(x_bytes) >> 2;

        regs.vbe_line_offset = pitch.min(vram_size);
        regs.vbe_start_addr = start.min(vram_size);
        regs.set_vbe(
            VBE_DISPI_INDEX_VIRT_HEIGHT,
            virt_height.min(0xffff) as u16,
        );
    }

    /// Guest write to the register selected by the VBE index port.
    pub(crate) fn vbe_write_data(&mut self, val: u16) {
        let index = self.regs.vbe_index;
        if index >= VBE_DISPI_INDEX_NB {
            return;
        }

        let mut recalc = false;
        match index {
            VBE_DISPI_INDEX_ID => {
                if valid_id(val) {
                    self.regs.set_vbe(index, val);
                } else {
                    debug!(val, "invalid vbe id ignored");
                }
            }
            VBE_DISPI_INDEX_XRES => {
                if val <= VBE_DISPI_MAX_XRES {
                    self.regs.set_vbe(index, val);
                    self.regs.set_vbe(VBE_DISPI_INDEX_VIRT_WIDTH, val);
                    recalc = true;
                }
            }
            VBE_DISPI_INDEX_YRES => {
                if val <= VBE_DISPI_MAX_YRES {
                    self.regs.set_vbe(index, val);
                }
            }
            VBE_DISPI_INDEX_BPP => {
                let val = if val == 0 { 8 } else { val };
                if matches!(val, 4 | 8 | 15 | 16 | 24 | 32) {
                    self.regs.set_vbe(index, val);
                    recalc = true;
                } else {
                    debug!(val, "unsupported vbe bpp ignored");
                }
            }
            VBE_DISPI_INDEX_BANK => self.vbe_write_bank(val),
            VBE_DISPI_INDEX_ENABLE => {
                if !self.vbe_write_enable(val) {
                    return;
                }
                recalc = true;
            }
            VBE_DISPI_INDEX_VIRT_WIDTH | VBE_DISPI_INDEX_X_OFFSET | VBE_DISPI_INDEX_Y_OFFSET => {
                self.regs.set_vbe(index, val);
                recalc = true;
            }
            VBE_DISPI_INDEX_VBOX_VIDEO => {}
            VBE_DISPI_INDEX_CFG => self.regs.set_vbe(index, val),
            _ => {}
        }

        if recalc {
            self.vbe_recalculate();
        }
    }

    fn vbe_write_bank(&mut self, val: u16) {
        let mut max_bank = self.regs.vbe_bank_max;
        if self.regs.vbe(VBE_DISPI_INDEX_BPP) <= 4 {
            // Each bank covers four planes.
            max_bank >>= 2;
        }
        let mut bank = u32::from(val);
        if max_bank < 0x100 {
            bank &= 0xff;
        }
        if bank > max_bank {
            debug!(bank, max_bank, "vbe bank clamped");
            bank = max_bank;
        }
        self.regs.set_vbe(VBE_DISPI_INDEX_BANK, bank as u16);
        self.regs.bank_offset = bank << 16;
    }

    /// Handles an `ENABLE` write. Returns `false` when the mode switch is rejected and nothing
    /// was stored.
    fn vbe_write_enable(&mut self, val: u16) -> bool {
        let requested = VbeEnable::from_bits_retain(val);
        if requested.contains(VbeEnable::ENABLED) && !self.regs.vbe_enabled() {
            if !self.vbe_program_mode(requested) {
                return false;
            }
        } else {
            self.regs.bank_offset = 0;
        }

        self.regs.set_vbe(VBE_DISPI_INDEX_ENABLE, val);
        let enabled = requested.contains(VbeEnable::ENABLED);
        self.pending_lfb_change = Some(enabled);
        debug!(enabled, val, "vbe enable");
        true
    }

    /// Validates the requested mode against VRAM and mirrors it into the legacy registers.
    fn vbe_program_mode(&mut self, requested: VbeEnable) -> bool {
        let regs = &self.regs;
        let xres = u32::from(regs.vbe(VBE_DISPI_INDEX_XRES));
        let yres = u32::from(regs.vbe(VBE_DISPI_INDEX_YRES));
        let bpp = u32::from(regs.vbe(VBE_DISPI_INDEX_BPP));
        let mut virt_width = u32::from(regs.vbe(VBE_DISPI_INDEX_VIRT_WIDTH));
        if virt_width == 0 {
            virt_width = xres;
        }

        let line_bytes = if bpp == 4 {
            xres >> 1
        } else {
            xres * ((bpp + 7) >> 3)
        };
        let frame_bytes = u64::from(line_bytes) * u64::from(yres);
        if virt_width == 0 || yres == 0 || frame_bytes > u64::from(self.vram_size()) {
            debug!(xres, yres, bpp, "vbe mode does not fit in vram, enable ignored");
            return false;
        }

        self.regs.set_vbe(VBE_DISPI_INDEX_X_OFFSET, 0);
        self.regs.set_vbe(VBE_DISPI_INDEX_Y_OFFSET, 0);

        if !requested.contains(VbeEnable::NO_CLEAR_MEM) {
            let lines = yres.min(u32::from(self.regs.vbe(VBE_DISPI_INDEX_VIRT_HEIGHT)));
            let len = (lines as usize)
                .saturating_mul(self.regs.vbe_line_offset as usize)
                .min(self.vram.len());
            self.vram[..len].fill(0);
            self.dirty.mark_range(0, len as u32);
        }

        let regs = &mut self.regs;

        // Legacy registers mirror the mode so software probing through them sees it.
        regs.gr[6] = (regs.gr[6] & !0x0c) | 0x05;
        regs.cr[0x17] |= 3;
        regs.cr[0x13] = (regs.vbe_line_offset >> 3) as u8;
        regs.cr[0x01] = ((virt_width >> 3) as u8).wrapping_sub(1);

        let h = yres - 1;
        regs.cr[0x12] = h as u8;
        regs.cr[0x07] =
            (regs.cr[0x07] & !0x42) | ((h >> 7) & 0x02) as u8 | ((h >> 3) & 0x40) as u8;
        // Line compare disabled.
        regs.cr[0x18] = 0xff;
        regs.cr[0x07] |= 0x10;
        regs.cr[0x09] |= 0x40;

        let shift_control = if bpp == 4 {
            regs.sr[0x01] &= !0x08;
            0
        } else {
            regs.sr[0x04] |= 0x08;
            regs.sr[0x02] |= 0x0f;
            regs.sr[0x07] |= 0x01;
            2
        };
        regs.gr[5] = (regs.gr[5] & !0x60) | (shift_control << 5);
        regs.cr[0x09] &= !0x9f;
        regs.ar_index |= AR_INDEX_PAS;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PortIO, VgaConfig, VBE_DISPI_DATA_PORT, VBE_DISPI_INDEX_PORT};

    fn dev_with(vram_size: u32) -> VgaDevice {
        VgaDevice::new(VgaConfig::default().with_vram_size(vram_size)).unwrap()
    }

    fn write(dev: &mut VgaDevice, index: u16, val: u16) {
        dev.port_write(VBE_DISPI_INDEX_PORT, 2, u32::from(index));
        dev.port_write(VBE_DISPI_DATA_PORT, 2, u32::from(val));
    }

    fn read(dev: &mut VgaDevice, index: u16) -> u16 {
        dev.port_write(VBE_DISPI_INDEX_PORT, 2, u32::from(index));
        dev.port_read(VBE_DISPI_DATA_PORT, 2) as u16
    }

    #[test]
    fn line_pitch_is_dword_aligned() {
        assert_eq!(calc_line_pitch(4, 640), 320);
        assert_eq!(calc_line_pitch(8, 641), 644);
        assert_eq!(calc_line_pitch(15, 800), 1600);
        assert_eq!(calc_line_pitch(24, 1023), 3072);
        assert_eq!(calc_line_pitch(32, 1024), 4096);
    }

    #[test]
    fn oversized_mode_is_silently_rejected() {
        let mut dev = dev_with(4 * 1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_XRES, 4096);
        write(&mut dev, VBE_DISPI_INDEX_YRES, 4096);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 32);
        write(&mut dev, VBE_DISPI_INDEX_ENABLE, VbeEnable::ENABLED.bits());
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_ENABLE), 0);
        assert!(!dev.vbe_enabled());
        assert_eq!(dev.take_lfb_mode_change(), None);
    }

    #[test]
    fn enable_programs_legacy_registers() {
        let mut dev = dev_with(16 * 1024 * 1024);
        dev.vram[0] = 0xaa;
        write(&mut dev, VBE_DISPI_INDEX_XRES, 800);
        write(&mut dev, VBE_DISPI_INDEX_YRES, 600);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 32);
        write(
            &mut dev,
            VBE_DISPI_INDEX_ENABLE,
            (VbeEnable::ENABLED | VbeEnable::LFB_ENABLED).bits(),
        );

        assert!(dev.vbe_enabled());
        assert_eq!(dev.vram[0], 0);
        assert_eq!(dev.regs.vbe_line_offset, 3200);
        assert_eq!(dev.regs.vbe_start_addr, 0);
        assert_eq!(
            dev.regs.vbe(VBE_DISPI_INDEX_VIRT_HEIGHT),
            (16 * 1024 * 1024 / 3200) as u16
        );
        assert_eq!(dev.regs.gr[6] & 0x0d, 0x05);
        assert_eq!(dev.regs.gr[5] & 0x60, 0x40);
        assert_eq!(dev.regs.cr[0x01], 99);
        // 599 = 0x257: bit 8 clear, bit 9 set.
        assert_eq!(dev.regs.cr[0x12], 0x57);
        assert_eq!(dev.regs.cr[0x07] & 0x42, 0x40);
        assert_eq!(dev.regs.cr[0x18], 0xff);
        assert_eq!(dev.regs.sr[4] & 0x08, 0x08);
        assert_ne!(dev.regs.ar_index & AR_INDEX_PAS, 0);
        assert_eq!(dev.take_lfb_mode_change(), Some(true));

        write(&mut dev, VBE_DISPI_INDEX_ENABLE, 0);
        assert!(!dev.vbe_enabled());
        assert_eq!(dev.take_lfb_mode_change(), Some(false));
    }

    #[test]
    fn no_clear_mem_preserves_vram() {
        let mut dev = dev_with(16 * 1024 * 1024);
        dev.vram[0] = 0xaa;
        write(&mut dev, VBE_DISPI_INDEX_XRES, 640);
        write(&mut dev, VBE_DISPI_INDEX_YRES, 480);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 8);
        write(
            &mut dev,
            VBE_DISPI_INDEX_ENABLE,
            (VbeEnable::ENABLED | VbeEnable::NO_CLEAR_MEM).bits(),
        );
        assert!(dev.vbe_enabled());
        assert_eq!(dev.vram[0], 0xaa);
    }

    #[test]
    fn bpp_zero_means_eight_and_invalid_depths_are_ignored() {
        let mut dev = dev_with(16 * 1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 0);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_BPP), 8);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 12);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_BPP), 8);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 16);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_BPP), 16);
    }

    #[test]
    fn id_accepts_only_known_versions() {
        let mut dev = dev_with(16 * 1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_ID, VBE_DISPI_ID4);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_ID), VBE_DISPI_ID4);
        write(&mut dev, VBE_DISPI_INDEX_ID, 0x1234);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_ID), VBE_DISPI_ID4);
    }

    #[test]
    fn resolution_limits_and_getcaps() {
        let mut dev = dev_with(16 * 1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_XRES, 1024);
        write(&mut dev, VBE_DISPI_INDEX_XRES, VBE_DISPI_MAX_XRES + 1);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_XRES), 1024);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_VIRT_WIDTH), 1024);

        write(&mut dev, VBE_DISPI_INDEX_ENABLE, VbeEnable::GETCAPS.bits());
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_XRES), VBE_DISPI_MAX_XRES);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_YRES), VBE_DISPI_MAX_YRES);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_BPP), VBE_DISPI_MAX_BPP);
        write(&mut dev, VBE_DISPI_INDEX_ENABLE, 0);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_XRES), 1024);
    }

    #[test]
    fn bank_is_clamped_to_vram() {
        let mut dev = dev_with(1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 8);
        write(&mut dev, VBE_DISPI_INDEX_BANK, 3);
        assert_eq!(dev.regs.bank_offset, 3 << 16);
        write(&mut dev, VBE_DISPI_INDEX_BANK, 40);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_BANK), 15);
        assert_eq!(dev.regs.bank_offset, 15 << 16);

        // Four planes per bank in 4bpp modes.
        write(&mut dev, VBE_DISPI_INDEX_BPP, 4);
        write(&mut dev, VBE_DISPI_INDEX_BANK, 40);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_BANK), 3);
    }

    #[test]
    fn offsets_move_the_start_address() {
        let mut dev = dev_with(16 * 1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_XRES, 640);
        write(&mut dev, VBE_DISPI_INDEX_BPP, 32);
        write(&mut dev, VBE_DISPI_INDEX_VIRT_WIDTH, 1024);
        write(&mut dev, VBE_DISPI_INDEX_Y_OFFSET, 10);
        write(&mut dev, VBE_DISPI_INDEX_X_OFFSET, 4);
        assert_eq!(dev.regs.vbe_line_offset, 4096);
        assert_eq!(dev.regs.vbe_start_addr, (4096 * 10 + 16) >> 2);
    }

    #[test]
    fn vbox_video_and_cfg_queries() {
        let mut dev = dev_with(8 * 1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_VBOX_VIDEO, 0x55);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_VBOX_VIDEO), 1);

        write(&mut dev, VBE_DISPI_INDEX_CFG, VBE_DISPI_CFG_ID_VRAM_SIZE);
        dev.regs.vbe_index = VBE_DISPI_INDEX_CFG;
        assert_eq!(dev.vbe_read_data(), 8 * 1024 * 1024);
        write(&mut dev, VBE_DISPI_INDEX_CFG, VBE_DISPI_CFG_ID_3D);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_CFG), 0);
        write(
            &mut dev,
            VBE_DISPI_INDEX_CFG,
            VBE_DISPI_CFG_MASK_SUPPORT | VBE_DISPI_CFG_ID_3D,
        );
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_CFG), 1);
        write(&mut dev, VBE_DISPI_INDEX_CFG, VBE_DISPI_CFG_MASK_SUPPORT | 0x77);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_CFG), 0);

        assert_eq!(read(&mut dev, 0x40), 0);
    }

    #[test]
    fn fb_base_hi_reports_lfb_base() {
        let mut dev = dev_with(16 * 1024 * 1024);
        assert_eq!(read(&mut dev, VBE_DISPI_INDEX_FB_BASE_HI), 0xE000);
    }
}
