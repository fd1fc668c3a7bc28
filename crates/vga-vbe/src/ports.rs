//! Legacy VGA register ports (`0x3B0-0x3DF`).

use tracing::{debug, trace};

use crate::regs::{
    AR_COUNT, EGA_SWITCHES, GR_WRITE_MASK, SR_WRITE_MASK, VBE_DISPI_INDEX_ENABLE,
};
use crate::VgaDevice;

const PORT_AC_INDEX_DATA: u16 = 0x3C0;
const PORT_AC_DATA_READ: u16 = 0x3C1;
const PORT_MISC_OUTPUT_WRITE: u16 = 0x3C2;
const PORT_INPUT_STATUS0: u16 = PORT_MISC_OUTPUT_WRITE;
const PORT_SEQ_INDEX: u16 = 0x3C4;
const PORT_SEQ_DATA: u16 = 0x3C5;
const PORT_DAC_READ_INDEX: u16 = 0x3C7;
const PORT_DAC_STATE: u16 = PORT_DAC_READ_INDEX;
const PORT_DAC_WRITE_INDEX: u16 = 0x3C8;
const PORT_DAC_DATA: u16 = 0x3C9;
const PORT_FEATURE_CONTROL_READ: u16 = 0x3CA;
const PORT_MISC_OUTPUT_READ: u16 = 0x3CC;
const PORT_GC_INDEX: u16 = 0x3CE;
const PORT_GC_DATA: u16 = 0x3CF;

const PORT_CRTC_INDEX_MONO: u16 = 0x3B4;
const PORT_CRTC_DATA_MONO: u16 = 0x3B5;
const PORT_INPUT_STATUS1_MONO: u16 = 0x3BA;
const PORT_CRTC_INDEX_COLOR: u16 = 0x3D4;
const PORT_CRTC_DATA_COLOR: u16 = 0x3D5;
const PORT_INPUT_STATUS1_COLOR: u16 = 0x3DA;

/// Reads from the CRTC block that the misc output register does not select.
const INACTIVE_READ_VALUE: u8 = 0xFF;

/// CRTC registers whose writes change the retrace timing.
const CRTC_TIMING_REGS: [u8; 11] = [0, 2, 3, 5, 6, 7, 9, 0x10, 0x11, 0x15, 0x16];

impl VgaDevice {
    /// The misc output register maps either the mono (`0x3Bx`) or the colour (`0x3Dx`) CRTC block;
    /// the other block does not decode.
    fn port_decodes(&self, port: u16) -> bool {
        if self.regs.color_emulation() {
            !(0x3B0..=0x3BF).contains(&port)
        } else {
            !(0x3D0..=0x3DF).contains(&port)
        }
    }

    pub(crate) fn port_read_u8(&mut self, port: u16) -> u8 {
        if !self.port_decodes(port) {
            return INACTIVE_READ_VALUE;
        }
        let regs = &mut self.regs;
        let val = match port {
            PORT_AC_INDEX_DATA => {
                if !regs.ar_flip_flop {
                    regs.ar_index
                } else {
                    0
                }
            }
            PORT_AC_DATA_READ => {
                let index = usize::from(regs.ar_index & 0x1f);
                regs.ar.get(index).copied().unwrap_or(0)
            }
            PORT_INPUT_STATUS0 => regs.st00,
            PORT_SEQ_INDEX => regs.sr_index,
            PORT_SEQ_DATA => regs.sr[usize::from(regs.sr_index)],
            PORT_DAC_STATE => regs.dac_state,
            PORT_DAC_WRITE_INDEX => regs.dac_write_index,
            PORT_DAC_DATA => {
                let off = usize::from(regs.dac_read_index) * 3 + usize::from(regs.dac_sub_index);
                let val = regs.palette[off];
                regs.dac_sub_index += 1;
                if regs.dac_sub_index == 3 {
                    regs.dac_sub_index = 0;
                    regs.dac_read_index = regs.dac_read_index.wrapping_add(1);
                }
                val
            }
            PORT_FEATURE_CONTROL_READ => regs.fcr,
            PORT_MISC_OUTPUT_READ => regs.msr,
            PORT_GC_INDEX => regs.gr_index,
            PORT_GC_DATA => regs.gr[usize::from(regs.gr_index)],
            PORT_CRTC_INDEX_MONO | PORT_CRTC_INDEX_COLOR => regs.cr_index,
            PORT_CRTC_DATA_MONO | PORT_CRTC_DATA_COLOR => regs.cr[usize::from(regs.cr_index)],
            PORT_INPUT_STATUS1_MONO | PORT_INPUT_STATUS1_COLOR => {
                let val = self.sample_input_status1();
                self.regs.ar_flip_flop = false;
                val
            }
            _ => 0,
        };
        trace!(port, val, "vga port read");
        val
    }

    pub(crate) fn port_write_u8(&mut self, port: u16, val: u8) {
        if !self.port_decodes(port) {
            return;
        }
        trace!(port, val, "vga port write");

        match port {
            PORT_AC_INDEX_DATA | PORT_AC_DATA_READ => self.write_attribute(val),
            PORT_MISC_OUTPUT_WRITE => {
                self.regs.msr = val & !0x10;
                let sense = (EGA_SWITCHES >> ((val >> 2) & 3)) & 0x10;
                self.regs.st00 = (self.regs.st00 & !0x10) | sense;
                if self.config().real_retrace {
                    self.update_retrace_timing();
                }
            }
            PORT_SEQ_INDEX => self.regs.sr_index = val & 7,
            PORT_SEQ_DATA => {
                let index = usize::from(self.regs.sr_index);
                self.regs.sr[index] = val & SR_WRITE_MASK[index];
                if index == 1 && self.config().real_retrace {
                    self.update_retrace_timing();
                }
                // SR7 bit 0 clear drops back out of the extended (VBE) modes.
                if index == 7 && val & 0x01 == 0 {
                    self.regs.set_vbe(VBE_DISPI_INDEX_ENABLE, 0);
                    self.regs.bank_offset = 0;
                }
            }
            PORT_DAC_READ_INDEX => {
                self.regs.dac_read_index = val;
                self.regs.dac_sub_index = 0;
                self.regs.dac_state = 3;
            }
            PORT_DAC_WRITE_INDEX => {
                self.regs.dac_write_index = val;
                self.regs.dac_sub_index = 0;
                self.regs.dac_state = 0;
            }
            PORT_DAC_DATA => {
                let regs = &mut self.regs;
                regs.dac_cache[usize::from(regs.dac_sub_index)] = val;
                regs.dac_sub_index += 1;
                if regs.dac_sub_index == 3 {
                    let off = usize::from(regs.dac_write_index) * 3;
                    regs.palette[off..off + 3].copy_from_slice(&regs.dac_cache);
                    regs.dac_sub_index = 0;
                    regs.dac_write_index = regs.dac_write_index.wrapping_add(1);
                }
            }
            PORT_GC_INDEX => self.regs.gr_index = val & 0x0f,
            PORT_GC_DATA => {
                let index = usize::from(self.regs.gr_index);
                self.regs.gr[index] = val & GR_WRITE_MASK[index];
            }
            PORT_CRTC_INDEX_MONO | PORT_CRTC_INDEX_COLOR => self.regs.cr_index = val,
            PORT_CRTC_DATA_MONO | PORT_CRTC_DATA_COLOR => self.write_crtc(val),
            PORT_INPUT_STATUS1_MONO | PORT_INPUT_STATUS1_COLOR => self.regs.fcr = val & 0x10,
            _ => {}
        }
    }

    fn write_attribute(&mut self, val: u8) {
        let regs = &mut self.regs;
        if !regs.ar_flip_flop {
            regs.ar_index = val & 0x3f;
        } else {
            let index = usize::from(regs.ar_index & 0x1f);
            let val = match index {
                0x00..=0x0f => Some(val & 0x3f),
                0x10 => Some(val & !0x10),
                0x11 => Some(val),
                0x12 => Some(val & !0xc0),
                0x13 | 0x14 => Some(val & !0xf0),
                _ => None,
            };
            if let Some(val) = val {
                debug_assert!(index < AR_COUNT);
                regs.ar[index] = val;
            }
        }
        regs.ar_flip_flop = !regs.ar_flip_flop;
    }

    fn write_crtc(&mut self, val: u8) {
        let index = self.regs.cr_index;
        if self.regs.crtc_protected() && index <= 7 {
            // Line compare bit 8 in the overflow register stays writable.
            if index == 7 {
                let cr7 = &mut self.regs.cr[7];
                *cr7 = (*cr7 & !0x10) | (val & 0x10);
            } else {
                debug!(index, val, "crtc write dropped while protected");
            }
            return;
        }
        self.regs.cr[usize::from(index)] = val;

        if self.config().real_retrace && CRTC_TIMING_REGS.contains(&index) {
            self.update_retrace_timing();
        }
    }
}
