//! Input status 1 synthesis: either a cheap toggle or a CRTC-derived retrace model.

use crate::regs::{ST01_DISP_ENABLE, ST01_V_RETRACE};
use crate::VgaDevice;

/// Dot clocks selected by misc output bits 3:2 (the external clock inputs read as 25MHz).
const DOT_CLOCKS: [u64; 4] = [25_175_000, 28_322_000, 25_175_000, 25_175_000];

/// Frame timing derived from the CRTC, in nanoseconds relative to the start of vertical blank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RetraceState {
    /// Whole frame period; zero until the CRTC has been programmed with usable timings.
    pub frame_ns: u64,
    pub h_total_ns: u64,
    pub hb_end_ns: u64,
    pub vb_end_ns: u64,
    pub vs_start_ns: u64,
    pub vs_end_ns: u64,
}

impl RetraceState {
    /// Derives the blank and sync windows from the CRTC, sequencer and misc output registers.
    pub fn compute(cr: &[u8], sr1: u8, msr: u8) -> Self {
        let htotal = u64::from(cr[0x00]) + 5;
        let hblank_start = u64::from(cr[0x02]);
        let hblank_end = u64::from(cr[0x03] & 0x1f) + (u64::from(cr[0x05] & 0x80) >> 2);

        let vtotal = u64::from(cr[0x06])
            + (u64::from(cr[0x07] & 0x01) << 8)
            + (u64::from(cr[0x07] & 0x20) << 4)
            + 2;
        let vblank_start = u64::from(cr[0x15])
            + (u64::from(cr[0x07] & 0x08) << 5)
            + (u64::from(cr[0x09] & 0x20) << 4);
        let vblank_end = u64::from(cr[0x16]);
        let vsync_start = u64::from(cr[0x10])
            + (u64::from(cr[0x07] & 0x04) << 6)
            + (u64::from(cr[0x07] & 0x80) << 2);
        let vsync_end = u64::from(cr[0x11] & 0x0f);

        // The end registers hold only the low bits of the end position.
        let hblank_width = hblank_end.wrapping_sub(hblank_start) & 0x3f;
        let vblank_width = vblank_end.wrapping_sub(vblank_start) & 0xff;
        let vsync_width = vsync_end.wrapping_sub(vsync_start) & 0x0f;

        let clock_doubled = u64::from((sr1 >> 3) & 1);
        let dot_clock = DOT_CLOCKS[usize::from((msr >> 2) & 3)];
        let char_dots = if sr1 & 0x01 != 0 { 8 } else { 9 };
        let chars_per_sec = dot_clock / char_dots;
        let htotal = htotal << clock_doubled;

        let cclk_ns = 1_000_000_000 / chars_per_sec;
        let h_total_ns = htotal * cclk_ns;
        let vs_start = vsync_start.wrapping_sub(vblank_start);

        Self {
            frame_ns: vtotal * h_total_ns,
            h_total_ns,
            hb_end_ns: hblank_width * cclk_ns,
            vb_end_ns: vblank_width * h_total_ns,
            vs_start_ns: vs_start.wrapping_mul(h_total_ns),
            vs_end_ns: vs_start
                .wrapping_add(vsync_width + 1)
                .wrapping_mul(h_total_ns),
        }
    }

    /// Display enable and vertical retrace bits at `now_ns`.
    pub fn sample(&self, now_ns: u64) -> u8 {
        if self.frame_ns == 0 || self.h_total_ns == 0 {
            return 0;
        }
        let pos = now_ns % self.frame_ns;
        let mut bits = 0;
        if pos < self.vb_end_ns {
            bits |= ST01_DISP_ENABLE;
            if (self.vs_start_ns..=self.vs_end_ns).contains(&pos) {
                bits |= ST01_V_RETRACE;
            }
        } else if pos % self.h_total_ns < self.hb_end_ns {
            bits |= ST01_DISP_ENABLE;
        }
        bits
    }
}

impl VgaDevice {
    pub(crate) fn update_retrace_timing(&mut self) {
        self.retrace = RetraceState::compute(&self.regs.cr, self.regs.sr[1], self.regs.msr);
    }

    /// Value returned by an input status 1 read.
    pub(crate) fn sample_input_status1(&mut self) -> u8 {
        let regs = &mut self.regs;
        if self.config.real_retrace && self.retrace.frame_ns != 0 {
            let bits = self.retrace.sample(self.clock_ns);
            regs.st01 = (regs.st01 & !(ST01_V_RETRACE | ST01_DISP_ENABLE)) | bits;
        } else {
            // Flip both bits on every read so polling loops always make progress. Real retrace
            // uses this too until the CRTC holds usable timings.
            regs.st01 ^= ST01_V_RETRACE | ST01_DISP_ENABLE;
        }
        regs.st01
    }
}
