//! Graphics and blank composition.

use tracing::debug;

use super::lines::{line_fn, LineKind, LineSource};
use super::{request_resize, Frame, FrameStatus};
use crate::display::{DisplayConnector, ResizeRequest, ResizeStatus};
use crate::error::Result;
use crate::memory::{mask16, VRAM_PAGE_SIZE};
use crate::palette::HostDepth;
use crate::regs::{
    RegisterBank, VBE_DISPI_INDEX_VIRT_HEIGHT, VBE_DISPI_INDEX_XRES, VBE_DISPI_INDEX_YRES,
};

const PAGE_MASK: u32 = !(VRAM_PAGE_SIZE - 1);

/// Visible guest resolution before any clock doubling.
fn resolution(regs: &RegisterBank) -> (u32, u32) {
    if regs.vbe_enabled() {
        let height = regs
            .vbe(VBE_DISPI_INDEX_YRES)
            .min(regs.vbe(VBE_DISPI_INDEX_VIRT_HEIGHT));
        (u32::from(regs.vbe(VBE_DISPI_INDEX_XRES)), u32::from(height))
    } else {
        (
            (u32::from(regs.cr[0x01]) + 1) * 8,
            regs.vertical_display_end() + 1,
        )
    }
}

impl Frame<'_> {
    pub(super) fn draw_graphic(
        &mut self,
        conn: &mut dyn DisplayConnector,
        mut full: bool,
    ) -> Result<FrameStatus> {
        let regs = self.regs;
        let depth = HostDepth::from_bits(conn.depth());
        let st = &mut *self.state;

        full |= st.update_basic_params(regs);

        let (width, height) = resolution(regs);
        let mut disp_width = width;

        let shift_control = regs.shift_control();
        let double_scan = regs.double_scan();
        if shift_control != st.shift_control || double_scan != st.double_scan {
            full = true;
            st.shift_control = shift_control;
            st.double_scan = double_scan;
        }

        let half_clock = regs.sr[1] & 0x08 != 0;
        let (kind, bits) = match shift_control {
            0 => {
                full |= st.palette.update_palette16(regs, depth);
                if half_clock {
                    disp_width <<= 1;
                    (LineKind::Line4D2, 4)
                } else {
                    (LineKind::Line4, 4)
                }
            }
            1 => {
                full |= st.palette.update_palette16(regs, depth);
                if half_clock {
                    disp_width <<= 1;
                    (LineKind::Line2D2, 4)
                } else {
                    (LineKind::Line2, 4)
                }
            }
            _ => match regs.vbe_bpp() {
                8 => {
                    full |= st.palette.update_palette256(regs, depth);
                    (LineKind::Line8, 8)
                }
                15 => (LineKind::Line15, 16),
                16 => (LineKind::Line16, 16),
                24 => (LineKind::Line24, 24),
                32 => (LineKind::Line32, 32),
                _ => {
                    full |= st.palette.update_palette256(regs, depth);
                    (LineKind::Line8D2, 4)
                }
            },
        };

        let bpp = regs.vbe_bpp();
        let vram_offset = st.start_addr.wrapping_mul(4);
        // The connector may scan out of VRAM, so a new pitch or panning offset is a resize too.
        let scanout = (st.line_offset, vram_offset);
        if disp_width != st.last_width
            || height != st.last_height
            || bpp != st.last_bpp
            || scanout != st.last_scanout
        {
            if self.opts.fail_on_resize {
                return Ok(FrameStatus::RetryLater);
            }
            if disp_width == 0 || height == 0 || st.line_offset == 0 {
                debug!(disp_width, height, line_offset = st.line_offset, "graphics mode not programmed yet");
                return Ok(FrameStatus::RetryLater);
            }
            let end = u64::from(vram_offset) + u64::from(st.line_offset) * u64::from(height);
            if end >= self.vram.len() as u64 {
                // Leave everything as is until the guest programs a mode that fits.
                debug!(end, "graphics mode does not fit in vram");
                return Ok(FrameStatus::RetryLater);
            }
            let status = request_resize(
                conn,
                ResizeRequest {
                    bpp,
                    vram_offset: Some(vram_offset),
                    pitch: st.line_offset,
                    width: disp_width,
                    height,
                },
            )?;
            st.last_bpp = bpp;
            st.last_scanout = scanout;
            st.last_scr_width = disp_width;
            st.last_scr_height = height;
            st.last_width = disp_width;
            st.last_height = height;
            if status == ResizeStatus::InProgress {
                return Ok(FrameStatus::ResizeInProgress);
            }
            full = true;
        }

        let Some(surface) = conn.surface() else {
            return Ok(FrameStatus::Composed);
        };
        if surface.width != disp_width || surface.height != height {
            // The connector ignored the last resize; drawing would overrun its buffer.
            debug!(
                disp_width,
                height,
                surface_width = surface.width,
                surface_height = surface.height,
                "framebuffer size mismatch"
            );
            return Ok(FrameStatus::Composed);
        }
        let linesize = surface.pitch as usize;
        let data = surface.data;

        let line = line_fn(kind, depth.index());
        let source = LineSource {
            vram: self.vram,
            palette: st.palette.entries(),
            tables: self.tables,
            plane_mask: mask16(regs.ar[0x12] & 0x0f),
        };

        let line_offset = st.line_offset;
        let line_compare = st.line_compare;
        let mut addr1 = st.start_addr.wrapping_mul(4);
        // Bytes of VRAM behind one visible scanline.
        let bwidth = (width * bits + 7) / 8;
        let addr_mask = if regs.vbe_enabled() {
            u32::MAX
        } else {
            0x3ffff
        };
        let max_scan = regs.cr[0x09] & 0x1f;

        let mut y_start: Option<u32> = None;
        let mut page_min = u32::MAX;
        let mut page_max: Option<u32> = None;
        let mut y1 = 0u32;
        let mut y2 = max_scan;
        let mut multi_run = double_scan;

        for y in 0..height {
            let mut addr = addr1;
            // CGA/Hercules interleave: row scan counter bits replace address bits 13/14.
            if regs.cr[0x17] & 0x01 == 0 {
                addr = (addr & !(1 << 15)) | ((y1 & 1) << 15);
            }
            if regs.cr[0x17] & 0x02 == 0 {
                addr = (addr & !(1 << 16)) | ((y1 & 2) << 15);
            }
            addr &= addr_mask;

            let page0 = addr & PAGE_MASK;
            let page1 = addr.wrapping_add(bwidth.saturating_sub(1)) & PAGE_MASK;
            let mut update = full || self.dirty.is_dirty(page0) || self.dirty.is_dirty(page1);
            if page1.wrapping_sub(page0) > VRAM_PAGE_SIZE {
                update |= self.dirty.is_dirty(page0 + VRAM_PAGE_SIZE);
            }

            if update {
                y_start.get_or_insert(y);
                page_min = page_min.min(page0);
                page_max = Some(page_max.map_or(page1, |m| m.max(page1)));
                let off = y as usize * linesize;
                let end = (off + linesize).min(data.len());
                if let Some(dst) = data.get_mut(off..end) {
                    line(&source, dst, addr as usize, width as usize);
                }
            } else if let Some(start) = y_start.take() {
                self.rects.push(0, start, disp_width, y - start);
            }

            if multi_run == 0 {
                y1 += 1;
                multi_run = double_scan;
                if y2 == 0 {
                    y2 = max_scan;
                    addr1 = addr1.wrapping_add(line_offset);
                } else {
                    y2 -= 1;
                }
            } else {
                multi_run -= 1;
            }
            // Line compare counts displayed lines.
            if y == line_compare {
                addr1 = 0;
            }
        }
        if let Some(start) = y_start {
            self.rects.push(0, start, disp_width, height - start);
        }

        if self.opts.reset_dirty {
            if let Some(max) = page_max {
                self.dirty
                    .reset_range(page_min, max.saturating_add(VRAM_PAGE_SIZE));
            }
        }
        Ok(FrameStatus::Composed)
    }

    /// Screen off: tell the connector once, then keep the surface black.
    pub(super) fn draw_blank(
        &mut self,
        conn: &mut dyn DisplayConnector,
        full: bool,
    ) -> Result<FrameStatus> {
        let st = &mut *self.state;
        if st.last_width != 0 {
            if self.opts.fail_on_resize {
                return Ok(FrameStatus::RetryLater);
            }
            st.last_width = 0;
            st.last_height = 0;
            // No geometry and no depth: distinct from a text mode.
            request_resize(
                conn,
                ResizeRequest {
                    bpp: 0,
                    vram_offset: None,
                    pitch: 0,
                    width: 0,
                    height: 0,
                },
            )?;
        }

        if self.opts.reset_dirty && st.last_scr_height > 0 {
            let start = st.start_addr.wrapping_mul(4);
            let page_min = start & PAGE_MASK;
            let page_max = start
                .wrapping_add(st.line_offset.wrapping_mul(st.last_scr_height))
                .wrapping_sub(1)
                .wrapping_add(VRAM_PAGE_SIZE)
                & PAGE_MASK;
            self.dirty
                .reset_range(page_min, page_max.saturating_add(VRAM_PAGE_SIZE));
        }

        if !full || st.last_scr_width == 0 || st.last_scr_height == 0 {
            return Ok(FrameStatus::Composed);
        }
        let bytes_pp = HostDepth::from_bits(conn.depth()).bytes_per_pixel();
        if let Some(surface) = conn.surface() {
            let pitch = surface.pitch as usize;
            let row_bytes = (st.last_scr_width as usize * bytes_pp).min(pitch);
            for row in surface.data.chunks_mut(pitch.max(1)).take(st.last_scr_height as usize) {
                let n = row_bytes.min(row.len());
                row[..n].fill(0);
            }
        }
        self.rects
            .push(0, 0, st.last_scr_width, st.last_scr_height);
        Ok(FrameStatus::Composed)
    }
}
