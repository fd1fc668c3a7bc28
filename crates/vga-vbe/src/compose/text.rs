//! Text mode: character/attribute words in planes 0 and 1, fonts in plane 2.

use tracing::trace;

use super::glyph::{Glyph, GlyphFn, GLYPH16, GLYPH8, GLYPH9};
use super::{request_resize, Frame, FrameStatus, CH_ATTR_SIZE};
use crate::display::{DisplayConnector, ResizeRequest, ResizeStatus};
use crate::error::Result;
use crate::memory::VRAM_PAGE_SIZE;
use crate::palette::HostDepth;

const BLINK_PERIOD_NS: u64 = 400_000_000;
const BLINK_ON_NS: u64 = 200_000_000;

/// Solid rows for the underline and the cursor.
const SOLID: [u8; 32] = [0xff; 32];

/// Whether blinking characters and the cursor are shown at `now_ns`.
pub(crate) fn blink_visible(now_ns: u64) -> bool {
    now_ns % BLINK_PERIOD_NS < BLINK_ON_NS
}

/// VRAM offset of font bank `bank`: 8K dwords per bank, glyph bytes in plane 2.
fn font_base(bank: u8) -> u32 {
    u32::from(bank) * 8192 * 4 + 2
}

fn vram_u16(vram: &[u8], off: u32) -> u32 {
    let off = off as usize;
    let lo = vram.get(off).copied().unwrap_or(0);
    let hi = vram.get(off + 1).copied().unwrap_or(0);
    u32::from(u16::from_le_bytes([lo, hi]))
}

fn stamp(cell: &mut [u8], offset: usize, linesize: usize, draw: GlyphFn, glyph: &Glyph<'_>) {
    if let Some(dst) = cell.get_mut(offset..) {
        draw(dst, linesize, glyph);
    }
}

impl Frame<'_> {
    pub(super) fn draw_text(
        &mut self,
        conn: &mut dyn DisplayConnector,
        mut full: bool,
    ) -> Result<FrameStatus> {
        let regs = self.regs;
        let depth = HostDepth::from_bits(conn.depth());
        let st = &mut *self.state;

        full |= st.palette.update_palette16(regs, depth);

        let sr3 = regs.sr[3];
        let fonts = [
            font_base(((sr3 >> 4) & 1) | ((sr3 << 1) & 6)),
            font_base(((sr3 >> 5) & 1) | ((sr3 >> 1) & 6)),
        ];
        if fonts != st.font_offsets {
            st.font_offsets = fonts;
            full = true;
        }
        if *self.plane_updated & 0x04 != 0 {
            // Plane 2 written: the font may have changed.
            *self.plane_updated = 0;
            full = true;
        }

        let uline = regs.cr[0x14] & 0x1f;
        if uline != st.last_uline {
            st.last_uline = uline;
            full = true;
        }
        let blink_enabled = regs.ar[0x10] & 0x08 != 0;
        if blink_enabled != st.last_blink {
            st.last_blink = blink_enabled;
            full = true;
        }
        full |= st.update_basic_params(regs);

        // Character words sit in planes 0/1, so cells are a dword (byte mode) or two apart.
        let s_incr: u32 = if regs.cr[0x17] & 0x40 != 0 { 4 } else { 8 };
        let addr_mask: u32 = if regs.cr[0x17] & 0x60 == 0 {
            0xffff
        } else {
            0x3ffff
        };
        let line_offset = st.line_offset;
        let mut s1 = st.start_addr.wrapping_mul(s_incr) & addr_mask;

        let dscan = usize::from(regs.cr[0x09] >> 7);
        let cheight = u32::from(regs.cr[0x09] & 0x1f) + 1;
        let cw: u32 = if regs.sr[1] & 0x08 != 0 {
            16
        } else if regs.sr[1] & 0x01 == 0 {
            9
        } else {
            8
        };
        let width = u32::from(regs.cr[0x01]) + 1;
        let height = if regs.cr[0x06] == 100 {
            // CGA 160x100x16.
            100
        } else {
            (regs.vertical_display_end() + 1) / cheight
        };
        if (width * height) as usize > CH_ATTR_SIZE {
            trace!(width, height, "transient text geometry too large");
            return Ok(FrameStatus::Composed);
        }

        if width != st.last_width
            || height != st.last_height
            || cw != st.last_cw
            || cheight != st.last_ch
        {
            if self.opts.fail_on_resize {
                return Ok(FrameStatus::RetryLater);
            }
            st.last_scr_width = width * cw;
            st.last_scr_height = height * cheight;
            let status = request_resize(
                conn,
                ResizeRequest {
                    bpp: 0,
                    vram_offset: None,
                    pitch: 0,
                    width: st.last_scr_width,
                    height: st.last_scr_height,
                },
            )?;
            st.last_width = width;
            st.last_height = height;
            st.last_ch = cheight;
            st.last_cw = cw;
            full = true;
            if status == ResizeStatus::InProgress {
                return Ok(FrameStatus::ResizeInProgress);
            }
        }

        let cursor_offset = ((u32::from(regs.cr[0x0e]) << 8) | u32::from(regs.cr[0x0f]))
            .wrapping_sub(st.start_addr);
        if cursor_offset != st.cursor_offset
            || regs.cr[0x0a] != st.cursor_start
            || regs.cr[0x0b] != st.cursor_end
        {
            // Redraw the cells under the old and the new cursor.
            for off in [st.cursor_offset, cursor_offset] {
                if let Some(slot) = st.last_ch_attr.get_mut(off as usize) {
                    *slot = u32::MAX;
                }
            }
            st.cursor_offset = cursor_offset;
            st.cursor_start = regs.cr[0x0a];
            st.cursor_end = regs.cr[0x0b];
        }
        let cursor_ptr = st
            .start_addr
            .wrapping_add(cursor_offset)
            .wrapping_mul(s_incr)
            & addr_mask;

        let di = depth.index();
        let glyph_wide: GlyphFn = if cw == 16 { GLYPH16[di] } else { GLYPH8[di] };
        let draw: GlyphFn = if cw == 9 { GLYPH9[di] } else { glyph_wide };
        let x_incr = cw as usize * depth.bytes_per_pixel();

        let blink_on = blink_visible(self.now_ns);
        let blink_flip = st.last_chr_blink != blink_on;
        if blink_flip {
            st.last_chr_blink = blink_on;
        }

        let Some(surface) = conn.surface() else {
            return Ok(FrameStatus::Composed);
        };
        let linesize = surface.pitch as usize;
        let data = surface.data;

        let vram = self.vram;
        let expand4to8 = &self.tables.expand4to8;
        let palette = st.palette.entries();
        let reset_dirty = self.opts.reset_dirty;
        let mut rows = [0u8; 32];

        let mut dest = 0usize;
        let mut attr_index = 0usize;
        let mut cy_start: Option<u32> = None;
        let mut cx_min_upd = width;
        let mut cx_max_upd = 0;
        let mut src_min = u32::MAX;
        let mut src_max: Option<u32> = None;

        let mut cy = 0u32;
        while cy + (dscan as u32) < height {
            let mut d1 = dest;
            let mut src = s1;
            let mut cx_min = width;
            let mut cx_max: Option<u32> = None;

            for cx in 0..width {
                let ch_attr = vram_u16(vram, src);
                let is_cursor = src == cursor_ptr;
                let blink_redraw = blink_enabled && blink_flip && ch_attr & 0x8000 != 0;
                let cached = st.last_ch_attr.get(attr_index).copied();

                if full || cached != Some(ch_attr) || blink_redraw || (is_cursor && blink_flip) {
                    cx_min = cx_min.min(cx);
                    cx_max = Some(cx);
                    if reset_dirty {
                        if let Some(slot) = st.last_ch_attr.get_mut(attr_index) {
                            *slot = ch_attr;
                        }
                    }

                    let ch = ch_attr & 0xff;
                    let attr = ch_attr >> 8;
                    let fg = palette[(attr & 0x0f) as usize];
                    let mut bg = palette[(attr >> 4) as usize];
                    let glyph_rows = &mut rows[..cheight as usize];
                    let font = fonts[((attr >> 3) & 1) as usize] + 128 * ch;
                    for (r, row) in glyph_rows.iter_mut().enumerate() {
                        *row = vram.get(font as usize + 4 * r).copied().unwrap_or(0);
                    }
                    if blink_enabled && attr & 0x80 != 0 {
                        bg = palette[((attr >> 4) & 7) as usize];
                        if !blink_on {
                            glyph_rows.fill(0);
                        }
                    }

                    if let Some(cell) = data.get_mut(d1..) {
                        let glyph = Glyph {
                            rows: glyph_rows,
                            fg,
                            bg,
                            dscan: dscan != 0,
                            dup9: cw == 9
                                && (0xb0..=0xdf).contains(&ch)
                                && regs.ar[0x10] & 0x04 != 0,
                            expand4to8,
                        };
                        draw(cell, linesize, &glyph);

                        let solid = |h: u32| Glyph {
                            rows: &SOLID[..h as usize],
                            fg,
                            bg,
                            dscan: dscan != 0,
                            dup9: true,
                            expand4to8,
                        };

                        // Underline; usually parked past the cell height.
                        if attr & 0x03 == 1 && u32::from(uline) < cheight {
                            let off = linesize * (usize::from(uline) << dscan);
                            stamp(cell, off, linesize, draw, &solid(1));
                        }

                        if is_cursor && regs.cr[0x0a] & 0x20 == 0 && blink_on {
                            let line_start = u32::from(regs.cr[0x0a] & 0x1f);
                            let line_last = u32::from(regs.cr[0x0b] & 0x1f).min(cheight - 1);
                            if line_last >= line_start && line_start < cheight {
                                let off = linesize * ((line_start as usize) << dscan);
                                let h = line_last - line_start + 1;
                                stamp(cell, off, linesize, draw, &solid(h));
                            }
                        }
                    }
                }

                src_min = src_min.min(src);
                src_max = Some(src_max.map_or(src, |m| m.max(src)));

                d1 += x_incr;
                // Word/byte mode matters even in text mode.
                src += s_incr;
                if src > addr_mask {
                    src = 0;
                }
                attr_index += 1;
            }

            if let Some(max) = cx_max {
                cy_start.get_or_insert(cy);
                cx_min_upd = cx_min_upd.min(cx_min);
                cx_max_upd = cx_max_upd.max(max);
            } else if let Some(start) = cy_start.take() {
                self.rects.push(
                    cx_min_upd * cw,
                    start * cheight,
                    (cx_max_upd - cx_min_upd + 1) * cw,
                    (cy - start) * cheight,
                );
                cx_min_upd = width;
                cx_max_upd = 0;
            }

            dest += linesize * ((cheight as usize) << dscan);
            s1 = s1.wrapping_add(line_offset);
            // Line compare splits the screen in text modes too, at character row granularity.
            if cy == st.line_compare / cheight {
                s1 = 0;
            }
            if s1 > addr_mask {
                s1 = s1.wrapping_sub(addr_mask + 1);
            }
            cy += 1 << dscan;
        }
        if let Some(start) = cy_start {
            self.rects.push(
                cx_min_upd * cw,
                start * cheight,
                (cx_max_upd - cx_min_upd + 1) * cw,
                (cy - start) * cheight,
            );
        }

        if reset_dirty {
            if let Some(max) = src_max {
                self.dirty
                    .reset_range(src_min & !(VRAM_PAGE_SIZE - 1), max + VRAM_PAGE_SIZE);
            }
        }
        Ok(FrameStatus::Composed)
    }
}
