//! Text mode glyph rasterizers for 8, 9 and 16 dot wide character cells.

use super::lines::{put, HostPixel, Px15, Px16, Px32, Px8};

/// One character cell to draw.
pub(crate) struct Glyph<'a> {
    /// Font bitmap rows, bit 7 leftmost.
    pub rows: &'a [u8],
    pub fg: u32,
    pub bg: u32,
    /// Draw every row twice.
    pub dscan: bool,
    /// 9 dot cells: repeat column 8 into column 9 instead of filling it with the background.
    pub dup9: bool,
    pub expand4to8: &'a [u8; 16],
}

/// Draws `glyph` with its top-left pixel at the start of `dst`; host rows are `linesize` bytes
/// apart.
pub(crate) type GlyphFn = fn(&mut [u8], usize, &Glyph<'_>);

pub(crate) const GLYPH8: [GlyphFn; 4] = [glyph8::<Px8>, glyph8::<Px15>, glyph8::<Px16>, glyph8::<Px32>];
pub(crate) const GLYPH16: [GlyphFn; 4] =
    [glyph16::<Px8>, glyph16::<Px15>, glyph16::<Px16>, glyph16::<Px32>];
pub(crate) const GLYPH9: [GlyphFn; 4] = [glyph9::<Px8>, glyph9::<Px15>, glyph9::<Px16>, glyph9::<Px32>];

/// Host scanlines covered by font row `row`.
fn scanlines(row: usize, dscan: bool) -> std::ops::Range<usize> {
    if dscan {
        row * 2..row * 2 + 2
    } else {
        row..row + 1
    }
}

fn line_mut(dst: &mut [u8], linesize: usize, line: usize) -> Option<&mut [u8]> {
    let start = line * linesize;
    let end = (start + linesize).min(dst.len());
    dst.get_mut(start..end)
}

fn glyph8<P: HostPixel>(dst: &mut [u8], linesize: usize, glyph: &Glyph<'_>) {
    for (r, &bits) in glyph.rows.iter().enumerate() {
        for line in scanlines(r, glyph.dscan) {
            let Some(out) = line_mut(dst, linesize, line) else {
                return;
            };
            for x in 0..8 {
                let set = bits & (0x80 >> x) != 0;
                put::<P>(out, x, if set { glyph.fg } else { glyph.bg });
            }
        }
    }
}

/// Double-width cells: every font bit covers two pixels.
fn glyph16<P: HostPixel>(dst: &mut [u8], linesize: usize, glyph: &Glyph<'_>) {
    for (r, &bits) in glyph.rows.iter().enumerate() {
        let wide = (u16::from(glyph.expand4to8[usize::from(bits >> 4)]) << 8)
            | u16::from(glyph.expand4to8[usize::from(bits & 0x0f)]);
        for line in scanlines(r, glyph.dscan) {
            let Some(out) = line_mut(dst, linesize, line) else {
                return;
            };
            for x in 0..16 {
                let set = wide & (0x8000 >> x) != 0;
                put::<P>(out, x, if set { glyph.fg } else { glyph.bg });
            }
        }
    }
}

/// 9 dot cells are never double scanned.
fn glyph9<P: HostPixel>(dst: &mut [u8], linesize: usize, glyph: &Glyph<'_>) {
    for (r, &bits) in glyph.rows.iter().enumerate() {
        let Some(out) = line_mut(dst, linesize, r) else {
            return;
        };
        for x in 0..8 {
            let set = bits & (0x80 >> x) != 0;
            put::<P>(out, x, if set { glyph.fg } else { glyph.bg });
        }
        let ninth = if glyph.dup9 && bits & 0x01 != 0 {
            glyph.fg
        } else {
            glyph.bg
        };
        put::<P>(out, 8, ninth);
    }
}
