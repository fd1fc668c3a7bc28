//! Scanline decoders. Each guest pixel layout has one routine, instantiated once per host depth
//! and selected through [`LINE_TABLE`].

use crate::expand::ExpandTables;
use crate::palette::{rgb_to_pixel15, rgb_to_pixel16, rgb_to_pixel32, rgb_to_pixel8};

/// Host pixel format: storage width and direct colour packing.
pub(crate) trait HostPixel {
    const BYTES: usize;
    fn rgb(r: u8, g: u8, b: u8) -> u32;
}

pub(crate) enum Px8 {}
pub(crate) enum Px15 {}
pub(crate) enum Px16 {}
pub(crate) enum Px32 {}

impl HostPixel for Px8 {
    const BYTES: usize = 1;
    fn rgb(r: u8, g: u8, b: u8) -> u32 {
        rgb_to_pixel8(r, g, b)
    }
}

impl HostPixel for Px15 {
    const BYTES: usize = 2;
    fn rgb(r: u8, g: u8, b: u8) -> u32 {
        rgb_to_pixel15(r, g, b)
    }
}

impl HostPixel for Px16 {
    const BYTES: usize = 2;
    fn rgb(r: u8, g: u8, b: u8) -> u32 {
        rgb_to_pixel16(r, g, b)
    }
}

impl HostPixel for Px32 {
    const BYTES: usize = 4;
    fn rgb(r: u8, g: u8, b: u8) -> u32 {
        rgb_to_pixel32(r, g, b)
    }
}

/// Stores pixel `index` of `dst`. Pixels past the end of the slice are dropped.
#[inline]
pub(crate) fn put<P: HostPixel>(dst: &mut [u8], index: usize, col: u32) {
    let off = index * P::BYTES;
    if let Some(px) = dst.get_mut(off..off + P::BYTES) {
        px.copy_from_slice(&col.to_le_bytes()[..P::BYTES]);
    }
}

/// Read side of a scanline decode.
pub(crate) struct LineSource<'a> {
    pub vram: &'a [u8],
    pub palette: &'a [u32; 256],
    pub tables: &'a ExpandTables,
    /// Colour plane enable (AR12) expanded to one byte mask per plane.
    pub plane_mask: u32,
}

impl LineSource<'_> {
    /// VRAM byte at `off`; reads past the end return zero.
    #[inline]
    fn byte(&self, off: usize) -> u8 {
        self.vram.get(off).copied().unwrap_or(0)
    }

    #[inline]
    fn dword(&self, off: usize) -> u32 {
        u32::from_le_bytes([
            self.byte(off),
            self.byte(off + 1),
            self.byte(off + 2),
            self.byte(off + 3),
        ])
    }

    #[inline]
    fn pal(&self, index: u32) -> u32 {
        self.palette[(index & 0xff) as usize]
    }
}

/// Decodes one scanline of `width` guest pixels starting at VRAM byte `src` into `dst`.
pub(crate) type LineFn = fn(&LineSource<'_>, &mut [u8], usize, usize);

/// Rows of [`LINE_TABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind {
    /// CGA 4 colour, interleaved bit pairs in planes 0/2 and 1/3.
    Line2,
    Line2D2,
    /// EGA/VGA 16 colour planar.
    Line4,
    Line4D2,
    /// Mode 13h: 256 colour chain-4, every pixel doubled.
    Line8D2,
    Line8,
    Line15,
    Line16,
    Line24,
    Line32,
}

pub(crate) const LINE_TABLE: [[LineFn; 4]; 10] = [
    [line2::<Px8>, line2::<Px15>, line2::<Px16>, line2::<Px32>],
    [line2d2::<Px8>, line2d2::<Px15>, line2d2::<Px16>, line2d2::<Px32>],
    [line4::<Px8>, line4::<Px15>, line4::<Px16>, line4::<Px32>],
    [line4d2::<Px8>, line4d2::<Px15>, line4d2::<Px16>, line4d2::<Px32>],
    [line8d2::<Px8>, line8d2::<Px15>, line8d2::<Px16>, line8d2::<Px32>],
    [line8::<Px8>, line8::<Px15>, line8::<Px16>, line8::<Px32>],
    [line15::<Px8>, line15::<Px15>, line15::<Px16>, line15::<Px32>],
    [line16::<Px8>, line16::<Px15>, line16::<Px16>, line16::<Px32>],
    [line24::<Px8>, line24::<Px15>, line24::<Px16>, line24::<Px32>],
    [line32::<Px8>, line32::<Px15>, line32::<Px16>, line32::<Px32>],
];

pub(crate) fn line_fn(kind: LineKind, depth_index: usize) -> LineFn {
    LINE_TABLE[kind as usize][depth_index]
}

/// The low `count` nibbles of `v` as palette indices, most significant first, each shown `dup`
/// times.
#[inline]
fn put_nibbles<P: HostPixel>(
    src: &LineSource<'_>,
    dst: &mut [u8],
    d: usize,
    v: u32,
    count: usize,
    dup: usize,
) {
    for i in 0..count {
        let col = src.pal((v >> (4 * (count - 1 - i))) & 0x0f);
        for k in 0..dup {
            put::<P>(dst, d + i * dup + k, col);
        }
    }
}

fn cga_pairs(src: &LineSource<'_>, data: u32) -> [u32; 2] {
    let [p0, p1, p2, p3] = data.to_le_bytes();
    let expand2 = &src.tables.expand2;
    [
        expand2[usize::from(p0)] | (expand2[usize::from(p2)] << 2),
        expand2[usize::from(p1)] | (expand2[usize::from(p3)] << 2),
    ]
}

fn ega_nibbles(src: &LineSource<'_>, data: u32) -> u32 {
    let [p0, p1, p2, p3] = data.to_le_bytes();
    let expand4 = &src.tables.expand4;
    expand4[usize::from(p0)]
        | (expand4[usize::from(p1)] << 1)
        | (expand4[usize::from(p2)] << 2)
        | (expand4[usize::from(p3)] << 3)
}

fn line2<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], mut s: usize, width: usize) {
    let mut d = 0;
    for _ in 0..width >> 3 {
        let data = src.dword(s) & src.plane_mask;
        for v in cga_pairs(src, data) {
            put_nibbles::<P>(src, dst, d, v, 4, 1);
            d += 4;
        }
        s += 4;
    }
}

fn line2d2<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], mut s: usize, width: usize) {
    let mut d = 0;
    for _ in 0..width >> 3 {
        let data = src.dword(s) & src.plane_mask;
        for v in cga_pairs(src, data) {
            put_nibbles::<P>(src, dst, d, v, 4, 2);
            d += 8;
        }
        s += 4;
    }
}

fn line4<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], mut s: usize, width: usize) {
    let mut d = 0;
    for _ in 0..width >> 3 {
        let v = ega_nibbles(src, src.dword(s) & src.plane_mask);
        put_nibbles::<P>(src, dst, d, v, 8, 1);
        d += 8;
        s += 4;
    }
}

fn line4d2<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], mut s: usize, width: usize) {
    let mut d = 0;
    for _ in 0..width >> 3 {
        let v = ega_nibbles(src, src.dword(s) & src.plane_mask);
        put_nibbles::<P>(src, dst, d, v, 8, 2);
        d += 16;
        s += 4;
    }
}

/// Chain-4 256 colour: each group of four host pixels comes from one dword, and every byte is
/// shown twice.
fn line8d2<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], mut s: usize, width: usize) {
    let mut d = 0;
    for _ in 0..width >> 3 {
        for i in 0..4 {
            let col = src.pal(u32::from(src.byte(s + i)));
            put::<P>(dst, d, col);
            put::<P>(dst, d + 1, col);
            d += 2;
        }
        s += 4;
    }
}

fn line8<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], s: usize, width: usize) {
    for x in 0..width {
        put::<P>(dst, x, src.pal(u32::from(src.byte(s + x))));
    }
}

fn line15<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], s: usize, width: usize) {
    for x in 0..width {
        let off = s + 2 * x;
        let v = u32::from(u16::from_le_bytes([src.byte(off), src.byte(off + 1)]));
        let r = ((v >> 7) & 0xf8) as u8;
        let g = ((v >> 2) & 0xf8) as u8;
        let b = ((v << 3) & 0xf8) as u8;
        put::<P>(dst, x, P::rgb(r, g, b));
    }
}

fn line16<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], s: usize, width: usize) {
    for x in 0..width {
        let off = s + 2 * x;
        let v = u32::from(u16::from_le_bytes([src.byte(off), src.byte(off + 1)]));
        let r = ((v >> 8) & 0xf8) as u8;
        let g = ((v >> 3) & 0xfc) as u8;
        let b = ((v << 3) & 0xf8) as u8;
        put::<P>(dst, x, P::rgb(r, g, b));
    }
}

fn line24<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], s: usize, width: usize) {
    for x in 0..width {
        let off = s + 3 * x;
        let (b, g, r) = (src.byte(off), src.byte(off + 1), src.byte(off + 2));
        put::<P>(dst, x, P::rgb(r, g, b));
    }
}

fn line32<P: HostPixel>(src: &LineSource<'_>, dst: &mut [u8], s: usize, width: usize) {
    for x in 0..width {
        let off = s + 4 * x;
        let (b, g, r) = (src.byte(off), src.byte(off + 1), src.byte(off + 2));
        put::<P>(dst, x, P::rgb(r, g, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_palette() -> [u32; 256] {
        let mut pal = [0u32; 256];
        for (i, p) in pal.iter_mut().enumerate() {
            *p = i as u32;
        }
        pal
    }

    fn decode(kind: LineKind, vram: &[u8], width: usize, out_px: usize) -> Vec<u32> {
        let tables = ExpandTables::new();
        let palette = identity_palette();
        let src = LineSource {
            vram,
            palette: &palette,
            tables: &tables,
            plane_mask: 0xffff_ffff,
        };
        let mut dst = vec![0u8; out_px * 4];
        line_fn(kind, 3)(&src, &mut dst, 0, width);
        dst.chunks_exact(4)
            .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]]))
            .collect()
    }

    #[test]
    fn planar_16_colour_combines_four_planes() {
        // Pixel 0: planes 0 and 3 set -> 9. Pixel 7: plane 1 set -> 2.
        let vram = [0x80, 0x01, 0x00, 0x80];
        assert_eq!(decode(LineKind::Line4, &vram, 8, 8), vec![9, 0, 0, 0, 0, 0, 0, 2]);
    }

    #[test]
    fn planar_16_colour_doubled() {
        let vram = [0x80, 0x00, 0x00, 0x00];
        let px = decode(LineKind::Line4D2, &vram, 8, 16);
        assert_eq!(&px[..4], &[1, 1, 0, 0]);
        assert_eq!(px.len(), 16);
    }

    #[test]
    fn plane_mask_hides_disabled_planes() {
        let tables = ExpandTables::new();
        let palette = identity_palette();
        let src = LineSource {
            vram: &[0xff, 0xff, 0xff, 0xff],
            palette: &palette,
            tables: &tables,
            plane_mask: 0x0000_00ff,
        };
        let mut dst = vec![0u8; 8];
        line_fn(LineKind::Line4, 0)(&src, &mut dst, 0, 8);
        assert_eq!(dst, vec![1; 8]);
    }

    #[test]
    fn cga_bit_pairs() {
        // Plane 0 holds pixels 0-3, plane 1 pixels 4-7.
        let vram = [0b11_10_01_00, 0b00_01_10_11, 0, 0];
        assert_eq!(
            decode(LineKind::Line2, &vram, 8, 8),
            vec![3, 2, 1, 0, 0, 1, 2, 3]
        );
    }

    #[test]
    fn chain4_doubles_each_byte() {
        let vram = [1, 2, 3, 4];
        assert_eq!(
            decode(LineKind::Line8D2, &vram, 8, 8),
            vec![1, 1, 2, 2, 3, 3, 4, 4]
        );
    }

    #[test]
    fn direct_colour_formats() {
        // 0x7c00 is pure red in 5:5:5; 0xf800 in 5:6:5.
        assert_eq!(decode(LineKind::Line15, &[0x00, 0x7c], 1, 1), vec![0x00f8_0000]);
        assert_eq!(decode(LineKind::Line16, &[0x00, 0xf8], 1, 1), vec![0x00f8_0000]);
        assert_eq!(decode(LineKind::Line16, &[0xe0, 0x07], 1, 1), vec![0x0000_fc00]);
        assert_eq!(
            decode(LineKind::Line24, &[0x11, 0x22, 0x33], 1, 1),
            vec![0x0033_2211]
        );
        assert_eq!(
            decode(LineKind::Line32, &[0x11, 0x22, 0x33, 0x44], 1, 1),
            vec![0x0033_2211]
        );
    }

    #[test]
    fn reads_past_vram_end_are_black() {
        assert_eq!(decode(LineKind::Line8, &[7], 3, 3), vec![7, 0, 0]);
    }

    #[test]
    fn narrow_host_depths_pack_tightly() {
        let tables = ExpandTables::new();
        let palette = identity_palette();
        let src = LineSource {
            vram: &[0x00, 0x7c],
            palette: &palette,
            tables: &tables,
            plane_mask: 0,
        };
        let mut dst = vec![0u8; 2];
        line_fn(LineKind::Line15, 1)(&src, &mut dst, 0, 1);
        assert_eq!(u16::from_le_bytes([dst[0], dst[1]]), 0x7c00);
    }
}
