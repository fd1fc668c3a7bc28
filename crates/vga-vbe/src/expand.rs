/// Bit-spreading lookup tables used by the planar line decoders and the 16-dot glyph renderer.
///
/// Built once per device at construction and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ExpandTables {
    /// Bit `j` of the index lands at bit `4 * j`: one plane byte spread over eight 4-bit pixels.
    pub expand4: [u32; 256],
    /// Bit pair `j` of the index lands at bits `4 * j..4 * j + 2`: CGA-style 2bpp pixels.
    pub expand2: [u32; 256],
    /// Each of the low four index bits doubled into a bit pair.
    pub expand4to8: [u8; 16],
}

impl ExpandTables {
    pub fn new() -> Self {
        let mut expand4 = [0u32; 256];
        let mut expand2 = [0u32; 256];
        for i in 0..256u32 {
            let mut v4 = 0u32;
            for j in 0..8 {
                v4 |= ((i >> j) & 1) << (j * 4);
            }
            expand4[i as usize] = v4;

            let mut v2 = 0u32;
            for j in 0..4 {
                v2 |= ((i >> (2 * j)) & 3) << (j * 4);
            }
            expand2[i as usize] = v2;
        }

        let mut expand4to8 = [0u8; 16];
        for (i, out) in expand4to8.iter_mut().enumerate() {
            let mut v = 0u8;
            for j in 0..4 {
                let b = ((i >> j) & 1) as u8;
                v |= b << (2 * j);
                v |= b << (2 * j + 1);
            }
            *out = v;
        }

        Self {
            expand4,
            expand2,
            expand4to8,
        }
    }
}

impl Default for ExpandTables {
    fn default() -> Self {
        Self::new()
    }
}
