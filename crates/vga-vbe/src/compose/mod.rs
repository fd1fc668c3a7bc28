//! Display composer.
//!
//! Turns the guest's view of VRAM into host pixels on a [`DisplayConnector`] surface. Each pass
//! picks one of three paths (text, graphics, blank) from the current register state and redraws
//! only what changed since the previous pass: text cells are compared against a cache of the last
//! drawn character/attribute words, graphics scanlines against the VRAM dirty bitmap. Changed
//! regions are reported as rectangles once the surface borrow has ended.

mod glyph;
mod graphics;
mod lines;
mod text;

use tracing::{debug, warn};

use crate::display::{DisplayConnector, MemoryConnector, ResizeRequest, ResizeStatus};
use crate::error::{Result, VgaError};
use crate::expand::ExpandTables;
use crate::memory::DirtyBitmap;
use crate::palette::PaletteCache;
use crate::regs::RegisterBank;
use crate::VgaDevice;

pub(crate) use text::blink_visible;

/// Character cells tracked by the text cache (160x100 covers every CRTC text geometry).
pub(crate) const CH_ATTR_SIZE: usize = 160 * 100;

/// Which composition path the last full pass used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicMode {
    Text,
    Graphics,
    /// Screen off (attribute palette source cleared or SR1 bit 5 set).
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Knobs of one [`VgaDevice::update_display`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Redraw everything regardless of caches and dirty pages.
    pub full: bool,
    /// Give up with [`FrameStatus::RetryLater`] instead of asking the connector to resize.
    pub fail_on_resize: bool,
    /// Consume the dirty state the pass looked at. Cleared for non-destructive peeks.
    pub reset_dirty: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            full: false,
            fail_on_resize: false,
            reset_dirty: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Composed,
    /// The pass was abandoned: a resize was needed but not allowed, or the guest geometry is not
    /// usable yet. Nothing was drawn.
    RetryLater,
    /// The connector is still applying a resize; the next pass redraws in full.
    ResizeInProgress,
}

/// Outcome of one composition pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub status: FrameStatus,
    /// Updated regions, in the order they were reported to the connector.
    pub rects: Vec<Rect>,
}

impl FrameReport {
    pub fn is_composed(&self) -> bool {
        self.status == FrameStatus::Composed
    }
}

/// A 32 bits per pixel capture of the visible screen, `B, G, R, X` byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Everything the composer remembers between passes.
#[derive(Debug, Clone)]
pub(crate) struct ComposerState {
    /// `None` until the first pass; forgetting it forces a full redraw.
    pub graphic_mode: Option<GraphicMode>,

    pub line_offset: u32,
    pub start_addr: u32,
    pub line_compare: u32,

    /// Text: columns x rows. Graphics: pixels.
    pub last_width: u32,
    pub last_height: u32,
    pub last_cw: u32,
    pub last_ch: u32,
    /// Host surface size last requested from the connector.
    pub last_scr_width: u32,
    pub last_scr_height: u32,
    pub last_bpp: u16,
    /// Pitch and VRAM byte offset sent with the last graphics resize.
    pub last_scanout: (u32, u32),
    pub shift_control: u8,
    pub double_scan: u8,

    pub font_offsets: [u32; 2],
    pub cursor_offset: u32,
    pub cursor_start: u8,
    pub cursor_end: u8,
    pub last_uline: u8,
    pub last_blink: bool,
    pub last_chr_blink: bool,
    pub last_ch_attr: Vec<u32>,

    pub palette: PaletteCache,
}

impl Default for ComposerState {
    fn default() -> Self {
        Self {
            graphic_mode: None,
            line_offset: 0,
            start_addr: 0,
            line_compare: 0,
            last_width: 0,
            last_height: 0,
            last_cw: 0,
            last_ch: 0,
            last_scr_width: 0,
            last_scr_height: 0,
            last_bpp: 0,
            last_scanout: (0, 0),
            shift_control: 0,
            double_scan: 0,
            font_offsets: [0; 2],
            cursor_offset: 0,
            cursor_start: 0,
            cursor_end: 0,
            last_uline: 0,
            last_blink: false,
            last_chr_blink: false,
            last_ch_attr: vec![0; CH_ATTR_SIZE],
            palette: PaletteCache::default(),
        }
    }
}

impl ComposerState {
    /// Refreshes line offset, start address and line compare. Returns whether any changed.
    pub fn update_basic_params(&mut self, regs: &RegisterBank) -> bool {
        let (line_offset, start_addr, line_compare) = offsets(regs);
        if line_offset != self.line_offset
            || start_addr != self.start_addr
            || line_compare != self.line_compare
        {
            self.line_offset = line_offset;
            self.start_addr = start_addr;
            self.line_compare = line_compare;
            true
        } else {
            false
        }
    }
}

/// Scanline pitch in bytes, start address in dwords and line compare scanline.
pub(crate) fn offsets(regs: &RegisterBank) -> (u32, u32, u32) {
    if regs.vbe_enabled() {
        return (regs.vbe_line_offset, regs.vbe_start_addr, 65535);
    }

    let mut line_offset = u32::from(regs.cr[0x13]) << 3;
    if regs.cr[0x14] & 0x40 == 0 && regs.cr[0x17] & 0x40 == 0 {
        // Word mode.
        line_offset *= 2;
    }
    let start_addr = u32::from(regs.cr[0x0d]) | (u32::from(regs.cr[0x0c]) << 8);
    let line_compare = u32::from(regs.cr[0x18])
        | (u32::from(regs.cr[0x07] & 0x10) << 4)
        | (u32::from(regs.cr[0x09] & 0x40) << 3);
    (line_offset, start_addr, line_compare)
}

/// Update rectangles of one pass. Vertically adjacent rectangles with the same horizontal extent
/// merge into one.
#[derive(Debug, Default)]
pub(crate) struct RectList(Vec<Rect>);

impl RectList {
    pub fn push(&mut self, x: u32, y: u32, w: u32, h: u32) {
        if w == 0 || h == 0 {
            return;
        }
        if let Some(last) = self.0.last_mut() {
            if last.x == x && last.w == w && last.y + last.h == y {
                last.h += h;
                return;
            }
        }
        self.0.push(Rect { x, y, w, h });
    }

    pub fn into_vec(self) -> Vec<Rect> {
        self.0
    }
}

/// Device state borrowed for one composition pass.
pub(crate) struct Frame<'a> {
    pub regs: &'a RegisterBank,
    pub vram: &'a [u8],
    pub dirty: &'a mut DirtyBitmap,
    pub tables: &'a ExpandTables,
    pub state: &'a mut ComposerState,
    pub plane_updated: &'a mut u8,
    pub now_ns: u64,
    pub opts: UpdateOptions,
    pub rects: RectList,
}

impl Frame<'_> {
    fn current_mode(&self) -> GraphicMode {
        if self.regs.display_blanked() {
            GraphicMode::Blank
        } else if self.regs.graphics_mode() {
            GraphicMode::Graphics
        } else {
            GraphicMode::Text
        }
    }

    fn compose(&mut self, conn: &mut dyn DisplayConnector) -> Result<FrameStatus> {
        let mode = self.current_mode();
        let full = self.opts.full || self.state.graphic_mode != Some(mode);
        if full {
            self.state.graphic_mode = Some(mode);
        }
        match mode {
            GraphicMode::Text => self.draw_text(conn, full),
            GraphicMode::Graphics => self.draw_graphic(conn, full),
            GraphicMode::Blank => self.draw_blank(conn, full),
        }
    }
}

pub(crate) fn request_resize(
    conn: &mut dyn DisplayConnector,
    req: ResizeRequest,
) -> Result<ResizeStatus> {
    conn.resize(&req).map_err(|err| {
        warn!(%err, ?req, "display connector refused resize");
        err
    })
}

impl VgaDevice {
    /// Runs one composition pass against `conn`.
    ///
    /// A pending LFB mode change is delivered first. Updated rectangles go to
    /// [`DisplayConnector::update_rect`] after drawing and are also returned in the report.
    pub fn update_display(
        &mut self,
        conn: &mut dyn DisplayConnector,
        opts: UpdateOptions,
    ) -> Result<FrameReport> {
        if let Some(enabled) = self.pending_lfb_change.take() {
            conn.lfb_mode_changed(enabled);
        }

        let VgaDevice {
            regs,
            vram,
            dirty,
            tables,
            composer,
            plane_updated,
            clock_ns,
            ..
        } = self;
        let mut frame = Frame {
            regs,
            vram: vram.as_slice(),
            dirty,
            tables,
            state: composer,
            plane_updated,
            now_ns: *clock_ns,
            opts,
            rects: RectList::default(),
        };
        let status = frame.compose(conn)?;
        let rects = frame.rects.into_vec();
        for r in &rects {
            conn.update_rect(r.x, r.y, r.w, r.h);
        }
        Ok(FrameReport { status, rects })
    }

    /// Periodic refresh pass: resizes are allowed and the dirty state is consumed.
    pub fn compose_frame(
        &mut self,
        conn: &mut dyn DisplayConnector,
        force_full: bool,
    ) -> Result<FrameReport> {
        self.update_display(
            conn,
            UpdateOptions {
                full: force_full,
                fail_on_resize: false,
                reset_dirty: true,
            },
        )
    }

    /// Mode drawn by the last full pass, if any.
    pub fn graphic_mode(&self) -> Option<GraphicMode> {
        self.composer.graphic_mode
    }

    /// Renders the last displayed mode into a fresh 32-bit buffer.
    ///
    /// The capture never resizes anything and leaves the dirty bitmap and the composer caches of
    /// the live display untouched.
    pub fn take_screenshot(&self) -> Result<Screenshot> {
        let width = self.composer.last_scr_width;
        let height = self.composer.last_scr_height;
        let cb = u64::from(width) * 4 * u64::from(height);
        if cb == 0 || cb > u64::from(self.config.vram_size) {
            return Err(VgaError::NotSupported);
        }

        let mut conn = MemoryConnector::new(32);
        conn.allocate(width, height)?;

        let mut state = self.composer.clone();
        state.graphic_mode = None;
        let mut dirty = self.dirty.clone();
        let mut plane_updated = self.plane_updated;
        let mut frame = Frame {
            regs: &self.regs,
            vram: &self.vram,
            dirty: &mut dirty,
            tables: &self.tables,
            state: &mut state,
            plane_updated: &mut plane_updated,
            now_ns: self.clock_ns,
            opts: UpdateOptions {
                full: false,
                fail_on_resize: true,
                reset_dirty: false,
            },
            rects: RectList::default(),
        };
        let status = frame.compose(&mut conn)?;
        if status != FrameStatus::Composed {
            debug!(?status, "screenshot needs a resize first");
            return Err(VgaError::NotSupported);
        }

        Ok(Screenshot {
            width,
            height,
            data: conn.into_data(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VgaConfig;

    #[test]
    fn rect_list_merges_vertical_runs() {
        let mut rects = RectList::default();
        rects.push(0, 0, 8, 16);
        rects.push(0, 16, 8, 16);
        rects.push(8, 32, 8, 16);
        rects.push(8, 64, 8, 16);
        rects.push(0, 0, 0, 16);
        assert_eq!(
            rects.into_vec(),
            vec![
                Rect { x: 0, y: 0, w: 8, h: 32 },
                Rect { x: 8, y: 32, w: 8, h: 16 },
                Rect { x: 8, y: 64, w: 8, h: 16 },
            ]
        );
    }

    #[test]
    fn legacy_offsets_follow_word_mode() {
        let mut regs = RegisterBank::default();
        regs.cr[0x13] = 0x28;
        regs.cr[0x0c] = 0x12;
        regs.cr[0x0d] = 0x34;
        regs.cr[0x18] = 0xff;
        regs.cr[0x07] = 0x10;
        regs.cr[0x09] = 0x40;
        assert_eq!(offsets(&regs), (640, 0x1234, 0x3ff));

        // Byte mode halves the pitch.
        regs.cr[0x17] = 0x40;
        assert_eq!(offsets(&regs).0, 320);
        // Doubleword mode likewise.
        regs.cr[0x17] = 0;
        regs.cr[0x14] = 0x40;
        assert_eq!(offsets(&regs).0, 320);
    }

    #[test]
    fn basic_params_report_changes_once() {
        let mut regs = RegisterBank::default();
        let mut state = ComposerState::default();
        regs.cr[0x13] = 0x50;
        assert!(state.update_basic_params(&regs));
        assert!(!state.update_basic_params(&regs));
        regs.cr[0x0d] = 1;
        assert!(state.update_basic_params(&regs));
    }

    #[test]
    fn screenshot_before_first_frame_is_not_supported() {
        let dev = VgaDevice::new(VgaConfig::default()).unwrap();
        assert!(matches!(dev.take_screenshot(), Err(VgaError::NotSupported)));
    }

    #[test]
    fn mode_selection() {
        let mut dev = VgaDevice::new(VgaConfig::default()).unwrap();
        let mut conn = MemoryConnector::new(32);
        // Power-on state has the palette address source clear.
        dev.compose_frame(&mut conn, false).unwrap();
        assert_eq!(dev.graphic_mode(), Some(GraphicMode::Blank));

        dev.regs.ar_index = 0x20;
        dev.compose_frame(&mut conn, false).unwrap();
        assert_eq!(dev.graphic_mode(), Some(GraphicMode::Text));

        dev.regs.gr[6] = 0x01;
        dev.compose_frame(&mut conn, false).unwrap();
        assert_eq!(dev.graphic_mode(), Some(GraphicMode::Graphics));
    }
}
