//! Host side of the composer: the connector that owns the presented surface.

use tracing::trace;

use crate::compose::Rect;
use crate::error::{Result, VgaError};
use crate::palette::HostDepth;

/// Geometry change requested by the composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeRequest {
    /// Guest bits per pixel; zero for text mode.
    pub bpp: u16,
    /// Byte offset of the first visible line in VRAM, for connectors that can scan out of VRAM
    /// directly. `None` in text and blank modes.
    pub vram_offset: Option<u32>,
    /// Guest scanline pitch in bytes.
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeStatus {
    Done,
    /// The connector accepted the request but the new surface is not ready yet; the frame is
    /// skipped and retried on the next refresh.
    InProgress,
}

/// Writable view of the host surface.
#[derive(Debug)]
pub struct Surface<'a> {
    pub data: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per host scanline.
    pub pitch: u32,
}

/// Presentation target for the composed frame.
pub trait DisplayConnector {
    /// Host bits per pixel: 8, 15, 16, 24 or 32.
    fn depth(&self) -> u8;

    fn resize(&mut self, req: &ResizeRequest) -> Result<ResizeStatus>;

    /// The current surface, or `None` while no surface exists.
    fn surface(&mut self) -> Option<Surface<'_>>;

    /// Pixels inside the rectangle changed.
    fn update_rect(&mut self, x: u32, y: u32, w: u32, h: u32);

    /// Called once per refresh timer period after composing.
    fn refresh(&mut self) {}

    /// The guest entered (`true`) or left a VBE linear framebuffer mode.
    fn lfb_mode_changed(&mut self, _enabled: bool) {}
}

/// Connector backed by an owned pixel buffer. Records every notification it receives.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    depth: u8,
    data: Vec<u8>,
    width: u32,
    height: u32,
    pitch: u32,
    /// Report `InProgress` for resize requests instead of applying them.
    defer_resize: bool,

    pub resizes: Vec<ResizeRequest>,
    pub rects: Vec<Rect>,
    pub refreshes: u32,
    pub lfb_events: Vec<bool>,
}

impl MemoryConnector {
    pub fn new(depth: u8) -> Self {
        Self {
            depth,
            data: Vec::new(),
            width: 0,
            height: 0,
            pitch: 0,
            defer_resize: false,
            resizes: Vec::new(),
            rects: Vec::new(),
            refreshes: 0,
            lfb_events: Vec::new(),
        }
    }

    pub fn set_defer_resize(&mut self, defer: bool) {
        self.defer_resize = defer;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn host_depth(&self) -> HostDepth {
        HostDepth::from_bits(self.depth)
    }

    /// Host pixel value at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.host_depth().bytes_per_pixel();
        let off = y as usize * self.pitch as usize + x as usize * bpp;
        let bytes = self.data.get(off..off + bpp)?;
        let mut raw = [0u8; 4];
        raw[..bpp].copy_from_slice(bytes);
        Some(u32::from_le_bytes(raw))
    }

    /// Replaces the surface with a zeroed `width` x `height` buffer.
    pub fn allocate(&mut self, width: u32, height: u32) -> Result<()> {
        let pitch = width as usize * self.host_depth().bytes_per_pixel();
        let len = pitch * height as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| VgaError::NoMemory(len))?;
        data.resize(len, 0);

        self.data = data;
        self.width = width;
        self.height = height;
        self.pitch = pitch as u32;
        Ok(())
    }

    pub fn take_rects(&mut self) -> Vec<Rect> {
        std::mem::take(&mut self.rects)
    }
}

impl DisplayConnector for MemoryConnector {
    fn depth(&self) -> u8 {
        self.depth
    }

    fn resize(&mut self, req: &ResizeRequest) -> Result<ResizeStatus> {
        trace!(?req, "memory connector resize");
        self.resizes.push(*req);
        if self.defer_resize {
            return Ok(ResizeStatus::InProgress);
        }
        self.allocate(req.width, req.height)?;
        Ok(ResizeStatus::Done)
    }

    fn surface(&mut self) -> Option<Surface<'_>> {
        if self.data.is_empty() {
            return None;
        }
        Some(Surface {
            data: &mut self.data,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
        })
    }

    fn update_rect(&mut self, x: u32, y: u32, w: u32, h: u32) {
        self.rects.push(Rect { x, y, w, h });
    }

    fn refresh(&mut self) {
        self.refreshes += 1;
    }

    fn lfb_mode_changed(&mut self, enabled: bool) {
        self.lfb_events.push(enabled);
    }
}
