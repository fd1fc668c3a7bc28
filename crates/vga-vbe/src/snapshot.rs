//! Deterministic device snapshots.
//!
//! Layout: a fixed header (magic, format version, device id, device version) followed by
//! tag-length-value fields (`u16` tag, `u32` length, payload) in ascending tag order. Readers skip
//! tags they do not know, so fields can be added within a major version.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::compose::ComposerState;
use crate::error::{SnapshotError, SnapshotResult};
use crate::regs::{bank_max_for, VBE_REG_COUNT};
use crate::VgaDevice;

const MAGIC: [u8; 4] = *b"VSNP";
const FORMAT_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);
const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

/// Save/restore contract of a snapshotable device.
///
/// `DEVICE_ID` never changes; new state goes into new tags within the same major version.
pub trait IoSnapshot {
    const DEVICE_ID: [u8; 4];
    const DEVICE_VERSION: SnapshotVersion;

    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()>;
}

pub(crate) struct SnapshotWriter {
    device_id: [u8; 4],
    version: SnapshotVersion,
    fields: BTreeMap<u16, Vec<u8>>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], version: SnapshotVersion) -> Self {
        Self {
            device_id,
            version,
            fields: BTreeMap::new(),
        }
    }

    pub fn field_bytes(&mut self, tag: u16, bytes: Vec<u8>) {
        self.fields.insert(tag, bytes);
    }

    pub fn field_u8(&mut self, tag: u16, v: u8) {
        self.field_bytes(tag, vec![v]);
    }

    pub fn field_bool(&mut self, tag: u16, v: bool) {
        self.field_u8(tag, u8::from(v));
    }

    pub fn field_u16(&mut self, tag: u16, v: u16) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_u32(&mut self, tag: u16, v: u32) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_u64(&mut self, tag: u16, v: u64) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn finish(self) -> Vec<u8> {
        let body: usize = self.fields.values().map(|v| 6 + v.len()).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + body);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.major.to_le_bytes());
        out.extend_from_slice(&FORMAT_VERSION.minor.to_le_bytes());
        out.extend_from_slice(&self.device_id);
        out.extend_from_slice(&self.version.major.to_le_bytes());
        out.extend_from_slice(&self.version.minor.to_le_bytes());
        for (tag, payload) in &self.fields {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
        }
        out
    }
}

/// Cursor over a byte slice for fixed-width little-endian values.
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn take(&mut self, n: usize) -> SnapshotResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(SnapshotError::UnexpectedEof);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> SnapshotResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> SnapshotResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> SnapshotResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> SnapshotResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> SnapshotResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fails unless every byte was consumed.
    pub fn finish(self) -> SnapshotResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(SnapshotError::InvalidFieldEncoding("trailing bytes"))
        }
    }
}

pub(crate) struct SnapshotReader<'a> {
    pub device_version: SnapshotVersion,
    fields: BTreeMap<u16, &'a [u8]>,
}

impl<'a> SnapshotReader<'a> {
    pub fn parse(bytes: &'a [u8], device_id: [u8; 4]) -> SnapshotResult<Self> {
        let mut d = Decoder::new(bytes);
        if d.array::<4>()? != MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let format = SnapshotVersion::new(d.u16()?, d.u16()?);
        if format.major != FORMAT_VERSION.major {
            return Err(SnapshotError::UnsupportedVersion {
                major: format.major,
                minor: format.minor,
            });
        }
        let found = d.array::<4>()?;
        if found != device_id {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: device_id,
                found,
            });
        }
        let device_version = SnapshotVersion::new(d.u16()?, d.u16()?);

        let mut fields = BTreeMap::new();
        while !d.is_empty() {
            let tag = d.u16()?;
            let len = d.u32()? as usize;
            let payload = d.take(len)?;
            if fields.insert(tag, payload).is_some() {
                return Err(SnapshotError::InvalidFieldEncoding("duplicate tag"));
            }
        }
        Ok(Self {
            device_version,
            fields,
        })
    }

    pub fn ensure_device_major(&self, major: u16) -> SnapshotResult<()> {
        if self.device_version.major == major {
            Ok(())
        } else {
            Err(SnapshotError::UnsupportedVersion {
                major: self.device_version.major,
                minor: self.device_version.minor,
            })
        }
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.get(&tag).copied()
    }

    fn fixed<const N: usize>(&self, tag: u16) -> SnapshotResult<Option<[u8; N]>> {
        match self.bytes(tag) {
            None => Ok(None),
            Some(buf) => {
                let arr: [u8; N] = buf
                    .try_into()
                    .map_err(|_| SnapshotError::InvalidFieldEncoding("field length"))?;
                Ok(Some(arr))
            }
        }
    }

    pub fn u8(&self, tag: u16) -> SnapshotResult<Option<u8>> {
        Ok(self.fixed::<1>(tag)?.map(|[v]| v))
    }

    pub fn bool(&self, tag: u16) -> SnapshotResult<Option<bool>> {
        match self.u8(tag)? {
            None => Ok(None),
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            Some(_) => Err(SnapshotError::InvalidFieldEncoding("bool")),
        }
    }

    pub fn u16(&self, tag: u16) -> SnapshotResult<Option<u16>> {
        Ok(self.fixed(tag)?.map(u16::from_le_bytes))
    }

    pub fn u32(&self, tag: u16) -> SnapshotResult<Option<u32>> {
        Ok(self.fixed(tag)?.map(u32::from_le_bytes))
    }

    pub fn u64(&self, tag: u16) -> SnapshotResult<Option<u64>> {
        Ok(self.fixed(tag)?.map(u64::from_le_bytes))
    }

    /// Copies a fixed-size register array; a length mismatch is an encoding error.
    pub fn array_into(&self, tag: u16, dst: &mut [u8], what: &'static str) -> SnapshotResult<()> {
        if let Some(buf) = self.bytes(tag) {
            if buf.len() != dst.len() {
                return Err(SnapshotError::InvalidFieldEncoding(what));
            }
            dst.copy_from_slice(buf);
        }
        Ok(())
    }
}

const TAG_LATCH: u16 = 1;
const TAG_SR_INDEX: u16 = 2;
const TAG_SR: u16 = 3;
const TAG_GR_INDEX: u16 = 4;
const TAG_GR: u16 = 5;
const TAG_AR_INDEX: u16 = 6;
const TAG_AR: u16 = 7;
const TAG_AR_FLIP_FLOP: u16 = 8;
const TAG_CR_INDEX: u16 = 9;
const TAG_CR: u16 = 10;
const TAG_MSR: u16 = 11;
const TAG_FCR: u16 = 12;
const TAG_ST00: u16 = 13;
const TAG_ST01: u16 = 14;

const TAG_DAC_STATE: u16 = 20;
const TAG_DAC_SUB_INDEX: u16 = 21;
const TAG_DAC_READ_INDEX: u16 = 22;
const TAG_DAC_WRITE_INDEX: u16 = 23;
const TAG_DAC_CACHE: u16 = 24;
const TAG_PALETTE: u16 = 25;

const TAG_BANK_OFFSET: u16 = 30;
const TAG_VBE_INDEX: u16 = 31;
const TAG_VBE_REGS: u16 = 32;
const TAG_VBE_START_ADDR: u16 = 33;
const TAG_VBE_LINE_OFFSET: u16 = 34;

const TAG_VRAM: u16 = 40;

const TAG_CLOCK_NS: u16 = 50;
const TAG_REFRESH_INTERVAL_MS: u16 = 51;

impl IoSnapshot for VgaDevice {
    const DEVICE_ID: [u8; 4] = *b"VGAV";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        let regs = &self.regs;
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);

        w.field_u32(TAG_LATCH, regs.latch);
        w.field_u8(TAG_SR_INDEX, regs.sr_index);
        w.field_bytes(TAG_SR, regs.sr.to_vec());
        w.field_u8(TAG_GR_INDEX, regs.gr_index);
        w.field_bytes(TAG_GR, regs.gr.to_vec());
        w.field_u8(TAG_AR_INDEX, regs.ar_index);
        w.field_bytes(TAG_AR, regs.ar.to_vec());
        w.field_bool(TAG_AR_FLIP_FLOP, regs.ar_flip_flop);
        w.field_u8(TAG_CR_INDEX, regs.cr_index);
        w.field_bytes(TAG_CR, regs.cr.to_vec());
        w.field_u8(TAG_MSR, regs.msr);
        w.field_u8(TAG_FCR, regs.fcr);
        w.field_u8(TAG_ST00, regs.st00);
        w.field_u8(TAG_ST01, regs.st01);

        w.field_u8(TAG_DAC_STATE, regs.dac_state);
        w.field_u8(TAG_DAC_SUB_INDEX, regs.dac_sub_index);
        w.field_u8(TAG_DAC_READ_INDEX, regs.dac_read_index);
        w.field_u8(TAG_DAC_WRITE_INDEX, regs.dac_write_index);
        w.field_bytes(TAG_DAC_CACHE, regs.dac_cache.to_vec());
        w.field_bytes(TAG_PALETTE, regs.palette.to_vec());

        w.field_u32(TAG_BANK_OFFSET, regs.bank_offset);
        w.field_u16(TAG_VBE_INDEX, regs.vbe_index);
        let mut vbe = Vec::with_capacity(2 + 2 * VBE_REG_COUNT);
        vbe.extend_from_slice(&(VBE_REG_COUNT as u16).to_le_bytes());
        for v in regs.vbe_regs {
            vbe.extend_from_slice(&v.to_le_bytes());
        }
        w.field_bytes(TAG_VBE_REGS, vbe);
        w.field_u32(TAG_VBE_START_ADDR, regs.vbe_start_addr);
        w.field_u32(TAG_VBE_LINE_OFFSET, regs.vbe_line_offset);

        w.field_bytes(TAG_VRAM, self.vram.clone());

        w.field_u64(TAG_CLOCK_NS, self.clock_ns);
        w.field_u32(TAG_REFRESH_INTERVAL_MS, self.refresh.interval_ms());

        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        self.load_state_inner(bytes).map_err(|err| {
            warn!(%err, "vga snapshot rejected");
            err
        })
    }
}

impl VgaDevice {
    /// Decodes everything into scratch state first so a rejected snapshot leaves the device
    /// untouched.
    fn load_state_inner(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        let mut regs = self.regs.clone();
        if let Some(v) = r.u32(TAG_LATCH)? {
            regs.latch = v;
        }
        if let Some(v) = r.u8(TAG_SR_INDEX)? {
            regs.sr_index = v & 7;
        }
        r.array_into(TAG_SR, &mut regs.sr, "sr")?;
        if let Some(v) = r.u8(TAG_GR_INDEX)? {
            regs.gr_index = v & 0x0f;
        }
        r.array_into(TAG_GR, &mut regs.gr, "gr")?;
        if let Some(v) = r.u8(TAG_AR_INDEX)? {
            regs.ar_index = v;
        }
        r.array_into(TAG_AR, &mut regs.ar, "ar")?;
        if let Some(v) = r.bool(TAG_AR_FLIP_FLOP)? {
            regs.ar_flip_flop = v;
        }
        if let Some(v) = r.u8(TAG_CR_INDEX)? {
            regs.cr_index = v;
        }
        r.array_into(TAG_CR, &mut regs.cr, "cr")?;
        if let Some(v) = r.u8(TAG_MSR)? {
            regs.msr = v;
        }
        if let Some(v) = r.u8(TAG_FCR)? {
            regs.fcr = v;
        }
        if let Some(v) = r.u8(TAG_ST00)? {
            regs.st00 = v;
        }
        if let Some(v) = r.u8(TAG_ST01)? {
            regs.st01 = v;
        }

        if let Some(v) = r.u8(TAG_DAC_STATE)? {
            regs.dac_state = v;
        }
        if let Some(v) = r.u8(TAG_DAC_SUB_INDEX)? {
            if v > 2 {
                return Err(SnapshotError::InvalidFieldEncoding("dac sub index"));
            }
            regs.dac_sub_index = v;
        }
        if let Some(v) = r.u8(TAG_DAC_READ_INDEX)? {
            regs.dac_read_index = v;
        }
        if let Some(v) = r.u8(TAG_DAC_WRITE_INDEX)? {
            regs.dac_write_index = v;
        }
        r.array_into(TAG_DAC_CACHE, &mut regs.dac_cache, "dac cache")?;
        r.array_into(TAG_PALETTE, &mut regs.palette, "palette")?;

        if let Some(v) = r.u32(TAG_BANK_OFFSET)? {
            regs.bank_offset = v;
        }
        if let Some(v) = r.u16(TAG_VBE_INDEX)? {
            regs.vbe_index = v;
        }
        if let Some(buf) = r.bytes(TAG_VBE_REGS) {
            let mut d = Decoder::new(buf);
            let count = usize::from(d.u16()?);
            if count > VBE_REG_COUNT {
                return Err(SnapshotError::InvalidFieldEncoding("vbe register count"));
            }
            if count < VBE_REG_COUNT {
                debug!(count, "vbe registers from an older layout");
            }
            for slot in regs.vbe_regs.iter_mut().take(count) {
                *slot = d.u16()?;
            }
            d.finish()?;
        }
        if let Some(v) = r.u32(TAG_VBE_START_ADDR)? {
            regs.vbe_start_addr = v;
        }
        if let Some(v) = r.u32(TAG_VBE_LINE_OFFSET)? {
            regs.vbe_line_offset = v;
        }

        let vram = r.bytes(TAG_VRAM);
        if let Some(buf) = vram {
            if buf.len() != self.vram.len() {
                return Err(SnapshotError::InvalidFieldEncoding("vram size"));
            }
        }
        let clock_ns = r.u64(TAG_CLOCK_NS)?;
        let refresh_ms = r.u32(TAG_REFRESH_INTERVAL_MS)?;

        // Commit.
        regs.vbe_bank_max = bank_max_for(self.config.vram_size);
        regs.vbe_index_hi = None;
        regs.vbe_data_hi = None;
        regs.vbe_index_read_lo = false;
        regs.vbe_data_read_lo = false;
        self.regs = regs;
        if let Some(buf) = vram {
            self.vram.copy_from_slice(buf);
        }
        if let Some(v) = clock_ns {
            self.clock_ns = v;
        }
        let interval = refresh_ms.unwrap_or_else(|| self.refresh.interval_ms());
        self.refresh.arm(interval, self.clock_ns);

        self.dirty.mark_range(0, self.config.vram_size);
        self.composer = ComposerState::default();
        self.plane_updated = 0;
        if self.config.real_retrace {
            self.update_retrace_timing();
        }
        self.pending_lfb_change = Some(self.regs.vbe_enabled());
        debug!("vga snapshot restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{VBE_DISPI_INDEX_ENABLE, VBE_DISPI_INDEX_XRES};
    use crate::VgaConfig;

    fn dev() -> VgaDevice {
        VgaDevice::new(VgaConfig::default().with_vram_size(256 * 1024)).unwrap()
    }

    #[test]
    fn header_checks() {
        let mut dev = dev();
        assert_eq!(dev.load_state(b"xx"), Err(SnapshotError::UnexpectedEof));

        let mut bytes = dev.save_state();
        bytes[0] = b'X';
        assert_eq!(dev.load_state(&bytes), Err(SnapshotError::InvalidMagic));

        let w = SnapshotWriter::new(*b"NOPE", SnapshotVersion::new(1, 0));
        assert_eq!(
            dev.load_state(&w.finish()),
            Err(SnapshotError::DeviceIdMismatch {
                expected: *b"VGAV",
                found: *b"NOPE"
            })
        );

        let w = SnapshotWriter::new(*b"VGAV", SnapshotVersion::new(2, 0));
        assert_eq!(
            dev.load_state(&w.finish()),
            Err(SnapshotError::UnsupportedVersion { major: 2, minor: 0 })
        );
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut w = SnapshotWriter::new(*b"VGAV", VgaDevice::DEVICE_VERSION);
        w.field_u8(TAG_MSR, 0x67);
        w.field_bytes(999, vec![1, 2, 3]);
        let mut dev = dev();
        dev.load_state(&w.finish()).unwrap();
        assert_eq!(dev.regs.msr, 0x67);
    }

    #[test]
    fn shorter_vbe_register_list_restores_prefix() {
        let mut dev = dev();
        dev.regs.set_vbe(VBE_DISPI_INDEX_ENABLE, 0x41);

        let mut w = SnapshotWriter::new(*b"VGAV", VgaDevice::DEVICE_VERSION);
        let mut vbe = 2u16.to_le_bytes().to_vec();
        vbe.extend_from_slice(&0xB0C2u16.to_le_bytes());
        vbe.extend_from_slice(&640u16.to_le_bytes());
        w.field_bytes(TAG_VBE_REGS, vbe);
        dev.load_state(&w.finish()).unwrap();

        assert_eq!(dev.regs.vbe(0), 0xB0C2);
        assert_eq!(dev.regs.vbe(VBE_DISPI_INDEX_XRES), 640);
        assert_eq!(dev.regs.vbe(VBE_DISPI_INDEX_ENABLE), 0x41);
    }

    #[test]
    fn longer_vbe_register_list_is_rejected() {
        let mut dev = dev();
        let mut w = SnapshotWriter::new(*b"VGAV", VgaDevice::DEVICE_VERSION);
        let count = VBE_REG_COUNT as u16 + 1;
        let mut vbe = count.to_le_bytes().to_vec();
        vbe.resize(2 + 2 * usize::from(count), 0);
        w.field_bytes(TAG_VBE_REGS, vbe);
        w.field_u8(TAG_MSR, 0x55);
        assert_eq!(
            dev.load_state(&w.finish()),
            Err(SnapshotError::InvalidFieldEncoding("vbe register count"))
        );
        // Nothing was applied.
        assert_eq!(dev.regs.msr, 0);
    }

    #[test]
    fn wrong_array_and_vram_lengths_are_rejected() {
        let mut dev = dev();
        let mut w = SnapshotWriter::new(*b"VGAV", VgaDevice::DEVICE_VERSION);
        w.field_bytes(TAG_SR, vec![0; 7]);
        assert_eq!(
            dev.load_state(&w.finish()),
            Err(SnapshotError::InvalidFieldEncoding("sr"))
        );

        let mut w = SnapshotWriter::new(*b"VGAV", VgaDevice::DEVICE_VERSION);
        w.field_bytes(TAG_VRAM, vec![0; 16]);
        assert_eq!(
            dev.load_state(&w.finish()),
            Err(SnapshotError::InvalidFieldEncoding("vram size"))
        );
    }

    #[test]
    fn restore_forgets_graphic_mode_and_marks_vram_dirty() {
        let mut src = dev();
        src.set_text_mode_80x25();
        src.vram[100] = 0x42;
        src.tick(5_000);
        let bytes = src.save_state();

        let mut dst = dev();
        dst.composer.graphic_mode = Some(crate::GraphicMode::Text);
        dst.load_state(&bytes).unwrap();
        assert_eq!(dst.graphic_mode(), None);
        assert_eq!(dst.vram[100], 0x42);
        assert_eq!(dst.now_ns(), 5_000);
        assert!(dst.is_page_dirty(0));
        assert_eq!(dst.regs.cr, src.regs.cr);
        assert_eq!(dst.regs.vbe_bank_max, bank_max_for(256 * 1024));
        // Identical device state encodes identically.
        assert_eq!(dst.save_state(), bytes);
    }
}
