use thiserror::Error;

pub type Result<T> = std::result::Result<T, VgaError>;

/// Host-facing failures of the VGA device.
///
/// Guest port and memory accesses never produce these: hardware has no error path, so bad guest
/// programming is clamped or ignored. Only construction, the display connector, screenshot
/// capture and snapshot restore report errors.
#[derive(Debug, Error)]
pub enum VgaError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The requested operation needs a displayed mode (screenshot before the first frame, or a
    /// mode whose buffer would not fit in VRAM).
    #[error("operation not supported in the current display state")]
    NotSupported,

    #[error("out of memory allocating {0} bytes")]
    NoMemory(usize),

    #[error("display connector error: {0}")]
    Display(String),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,

    #[error("invalid snapshot magic")]
    InvalidMagic,

    #[error("snapshot belongs to device {found:?}, expected {expected:?}")]
    DeviceIdMismatch { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported snapshot version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),
}
