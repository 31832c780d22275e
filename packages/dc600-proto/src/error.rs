use thiserror::Error;

/// Errors produced while pulling a frame out of a raw byte stream.
///
/// None of these should ever close the connection on their own — the
/// codec resynchronizes to the next sentinel and keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("malformed escape sequence at offset {0}")]
    MalformedEscape(usize),

    #[error("frame body truncated, need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("closing sentinel does not match opening sentinel")]
    SentinelMismatch,

    #[error("frame body is empty after unescaping")]
    EmptyBody,
}

/// Errors produced while parsing the fixed message header.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header truncated, need at least {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("device id is not valid BCD")]
    BadDeviceId,

    #[error("declared body length {declared} is implausible for a {total} byte frame")]
    ImplausibleLength { declared: usize, total: usize },
}

/// Errors surfaced while walking a sub-packaged multimedia reassembly.
///
/// These are recoverable per-device, per-multimedia-id conditions — they
/// never propagate past the session that triggered them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("packet {package_no} exceeds declared total {total_packages}")]
    PackageNoExceedsTotal { package_no: u16, total_packages: u16 },

    #[error("packet {package_no} already buffered with a different length")]
    DuplicateMismatch { package_no: u16 },

    #[error("first packet for multimedia id {multimedia_id} arrived while a prior assembly was still incomplete")]
    NewFirstPacketWhileIncomplete { multimedia_id: u32 },

    #[error("maximum concurrent sub-package assemblies exceeded")]
    TooManyAssemblies,
}

/// The only hard failure from the location decoder — everything past the
/// fixed 28-byte block is best-effort and never fails the whole decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("fixed location block truncated, need 28 bytes, have {have}")]
    FixedBlockTruncated { have: usize },
}

/// BCD encode/decode failures (device ids, timestamps).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BcdError {
    #[error("byte {byte:#04x} at offset {offset} is not valid packed BCD")]
    InvalidDigit { byte: u8, offset: usize },

    #[error("expected {expected} BCD bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}
