// Codec capability consumed by the session engine.
//
// The session never compresses anything itself. It sequences calls into a
// `Codec` obtained from a pluggable `CodecBackend`:
//
// - `flate`: the default backend; flate2's low-level `Decompress` for
//   inflate and a zlib-rs `z_stream` (`deflate`) for compression
// - custom backends implement the two traits below (tests use scripted ones)
//
// Status values keep zlib's numbering so diagnostics stay comparable with
// other zlib bindings.

mod deflate;
pub mod flate;

pub use flate::{FlateBackend, FlateCodec};

use std::fmt;
use std::ops::RangeInclusive;

use crate::error::InvalidParameter;

// ---------------------------------------------------------------------------
// Parameter bounds
// ---------------------------------------------------------------------------

/// Accepted window sizes (log2 of the history buffer).
pub const WINDOW_BITS: RangeInclusive<u32> = 8..=15;
/// Accepted compression levels; -1 selects the codec default.
pub const LEVEL: RangeInclusive<i32> = -1..=9;
/// Accepted memory levels for the compressor's internal state.
pub const MEM_LEVEL: RangeInclusive<u32> = 1..=9;

pub const DEFAULT_WINDOW_BITS: u32 = 15;
pub const DEFAULT_LEVEL: i32 = -1;
pub const DEFAULT_MEM_LEVEL: u32 = 8;

// ---------------------------------------------------------------------------
// Flush directive
// ---------------------------------------------------------------------------

/// How aggressively the codec should emit output for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flush {
    #[default]
    None,
    Partial,
    Sync,
    Full,
    Finish,
    Block,
}

impl Flush {
    /// Parse zlib's numeric flush constant (`Z_NO_FLUSH` .. `Z_BLOCK`).
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Partial),
            2 => Some(Self::Sync),
            3 => Some(Self::Full),
            4 => Some(Self::Finish),
            5 => Some(Self::Block),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Partial => 1,
            Self::Sync => 2,
            Self::Full => 3,
            Self::Finish => 4,
            Self::Block => 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Compression strategy, one of zlib's fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Default,
    Filtered,
    HuffmanOnly,
    Rle,
    Fixed,
}

impl Strategy {
    /// Parse zlib's numeric strategy constant (`Z_DEFAULT_STRATEGY` = 0 .. `Z_FIXED` = 4).
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Default),
            1 => Some(Self::Filtered),
            2 => Some(Self::HuffmanOnly),
            3 => Some(Self::Rle),
            4 => Some(Self::Fixed),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::Filtered => 1,
            Self::HuffmanOnly => 2,
            Self::Rle => 3,
            Self::Fixed => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Stream framing
// ---------------------------------------------------------------------------

/// Which way bytes flow through a codec stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

/// Container framing around the deflate data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// RFC 1950 header and Adler-32 trailer.
    Zlib,
    /// RFC 1952 member header and CRC-32 trailer.
    Gzip,
    /// Bare RFC 1951 deflate data.
    Raw,
}

/// Per-stream codec parameters, already validated against the bounds above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub window_bits: u32,
    pub level: i32,
    pub mem_level: u32,
    pub strategy: Strategy,
}

impl StreamParams {
    /// Reject values outside the codec bounds.
    pub fn validate(&self) -> Result<(), InvalidParameter> {
        InvalidParameter::check("window_bits", self.window_bits.into(), widen(&WINDOW_BITS))?;
        InvalidParameter::check(
            "level",
            self.level.into(),
            i64::from(*LEVEL.start())..=i64::from(*LEVEL.end()),
        )?;
        InvalidParameter::check("mem_level", self.mem_level.into(), widen(&MEM_LEVEL))
    }
}

fn widen(range: &RangeInclusive<u32>) -> RangeInclusive<i64> {
    i64::from(*range.start())..=i64::from(*range.end())
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            window_bits: DEFAULT_WINDOW_BITS,
            level: DEFAULT_LEVEL,
            mem_level: DEFAULT_MEM_LEVEL,
            strategy: Strategy::Default,
        }
    }
}

/// Adler-32 of a dictionary, the id a zlib stream header refers to it by.
pub fn dictionary_id(dictionary: &[u8]) -> u32 {
    let mut hasher = simd_adler32::Adler32::new();
    hasher.write(dictionary);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Status / step results
// ---------------------------------------------------------------------------

/// Codec status codes, numbered as zlib numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    StreamEnd,
    NeedDict,
    Errno,
    StreamError,
    DataError,
    MemError,
    BufError,
    VersionError,
}

impl Status {
    /// Read a zlib return code; anything unknown counts as a stream error.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::StreamEnd,
            2 => Self::NeedDict,
            -1 => Self::Errno,
            -3 => Self::DataError,
            -4 => Self::MemError,
            -5 => Self::BufError,
            -6 => Self::VersionError,
            _ => Self::StreamError,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::StreamEnd => 1,
            Self::NeedDict => 2,
            Self::Errno => -1,
            Self::StreamError => -2,
            Self::DataError => -3,
            Self::MemError => -4,
            Self::BufError => -5,
            Self::VersionError => -6,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "Z_OK",
            Self::StreamEnd => "Z_STREAM_END",
            Self::NeedDict => "Z_NEED_DICT",
            Self::Errno => "Z_ERRNO",
            Self::StreamError => "Z_STREAM_ERROR",
            Self::DataError => "Z_DATA_ERROR",
            Self::MemError => "Z_MEM_ERROR",
            Self::BufError => "Z_BUF_ERROR",
            Self::VersionError => "Z_VERSION_ERROR",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Outcome of one `Codec::process` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub status: Status,
    /// Input bytes consumed from the front of the slice.
    pub consumed: usize,
    /// Output bytes written to the front of the slice.
    pub produced: usize,
    /// Codec's own diagnostic text, if it supplied one.
    pub message: Option<String>,
}

impl Step {
    pub fn new(status: Status, consumed: usize, produced: usize) -> Self {
        Self {
            status,
            consumed,
            produced,
            message: None,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

/// A failed control call (stream creation, dictionary install, params, reset).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct CodecFailure {
    pub status: Status,
    pub message: Option<String>,
}

impl CodecFailure {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// One live codec stream.
///
/// `process` advances the stream until either the input is exhausted or the
/// output is full and reports how far it got. It is only ever called by one
/// thread at a time; the session moves the whole stream between threads.
pub trait Codec: Send {
    fn process(&mut self, input: &[u8], output: &mut [u8], flush: Flush) -> Step;

    /// Install a preset dictionary (compressors) or the requested one
    /// (decompressors, after `Status::NeedDict`).
    fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<(), CodecFailure>;

    /// Change compression level and strategy mid-stream.
    fn set_params(&mut self, level: i32, strategy: Strategy) -> Result<(), CodecFailure>;

    /// Drop all stream state and start over with the same parameters.
    fn reset(&mut self) -> Result<(), CodecFailure>;
}

/// Factory for codec streams.
///
/// # Implementing a custom backend
///
/// ```no_run
/// use oxiflate::codec::{Codec, CodecBackend, CodecFailure, Direction, Format, Status, StreamParams};
///
/// struct Unavailable;
///
/// impl CodecBackend for Unavailable {
///     fn name(&self) -> &'static str { "unavailable" }
///     fn create(
///         &self,
///         _direction: Direction,
///         _format: Format,
///         _params: &StreamParams,
///     ) -> Result<Box<dyn Codec>, CodecFailure> {
///         Err(CodecFailure::new(Status::MemError))
///     }
/// }
/// ```
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(
        &self,
        direction: Direction,
        format: Format,
        params: &StreamParams,
    ) -> Result<Box<dyn Codec>, CodecFailure>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
