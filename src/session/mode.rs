// Session modes and the gzip magic-number peek used by `Mode::AutoUnzip`.

use crate::codec::{Direction, Format};

pub const GZIP_MAGIC_1: u8 = 0x1f;
pub const GZIP_MAGIC_2: u8 = 0x8b;

/// What a session does with the bytes it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Deflate,
    Inflate,
    Gzip,
    Gunzip,
    DeflateRaw,
    InflateRaw,
    /// Decompress gzip or zlib data, decided from the first two input bytes.
    AutoUnzip,
    Closed,
}

impl Mode {
    /// Parse the numeric mode constant (`0` = closed/none, `1..=7` as above).
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Closed),
            1 => Some(Self::Deflate),
            2 => Some(Self::Inflate),
            3 => Some(Self::Gzip),
            4 => Some(Self::Gunzip),
            5 => Some(Self::DeflateRaw),
            6 => Some(Self::InflateRaw),
            7 => Some(Self::AutoUnzip),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::Closed => 0,
            Self::Deflate => 1,
            Self::Inflate => 2,
            Self::Gzip => 3,
            Self::Gunzip => 4,
            Self::DeflateRaw => 5,
            Self::InflateRaw => 6,
            Self::AutoUnzip => 7,
        }
    }

    pub fn is_compress(self) -> bool {
        matches!(self, Self::Deflate | Self::Gzip | Self::DeflateRaw)
    }

    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Deflate | Self::Gzip | Self::DeflateRaw => Some(Direction::Compress),
            Self::Inflate | Self::Gunzip | Self::InflateRaw | Self::AutoUnzip => {
                Some(Direction::Decompress)
            }
            Self::Closed => None,
        }
    }

    /// Framing the codec stream is created with. `AutoUnzip` starts out
    /// zlib-framed and is re-created gzip-framed if the magic matches.
    pub fn format(self) -> Option<Format> {
        match self {
            Self::Deflate | Self::Inflate | Self::AutoUnzip => Some(Format::Zlib),
            Self::Gzip | Self::Gunzip => Some(Format::Gzip),
            Self::DeflateRaw | Self::InflateRaw => Some(Format::Raw),
            Self::Closed => None,
        }
    }

    /// Modes that take the configured dictionary up front rather than on
    /// the codec's request.
    pub(crate) fn presets_dictionary(self) -> bool {
        matches!(self, Self::Deflate | Self::DeflateRaw | Self::InflateRaw)
    }
}

// ---------------------------------------------------------------------------
// Magic-number peek
// ---------------------------------------------------------------------------

/// Gzip magic bytes confirmed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Magic {
    #[default]
    None,
    First,
    Both,
}

impl Magic {
    pub fn bytes_read(self) -> u8 {
        match self {
            Self::None => 0,
            Self::First => 1,
            Self::Both => 2,
        }
    }
}

/// Result of feeding one peeked byte (or its absence) to [`detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detect {
    /// No byte to look at; nothing changes.
    Pending,
    /// Byte matched; keep peeking at the next one.
    Advance(Magic),
    /// Decision made; final for the life of the session.
    Resolved(Mode),
}

/// The auto-detect transition function.
pub fn detect(state: Magic, next: Option<u8>) -> Detect {
    match (state, next) {
        (Magic::Both, _) => Detect::Resolved(Mode::Gunzip),
        (_, None) => Detect::Pending,
        (Magic::None, Some(GZIP_MAGIC_1)) => Detect::Advance(Magic::First),
        (Magic::None, Some(_)) => Detect::Resolved(Mode::Inflate),
        (Magic::First, Some(GZIP_MAGIC_2)) => Detect::Resolved(Mode::Gunzip),
        (Magic::First, Some(_)) => Detect::Resolved(Mode::Inflate),
    }
}
