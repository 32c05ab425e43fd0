// Error taxonomy for sessions.
//
// - `UsageError` : precondition violations (integration bugs, never data)
// - `InitError`  : configuration-time failures reported by `Session::init`
// - `StreamError`: data/stream failures, delivered through the error sink
// - `SessionError`: union returned by the session entry points
// - `WriteRejected`: a refused async write, buffers handed back

use crate::codec::{CodecFailure, Flush, Status, Strategy};
use crate::session::{Mode, OwnedChunk};

/// A numeric parameter outside the range the codec accepts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {name}: {value} (expected {min}..={max})")]
pub struct InvalidParameter {
    pub name: &'static str,
    pub value: i64,
    pub min: i64,
    pub max: i64,
}

impl InvalidParameter {
    pub(crate) fn check(
        name: &'static str,
        value: i64,
        range: std::ops::RangeInclusive<i64>,
    ) -> Result<(), Self> {
        if range.contains(&value) {
            Ok(())
        } else {
            Err(Self {
                name,
                value,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Precondition violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("operation before init")]
    NotInitialized,
    #[error("session already initialized")]
    AlreadyInitialized,
    #[error("session already finalized")]
    Closed,
    #[error("session already closed")]
    AlreadyClosed,
    #[error("write already in progress")]
    WriteInProgress,
    #[error("close is pending")]
    ClosePending,
    #[error("{what} range {offset}+{len} exceeds buffer of {capacity} bytes")]
    OutOfBounds {
        what: &'static str,
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("invalid flush value {0}")]
    InvalidFlush(u32),
    #[error("invalid mode {0}")]
    InvalidMode(u32),
    #[error("invalid strategy {0}")]
    InvalidStrategy(i32),
    #[error(transparent)]
    Parameter(#[from] InvalidParameter),
}

impl TryFrom<u32> for Flush {
    type Error = UsageError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Flush::from_raw(raw).ok_or(UsageError::InvalidFlush(raw))
    }
}

impl TryFrom<u32> for Mode {
    type Error = UsageError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Mode::from_raw(raw).ok_or(UsageError::InvalidMode(raw))
    }
}

impl TryFrom<i32> for Strategy {
    type Error = UsageError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        Strategy::from_raw(raw).ok_or(UsageError::InvalidStrategy(raw))
    }
}

/// A chunk `Session::write` refused to queue, returned with the reason.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct WriteRejected {
    pub error: UsageError,
    /// The caller's buffers, untouched.
    pub chunk: OwnedChunk,
}

impl WriteRejected {
    pub fn into_chunk(self) -> OwnedChunk {
        self.chunk
    }
}

impl From<WriteRejected> for UsageError {
    fn from(rejected: WriteRejected) -> Self {
        rejected.error
    }
}

// ---------------------------------------------------------------------------
// Init failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("cannot initialize a session in mode {0:?}")]
    InvalidMode(Mode),
    #[error(transparent)]
    Parameter(#[from] InvalidParameter),
    #[error("codec initialization failed: {0}")]
    Codec(#[from] CodecFailure),
}

// ---------------------------------------------------------------------------
// Stream errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Finish requested while the codec still expects input.
    UnexpectedEof,
    /// The stream needs a dictionary and none is configured.
    MissingDictionary,
    /// A dictionary is configured but the stream rejects it.
    BadDictionary,
    /// Any other codec failure.
    Codec,
    DictionarySetup,
    Params,
    Reset,
}

impl StreamErrorKind {
    pub fn default_message(self) -> &'static str {
        match self {
            Self::UnexpectedEof => "unexpected end of file",
            Self::MissingDictionary => "Missing dictionary",
            Self::BadDictionary => "Bad dictionary",
            Self::Codec => "Zlib error",
            Self::DictionarySetup => "Failed to set dictionary",
            Self::Params => "Failed to set parameters",
            Self::Reset => "Failed to reset stream",
        }
    }
}

/// A data or stream failure, carrying the codec status that caused it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StreamError {
    pub kind: StreamErrorKind,
    /// zlib status code (see [`Status::code`]).
    pub code: i32,
    pub message: String,
}

impl StreamError {
    /// The codec's own message wins over the generic text when present.
    pub fn new(kind: StreamErrorKind, status: Status, codec_message: Option<&str>) -> Self {
        Self {
            kind,
            code: status.code(),
            message: codec_message
                .unwrap_or_else(|| kind.default_message())
                .to_owned(),
        }
    }

    pub(crate) fn from_failure(kind: StreamErrorKind, failure: &CodecFailure) -> Self {
        Self::new(kind, failure.status, failure.message.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Union
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("precondition violated: {0}")]
    Usage(#[from] UsageError),
    #[error("init failed: {0}")]
    Init(#[from] InitError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl From<WriteRejected> for SessionError {
    fn from(rejected: WriteRejected) -> Self {
        Self::Usage(rejected.error)
    }
}

impl SessionError {
    /// True for programmer errors, as opposed to data or resource failures.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn stream_kind(&self) -> Option<StreamErrorKind> {
        match self {
            Self::Stream(e) => Some(e.kind),
            _ => None,
        }
    }
}
