// Maps a chunk outcome onto accept / stream error.

use crate::codec::{Flush, Status};
use crate::error::{StreamError, StreamErrorKind};

use super::chunk::ChunkOutcome;

/// Decide whether a processed chunk is acceptable.
///
/// `Ok`/`BufError` are benign unless the caller asked to `Finish` and the
/// codec left output space unused: that only happens when the input ended
/// before the stream did. This is deliberately conservative.
pub fn classify(outcome: &ChunkOutcome, flush: Flush, has_dictionary: bool) -> Result<(), StreamError> {
    let message = outcome.message.as_deref();
    match outcome.status {
        Status::Ok | Status::BufError => {
            if outcome.avail_out != 0 && flush == Flush::Finish {
                Err(StreamError::new(StreamErrorKind::UnexpectedEof, outcome.status, message))
            } else {
                Ok(())
            }
        }
        Status::StreamEnd => Ok(()),
        Status::NeedDict => {
            let kind = if has_dictionary {
                StreamErrorKind::BadDictionary
            } else {
                StreamErrorKind::MissingDictionary
            };
            Err(StreamError::new(kind, outcome.status, message))
        }
        other => Err(StreamError::new(StreamErrorKind::Codec, other, message)),
    }
}
