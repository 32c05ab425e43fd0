// Chunk processor: one write's worth of codec work.
//
// `StreamState` owns everything the codec touches (the codec stream, the
// dictionary, the auto-detect progress) so the whole value can be moved to a
// worker thread and back without locking. One `process` call:
//
//   1. resolves `AutoUnzip` from the leading magic bytes (may consume none)
//   2. runs the codec forward once
//   3. on `NeedDict`, installs the configured dictionary and retries once
//   4. in `Gunzip` mode, restarts the stream for each concatenated member
//   5. records the final status; the result slot is left to the caller

use std::sync::Arc;

use log::{debug, trace};

use crate::codec::{
    Codec, CodecBackend, CodecFailure, Direction, Flush, Format, Status, StreamParams, Strategy,
};
use crate::error::{StreamError, StreamErrorKind};

use super::mode::{self, Detect, Magic, Mode};

/// What one chunk left behind: final status and unused buffer space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub status: Status,
    /// Input bytes not consumed.
    pub avail_in: usize,
    /// Output bytes not written.
    pub avail_out: usize,
    /// Codec diagnostic from the last call, if any.
    pub message: Option<String>,
}

struct Cursor<'a> {
    input: &'a [u8],
    output: &'a mut [u8],
    in_pos: usize,
    out_pos: usize,
    message: Option<String>,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a [u8], output: &'a mut [u8]) -> Self {
        Self {
            input,
            output,
            in_pos: 0,
            out_pos: 0,
            message: None,
        }
    }

    fn next_byte(&self) -> Option<u8> {
        self.input.get(self.in_pos).copied()
    }

    fn avail_in(&self) -> usize {
        self.input.len() - self.in_pos
    }

    fn avail_out(&self) -> usize {
        self.output.len() - self.out_pos
    }
}

fn advance(codec: &mut dyn Codec, flush: Flush, cur: &mut Cursor<'_>) -> Status {
    let step = codec.process(&cur.input[cur.in_pos..], &mut cur.output[cur.out_pos..], flush);
    cur.in_pos = (cur.in_pos + step.consumed).min(cur.input.len());
    cur.out_pos = (cur.out_pos + step.produced).min(cur.output.len());
    cur.message = step.message;
    step.status
}

fn is_failure(status: Status) -> bool {
    !matches!(status, Status::Ok | Status::BufError | Status::StreamEnd)
}

// ---------------------------------------------------------------------------
// StreamState
// ---------------------------------------------------------------------------

/// Codec-side state of a session.
pub struct StreamState {
    mode: Mode,
    magic: Magic,
    /// Magic bytes consumed by an earlier chunk but not yet given to the codec.
    held: Vec<u8>,
    codec: Box<dyn Codec>,
    backend: Arc<dyn CodecBackend>,
    params: StreamParams,
    dictionary: Option<Vec<u8>>,
    pub(crate) flush: Flush,
    pending_error: Status,
}

impl StreamState {
    pub(crate) fn open(
        mode: Mode,
        backend: Arc<dyn CodecBackend>,
        params: StreamParams,
        dictionary: Option<Vec<u8>>,
    ) -> Result<Self, CodecFailure> {
        let (Some(direction), Some(format)) = (mode.direction(), mode.format()) else {
            return Err(CodecFailure::new(Status::StreamError));
        };
        let codec = backend.create(direction, format, &params)?;
        Ok(Self {
            mode,
            magic: Magic::None,
            held: Vec::new(),
            codec,
            backend,
            params,
            dictionary,
            flush: Flush::None,
            pending_error: Status::Ok,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn has_dictionary(&self) -> bool {
        self.dictionary.is_some()
    }

    pub fn dictionary(&self) -> Option<&[u8]> {
        self.dictionary.as_deref()
    }

    pub fn pending_error(&self) -> Status {
        self.pending_error
    }

    pub fn magic_bytes_read(&self) -> u8 {
        self.magic.bytes_read()
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Dictionary for modes that take it before any data.
    pub(crate) fn install_preset_dictionary(&mut self) -> Result<(), CodecFailure> {
        if !self.mode.presets_dictionary() {
            return Ok(());
        }
        match self.dictionary.as_deref() {
            Some(dict) => self.codec.set_dictionary(dict),
            None => Ok(()),
        }
    }

    /// Fresh codec state with the same parameters, dictionary re-applied.
    pub(crate) fn reset_stream(&mut self) -> Result<(), StreamError> {
        self.pending_error = Status::Ok;
        if self.mode == Mode::AutoUnzip {
            self.magic = Magic::None;
            self.held.clear();
        }
        self.codec
            .reset()
            .map_err(|f| StreamError::from_failure(StreamErrorKind::Reset, &f))?;
        self.install_preset_dictionary()
            .map_err(|f| StreamError::from_failure(StreamErrorKind::DictionarySetup, &f))
    }

    /// Only zlib and raw deflate streams take new parameters; every other
    /// mode ignores the call.
    pub(crate) fn set_params(&mut self, level: i32, strategy: Strategy) -> Result<(), StreamError> {
        self.pending_error = Status::Ok;
        if !matches!(self.mode, Mode::Deflate | Mode::DeflateRaw) {
            return Ok(());
        }
        match self.codec.set_params(level, strategy) {
            Ok(()) => {
                self.params.level = level;
                self.params.strategy = strategy;
                Ok(())
            }
            Err(f) if f.status == Status::BufError => Ok(()),
            Err(f) => {
                self.pending_error = f.status;
                Err(StreamError::from_failure(StreamErrorKind::Params, &f))
            }
        }
    }

    /// Run one chunk against the codec.
    pub fn process(&mut self, input: &[u8], output: &mut [u8]) -> ChunkOutcome {
        let mut cur = Cursor::new(input, output);
        let status = match self.mode {
            Mode::Deflate | Mode::Gzip | Mode::DeflateRaw => {
                advance(self.codec.as_mut(), self.flush, &mut cur)
            }
            Mode::Inflate | Mode::Gunzip | Mode::InflateRaw | Mode::AutoUnzip => self.inflate(&mut cur),
            Mode::Closed => Status::StreamError,
        };
        self.pending_error = status;
        trace!(
            "chunk {:?} flush={:?}: in {}/{} out {}/{} -> {status}",
            self.mode,
            self.flush,
            cur.in_pos,
            cur.input.len(),
            cur.out_pos,
            cur.output.len()
        );
        ChunkOutcome {
            status,
            avail_in: cur.avail_in(),
            avail_out: cur.avail_out(),
            message: cur.message,
        }
    }

    fn inflate(&mut self, cur: &mut Cursor<'_>) -> Status {
        if self.mode == Mode::AutoUnzip {
            if let Err(failure) = self.detect_format(cur) {
                cur.message = failure.message;
                return failure.status;
            }
            if self.mode == Mode::AutoUnzip {
                // Undecided: nothing reached the codec, so no progress.
                return Status::BufError;
            }
        }

        if !self.held.is_empty() {
            let status = self.replay_held(cur);
            if is_failure(status) {
                return status;
            }
            if !self.held.is_empty() {
                return Status::BufError;
            }
        }

        let mut status = advance(self.codec.as_mut(), self.flush, cur);

        // Raw inflate got its dictionary at init.
        if status == Status::NeedDict && self.mode != Mode::InflateRaw {
            if let Some(dict) = self.dictionary.as_deref() {
                status = match self.codec.set_dictionary(dict) {
                    Ok(()) => advance(self.codec.as_mut(), self.flush, cur),
                    // A mismatched dictionary reads as "needs a dictionary" so
                    // it is told apart from corrupt input.
                    Err(failure) if failure.status == Status::DataError => {
                        cur.message = None;
                        Status::NeedDict
                    }
                    Err(failure) => {
                        cur.message = failure.message;
                        failure.status
                    }
                };
            }
        }

        // Trailing zero bytes are padding, anything else starts a new member.
        while self.mode == Mode::Gunzip
            && status == Status::StreamEnd
            && cur.next_byte().is_some_and(|b| b != 0x00)
        {
            debug!(
                "gzip member ended with {} input bytes left, starting next member",
                cur.avail_in()
            );
            if let Err(failure) = self.restart_member() {
                cur.message = failure.message;
                status = failure.status;
                break;
            }
            status = advance(self.codec.as_mut(), self.flush, cur);
        }

        status
    }

    fn detect_format(&mut self, cur: &mut Cursor<'_>) -> Result<(), CodecFailure> {
        let start = cur.in_pos;
        let mut peek = start;
        loop {
            match mode::detect(self.magic, cur.input.get(peek).copied()) {
                Detect::Pending => {
                    // Input ran out mid-magic; keep the confirmed bytes for
                    // the codec once the format is known.
                    self.held.extend_from_slice(&cur.input[start..peek]);
                    cur.in_pos = peek;
                    return Ok(());
                }
                Detect::Advance(next) => {
                    self.magic = next;
                    peek += 1;
                }
                Detect::Resolved(mode) => return self.resolve(mode),
            }
        }
    }

    fn resolve(&mut self, mode: Mode) -> Result<(), CodecFailure> {
        if mode == Mode::Gunzip {
            // Nothing has been fed to the zlib-framed stream yet.
            self.codec = self
                .backend
                .create(Direction::Decompress, Format::Gzip, &self.params)?;
            self.magic = Magic::Both;
        }
        debug!("auto-detected {mode:?} stream");
        self.mode = mode;
        Ok(())
    }

    fn replay_held(&mut self, cur: &mut Cursor<'_>) -> Status {
        let held = std::mem::take(&mut self.held);
        let step = self
            .codec
            .process(&held, &mut cur.output[cur.out_pos..], Flush::None);
        cur.out_pos = (cur.out_pos + step.produced).min(cur.output.len());
        cur.message = step.message;
        if step.consumed < held.len() {
            self.held = held[step.consumed..].to_vec();
        }
        step.status
    }

    fn restart_member(&mut self) -> Result<(), CodecFailure> {
        self.codec.reset()?;
        self.install_preset_dictionary()
    }
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("mode", &self.mode)
            .field("magic", &self.magic)
            .field("backend", &self.backend.name())
            .field("params", &self.params)
            .field("dictionary_len", &self.dictionary.as_ref().map(Vec::len))
            .field("flush", &self.flush)
            .field("pending_error", &self.pending_error)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FlateBackend, Step};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted codec: replays queued steps and records every call.
    #[derive(Default)]
    struct Script {
        steps: VecDeque<Step>,
        dictionary_failure: Option<Status>,
        seen_inputs: Vec<Vec<u8>>,
        dictionaries: usize,
        resets: usize,
        created: Vec<Format>,
    }

    struct ScriptedBackend(Arc<Mutex<Script>>);

    struct ScriptedCodec(Arc<Mutex<Script>>);

    impl CodecBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn create(
            &self,
            _direction: Direction,
            format: Format,
            _params: &StreamParams,
        ) -> Result<Box<dyn Codec>, CodecFailure> {
            self.0.lock().unwrap().created.push(format);
            Ok(Box::new(ScriptedCodec(self.0.clone())))
        }
    }

    impl Codec for ScriptedCodec {
        fn process(&mut self, input: &[u8], _output: &mut [u8], _flush: Flush) -> Step {
            let mut s = self.0.lock().unwrap();
            s.seen_inputs.push(input.to_vec());
            let mut step = s
                .steps
                .pop_front()
                .unwrap_or_else(|| Step::new(Status::Ok, input.len(), 0));
            step.consumed = step.consumed.min(input.len());
            step
        }

        fn set_dictionary(&mut self, _dictionary: &[u8]) -> Result<(), CodecFailure> {
            let mut s = self.0.lock().unwrap();
            s.dictionaries += 1;
            match s.dictionary_failure {
                Some(Status::StreamError) => Err(CodecFailure::with_message(
                    Status::StreamError,
                    "dictionary rejected",
                )),
                Some(status) => Err(CodecFailure::new(status)),
                None => Ok(()),
            }
        }

        fn set_params(&mut self, _level: i32, _strategy: Strategy) -> Result<(), CodecFailure> {
            Ok(())
        }

        fn reset(&mut self) -> Result<(), CodecFailure> {
            self.0.lock().unwrap().resets += 1;
            Ok(())
        }
    }

    fn scripted(mode: Mode, dictionary: Option<Vec<u8>>, steps: Vec<Step>) -> (StreamState, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script {
            steps: steps.into(),
            ..Default::default()
        }));
        let state = StreamState::open(
            mode,
            Arc::new(ScriptedBackend(script.clone())),
            StreamParams::default(),
            dictionary,
        )
        .unwrap();
        (state, script)
    }

    #[test]
    fn stream_end_without_leftover_input_does_not_drain() {
        let (mut state, script) = scripted(Mode::Gunzip, None, vec![Step::new(Status::StreamEnd, 4, 2)]);
        let mut out = [0u8; 8];
        let outcome = state.process(&[1, 2, 3, 4], &mut out);
        assert_eq!(outcome.status, Status::StreamEnd);
        assert_eq!(outcome.avail_in, 0);
        assert_eq!(script.lock().unwrap().resets, 0);

        // Same terminal status again, still nothing to drain.
        script.lock().unwrap().steps.push_back(Step::new(Status::StreamEnd, 0, 0));
        let outcome = state.process(&[], &mut out);
        assert_eq!(outcome.status, Status::StreamEnd);
        assert_eq!(script.lock().unwrap().resets, 0);
    }

    #[test]
    fn concatenated_member_restarts_stream() {
        let (mut state, script) = scripted(
            Mode::Gunzip,
            None,
            vec![Step::new(Status::StreamEnd, 3, 1), Step::new(Status::StreamEnd, 3, 1)],
        );
        let mut out = [0u8; 8];
        let outcome = state.process(&[9, 9, 9, 7, 7, 7], &mut out);
        assert_eq!(outcome.status, Status::StreamEnd);
        assert_eq!(outcome.avail_in, 0);
        assert_eq!(outcome.avail_out, 6);
        let s = script.lock().unwrap();
        assert_eq!(s.resets, 1);
        assert_eq!(s.seen_inputs[1], vec![7, 7, 7]);
    }

    #[test]
    fn zero_padding_stops_drain() {
        let (mut state, script) = scripted(Mode::Gunzip, None, vec![Step::new(Status::StreamEnd, 2, 1)]);
        let mut out = [0u8; 8];
        let outcome = state.process(&[5, 5, 0, 0, 0], &mut out);
        assert_eq!(outcome.status, Status::StreamEnd);
        assert_eq!(outcome.avail_in, 3);
        assert_eq!(script.lock().unwrap().resets, 0);
    }

    #[test]
    fn inflate_mode_never_drains() {
        let (mut state, script) = scripted(Mode::Inflate, None, vec![Step::new(Status::StreamEnd, 2, 1)]);
        let mut out = [0u8; 8];
        let outcome = state.process(&[5, 5, 1, 1], &mut out);
        assert_eq!(outcome.avail_in, 2);
        assert_eq!(script.lock().unwrap().resets, 0);
    }

    #[test]
    fn need_dict_retries_once_with_dictionary() {
        let (mut state, script) = scripted(
            Mode::Inflate,
            Some(b"dict".to_vec()),
            vec![Step::new(Status::NeedDict, 6, 0), Step::new(Status::StreamEnd, 4, 3)],
        );
        let mut out = [0u8; 8];
        let outcome = state.process(&[0; 10], &mut out);
        assert_eq!(outcome.status, Status::StreamEnd);
        let s = script.lock().unwrap();
        assert_eq!(s.dictionaries, 1);
        assert_eq!(s.seen_inputs.len(), 2);
        assert_eq!(s.seen_inputs[1].len(), 4);
    }

    #[test]
    fn need_dict_without_dictionary_is_reported() {
        let (mut state, script) = scripted(Mode::Inflate, None, vec![Step::new(Status::NeedDict, 6, 0)]);
        let mut out = [0u8; 8];
        assert_eq!(state.process(&[0; 6], &mut out).status, Status::NeedDict);
        assert_eq!(script.lock().unwrap().dictionaries, 0);
    }

    #[test]
    fn failed_install_reports_need_dict() {
        let (mut state, script) = scripted(
            Mode::Inflate,
            Some(b"wrong".to_vec()),
            vec![Step::new(Status::NeedDict, 6, 0).with_message(Some("stale".into()))],
        );
        script.lock().unwrap().dictionary_failure = Some(Status::DataError);
        let mut out = [0u8; 8];
        let outcome = state.process(&[0; 6], &mut out);
        assert_eq!(outcome.status, Status::NeedDict);
        assert!(outcome.message.is_none());
        assert_eq!(script.lock().unwrap().seen_inputs.len(), 1);
    }

    #[test]
    fn install_failure_other_than_mismatch_keeps_its_status() {
        let (mut state, script) = scripted(
            Mode::Inflate,
            Some(b"dict".to_vec()),
            vec![Step::new(Status::NeedDict, 6, 0).with_message(Some("stale".into()))],
        );
        script.lock().unwrap().dictionary_failure = Some(Status::StreamError);
        let mut out = [0u8; 8];
        let outcome = state.process(&[0; 6], &mut out);
        assert_eq!(outcome.status, Status::StreamError);
        assert_eq!(outcome.message.as_deref(), Some("dictionary rejected"));
        assert_eq!(script.lock().unwrap().dictionaries, 1);

        let (mut state, script) = scripted(
            Mode::Gunzip,
            Some(b"dict".to_vec()),
            vec![Step::new(Status::NeedDict, 6, 0)],
        );
        script.lock().unwrap().dictionary_failure = Some(Status::MemError);
        let outcome = state.process(&[0; 6], &mut out);
        assert_eq!(outcome.status, Status::MemError);
        assert!(outcome.message.is_none());
    }

    #[test]
    fn inflate_raw_does_not_retry() {
        let (mut state, script) = scripted(
            Mode::InflateRaw,
            Some(b"dict".to_vec()),
            vec![Step::new(Status::NeedDict, 1, 0)],
        );
        let mut out = [0u8; 8];
        assert_eq!(state.process(&[0; 4], &mut out).status, Status::NeedDict);
        assert_eq!(script.lock().unwrap().dictionaries, 0);
    }

    #[test]
    fn auto_detect_gzip_in_one_chunk() {
        let (mut state, script) = scripted(Mode::AutoUnzip, None, vec![Step::new(Status::Ok, 4, 0)]);
        let mut out = [0u8; 8];
        state.process(&[0x1f, 0x8b, 8, 0], &mut out);
        assert_eq!(state.mode(), Mode::Gunzip);
        assert_eq!(state.magic_bytes_read(), 2);
        let s = script.lock().unwrap();
        assert_eq!(s.created, vec![Format::Zlib, Format::Gzip]);
        assert_eq!(s.seen_inputs[0], vec![0x1f, 0x8b, 8, 0]);
    }

    #[test]
    fn auto_detect_split_magic_replays_held_byte() {
        let (mut state, script) = scripted(Mode::AutoUnzip, None, Vec::new());
        let mut out = [0u8; 8];

        let first = state.process(&[0x1f], &mut out);
        assert_eq!(state.mode(), Mode::AutoUnzip);
        assert_eq!(state.magic_bytes_read(), 1);
        assert_eq!(first.avail_in, 0);
        assert_eq!(first.status, Status::BufError);
        assert!(script.lock().unwrap().seen_inputs.is_empty());

        state.process(&[0x8b, 8], &mut out);
        assert_eq!(state.mode(), Mode::Gunzip);
        let s = script.lock().unwrap();
        assert_eq!(s.seen_inputs, vec![vec![0x1f], vec![0x8b, 8]]);
    }

    #[test]
    fn auto_detect_empty_input_stays_undecided() {
        let (mut state, _script) = scripted(Mode::AutoUnzip, None, Vec::new());
        let mut out = [0u8; 8];
        let outcome = state.process(&[], &mut out);
        assert_eq!(outcome.status, Status::BufError);
        assert_eq!(state.mode(), Mode::AutoUnzip);
        assert_eq!(state.magic_bytes_read(), 0);
    }

    #[test]
    fn auto_detect_non_gzip_is_inflate() {
        let (mut state, script) = scripted(Mode::AutoUnzip, None, Vec::new());
        let mut out = [0u8; 8];
        state.process(&[0x78, 0x9c], &mut out);
        assert_eq!(state.mode(), Mode::Inflate);
        assert_eq!(script.lock().unwrap().created, vec![Format::Zlib]);
    }

    #[test]
    fn reset_reapplies_preset_dictionary() {
        let (mut state, script) = scripted(Mode::Deflate, Some(b"dict".to_vec()), Vec::new());
        state.install_preset_dictionary().unwrap();
        state.reset_stream().unwrap();
        let s = script.lock().unwrap();
        assert_eq!(s.resets, 1);
        assert_eq!(s.dictionaries, 2);
    }

    #[test]
    fn params_only_apply_to_deflate_modes() {
        let (mut state, _script) = scripted(Mode::Inflate, None, Vec::new());
        state.set_params(9, Strategy::Rle).unwrap();
        assert_eq!(state.params().level, StreamParams::default().level);

        let (mut state, _script) = scripted(Mode::Gzip, None, Vec::new());
        state.set_params(9, Strategy::Rle).unwrap();
        assert_eq!(state.params().level, StreamParams::default().level);

        let (mut state, _script) = scripted(Mode::DeflateRaw, None, Vec::new());
        state.set_params(9, Strategy::Rle).unwrap();
        assert_eq!(state.params().level, 9);
        assert_eq!(state.params().strategy, Strategy::Rle);
    }

    #[test]
    fn real_codec_gzip_then_zlib_detection() {
        use crate::codec::FlateCodec;

        let mut enc = FlateCodec::new(Direction::Compress, Format::Gzip, StreamParams::default()).unwrap();
        let mut gz = vec![0u8; 256];
        let step = enc.process(b"detect me", &mut gz, Flush::Finish);
        gz.truncate(step.produced);

        let mut state =
            StreamState::open(Mode::AutoUnzip, Arc::new(FlateBackend), StreamParams::default(), None).unwrap();
        let mut out = [0u8; 64];
        let outcome = state.process(&gz, &mut out);
        assert_eq!(outcome.status, Status::StreamEnd);
        assert_eq!(&out[..64 - outcome.avail_out], b"detect me");
    }
}
