// Per-session engine: configuration, single-in-flight dispatch, lifecycle.
//
// A `Session` is a cheap handle to core state driven from one control
// thread. Chunks run inline (`write_sync`) or on an `EventLoop` worker
// (`write`). For the worker path the codec-side `StreamState` travels to
// the pool together with the chunk buffers and comes back with the
// completion, so the codec is touched by one thread at a time without
// locks.
//
// Phases:
//
//   Created --init--> Idle --write--> Busy --completion--> Idle
//                      |               | close
//                      |               v
//                      |             Busy { close_pending } --completion--> Closing
//                      |                                                      |
//                      +--close--> Closed <------------ after the sinks ------+

pub mod chunk;
pub mod classify;
pub mod mode;

pub use chunk::{ChunkOutcome, StreamState};
pub use classify::classify;
pub use mode::{Detect, Magic, Mode, detect};

use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::codec::{
    CodecBackend, FlateBackend, Flush, LEVEL, Status, Strategy, StreamParams, dictionary_id,
};
use crate::error::{
    InitError, InvalidParameter, SessionError, StreamError, StreamErrorKind, UsageError, WriteRejected,
};
use crate::worker::EventLoop;

/// Invoked on the control thread after each successful asynchronous chunk.
/// The chunk's buffers are handed back for reuse.
pub type CompletionSink = Box<dyn FnMut(&Session, OwnedChunk)>;

/// Invoked on the control thread for every stream error.
pub type ErrorSink = Box<dyn FnMut(&Session, &StreamError)>;

// ---------------------------------------------------------------------------
// Result slot
// ---------------------------------------------------------------------------

/// Caller-owned counters, written once per successfully completed chunk.
///
/// Not meaningful while a chunk is in flight.
#[derive(Debug, Default)]
pub struct WriteResult {
    avail_out: Cell<usize>,
    avail_in: Cell<usize>,
}

impl WriteResult {
    pub fn new() -> Rc<Self> {
        Rc::default()
    }

    /// Output space left unused by the last chunk.
    pub fn avail_out(&self) -> usize {
        self.avail_out.get()
    }

    /// Input bytes left unconsumed by the last chunk.
    pub fn avail_in(&self) -> usize {
        self.avail_in.get()
    }

    fn store(&self, outcome: &ChunkOutcome) {
        self.avail_out.set(outcome.avail_out);
        self.avail_in.set(outcome.avail_in);
    }
}

// ---------------------------------------------------------------------------
// Init options
// ---------------------------------------------------------------------------

/// Everything `Session::init` accepts.
pub struct InitOptions {
    pub window_bits: u32,
    pub level: i32,
    pub mem_level: u32,
    pub strategy: Strategy,
    dictionary: Option<Vec<u8>>,
    result: Option<Rc<WriteResult>>,
    on_complete: Option<CompletionSink>,
    on_error: Option<ErrorSink>,
}

impl Default for InitOptions {
    fn default() -> Self {
        let params = StreamParams::default();
        Self {
            window_bits: params.window_bits,
            level: params.level,
            mem_level: params.mem_level,
            strategy: params.strategy,
            dictionary: None,
            result: None,
            on_complete: None,
            on_error: None,
        }
    }
}

impl InitOptions {
    pub fn with_window_bits(mut self, window_bits: u32) -> Self {
        self.window_bits = window_bits;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_mem_level(mut self, mem_level: u32) -> Self {
        self.mem_level = mem_level;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The bytes are copied; the session owns its dictionary until close.
    pub fn with_dictionary(mut self, dictionary: &[u8]) -> Self {
        self.dictionary = Some(dictionary.to_vec());
        self
    }

    pub fn with_result(mut self, result: Rc<WriteResult>) -> Self {
        self.result = Some(result);
        self
    }

    pub fn on_complete(mut self, sink: impl FnMut(&Session, OwnedChunk) + 'static) -> Self {
        self.on_complete = Some(Box::new(sink));
        self
    }

    pub fn on_error(mut self, sink: impl FnMut(&Session, &StreamError) + 'static) -> Self {
        self.on_error = Some(Box::new(sink));
        self
    }

    pub fn params(&self) -> StreamParams {
        StreamParams {
            window_bits: self.window_bits,
            level: self.level,
            mem_level: self.mem_level,
            strategy: self.strategy,
        }
    }
}

impl std::fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitOptions")
            .field("window_bits", &self.window_bits)
            .field("level", &self.level)
            .field("mem_level", &self.mem_level)
            .field("strategy", &self.strategy)
            .field("dictionary_len", &self.dictionary.as_ref().map(Vec::len))
            .field("result", &self.result.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

fn checked_range(
    what: &'static str,
    offset: usize,
    len: usize,
    capacity: usize,
) -> Result<Range<usize>, UsageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(offset..end),
        _ => Err(UsageError::OutOfBounds {
            what,
            offset,
            len,
            capacity,
        }),
    }
}

/// One synchronous processing request over borrowed buffers.
///
/// `input: None` means "flush only"; its offset and length are ignored.
#[derive(Debug)]
pub struct Chunk<'a> {
    pub flush: Flush,
    pub input: Option<&'a [u8]>,
    pub input_offset: usize,
    pub input_len: usize,
    pub output: &'a mut [u8],
    pub output_offset: usize,
    pub output_len: usize,
}

impl<'a> Chunk<'a> {
    pub fn new(flush: Flush, input: &'a [u8], output: &'a mut [u8]) -> Self {
        let (input_len, output_len) = (input.len(), output.len());
        Self {
            flush,
            input: Some(input),
            input_offset: 0,
            input_len,
            output,
            output_offset: 0,
            output_len,
        }
    }

    pub fn flush_only(flush: Flush, output: &'a mut [u8]) -> Self {
        let output_len = output.len();
        Self {
            flush,
            input: None,
            input_offset: 0,
            input_len: 0,
            output,
            output_offset: 0,
            output_len,
        }
    }

    pub fn with_input_range(mut self, offset: usize, len: usize) -> Self {
        self.input_offset = offset;
        self.input_len = len;
        self
    }

    pub fn with_output_range(mut self, offset: usize, len: usize) -> Self {
        self.output_offset = offset;
        self.output_len = len;
        self
    }

    fn ranges(&self) -> Result<(Range<usize>, Range<usize>), UsageError> {
        let input = match self.input {
            Some(buf) => checked_range("input", self.input_offset, self.input_len, buf.len())?,
            None => 0..0,
        };
        let output = checked_range("output", self.output_offset, self.output_len, self.output.len())?;
        Ok((input, output))
    }
}

/// One asynchronous processing request. The buffers travel to the worker
/// and are handed back through the completion sink.
#[derive(Debug, Clone, Default)]
pub struct OwnedChunk {
    pub flush: Flush,
    pub input: Option<Vec<u8>>,
    pub input_offset: usize,
    pub input_len: usize,
    pub output: Vec<u8>,
    pub output_offset: usize,
    pub output_len: usize,
}

impl OwnedChunk {
    pub fn new(flush: Flush, input: Vec<u8>, output: Vec<u8>) -> Self {
        Self {
            flush,
            input_len: input.len(),
            input: Some(input),
            input_offset: 0,
            output_len: output.len(),
            output,
            output_offset: 0,
        }
    }

    pub fn flush_only(flush: Flush, output: Vec<u8>) -> Self {
        Self {
            flush,
            output_len: output.len(),
            output,
            ..Default::default()
        }
    }

    pub fn with_input_range(mut self, offset: usize, len: usize) -> Self {
        self.input_offset = offset;
        self.input_len = len;
        self
    }

    pub fn with_output_range(mut self, offset: usize, len: usize) -> Self {
        self.output_offset = offset;
        self.output_len = len;
        self
    }

    fn ranges(&self) -> Result<(Range<usize>, Range<usize>), UsageError> {
        let input = match &self.input {
            Some(buf) => checked_range("input", self.input_offset, self.input_len, buf.len())?,
            None => 0..0,
        };
        let output = checked_range("output", self.output_offset, self.output_len, self.output.len())?;
        Ok((input, output))
    }
}

// ---------------------------------------------------------------------------
// Core state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Idle,
    Busy { close_pending: bool },
    /// Completion ran with a close pending; teardown follows the sinks.
    Closing,
    Closed,
}

/// Whether the engine is holding the session alive on its own account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Strong,
    Weak,
}

struct Core {
    mode: Mode,
    backend: Arc<dyn CodecBackend>,
    /// `None` before init, while the worker holds it, and after close.
    stream: Option<StreamState>,
    phase: Phase,
    refs: usize,
    pending_error: Status,
    magic_bytes: u8,
    has_dictionary: bool,
    result: Option<Rc<WriteResult>>,
    on_complete: Option<CompletionSink>,
    on_error: Option<ErrorSink>,
}

impl Core {
    fn writable(&self) -> Result<(), UsageError> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::Created => Err(UsageError::NotInitialized),
            Phase::Closed => Err(UsageError::Closed),
            Phase::Busy { close_pending: true } | Phase::Closing => Err(UsageError::ClosePending),
            Phase::Busy { close_pending: false } => Err(UsageError::WriteInProgress),
        }
    }

    fn reconfigurable(&self) -> Result<(), UsageError> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::Created => Err(UsageError::NotInitialized),
            Phase::Closed => Err(UsageError::Closed),
            Phase::Busy { .. } => Err(UsageError::WriteInProgress),
            Phase::Closing => Err(UsageError::ClosePending),
        }
    }

    fn take_stream(&mut self) -> Result<StreamState, UsageError> {
        self.stream.take().ok_or(UsageError::Closed)
    }

    fn restore(&mut self, stream: StreamState) {
        self.mode = stream.mode();
        self.pending_error = stream.pending_error();
        self.magic_bytes = stream.magic_bytes_read();
        self.has_dictionary = stream.has_dictionary();
        self.stream = Some(stream);
    }

    fn publish(&self, outcome: &ChunkOutcome) {
        if let Some(slot) = &self.result {
            slot.store(outcome);
        }
    }

    fn unref(&mut self) {
        self.refs = self.refs.saturating_sub(1);
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        debug_assert!(
            !matches!(self.phase, Phase::Busy { .. }),
            "session destroyed with a chunk in flight"
        );
        if matches!(self.phase, Phase::Idle | Phase::Closing) {
            debug!("{:?} session dropped while open, releasing codec", self.mode);
        }
    }
}

fn check_level(level: i32) -> Result<(), UsageError> {
    InvalidParameter::check(
        "level",
        level.into(),
        i64::from(*LEVEL.start())..=i64::from(*LEVEL.end()),
    )
    .map_err(UsageError::from)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle to one compression or decompression session.
///
/// Clones share the same session. All calls must come from the thread that
/// created it; worker threads only ever see the codec state.
#[derive(Clone)]
pub struct Session(Rc<RefCell<Core>>);

impl Session {
    /// An empty session using the flate2 backend.
    pub fn new(mode: Mode) -> Self {
        Self::with_backend(mode, Arc::new(FlateBackend))
    }

    pub fn with_backend(mode: Mode, backend: Arc<dyn CodecBackend>) -> Self {
        Self(Rc::new(RefCell::new(Core {
            mode,
            backend,
            stream: None,
            phase: Phase::Created,
            refs: 0,
            pending_error: Status::Ok,
            magic_bytes: 0,
            has_dictionary: false,
            result: None,
            on_complete: None,
            on_error: None,
        })))
    }

    /// Session from the numeric mode constant.
    pub fn from_raw_mode(raw: u32) -> Result<Self, UsageError> {
        Mode::try_from(raw).map(Self::new)
    }

    /// Configure the session. May be called once.
    ///
    /// On failure the copied dictionary is released and the session becomes
    /// unusable. A dictionary that the codec refuses at this point is not an
    /// init failure; it is reported through the error sink.
    pub fn init(&self, opts: InitOptions) -> Result<(), SessionError> {
        let preset = {
            let mut core = self.0.borrow_mut();
            match core.phase {
                Phase::Created => {}
                Phase::Closed => return Err(UsageError::Closed.into()),
                _ => return Err(UsageError::AlreadyInitialized.into()),
            }

            let mode = core.mode;
            let params = opts.params();
            let checked = if mode == Mode::Closed {
                Err(InitError::InvalidMode(mode))
            } else {
                params.validate().map_err(InitError::from)
            };
            let stream = checked.and_then(|()| {
                StreamState::open(mode, core.backend.clone(), params, opts.dictionary)
                    .map_err(InitError::from)
            });
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    debug!("{mode:?} init failed: {err}");
                    core.mode = Mode::Closed;
                    core.phase = Phase::Closed;
                    return Err(err.into());
                }
            };

            debug!(
                "init {mode:?}: window_bits={} level={} mem_level={} strategy={:?} dictionary={:?} backend={}",
                params.window_bits,
                params.level,
                params.mem_level,
                params.strategy,
                stream.dictionary().map(|d| (d.len(), format!("{:#010x}", dictionary_id(d)))),
                core.backend.name()
            );

            let preset = stream.install_preset_dictionary();
            core.restore(stream);
            core.phase = Phase::Idle;
            core.result = opts.result;
            core.on_complete = opts.on_complete;
            core.on_error = opts.on_error;
            preset
        };

        if let Err(failure) = preset {
            self.report(&StreamError::from_failure(StreamErrorKind::DictionarySetup, &failure));
        }
        Ok(())
    }

    /// Process one chunk on the calling thread.
    ///
    /// A stream error is delivered to the error sink and also returned.
    pub fn write_sync(&self, chunk: Chunk<'_>) -> Result<(), SessionError> {
        let verdict = {
            let mut core = self.0.borrow_mut();
            core.writable()?;
            let (in_range, out_range) = chunk.ranges()?;
            let mut stream = core.take_stream()?;
            core.refs += 1;

            stream.flush = chunk.flush;
            let input = chunk.input.map_or(&[][..], |buf| &buf[in_range]);
            let outcome = stream.process(input, &mut chunk.output[out_range]);
            let verdict = classify(&outcome, chunk.flush, stream.has_dictionary());

            core.restore(stream);
            if verdict.is_ok() {
                core.publish(&outcome);
            }
            core.unref();
            verdict
        };

        if let Err(err) = &verdict {
            self.report(err);
        }
        verdict.map_err(SessionError::from)
    }

    /// Submit one chunk to the event loop's worker pool.
    ///
    /// Returns once the chunk is queued. The outcome arrives through the
    /// completion or error sink when the loop is driven. A refused chunk is
    /// handed back inside the error.
    pub fn write(&self, lp: &EventLoop, chunk: OwnedChunk) -> Result<(), WriteRejected> {
        let (mut stream, in_range, out_range) = {
            let mut core = self.0.borrow_mut();
            let prepared = core
                .writable()
                .and_then(|()| chunk.ranges())
                .and_then(|ranges| Ok((core.take_stream()?, ranges)));
            let (mut stream, (in_range, out_range)) = match prepared {
                Ok(prepared) => prepared,
                Err(error) => return Err(WriteRejected { error, chunk }),
            };
            stream.flush = chunk.flush;
            core.phase = Phase::Busy {
                close_pending: false,
            };
            core.refs += 1;
            trace!(
                "{:?} chunk queued: flush={:?} in={} out={}",
                core.mode,
                chunk.flush,
                in_range.len(),
                out_range.len()
            );
            (stream, in_range, out_range)
        };

        let session = self.clone();
        let mut chunk = chunk;
        lp.queue_work(
            move || {
                let input = chunk.input.as_deref().map_or(&[][..], |buf| &buf[in_range]);
                let outcome = stream.process(input, &mut chunk.output[out_range]);
                (stream, chunk, outcome)
            },
            move |(stream, chunk, outcome)| session.complete(stream, chunk, outcome),
        );
        Ok(())
    }

    fn complete(&self, stream: StreamState, chunk: OwnedChunk, outcome: ChunkOutcome) {
        let verdict = {
            let mut core = self.0.borrow_mut();
            let verdict = classify(&outcome, stream.flush, stream.has_dictionary());
            core.restore(stream);
            verdict
        };

        match verdict {
            Ok(()) => {
                let sink = {
                    let mut core = self.0.borrow_mut();
                    core.publish(&outcome);
                    core.phase = match core.phase {
                        Phase::Busy {
                            close_pending: true,
                        } => Phase::Closing,
                        _ => Phase::Idle,
                    };
                    core.unref();
                    core.on_complete.take()
                };
                if let Some(mut sink) = sink {
                    sink(self, chunk);
                    let mut core = self.0.borrow_mut();
                    if core.on_complete.is_none() && core.phase != Phase::Closed {
                        core.on_complete = Some(sink);
                    }
                }
            }
            Err(err) => {
                // Still busy while the error sink runs.
                self.report(&err);
                let mut core = self.0.borrow_mut();
                core.phase = match core.phase {
                    Phase::Busy {
                        close_pending: true,
                    } => Phase::Closing,
                    Phase::Busy {
                        close_pending: false,
                    } => Phase::Idle,
                    other => other,
                };
                core.unref();
            }
        }

        let closing = self.0.borrow().phase == Phase::Closing;
        if closing {
            debug!("running deferred close");
            self.teardown();
        }
    }

    fn report(&self, err: &StreamError) {
        let sink = {
            let mut core = self.0.borrow_mut();
            warn!("{:?} stream error: {err} (code {})", core.mode, err.code);
            core.on_error.take()
        };
        if let Some(mut sink) = sink {
            sink(self, err);
            let mut core = self.0.borrow_mut();
            if core.on_error.is_none() && core.phase != Phase::Closed {
                core.on_error = Some(sink);
            }
        }
    }

    /// Change level and strategy of a zlib or raw deflate stream. Other
    /// modes accept and ignore the call.
    pub fn set_parameters(&self, level: i32, strategy: Strategy) -> Result<(), SessionError> {
        let result = {
            let mut core = self.0.borrow_mut();
            core.reconfigurable()?;
            check_level(level)?;
            let mut stream = core.take_stream()?;
            let result = stream.set_params(level, strategy);
            core.restore(stream);
            result
        };
        if let Err(err) = &result {
            self.report(err);
        }
        result.map_err(SessionError::from)
    }

    /// Fresh codec state with the same configuration; the dictionary is
    /// applied again where the mode presets it.
    pub fn reset(&self) -> Result<(), SessionError> {
        let result = {
            let mut core = self.0.borrow_mut();
            core.reconfigurable()?;
            let mut stream = core.take_stream()?;
            let result = stream.reset_stream();
            core.restore(stream);
            result
        };
        if let Err(err) = &result {
            self.report(err);
        }
        result.map_err(SessionError::from)
    }

    /// Release the codec and dictionary. Deferred while a chunk is in flight.
    pub fn close(&self) -> Result<(), UsageError> {
        {
            let mut core = self.0.borrow_mut();
            match core.phase {
                Phase::Created => return Err(UsageError::NotInitialized),
                Phase::Closed => return Err(UsageError::AlreadyClosed),
                Phase::Busy { .. } => {
                    core.phase = Phase::Busy {
                        close_pending: true,
                    };
                    debug!("{:?} close deferred until the in-flight chunk completes", core.mode);
                    return Ok(());
                }
                Phase::Idle | Phase::Closing => {}
            }
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&self) {
        // Dropped outside the borrow: sinks may own session handles.
        let released = {
            let mut core = self.0.borrow_mut();
            debug!("{:?} session closed", core.mode);
            core.mode = Mode::Closed;
            core.phase = Phase::Closed;
            core.has_dictionary = false;
            (core.stream.take(), core.on_complete.take(), core.on_error.take())
        };
        drop(released);
    }

    // -- queries -------------------------------------------------------------

    /// Current mode; `AutoUnzip` reports the resolved mode once decided.
    pub fn mode(&self) -> Mode {
        self.0.borrow().mode
    }

    pub fn is_initialized(&self) -> bool {
        self.0.borrow().phase != Phase::Created
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().phase == Phase::Closed
    }

    pub fn in_flight(&self) -> bool {
        matches!(self.0.borrow().phase, Phase::Busy { .. })
    }

    pub fn close_pending(&self) -> bool {
        matches!(
            self.0.borrow().phase,
            Phase::Busy {
                close_pending: true
            } | Phase::Closing
        )
    }

    pub fn ref_count(&self) -> usize {
        self.0.borrow().refs
    }

    pub fn liveness(&self) -> Liveness {
        if self.ref_count() > 0 {
            Liveness::Strong
        } else {
            Liveness::Weak
        }
    }

    /// Status of the most recent codec call.
    pub fn pending_error(&self) -> Status {
        self.0.borrow().pending_error
    }

    pub fn auto_detect_bytes_read(&self) -> u8 {
        self.0.borrow().magic_bytes
    }

    pub fn has_dictionary(&self) -> bool {
        self.0.borrow().has_dictionary
    }

    pub fn result(&self) -> Option<Rc<WriteResult>> {
        self.0.borrow().result.clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.0.borrow().backend.name()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.0.borrow();
        f.debug_struct("Session")
            .field("mode", &core.mode)
            .field("phase", &core.phase)
            .field("refs", &core.refs)
            .field("pending_error", &core.pending_error)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
