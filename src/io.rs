// Stream and file helpers around `Session`.
//
// `transform_stream()` drives one session over a `Read`/`Write` pair with a
// fixed-size output buffer, either inline or through an `EventLoop`. The loop
// repeats a chunk while the output buffer comes back full, moves on to the
// next input block once the input is consumed, and ends the stream with
// `Flush::Finish` once the reader is exhausted. File helpers add buffered
// I/O. A SHA-256 of the output is computed on the fly when the `file-io`
// feature is enabled.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::rc::Rc;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::codec::{Direction, Flush, StreamParams, Strategy};
use crate::error::{SessionError, StreamError, UsageError, WriteRejected};
use crate::session::{Chunk, InitOptions, Mode, OwnedChunk, Session, WriteResult};
use crate::worker::{EventLoop, WorkerConfig, WorkerError};

/// Default output chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

// ---------------------------------------------------------------------------
// Options / stats
// ---------------------------------------------------------------------------

/// Where each chunk runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    #[default]
    Sync,
    /// On a worker pool; `threads == 0` picks one per core.
    Async { threads: usize },
}

/// Session configuration plus driver settings.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub mode: Mode,
    pub window_bits: u32,
    pub level: i32,
    pub mem_level: u32,
    pub strategy: Strategy,
    pub dictionary: Option<Vec<u8>>,
    /// Size of the input block and the output buffer.
    pub chunk_size: usize,
    pub execution: Execution,
}

impl TransformOptions {
    pub fn new(mode: Mode) -> Self {
        let params = StreamParams::default();
        Self {
            mode,
            window_bits: params.window_bits,
            level: params.level,
            mem_level: params.mem_level,
            strategy: params.strategy,
            dictionary: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            execution: Execution::Sync,
        }
    }

    fn init_options(&self) -> InitOptions {
        let opts = InitOptions::default()
            .with_window_bits(self.window_bits)
            .with_level(self.level)
            .with_mem_level(self.mem_level)
            .with_strategy(self.strategy);
        match &self.dictionary {
            Some(dict) => opts.with_dictionary(dict),
            None => opts,
        }
    }
}

/// Statistics returned by the transform helpers.
#[derive(Debug, Clone)]
pub struct TransformStats {
    /// Mode the stream ran in (the resolved one for `AutoUnzip`).
    pub mode: Mode,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Chunks submitted to the session.
    pub chunks: u64,
    /// SHA-256 of the output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

impl TransformStats {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            bytes_in: 0,
            bytes_out: 0,
            chunks: 0,
            output_sha256: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// The event loop went idle without delivering the chunk's outcome.
    #[error("chunk completion was not delivered")]
    Stalled,
}

impl From<UsageError> for IoError {
    fn from(e: UsageError) -> Self {
        Self::Session(e.into())
    }
}

impl From<WriteRejected> for IoError {
    fn from(e: WriteRejected) -> Self {
        Self::Session(e.into())
    }
}

impl From<StreamError> for IoError {
    fn from(e: StreamError) -> Self {
        Self::Session(e.into())
    }
}

// ---------------------------------------------------------------------------
// transform_stream
// ---------------------------------------------------------------------------

/// Run `reader` through a fresh session in `opts.mode`, writing to `writer`.
pub fn transform_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    opts: &TransformOptions,
) -> Result<TransformStats, IoError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let chunk_size = opts.chunk_size.max(1);
    let result = WriteResult::new();
    let session = Session::new(opts.mode);
    let mut stats = TransformStats::new(opts.mode);

    #[cfg(feature = "file-io")]
    let mut hasher = sha2::Sha256::new();

    let outcome = {
        #[cfg(feature = "file-io")]
        let mut out = HashingWriter {
            inner: &mut *writer,
            hasher: &mut hasher,
        };
        #[cfg(not(feature = "file-io"))]
        let mut out = &mut *writer;

        match opts.execution {
            Execution::Sync => session
                .init(opts.init_options().with_result(result.clone()))
                .map_err(IoError::from)
                .and_then(|()| drive_sync(&session, &result, reader, &mut out, chunk_size, &mut stats)),
            Execution::Async { threads } => {
                let lp = EventLoop::with_config(&WorkerConfig {
                    threads,
                    ..Default::default()
                })?;
                let delivered: Delivered = Rc::new(RefCell::new(None));
                let (on_done, on_fail) = (delivered.clone(), delivered.clone());
                let init = opts
                    .init_options()
                    .with_result(result.clone())
                    .on_complete(move |_, chunk| *on_done.borrow_mut() = Some(Ok(chunk)))
                    .on_error(move |_, err| *on_fail.borrow_mut() = Some(Err(err.clone())));
                session.init(init).map_err(IoError::from).and_then(|()| {
                    drive_async(
                        &session, &result, &lp, &delivered, reader, &mut out, chunk_size, &mut stats,
                    )
                })
            }
        }
    };

    stats.mode = session.mode();
    if session.is_initialized() && !session.is_closed() {
        session.close()?;
    }
    outcome?;
    writer.flush()?;

    #[cfg(feature = "file-io")]
    {
        stats.output_sha256 = Some(hasher.finalize().into());
    }

    Ok(stats)
}

/// Whole-buffer convenience wrapper around `transform_stream()`.
pub fn transform_bytes(data: &[u8], opts: &TransformOptions) -> Result<Vec<u8>, IoError> {
    let mut out = Vec::new();
    let mut reader = data;
    transform_stream(&mut reader, &mut out, opts)?;
    Ok(out)
}

type Delivered = Rc<RefCell<Option<Result<OwnedChunk, StreamError>>>>;

fn read_block<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn drive_sync<R, W>(
    session: &Session,
    result: &WriteResult,
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    stats: &mut TransformStats,
) -> Result<(), IoError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut input = vec![0u8; chunk_size];
    let mut output = vec![0u8; chunk_size];
    loop {
        let n = read_block(reader, &mut input)?;
        let flush = if n == 0 { Flush::Finish } else { Flush::None };
        stats.bytes_in += n as u64;

        let (mut offset, mut remaining) = (0, n);
        loop {
            session.write_sync(Chunk::new(flush, &input, &mut output).with_input_range(offset, remaining))?;
            let produced = chunk_size - result.avail_out();
            writer.write_all(&output[..produced])?;
            stats.bytes_out += produced as u64;
            stats.chunks += 1;

            offset += remaining - result.avail_in();
            remaining = result.avail_in();
            if result.avail_out() != 0 {
                break;
            }
        }

        if flush == Flush::Finish {
            return Ok(());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn drive_async<R, W>(
    session: &Session,
    result: &WriteResult,
    lp: &EventLoop,
    delivered: &Delivered,
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    stats: &mut TransformStats,
) -> Result<(), IoError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut chunk = OwnedChunk::new(Flush::None, vec![0u8; chunk_size], vec![0u8; chunk_size]);
    loop {
        let n = read_block(reader, chunk.input.get_or_insert_with(|| vec![0u8; chunk_size]))?;
        let flush = if n == 0 { Flush::Finish } else { Flush::None };
        stats.bytes_in += n as u64;
        chunk.flush = flush;
        chunk.input_offset = 0;
        chunk.input_len = n;

        loop {
            session.write(lp, chunk)?;
            lp.run();
            let outcome = delivered.borrow_mut().take();
            chunk = match outcome {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(IoError::Stalled),
            };

            let produced = chunk_size - result.avail_out();
            writer.write_all(&chunk.output[..produced])?;
            stats.bytes_out += produced as u64;
            stats.chunks += 1;

            chunk.input_offset += chunk.input_len - result.avail_in();
            chunk.input_len = result.avail_in();
            if result.avail_out() != 0 {
                break;
            }
        }

        if flush == Flush::Finish {
            return Ok(());
        }
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Transform `input_path` into `output_path` with buffered I/O.
pub fn transform_file(
    input_path: &Path,
    output_path: &Path,
    opts: &TransformOptions,
) -> Result<TransformStats, IoError> {
    let input = File::open(input_path)?;
    let mut reader = BufReader::with_capacity(BUF_SIZE, input);
    let output = File::create(output_path)?;
    let mut writer = BufWriter::with_capacity(BUF_SIZE, output);

    let stats = transform_stream(&mut reader, &mut writer, opts)?;
    writer.into_inner().map_err(|e| e.into_error())?;
    Ok(stats)
}

/// `transform_file()` restricted to compressing modes.
pub fn compress_file(
    input_path: &Path,
    output_path: &Path,
    opts: &TransformOptions,
) -> Result<TransformStats, IoError> {
    require_direction(opts.mode, Direction::Compress)?;
    transform_file(input_path, output_path, opts)
}

/// `transform_file()` restricted to decompressing modes.
pub fn decompress_file(
    input_path: &Path,
    output_path: &Path,
    opts: &TransformOptions,
) -> Result<TransformStats, IoError> {
    require_direction(opts.mode, Direction::Decompress)?;
    transform_file(input_path, output_path, opts)
}

fn require_direction(mode: Mode, direction: Direction) -> Result<(), IoError> {
    if mode.direction() == Some(direction) {
        Ok(())
    } else {
        Err(UsageError::InvalidMode(mode.as_raw()).into())
    }
}

// ---------------------------------------------------------------------------
// Hashing writer (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
struct HashingWriter<'a, W: Write + ?Sized> {
    inner: &'a mut W,
    hasher: &'a mut sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl<W: Write + ?Sized> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
