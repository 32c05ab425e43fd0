// Default codec streams.
//
// Decompression runs on flate2's low-level `Decompress` (zlib-rs backend):
// window bits, gzip framing and dictionaries map onto it directly.
// Compression runs on a zlib-rs `z_stream` (see `deflate.rs`) so memory
// level, strategy, mid-stream parameter changes and `Z_BLOCK` all reach the
// codec.

use flate2::{Decompress, DecompressError, FlushDecompress};

use super::deflate::DeflateStream;
use super::{Codec, CodecBackend, CodecFailure, Direction, Flush, Format, Status, Step, StreamParams, Strategy};

/// flate2's smallest supported inflate window.
const MIN_FLATE_WINDOW_BITS: u32 = 9;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Default codec backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlateBackend;

impl CodecBackend for FlateBackend {
    fn name(&self) -> &'static str {
        "flate2"
    }

    fn create(
        &self,
        direction: Direction,
        format: Format,
        params: &StreamParams,
    ) -> Result<Box<dyn Codec>, CodecFailure> {
        Ok(Box::new(FlateCodec::new(direction, format, *params)?))
    }
}

// ---------------------------------------------------------------------------
// Codec stream
// ---------------------------------------------------------------------------

enum Engine {
    Deflate(DeflateStream),
    Inflate(Decompress),
}

/// A single compression or decompression stream.
pub struct FlateCodec {
    direction: Direction,
    format: Format,
    params: StreamParams,
    engine: Engine,
}

impl FlateCodec {
    pub fn new(direction: Direction, format: Format, params: StreamParams) -> Result<Self, CodecFailure> {
        let engine = build_engine(direction, format, &params)?;
        Ok(Self {
            direction,
            format,
            params,
            engine,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }
}

impl std::fmt::Debug for FlateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlateCodec")
            .field("direction", &self.direction)
            .field("format", &self.format)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

fn build_engine(direction: Direction, format: Format, params: &StreamParams) -> Result<Engine, CodecFailure> {
    match direction {
        Direction::Compress => DeflateStream::new(format, params).map(Engine::Deflate),
        Direction::Decompress => Ok(Engine::Inflate(build_inflate(format, params))),
    }
}

fn build_inflate(format: Format, params: &StreamParams) -> Decompress {
    // Clamped into flate2's accepted range, so the constructors cannot assert.
    let bits = params.window_bits.clamp(MIN_FLATE_WINDOW_BITS, 15) as u8;
    match format {
        Format::Zlib => Decompress::new_with_window_bits(true, bits),
        Format::Raw => Decompress::new_with_window_bits(false, bits),
        Format::Gzip => Decompress::new_gzip(bits),
    }
}

/// flate2 offers no `Z_BLOCK` or `Z_PARTIAL_FLUSH` for inflate; both run as
/// an ordinary call.
fn decompress_flush(flush: Flush) -> FlushDecompress {
    match flush {
        Flush::Sync | Flush::Full => FlushDecompress::Sync,
        Flush::Finish => FlushDecompress::Finish,
        Flush::None | Flush::Partial | Flush::Block => FlushDecompress::None,
    }
}

fn status_of(status: flate2::Status) -> Status {
    match status {
        flate2::Status::Ok => Status::Ok,
        flate2::Status::BufError => Status::BufError,
        flate2::Status::StreamEnd => Status::StreamEnd,
    }
}

fn decompress_failure(err: &DecompressError) -> CodecFailure {
    if err.needs_dictionary().is_some() {
        CodecFailure::new(Status::NeedDict)
    } else {
        CodecFailure {
            status: Status::DataError,
            message: err.message().map(str::to_owned),
        }
    }
}

fn delta(after: u64, before: u64) -> usize {
    usize::try_from(after.saturating_sub(before)).unwrap_or(usize::MAX)
}

impl Codec for FlateCodec {
    fn process(&mut self, input: &[u8], output: &mut [u8], flush: Flush) -> Step {
        match &mut self.engine {
            Engine::Deflate(c) => c.process(input, output, flush),
            Engine::Inflate(d) => {
                let (before_in, before_out) = (d.total_in(), d.total_out());
                let result = d.decompress(input, output, decompress_flush(flush));
                let consumed = delta(d.total_in(), before_in);
                let produced = delta(d.total_out(), before_out);
                match result {
                    Ok(status) => Step::new(status_of(status), consumed, produced),
                    Err(err) => {
                        let failure = decompress_failure(&err);
                        Step::new(failure.status, consumed, produced).with_message(failure.message)
                    }
                }
            }
        }
    }

    fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<(), CodecFailure> {
        match &mut self.engine {
            Engine::Deflate(c) => c.set_dictionary(dictionary),
            Engine::Inflate(d) => d.set_dictionary(dictionary).map(|_| ()).map_err(|e| {
                // A dictionary whose Adler-32 does not match the stream's id.
                if e.needs_dictionary().is_some() {
                    CodecFailure::new(Status::DataError)
                } else {
                    decompress_failure(&e)
                }
            }),
        }
    }

    fn set_params(&mut self, level: i32, strategy: Strategy) -> Result<(), CodecFailure> {
        match &mut self.engine {
            Engine::Deflate(c) => c.set_params(level, strategy)?,
            Engine::Inflate(_) => {}
        }
        self.params.level = level;
        self.params.strategy = strategy;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CodecFailure> {
        match &mut self.engine {
            Engine::Deflate(c) => c.reset(),
            // flate2's own reset forgets gzip framing.
            Engine::Inflate(d) => {
                *d = build_inflate(self.format, &self.params);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_end(codec: &mut dyn Codec, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        let mut pos = 0;
        loop {
            let step = codec.process(&input[pos..], &mut buf, Flush::Finish);
            pos += step.consumed;
            out.extend_from_slice(&buf[..step.produced]);
            match step.status {
                Status::StreamEnd => return out,
                Status::Ok | Status::BufError => {}
                other => panic!("unexpected status {other}"),
            }
        }
    }

    fn roundtrip(format: Format) {
        let data: Vec<u8> = b"flate codec roundtrip ".iter().copied().cycle().take(2000).collect();
        let params = StreamParams::default();
        let mut enc = FlateCodec::new(Direction::Compress, format, params).unwrap();
        let compressed = run_to_end(&mut enc, &data);
        assert!(compressed.len() < data.len());
        let mut dec = FlateCodec::new(Direction::Decompress, format, params).unwrap();
        assert_eq!(run_to_end(&mut dec, &compressed), data);
    }

    #[test]
    fn zlib_roundtrip() {
        roundtrip(Format::Zlib);
    }

    #[test]
    fn gzip_roundtrip() {
        roundtrip(Format::Gzip);
    }

    #[test]
    fn raw_roundtrip() {
        roundtrip(Format::Raw);
    }

    #[test]
    fn gzip_output_carries_magic() {
        let mut enc = FlateCodec::new(Direction::Compress, Format::Gzip, StreamParams::default()).unwrap();
        let out = run_to_end(&mut enc, b"magic");
        assert_eq!(&out[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn window_bits_eight_is_accepted() {
        let params = StreamParams {
            window_bits: 8,
            ..Default::default()
        };
        let mut enc = FlateCodec::new(Direction::Compress, Format::Raw, params).unwrap();
        let compressed = run_to_end(&mut enc, b"tiny window");
        let mut dec = FlateCodec::new(Direction::Decompress, Format::Raw, params).unwrap();
        assert_eq!(run_to_end(&mut dec, &compressed), b"tiny window");
    }

    #[test]
    fn zlib_stream_with_dictionary_reports_need_dict() {
        let dict = b"common prefix material";
        let mut enc = FlateCodec::new(Direction::Compress, Format::Zlib, StreamParams::default()).unwrap();
        enc.set_dictionary(dict).unwrap();
        let compressed = run_to_end(&mut enc, b"common prefix material again");

        let mut dec = FlateCodec::new(Direction::Decompress, Format::Zlib, StreamParams::default()).unwrap();
        let mut buf = [0u8; 128];
        let step = dec.process(&compressed, &mut buf, Flush::None);
        assert_eq!(step.status, Status::NeedDict);

        let wrong = dec.set_dictionary(b"something else entirely").unwrap_err();
        assert_eq!(wrong.status, Status::DataError);
    }

    #[test]
    fn corrupt_input_is_data_error() {
        let mut dec = FlateCodec::new(Direction::Decompress, Format::Zlib, StreamParams::default()).unwrap();
        let mut buf = [0u8; 16];
        let step = dec.process(&[0xff, 0xff, 0xff, 0xff], &mut buf, Flush::None);
        assert_eq!(step.status, Status::DataError);
    }

    #[test]
    fn reset_keeps_framing() {
        let mut enc = FlateCodec::new(Direction::Compress, Format::Gzip, StreamParams::default()).unwrap();
        let first = run_to_end(&mut enc, b"one");
        enc.reset().unwrap();
        let second = run_to_end(&mut enc, b"one");
        assert_eq!(&second[..2], &[0x1f, 0x8b]);
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn set_params_on_fresh_deflate() {
        let mut enc = FlateCodec::new(Direction::Compress, Format::Zlib, StreamParams::default()).unwrap();
        enc.set_params(1, Strategy::Default).unwrap();
        assert_eq!(enc.params().level, 1);
        let data = vec![7u8; 4096];
        let compressed = run_to_end(&mut enc, &data);
        let mut dec = FlateCodec::new(Direction::Decompress, Format::Zlib, StreamParams::default()).unwrap();
        assert_eq!(run_to_end(&mut dec, &compressed), data);
    }

    fn sample_text() -> Vec<u8> {
        (0..1500)
            .flat_map(|i| format!("record {i:05} carries the payload {} ", i % 37).into_bytes())
            .collect()
    }

    fn compress_with(params: StreamParams, data: &[u8]) -> Vec<u8> {
        let mut enc = FlateCodec::new(Direction::Compress, Format::Zlib, params).unwrap();
        let compressed = run_to_end(&mut enc, data);
        let mut dec = FlateCodec::new(Direction::Decompress, Format::Zlib, params).unwrap();
        assert_eq!(run_to_end(&mut dec, &compressed), data);
        compressed
    }

    fn feed(codec: &mut dyn Codec, input: &[u8], flush: Flush) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        let mut pos = 0;
        loop {
            let step = codec.process(&input[pos..], &mut buf, flush);
            pos += step.consumed;
            out.extend_from_slice(&buf[..step.produced]);
            assert!(matches!(step.status, Status::Ok | Status::BufError), "{}", step.status);
            if pos == input.len() && step.produced < buf.len() {
                return out;
            }
        }
    }

    #[test]
    fn strategy_and_mem_level_reach_the_stream() {
        let data = sample_text();
        let level9 = StreamParams {
            level: 9,
            ..Default::default()
        };
        let default = compress_with(level9, &data);
        let huffman = compress_with(
            StreamParams {
                strategy: Strategy::HuffmanOnly,
                ..level9
            },
            &data,
        );
        let rle = compress_with(
            StreamParams {
                strategy: Strategy::Rle,
                ..level9
            },
            &data,
        );
        let mem1 = compress_with(
            StreamParams {
                mem_level: 1,
                ..level9
            },
            &data,
        );

        assert_ne!(huffman, default);
        assert_ne!(rle, default);
        assert_ne!(mem1, default);
        // Without string matching, repetitive text compresses far worse.
        assert!(huffman.len() > default.len() * 2, "{} vs {}", huffman.len(), default.len());
    }

    #[test]
    fn mid_stream_strategy_change_applies_to_later_input() {
        let data = sample_text();
        let (head, tail) = data.split_at(data.len() / 2);
        let params = StreamParams {
            level: 9,
            ..Default::default()
        };

        let mut steady = FlateCodec::new(Direction::Compress, Format::Zlib, params).unwrap();
        let mut plain = feed(&mut steady, head, Flush::None);
        steady.set_params(9, Strategy::Default).unwrap();
        plain.extend(run_to_end(&mut steady, tail));

        let mut switched = FlateCodec::new(Direction::Compress, Format::Zlib, params).unwrap();
        let mut huffman = feed(&mut switched, head, Flush::None);
        switched.set_params(9, Strategy::HuffmanOnly).unwrap();
        assert_eq!(switched.params().strategy, Strategy::HuffmanOnly);
        huffman.extend(run_to_end(&mut switched, tail));

        assert!(huffman.len() > plain.len(), "{} vs {}", huffman.len(), plain.len());
        for compressed in [plain, huffman] {
            let mut dec = FlateCodec::new(Direction::Decompress, Format::Zlib, params).unwrap();
            assert_eq!(run_to_end(&mut dec, &compressed), data);
        }
    }

    #[test]
    fn flush_mapping_per_direction() {
        use libz_rs_sys as zlib;

        let table = [
            (Flush::None, zlib::Z_NO_FLUSH, FlushDecompress::None),
            (Flush::Partial, zlib::Z_PARTIAL_FLUSH, FlushDecompress::None),
            (Flush::Sync, zlib::Z_SYNC_FLUSH, FlushDecompress::Sync),
            (Flush::Full, zlib::Z_FULL_FLUSH, FlushDecompress::Sync),
            (Flush::Finish, zlib::Z_FINISH, FlushDecompress::Finish),
            (Flush::Block, zlib::Z_BLOCK, FlushDecompress::None),
        ];
        for (flush, deflate, inflate) in table {
            assert_eq!(super::super::deflate::flush_code(flush), deflate, "{flush:?}");
            assert_eq!(decompress_flush(flush), inflate, "{flush:?}");
        }
    }

    #[test]
    fn sync_and_block_flushes_emit_pending_data() {
        let params = StreamParams::default();
        let mut enc = FlateCodec::new(Direction::Compress, Format::Raw, params).unwrap();
        assert!(feed(&mut enc, b"held back", Flush::None).is_empty());
        let synced = feed(&mut enc, b"", Flush::Sync);
        assert!(synced.ends_with(&[0x00, 0x00, 0xff, 0xff]));

        let mut enc = FlateCodec::new(Direction::Compress, Format::Raw, params).unwrap();
        let mut stream = feed(&mut enc, b"block boundary", Flush::Block);
        assert!(!stream.is_empty());
        stream.extend(run_to_end(&mut enc, b""));

        // Partial and block flushes run as plain calls when inflating.
        let mut dec = FlateCodec::new(Direction::Decompress, Format::Raw, params).unwrap();
        let mut out = [0u8; 64];
        for flush in [Flush::Partial, Flush::Block] {
            assert_eq!(dec.process(&[], &mut out, flush).status, Status::BufError);
        }
        let step = dec.process(&stream, &mut out, Flush::Block);
        assert_eq!(&out[..step.produced], b"block boundary");
    }

    #[test]
    fn backend_creates_requested_stream() {
        let codec = FlateBackend
            .create(Direction::Decompress, Format::Gzip, &StreamParams::default());
        assert!(codec.is_ok());
        assert_eq!(FlateBackend.name(), "flate2");
    }
}
