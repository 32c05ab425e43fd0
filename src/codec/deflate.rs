// Deflate streams on zlib-rs's C API.
//
// flate2's `Compress` pins the memory level and strategy to zlib's defaults
// and has no `Z_BLOCK`. `deflateInit2_`, `deflateParams` and `deflate` from
// libz-rs-sys take all of them, so the compressing side is driven there.

use std::ffi::{CStr, c_int, c_uint};
use std::ptr;

use libz_rs_sys as zlib;

use super::{CodecFailure, Flush, Format, Status, Step, StreamParams, Strategy};

/// zlib raises a window of 8 to 9 itself, and only accepts 8 with a zlib
/// header; 9 works for every framing.
const MIN_DEFLATE_WINDOW_BITS: u32 = 9;

/// Output space lent to `deflateParams` for the block it flushes.
const PARAMS_FLUSH_CHUNK: usize = 4096;

/// One initialized deflate `z_stream`.
///
/// The stream is boxed so its address does not change while zlib holds
/// state for it. Output produced outside `process` (the block flushed by a
/// parameter change) is held and handed out ahead of the next chunk.
pub(crate) struct DeflateStream {
    strm: Box<zlib::z_stream>,
    held: Vec<u8>,
}

// SAFETY: the z_stream and its state are owned by this value and only
// touched through `&mut self`; zlib keeps no thread affinity for a stream.
unsafe impl Send for DeflateStream {}

impl DeflateStream {
    pub(crate) fn new(format: Format, params: &StreamParams) -> Result<Self, CodecFailure> {
        let bits = params.window_bits.clamp(MIN_DEFLATE_WINDOW_BITS, 15) as c_int;
        let window_bits = match format {
            Format::Zlib => bits,
            Format::Gzip => bits + 16,
            Format::Raw => -bits,
        };
        let mut strm = Box::new(zlib::z_stream::default());
        // SAFETY: `strm` is a fresh stream with no state attached, and the
        // version and size describe the z_stream this crate was built against.
        let rc = unsafe {
            zlib::deflateInit2_(
                &mut *strm,
                params.level,
                zlib::Z_DEFLATED,
                window_bits,
                params.mem_level as c_int,
                params.strategy.as_raw(),
                zlib::zlibVersion(),
                std::mem::size_of::<zlib::z_stream>() as c_int,
            )
        };
        if rc != zlib::Z_OK {
            return Err(CodecFailure {
                status: Status::from_code(rc),
                message: message_of(&strm),
            });
        }
        Ok(Self {
            strm,
            held: Vec::new(),
        })
    }

    pub(crate) fn process(&mut self, input: &[u8], output: &mut [u8], flush: Flush) -> Step {
        let handed = self.hand_out_held(output);
        if !self.held.is_empty() {
            return Step::new(Status::Ok, 0, handed);
        }
        let output = &mut output[handed..];

        let avail_in = clamp_len(input.len());
        let avail_out = clamp_len(output.len());
        let strm = &mut *self.strm;
        strm.msg = ptr::null_mut();
        strm.next_in = input.as_ptr();
        strm.avail_in = avail_in;
        strm.next_out = output.as_mut_ptr();
        strm.avail_out = avail_out;
        // SAFETY: next_in and next_out cover `avail_in` and `avail_out` bytes
        // of slices that outlive the call; both are detached right after.
        let rc = unsafe { zlib::deflate(strm, flush_code(flush)) };
        let consumed = (avail_in - strm.avail_in) as usize;
        let produced = (avail_out - strm.avail_out) as usize;
        self.detach();

        let status = Status::from_code(rc);
        let step = Step::new(status, consumed, handed + produced);
        match status {
            Status::Ok | Status::StreamEnd | Status::BufError => step,
            _ => step.with_message(message_of(&self.strm)),
        }
    }

    pub(crate) fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<(), CodecFailure> {
        let len = c_uint::try_from(dictionary.len())
            .map_err(|_| CodecFailure::with_message(Status::StreamError, "dictionary too large"))?;
        self.strm.msg = ptr::null_mut();
        // SAFETY: the pointer and length describe `dictionary`, which zlib
        // copies into its window before returning.
        let rc = unsafe { zlib::deflateSetDictionary(&mut *self.strm, dictionary.as_ptr(), len) };
        self.check(rc)
    }

    /// `deflateParams`. When the change needs the pending input flushed as a
    /// block, zlib writes that block into lent space; it is held for `process`.
    pub(crate) fn set_params(&mut self, level: i32, strategy: Strategy) -> Result<(), CodecFailure> {
        let mut scratch = vec![0u8; PARAMS_FLUSH_CHUNK];
        loop {
            let strm = &mut *self.strm;
            strm.msg = ptr::null_mut();
            strm.next_out = scratch.as_mut_ptr();
            strm.avail_out = PARAMS_FLUSH_CHUNK as c_uint;
            // SAFETY: next_out covers `scratch`, no input is attached.
            let rc = unsafe { zlib::deflateParams(strm, level, strategy.as_raw()) };
            let produced = PARAMS_FLUSH_CHUNK - strm.avail_out as usize;
            self.detach();
            self.held.extend_from_slice(&scratch[..produced]);

            // A full scratch buffer cut the flush short; lend it again.
            if rc == zlib::Z_BUF_ERROR && produced == PARAMS_FLUSH_CHUNK {
                continue;
            }
            return self.check(rc);
        }
    }

    /// `deflateReset`: framing, level, strategy and window are kept.
    pub(crate) fn reset(&mut self) -> Result<(), CodecFailure> {
        self.held.clear();
        self.strm.msg = ptr::null_mut();
        // SAFETY: the stream was initialized by `deflateInit2_`.
        let rc = unsafe { zlib::deflateReset(&mut *self.strm) };
        self.check(rc)
    }

    fn hand_out_held(&mut self, output: &mut [u8]) -> usize {
        let n = self.held.len().min(output.len());
        output[..n].copy_from_slice(&self.held[..n]);
        self.held.drain(..n);
        n
    }

    fn detach(&mut self) {
        let strm = &mut *self.strm;
        strm.next_in = ptr::null();
        strm.avail_in = 0;
        strm.next_out = ptr::null_mut();
        strm.avail_out = 0;
    }

    fn check(&self, rc: c_int) -> Result<(), CodecFailure> {
        if rc == zlib::Z_OK {
            Ok(())
        } else {
            Err(CodecFailure {
                status: Status::from_code(rc),
                message: message_of(&self.strm),
            })
        }
    }
}

impl Drop for DeflateStream {
    fn drop(&mut self) {
        // SAFETY: the stream was initialized by `deflateInit2_` and is ended
        // exactly once. A data error here only reports discarded output.
        let _ = unsafe { zlib::deflateEnd(&mut *self.strm) };
    }
}

/// zlib's flush constant for a compressing call.
pub(crate) fn flush_code(flush: Flush) -> c_int {
    match flush {
        Flush::None => zlib::Z_NO_FLUSH,
        Flush::Partial => zlib::Z_PARTIAL_FLUSH,
        Flush::Sync => zlib::Z_SYNC_FLUSH,
        Flush::Full => zlib::Z_FULL_FLUSH,
        Flush::Finish => zlib::Z_FINISH,
        Flush::Block => zlib::Z_BLOCK,
    }
}

fn clamp_len(len: usize) -> c_uint {
    c_uint::try_from(len).unwrap_or(c_uint::MAX)
}

fn message_of(strm: &zlib::z_stream) -> Option<String> {
    if strm.msg.is_null() {
        return None;
    }
    // SAFETY: zlib only stores pointers to static NUL-terminated strings.
    let msg = unsafe { CStr::from_ptr(strm.msg) };
    Some(msg.to_string_lossy().into_owned())
}
