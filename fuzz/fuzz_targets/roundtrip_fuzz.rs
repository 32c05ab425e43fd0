#![no_main]
use libfuzzer_sys::fuzz_target;
use oxiflate::Mode;
use oxiflate::io::{Execution, TransformOptions, transform_bytes};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First two bytes pick the parameters.
    let flags = data[0];
    let chunk_size = usize::from(data[1]) + 1;
    let payload = &data[2..];

    let (compress, decompress) = match flags % 3 {
        0 => (Mode::Deflate, Mode::Inflate),
        1 => (Mode::Gzip, Mode::Gunzip),
        _ => (Mode::DeflateRaw, Mode::InflateRaw),
    };
    let mut opts = TransformOptions::new(compress);
    opts.level = i32::from((flags >> 2) % 11) - 1;
    opts.window_bits = 8 + u32::from((flags >> 4) % 8);
    opts.chunk_size = chunk_size;
    if flags & 0x80 != 0 {
        opts.execution = Execution::Async { threads: 1 };
    }

    let packed = transform_bytes(payload, &opts).unwrap();
    opts.mode = decompress;
    let unpacked = transform_bytes(&packed, &opts).unwrap();
    assert_eq!(unpacked, payload);

    if compress != Mode::DeflateRaw {
        opts.mode = Mode::AutoUnzip;
        assert_eq!(transform_bytes(&packed, &opts).unwrap(), payload);
    }
});
