#![no_main]
use libfuzzer_sys::fuzz_target;
use oxiflate::Mode;
use oxiflate::io::{TransformOptions, transform_bytes};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    if data.is_empty() {
        return;
    }
    let chunk_size = usize::from(data[0]) + 1;
    let payload = &data[1..];
    for mode in [Mode::AutoUnzip, Mode::Inflate, Mode::Gunzip, Mode::InflateRaw] {
        let mut opts = TransformOptions::new(mode);
        opts.chunk_size = chunk_size;
        let _ = transform_bytes(payload, &opts);
    }
});
