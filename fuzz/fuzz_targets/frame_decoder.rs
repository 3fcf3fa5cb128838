//! Fuzz target for `FrameDecoder`
//!
//! Feeds the same byte stream whole and in arbitrary chunks.
//!
//! # Invariants
//!
//! - Chunk boundaries never change which frames come out
//! - Nothing buffered ever exceeds the size limit

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stomp_proto::FrameDecoder;

#[derive(Debug, Arbitrary)]
struct Input {
    stream: Vec<u8>,
    chunk_sizes: Vec<u8>,
    max_frame_size: u16,
}

fn decode_all(max: usize, chunks: impl Iterator<Item = Vec<u8>>) -> Vec<Result<String, String>> {
    let mut decoder = FrameDecoder::with_max_frame_size(max);
    let mut out = Vec::new();
    for chunk in chunks {
        for byte in chunk {
            match decoder.decode_next_byte(byte) {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => {},
                Err(e) => out.push(Err(e.to_string())),
            }
            assert!(decoder.buffered() <= max);
        }
    }
    out
}

fuzz_target!(|input: Input| {
    let max = usize::from(input.max_frame_size).max(1);

    let whole = decode_all(max, std::iter::once(input.stream.clone()));

    let mut rest = input.stream.as_slice();
    let mut chunks = Vec::new();
    for size in input.chunk_sizes.iter().map(|&s| usize::from(s).max(1)) {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(size.min(rest.len()));
        chunks.push(head.to_vec());
        rest = tail;
    }
    chunks.push(rest.to_vec());

    let chunked = decode_all(max, chunks.into_iter());
    assert_eq!(whole, chunked);
});
