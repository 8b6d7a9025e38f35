//! Arbitrary bytes, split at an arbitrary point, through the stream decoder.
//!
//! Decoding must never panic, and every frame it yields must re-encode to
//! exactly the bytes it was decoded from.

#![no_main]

use framelock_proto::{FrameDecoder, FrameHeader};
use libfuzzer_sys::fuzz_target;

const MAX_PAYLOAD: usize = 1 << 16;

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(data.len());

    let mut decoder = FrameDecoder::new(1, MAX_PAYLOAD);
    let mut consumed = 0;

    for chunk in [&data[..split], &data[split..]] {
        decoder.extend(chunk);
        loop {
            match decoder.decode() {
                Ok(Some(frame)) => {
                    let encoded = frame.to_bytes();
                    assert_eq!(encoded.len(), FrameHeader::SIZE + frame.payload().len());
                    assert_eq!(&encoded[..], &data[consumed..consumed + encoded.len()]);
                    consumed += encoded.len();
                },
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
