//! Framing property tests.
//!
//! These exercise the decoder the way TCP exercises it: messages arrive split
//! at arbitrary points, down to one byte per read, or glued together in one
//! read. Whatever the chunking, every message must come out exactly once and
//! byte-for-byte intact.

use framelock_proto::{Frame, FrameDecoder, FrameHeader, MessageTag, ProtocolError, SyncPayload};
use hex_literal::hex;
use proptest::prelude::*;

const MAX_PAYLOAD: usize = 64 * 1024;

/// Feed `bytes` to a decoder in the given chunk sizes (cycled), collecting
/// every frame that pops out.
fn decode_chunked(bytes: &[u8], chunks: &[usize]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new(1, MAX_PAYLOAD);
    let mut frames = Vec::new();
    let mut offset = 0;
    let mut sizes = chunks.iter().cycle();

    while offset < bytes.len() {
        let size = (*sizes.next().unwrap()).max(1);
        let end = (offset + size).min(bytes.len());
        decoder.extend(&bytes[offset..end]);
        offset = end;

        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }
    }

    assert_eq!(decoder.buffered_len(), 0, "no trailing bytes after last message");
    frames
}

proptest! {
    #[test]
    fn roundtrip_under_arbitrary_chunking(
        payload in prop::collection::vec(any::<u8>(), 0..4096),
        chunks in prop::collection::vec(1usize..64, 1..16),
    ) {
        let frame = Frame::new(MessageTag::Sync, payload.clone()).unwrap();
        let frames = decode_chunked(&frame.to_bytes(), &chunks);

        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].payload().as_ref(), payload.as_slice());
    }

    #[test]
    fn roundtrip_one_byte_at_a_time(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let frame = Frame::new(MessageTag::Sync, payload.clone()).unwrap();
        let frames = decode_chunked(&frame.to_bytes(), &[1]);

        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].payload().as_ref(), payload.as_slice());
    }

    #[test]
    fn concatenated_messages_decode_in_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8),
        chunks in prop::collection::vec(1usize..512, 1..8),
    ) {
        let mut stream = Vec::new();
        for (index, state) in payloads.iter().enumerate() {
            let frame = Frame::sync(index as i32, state).unwrap();
            stream.extend_from_slice(&frame.to_bytes());
        }

        let frames = decode_chunked(&stream, &chunks);
        prop_assert_eq!(frames.len(), payloads.len());

        for (index, (frame, state)) in frames.iter().zip(&payloads).enumerate() {
            let sync = SyncPayload::parse(frame.payload()).unwrap();
            prop_assert_eq!(sync.frame_number, index as i32);
            prop_assert_eq!(sync.state.as_ref(), state.as_slice());
        }
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut decoder = FrameDecoder::new(0, 128);
        decoder.extend(&bytes);
        while let Ok(Some(_)) = decoder.decode() {}
    }
}

#[test]
fn two_messages_in_single_read_yield_two_frames() {
    let mut stream = Frame::sync(1, b"first").unwrap().to_bytes().to_vec();
    stream.extend_from_slice(&Frame::sync(2, b"second").unwrap().to_bytes());

    let frames = decode_chunked(&stream, &[stream.len()]);
    assert_eq!(frames.len(), 2);
    assert_eq!(SyncPayload::parse(frames[0].payload()).unwrap().state.as_ref(), b"first");
    assert_eq!(SyncPayload::parse(frames[1].payload()).unwrap().state.as_ref(), b"second");
}

#[test]
fn zero_length_payload_is_a_message() {
    let frames = decode_chunked(&Frame::new(MessageTag::Size, Vec::<u8>::new()).unwrap().to_bytes(), &[2]);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].payload().is_empty());
}

#[test]
fn crafted_huge_length_is_rejected() {
    let mut decoder = FrameDecoder::new(16, MAX_PAYLOAD);
    decoder.extend(&hex!("11 ffffff7f"));
    assert_eq!(
        decoder.decode(),
        Err(ProtocolError::PayloadTooLarge { size: i32::MAX as usize, max: MAX_PAYLOAD })
    );
}

#[test]
fn header_size_is_stable() {
    assert_eq!(FrameHeader::SIZE, 5);
}

#[test]
fn sync_wire_format() {
    let frame = Frame::sync(42, &[0x01, 0xFF]).unwrap();
    insta::assert_snapshot!(hex::encode(frame.to_bytes()), @"11060000002a00000001ff");
}

#[test]
fn control_wire_format() {
    insta::assert_snapshot!(hex::encode(Frame::size_hint(1024).to_bytes()), @"120400000000040000");
    insta::assert_snapshot!(hex::encode(Frame::connected().to_bytes()), @"1300000000");
    insta::assert_snapshot!(hex::encode(Frame::disconnect().to_bytes()), @"1400000000");
}
