//! Blocking read loop.
//!
//! Reads whatever the socket has (up to one chunk), appends it to the
//! decoder and hands out every complete frame. Partial messages stay
//! buffered across reads; several messages in one read are handed out in
//! order.

use std::{
    io::{self, Read},
    ops::ControlFlow,
};

use framelock_proto::{Frame, FrameDecoder, ProtocolError};

/// Why a read loop ended.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Zero-byte read: the peer closed (or we shut the socket down)
    PeerClosed,
    /// Read error other than `Interrupted`
    Failed(io::Error),
    /// Stream no longer parses
    Protocol(ProtocolError),
    /// Frame handler asked to stop
    Stopped(String),
}

/// Read frames from `reader` until it ends or `on_frame` breaks.
///
/// `on_frame` also receives the decoder so it can apply size hints to the
/// receive buffer.
pub fn read_frames<R, F>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    chunk_size: usize,
    mut on_frame: F,
) -> ReadOutcome
where
    R: Read + ?Sized,
    F: FnMut(Frame, &mut FrameDecoder) -> ControlFlow<String>,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => return ReadOutcome::PeerClosed,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Failed(e),
        };
        decoder.extend(&chunk[..read]);

        loop {
            match decoder.decode() {
                Ok(Some(frame)) => {
                    if let ControlFlow::Break(reason) = on_frame(frame, decoder) {
                        return ReadOutcome::Stopped(reason);
                    }
                },
                Ok(None) => break,
                Err(e) => return ReadOutcome::Protocol(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use framelock_proto::MessageTag;
    use proptest::prelude::*;

    use super::*;

    /// Reader that fails with `Interrupted` before every real read.
    struct Flaky {
        inner: Cursor<Vec<u8>>,
        interrupt: bool,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    fn collect(bytes: Vec<u8>, chunk: usize) -> (Vec<Frame>, ReadOutcome) {
        let mut frames = Vec::new();
        let mut decoder = FrameDecoder::new(0, 1024);
        let outcome = read_frames(&mut Cursor::new(bytes), &mut decoder, chunk, |frame, _| {
            frames.push(frame);
            ControlFlow::Continue(())
        });
        (frames, outcome)
    }

    #[test]
    fn delivers_all_frames_then_reports_close() {
        let mut bytes = Frame::sync(1, b"a").unwrap().to_bytes().to_vec();
        bytes.extend_from_slice(&Frame::connected().to_bytes());

        let (frames, outcome) = collect(bytes, 3);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].tag(), MessageTag::Connected);
        assert!(matches!(outcome, ReadOutcome::PeerClosed));
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let bytes = Frame::sync(5, b"state").unwrap().to_bytes().to_vec();
        let mut reader = Flaky { inner: Cursor::new(bytes), interrupt: false };
        let mut decoder = FrameDecoder::new(0, 1024);
        let mut count = 0;

        let outcome = read_frames(&mut reader, &mut decoder, 2, |_, _| {
            count += 1;
            ControlFlow::Continue(())
        });

        assert_eq!(count, 1);
        assert!(matches!(outcome, ReadOutcome::PeerClosed));
    }

    #[test]
    fn oversized_header_ends_loop() {
        let (frames, outcome) = collect(vec![17, 0xFF, 0xFF, 0xFF, 0x7F, 1, 2, 3], 64);
        assert!(frames.is_empty());
        assert!(matches!(outcome, ReadOutcome::Protocol(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn handler_can_stop() {
        let mut bytes = Frame::disconnect().to_bytes().to_vec();
        bytes.extend_from_slice(&Frame::connected().to_bytes());
        let mut decoder = FrameDecoder::new(0, 1024);

        let outcome = read_frames(&mut Cursor::new(bytes), &mut decoder, 64, |frame, _| {
            assert_eq!(frame.tag(), MessageTag::Disconnect);
            ControlFlow::Break("bye".to_owned())
        });

        assert!(matches!(outcome, ReadOutcome::Stopped(reason) if reason == "bye"));
        assert_eq!(decoder.buffered_len(), 5, "second frame stays buffered");
    }

    proptest! {
        #[test]
        fn chunk_size_never_changes_what_is_delivered(
            states in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..12),
            chunk in 1usize..40,
        ) {
            let frames: Vec<Frame> = states
                .iter()
                .enumerate()
                .map(|(i, state)| Frame::sync(i as i32, state).unwrap())
                .collect();
            let bytes: Vec<u8> = frames.iter().flat_map(|frame| frame.to_bytes().to_vec()).collect();

            let (decoded, outcome) = collect(bytes, chunk);

            prop_assert_eq!(decoded, frames);
            prop_assert!(matches!(outcome, ReadOutcome::PeerClosed));
        }
    }
}
