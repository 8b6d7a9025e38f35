//! Per-connection frame counters.
//!
//! Each connection carries one send counter and a double-buffered receive
//! counter:
//!
//! ```text
//! send      last frame number this side put on the wire
//! recv[0]   last frame number fully received and published
//! recv[1]   frame number currently being received
//! ```
//!
//! The authority increments `send` once per frame (modulo a ceiling). A
//! follower never invents frame numbers: its `send` is the frame it last
//! applied, echoed back as the acknowledgement. `compare_frames` is true
//! when the last published receive matches the last send, which on the
//! authority means "the peer acknowledged everything I sent".
//!
//! A follower with nothing applied yet holds [`NO_FRAME`] in every slot.
//! Frame numbers on the wire are never negative, so the first frame always
//! differs from it, including frame 0 right after the authority wrapped.

/// Follower counter value before any frame was applied
pub const NO_FRAME: i32 = -1;

/// Send/receive frame counter pair for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCounters {
    send: i32,
    recv: [i32; 2],
    ceiling: i32,
}

impl FrameCounters {
    /// Counters starting at zero that wrap at `ceiling`.
    ///
    /// A ceiling below 2 would make consecutive frames compare equal; it is
    /// clamped up to 2.
    pub fn new(ceiling: i32) -> Self {
        Self { send: 0, recv: [0, 0], ceiling: ceiling.max(2) }
    }

    /// Counters for one side of a connection; a follower starts at
    /// [`NO_FRAME`].
    pub fn for_side(ceiling: i32, is_server: bool) -> Self {
        let mut counters = Self::new(ceiling);
        counters.resynchronize(is_server);
        counters
    }

    /// Advance the send counter for the next outgoing sync message.
    ///
    /// Authority: `send = (send + 1) % ceiling`. Follower: `send = recv[0]`,
    /// i.e. acknowledge the frame that was just applied.
    pub fn iterate_frame_counter(&mut self, is_server: bool) -> i32 {
        self.send = if is_server { (self.send + 1) % self.ceiling } else { self.recv[0] };
        self.send
    }

    /// Whether the last published receive equals the last send.
    pub fn compare_frames(&self) -> bool {
        self.recv[0] == self.send
    }

    /// Record the frame number of a message being received.
    pub fn begin_receive(&mut self, frame_number: i32) {
        self.recv[1] = frame_number;
    }

    /// Publish the in-flight frame number (`recv[0] = recv[1]`).
    pub fn swap_frames(&mut self) {
        self.recv[0] = self.recv[1];
    }

    /// Reset for a new session.
    ///
    /// The authority starts complete (nothing outstanding) so a late joiner
    /// cannot stall the barrier on a frame it never saw. A follower forgets
    /// everything and waits for whatever frame number arrives first.
    pub fn resynchronize(&mut self, is_server: bool) {
        if is_server {
            self.recv = [self.send, self.send];
        } else {
            self.send = NO_FRAME;
            self.recv = [NO_FRAME, NO_FRAME];
        }
    }

    /// Whether a follower has applied any frame in this session.
    pub fn has_received(&self) -> bool {
        self.recv[0] != NO_FRAME
    }

    /// Last sent frame number
    pub fn send_frame(&self) -> i32 {
        self.send
    }

    /// `[published, in-flight]` receive frame numbers
    pub fn recv_frames(&self) -> [i32; 2] {
        self.recv
    }

    /// Wrap ceiling
    pub fn ceiling(&self) -> i32 {
        self.ceiling
    }
}

impl Default for FrameCounters {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn starts_in_sync() {
        let counters = FrameCounters::default();
        assert_eq!(counters.send_frame(), 0);
        assert_eq!(counters.recv_frames(), [0, 0]);
        assert!(counters.compare_frames());
    }

    #[test]
    fn authority_waits_until_ack_published() {
        let mut counters = FrameCounters::default();

        assert_eq!(counters.iterate_frame_counter(true), 1);
        assert!(!counters.compare_frames());

        counters.begin_receive(1);
        assert!(!counters.compare_frames(), "in-flight frame is not published yet");

        counters.swap_frames();
        assert!(counters.compare_frames());
    }

    #[test]
    fn follower_echoes_published_frame() {
        let mut counters = FrameCounters::default();

        counters.begin_receive(7);
        counters.swap_frames();
        assert!(!counters.compare_frames(), "new frame pending acknowledgement");

        assert_eq!(counters.iterate_frame_counter(false), 7);
        assert!(counters.compare_frames());
    }

    #[test]
    fn wraps_at_ceiling() {
        let mut counters = FrameCounters::new(3);
        let sequence: Vec<i32> = (0..6).map(|_| counters.iterate_frame_counter(true)).collect();
        assert_eq!(sequence, vec![1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn ceiling_is_clamped() {
        assert_eq!(FrameCounters::new(0).ceiling(), 2);
        assert_eq!(FrameCounters::new(1).ceiling(), 2);
    }

    #[test]
    fn resynchronize_authority_marks_complete() {
        let mut counters = FrameCounters::default();
        counters.iterate_frame_counter(true);
        counters.iterate_frame_counter(true);
        assert!(!counters.compare_frames());

        counters.resynchronize(true);
        assert_eq!(counters.send_frame(), 2);
        assert!(counters.compare_frames());
    }

    #[test]
    fn resynchronize_follower_starts_fresh() {
        let mut counters = FrameCounters::default();
        counters.begin_receive(40);
        counters.swap_frames();
        counters.iterate_frame_counter(false);

        counters.resynchronize(false);
        assert_eq!(counters.send_frame(), NO_FRAME);
        assert_eq!(counters.recv_frames(), [NO_FRAME, NO_FRAME]);
        assert!(counters.compare_frames(), "nothing pending before the first frame");
        assert!(!counters.has_received());
    }

    #[test]
    fn fresh_follower_sees_frame_zero_as_new() {
        let mut counters = FrameCounters::for_side(2, false);

        counters.begin_receive(0);
        counters.swap_frames();
        assert!(!counters.compare_frames(), "frame 0 after a wrap is still new data");

        assert_eq!(counters.iterate_frame_counter(false), 0);
        assert!(counters.compare_frames());
    }

    #[test]
    fn authority_side_starts_at_zero() {
        let counters = FrameCounters::for_side(10, true);
        assert_eq!(counters.send_frame(), 0);
        assert_eq!(counters.recv_frames(), [0, 0]);
    }

    proptest! {
        #[test]
        fn authority_counter_is_monotonic_modulo_ceiling(ceiling in 2i32..500, steps in 1usize..2000) {
            let mut counters = FrameCounters::new(ceiling);
            let mut previous = counters.send_frame();

            for _ in 0..steps {
                let next = counters.iterate_frame_counter(true);
                prop_assert!((0..ceiling).contains(&next));
                prop_assert_eq!(next, (previous + 1) % ceiling);
                previous = next;
            }
        }

        #[test]
        fn no_repeat_within_one_wrap(ceiling in 2i32..500) {
            let mut counters = FrameCounters::new(ceiling);
            let mut seen = std::collections::HashSet::new();

            for _ in 0..ceiling {
                prop_assert!(seen.insert(counters.iterate_frame_counter(true)));
            }
        }
    }
}
