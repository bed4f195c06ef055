use std::sync::Mutex;
use tailslo_client::{parse_frame, Frame, LineBuffer, StreamTracker};
use tailslo_common::{Clock, Completion};

// --- Test helpers ---

/// Clock that advances by one second on every reading.
struct SteppingClock(Mutex<f64>);

impl SteppingClock {
    fn starting_at(t: f64) -> Self {
        Self(Mutex::new(t))
    }
}

impl Clock for SteppingClock {
    fn now_s(&self) -> f64 {
        let mut t = self.0.lock().unwrap();
        *t += 1.0;
        *t
    }
}

// --- parse_frame ---

#[test]
fn test_parse_data_frame() {
    assert_eq!(parse_frame("data: {\"x\":1}"), Frame::Data("{\"x\":1}"));
    assert_eq!(parse_frame("data:{\"x\":1}"), Frame::Data("{\"x\":1}"));
    assert_eq!(parse_frame("data: opaque\r"), Frame::Data("opaque"));
}

#[test]
fn test_parse_done_sentinel() {
    assert_eq!(parse_frame("data: [DONE]"), Frame::Done);
    assert_eq!(parse_frame("data:[DONE]  \r"), Frame::Done);
}

#[test]
fn test_non_data_lines_are_ignored() {
    assert_eq!(parse_frame(""), Frame::Ignored);
    assert_eq!(parse_frame(": keep-alive"), Frame::Ignored);
    assert_eq!(parse_frame("event: message"), Frame::Ignored);
    assert_eq!(parse_frame("id: 42"), Frame::Ignored);
    assert_eq!(parse_frame("[DONE]"), Frame::Ignored);
}

// --- LineBuffer ---

#[test]
fn test_line_buffer_reassembles_split_chunks() {
    let mut buf = LineBuffer::default();
    buf.push(b"data: he");
    assert_eq!(buf.next_line(), None);
    buf.push(b"llo\n\ndata: [DO");
    assert_eq!(buf.next_line().as_deref(), Some("data: hello"));
    assert_eq!(buf.next_line().as_deref(), Some(""));
    assert_eq!(buf.next_line(), None);
    buf.push(b"NE]\n");
    assert_eq!(buf.next_line().as_deref(), Some("data: [DONE]"));
    assert_eq!(buf.finish(), None);
}

#[test]
fn test_line_buffer_finish_returns_unterminated_tail() {
    let mut buf = LineBuffer::default();
    buf.push(b"data: tail");
    assert_eq!(buf.next_line(), None);
    assert_eq!(buf.finish().as_deref(), Some("data: tail"));
    assert_eq!(buf.finish(), None);
}

// --- StreamTracker ---

#[test]
fn test_first_ts_latches_once() {
    let clock = SteppingClock::starting_at(100.0);
    let mut tracker = StreamTracker::new(&clock);
    assert!(!tracker.observe(": comment"));
    assert!(!tracker.observe("data: a")); // first_ts = 101
    assert!(!tracker.observe("data: b"));
    assert!(!tracker.observe("data: c"));
    assert!(tracker.observe("data: [DONE]")); // last_ts = 102

    let record = tracker.finish(3, 100.0);
    assert_eq!(record.req_id, 3);
    assert_eq!(record.first_ts, 101.0);
    assert_eq!(record.last_ts, 102.0);
    assert_eq!(record.completion, Completion::Sentinel);
    assert!(record.ttft_s() <= record.e2e_s());
}

#[test]
fn test_frames_after_sentinel_are_ignored() {
    let clock = SteppingClock::starting_at(0.0);
    let mut tracker = StreamTracker::new(&clock);
    assert!(tracker.observe("data: [DONE]"));
    assert!(tracker.observe("data: late"));
    let record = tracker.finish(0, 0.0);
    assert_eq!(record.last_ts, 1.0);
    assert_eq!(record.first_ts, record.last_ts);
}

#[test]
fn test_missing_sentinel_defaults_last_ts_to_stream_end() {
    let clock = SteppingClock::starting_at(0.0);
    let mut tracker = StreamTracker::new(&clock);
    tracker.observe("data: a"); // first_ts = 1
    let record = tracker.finish(1, 0.0); // last_ts = 2
    assert_eq!(record.first_ts, 1.0);
    assert_eq!(record.last_ts, 2.0);
    assert_eq!(record.completion, Completion::Eof);
}

#[test]
fn test_no_data_frames_sets_first_ts_to_last_ts() {
    let clock = SteppingClock::starting_at(0.0);
    let mut tracker = StreamTracker::new(&clock);
    tracker.observe("event: ping");
    assert!(tracker.observe("data: [DONE]"));
    let record = tracker.finish(2, 0.0);
    assert_eq!(record.first_ts, record.last_ts);
    assert_eq!(record.ttft_s(), record.e2e_s());
}
