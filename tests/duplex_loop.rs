use dspsync::{Buffer, Channel, Clock, Runner};
use std::cell::Cell;
use std::io;
use std::rc::Rc;

/// Frame clock for the rig: `sleep` jumps straight to the deadline, so
/// a run takes no wall-clock time and the loop sees an ideal scheduler
/// unless a test injects extra delay.
#[derive(Clone)]
struct FakeClock {
    now: Rc<Cell<i64>>,
    sample_rate: Cell<u32>,
}

impl FakeClock {
    fn new(now: Rc<Cell<i64>>) -> Self {
        Self {
            now,
            sample_rate: Cell::new(48_000),
        }
    }
}

impl Clock for FakeClock {
    fn init(&mut self, sample_rate: u32) -> bool {
        self.sample_rate.set(sample_rate);
        true
    }

    fn now(&self) -> Option<i64> {
        Some(self.now.get())
    }

    fn sleep_until_frame(&self, frame: i64) -> bool {
        if frame > self.now.get() {
            self.now.set(frame);
        }
        true
    }

    fn frames_to_time(&self, frames: i64) -> i64 {
        frames * 1_000_000_000 / self.sample_rate.get().max(1) as i64
    }
}

/// Virtual device channel whose frame pointer tracks the fake clock,
/// optionally running a constant lead ahead of it. Capture hands out
/// frames as soon as the pointer passes them; playback consumes
/// through a bounded ring like a real DMA engine.
struct LoopbackChannel {
    input: bool,
    sample_rate: u32,
    stepping: i64,
    frame_size: usize,
    ring_frames: i64,
    lead: i64,
    mappable: bool,
    now: Rc<Cell<i64>>,
    position: i64,
    balance: i64,
    mapped: Rc<Cell<bool>>,
    started: Rc<Cell<bool>>,
    closed: Rc<Cell<bool>>,
    group: Cell<i32>,
}

impl LoopbackChannel {
    fn new(input: bool, now: Rc<Cell<i64>>) -> Self {
        Self {
            input,
            sample_rate: 48_000,
            stepping: 16,
            frame_size: 4,
            ring_frames: 2048,
            lead: 0,
            mappable: true,
            now,
            position: 0,
            balance: 0,
            mapped: Rc::new(Cell::new(false)),
            started: Rc::new(Cell::new(false)),
            closed: Rc::new(Cell::new(false)),
            group: Cell::new(-1),
        }
    }
}

impl Channel for LoopbackChannel {
    fn recording(&self) -> bool {
        self.input
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn stepping(&self) -> i64 {
        self.stepping
    }

    fn can_memory_map(&self) -> bool {
        self.mappable
    }

    fn memory_map(&mut self) -> bool {
        if !self.mappable {
            return false;
        }
        self.mapped.set(true);
        true
    }

    fn memory_unmap(&mut self) -> bool {
        self.mapped.set(false);
        true
    }

    fn add_to_sync_group(&mut self, id: i32) -> bool {
        self.group.set(id);
        true
    }

    fn start_sync_group(&mut self, id: i32) -> bool {
        if self.group.get() != id {
            return false;
        }
        self.started.set(true);
        true
    }

    fn transfer(
        &mut self,
        buffer: &mut Buffer,
        _end_frames: i64,
        sync_frames: i64,
    ) -> io::Result<()> {
        if self.closed.get() {
            return Err(io::Error::other("channel closed"));
        }
        let pointer = self.pointer();
        if self.input {
            let available = pointer - self.position;
            if available > 0 && !buffer.done() {
                let taken = buffer.advance(available as usize * self.frame_size);
                self.position += (taken / self.frame_size) as i64;
            }
        } else {
            let space = self.ring_frames - (self.position - pointer);
            if space > 0 && !buffer.done() {
                let taken = buffer.advance(space as usize * self.frame_size);
                self.position += (taken / self.frame_size) as i64;
            }
        }
        self.balance = pointer - sync_frames;
        Ok(())
    }

    fn wakeup_time(&self, remaining_frames: i64, _end_frames: i64) -> i64 {
        if self.input {
            self.position + remaining_frames - self.balance
        } else {
            self.position + remaining_frames - self.ring_frames - self.balance
        }
    }

    fn pointer(&self) -> i64 {
        self.now.get() + self.lead
    }

    fn balance(&self) -> i64 {
        self.balance
    }

    fn close(&mut self) {
        self.closed.set(true);
    }

    fn log_state(&self, _sync_frames: i64) {}
}

fn rig() -> (
    Runner<LoopbackChannel, LoopbackChannel, FakeClock>,
    Rc<Cell<i64>>,
) {
    let now = Rc::new(Cell::new(0_i64));
    let capture = LoopbackChannel::new(true, now.clone());
    let playback = LoopbackChannel::new(false, now.clone());
    let runner = Runner::new(capture, playback, FakeClock::new(now.clone()));
    (runner, now)
}

#[test]
fn steady_state_completes_exactly() {
    let (mut runner, _now) = rig();
    runner.read_write(1024, 4, false).expect("steady run");
    assert_eq!(runner.finished(), 4);
    assert_eq!(runner.gap_resets(), 0);
    assert_eq!(runner.capture_correction().correction(), 0);
    assert_eq!(runner.playback_correction().correction(), 0);
}

#[test]
fn zero_repetitions_returns_after_init() {
    let (mut runner, now) = rig();
    runner.read_write(1024, 0, false).expect("empty run");
    assert_eq!(runner.finished(), 0);
    assert_eq!(now.get(), 0);
}

#[test]
fn period_equal_to_stepping_makes_progress() {
    let (mut runner, now) = rig();
    runner.read_write(16, 8, false).expect("minimal period");
    assert_eq!(runner.finished(), 8);
    assert!(now.get() > 0);
}

#[test]
fn simulated_stall_resets_once_and_recovers() {
    let (mut runner, _now) = rig();
    runner.set_simulate_stalls(true);
    runner.read_write(1024, 16, true).expect("stalled run");
    assert_eq!(runner.finished(), 16);
    assert_eq!(runner.gap_resets(), 1);
    assert_eq!(runner.capture_correction().correction(), 0);
    assert_eq!(runner.playback_correction().correction(), 0);
}

#[test]
fn repeated_stalls_keep_recovering() {
    let (mut runner, _now) = rig();
    runner.set_simulate_stalls(true);
    runner.read_write(1024, 64, false).expect("long stalled run");
    assert_eq!(runner.finished(), 64);
    assert!(runner.gap_resets() >= 2);
}

#[test]
fn device_lead_beyond_loss_threshold_jumps_deadlines() {
    let now = Rc::new(Cell::new(0_i64));
    let mut capture = LoopbackChannel::new(true, now.clone());
    capture.lead = 200;
    let mut playback = LoopbackChannel::new(false, now.clone());
    playback.lead = 200;
    let mut runner = Runner::new(capture, playback, FakeClock::new(now));
    runner.read_write(1024, 8, false).expect("leading device");
    assert_eq!(runner.finished(), 8);
    assert_eq!(runner.gap_resets(), 0);
    assert_eq!(runner.capture_correction().correction(), -200);
    assert_eq!(runner.playback_correction().correction(), -200);
}

#[test]
fn sample_rate_mismatch_fails_before_queueing() {
    let now = Rc::new(Cell::new(0_i64));
    let mut capture = LoopbackChannel::new(true, now.clone());
    capture.sample_rate = 44_100;
    let playback = LoopbackChannel::new(false, now.clone());
    let started = playback.started.clone();
    let mut runner = Runner::new(capture, playback, FakeClock::new(now));
    let err = runner.read_write(1024, 4, false).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(runner.capture().period_end(), 0);
    assert_eq!(runner.playback().period_end(), 0);
    assert!(!started.get());
}

#[test]
fn stepping_mismatch_fails() {
    let now = Rc::new(Cell::new(0_i64));
    let capture = LoopbackChannel::new(true, now.clone());
    let mut playback = LoopbackChannel::new(false, now.clone());
    playback.stepping = 32;
    let mut runner = Runner::new(capture, playback, FakeClock::new(now));
    let err = runner.read_write(1024, 4, false).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

#[test]
fn capture_channel_in_wrong_mode_fails_immediately() {
    let now = Rc::new(Cell::new(0_i64));
    let capture = LoopbackChannel::new(false, now.clone());
    let playback = LoopbackChannel::new(false, now.clone());
    let started = playback.started.clone();
    let mut runner = Runner::new(capture, playback, FakeClock::new(now));
    let err = runner.read_write(1024, 4, false).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert!(!started.get());
    assert_eq!(runner.finished(), 0);
}

#[test]
fn memory_map_request_on_unmappable_channel_fails() {
    let now = Rc::new(Cell::new(0_i64));
    let mut capture = LoopbackChannel::new(true, now.clone());
    capture.mappable = false;
    let playback = LoopbackChannel::new(false, now.clone());
    let mut runner = Runner::new(capture, playback, FakeClock::new(now));
    let err = runner.read_write(1024, 4, true).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

#[test]
fn memory_map_is_released_on_completion() {
    let now = Rc::new(Cell::new(0_i64));
    let capture = LoopbackChannel::new(true, now.clone());
    let playback = LoopbackChannel::new(false, now.clone());
    let capture_mapped = capture.mapped.clone();
    let playback_mapped = playback.mapped.clone();
    let mut runner = Runner::new(capture, playback, FakeClock::new(now));
    runner.read_write(1024, 2, true).expect("mapped run");
    assert!(!capture_mapped.get());
    assert!(!playback_mapped.get());
}

#[test]
fn closed_channel_fails_the_run() {
    let now = Rc::new(Cell::new(0_i64));
    let capture = LoopbackChannel::new(true, now.clone());
    let playback = LoopbackChannel::new(false, now.clone());
    let closed = playback.closed.clone();
    closed.set(true);
    let mut runner = Runner::new(capture, playback, FakeClock::new(now));
    let err = runner.read_write(1024, 4, false).unwrap_err();
    assert_eq!(err.to_string(), "channel closed");
}
