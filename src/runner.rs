use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::clock::{Clock, FrameClock};
use crate::correction::Correction;
use crate::dev::{ReadChannel, WriteChannel};
use crate::double_buffer::DoubleBuffer;
use crate::options::RunOptions;
use std::io;
use tracing::{info, warn};

/// Frames the loop may fall behind both schedules before the drift
/// filter is abandoned and the buffer schedules are re-anchored.
const GAP_LIMIT: i64 = 1024;

/// Stall injection for the recovery path: every sleep landing in a
/// 1024-frame block with index 6 mod 7 is extended by eight blocks.
const STALL_BLOCK: i64 = 1024;
const STALL_FRAMES: i64 = 8 * STALL_BLOCK;

const SYNC_GROUP: i32 = 0;

/// Drives one capture and one playback schedule period by period
/// against a shared frame clock, absorbing jitter and sample-rate
/// drift by moving upcoming buffer deadlines.
#[derive(Debug)]
pub struct Runner<R: Channel, W: Channel, C: Clock> {
    capture: DoubleBuffer<R>,
    playback: DoubleBuffer<W>,
    clock: C,
    capture_correction: Correction,
    playback_correction: Correction,
    period: i64,
    sync_frames: i64,
    in_frames: i64,
    out_frames: i64,
    finished: u32,
    gap_resets: u32,
    mapped: bool,
    simulate_stalls: bool,
}

impl<R: Channel, W: Channel, C: Clock> Runner<R, W, C> {
    pub fn new(capture: R, playback: W, clock: C) -> Self {
        Self {
            capture: DoubleBuffer::new(capture),
            playback: DoubleBuffer::new(playback),
            clock,
            capture_correction: Correction::default(),
            playback_correction: Correction::default(),
            period: 0,
            sync_frames: 0,
            in_frames: 0,
            out_frames: 0,
            finished: 0,
            gap_resets: 0,
            mapped: false,
            simulate_stalls: false,
        }
    }

    pub fn set_simulate_stalls(&mut self, simulate: bool) {
        self.simulate_stalls = simulate;
    }

    pub fn capture(&self) -> &DoubleBuffer<R> {
        &self.capture
    }

    pub fn playback(&self) -> &DoubleBuffer<W> {
        &self.playback
    }

    pub fn capture_correction(&self) -> &Correction {
        &self.capture_correction
    }

    pub fn playback_correction(&self) -> &Correction {
        &self.playback_correction
    }

    /// Per-channel period completions so far.
    pub fn finished(&self) -> u32 {
        self.finished
    }

    pub fn gap_resets(&self) -> u32 {
        self.gap_resets
    }

    /// Run `repetitions` period completions (counted across both
    /// channels) of full-duplex I/O with `period`-frame buffers.
    pub fn read_write(&mut self, period: i64, repetitions: u32, memory_map: bool) -> io::Result<()> {
        self.start(period, memory_map)?;
        self.run(repetitions)?;
        if self.mapped {
            self.capture.memory_unmap();
            self.playback.memory_unmap();
            self.mapped = false;
        }
        Ok(())
    }

    fn start(&mut self, period: i64, memory_map: bool) -> io::Result<()> {
        if period <= 0 {
            return Err(config_error("period must be positive"));
        }
        if !self.capture.recording() {
            return Err(config_error("capture channel is not in record mode"));
        }
        if !self.playback.playback() {
            return Err(config_error("playback channel is not in playback mode"));
        }
        if memory_map {
            if !(self.capture.can_memory_map() && self.capture.memory_map()) {
                return Err(config_error("capture channel cannot be memory mapped"));
            }
            if !(self.playback.can_memory_map() && self.playback.memory_map()) {
                return Err(config_error("playback channel cannot be memory mapped"));
            }
            self.mapped = true;
        }
        if self.capture.sample_rate() != self.playback.sample_rate() {
            return Err(config_error("channel sample rates do not match"));
        }
        if self.capture.stepping() != self.playback.stepping() {
            return Err(config_error("channel stepping does not match"));
        }

        let frames = period as usize;
        for end in [period, 2 * period] {
            if !self
                .capture
                .set_buffer(Buffer::with_frames(frames, self.capture.frame_size()), end)
            {
                return Err(device_error("failed to queue capture buffer"));
            }
            if !self
                .playback
                .set_buffer(Buffer::with_frames(frames, self.playback.frame_size()), end)
            {
                return Err(device_error("failed to queue playback buffer"));
            }
        }
        self.capture_correction.set_drift_limit(64);
        self.playback_correction.set_drift_limit(64);

        if !self.capture.add_to_sync_group(SYNC_GROUP) {
            return Err(device_error("capture channel refused sync group"));
        }
        if !self.playback.add_to_sync_group(SYNC_GROUP) {
            return Err(device_error("playback channel refused sync group"));
        }
        if !self.capture.start_sync_group(SYNC_GROUP) {
            return Err(device_error("failed to start sync group"));
        }

        if !self.clock.init(self.capture.sample_rate()) {
            return Err(clock_error("frame clock init failed"));
        }

        self.period = period;
        self.sync_frames = 0;
        self.in_frames = 2 * period;
        self.out_frames = 2 * period;
        self.finished = 0;
        self.gap_resets = 0;
        Ok(())
    }

    fn run(&mut self, repetitions: u32) -> io::Result<()> {
        while self.finished < repetitions {
            self.process()?;
            self.complete()?;
            let gap = self.sleep()?;
            if gap > 0 {
                self.in_frames += gap;
                self.out_frames += gap;
            }
        }
        Ok(())
    }

    fn process(&mut self) -> io::Result<()> {
        if self.capture.wakeup_time(self.sync_frames) <= self.sync_frames {
            self.capture.process(self.sync_frames)?;
        }
        if self.playback.wakeup_time(self.sync_frames) <= self.sync_frames {
            self.playback.process(self.sync_frames)?;
        }
        self.capture.log_state(self.sync_frames);
        self.playback.log_state(self.sync_frames);
        Ok(())
    }

    fn complete(&mut self) -> io::Result<()> {
        if self.capture.finished(self.sync_frames) {
            let correction = self
                .capture_correction
                .correct(self.capture.balance(), 0);
            if self.sync_frames + self.period != self.capture.period_end() {
                info!(
                    sync_frames = self.sync_frames,
                    period_end = self.capture.period_end(),
                    "capture period completed off schedule"
                );
            }
            let mut buffer = self.capture.take_buffer();
            buffer.clear();
            self.in_frames += self.period;
            if !self.capture.set_buffer(buffer, self.in_frames + correction) {
                return Err(device_error("failed to requeue capture buffer"));
            }
            self.finished += 1;
        }
        if self.playback.finished(self.sync_frames) {
            let correction = self
                .playback_correction
                .correct(self.playback.balance(), 0);
            if self.sync_frames + self.period != self.playback.period_end() {
                info!(
                    sync_frames = self.sync_frames,
                    period_end = self.playback.period_end(),
                    "playback period completed off schedule"
                );
            }
            let mut buffer = self.playback.take_buffer();
            // The measurement loop plays silence; a production caller
            // would fill the next period here instead.
            buffer.clear();
            self.out_frames += self.period;
            if !self.playback.set_buffer(buffer, self.out_frames + correction) {
                return Err(device_error("failed to requeue playback buffer"));
            }
            self.finished += 1;
        }
        Ok(())
    }

    /// Advance the loop clock to the earlier of the two channels' next
    /// wakeups, realign after late wakeups, and re-anchor both
    /// schedules when the loop has fallen past them. Returns the gap
    /// applied to the schedules, zero in steady state.
    fn sleep(&mut self) -> io::Result<i64> {
        let wakeup = self
            .capture
            .wakeup_time(self.sync_frames)
            .min(self.playback.wakeup_time(self.sync_frames));
        if wakeup > self.sync_frames {
            if !self.clock.sleep_until_frame(wakeup + self.stall_delay(wakeup)) {
                return Err(clock_error("frame clock sleep failed"));
            }
            self.sync_frames = wakeup;
        }

        let now = self
            .clock
            .now()
            .ok_or_else(|| clock_error("frame clock read failed"))?;
        let sync_diff = now - self.sync_frames;
        let stepping = self.capture.stepping();
        if sync_diff > stepping {
            let catch_up = sync_diff - sync_diff % stepping;
            self.sync_frames += catch_up;
            info!(catch_up, sync_frames = self.sync_frames, "late wakeup");
        }

        let gap = (self.sync_frames - self.capture.period_end())
            .max(self.sync_frames - self.playback.period_end())
            .max(0);
        if gap > GAP_LIMIT {
            warn!(gap, sync_frames = self.sync_frames, "schedule gap, resetting buffers");
            self.capture.reset_buffers(self.capture.end_frames() + gap);
            self.playback.reset_buffers(self.playback.end_frames() + gap);
            self.gap_resets += 1;
            Ok(gap)
        } else {
            Ok(0)
        }
    }

    fn stall_delay(&self, wakeup: i64) -> i64 {
        if self.simulate_stalls && (wakeup / STALL_BLOCK) % 7 == 6 {
            STALL_FRAMES
        } else {
            0
        }
    }
}

fn config_error(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

fn device_error(message: &str) -> io::Error {
    io::Error::other(message)
}

fn clock_error(message: &str) -> io::Error {
    io::Error::other(message)
}

/// Production entry point: open both directions of the configured OSS
/// device and run the loop against the monotonic frame clock.
pub fn read_write(options: &RunOptions) -> io::Result<()> {
    let capture = ReadChannel::open(&options.device, options)?;
    let playback = WriteChannel::open(&options.device, options)?;
    let mut runner = Runner::new(capture, playback, FrameClock::new());
    runner.set_simulate_stalls(options.simulate_stalls);
    runner.read_write(options.period, options.repetitions, options.memory_map)
}
