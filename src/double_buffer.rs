use crate::buffer::Buffer;
use crate::channel::Channel;
use std::io;

#[derive(Debug)]
struct Slot {
    buffer: Buffer,
    end_frames: i64,
}

/// Two-slot schedule in front of a channel: one buffer in flight with
/// the device, a second queued behind it. Each slot carries the
/// absolute frame at which its last sample lands.
#[derive(Debug)]
pub struct DoubleBuffer<C: Channel> {
    chan: C,
    front: Option<Slot>,
    back: Option<Slot>,
}

impl<C: Channel> DoubleBuffer<C> {
    pub fn new(chan: C) -> Self {
        Self {
            chan,
            front: None,
            back: None,
        }
    }

    /// Enqueue a buffer with its deadline. Fails when both slots are
    /// occupied.
    pub fn set_buffer(&mut self, buffer: Buffer, end_frames: i64) -> bool {
        let slot = Slot { buffer, end_frames };
        if self.front.is_none() {
            self.front = Some(slot);
            true
        } else if self.back.is_none() {
            self.back = Some(slot);
            true
        } else {
            false
        }
    }

    /// True when the front slot's deadline has passed and the device
    /// has transferred all of its frames.
    pub fn finished(&self, sync_frames: i64) -> bool {
        match &self.front {
            Some(front) => front.end_frames <= sync_frames && front.buffer.done(),
            None => false,
        }
    }

    /// Dequeue the front slot and promote the queued one.
    pub fn take_buffer(&mut self) -> Buffer {
        let front = self.front.take();
        self.front = self.back.take();
        front.map(|slot| slot.buffer).unwrap_or_default()
    }

    /// Deadline of the furthest queued slot.
    pub fn period_end(&self) -> i64 {
        self.back
            .as_ref()
            .or(self.front.as_ref())
            .map(|slot| slot.end_frames)
            .unwrap_or(0)
    }

    /// Deadline of the front slot; the anchor for `reset_buffers`.
    pub fn end_frames(&self) -> i64 {
        self.front.as_ref().map(|slot| slot.end_frames).unwrap_or(0)
    }

    /// Next frame instant at which `process` has work to do: the front
    /// deadline once its buffer is full, otherwise the instant the
    /// device can take the rest.
    pub fn wakeup_time(&self, _sync_frames: i64) -> i64 {
        match &self.front {
            Some(front) if front.buffer.done() => front.end_frames,
            Some(front) => self
                .chan
                .wakeup_time(front.buffer.remaining_frames(), front.end_frames),
            None => i64::MAX,
        }
    }

    /// Transfer whatever the device accepts right now, at most the two
    /// queued slots. Spills into the back slot once the front fills.
    pub fn process(&mut self, sync_frames: i64) -> io::Result<()> {
        let mut front_done = false;
        if let Some(front) = self.front.as_mut() {
            self.chan
                .transfer(&mut front.buffer, front.end_frames, sync_frames)?;
            front_done = front.buffer.done();
        }
        if front_done {
            if let Some(back) = self.back.as_mut() {
                self.chan
                    .transfer(&mut back.buffer, back.end_frames, sync_frames)?;
            }
        }
        Ok(())
    }

    /// Discard the current schedule after a gap: zero both buffers and
    /// re-anchor the deadlines at `end_frames` and one period later.
    pub fn reset_buffers(&mut self, end_frames: i64) {
        if let Some(front) = self.front.as_mut() {
            front.buffer.clear();
            front.end_frames = end_frames;
        }
        if let Some(back) = self.back.as_mut() {
            back.buffer.clear();
            back.end_frames = end_frames + back.buffer.frames();
        }
    }

    pub fn balance(&self) -> i64 {
        self.chan.balance()
    }

    pub fn recording(&self) -> bool {
        self.chan.recording()
    }

    pub fn playback(&self) -> bool {
        self.chan.playback()
    }

    pub fn sample_rate(&self) -> u32 {
        self.chan.sample_rate()
    }

    pub fn frame_size(&self) -> usize {
        self.chan.frame_size()
    }

    pub fn stepping(&self) -> i64 {
        self.chan.stepping()
    }

    pub fn can_memory_map(&self) -> bool {
        self.chan.can_memory_map()
    }

    pub fn memory_map(&mut self) -> bool {
        self.chan.memory_map()
    }

    pub fn memory_unmap(&mut self) -> bool {
        self.chan.memory_unmap()
    }

    pub fn add_to_sync_group(&mut self, id: i32) -> bool {
        self.chan.add_to_sync_group(id)
    }

    pub fn start_sync_group(&mut self, id: i32) -> bool {
        self.chan.start_sync_group(id)
    }

    pub fn close(&mut self) {
        self.chan.close();
    }

    pub fn log_state(&self, sync_frames: i64) {
        self.chan.log_state(sync_frames);
        tracing::trace!(
            recording = self.chan.recording(),
            sync_frames,
            front_end = self.end_frames(),
            front_remaining = self
                .front
                .as_ref()
                .map(|slot| slot.buffer.remaining_frames())
                .unwrap_or(0),
            period_end = self.period_end(),
            balance = self.chan.balance(),
            "schedule"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::DoubleBuffer;
    use crate::buffer::Buffer;
    use crate::channel::Channel;
    use std::io;

    /// Device stub that accepts everything immediately.
    struct EagerChannel;

    impl Channel for EagerChannel {
        fn recording(&self) -> bool {
            true
        }

        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn frame_size(&self) -> usize {
            4
        }

        fn stepping(&self) -> i64 {
            16
        }

        fn can_memory_map(&self) -> bool {
            false
        }

        fn memory_map(&mut self) -> bool {
            false
        }

        fn memory_unmap(&mut self) -> bool {
            false
        }

        fn add_to_sync_group(&mut self, _id: i32) -> bool {
            true
        }

        fn start_sync_group(&mut self, _id: i32) -> bool {
            true
        }

        fn transfer(
            &mut self,
            buffer: &mut Buffer,
            _end_frames: i64,
            _sync_frames: i64,
        ) -> io::Result<()> {
            let remaining = buffer.remaining();
            buffer.advance(remaining);
            Ok(())
        }

        fn wakeup_time(&self, _remaining_frames: i64, end_frames: i64) -> i64 {
            end_frames
        }

        fn pointer(&self) -> i64 {
            0
        }

        fn balance(&self) -> i64 {
            0
        }

        fn close(&mut self) {}

        fn log_state(&self, _sync_frames: i64) {}
    }

    fn schedule() -> DoubleBuffer<EagerChannel> {
        let mut sched = DoubleBuffer::new(EagerChannel);
        assert!(sched.set_buffer(Buffer::with_frames(64, 4), 64));
        assert!(sched.set_buffer(Buffer::with_frames(64, 4), 128));
        sched
    }

    #[test]
    fn third_enqueue_is_rejected() {
        let mut sched = schedule();
        assert!(!sched.set_buffer(Buffer::with_frames(64, 4), 192));
    }

    #[test]
    fn take_promotes_back_slot() {
        let mut sched = schedule();
        sched.process(64).unwrap();
        assert!(sched.finished(64));
        let buf = sched.take_buffer();
        assert_eq!(buf.frames(), 64);
        assert_eq!(sched.end_frames(), 128);
        assert_eq!(sched.period_end(), 128);
        assert!(sched.set_buffer(buf, 192));
        assert_eq!(sched.period_end(), 192);
    }

    #[test]
    fn end_frames_stay_strictly_increasing_across_cycles() {
        let mut sched = schedule();
        let mut previous = 0;
        let mut end = 128;
        for sync in (64..=640).step_by(64) {
            sched.process(sync).unwrap();
            if sched.finished(sync) {
                let front = sched.end_frames();
                assert!(front > previous);
                previous = front;
                let mut buf = sched.take_buffer();
                buf.clear();
                end += 64;
                assert!(sched.set_buffer(buf, end));
            }
        }
    }

    #[test]
    fn finished_requires_deadline_and_full_buffer() {
        let mut sched = schedule();
        assert!(!sched.finished(64));
        sched.process(0).unwrap();
        assert!(!sched.finished(0));
        assert!(sched.finished(64));
    }

    #[test]
    fn reset_re_anchors_both_slots() {
        let mut sched = schedule();
        sched.process(64).unwrap();
        sched.reset_buffers(1024);
        assert_eq!(sched.end_frames(), 1024);
        assert_eq!(sched.period_end(), 1024 + 64);
        assert!(!sched.finished(1024));
    }
}
