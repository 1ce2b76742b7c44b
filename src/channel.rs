use crate::buffer::Buffer;
use std::io;

/// Device-side contract required by the scheduling core.
///
/// A channel is one direction of a sound device: it affirms its
/// direction and format, moves bytes between a buffer and the device,
/// and reports where the hardware frame pointer sits relative to the
/// loop's frame clock. The two-slot schedule in front of it lives in
/// [`DoubleBuffer`](crate::DoubleBuffer).
pub trait Channel {
    fn recording(&self) -> bool;

    fn playback(&self) -> bool {
        !self.recording()
    }

    fn sample_rate(&self) -> u32;

    /// Bytes per frame.
    fn frame_size(&self) -> usize;

    /// Minimum transfer granularity in frames.
    fn stepping(&self) -> i64;

    fn can_memory_map(&self) -> bool;

    fn memory_map(&mut self) -> bool;

    fn memory_unmap(&mut self) -> bool;

    fn add_to_sync_group(&mut self, id: i32) -> bool;

    fn start_sync_group(&mut self, id: i32) -> bool;

    /// Move as many bytes as the device will accept right now between
    /// the device and `buffer`. `end_frames` is the buffer's scheduled
    /// deadline; `sync_frames` the loop's current time, used to refresh
    /// the balance estimate.
    fn transfer(&mut self, buffer: &mut Buffer, end_frames: i64, sync_frames: i64)
    -> io::Result<()>;

    /// Frame instant at which the remaining frames of the active buffer
    /// become fully transferable.
    fn wakeup_time(&self, remaining_frames: i64, end_frames: i64) -> i64;

    /// Device frame pointer: total frames captured (record) or played
    /// (playback) since the sync group started.
    fn pointer(&self) -> i64;

    /// Device lead over the frame clock, measured at the last transfer:
    /// positive when the hardware is ahead of `sync_frames`.
    fn balance(&self) -> i64;

    fn close(&mut self);

    fn log_state(&self, sync_frames: i64);
}
