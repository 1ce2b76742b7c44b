//! Synchronous full-duplex audio I/O against an OSS device: a capture
//! and a playback stream advance through period-sized buffers,
//! phase-locked to a shared frame clock, with drift absorbed by moving
//! upcoming buffer deadlines and large scheduler stalls healed by
//! re-anchoring both schedules.

mod buffer;
mod channel;
mod clock;
mod correction;
mod dev;
mod double_buffer;
mod options;
mod runner;

pub use buffer::Buffer;
pub use channel::Channel;
pub use clock::{Clock, FrameClock, stepping_for_rate};
pub use correction::Correction;
pub use dev::{ReadChannel, WriteChannel};
pub use double_buffer::DoubleBuffer;
pub use options::{DEVICE_ENV, RunOptions, SIMULATE_STALLS_ENV, env_flag};
pub use runner::{Runner, read_write};
