use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::clock::stepping_for_rate;
use crate::options::RunOptions;
use nix::libc;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use tracing::{trace, warn};

mod consts;
mod ioctl;
mod map;

pub use self::consts::*;
use self::ioctl::*;
use self::map::MapRegion;

/// Channel lifecycle as seen by the loop driver; transitions are driven
/// exclusively from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Armed,
    Running,
    Unmapped,
    Closed,
}

/// One direction of an OSS device: open file descriptor, negotiated
/// format, fragment geometry and the optional DMA mapping.
#[derive(Debug)]
pub struct Dsp {
    file: Option<File>,
    input: bool,
    sample_rate: u32,
    format: u32,
    channels: usize,
    frame_size: usize,
    ring_bytes: usize,
    ring_frames: i64,
    caps: i32,
    map: Option<MapRegion>,
    map_ptr: usize,
    phase: Phase,
}

impl Dsp {
    fn open(path: &str, input: bool, options: &RunOptions) -> io::Result<Self> {
        let mut binding = File::options();
        let mut flags = libc::O_NONBLOCK;
        if options.exclusive {
            flags |= libc::O_EXCL;
        }
        if input {
            flags |= libc::O_RDONLY;
            binding.read(true).write(false).custom_flags(flags);
        } else {
            flags |= libc::O_WRONLY;
            binding.read(false).write(true).custom_flags(flags);
        }
        let file = binding.open(path)?;
        let fd = file.as_raw_fd();

        if options.exclusive {
            let cooked = 0_i32;
            unsafe { oss_set_cooked(fd, &cooked) }.map_err(|_| io::Error::last_os_error())?;
        }

        let format = Self::negotiate_format(fd, options.bits)?;
        let bytes_per_sample = bytes_per_sample(format)
            .ok_or_else(|| io::Error::other(format!("unsupported sample format {format:#x}")))?;

        let mut channels = 2_i32;
        unsafe { oss_set_channels(fd, &mut channels) }.map_err(|_| io::Error::last_os_error())?;
        if channels < 1 {
            return Err(io::Error::other("device reported no channels"));
        }
        let frame_size = channels as usize * bytes_per_sample;

        let mut rate = options.sample_rate as i32;
        unsafe { oss_set_speed(fd, &mut rate) }.map_err(|_| io::Error::last_os_error())?;
        if rate != options.sample_rate as i32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "device forced sample rate {rate} (requested {})",
                    options.sample_rate
                ),
            ));
        }

        let frag_bytes = (options.period as usize)
            .saturating_mul(frame_size)
            .max(1)
            .next_power_of_two();
        let frag_shift = frag_bytes.trailing_zeros() as i32;
        let mut frg = ((options.nfrags.max(2) as i32) << 16) | (frag_shift & 0xFFFF);
        unsafe { oss_set_fragment(fd, &mut frg) }.map_err(|_| io::Error::last_os_error())?;

        let mut info = BufferInfo::default();
        let rc = if input {
            unsafe { oss_input_buffer_info(fd, &mut info) }
        } else {
            unsafe { oss_output_buffer_info(fd, &mut info) }
        };
        rc.map_err(|_| io::Error::last_os_error())?;
        if info.bytes < 1 {
            info.bytes = info.fragstotal * info.fragsize;
        }
        if info.bytes < 1 {
            return Err(io::Error::other("device reported no buffer space"));
        }

        let mut caps = 0_i32;
        unsafe { oss_get_caps(fd, &mut caps) }.map_err(|_| io::Error::last_os_error())?;

        let ring_bytes = info.bytes as usize;
        if ring_bytes < frame_size {
            return Err(io::Error::other("device buffer smaller than one frame"));
        }
        Ok(Self {
            file: Some(file),
            input,
            sample_rate: rate as u32,
            format,
            channels: channels as usize,
            frame_size,
            ring_bytes,
            ring_frames: (ring_bytes / frame_size) as i64,
            caps,
            map: None,
            map_ptr: 0,
            phase: Phase::Idle,
        })
    }

    fn negotiate_format(fd: i32, bits: i32) -> io::Result<u32> {
        let candidates: &[u32] = match bits {
            32 => &[AFMT_S32_NE, AFMT_S24_NE, AFMT_S16_NE, AFMT_S8],
            24 => &[AFMT_S24_NE, AFMT_S16_NE, AFMT_S8],
            8 => &[AFMT_S8],
            _ => &[AFMT_S16_NE, AFMT_S8],
        };
        let mut last_error = None;
        for candidate in candidates {
            let mut negotiated = *candidate;
            match unsafe { oss_set_format(fd, &mut negotiated) } {
                Ok(_) if bytes_per_sample(negotiated).is_some() => return Ok(negotiated),
                Ok(_) => {
                    last_error = Some(io::Error::other(format!(
                        "device substituted unsupported format {negotiated:#x}"
                    )));
                }
                Err(_) => last_error = Some(io::Error::last_os_error()),
            }
        }
        Err(last_error.unwrap_or_else(|| io::Error::other("no sample format accepted")))
    }

    fn fd(&self) -> io::Result<i32> {
        self.file
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::other("device closed"))
    }

    fn can_memory_map(&self) -> bool {
        self.file.is_some() && (self.caps & PCM_CAP_MMAP) != 0
    }

    fn memory_map(&mut self) -> bool {
        if !self.can_memory_map() {
            return false;
        }
        if self.map.is_some() {
            return true;
        }
        let Ok(fd) = self.fd() else { return false };
        match MapRegion::map(fd, self.ring_bytes, self.input) {
            Some(region) => {
                self.map = Some(region);
                self.map_ptr = 0;
                true
            }
            None => false,
        }
    }

    fn memory_unmap(&mut self) -> bool {
        self.map = None;
        if self.phase == Phase::Running {
            self.phase = Phase::Unmapped;
        }
        true
    }

    fn mapped(&self) -> bool {
        self.map.is_some()
    }

    fn add_to_sync_group(&mut self, id: i32) -> bool {
        let Ok(fd) = self.fd() else { return false };
        match ioctl::add_to_sync_group(fd, id, self.input) {
            Ok(_) => {
                self.phase = Phase::Armed;
                true
            }
            Err(_) => false,
        }
    }

    fn start_sync_group(&mut self, id: i32) -> bool {
        let Ok(fd) = self.fd() else { return false };
        match ioctl::start_sync_group(fd, id) {
            Ok(()) => {
                self.phase = Phase::Running;
                true
            }
            Err(_) => false,
        }
    }

    /// Frames the DMA cursor advanced since the last query.
    fn map_advance(&mut self, info: &CountInfo) -> i64 {
        if self.ring_bytes == 0
            || info.ptr < 0
            || (info.ptr as usize) >= self.ring_bytes
            || (info.ptr as usize) % self.frame_size != 0
        {
            return 0;
        }
        let ptr = info.ptr as usize;
        let delta = (ptr + self.ring_bytes - self.map_ptr) % self.ring_bytes;
        self.map_ptr = ptr;
        (delta / self.frame_size) as i64
    }

    fn input_queued(&self) -> io::Result<i64> {
        let mut count = OssCount::default();
        unsafe { oss_current_iptr(self.fd()?, &mut count) }
            .map_err(|_| io::Error::last_os_error())?;
        Ok(count.fifo_samples.max(0) as i64)
    }

    fn output_queued(&self) -> io::Result<i64> {
        let mut count = OssCount::default();
        unsafe { oss_current_optr(self.fd()?, &mut count) }
            .map_err(|_| io::Error::last_os_error())?;
        Ok(count.fifo_samples.max(0) as i64)
    }

    fn close(&mut self) {
        self.map = None;
        self.file = None;
        self.phase = Phase::Closed;
    }
}

fn read_nonblock(fd: i32, dst: &mut [u8]) -> io::Result<usize> {
    if dst.is_empty() {
        return Ok(0);
    }
    let n = unsafe { libc::read(fd, dst.as_mut_ptr() as *mut libc::c_void, dst.len()) };
    if n >= 0 {
        return Ok(n as usize);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(0)
    } else {
        Err(err)
    }
}

fn write_nonblock(fd: i32, src: &[u8]) -> io::Result<usize> {
    if src.is_empty() {
        return Ok(0);
    }
    let n = unsafe { libc::write(fd, src.as_ptr() as *const libc::c_void, src.len()) };
    if n >= 0 {
        return Ok(n as usize);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(0)
    } else {
        Err(err)
    }
}

/// Record side of the device. `position` counts frames consumed into
/// buffers, `hw_frames` the device's capture total.
#[derive(Debug)]
pub struct ReadChannel {
    dsp: Dsp,
    hw_frames: i64,
    position: i64,
    balance: i64,
}

impl ReadChannel {
    pub fn open(path: &str, options: &RunOptions) -> io::Result<Self> {
        Ok(Self {
            dsp: Dsp::open(path, true, options)?,
            hw_frames: 0,
            position: 0,
            balance: 0,
        })
    }
}

impl Channel for ReadChannel {
    fn recording(&self) -> bool {
        true
    }

    fn sample_rate(&self) -> u32 {
        self.dsp.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.dsp.frame_size
    }

    fn stepping(&self) -> i64 {
        stepping_for_rate(self.dsp.sample_rate)
    }

    fn can_memory_map(&self) -> bool {
        self.dsp.can_memory_map()
    }

    fn memory_map(&mut self) -> bool {
        self.dsp.memory_map()
    }

    fn memory_unmap(&mut self) -> bool {
        self.dsp.memory_unmap()
    }

    fn add_to_sync_group(&mut self, id: i32) -> bool {
        self.dsp.add_to_sync_group(id)
    }

    fn start_sync_group(&mut self, id: i32) -> bool {
        self.dsp.start_sync_group(id)
    }

    fn transfer(
        &mut self,
        buffer: &mut Buffer,
        _end_frames: i64,
        sync_frames: i64,
    ) -> io::Result<()> {
        let fd = self.dsp.fd()?;
        let frame_size = self.dsp.frame_size;
        if self.dsp.mapped() {
            let mut info = CountInfo::default();
            unsafe { oss_get_iptr(fd, &mut info) }.map_err(|_| io::Error::last_os_error())?;
            self.hw_frames += self.dsp.map_advance(&info);

            let backlog = self.hw_frames - self.position;
            if backlog > self.dsp.ring_frames {
                let lost = backlog - self.dsp.ring_frames;
                warn!(lost, "capture overrun, skipping ahead");
                self.position = self.hw_frames - self.dsp.ring_frames;
            }
            let available = self.hw_frames - self.position;
            if available > 0 && !buffer.done() {
                let len = buffer.remaining().min(available as usize * frame_size);
                let offset = (self.position % self.dsp.ring_frames) as usize * frame_size;
                let copied = {
                    let map = self.dsp.map.as_ref().expect("mapped");
                    map.read_at(offset, &mut buffer.position()[..len])
                };
                buffer.advance(copied);
                self.position += (copied / frame_size) as i64;
            }
        } else {
            let queued = self.dsp.input_queued()?;
            self.hw_frames = self.position + queued;
            if queued > 0 && !buffer.done() {
                let copied = read_nonblock(fd, buffer.position())?;
                buffer.advance(copied);
                self.position += (copied / frame_size) as i64;
            }
        }
        self.balance = self.hw_frames - sync_frames;
        Ok(())
    }

    fn wakeup_time(&self, remaining_frames: i64, _end_frames: i64) -> i64 {
        self.position + remaining_frames - self.balance
    }

    fn pointer(&self) -> i64 {
        self.hw_frames
    }

    fn balance(&self) -> i64 {
        self.balance
    }

    fn close(&mut self) {
        self.dsp.close();
    }

    fn log_state(&self, sync_frames: i64) {
        trace!(
            phase = ?self.dsp.phase,
            format = self.dsp.format,
            channels = self.dsp.channels,
            sync_frames,
            position = self.position,
            hw_frames = self.hw_frames,
            balance = self.balance,
            "capture"
        );
    }
}

/// Playback side of the device. `position` counts frames written into
/// the device, `hw_frames` the frames the DMA engine has played out.
#[derive(Debug)]
pub struct WriteChannel {
    dsp: Dsp,
    hw_frames: i64,
    position: i64,
    balance: i64,
}

impl WriteChannel {
    pub fn open(path: &str, options: &RunOptions) -> io::Result<Self> {
        Ok(Self {
            dsp: Dsp::open(path, false, options)?,
            hw_frames: 0,
            position: 0,
            balance: 0,
        })
    }
}

impl Channel for WriteChannel {
    fn recording(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> u32 {
        self.dsp.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.dsp.frame_size
    }

    fn stepping(&self) -> i64 {
        stepping_for_rate(self.dsp.sample_rate)
    }

    fn can_memory_map(&self) -> bool {
        self.dsp.can_memory_map()
    }

    fn memory_map(&mut self) -> bool {
        self.dsp.memory_map()
    }

    fn memory_unmap(&mut self) -> bool {
        self.dsp.memory_unmap()
    }

    fn add_to_sync_group(&mut self, id: i32) -> bool {
        self.dsp.add_to_sync_group(id)
    }

    fn start_sync_group(&mut self, id: i32) -> bool {
        self.dsp.start_sync_group(id)
    }

    fn transfer(
        &mut self,
        buffer: &mut Buffer,
        _end_frames: i64,
        sync_frames: i64,
    ) -> io::Result<()> {
        let fd = self.dsp.fd()?;
        let frame_size = self.dsp.frame_size;
        if self.dsp.mapped() {
            let mut info = CountInfo::default();
            unsafe { oss_get_optr(fd, &mut info) }.map_err(|_| io::Error::last_os_error())?;
            let advanced = self.dsp.map_advance(&info);
            if advanced > 0 {
                // The DMA engine replays the ring if we stop feeding
                // it; blank what it just consumed.
                let offset = (self.hw_frames % self.dsp.ring_frames) as usize * frame_size;
                let map = self.dsp.map.as_ref().expect("mapped");
                map.silence(offset, advanced as usize * frame_size);
                self.hw_frames += advanced;
            }

            let mut queued = self.position - self.hw_frames;
            if queued < 0 {
                warn!(lost = -queued, "playback underrun, skipping ahead");
                self.position = self.hw_frames;
                queued = 0;
            }
            let space = self.dsp.ring_frames - queued;
            if space > 0 && !buffer.done() {
                let len = buffer.remaining().min(space as usize * frame_size);
                let offset = (self.position % self.dsp.ring_frames) as usize * frame_size;
                let written = {
                    let map = self.dsp.map.as_ref().expect("mapped");
                    map.write_at(offset, &buffer.position()[..len])
                };
                buffer.advance(written);
                self.position += (written / frame_size) as i64;
            }
        } else {
            let queued = self.dsp.output_queued()?;
            self.hw_frames = self.position - queued;
            if !buffer.done() {
                let written = write_nonblock(fd, buffer.position())?;
                buffer.advance(written);
                self.position += (written / frame_size) as i64;
            }
        }
        self.balance = self.hw_frames - sync_frames;
        Ok(())
    }

    fn wakeup_time(&self, remaining_frames: i64, _end_frames: i64) -> i64 {
        self.position + remaining_frames - self.dsp.ring_frames - self.balance
    }

    fn pointer(&self) -> i64 {
        self.hw_frames
    }

    fn balance(&self) -> i64 {
        self.balance
    }

    fn close(&mut self) {
        self.dsp.close();
    }

    fn log_state(&self, sync_frames: i64) {
        trace!(
            phase = ?self.dsp.phase,
            format = self.dsp.format,
            channels = self.dsp.channels,
            sync_frames,
            position = self.position,
            hw_frames = self.hw_frames,
            balance = self.balance,
            "playback"
        );
    }
}
