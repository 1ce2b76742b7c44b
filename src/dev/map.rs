use nix::libc;

/// Memory-mapped DMA ring. Copies wrap around the region end; the
/// mapping is released on drop.
#[derive(Debug)]
pub struct MapRegion {
    addr: *mut libc::c_void,
    len: usize,
}

impl MapRegion {
    pub fn map(fd: i32, len: usize, input: bool) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let prot = if input {
            libc::PROT_READ
        } else {
            libc::PROT_WRITE
        };
        let addr = unsafe { libc::mmap(std::ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) };
        if addr == libc::MAP_FAILED {
            return None;
        }
        Some(Self { addr, len })
    }

    pub fn read_at(&self, mut offset: usize, dst: &mut [u8]) -> usize {
        let mut length = dst.len().min(self.len);
        offset %= self.len;
        let mut copied = 0;
        while length > 0 {
            let take = (self.len - offset).min(length);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    (self.addr as *const u8).add(offset),
                    dst[copied..].as_mut_ptr(),
                    take,
                );
            }
            copied += take;
            length -= take;
            offset = 0;
        }
        copied
    }

    pub fn write_at(&self, mut offset: usize, src: &[u8]) -> usize {
        let mut length = src.len().min(self.len);
        offset %= self.len;
        let mut copied = 0;
        while length > 0 {
            let take = (self.len - offset).min(length);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src[copied..].as_ptr(),
                    (self.addr as *mut u8).add(offset),
                    take,
                );
            }
            copied += take;
            length -= take;
            offset = 0;
        }
        copied
    }

    /// Zero `length` bytes starting at `offset`, wrapping at the end.
    pub fn silence(&self, mut offset: usize, mut length: usize) {
        length = length.min(self.len);
        offset %= self.len;
        while length > 0 {
            let take = (self.len - offset).min(length);
            unsafe {
                std::ptr::write_bytes((self.addr as *mut u8).add(offset), 0, take);
            }
            length -= take;
            offset = 0;
        }
    }
}

impl Drop for MapRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::munmap(self.addr, self.len);
        }
    }
}
