use super::{PollSet, Readiness};
use std::collections::HashSet;
use std::mem::MaybeUninit;

/// Bitmap/`select`-style multiplexer, for hosts without a poll-style
/// facility. Keeps the subscribed set plus a running high-water mark of
/// "one past the largest subscribed fd", as `select` requires.
pub struct LegacyPollSet {
    read_fds: HashSet<i32>,
    write_fds: HashSet<i32>,
    max_fd: i32,
    ready_read: HashSet<i32>,
    ready_write: HashSet<i32>,
}

impl LegacyPollSet {
    pub fn new(_capacity: usize) -> std::io::Result<Self> {
        Ok(LegacyPollSet {
            read_fds: HashSet::new(),
            write_fds: HashSet::new(),
            max_fd: -1,
            ready_read: HashSet::new(),
            ready_write: HashSet::new(),
        })
    }

    fn recompute_max(&mut self) {
        self.max_fd = self
            .read_fds
            .iter()
            .chain(self.write_fds.iter())
            .copied()
            .max()
            .unwrap_or(-1);
    }
}

impl PollSet for LegacyPollSet {
    fn insert(&mut self, fd: i32, interest: Readiness) -> std::io::Result<()> {
        if interest.contains(Readiness::READABLE) {
            self.read_fds.insert(fd);
        }
        if interest.contains(Readiness::WRITABLE) {
            self.write_fds.insert(fd);
        }
        self.max_fd = self.max_fd.max(fd);
        Ok(())
    }

    fn remove(&mut self, fd: i32) -> std::io::Result<()> {
        self.read_fds.remove(&fd);
        self.write_fds.remove(&fd);
        self.ready_read.remove(&fd);
        self.ready_write.remove(&fd);
        // Only recomputed on removal: inserts conservatively extend the
        // high-water mark rather than shrink it.
        self.recompute_max();
        Ok(())
    }

    fn wait(&mut self, timeout_ms: u64) -> std::io::Result<usize> {
        self.ready_read.clear();
        self.ready_write.clear();

        if self.max_fd < 0 {
            std::thread::sleep(std::time::Duration::from_millis(timeout_ms));
            return Ok(0);
        }

        unsafe {
            let mut read_set = MaybeUninit::<libc::fd_set>::uninit();
            let mut write_set = MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(read_set.as_mut_ptr());
            libc::FD_ZERO(write_set.as_mut_ptr());

            for &fd in &self.read_fds {
                libc::FD_SET(fd, read_set.as_mut_ptr());
            }
            for &fd in &self.write_fds {
                libc::FD_SET(fd, write_set.as_mut_ptr());
            }

            let mut timeout = libc::timeval {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
            };

            let ret = libc::select(
                self.max_fd + 1,
                read_set.as_mut_ptr(),
                write_set.as_mut_ptr(),
                std::ptr::null_mut(),
                &mut timeout,
            );

            if ret < 0 {
                return Err(std::io::Error::last_os_error());
            }

            let read_set = read_set.assume_init();
            let write_set = write_set.assume_init();

            for &fd in &self.read_fds {
                if libc::FD_ISSET(fd, &read_set) {
                    self.ready_read.insert(fd);
                }
            }
            for &fd in &self.write_fds {
                if libc::FD_ISSET(fd, &write_set) {
                    self.ready_write.insert(fd);
                }
            }

            Ok(ret as usize)
        }
    }

    fn is_ready(&self, fd: i32, interest: Readiness) -> bool {
        (interest.contains(Readiness::READABLE) && self.ready_read.contains(&fd))
            || (interest.contains(Readiness::WRITABLE) && self.ready_write.contains(&fd))
    }
}
