//! Readiness notification for the single-threaded event loop.
//!
//! Transports never block. They register their sockets with a [`Reactor`]
//! and are handed back the token they registered with once a socket becomes
//! readable or writable.

use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::*;

pub type Token = usize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

pub trait Reactor {
    /// Start watching `fd` for read-readiness.
    fn register_read(&mut self, fd: RawFd, token: Token) -> Result<()>;
    /// Start watching `fd` for write-readiness.
    fn register_write(&mut self, fd: RawFd, token: Token) -> Result<()>;
    /// Stop watching `fd` for write-readiness.
    fn unregister_write(&mut self, fd: RawFd);
    /// Forget `fd` entirely.
    fn cancel(&mut self, fd: RawFd);
    /// Wait until at least one registered socket is ready or `timeout`
    /// expires. `None` waits forever.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<(Token, Readiness)>>;
}

#[derive(Debug)]
struct Entry {
    fd: RawFd,
    token: Token,
    read: bool,
    write: bool,
}

/// A [`Reactor`] built on `poll(2)`.
#[derive(Debug, Default)]
pub struct Poller {
    entries: Vec<Entry>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, fd: RawFd, token: Token) -> &mut Entry {
        match self.entries.iter().position(|e| e.fd == fd) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.token = token;
                entry
            }
            None => {
                self.entries.push(Entry {
                    fd,
                    token,
                    read: false,
                    write: false,
                });
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        }
    }

    /// Number of registered file descriptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_writing(&self, fd: RawFd) -> bool {
        self.entries.iter().any(|e| e.fd == fd && e.write)
    }
}

impl Reactor for Poller {
    fn register_read(&mut self, fd: RawFd, token: Token) -> Result<()> {
        if fd < 0 {
            return Err(ErrorKind::ConnectionClosed.into());
        }
        self.entry(fd, token).read = true;
        Ok(())
    }

    fn register_write(&mut self, fd: RawFd, token: Token) -> Result<()> {
        if fd < 0 {
            return Err(ErrorKind::ConnectionClosed.into());
        }
        self.entry(fd, token).write = true;
        Ok(())
    }

    fn unregister_write(&mut self, fd: RawFd) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.fd == fd) {
            e.write = false;
        }
    }

    fn cancel(&mut self, fd: RawFd) {
        self.entries.retain(|e| e.fd != fd);
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<(Token, Readiness)>> {
        let mut fds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .filter(|e| e.read || e.write)
            .map(|e| libc::pollfd {
                fd: e.fd,
                events: (if e.read { libc::POLLIN } else { 0 })
                    | (if e.write { libc::POLLOUT } else { 0 }),
                revents: 0,
            })
            .collect();

        let timeout = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if ret < 0 {
            let e = std::io::Error::last_os_error();
            if e.kind() == std::io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(e.into());
        }

        let mut ready = Vec::with_capacity(ret as usize);
        for pfd in fds.iter().filter(|p| p.revents != 0) {
            let entry = match self.entries.iter().find(|e| e.fd == pfd.fd) {
                Some(e) => e,
                None => continue,
            };
            // errors and hangups are reported through whichever direction is
            // watched, so the owner sees them on its next read or write
            let failed = pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
            let readiness = Readiness {
                readable: entry.read && (pfd.revents & libc::POLLIN != 0 || failed),
                writable: entry.write && (pfd.revents & libc::POLLOUT != 0 || failed),
            };
            if readiness.readable || readiness.writable {
                ready.push((entry.token, readiness));
            }
        }
        Ok(ready)
    }
}
