use std::io::{self, Read, Write};

/// Handles produced by installing a redirection
pub struct Interception {
    /// Bytes written to the redirected output
    pub source: Box<dyn Read + Send>,
    /// The output's previous destination, for echoing captured bytes
    pub passthrough: Box<dyn Write + Send>,
}

/// A writable output that can be swapped for a capture pipe and put back
///
/// After [`restore`](OutputRedirect::restore) the `source` of the matching
/// [`Interception`] must reach end-of-stream once buffered bytes are read.
pub trait OutputRedirect: Send + 'static {
    /// Install the redirection
    fn acquire(&mut self) -> io::Result<Interception>;

    /// Reinstate the previous destination. No-op when nothing is installed.
    fn restore(&mut self) -> io::Result<()>;
}

#[cfg(unix)]
pub use fd::FdRedirect;

#[cfg(unix)]
mod fd {
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use super::{Interception, OutputRedirect};

    /// Redirects a file descriptor into a pipe with `dup2`
    ///
    /// The original descriptor is duplicated first so it can be restored and
    /// so captured bytes can still be echoed to it.
    ///
    /// Child processes spawned while redirected inherit the pipe's write end
    /// through the target descriptor, so the reader cannot wait for EOF after
    /// a restore. Instead `restore` closes a wake pipe and the reader drains
    /// whatever is already buffered, then reports end-of-stream.
    pub struct FdRedirect {
        target: RawFd,
        saved: Option<OwnedFd>,
        wake: Option<OwnedFd>,
    }

    impl FdRedirect {
        /// Redirect the process's standard output
        pub fn stdout() -> Self {
            Self::new(libc::STDOUT_FILENO)
        }

        /// Redirect an arbitrary descriptor, which must stay open while redirected
        pub fn new(target: RawFd) -> Self {
            Self {
                target,
                saved: None,
                wake: None,
            }
        }

        pub fn is_active(&self) -> bool {
            self.saved.is_some()
        }

        /// Push out bytes sitting in Rust's stdout buffer before swapping descriptors
        fn flush_target(&self) {
            if self.target == libc::STDOUT_FILENO {
                let _ = io::stdout().flush();
            }
        }
    }

    impl OutputRedirect for FdRedirect {
        fn acquire(&mut self) -> io::Result<Interception> {
            if self.saved.is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "descriptor is already redirected",
                ));
            }

            self.flush_target();
            let saved = dup(self.target)?;
            let (read_end, write_end) = pipe()?;
            let (wake_rx, wake_tx) = pipe()?;
            // SAFETY: both descriptors are open; dup2 atomically replaces target
            cvt(unsafe { libc::dup2(write_end.as_raw_fd(), self.target) })?;
            drop(write_end);

            let passthrough = saved.try_clone()?;
            self.saved = Some(saved);
            self.wake = Some(wake_tx);
            tracing::debug!(fd = self.target, "output redirected");

            Ok(Interception {
                source: Box::new(PipeSource::new(read_end, wake_rx)),
                passthrough: Box::new(File::from(passthrough)),
            })
        }

        fn restore(&mut self) -> io::Result<()> {
            let Some(saved) = self.saved.take() else {
                return Ok(());
            };

            self.flush_target();
            // SAFETY: saved is an open descriptor owned by us
            if let Err(e) = cvt(unsafe { libc::dup2(saved.as_raw_fd(), self.target) }) {
                self.saved = Some(saved);
                return Err(e);
            }
            // Closing the wake pipe tells the reader to drain and finish
            self.wake = None;
            tracing::debug!(fd = self.target, "output restored");
            Ok(())
        }
    }

    impl Drop for FdRedirect {
        fn drop(&mut self) {
            let _ = self.restore();
        }
    }

    /// Read end of the capture pipe, watched together with the wake pipe
    struct PipeSource {
        data: OwnedFd,
        wake: OwnedFd,
        draining: bool,
        done: bool,
    }

    impl PipeSource {
        fn new(data: OwnedFd, wake: OwnedFd) -> Self {
            Self {
                data,
                wake,
                draining: false,
                done: false,
            }
        }

        /// Block until the data pipe is readable or the wake pipe closes
        fn wait(&mut self) -> io::Result<()> {
            let mut fds = [
                libc::pollfd {
                    fd: self.data.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.wake.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            loop {
                // SAFETY: fds is a valid array of two pollfd entries
                let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
                match cvt(ret) {
                    Ok(_) => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            if fds[1].revents != 0 {
                set_nonblocking(&self.data)?;
                self.draining = true;
            }
            Ok(())
        }
    }

    impl Read for PipeSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.done || buf.is_empty() {
                return Ok(0);
            }
            if !self.draining {
                self.wait()?;
            }

            // SAFETY: buf is valid for writes of buf.len() bytes
            let ret =
                unsafe { libc::read(self.data.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            match ret {
                -1 => {
                    let err = io::Error::last_os_error();
                    if self.draining && err.kind() == io::ErrorKind::WouldBlock {
                        self.done = true;
                        Ok(0)
                    } else {
                        Err(err)
                    }
                }
                0 => {
                    self.done = true;
                    Ok(0)
                }
                n => Ok(n as usize),
            }
        }
    }

    fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }

    fn dup(fd: RawFd) -> io::Result<OwnedFd> {
        // SAFETY: F_DUPFD_CLOEXEC returns a fresh descriptor we take ownership of
        let new = cvt(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) })?;
        Ok(unsafe { OwnedFd::from_raw_fd(new) })
    }

    /// Close-on-exec pipe. The write end loses the flag once dup2'd onto the target.
    fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
        let mut fds: [libc::c_int; 2] = [0; 2];
        // SAFETY: fds has room for the two descriptors pipe() writes
        cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        // SAFETY: pipe() succeeded, so both descriptors are fresh and ours
        let (read_end, write_end) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_cloexec(&read_end)?;
        set_cloexec(&write_end)?;
        Ok((read_end, write_end))
    }

    fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
        let raw = fd.as_raw_fd();
        // SAFETY: raw is open for the duration of these calls
        let flags = cvt(unsafe { libc::fcntl(raw, libc::F_GETFD) })?;
        cvt(unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
        Ok(())
    }

    fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
        let raw = fd.as_raw_fd();
        // SAFETY: raw is open for the duration of these calls
        let flags = cvt(unsafe { libc::fcntl(raw, libc::F_GETFL) })?;
        cvt(unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::{Read, Seek, SeekFrom};

        #[test]
        fn test_redirect_and_restore_descriptor() {
            let mut target = tempfile::tempfile().unwrap();
            let mut redirect = FdRedirect::new(target.as_raw_fd());

            let Interception {
                mut source,
                mut passthrough,
            } = redirect.acquire().unwrap();
            assert!(redirect.is_active());

            target.write_all(b"into the pipe\n").unwrap();
            passthrough.write_all(b"echoed\n").unwrap();

            redirect.restore().unwrap();
            assert!(!redirect.is_active());
            target.write_all(b"after restore\n").unwrap();

            // The pipe's only write end was the redirected descriptor
            let mut captured = String::new();
            source.read_to_string(&mut captured).unwrap();
            assert_eq!(captured, "into the pipe\n");

            drop(passthrough);
            target.seek(SeekFrom::Start(0)).unwrap();
            let mut contents = String::new();
            target.read_to_string(&mut contents).unwrap();
            assert_eq!(contents, "echoed\nafter restore\n");
        }

        #[test]
        fn test_double_acquire_fails() {
            let target = tempfile::tempfile().unwrap();
            let mut redirect = FdRedirect::new(target.as_raw_fd());
            let _interception = redirect.acquire().unwrap();
            assert!(redirect.acquire().is_err());
            redirect.restore().unwrap();
            redirect.restore().unwrap();
        }

        #[test]
        fn test_restore_ends_stream_while_child_holds_write_end() {
            let mut target = tempfile::tempfile().unwrap();
            let mut redirect = FdRedirect::new(target.as_raw_fd());
            let Interception { mut source, .. } = redirect.acquire().unwrap();

            target.write_all(b"before the child\n").unwrap();
            // Inherits the redirected descriptor, which is the pipe's write end
            let mut child = std::process::Command::new("sleep")
                .arg("5")
                .spawn()
                .unwrap();

            redirect.restore().unwrap();
            let started = std::time::Instant::now();
            let mut captured = String::new();
            source.read_to_string(&mut captured).unwrap();
            let elapsed = started.elapsed();

            child.kill().unwrap();
            child.wait().unwrap();
            assert_eq!(captured, "before the child\n");
            assert!(elapsed < std::time::Duration::from_secs(2), "drain took {elapsed:?}");
        }
    }
}
