// src/syscalls.rs
use crate::error::SkuaResult;
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

pub use libc::epoll_event;

// ---- Process setup ----

/// Raise the soft open-file limit to the hard limit; when the hard limit is
/// unbounded, multiply the soft limit by 8 instead. Returns the final soft
/// limit, which is the server's descriptor budget.
pub fn raise_fd_limit() -> SkuaResult<u64> {
    unsafe {
        let mut r: libc::rlimit = mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut r) < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if r.rlim_max == libc::RLIM_INFINITY {
            r.rlim_cur = r.rlim_cur.saturating_mul(8);
        } else if r.rlim_cur < r.rlim_max {
            r.rlim_cur = r.rlim_max;
        }
        if libc::setrlimit(libc::RLIMIT_NOFILE, &r) < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(r.rlim_cur)
    }
}

static STDIO_INIT: Once = Once::new();

/// SIGPIPE would otherwise kill the process on a write to a dead peer, and
/// a server has no use for stdin; closing it returns the descriptor to the
/// connection budget. Runs once per process even if several servers are
/// constructed.
pub fn ignore_sigpipe_and_close_stdin() {
    STDIO_INIT.call_once(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::close(libc::STDIN_FILENO);
    });
}

// ---- Socket operations ----

/// Create a non-blocking TCP listening socket bound to all interfaces.
pub fn create_listen_socket(port: u16, enable_linger: bool, backlog: c_int) -> SkuaResult<RawFd> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let one: c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        if enable_linger {
            let linger = libc::linger {
                l_onoff: 1,
                l_linger: 1,
            };
            if libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                &linger as *const _ as *const c_void,
                mem::size_of_val(&linger) as socklen_t,
            ) < 0
            {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }
        }

        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: libc::INADDR_ANY,
            },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        if libc::listen(fd, backlog) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

/// Port the socket is actually bound to (relevant when configured with 0).
pub fn local_port(fd: RawFd) -> SkuaResult<u16> {
    unsafe {
        let mut sin: libc::sockaddr_in = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in>() as socklen_t;
        if libc::getsockname(fd, &mut sin as *mut _ as *mut libc::sockaddr, &mut len) < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(u16::from_be(sin.sin_port))
    }
}

/// Accept one pending connection, with the accepted descriptor made
/// non-blocking atomically. `Ok(None)` means the queue is drained.
pub fn accept_connection(listen_fd: RawFd) -> SkuaResult<Option<RawFd>> {
    unsafe {
        let fd = libc::accept4(
            listen_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(fd))
        }
    }
}

/// Disallow further transmissions on a listening socket; the descriptor
/// itself is closed separately.
pub fn shutdown_socket(fd: RawFd) {
    unsafe {
        if libc::shutdown(fd, libc::SHUT_RDWR) < 0 {
            tracing::warn!(fd, error = %io::Error::last_os_error(), "socket shutdown failed");
        }
    }
}

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

// ---- Non-blocking I/O ----

/// `Ok(None)` when the read would block; `Ok(Some(0))` is end of stream.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> SkuaResult<Option<usize>> {
    unsafe {
        let res = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// `Ok(None)` when the write would block.
pub fn write_nonblocking(fd: RawFd, buf: &[u8]) -> SkuaResult<Option<usize>> {
    unsafe {
        let res = libc::write(fd, buf.as_ptr() as *const c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// Vectored write: multiple buffers in a single syscall (scatter-gather I/O).
pub fn writev_nonblocking(fd: RawFd, bufs: &[&[u8]]) -> SkuaResult<Option<usize>> {
    if bufs.is_empty() {
        return Ok(Some(0));
    }

    // Build the iovec array on the stack (max 8 segments)
    let mut iovecs: [libc::iovec; 8] = unsafe { mem::zeroed() };
    let iov_count = bufs.len().min(8);
    for i in 0..iov_count {
        iovecs[i] = libc::iovec {
            iov_base: bufs[i].as_ptr() as *mut c_void,
            iov_len: bufs[i].len(),
        };
    }

    unsafe {
        let res = libc::writev(fd, iovecs.as_ptr(), iov_count as c_int);
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// Wait up to `timeout_ms` for `fd` to become writable.
pub fn poll_writable(fd: RawFd, timeout_ms: c_int) -> SkuaResult<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    unsafe {
        let res = libc::poll(&mut pfd, 1, timeout_ms);
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(false);
            }
            return Err(err.into());
        }
        Ok(res > 0 && (pfd.revents & libc::POLLOUT) != 0)
    }
}

// ---- Readiness notifier ----

/// Token reserved for the notifier's internal wake eventfd. Never collides
/// with a connection token, which is the raw fd value.
pub const WAKE_TOKEN: u64 = u64::MAX;

/// Outcome of one notifier wait.
pub enum Wait {
    /// One or more descriptors are ready.
    Ready(usize),
    /// The timeout elapsed with no events.
    TimedOut,
    /// The wait was interrupted by a signal; retry.
    Interrupted,
    /// The notifier was shut down (or its descriptor closed under us).
    Closed,
}

/// One epoll instance plus an eventfd used to interrupt unbounded waits.
///
/// Closing an epoll descriptor does not wake a thread already blocked in
/// `epoll_wait`, so `shutdown` marks the notifier closed and writes the
/// eventfd; the waiter observes either the wake token or `Closed` on its
/// next wait. All operations go through `&self` so a `Notifier` can be
/// shared through an `Arc` between a reactor thread and the lifecycle layer.
pub struct Notifier {
    epoll_fd: RawFd,
    wake_fd: RawFd,
    closed: AtomicBool,
}

impl Notifier {
    pub fn new() -> SkuaResult<Self> {
        unsafe {
            let epoll_fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            if epoll_fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            let wake_fd = libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC);
            if wake_fd < 0 {
                let err = io::Error::last_os_error();
                libc::close(epoll_fd);
                return Err(err.into());
            }
            let notifier = Self {
                epoll_fd,
                wake_fd,
                closed: AtomicBool::new(false),
            };
            notifier.add(wake_fd, WAKE_TOKEN, libc::EPOLLIN as u32)?;
            Ok(notifier)
        }
    }

    fn add(&self, fd: RawFd, token: u64, events: u32) -> SkuaResult<()> {
        let mut event = epoll_event { events, u64: token };
        unsafe {
            if libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    /// Register a connection edge-triggered for read, peer-hangup and error.
    pub fn register_connection(&self, fd: RawFd) -> SkuaResult<()> {
        self.add(
            fd,
            fd as u64,
            (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLERR | libc::EPOLLET) as u32,
        )
    }

    /// Register a listening socket level-triggered for read.
    pub fn register_listener(&self, fd: RawFd, token: u64) -> SkuaResult<()> {
        self.add(fd, token, libc::EPOLLIN as u32)
    }

    pub fn deregister(&self, fd: RawFd) -> SkuaResult<()> {
        unsafe {
            if libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Wait for readiness. A negative timeout blocks indefinitely.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: c_int) -> Wait {
        if self.closed.load(Ordering::Acquire) {
            return Wait::Closed;
        }
        unsafe {
            let res = libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                events.len() as c_int,
                timeout_ms,
            );
            if res < 0 {
                let err = io::Error::last_os_error();
                return match err.raw_os_error() {
                    Some(libc::EINTR) => Wait::Interrupted,
                    Some(libc::EBADF) | Some(libc::EINVAL) => Wait::Closed,
                    _ => {
                        tracing::error!(error = %err, "epoll_wait failed");
                        Wait::Closed
                    }
                };
            }
            if res == 0 {
                Wait::TimedOut
            } else {
                Wait::Ready(res as usize)
            }
        }
    }

    /// Request shutdown: mark the notifier closed and wake any blocked wait.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let val: u64 = 1;
            unsafe {
                let _ = libc::write(
                    self.wake_fd,
                    &val as *const u64 as *const c_void,
                    mem::size_of::<u64>(),
                );
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
            libc::close(self.wake_fd);
        }
    }
}
