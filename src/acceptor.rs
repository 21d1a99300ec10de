// src/acceptor.rs
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SkuaResult;
use crate::scheduler::Scheduler;
use crate::syscalls::{self, Notifier, Wait};

/// Token for the listening socket in the acceptor's notifier.
const LISTEN_TOKEN: u64 = 0;

/// How long one wait may block before the shutdown flag is rechecked.
const ACCEPT_POLL_MS: libc::c_int = 500;

/// Accept loop, run on the main thread until `shutdown` is set.
///
/// Watches the listening socket level-triggered and drains the whole accept
/// queue per readiness report, sharding each accepted descriptor to the
/// worker the scheduler picks. Accept failures other than would-block are
/// logged and skipped; a failed registration is fatal.
pub fn run(
    listen_fd: RawFd,
    workers: &[Arc<Notifier>],
    scheduler: &Scheduler,
    shutdown: &AtomicBool,
) -> SkuaResult<()> {
    let notifier = Notifier::new()?;
    notifier.register_listener(listen_fd, LISTEN_TOKEN)?;

    let mut events = [syscalls::epoll_event { events: 0, u64: 0 }; 16];

    while !shutdown.load(Ordering::Acquire) {
        match notifier.wait(&mut events, ACCEPT_POLL_MS) {
            Wait::TimedOut | Wait::Interrupted => continue,
            Wait::Closed => break,
            Wait::Ready(_) => loop {
                match syscalls::accept_connection(listen_fd) {
                    Ok(Some(fd)) => {
                        let target = scheduler.next_worker();
                        if let Err(e) = workers[target].register_connection(fd) {
                            tracing::error!(
                                fd,
                                worker = target,
                                error = %e,
                                "failed to register accepted connection"
                            );
                            syscalls::close_fd(fd);
                            return Err(e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        break;
                    }
                }
            },
        }
    }

    Ok(())
}
