// src/worker.rs
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::death_ring::DeathRing;
use crate::request;
use crate::slot::SlotTable;
use crate::syscalls::{self, Notifier, Wait, WAKE_TOKEN};
use crate::url_map::UrlMap;

/// Events drained per wait.
const EVENT_BATCH: usize = 1024;

/// One tick of the keep-alive clock, in milliseconds.
const TICK_MS: libc::c_int = 1000;

/// A per-thread reactor owning one notifier, a death ring sized to its
/// descriptor quota, and a view into the shared slot table restricted to
/// the descriptors registered with its notifier.
///
/// `owned` tracks which descriptors this worker currently holds. A slot is
/// only dereferenced for an owned fd: ownership is established by event
/// delivery (the fd is registered with this worker's epoll) and revoked by
/// every close, so a stale ring entry whose fd has since been recycled onto
/// another worker is discarded without touching the other worker's slot.
pub struct Worker {
    id: usize,
    notifier: Arc<Notifier>,
    slots: Arc<SlotTable>,
    url_map: Arc<UrlMap>,
    keep_alive_timeout: u32,
    ring: DeathRing,
    owned: Vec<bool>,
}

impl Worker {
    pub fn new(
        id: usize,
        notifier: Arc<Notifier>,
        slots: Arc<SlotTable>,
        url_map: Arc<UrlMap>,
        keep_alive_timeout: u32,
        quota: usize,
    ) -> Self {
        let owned = vec![false; slots.capacity()];
        Self {
            id,
            notifier,
            slots,
            url_map,
            keep_alive_timeout,
            ring: DeathRing::new(quota),
            owned,
        }
    }

    /// Reactor loop: drain readiness events and age out idle keep-alive
    /// connections until the notifier is shut down.
    ///
    /// Single-threaded by construction; the alive-check-then-append
    /// discipline below relies on no two events for one fd being handled
    /// concurrently.
    pub fn run(mut self) {
        let batch = EVENT_BATCH.min(self.ring.capacity()).max(1);
        let mut events = vec![syscalls::epoll_event { events: 0, u64: 0 }; batch];
        let mut death_time: u32 = 0;

        tracing::debug!(
            worker = self.id,
            quota = self.ring.capacity(),
            "worker entering event loop"
        );

        loop {
            // Block forever when nothing is ageing; otherwise wake once per
            // tick to advance the expiry clock.
            let timeout = if self.ring.is_empty() { -1 } else { TICK_MS };
            match self.notifier.wait(&mut events, timeout) {
                Wait::Interrupted => {
                    tracing::debug!(worker = self.id, "wait interrupted by signal");
                    continue;
                }
                Wait::Closed => break,
                Wait::TimedOut => {
                    death_time = death_time.wrapping_add(1);
                    self.expire(death_time);
                }
                Wait::Ready(n) => {
                    let mut shut_down = false;
                    for i in 0..n {
                        let token = events[i].u64;
                        if token == WAKE_TOKEN {
                            shut_down = true;
                            continue;
                        }
                        self.handle_event(death_time, token as RawFd, events[i].events);
                    }
                    if shut_down {
                        break;
                    }
                }
            }
        }

        tracing::debug!(worker = self.id, tracked = self.ring.len(), "worker exiting");
        self.close_tracked();
    }

    fn owns(&self, fd: RawFd) -> bool {
        fd >= 0 && self.owned.get(fd as usize).copied().unwrap_or(false)
    }

    fn close_connection(&mut self, fd: RawFd) {
        self.owned[fd as usize] = false;
        syscalls::close_fd(fd);
    }

    /// Head-of-ring expiry: O(expired + stale), stopping at the first live
    /// entry whose deadline is still in the future.
    fn expire(&mut self, death_time: u32) {
        while let Some(fd) = self.ring.peek() {
            if !self.owns(fd) {
                // The descriptor was closed early and possibly recycled
                // elsewhere; the stale entry is discarded unseen.
                self.ring.pop();
                continue;
            }
            let slot = unsafe { self.slots.slot_mut(fd) };
            if !slot.alive {
                self.ring.pop();
                continue;
            }
            if slot.time_to_die <= death_time {
                self.ring.pop();
                slot.alive = false;
                self.close_connection(fd);
                tracing::debug!(worker = self.id, fd, "keep-alive connection expired");
            } else {
                break;
            }
        }
    }

    fn handle_event(&mut self, death_time: u32, fd: RawFd, flags: u32) {
        if !self.slots.contains(fd) {
            // Outside the descriptor budget; only reachable when the budget
            // was capped below the process limit.
            tracing::warn!(worker = self.id, fd, "event for descriptor outside the slot table");
            let _ = self.notifier.deregister(fd);
            syscalls::close_fd(fd);
            return;
        }
        // Event delivery proves the fd is registered with this worker.
        self.owned[fd as usize] = true;
        let slot = unsafe { self.slots.slot_mut(fd) };

        if flags & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0 {
            if let Err(e) = self.notifier.deregister(fd) {
                tracing::warn!(worker = self.id, fd, error = %e, "deregister failed");
            }
            slot.alive = false;
            self.close_connection(fd);
            return;
        }

        if !slot.alive {
            // New or recycled descriptor; rebind the slot without touching
            // its buffers' capacity.
            slot.reset(fd);
        }

        // Even when the request could not be handled, the disposition left
        // in is_keep_alive decides whether the connection survives.
        request::process_request(slot, &self.url_map);

        if slot.is_keep_alive {
            slot.time_to_die = death_time.wrapping_add(self.keep_alive_timeout);
            if !slot.alive {
                if self.ring.push(fd) {
                    slot.alive = true;
                } else {
                    tracing::warn!(worker = self.id, fd, "death ring at quota, closing connection");
                    let _ = self.notifier.deregister(fd);
                    self.close_connection(fd);
                }
            }
            // Already tracked: the deadline update above is enough. The fd
            // is not re-appended; a duplicate would corrupt the population
            // count.
        } else {
            // The entry, if any, stays in the ring; expiry discards it once
            // its deadline passes because the slot is no longer alive.
            slot.alive = false;
            self.close_connection(fd);
        }
    }

    /// Close any connection still tracked at shutdown so descriptors do not
    /// outlive the slot table.
    fn close_tracked(&mut self) {
        while let Some(fd) = self.ring.pop() {
            if !self.owns(fd) {
                continue;
            }
            let slot = unsafe { self.slots.slot_mut(fd) };
            if slot.alive {
                slot.alive = false;
                self.close_connection(fd);
            }
        }
    }
}
