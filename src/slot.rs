// src/slot.rs
use std::cell::UnsafeCell;
use std::os::unix::io::RawFd;

/// Initial capacity of each slot's reusable response buffer. Buffers grow on
/// demand and are only released at server shutdown.
pub const RESPONSE_BUF_CAPACITY: usize = 64;

/// Sentinel for a slot not currently bound to a descriptor.
pub const NO_FD: RawFd = -1;

/// Parser scratch owned by the HTTP layer. The reactor only ever clears it.
#[derive(Default)]
pub struct RequestScratch {
    /// Bytes drained off the socket, awaiting a complete request head.
    pub pending: Vec<u8>,
    /// Requests serviced on this connection so far.
    pub requests_served: u32,
}

/// Per-connection state, addressed directly by descriptor value.
pub struct RequestSlot {
    pub fd: RawFd,
    /// Tracked as a keep-alive connection: registered with the owning
    /// worker's notifier and present exactly once in its death ring.
    pub alive: bool,
    /// Disposition of the most recent request on this connection.
    pub is_keep_alive: bool,
    /// Tick deadline after which an idle keep-alive connection is closed.
    pub time_to_die: u32,
    /// Reusable response buffer, allocated once and kept until shutdown.
    pub response: Vec<u8>,
    /// Opaque to the reactor; see `RequestScratch`.
    pub scratch: RequestScratch,
}

impl RequestSlot {
    pub fn with_buffer_capacity(capacity: usize) -> Self {
        Self {
            fd: NO_FD,
            alive: false,
            is_keep_alive: false,
            time_to_die: 0,
            response: Vec::with_capacity(capacity),
            scratch: RequestScratch::default(),
        }
    }

    /// Rebind the slot to `fd`, zeroing everything but the owned buffers,
    /// which are truncated in place so their capacity survives reuse.
    pub fn reset(&mut self, fd: RawFd) {
        self.fd = fd;
        self.alive = false;
        self.is_keep_alive = false;
        self.time_to_die = 0;
        self.response.clear();
        self.scratch.pending.clear();
        self.scratch.requests_served = 0;
    }
}

/// Flat fd-indexed table of request slots, shared by every worker.
///
/// # Safety
///
/// Descriptor ownership partitions the table: a live fd is registered with
/// exactly one worker's notifier, and only that worker dereferences the fd's
/// slot. The acceptor never touches slots. That partition is what makes the
/// unsynchronized interior mutability below sound.
pub struct SlotTable {
    slots: Box<[UnsafeCell<RequestSlot>]>,
}

unsafe impl Sync for SlotTable {}

impl SlotTable {
    /// Allocate the full table once, up front; the table is sized to the
    /// descriptor budget so fd-to-slot is a direct index, no hashing.
    pub fn new(capacity: usize, buffer_capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(RequestSlot::with_buffer_capacity(
                buffer_capacity,
            )));
        }
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        fd >= 0 && (fd as usize) < self.slots.len()
    }

    /// Exclusive access to the slot for `fd`.
    ///
    /// # Safety
    ///
    /// The caller must be the worker that currently owns `fd`, and
    /// `contains(fd)` must hold. See the type-level partition invariant.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, fd: RawFd) -> &mut RequestSlot {
        &mut *self.slots[fd as usize].get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_state_and_keeps_buffers() {
        let table = SlotTable::new(4, 64);
        let slot = unsafe { table.slot_mut(2) };
        slot.response.extend_from_slice(b"hello");
        slot.scratch.pending.extend_from_slice(b"GET /");
        slot.scratch.requests_served = 3;
        slot.alive = true;
        slot.is_keep_alive = true;
        slot.time_to_die = 9;

        let response_capacity = slot.response.capacity();
        slot.reset(2);

        assert_eq!(slot.fd, 2);
        assert!(!slot.alive);
        assert!(!slot.is_keep_alive);
        assert_eq!(slot.time_to_die, 0);
        assert!(slot.response.is_empty());
        assert!(slot.scratch.pending.is_empty());
        assert_eq!(slot.scratch.requests_served, 0);
        assert_eq!(slot.response.capacity(), response_capacity);
    }

    #[test]
    fn table_bounds() {
        let table = SlotTable::new(8, 16);
        assert_eq!(table.capacity(), 8);
        assert!(table.contains(0));
        assert!(table.contains(7));
        assert!(!table.contains(8));
        assert!(!table.contains(NO_FD));
    }
}
