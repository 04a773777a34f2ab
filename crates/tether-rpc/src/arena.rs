//! Per-packet scratch memory.
//!
//! Copy staging goes through a pooled buffer handed out per packet;
//! decoded argument vectors (including the packet-lifetime
//! remote-object values inside them) are plain owned values whose
//! lifetime the event handler scopes to the packet, so only the staging
//! storage needs explicit recycling. `recycle_all` runs exactly once
//! per return to the idle state.

/// Staging capacity retained across packets. Larger transfers still
/// work; their excess capacity is released on recycle.
const RETAIN_CAPACITY: usize = 1 << 20;

/// Scratch allocator recycled on every return to idle.
pub struct Arena {
    pool: Option<Vec<u8>>,
    recycles: u64,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            pool: None,
            recycles: 0,
        }
    }

    /// A zeroed staging buffer of exactly `nbytes`, reusing pooled
    /// capacity when available. Hand it back with [`restore`] so the
    /// next packet can reuse it.
    ///
    /// [`restore`]: Arena::restore
    pub fn staging(&mut self, nbytes: usize) -> Vec<u8> {
        let mut buf = self.pool.take().unwrap_or_default();
        buf.clear();
        buf.resize(nbytes, 0);
        buf
    }

    /// Return a staging buffer to the pool.
    pub fn restore(&mut self, buf: Vec<u8>) {
        self.pool = Some(buf);
    }

    /// Release per-packet scratch. Oversized capacity from a large
    /// transfer is returned to the allocator.
    pub fn recycle_all(&mut self) {
        if let Some(buf) = self.pool.as_mut() {
            buf.clear();
            if buf.capacity() > RETAIN_CAPACITY {
                buf.shrink_to(RETAIN_CAPACITY);
            }
        }
        self.recycles += 1;
    }

    /// Number of recycles so far; one per return to idle.
    pub fn recycle_count(&self) -> u64 {
        self.recycles
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
