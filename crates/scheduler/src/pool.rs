//! Fixed pool of pre-allocated intermediate update buffers.
//!
//! Each buffer holds one update's processed pixel data between the image
//! processor and the hardware working buffer. Buffers move by value into
//! [`crate::entry::UpdateEntry`]s and come back on completion, so ownership is
//! exclusive by construction.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// One staging buffer. `address` points at the pre-allocated backing
/// memory; allocation itself is outside this subsystem.
#[derive(Debug, PartialEq, Eq)]
pub struct UpdateBuffer {
    id: BufferId,
    address: u64,
}

impl UpdateBuffer {
    pub fn address(&self) -> u64 {
        self.address
    }
}

#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    free: Vec<UpdateBuffer>,
}

impl BufferPool {
    pub fn new(capacity: usize, base_address: u64, buffer_size: u64) -> Self {
        let free = (0..capacity)
            .map(|index| UpdateBuffer {
                id: BufferId(index as u32),
                address: base_address + index as u64 * buffer_size,
            })
            .collect();
        Self { capacity, free }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.len() == self.capacity
    }

    pub fn take(&mut self) -> Option<UpdateBuffer> {
        self.free.pop()
    }

    pub fn give_back(&mut self, buffer: UpdateBuffer) {
        debug_assert!(
            self.free.iter().all(|held| held.id != buffer.id),
            "buffer {:?} returned twice",
            buffer.id
        );
        debug_assert!(self.free.len() < self.capacity, "pool over capacity");
        self.free.push(buffer);
    }
}
