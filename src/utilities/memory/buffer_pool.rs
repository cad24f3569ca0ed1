//! Power-of-two bucketed slab allocator backing all simulation storage.
//!
//! Each bucket suballocates fixed-size regions out of large blocks pulled
//! from the system allocator, so per-frame takes and returns never touch the
//! general purpose heap. Returned slots are reused in LIFO order.

use super::buffer::Buffer;
use std::alloc::{self, Layout};
use std::mem::size_of;
use std::ptr;

/// Alignment enforced for every block allocation. Applies at block
/// granularity only, so a generous value costs nothing.
pub const BLOCK_ALIGNMENT: usize = 128;

/// Highest supported allocation power. Buffers larger than 2^30 bytes are a
/// configuration error.
pub const MAXIMUM_POWER: i32 = 30;

/// Bits below this shift hold the slot index within a power's id space.
const ID_POWER_SHIFT: i32 = 26;

/// Vec-backed id source used internally by the pool for slot indices.
/// (The pool cannot rent buffers from itself for its own bookkeeping.)
struct SlotIdSource {
    available: Vec<i32>,
    next_index: i32,
}

impl SlotIdSource {
    fn new() -> Self {
        Self {
            available: Vec::new(),
            next_index: 0,
        }
    }

    #[inline(always)]
    fn take(&mut self) -> i32 {
        match self.available.pop() {
            Some(id) => id,
            None => {
                let id = self.next_index;
                self.next_index += 1;
                id
            }
        }
    }

    #[inline(always)]
    fn return_id(&mut self, id: i32) {
        self.available.push(id);
    }

    fn clear(&mut self) {
        self.available.clear();
        self.next_index = 0;
    }
}

struct PowerPool {
    blocks: Vec<*mut u8>,
    slots: SlotIdSource,
    /// log2 of the suballocation size.
    power: i32,
    suballocation_size: i32,
    block_size: i32,
    suballocations_per_block_shift: i32,
    suballocations_per_block_mask: i32,
    block_count: i32,

    #[cfg(debug_assertions)]
    outstanding_ids: std::collections::HashSet<i32>,
}

impl PowerPool {
    fn new(power: i32, minimum_block_size: i32) -> Self {
        let suballocation_size = 1i32 << power;
        let block_size = suballocation_size.max(minimum_block_size);
        let suballocations_per_block = block_size / suballocation_size;
        debug_assert!((suballocations_per_block as u32).is_power_of_two());
        let suballocations_per_block_shift = suballocations_per_block.trailing_zeros() as i32;
        Self {
            blocks: Vec::new(),
            slots: SlotIdSource::new(),
            power,
            suballocation_size,
            block_size,
            suballocations_per_block_shift,
            suballocations_per_block_mask: suballocations_per_block - 1,
            block_count: 0,
            #[cfg(debug_assertions)]
            outstanding_ids: std::collections::HashSet::new(),
        }
    }

    fn layout(&self) -> Layout {
        Layout::from_size_align(self.block_size as usize, BLOCK_ALIGNMENT)
            .expect("block layout must be valid")
    }

    fn allocate_block(&mut self, block_index: i32) {
        debug_assert!(block_index as usize <= self.blocks.len());
        if block_index as usize == self.blocks.len() {
            self.blocks.push(ptr::null_mut());
        }
        debug_assert!(self.blocks[block_index as usize].is_null());
        let layout = self.layout();
        let memory = unsafe { alloc::alloc(layout) };
        if memory.is_null() {
            alloc::handle_alloc_error(layout);
        }
        self.blocks[block_index as usize] = memory;
        self.block_count = self.block_count.max(block_index + 1);
    }

    fn ensure_capacity(&mut self, byte_count: i32) {
        let needed_blocks =
            ((byte_count as i64 + self.block_size as i64 - 1) / self.block_size as i64) as i32;
        for i in self.block_count..needed_blocks {
            self.allocate_block(i);
        }
    }

    fn take(&mut self) -> Buffer<u8> {
        let slot = self.slots.take();
        let block_index = slot >> self.suballocations_per_block_shift;
        if block_index >= self.block_count {
            self.allocate_block(block_index);
        }
        let index_in_block = slot & self.suballocations_per_block_mask;
        let memory = unsafe {
            self.blocks[block_index as usize]
                .add((index_in_block * self.suballocation_size) as usize)
        };
        let id = (self.power << ID_POWER_SHIFT) | slot;
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                self.outstanding_ids.insert(slot),
                "A slot cannot be handed out twice without an intervening return."
            );
        }
        Buffer::new(memory, self.suballocation_size, id)
    }

    fn return_slot(&mut self, slot: i32) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                self.outstanding_ids.remove(&slot),
                "Returned buffer was not taken from this pool, or was already returned."
            );
        }
        self.slots.return_id(slot);
    }

    #[cfg(debug_assertions)]
    fn validate_contains<T>(&self, buffer: &Buffer<T>) {
        let bytes: Buffer<u8> = buffer.cast();
        let slot = bytes.id() & ((1 << ID_POWER_SHIFT) - 1);
        let block_index = slot >> self.suballocations_per_block_shift;
        let index_in_block = slot & self.suballocations_per_block_mask;
        debug_assert!(bytes.len() <= self.suballocation_size);
        debug_assert!(block_index >= 0 && block_index < self.block_count);
        let expected = unsafe {
            self.blocks[block_index as usize]
                .add((index_in_block * self.suballocation_size) as usize)
        };
        debug_assert!(
            expected == bytes.as_ptr() as *mut u8,
            "Buffer address must match the address implied by its id."
        );
    }

    fn clear(&mut self) {
        let layout = self.layout();
        for block in self.blocks.iter_mut() {
            if !block.is_null() {
                unsafe { alloc::dealloc(*block, layout) };
                *block = ptr::null_mut();
            }
        }
        self.block_count = 0;
        self.slots.clear();
        #[cfg(debug_assertions)]
        self.outstanding_ids.clear();
    }
}

impl Drop for PowerPool {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Pool of power-of-two sized buffers suballocated from larger blocks.
///
/// Takes and returns are O(1). The pool performs no internal synchronization;
/// use one pool per thread for ephemeral allocations.
pub struct BufferPool {
    pools: Vec<PowerPool>,
}

impl BufferPool {
    /// Creates a pool whose blocks are at least `minimum_block_allocation_size`
    /// bytes. The size must be a power of two.
    pub fn new(minimum_block_allocation_size: i32) -> Self {
        assert!(
            minimum_block_allocation_size > 0
                && (minimum_block_allocation_size as u32).is_power_of_two(),
            "Block allocation size must be a power of 2."
        );
        let mut pools = Vec::with_capacity(MAXIMUM_POWER as usize + 1);
        for power in 0..=MAXIMUM_POWER {
            pools.push(PowerPool::new(power, minimum_block_allocation_size));
        }
        Self { pools }
    }

    /// Smallest power of two capable of holding `byte_count` bytes,
    /// expressed as an exponent.
    #[inline(always)]
    pub fn get_containing_power(byte_count: i32) -> i32 {
        debug_assert!(byte_count >= 0);
        let byte_count = byte_count.max(1) as u32;
        (32 - (byte_count - 1).leading_zeros()) as i32
    }

    /// Element capacity of the buffer the pool would return for a requested
    /// element count.
    #[inline(always)]
    pub fn get_capacity_for_count<T>(count: i32) -> i32 {
        let count = count.max(1);
        let bytes = (count as u32 * size_of::<T>() as u32).next_power_of_two();
        (bytes as usize / size_of::<T>()) as i32
    }

    /// Takes a typed buffer with capacity for at least `count` elements. The
    /// returned length reflects the full rounded-up capacity.
    #[inline(always)]
    pub fn take_at_least<T>(&mut self, count: i32) -> Buffer<T> {
        let byte_count = count.max(1) as i64 * size_of::<T>() as i64;
        debug_assert!(byte_count <= 1i64 << MAXIMUM_POWER, "Allocation too large for the pool.");
        let power = Self::get_containing_power(byte_count as i32);
        self.pools[power as usize].take().cast()
    }

    /// Takes a typed buffer whose exposed length is exactly `count`.
    #[inline(always)]
    pub fn take<T>(&mut self, count: i32) -> Buffer<T> {
        let mut buffer = self.take_at_least::<T>(count);
        buffer.set_length(count);
        buffer
    }

    /// Preallocates blocks so a power can serve at least `byte_count` bytes
    /// without hitting the system allocator.
    pub fn ensure_capacity_for_power(&mut self, byte_count: i32, power: i32) {
        debug_assert!(power >= 0 && power <= MAXIMUM_POWER);
        self.pools[power as usize].ensure_capacity(byte_count);
    }

    #[inline(always)]
    fn decompose_id(buffer_id: i32) -> (i32, i32) {
        (
            buffer_id >> ID_POWER_SHIFT,
            buffer_id & ((1 << ID_POWER_SHIFT) - 1),
        )
    }

    /// Returns a buffer slot by id without clearing the caller's span.
    #[inline(always)]
    pub fn return_unsafely(&mut self, id: i32) {
        let (power, slot) = Self::decompose_id(id);
        self.pools[power as usize].return_slot(slot);
    }

    /// Returns a buffer to the pool and resets the span to default.
    pub fn return_buffer<T>(&mut self, buffer: &mut Buffer<T>) {
        debug_assert!(buffer.allocated(), "Cannot return an unallocated buffer.");
        #[cfg(debug_assertions)]
        {
            let (power, _) = Self::decompose_id(buffer.id());
            self.pools[power as usize].validate_contains(buffer);
        }
        self.return_unsafely(buffer.id());
        *buffer = Buffer::default();
    }

    /// Resizes a buffer to the smallest pool size holding `target_size`
    /// elements, copying `copy_count` elements if a new allocation is needed.
    /// An unallocated buffer is treated as an empty source.
    pub fn resize_to_at_least<T>(
        &mut self,
        buffer: &mut Buffer<T>,
        target_size: i32,
        copy_count: i32,
    ) {
        let target_size = Self::get_capacity_for_count::<T>(target_size);
        if !buffer.allocated() {
            debug_assert!(copy_count == 0, "Cannot copy from an unallocated buffer.");
            *buffer = self.take_at_least(target_size);
            return;
        }
        let allocated_bytes = 1i32 << (buffer.id() >> ID_POWER_SHIFT);
        let allocated_capacity = (allocated_bytes as usize / size_of::<T>()) as i32;
        debug_assert!(
            copy_count <= target_size && copy_count <= allocated_capacity,
            "Cannot copy more elements than fit in the source or target."
        );
        if target_size > allocated_capacity {
            let mut replacement: Buffer<T> = self.take_at_least(target_size);
            buffer.copy_to(0, &mut replacement, 0, copy_count);
            self.return_unsafely(buffer.id());
            *buffer = replacement;
        } else {
            // Existing allocation is large enough; expose its full capacity.
            buffer.set_length(allocated_capacity);
        }
    }

    /// Resizes a buffer and pins the exposed length to exactly `target_size`.
    pub fn resize<T>(&mut self, buffer: &mut Buffer<T>, target_size: i32, copy_count: i32) {
        self.resize_to_at_least(buffer, target_size, copy_count);
        buffer.set_length(target_size);
    }

    /// Total bytes currently held from the system allocator.
    pub fn get_total_allocated_byte_count(&self) -> u64 {
        self.pools
            .iter()
            .map(|p| p.block_count as u64 * p.block_size as u64)
            .sum()
    }

    /// Number of taken-but-not-returned buffers for a power. Debug builds
    /// only; this is the accounting hook leak tests assert against.
    #[cfg(debug_assertions)]
    pub fn outstanding_allocation_count(&self, power: i32) -> usize {
        self.pools[power as usize].outstanding_ids.len()
    }

    /// Asserts that no allocations are outstanding in any power.
    #[cfg(debug_assertions)]
    pub fn assert_empty(&self) {
        for (power, pool) in self.pools.iter().enumerate() {
            debug_assert!(
                pool.outstanding_ids.is_empty(),
                "Power pool {} still contains {} outstanding allocations.",
                power,
                pool.outstanding_ids.len()
            );
        }
    }

    /// Releases all blocks back to the system allocator. Outstanding buffers
    /// are silently invalidated; the pool remains usable afterward.
    pub fn clear(&mut self) {
        for pool in &mut self.pools {
            pool.clear();
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(131072)
    }
}

unsafe impl Send for BufferPool {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_capacity_to_powers_of_two() {
        let mut pool = BufferPool::new(4096);
        let buffer: Buffer<u8> = pool.take_at_least(3000);
        assert_eq!(buffer.len(), 4096);
        let mut buffer = buffer;
        pool.return_buffer(&mut buffer);
        let buffer: Buffer<f32> = pool.take_at_least(5);
        assert_eq!(buffer.len(), 8);
        let mut buffer = buffer;
        pool.return_buffer(&mut buffer);
        pool.clear();
    }

    #[test]
    fn reuses_slots_in_lifo_order() {
        let mut pool = BufferPool::new(4096);
        let mut a: Buffer<u8> = pool.take_at_least(64);
        let a_ptr = a.as_ptr();
        pool.return_buffer(&mut a);
        let mut b: Buffer<u8> = pool.take_at_least(64);
        assert_eq!(b.as_ptr(), a_ptr);
        pool.return_buffer(&mut b);
        pool.clear();
    }

    #[test]
    fn resize_preserves_contents() {
        let mut pool = BufferPool::new(4096);
        let mut buffer: Buffer<i32> = pool.take(4);
        for i in 0..4 {
            *buffer.get_mut(i) = i * 10;
        }
        pool.resize(&mut buffer, 64, 4);
        assert_eq!(buffer.len(), 64);
        for i in 0..4 {
            assert_eq!(*buffer.get(i), i * 10);
        }
        pool.return_buffer(&mut buffer);
        pool.clear();
    }

    #[cfg(debug_assertions)]
    #[test]
    fn tracks_outstanding_allocations() {
        let mut pool = BufferPool::new(4096);
        let power = BufferPool::get_containing_power(256);
        let baseline = pool.outstanding_allocation_count(power);
        let mut a: Buffer<u8> = pool.take(256);
        let mut b: Buffer<u8> = pool.take(256);
        assert_eq!(pool.outstanding_allocation_count(power), baseline + 2);
        pool.return_buffer(&mut a);
        pool.return_buffer(&mut b);
        assert_eq!(pool.outstanding_allocation_count(power), baseline);
        pool.clear();
    }

    #[test]
    fn containing_power_is_minimal() {
        assert_eq!(BufferPool::get_containing_power(1), 0);
        assert_eq!(BufferPool::get_containing_power(2), 1);
        assert_eq!(BufferPool::get_containing_power(3), 2);
        assert_eq!(BufferPool::get_containing_power(1024), 10);
        assert_eq!(BufferPool::get_containing_power(1025), 11);
    }
}
