// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Host-visible scratch memory handed out by bump allocation.
//!
//! Priming uploads texel data through buffers that only live until the commands reading them
//! have executed. A [`FlushingMemory`] owns one host-visible memory block per device and hands
//! out ranges of it by bumping a free-start offset, the same way a bump allocator suballocates a
//! region. Individual ranges are never freed. Instead the whole block is reclaimed at once by a
//! *flush*, which first tells every registered user to finish the GPU work that may still read
//! from the block.
//!
//! # Flushes
//!
//! A flush happens when an allocation does not fit into the remaining space, when a request is
//! larger than the whole block (which also replaces the block by a larger one), and when the
//! memory is freed. Every [`Allocation`] returned before a flush is invalid afterwards, which
//! [`FlushingMemory::is_valid`] reports.

use crate::{
    align_up,
    builder::StateBuilder,
    command::{Command, Object},
    state::PhysicalDeviceObject,
    DeviceSize,
};
use ash::vk;

/// Identifies a user of a [`FlushingMemory`] that must be notified before the memory is
/// reclaimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlushUser {
    /// The command handler of a queue, which has to submit and wait for its recorded work.
    QueueCommandHandler(vk::Queue),
}

/// Receives the flush notifications of a [`FlushingMemory`].
pub trait FlushListener {
    /// Called once per registered user, in registration order, before `memory` is reclaimed.
    fn on_resource_flush(
        &mut self,
        sb: &mut StateBuilder<'_>,
        user: FlushUser,
        memory: vk::DeviceMemory,
    );
}

impl<F> FlushListener for F
where
    F: FnMut(&mut StateBuilder<'_>, FlushUser, vk::DeviceMemory),
{
    #[inline]
    fn on_resource_flush(
        &mut self,
        sb: &mut StateBuilder<'_>,
        user: FlushUser,
        memory: vk::DeviceMemory,
    ) {
        self(sb, user, memory)
    }
}

/// A range of a [`FlushingMemory`], valid until the memory is next flushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    memory: vk::DeviceMemory,
    offset: DeviceSize,
    size: DeviceSize,
    generation: u64,
}

impl Allocation {
    /// Returns the memory block the range lies in.
    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Returns the offset of the range within the memory block.
    #[inline]
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    /// Returns the size of the range, rounded up to the memory's alignment.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }
}

/// A bump allocator over a single host-visible, host-coherent memory block.
#[derive(Debug)]
pub struct FlushingMemory {
    device: vk::Device,
    memory: vk::DeviceMemory,
    memory_type_index: u32,
    size: DeviceSize,
    alignment: DeviceSize,
    free_start: DeviceSize,
    generation: u64,
    users: Vec<FlushUser>,
}

impl FlushingMemory {
    /// Allocates a memory block of `initial_size` bytes on `device`.
    ///
    /// # Panics
    ///
    /// - Panics if `alignment` is not a power of two.
    /// - Panics if the device is unknown or has no host-visible, host-coherent memory type.
    pub fn new(
        sb: &mut StateBuilder<'_>,
        device: vk::Device,
        initial_size: DeviceSize,
        alignment: DeviceSize,
    ) -> Self {
        assert!(alignment.is_power_of_two());

        let memory_type_index = {
            let Some(physical_device) = sb.physical_device_of(device) else {
                panic!("cannot allocate scratch memory on unknown device {device:?}");
            };

            let Some(index) = find_memory_type_index(
                physical_device,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                u32::MAX,
            ) else {
                panic!("device {device:?} has no host-visible and host-coherent memory type");
            };

            index
        };

        let size = align_up(initial_size.max(alignment), alignment);
        let memory = allocate_memory(sb, device, size, memory_type_index);

        FlushingMemory {
            device,
            memory,
            memory_type_index,
            size,
            alignment,
            free_start: 0,
            generation: 0,
            users: Vec::new(),
        }
    }

    #[inline]
    pub fn device(&self) -> vk::Device {
        self.device
    }

    /// Returns the current memory block. It changes when the memory grows.
    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Returns the capacity of the current memory block.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn alignment(&self) -> DeviceSize {
        self.alignment
    }

    /// Returns the offset that the next allocation starts at.
    #[inline]
    pub fn free_start(&self) -> DeviceSize {
        self.free_start
    }

    /// Registers `user` to be notified on every flush. Registering a user twice has no effect.
    pub fn register_user(&mut self, user: FlushUser) {
        if !self.users.contains(&user) {
            self.users.push(user);
        }
    }

    /// Returns whether `allocation` was returned by this memory since its last flush.
    #[inline]
    pub fn is_valid(&self, allocation: &Allocation) -> bool {
        allocation.generation == self.generation && allocation.memory == self.memory
    }

    /// Allocates `size` bytes, rounded up to the alignment.
    ///
    /// Flushes first if the request does not fit into the remaining space, and replaces the
    /// memory block by one at least twice as large if the request does not fit at all.
    pub fn allocate(
        &mut self,
        sb: &mut StateBuilder<'_>,
        size: DeviceSize,
        listener: &mut dyn FlushListener,
    ) -> Allocation {
        let size = align_up(size.max(1), self.alignment);

        if size > self.size {
            self.expand(sb, size.max(self.size * 2), listener);
        } else if size > self.size - self.free_start {
            self.flush(sb, listener);
        }

        let offset = self.free_start;
        self.free_start += size;

        Allocation {
            memory: self.memory,
            offset,
            size,
            generation: self.generation,
        }
    }

    /// Notifies every user, then invalidates all allocations and resets the free start.
    pub fn flush(&mut self, sb: &mut StateBuilder<'_>, listener: &mut dyn FlushListener) {
        log::trace!(
            "flushing scratch memory {:?} with {} bytes in use",
            self.memory,
            self.free_start,
        );

        for &user in &self.users {
            listener.on_resource_flush(sb, user, self.memory);
        }

        self.generation += 1;
        self.free_start = 0;
    }

    /// Flushes and then destroys the memory block.
    pub fn free(mut self, sb: &mut StateBuilder<'_>, listener: &mut dyn FlushListener) {
        self.flush(sb, listener);
        sb.write(Command::Destroy {
            device: self.device,
            object: Object::DeviceMemory(self.memory),
        });
    }

    fn expand(
        &mut self,
        sb: &mut StateBuilder<'_>,
        new_size: DeviceSize,
        listener: &mut dyn FlushListener,
    ) {
        self.flush(sb, listener);
        sb.write(Command::Destroy {
            device: self.device,
            object: Object::DeviceMemory(self.memory),
        });

        let new_size = align_up(new_size, self.alignment);

        log::debug!(
            "growing scratch memory of device {:?} from {} to {} bytes",
            self.device,
            self.size,
            new_size,
        );

        self.memory = allocate_memory(sb, self.device, new_size, self.memory_type_index);
        self.size = new_size;
    }
}

fn allocate_memory(
    sb: &mut StateBuilder<'_>,
    device: vk::Device,
    size: DeviceSize,
    memory_type_index: u32,
) -> vk::DeviceMemory {
    let memory = sb.new_handle();
    sb.write(Command::AllocateMemory {
        device,
        memory,
        size,
        memory_type_index,
    });

    memory
}

/// Returns the index of the first memory type allowed by `type_bits` that has all of the
/// `required` property flags.
pub fn find_memory_type_index(
    physical_device: &PhysicalDeviceObject,
    required: vk::MemoryPropertyFlags,
    type_bits: u32,
) -> Option<u32> {
    let properties = &physical_device.memory_properties;

    (0..properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)).find(|&index| {
        type_bits & (1 << index) != 0
            && properties.memory_types[index as usize]
                .property_flags
                .contains(required)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn no_users(_: &mut StateBuilder<'_>, _: FlushUser, _: vk::DeviceMemory) {
        unreachable!();
    }

    #[derive(Default)]
    struct Notifications(Vec<FlushUser>);

    impl FlushListener for Notifications {
        fn on_resource_flush(&mut self, _: &mut StateBuilder<'_>, user: FlushUser, _: vk::DeviceMemory) {
            self.0.push(user);
        }
    }

    #[test]
    fn picks_host_visible_memory() {
        test_state!(fixture);

        let device = fixture.device;
        let memory = FlushingMemory::new(&mut fixture.builder(), device, 1000, 256);

        assert_eq!(memory.size(), 1024);
        assert_eq!(memory.memory_type_index, 1);
        assert_eq!(fixture.sink.names(), ["vkAllocateMemory"]);
    }

    #[test]
    fn allocations_are_disjoint_and_aligned() {
        test_state!(fixture);

        let device = fixture.device;
        let mut sb = fixture.builder();
        let mut memory = FlushingMemory::new(&mut sb, device, 4096, 64);
        let mut ranges = Vec::new();

        for size in [1, 64, 65, 200, 3, 128, 1000] {
            let allocation = memory.allocate(&mut sb, size, &mut no_users);

            assert_eq!(allocation.offset() % 64, 0);
            assert!(allocation.size() >= size);
            assert!(allocation.offset() + allocation.size() <= memory.size());
            ranges.push(allocation.offset()..allocation.offset() + allocation.size());
        }

        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                assert!(a.end <= b.start || b.end <= a.start, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn flush_invalidates_and_notifies_in_order() {
        test_state!(fixture);

        let device = fixture.device;
        let mut sb = fixture.builder();
        let mut memory = FlushingMemory::new(&mut sb, device, 1024, 256);
        let first = vk::Queue::from_raw(0x70);
        let second = vk::Queue::from_raw(0x71);
        memory.register_user(FlushUser::QueueCommandHandler(second));
        memory.register_user(FlushUser::QueueCommandHandler(first));
        memory.register_user(FlushUser::QueueCommandHandler(second));

        let mut listener = Notifications::default();

        let a = memory.allocate(&mut sb, 512, &mut listener);
        let b = memory.allocate(&mut sb, 512, &mut listener);
        assert!(memory.is_valid(&a) && memory.is_valid(&b));
        assert!(listener.0.is_empty());

        // Does not fit anymore.
        let c = memory.allocate(&mut sb, 256, &mut listener);
        assert!(!memory.is_valid(&a) && !memory.is_valid(&b));
        assert!(memory.is_valid(&c));
        assert_eq!(c.offset(), 0);

        memory.flush(&mut sb, &mut listener);
        assert!(!memory.is_valid(&c));
        assert_eq!(memory.allocate(&mut sb, 1, &mut listener).offset(), 0);

        assert_eq!(
            listener.0,
            [
                FlushUser::QueueCommandHandler(second),
                FlushUser::QueueCommandHandler(first),
                FlushUser::QueueCommandHandler(second),
                FlushUser::QueueCommandHandler(first),
            ],
        );
    }

    #[test]
    fn oversized_requests_replace_the_memory() {
        test_state!(fixture);

        let device = fixture.device;
        let (old, new) = {
            let mut sb = fixture.builder();
            let mut memory = FlushingMemory::new(&mut sb, device, 1024, 256);
            let old = memory.memory();
            let small = memory.allocate(&mut sb, 16, &mut no_users);
            let big = memory.allocate(&mut sb, 1500, &mut no_users);

            assert!(!memory.is_valid(&small));
            assert_eq!(big.offset(), 0);
            assert_eq!(memory.size(), 2048);
            assert_ne!(memory.memory(), old);

            let new = memory.memory();
            memory.free(&mut sb, &mut no_users);

            (old, new)
        };

        assert_eq!(
            fixture.sink.names(),
            ["vkAllocateMemory", "vkFreeMemory", "vkAllocateMemory", "vkFreeMemory"],
        );
        assert!(!fixture.new_state.device_memories.contains_key(&old));
        assert!(!fixture.new_state.device_memories.contains_key(&new));
    }
}
