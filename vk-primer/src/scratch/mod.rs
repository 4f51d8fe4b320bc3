// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Transient objects used to execute priming work.
//!
//! [`ScratchResources`] keeps at most one of each per key: a [`FlushingMemory`] per device, a
//! command pool per queue family of a device, and a [`QueueCommandHandler`] per queue. It is
//! created at the start of a state rebuild and freed at its end.
//!
//! Work is described by a [`QueueCommandBatch`] and committed to a queue with
//! [`ScratchResources::commit`]. The scratch buffers of a batch are suballocated from the
//! device's flushing memory, so whenever that memory flushes, every queue that recorded commands
//! reading from it is submitted and waited for first.

pub use self::queue::{QueueCommandBatch, QueueCommandHandler};
use crate::{
    align_up,
    builder::StateBuilder,
    cleanup::CleanupStack,
    command::{Command, MemoryWrite, Object},
    memory::{FlushListener, FlushUser, FlushingMemory},
    state::BufferInfo,
    DeviceSize, NonExhaustive,
};
use ash::vk;
use std::collections::BTreeMap;

mod queue;

/// Parameters to create a new [`ScratchResources`].
#[derive(Clone, Debug)]
pub struct ScratchResourcesCreateInfo<'a> {
    /// The size of the memory block each device's flushing memory starts with.
    ///
    /// The default value is 64 MiB.
    pub initial_memory_size: DeviceSize,

    /// The alignment of every scratch allocation. Must be a power of two.
    ///
    /// The default value is `256`.
    pub memory_alignment: DeviceSize,

    pub _ne: NonExhaustive<'a>,
}

impl Default for ScratchResourcesCreateInfo<'_> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchResourcesCreateInfo<'_> {
    /// Returns a default `ScratchResourcesCreateInfo`.
    #[inline]
    pub const fn new() -> Self {
        ScratchResourcesCreateInfo {
            initial_memory_size: 64 * 1024 * 1024,
            memory_alignment: 256,
            _ne: crate::NE,
        }
    }
}

/// Registry of the scratch objects of one state rebuild.
#[derive(Debug)]
pub struct ScratchResources {
    initial_memory_size: DeviceSize,
    memory_alignment: DeviceSize,
    memories: BTreeMap<vk::Device, FlushingMemory>,
    command_pools: BTreeMap<(vk::Device, u32), vk::CommandPool>,
    handlers: BTreeMap<vk::Queue, QueueCommandHandler>,
}

impl ScratchResources {
    /// # Panics
    ///
    /// - Panics if `create_info.memory_alignment` is not a power of two.
    pub fn new(create_info: &ScratchResourcesCreateInfo<'_>) -> Self {
        let &ScratchResourcesCreateInfo {
            initial_memory_size,
            memory_alignment,
            _ne: _,
        } = create_info;

        assert!(memory_alignment.is_power_of_two());

        ScratchResources {
            initial_memory_size,
            memory_alignment,
            memories: BTreeMap::new(),
            command_pools: BTreeMap::new(),
            handlers: BTreeMap::new(),
        }
    }

    /// Returns the command pool for `queue_family_index` of `device`, creating it on first use.
    pub fn get_command_pool(
        &mut self,
        sb: &mut StateBuilder<'_>,
        device: vk::Device,
        queue_family_index: u32,
    ) -> vk::CommandPool {
        command_pool(&mut self.command_pools, sb, device, queue_family_index)
    }

    /// Returns the flushing memory of `device`, creating it on first use.
    pub fn get_flushing_memory(
        &mut self,
        sb: &mut StateBuilder<'_>,
        device: vk::Device,
    ) -> &mut FlushingMemory {
        flushing_memory(
            &mut self.memories,
            sb,
            device,
            self.initial_memory_size,
            self.memory_alignment,
        )
    }

    /// Returns the command handler of `queue`, creating it on first use.
    ///
    /// # Panics
    ///
    /// - Panics if `queue` is in neither state.
    pub fn get_queue_command_handler(
        &mut self,
        sb: &mut StateBuilder<'_>,
        queue: vk::Queue,
    ) -> &mut QueueCommandHandler {
        let Self {
            command_pools,
            handlers,
            ..
        } = self;

        handlers.entry(queue).or_insert_with(|| {
            let Some((device, family_index)) = sb.queue_info(queue) else {
                panic!("cannot record scratch commands on unknown queue {queue:?}");
            };
            let pool = command_pool(command_pools, sb, device, family_index);

            QueueCommandHandler::new(queue, device, pool)
        })
    }

    /// Commits `batch` to the command handler of `queue`.
    ///
    /// The batch's scratch buffers are created in one contiguous range of the device's flushing
    /// memory, filled through a map, flush and unmap of that range, and then the batch's
    /// recording closures run on the queue's current command buffer. A batch without recording
    /// closures only hands its objects over, to be destroyed after the queue's next wait.
    pub fn commit(&mut self, sb: &mut StateBuilder<'_>, queue: vk::Queue, mut batch: QueueCommandBatch) {
        let device = self.get_queue_command_handler(sb, queue).device();

        log::trace!("committing batch `{}` to queue {queue:?}", batch.name());

        let mut offsets = Vec::with_capacity(batch.scratch_buffers.len());
        let mut total_size = 0;

        for request in &batch.scratch_buffers {
            offsets.push(total_size);
            total_size = align_up(total_size + request.size, self.memory_alignment);
        }

        let mut owned_cleanup = CleanupStack::new();

        if !batch.scratch_buffers.is_empty() {
            let Self {
                initial_memory_size,
                memory_alignment,
                memories,
                handlers,
                ..
            } = self;
            let memory =
                flushing_memory(memories, sb, device, *initial_memory_size, *memory_alignment);
            memory.register_user(FlushUser::QueueCommandHandler(queue));

            // Allocating can flush, which submits and waits for this queue's work as well.
            let allocation = memory.allocate(sb, total_size, &mut SubmitAndWait { handlers });
            let device_memory = allocation.memory();
            let mut writes = Vec::new();

            for (request, &offset) in batch.scratch_buffers.iter().zip(&offsets) {
                sb.write(Command::CreateBuffer {
                    device,
                    buffer: request.buffer,
                    info: BufferInfo {
                        size: request.size,
                        usage: request.usage,
                        sharing_mode: vk::SharingMode::EXCLUSIVE,
                    },
                });
                sb.write(Command::BindBufferMemory {
                    device,
                    buffer: request.buffer,
                    memory: device_memory,
                    offset: allocation.offset() + offset,
                });
                owned_cleanup.push(device, Object::Buffer(request.buffer));

                writes.extend(request.writes.iter().map(|w| MemoryWrite {
                    offset: offset + w.offset,
                    data: w.data,
                }));
            }

            sb.write(Command::MapMemory {
                device,
                memory: device_memory,
                offset: allocation.offset(),
                size: total_size,
            });
            sb.write(Command::FlushMappedMemoryRanges {
                device,
                memory: device_memory,
                offset: allocation.offset(),
                size: total_size,
                writes,
            });
            sb.write(Command::UnmapMemory {
                device,
                memory: device_memory,
            });
        }

        // Scratch buffers go below the batch's own objects, which may refer to them.
        owned_cleanup.append(&mut batch.cleanup);

        let handler = self.get_queue_command_handler(sb, queue);

        if !batch.recorders.is_empty() {
            let command_buffer = handler.command_buffer(sb);

            for recorder in batch.recorders.drain(..) {
                recorder(sb, command_buffer);
            }
        }

        handler.defer_cleanup(&mut owned_cleanup);
    }

    /// Submits and waits for the work recorded on `queue`.
    pub fn flush_queue(&mut self, sb: &mut StateBuilder<'_>, queue: vk::Queue) {
        if let Some(handler) = self.handlers.get_mut(&queue) {
            handler.submit(sb);
            handler.wait_until_finish(sb);
        }
    }

    /// Frees every scratch object.
    ///
    /// All queues are submitted and waited for before any memory or command pool is destroyed.
    pub fn free(mut self, sb: &mut StateBuilder<'_>) {
        for handler in self.handlers.values_mut() {
            handler.submit(sb);
            handler.wait_until_finish(sb);
        }

        for (_, memory) in std::mem::take(&mut self.memories) {
            memory.free(
                sb,
                &mut SubmitAndWait {
                    handlers: &mut self.handlers,
                },
            );
        }

        for handler in self.handlers.values_mut() {
            handler.release(sb);
        }

        for ((device, _), pool) in std::mem::take(&mut self.command_pools) {
            sb.write(Command::Destroy {
                device,
                object: Object::CommandPool(pool),
            });
        }
    }
}

fn flushing_memory<'m>(
    memories: &'m mut BTreeMap<vk::Device, FlushingMemory>,
    sb: &mut StateBuilder<'_>,
    device: vk::Device,
    initial_memory_size: DeviceSize,
    memory_alignment: DeviceSize,
) -> &'m mut FlushingMemory {
    memories.entry(device).or_insert_with(|| {
        log::debug!("creating scratch memory for device {device:?}");

        FlushingMemory::new(sb, device, initial_memory_size, memory_alignment)
    })
}

fn command_pool(
    command_pools: &mut BTreeMap<(vk::Device, u32), vk::CommandPool>,
    sb: &mut StateBuilder<'_>,
    device: vk::Device,
    queue_family_index: u32,
) -> vk::CommandPool {
    *command_pools
        .entry((device, queue_family_index))
        .or_insert_with(|| {
            let pool = sb.new_handle();
            sb.write(Command::CreateCommandPool {
                device,
                pool,
                queue_family_index,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            });

            pool
        })
}

/// Finishes the work of every queue that uses a flushing memory.
struct SubmitAndWait<'a> {
    handlers: &'a mut BTreeMap<vk::Queue, QueueCommandHandler>,
}

impl FlushListener for SubmitAndWait<'_> {
    fn on_resource_flush(
        &mut self,
        sb: &mut StateBuilder<'_>,
        user: FlushUser,
        _memory: vk::DeviceMemory,
    ) {
        match user {
            FlushUser::QueueCommandHandler(queue) => {
                if let Some(handler) = self.handlers.get_mut(&queue) {
                    handler.submit(sb);
                    handler.wait_until_finish(sb);
                }
            }
        }
    }
}
