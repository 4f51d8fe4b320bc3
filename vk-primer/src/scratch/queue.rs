// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{
    builder::StateBuilder,
    cleanup::CleanupStack,
    command::{Command, MemoryWrite, Object},
    DeviceSize,
};
use ash::vk;
use std::fmt;

type Recorder = Box<dyn FnOnce(&mut StateBuilder<'_>, vk::CommandBuffer)>;

/// A scratch buffer that is created, bound and filled when its batch is committed.
#[derive(Clone, Debug)]
pub(super) struct ScratchBufferRequest {
    pub(super) buffer: vk::Buffer,
    pub(super) size: DeviceSize,
    pub(super) usage: vk::BufferUsageFlags,
    pub(super) writes: Vec<MemoryWrite>,
}

/// GPU work that is recorded into a queue's command buffer as a unit.
///
/// A batch collects scratch buffers to be filled from the content store, closures that record
/// commands reading from them, and objects to destroy once the work has executed. Nothing is
/// emitted until the batch is committed with
/// [`ScratchResources::commit`](super::ScratchResources::commit).
pub struct QueueCommandBatch {
    name: String,
    pub(super) scratch_buffers: Vec<ScratchBufferRequest>,
    pub(super) recorders: Vec<Recorder>,
    pub(super) cleanup: CleanupStack,
}

impl QueueCommandBatch {
    /// Creates an empty batch. `name` only shows up in logs.
    pub fn new(name: impl Into<String>) -> Self {
        QueueCommandBatch {
            name: name.into(),
            scratch_buffers: Vec::new(),
            recorders: Vec::new(),
            cleanup: CleanupStack::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests a scratch buffer of `size` bytes that holds `writes` when the recorded commands
    /// execute, and returns its handle.
    ///
    /// The buffer is created when the batch is committed and destroyed after the batch's
    /// submission has completed.
    ///
    /// # Panics
    ///
    /// - Panics if a write extends past `size`.
    pub fn new_scratch_buffer(
        &mut self,
        sb: &mut StateBuilder<'_>,
        size: DeviceSize,
        usage: vk::BufferUsageFlags,
        writes: Vec<MemoryWrite>,
    ) -> vk::Buffer {
        assert!(writes.iter().all(|w| w.offset + w.data.size() <= size));

        let buffer = sb.new_handle();
        self.scratch_buffers.push(ScratchBufferRequest {
            buffer,
            size,
            usage,
            writes,
        });

        buffer
    }

    /// Adds a closure that records commands into the batch's command buffer on commit.
    /// Closures run in the order they were added.
    pub fn record_commands_on_commit(
        &mut self,
        f: impl FnOnce(&mut StateBuilder<'_>, vk::CommandBuffer) + 'static,
    ) {
        self.recorders.push(Box::new(f));
    }

    /// Registers `object` to be destroyed once the batch has executed. Objects are destroyed in
    /// reverse registration order.
    #[inline]
    pub fn destroy_after_execution(&mut self, device: vk::Device, object: Object) {
        self.cleanup.push(device, object);
    }

    /// Moves every object of `cleanup` onto the batch's cleanup stack, keeping their order.
    #[inline]
    pub fn destroy_all_after_execution(&mut self, cleanup: &mut CleanupStack) {
        self.cleanup.append(cleanup);
    }

    /// Returns whether the batch has anything to commit.
    pub fn is_empty(&self) -> bool {
        self.scratch_buffers.is_empty() && self.recorders.is_empty() && self.cleanup.is_empty()
    }
}

impl fmt::Debug for QueueCommandBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueCommandBatch")
            .field("name", &self.name)
            .field("scratch_buffers", &self.scratch_buffers)
            .field("recorders", &self.recorders.len())
            .field("cleanup", &self.cleanup)
            .finish()
    }
}

/// Records committed batches of one queue and submits them.
#[derive(Debug)]
pub struct QueueCommandHandler {
    queue: vk::Queue,
    device: vk::Device,
    command_pool: vk::CommandPool,
    recording: Option<vk::CommandBuffer>,
    submitted: Vec<vk::CommandBuffer>,
    idle: Vec<vk::CommandBuffer>,
    pending_cleanup: CleanupStack,
}

impl QueueCommandHandler {
    pub(super) fn new(queue: vk::Queue, device: vk::Device, command_pool: vk::CommandPool) -> Self {
        QueueCommandHandler {
            queue,
            device,
            command_pool,
            recording: None,
            submitted: Vec::new(),
            idle: Vec::new(),
            pending_cleanup: CleanupStack::new(),
        }
    }

    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn device(&self) -> vk::Device {
        self.device
    }

    /// Returns whether commands were recorded or submitted that have not been waited for.
    pub fn has_pending_work(&self) -> bool {
        self.recording.is_some() || !self.submitted.is_empty() || !self.pending_cleanup.is_empty()
    }

    /// Returns the command buffer being recorded, beginning one if necessary.
    pub(super) fn command_buffer(&mut self, sb: &mut StateBuilder<'_>) -> vk::CommandBuffer {
        if let Some(command_buffer) = self.recording {
            return command_buffer;
        }

        let command_buffer = match self.idle.pop() {
            Some(command_buffer) => command_buffer,
            None => {
                let command_buffer = sb.new_handle();
                sb.write(Command::AllocateCommandBuffers {
                    device: self.device,
                    pool: self.command_pool,
                    command_buffers: vec![command_buffer],
                });

                command_buffer
            }
        };

        sb.write(Command::BeginCommandBuffer { command_buffer });
        self.recording = Some(command_buffer);

        command_buffer
    }

    /// Takes the objects of a committed batch, to be destroyed after the next wait.
    pub(super) fn defer_cleanup(&mut self, cleanup: &mut CleanupStack) {
        self.pending_cleanup.append(cleanup);
    }

    /// Ends the command buffer being recorded, if any, and submits it to the queue.
    pub fn submit(&mut self, sb: &mut StateBuilder<'_>) {
        let Some(command_buffer) = self.recording.take() else {
            return;
        };

        log::trace!("submitting scratch commands to queue {:?}", self.queue);

        sb.write(Command::EndCommandBuffer { command_buffer });
        sb.write(Command::QueueSubmit {
            queue: self.queue,
            command_buffers: vec![command_buffer],
        });
        self.submitted.push(command_buffer);
    }

    /// Waits for all submitted work, then destroys the objects of the committed batches.
    ///
    /// Must follow [`submit`](Self::submit), so that no batch is left in a command buffer that
    /// is still being recorded.
    pub fn wait_until_finish(&mut self, sb: &mut StateBuilder<'_>) {
        debug_assert!(self.recording.is_none());

        if !self.submitted.is_empty() {
            log::trace!("waiting for queue {:?}", self.queue);

            sb.write(Command::QueueWaitIdle { queue: self.queue });
            self.idle.append(&mut self.submitted);
        }

        self.pending_cleanup.unwind(sb);
    }

    /// Frees the idle command buffers. Must only be called once no work is pending.
    pub(super) fn release(&mut self, sb: &mut StateBuilder<'_>) {
        debug_assert!(!self.has_pending_work());

        for command_buffer in self.idle.drain(..) {
            sb.write(Command::Destroy {
                device: self.device,
                object: Object::CommandBuffer {
                    pool: self.command_pool,
                    command_buffer,
                },
            });
        }
    }
}
