// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{
    command::{Command, CommandSink},
    content::{ContentStore, HashedData},
    state::{ImageObject, PhysicalDeviceObject, State},
};
use ash::vk::{self, Handle};

/// The first raw value handed out by [`StateBuilder::new_handle`].
const FIRST_HANDLE: u64 = 0x1000_0000;

/// The context that priming emits commands through.
///
/// Every command written through the builder is first applied to the new state and then
/// forwarded to the sink, so the new state always reflects the emitted stream.
pub struct StateBuilder<'a> {
    old_state: &'a State,
    new_state: &'a mut State,
    out: &'a mut dyn CommandSink,
    store: &'a ContentStore,
    next_handle: u64,
}

impl<'a> StateBuilder<'a> {
    pub fn new(
        old_state: &'a State,
        new_state: &'a mut State,
        out: &'a mut dyn CommandSink,
        store: &'a ContentStore,
    ) -> Self {
        StateBuilder {
            old_state,
            new_state,
            out,
            store,
            next_handle: FIRST_HANDLE,
        }
    }

    /// Returns the captured state.
    #[inline]
    pub fn old_state(&self) -> &'a State {
        self.old_state
    }

    /// Returns the state built up by the emitted commands.
    #[inline]
    pub fn new_state(&self) -> &State {
        self.new_state
    }

    #[inline]
    pub fn content_store(&self) -> &'a ContentStore {
        self.store
    }

    /// Applies `command` to the new state and writes it to the sink.
    pub fn write(&mut self, command: Command) {
        self.new_state.apply(&command);
        self.out.write(command);
    }

    /// Returns a handle that is not used by any object of either state.
    ///
    /// Handles are allocated from a counter, so a replay of the same priming work produces the
    /// same handles.
    pub fn new_handle<H: Handle>(&mut self) -> H {
        loop {
            let raw = self.next_handle;
            self.next_handle += 1;

            if !self.old_state.contains_handle(raw) && !self.new_state.contains_handle(raw) {
                return H::from_raw(raw);
            }
        }
    }

    /// Stores `data` in the content store.
    #[inline]
    pub fn store(&self, data: Vec<u8>) -> HashedData {
        self.store.store_vec(data)
    }

    /// Returns an image, preferring the object in the new state.
    pub fn image(&self, image: vk::Image) -> Option<&ImageObject> {
        self.new_state
            .images
            .get(&image)
            .or_else(|| self.old_state.images.get(&image))
    }

    /// Returns the physical device of `device`, looking in the new state first.
    pub fn physical_device_of(&self, device: vk::Device) -> Option<&PhysicalDeviceObject> {
        self.new_state
            .physical_device_of(device)
            .or_else(|| self.old_state.physical_device_of(device))
    }

    /// Returns the device that `queue` belongs to and the queue's family index.
    pub fn queue_info(&self, queue: vk::Queue) -> Option<(vk::Device, u32)> {
        self.new_state
            .queues
            .get(&queue)
            .or_else(|| self.old_state.queues.get(&queue))
            .map(|q| (q.device, q.family_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command::RecordingSink, state::ImageInfo};

    #[test]
    fn new_handles_skip_both_states() {
        let mut old_state = State::new();
        let mut new_state = State::new();
        let mut sink = RecordingSink::new();
        let store = ContentStore::new();

        let device = vk::Device::from_raw(1);
        old_state.apply(&Command::CreateImage {
            device,
            image: vk::Image::from_raw(FIRST_HANDLE),
            info: ImageInfo::default(),
        });
        new_state.apply(&Command::CreateBuffer {
            device,
            buffer: vk::Buffer::from_raw(FIRST_HANDLE + 1),
            info: crate::state::BufferInfo {
                size: 4,
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
            },
        });

        let mut sb = StateBuilder::new(&old_state, &mut new_state, &mut sink, &store);
        let a: vk::Image = sb.new_handle();
        let b: vk::Buffer = sb.new_handle();

        assert_eq!(a.as_raw(), FIRST_HANDLE + 2);
        assert_eq!(b.as_raw(), FIRST_HANDLE + 3);
    }

    #[test]
    fn write_applies_then_forwards() {
        let old_state = State::new();
        let mut new_state = State::new();
        let mut sink = RecordingSink::new();
        let store = ContentStore::new();

        {
            let mut sb = StateBuilder::new(&old_state, &mut new_state, &mut sink, &store);
            let image = sb.new_handle();
            sb.write(Command::CreateImage {
                device: vk::Device::from_raw(1),
                image,
                info: ImageInfo::default(),
            });
            assert!(sb.image(image).is_some());
        }

        assert_eq!(sink.names(), ["vkCreateImage"]);
        assert_eq!(new_state.images.len(), 1);
    }
}
