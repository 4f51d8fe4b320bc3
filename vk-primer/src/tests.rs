// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

#![cfg(test)]

use crate::{
    builder::StateBuilder,
    command::RecordingSink,
    content::ContentStore,
    format::format_info,
    primer::{ShaderCompileError, ShaderCompiler},
    state::{DeviceObject, ImageInfo, ImageObject, PhysicalDeviceObject, QueueObject, State},
};
use ash::vk::{self, Handle};
use std::collections::BTreeMap;

/// Creates a [`Fixture`] named `$fixture` with one device, a graphics queue and a sparse-binding
/// queue.
macro_rules! test_state {
    ($fixture:ident) => {
        #[allow(unused_mut)]
        let mut $fixture = $crate::tests::Fixture::new();
    };
}

/// Captured and rebuilt state for tests, plus the sink that receives the emitted commands.
pub(crate) struct Fixture {
    pub old_state: State,
    pub new_state: State,
    pub sink: RecordingSink,
    pub store: ContentStore,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    /// Graphics, compute and transfer queue of family 0.
    pub queue: vk::Queue,
    /// Sparse-binding queue of family 1.
    pub sparse_queue: vk::Queue,
    next_image: u64,
}

impl Fixture {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let physical_device = vk::PhysicalDevice::from_raw(0x10);
        let device = vk::Device::from_raw(0x20);
        let queue = vk::Queue::from_raw(0x30);
        let sparse_queue = vk::Queue::from_raw(0x31);

        let mut state = State::new();
        state
            .physical_devices
            .insert(physical_device, physical_device_object());
        state
            .devices
            .insert(device, DeviceObject { physical_device });
        state.queues.insert(
            queue,
            QueueObject {
                device,
                family_index: 0,
                flags: vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
            },
        );
        state.queues.insert(
            sparse_queue,
            QueueObject {
                device,
                family_index: 1,
                flags: vk::QueueFlags::SPARSE_BINDING,
            },
        );

        Fixture {
            old_state: state.clone(),
            new_state: state,
            sink: RecordingSink::new(),
            store: ContentStore::new(),
            physical_device,
            device,
            queue,
            sparse_queue,
            next_image: 0x100,
        }
    }

    pub fn builder(&mut self) -> StateBuilder<'_> {
        StateBuilder::new(
            &self.old_state,
            &mut self.new_state,
            &mut self.sink,
            &self.store,
        )
    }

    /// Changes the limits of the physical device in both states.
    pub fn set_limits(&mut self, f: impl Fn(&mut vk::PhysicalDeviceLimits)) {
        for state in [&mut self.old_state, &mut self.new_state] {
            if let Some(physical_device) = state.physical_devices.get_mut(&self.physical_device) {
                f(&mut physical_device.limits);
            }
        }
    }

    /// Adds an image to both states. In the captured state every subresource is in `layout`
    /// and filled with a byte pattern; in the new state it is freshly created and bound.
    pub fn add_image(&mut self, info: ImageInfo, layout: vk::ImageLayout) -> vk::Image {
        let image = vk::Image::from_raw(self.next_image);
        self.next_image += 1;

        let mut old = ImageObject::new(image, self.device, info);
        let format = format_info(info.format);

        for (index, (key, level)) in old.levels.iter_mut().enumerate() {
            let size = format
                .as_ref()
                .and_then(|f| f.aspect_data_size(key.aspect, level.extent))
                .unwrap_or(0);

            level.layout = layout;
            level.data = (0..size)
                .map(|i| (i as u8).wrapping_mul(31).wrapping_add(index as u8))
                .collect();
        }

        let mut new = ImageObject::new(image, self.device, info);
        new.memory = Some((vk::DeviceMemory::from_raw(0x40), 0));

        self.old_state.images.insert(image, old);
        self.new_state.images.insert(image, new);

        image
    }

    /// Replaces the captured data of one subresource.
    pub fn set_data(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
        data: Vec<u8>,
    ) {
        if let Some(level) = self
            .old_state
            .images
            .get_mut(&image)
            .and_then(|i| i.level_mut(aspect, layer, level))
        {
            level.data = data;
        }
    }
}

fn physical_device_object() -> PhysicalDeviceObject {
    let limits = vk::PhysicalDeviceLimits {
        max_texel_buffer_elements: 65536,
        max_uniform_buffer_range: 65536,
        max_compute_work_group_count: [65535, 65535, 65535],
        max_compute_work_group_invocations: 1024,
        max_compute_work_group_size: [1024, 1024, 64],
        min_texel_buffer_offset_alignment: 16,
        min_uniform_buffer_offset_alignment: 256,
        non_coherent_atom_size: 64,
        ..Default::default()
    };

    let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: 2,
        memory_heap_count: 1,
        ..Default::default()
    };
    memory_properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    memory_properties.memory_types[1].property_flags =
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    memory_properties.memory_heaps[0].size = 1 << 30;

    let color = vk::FormatFeatureFlags::TRANSFER_DST
        | vk::FormatFeatureFlags::COLOR_ATTACHMENT
        | vk::FormatFeatureFlags::STORAGE_IMAGE
        | vk::FormatFeatureFlags::SAMPLED_IMAGE;
    let depth_stencil =
        vk::FormatFeatureFlags::TRANSFER_DST | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

    let mut format_properties = BTreeMap::new();

    for format in [
        vk::Format::R8G8B8A8_UNORM,
        vk::Format::R8G8B8A8_UINT,
        vk::Format::R16G16B16A16_SFLOAT,
        vk::Format::R32_UINT,
        vk::Format::R32G32B32A32_UINT,
    ] {
        format_properties.insert(
            format,
            vk::FormatProperties {
                linear_tiling_features: color,
                optimal_tiling_features: color,
                buffer_features: vk::FormatFeatureFlags::UNIFORM_TEXEL_BUFFER,
            },
        );
    }

    for format in [
        vk::Format::D16_UNORM,
        vk::Format::D32_SFLOAT,
        vk::Format::S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ] {
        format_properties.insert(
            format,
            vk::FormatProperties {
                optimal_tiling_features: depth_stencil,
                ..Default::default()
            },
        );
    }

    PhysicalDeviceObject {
        limits,
        memory_properties,
        format_properties,
    }
}

/// A [`ShaderCompiler`] that returns the SPIR-V magic number followed by the source's hash.
pub(crate) struct FakeCompiler;

impl ShaderCompiler for FakeCompiler {
    fn compile(
        &self,
        _stage: vk::ShaderStageFlags,
        source: &str,
    ) -> Result<Vec<u32>, ShaderCompileError> {
        let hash = crate::content::HashedData::of(source.as_bytes()).hash();

        Ok(vec![0x0723_0203, hash as u32, (hash >> 32) as u32])
    }
}

/// A [`ShaderCompiler`] that always fails.
pub(crate) struct FailingCompiler;

impl ShaderCompiler for FailingCompiler {
    fn compile(
        &self,
        _stage: vk::ShaderStageFlags,
        _source: &str,
    ) -> Result<Vec<u32>, ShaderCompileError> {
        Err(ShaderCompileError::new("no compiler"))
    }
}

/// Creates a 2D image description.
pub(crate) fn image_2d(
    format: vk::Format,
    width: u32,
    height: u32,
    usage: vk::ImageUsageFlags,
) -> ImageInfo {
    ImageInfo {
        format,
        extent: vk::Extent3D {
            width,
            height,
            depth: 1,
        },
        usage,
        ..Default::default()
    }
}
