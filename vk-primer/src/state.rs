// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Handle-indexed tables of Vulkan objects.
//!
//! Two [`State`]s take part in priming: the captured state that supplies texel data and
//! layouts, and the state that the emitted commands build up. Both are plain data; the new
//! state is kept current by [`State::apply`] as commands are written.

use crate::{
    command::{Command, Object},
    format::{aspect_bits, format_aspects},
    DeviceSize,
};
use ash::vk::{self, Handle};
use std::{collections::BTreeMap, ops::Range};

/// Captured properties of a physical device.
#[derive(Clone, Debug, Default)]
pub struct PhysicalDeviceObject {
    pub limits: vk::PhysicalDeviceLimits,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub format_properties: BTreeMap<vk::Format, vk::FormatProperties>,
}

impl PhysicalDeviceObject {
    /// Returns the format features for `tiling`, or empty features if the format is unknown.
    pub fn format_features(
        &self,
        format: vk::Format,
        tiling: vk::ImageTiling,
    ) -> vk::FormatFeatureFlags {
        self.format_properties
            .get(&format)
            .map_or(vk::FormatFeatureFlags::empty(), |properties| {
                if tiling == vk::ImageTiling::LINEAR {
                    properties.linear_tiling_features
                } else {
                    properties.optimal_tiling_features
                }
            })
    }

    /// Returns the property flags of the memory type at `index`.
    pub fn memory_type_flags(&self, index: u32) -> Option<vk::MemoryPropertyFlags> {
        (index < self.memory_properties.memory_type_count)
            .then(|| self.memory_properties.memory_types[index as usize].property_flags)
    }
}

#[derive(Clone, Debug)]
pub struct DeviceObject {
    pub physical_device: vk::PhysicalDevice,
}

#[derive(Clone, Debug)]
pub struct QueueObject {
    pub device: vk::Device,
    pub family_index: u32,
    pub flags: vk::QueueFlags,
}

/// Creation parameters of an image.
#[derive(Clone, Copy, Debug)]
pub struct ImageInfo {
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub initial_layout: vk::ImageLayout,
}

impl Default for ImageInfo {
    #[inline]
    fn default() -> Self {
        ImageInfo {
            flags: vk::ImageCreateFlags::empty(),
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

impl ImageInfo {
    /// Returns the extent of mip level `level`.
    pub fn level_extent(&self, level: u32) -> vk::Extent3D {
        let depth = if self.image_type == vk::ImageType::TYPE_3D {
            (self.extent.depth >> level).max(1)
        } else {
            1
        };

        vk::Extent3D {
            width: (self.extent.width >> level).max(1),
            height: (self.extent.height >> level).max(1),
            depth,
        }
    }
}

/// Identifies one (aspect, layer, level) subresource of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subresource {
    pub aspect: vk::ImageAspectFlags,
    pub level: u32,
    pub layer: u32,
}

/// Contents and current layout of one subresource.
#[derive(Clone, Debug)]
pub struct ImageLevel {
    pub extent: vk::Extent3D,
    pub layout: vk::ImageLayout,
    /// Tightly packed texel data in the aspect's buffer-copy layout. Empty when unknown.
    pub data: Vec<u8>,
}

/// Identifies one sparse memory block of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SparseBlockKey {
    pub aspect: vk::ImageAspectFlags,
    pub layer: u32,
    pub level: u32,
    pub block: u64,
}

/// A sparse image block and the memory bound to it.
#[derive(Clone, Copy, Debug)]
pub struct SparseBoundImageBlock {
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
    pub memory: vk::DeviceMemory,
    pub memory_offset: DeviceSize,
}

#[derive(Clone, Debug)]
pub struct ImageObject {
    pub handle: vk::Image,
    pub device: vk::Device,
    pub info: ImageInfo,
    pub aspects: vk::ImageAspectFlags,
    pub levels: BTreeMap<Subresource, ImageLevel>,
    pub sparse_blocks: BTreeMap<SparseBlockKey, SparseBoundImageBlock>,
    /// Memory bound to a non-sparse image.
    pub memory: Option<(vk::DeviceMemory, DeviceSize)>,
    /// The queue that sparse bindings were last recorded on.
    pub last_bound_queue: Option<vk::Queue>,
}

impl ImageObject {
    /// Creates an image whose every subresource is in the initial layout with unknown contents.
    pub fn new(handle: vk::Image, device: vk::Device, info: ImageInfo) -> Self {
        let aspects = format_aspects(info.format);
        let mut levels = BTreeMap::new();

        for aspect in aspect_bits(aspects) {
            for level in 0..info.mip_levels {
                for layer in 0..info.array_layers {
                    levels.insert(
                        Subresource {
                            aspect,
                            level,
                            layer,
                        },
                        ImageLevel {
                            extent: info.level_extent(level),
                            layout: info.initial_layout,
                            data: Vec::new(),
                        },
                    );
                }
            }
        }

        ImageObject {
            handle,
            device,
            info,
            aspects,
            levels,
            sparse_blocks: BTreeMap::new(),
            memory: None,
            last_bound_queue: None,
        }
    }

    #[inline]
    pub fn level(&self, aspect: vk::ImageAspectFlags, layer: u32, level: u32) -> Option<&ImageLevel> {
        self.levels.get(&Subresource {
            aspect,
            level,
            layer,
        })
    }

    #[inline]
    pub fn level_mut(
        &mut self,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
    ) -> Option<&mut ImageLevel> {
        self.levels.get_mut(&Subresource {
            aspect,
            level,
            layer,
        })
    }

    /// Returns whether the image is both sparse-bound and sparse-resident.
    pub fn is_sparse_resident(&self) -> bool {
        self.info.flags.contains(
            vk::ImageCreateFlags::SPARSE_BINDING | vk::ImageCreateFlags::SPARSE_RESIDENCY,
        )
    }

    /// Returns the range covering every subresource of the image.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspects,
            base_mip_level: 0,
            level_count: self.info.mip_levels,
            base_array_layer: 0,
            layer_count: self.info.array_layers,
        }
    }

    /// Resolves `REMAINING_*` counts of `range` and clamps it to the image.
    pub fn resolve_range(&self, range: &vk::ImageSubresourceRange) -> (Range<u32>, Range<u32>) {
        let levels = resolve(
            range.base_mip_level,
            range.level_count,
            vk::REMAINING_MIP_LEVELS,
            self.info.mip_levels,
        );
        let layers = resolve(
            range.base_array_layer,
            range.layer_count,
            vk::REMAINING_ARRAY_LAYERS,
            self.info.array_layers,
        );

        (levels, layers)
    }
}

fn resolve(base: u32, count: u32, remaining: u32, total: u32) -> Range<u32> {
    let start = base.min(total);
    let end = if count == remaining {
        total
    } else {
        base.saturating_add(count).min(total)
    };

    start..end
}

/// Creation parameters of a buffer.
#[derive(Clone, Copy, Debug)]
pub struct BufferInfo {
    pub size: DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub sharing_mode: vk::SharingMode,
}

#[derive(Clone, Debug)]
pub struct BufferObject {
    pub device: vk::Device,
    pub info: BufferInfo,
    pub memory: Option<(vk::DeviceMemory, DeviceSize)>,
}

#[derive(Clone, Debug)]
pub struct DeviceMemoryObject {
    pub device: vk::Device,
    pub size: DeviceSize,
    pub memory_type_index: u32,
    /// The currently mapped `(offset, size)`, if any.
    pub mapped: Option<(DeviceSize, DeviceSize)>,
}

/// Handle-indexed tables of live Vulkan objects.
///
/// Objects without a dedicated table are tracked by handle and type only.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub physical_devices: BTreeMap<vk::PhysicalDevice, PhysicalDeviceObject>,
    pub devices: BTreeMap<vk::Device, DeviceObject>,
    pub queues: BTreeMap<vk::Queue, QueueObject>,
    pub images: BTreeMap<vk::Image, ImageObject>,
    pub buffers: BTreeMap<vk::Buffer, BufferObject>,
    pub device_memories: BTreeMap<vk::DeviceMemory, DeviceMemoryObject>,
    objects: BTreeMap<u64, vk::ObjectType>,
}

impl State {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether any object in the state has the raw handle `raw`.
    pub fn contains_handle(&self, raw: u64) -> bool {
        self.objects.contains_key(&raw)
            || self
                .physical_devices
                .contains_key(&vk::PhysicalDevice::from_raw(raw))
            || self.devices.contains_key(&vk::Device::from_raw(raw))
            || self.queues.contains_key(&vk::Queue::from_raw(raw))
            || self.images.contains_key(&vk::Image::from_raw(raw))
            || self.buffers.contains_key(&vk::Buffer::from_raw(raw))
            || self
                .device_memories
                .contains_key(&vk::DeviceMemory::from_raw(raw))
    }

    /// Returns the type of an object that has no dedicated table.
    #[inline]
    pub fn object_type(&self, raw: u64) -> Option<vk::ObjectType> {
        self.objects.get(&raw).copied()
    }

    /// Returns the physical device that `device` was created from.
    pub fn physical_device_of(&self, device: vk::Device) -> Option<&PhysicalDeviceObject> {
        self.devices
            .get(&device)
            .and_then(|d| self.physical_devices.get(&d.physical_device))
    }

    fn register<H: Handle>(&mut self, handle: H) {
        self.objects.insert(handle.as_raw(), H::TYPE);
    }

    /// Applies the effect of `command` to the state.
    ///
    /// Commands that refer to objects the state does not know are ignored.
    pub fn apply(&mut self, command: &Command) {
        match command {
            &Command::CreateImage {
                device,
                image,
                info,
            } => {
                self.images
                    .insert(image, ImageObject::new(image, device, info));
            }
            &Command::CreateBuffer {
                device,
                buffer,
                info,
            } => {
                self.buffers.insert(
                    buffer,
                    BufferObject {
                        device,
                        info,
                        memory: None,
                    },
                );
            }
            &Command::AllocateMemory {
                device,
                memory,
                size,
                memory_type_index,
            } => {
                self.device_memories.insert(
                    memory,
                    DeviceMemoryObject {
                        device,
                        size,
                        memory_type_index,
                        mapped: None,
                    },
                );
            }
            &Command::BindImageMemory {
                image,
                memory,
                offset,
                ..
            } => {
                if let Some(image) = self.images.get_mut(&image) {
                    image.memory = Some((memory, offset));
                }
            }
            &Command::BindBufferMemory {
                buffer,
                memory,
                offset,
                ..
            } => {
                if let Some(buffer) = self.buffers.get_mut(&buffer) {
                    buffer.memory = Some((memory, offset));
                }
            }
            &Command::MapMemory {
                memory,
                offset,
                size,
                ..
            } => {
                if let Some(memory) = self.device_memories.get_mut(&memory) {
                    memory.mapped = Some((offset, size));
                }
            }
            &Command::UnmapMemory { memory, .. } => {
                if let Some(memory) = self.device_memories.get_mut(&memory) {
                    memory.mapped = None;
                }
            }
            Command::CreateImageView { view, .. } => self.register(*view),
            Command::CreateBufferView { view, .. } => self.register(*view),
            Command::CreateShaderModule { module, .. } => self.register(*module),
            Command::CreateDescriptorSetLayout { layout, .. } => self.register(*layout),
            Command::CreatePipelineLayout { layout, .. } => self.register(*layout),
            Command::CreateDescriptorPool { pool, .. } => self.register(*pool),
            Command::AllocateDescriptorSets { sets, .. } => {
                for &(set, _) in sets {
                    self.register(set);
                }
            }
            Command::CreateRenderPass { render_pass, .. } => self.register(*render_pass),
            Command::CreateFramebuffer { framebuffer, .. } => self.register(*framebuffer),
            Command::CreateGraphicsPipeline { pipeline, .. }
            | Command::CreateComputePipeline { pipeline, .. } => self.register(*pipeline),
            Command::CreateCommandPool { pool, .. } => self.register(*pool),
            Command::AllocateCommandBuffers {
                command_buffers, ..
            } => {
                for &command_buffer in command_buffers {
                    self.register(command_buffer);
                }
            }
            Command::CmdPipelineBarrier { image_barriers, .. } => {
                for barrier in image_barriers {
                    self.transition(barrier.image, &barrier.subresource_range, barrier.new_layout);
                }
            }
            &Command::Destroy { object, .. } => self.remove(object),
            _ => {}
        }
    }

    fn transition(
        &mut self,
        image: vk::Image,
        range: &vk::ImageSubresourceRange,
        layout: vk::ImageLayout,
    ) {
        let Some(image) = self.images.get_mut(&image) else {
            return;
        };
        let (levels, layers) = image.resolve_range(range);

        for aspect in aspect_bits(range.aspect_mask & image.aspects) {
            for level in levels.clone() {
                for layer in layers.clone() {
                    if let Some(level) = image.level_mut(aspect, layer, level) {
                        level.layout = layout;
                    }
                }
            }
        }
    }

    fn remove(&mut self, object: Object) {
        match object {
            Object::Image(image) => {
                self.images.remove(&image);
            }
            Object::Buffer(buffer) => {
                self.buffers.remove(&buffer);
            }
            Object::DeviceMemory(memory) => {
                self.device_memories.remove(&memory);
            }
            object => {
                self.objects.remove(&object.raw());
            }
        }
    }
}
