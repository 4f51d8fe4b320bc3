// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Descriptions of the Vulkan calls that make up a replay command stream.
//!
//! The primer never executes anything. Each call it wants the replay to make is described by a
//! [`Command`] and handed to a [`CommandSink`]. Byte payloads travel as [`HashedData`] so that
//! the stream stays small and can be compared between runs.

use crate::{
    content::HashedData,
    state::{BufferInfo, ImageInfo},
    DeviceSize,
};
use ash::vk::{self, Handle};

/// Receives the commands emitted by the primer, in order.
pub trait CommandSink {
    fn write(&mut self, command: Command);
}

impl CommandSink for Vec<Command> {
    #[inline]
    fn write(&mut self, command: Command) {
        self.push(command);
    }
}

/// A [`CommandSink`] that keeps every command in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Vec<Command>,
}

impl RecordingSink {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the commands written so far.
    #[inline]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Returns the names of the commands written so far, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(Command::name).collect()
    }

    /// Returns how many commands with the given name were written.
    pub fn count(&self, name: &str) -> usize {
        self.commands.iter().filter(|c| c.name() == name).count()
    }

    /// Returns the index of the first command with the given name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.commands.iter().position(|c| c.name() == name)
    }

    /// Returns the index of the last command with the given name.
    pub fn rposition(&self, name: &str) -> Option<usize> {
        self.commands.iter().rposition(|c| c.name() == name)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    #[inline]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

impl CommandSink for RecordingSink {
    #[inline]
    fn write(&mut self, command: Command) {
        self.commands.push(command);
    }
}

/// A Vulkan object that can be destroyed or freed.
///
/// Objects that are allocated from a pool carry their pool, since freeing them requires it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Object {
    Image(vk::Image),
    ImageView(vk::ImageView),
    Buffer(vk::Buffer),
    BufferView(vk::BufferView),
    DeviceMemory(vk::DeviceMemory),
    ShaderModule(vk::ShaderModule),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    DescriptorSet {
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    },
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    CommandPool(vk::CommandPool),
    CommandBuffer {
        pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
    },
}

impl Object {
    /// Returns the Vulkan object type.
    pub fn object_type(self) -> vk::ObjectType {
        match self {
            Object::Image(_) => vk::ObjectType::IMAGE,
            Object::ImageView(_) => vk::ObjectType::IMAGE_VIEW,
            Object::Buffer(_) => vk::ObjectType::BUFFER,
            Object::BufferView(_) => vk::ObjectType::BUFFER_VIEW,
            Object::DeviceMemory(_) => vk::ObjectType::DEVICE_MEMORY,
            Object::ShaderModule(_) => vk::ObjectType::SHADER_MODULE,
            Object::PipelineLayout(_) => vk::ObjectType::PIPELINE_LAYOUT,
            Object::Pipeline(_) => vk::ObjectType::PIPELINE,
            Object::DescriptorSetLayout(_) => vk::ObjectType::DESCRIPTOR_SET_LAYOUT,
            Object::DescriptorPool(_) => vk::ObjectType::DESCRIPTOR_POOL,
            Object::DescriptorSet { .. } => vk::ObjectType::DESCRIPTOR_SET,
            Object::RenderPass(_) => vk::ObjectType::RENDER_PASS,
            Object::Framebuffer(_) => vk::ObjectType::FRAMEBUFFER,
            Object::CommandPool(_) => vk::ObjectType::COMMAND_POOL,
            Object::CommandBuffer { .. } => vk::ObjectType::COMMAND_BUFFER,
        }
    }

    /// Returns the raw handle value.
    pub fn raw(self) -> u64 {
        match self {
            Object::Image(h) => h.as_raw(),
            Object::ImageView(h) => h.as_raw(),
            Object::Buffer(h) => h.as_raw(),
            Object::BufferView(h) => h.as_raw(),
            Object::DeviceMemory(h) => h.as_raw(),
            Object::ShaderModule(h) => h.as_raw(),
            Object::PipelineLayout(h) => h.as_raw(),
            Object::Pipeline(h) => h.as_raw(),
            Object::DescriptorSetLayout(h) => h.as_raw(),
            Object::DescriptorPool(h) => h.as_raw(),
            Object::DescriptorSet { set, .. } => set.as_raw(),
            Object::RenderPass(h) => h.as_raw(),
            Object::Framebuffer(h) => h.as_raw(),
            Object::CommandPool(h) => h.as_raw(),
            Object::CommandBuffer { command_buffer, .. } => command_buffer.as_raw(),
        }
    }

    /// Returns the name of the Vulkan function that destroys or frees this object.
    pub fn destroy_name(self) -> &'static str {
        match self {
            Object::Image(_) => "vkDestroyImage",
            Object::ImageView(_) => "vkDestroyImageView",
            Object::Buffer(_) => "vkDestroyBuffer",
            Object::BufferView(_) => "vkDestroyBufferView",
            Object::DeviceMemory(_) => "vkFreeMemory",
            Object::ShaderModule(_) => "vkDestroyShaderModule",
            Object::PipelineLayout(_) => "vkDestroyPipelineLayout",
            Object::Pipeline(_) => "vkDestroyPipeline",
            Object::DescriptorSetLayout(_) => "vkDestroyDescriptorSetLayout",
            Object::DescriptorPool(_) => "vkDestroyDescriptorPool",
            Object::DescriptorSet { .. } => "vkFreeDescriptorSets",
            Object::RenderPass(_) => "vkDestroyRenderPass",
            Object::Framebuffer(_) => "vkDestroyFramebuffer",
            Object::CommandPool(_) => "vkDestroyCommandPool",
            Object::CommandBuffer { .. } => "vkFreeCommandBuffers",
        }
    }
}

/// Parameters of an image view.
#[derive(Clone, Copy, Debug)]
pub struct ImageViewInfo {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// One binding of a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// The resource written into a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    InputAttachment {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    StorageImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    UniformTexelBuffer(vk::BufferView),
    UniformBuffer {
        buffer: vk::Buffer,
        offset: DeviceSize,
        range: DeviceSize,
    },
    UniformBufferDynamic {
        buffer: vk::Buffer,
        offset: DeviceSize,
        range: DeviceSize,
    },
}

impl DescriptorResource {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorResource::InputAttachment { .. } => vk::DescriptorType::INPUT_ATTACHMENT,
            DescriptorResource::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorResource::UniformTexelBuffer(_) => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            DescriptorResource::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorResource::UniformBufferDynamic { .. } => {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            }
        }
    }
}

/// A single descriptor write of a `vkUpdateDescriptorSets` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub resource: DescriptorResource,
}

/// Description of a render pass attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentInfo {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// Description of a single-subpass render pass.
#[derive(Clone, Debug)]
pub struct RenderPassInfo {
    pub attachments: Vec<AttachmentInfo>,
    pub input_attachments: Vec<vk::AttachmentReference>,
    pub color_attachment: Option<vk::AttachmentReference>,
    pub depth_stencil_attachment: Option<vk::AttachmentReference>,
}

/// Description of a graphics pipeline with a vertex and a fragment stage.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineInfo {
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub samples: vk::SampleCountFlags,
    /// Color write mask of the single color attachment, if the subpass has one.
    pub color_write_mask: Option<vk::ColorComponentFlags>,
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub stencil_test_enable: bool,
    /// Used for both faces.
    pub stencil_op: vk::StencilOpState,
    pub dynamic_states: Vec<vk::DynamicState>,
}

/// A specialization constant value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpecializationConstant {
    pub constant_id: u32,
    pub value: u32,
}

/// Description of a compute pipeline.
#[derive(Clone, Debug)]
pub struct ComputePipelineInfo {
    pub layout: vk::PipelineLayout,
    pub shader: vk::ShaderModule,
    pub specialization: Vec<SpecializationConstant>,
}

/// An image memory barrier.
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// A buffer memory barrier.
#[derive(Clone, Copy, Debug)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// Bytes written into mapped memory, relative to the start of the flushed range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryWrite {
    pub offset: DeviceSize,
    pub data: HashedData,
}

/// A clear value of a render pass attachment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// One Vulkan call of the replay command stream.
#[derive(Clone, Debug)]
pub enum Command {
    CreateImage {
        device: vk::Device,
        image: vk::Image,
        info: ImageInfo,
    },
    CreateBuffer {
        device: vk::Device,
        buffer: vk::Buffer,
        info: BufferInfo,
    },
    AllocateMemory {
        device: vk::Device,
        memory: vk::DeviceMemory,
        size: DeviceSize,
        memory_type_index: u32,
    },
    BindImageMemory {
        device: vk::Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: DeviceSize,
    },
    BindBufferMemory {
        device: vk::Device,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: DeviceSize,
    },
    MapMemory {
        device: vk::Device,
        memory: vk::DeviceMemory,
        offset: DeviceSize,
        size: DeviceSize,
    },
    /// Flushes a mapped range. `writes` are the host writes that the range observed, relative to
    /// `offset`.
    FlushMappedMemoryRanges {
        device: vk::Device,
        memory: vk::DeviceMemory,
        offset: DeviceSize,
        size: DeviceSize,
        writes: Vec<MemoryWrite>,
    },
    UnmapMemory {
        device: vk::Device,
        memory: vk::DeviceMemory,
    },
    CreateImageView {
        device: vk::Device,
        view: vk::ImageView,
        info: ImageViewInfo,
    },
    CreateBufferView {
        device: vk::Device,
        view: vk::BufferView,
        buffer: vk::Buffer,
        format: vk::Format,
        offset: DeviceSize,
        range: DeviceSize,
    },
    CreateShaderModule {
        device: vk::Device,
        module: vk::ShaderModule,
        stage: vk::ShaderStageFlags,
        code: Vec<u32>,
    },
    CreateDescriptorSetLayout {
        device: vk::Device,
        layout: vk::DescriptorSetLayout,
        bindings: Vec<DescriptorSetLayoutBinding>,
    },
    CreatePipelineLayout {
        device: vk::Device,
        layout: vk::PipelineLayout,
        set_layouts: Vec<vk::DescriptorSetLayout>,
    },
    CreateDescriptorPool {
        device: vk::Device,
        pool: vk::DescriptorPool,
        max_sets: u32,
        pool_sizes: Vec<(vk::DescriptorType, u32)>,
    },
    AllocateDescriptorSets {
        device: vk::Device,
        pool: vk::DescriptorPool,
        sets: Vec<(vk::DescriptorSet, vk::DescriptorSetLayout)>,
    },
    UpdateDescriptorSets {
        device: vk::Device,
        writes: Vec<DescriptorWrite>,
    },
    CreateRenderPass {
        device: vk::Device,
        render_pass: vk::RenderPass,
        info: RenderPassInfo,
    },
    CreateFramebuffer {
        device: vk::Device,
        framebuffer: vk::Framebuffer,
        render_pass: vk::RenderPass,
        attachments: Vec<vk::ImageView>,
        extent: vk::Extent2D,
        layers: u32,
    },
    CreateGraphicsPipeline {
        device: vk::Device,
        pipeline: vk::Pipeline,
        info: GraphicsPipelineInfo,
    },
    CreateComputePipeline {
        device: vk::Device,
        pipeline: vk::Pipeline,
        info: ComputePipelineInfo,
    },
    CreateCommandPool {
        device: vk::Device,
        pool: vk::CommandPool,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    },
    AllocateCommandBuffers {
        device: vk::Device,
        pool: vk::CommandPool,
        command_buffers: Vec<vk::CommandBuffer>,
    },
    BeginCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    EndCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    CmdPipelineBarrier {
        command_buffer: vk::CommandBuffer,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        buffer_barriers: Vec<BufferBarrier>,
        image_barriers: Vec<ImageBarrier>,
    },
    CmdCopyBufferToImage {
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_image: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CmdBeginRenderPass {
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: Vec<ClearValue>,
    },
    CmdEndRenderPass {
        command_buffer: vk::CommandBuffer,
    },
    CmdBindPipeline {
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    CmdBindDescriptorSets {
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    CmdSetViewport {
        command_buffer: vk::CommandBuffer,
        viewport: vk::Viewport,
    },
    CmdSetScissor {
        command_buffer: vk::CommandBuffer,
        scissor: vk::Rect2D,
    },
    CmdSetStencilCompareMask {
        command_buffer: vk::CommandBuffer,
        face_mask: vk::StencilFaceFlags,
        compare_mask: u32,
    },
    CmdSetStencilWriteMask {
        command_buffer: vk::CommandBuffer,
        face_mask: vk::StencilFaceFlags,
        write_mask: u32,
    },
    CmdSetStencilReference {
        command_buffer: vk::CommandBuffer,
        face_mask: vk::StencilFaceFlags,
        reference: u32,
    },
    CmdDraw {
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    CmdDispatch {
        command_buffer: vk::CommandBuffer,
        group_count: [u32; 3],
    },
    QueueSubmit {
        queue: vk::Queue,
        command_buffers: Vec<vk::CommandBuffer>,
    },
    QueueWaitIdle {
        queue: vk::Queue,
    },
    /// Destroys or frees `object`, using the matching `vkDestroy*` or `vkFree*` function.
    Destroy {
        device: vk::Device,
        object: Object,
    },
}

impl Command {
    /// Returns the name of the Vulkan function this command calls.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateImage { .. } => "vkCreateImage",
            Command::CreateBuffer { .. } => "vkCreateBuffer",
            Command::AllocateMemory { .. } => "vkAllocateMemory",
            Command::BindImageMemory { .. } => "vkBindImageMemory",
            Command::BindBufferMemory { .. } => "vkBindBufferMemory",
            Command::MapMemory { .. } => "vkMapMemory",
            Command::FlushMappedMemoryRanges { .. } => "vkFlushMappedMemoryRanges",
            Command::UnmapMemory { .. } => "vkUnmapMemory",
            Command::CreateImageView { .. } => "vkCreateImageView",
            Command::CreateBufferView { .. } => "vkCreateBufferView",
            Command::CreateShaderModule { .. } => "vkCreateShaderModule",
            Command::CreateDescriptorSetLayout { .. } => "vkCreateDescriptorSetLayout",
            Command::CreatePipelineLayout { .. } => "vkCreatePipelineLayout",
            Command::CreateDescriptorPool { .. } => "vkCreateDescriptorPool",
            Command::AllocateDescriptorSets { .. } => "vkAllocateDescriptorSets",
            Command::UpdateDescriptorSets { .. } => "vkUpdateDescriptorSets",
            Command::CreateRenderPass { .. } => "vkCreateRenderPass",
            Command::CreateFramebuffer { .. } => "vkCreateFramebuffer",
            Command::CreateGraphicsPipeline { .. } => "vkCreateGraphicsPipelines",
            Command::CreateComputePipeline { .. } => "vkCreateComputePipelines",
            Command::CreateCommandPool { .. } => "vkCreateCommandPool",
            Command::AllocateCommandBuffers { .. } => "vkAllocateCommandBuffers",
            Command::BeginCommandBuffer { .. } => "vkBeginCommandBuffer",
            Command::EndCommandBuffer { .. } => "vkEndCommandBuffer",
            Command::CmdPipelineBarrier { .. } => "vkCmdPipelineBarrier",
            Command::CmdCopyBufferToImage { .. } => "vkCmdCopyBufferToImage",
            Command::CmdBeginRenderPass { .. } => "vkCmdBeginRenderPass",
            Command::CmdEndRenderPass { .. } => "vkCmdEndRenderPass",
            Command::CmdBindPipeline { .. } => "vkCmdBindPipeline",
            Command::CmdBindDescriptorSets { .. } => "vkCmdBindDescriptorSets",
            Command::CmdSetViewport { .. } => "vkCmdSetViewport",
            Command::CmdSetScissor { .. } => "vkCmdSetScissor",
            Command::CmdSetStencilCompareMask { .. } => "vkCmdSetStencilCompareMask",
            Command::CmdSetStencilWriteMask { .. } => "vkCmdSetStencilWriteMask",
            Command::CmdSetStencilReference { .. } => "vkCmdSetStencilReference",
            Command::CmdDraw { .. } => "vkCmdDraw",
            Command::CmdDispatch { .. } => "vkCmdDispatch",
            Command::QueueSubmit { .. } => "vkQueueSubmit",
            Command::QueueWaitIdle { .. } => "vkQueueWaitIdle",
            Command::Destroy { object, .. } => object.destroy_name(),
        }
    }
}
