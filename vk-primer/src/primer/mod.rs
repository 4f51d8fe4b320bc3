// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Restoring the captured contents of images.
//!
//! An [`ImagePrimer`] writes the data of an image in the captured state into the image of the
//! same handle in the new state. It does so with one of three strategies:
//!
//! - [`prime_by_buffer_copy`]: the data is uploaded into a scratch buffer and copied into the
//!   image with `vkCmdCopyBufferToImage`. This needs `TRANSFER_DST` usage.
//! - [`prime_by_rendering`]: the data is unpacked into `R32G32B32A32_UINT` staging images, which
//!   a full-screen draw reads as input attachments and writes into the image as a color or
//!   depth/stencil attachment. Stencil is written one bit per render pass.
//! - [`prime_by_image_store`]: the data is unpacked into uniform texel buffers, and a compute
//!   shader stores every texel into the image as a storage image.
//!
//! [`ImagePrimer::prime`] picks the first strategy that the image's usage and format support.
//!
//! Priming is best effort. A subresource whose data is missing or cannot be converted is
//! skipped with a warning and the rest of the image is still primed. Errors in creating the
//! objects that a strategy needs abort the strategy for the image.
//!
//! [`prime_by_buffer_copy`]: ImagePrimer::prime_by_buffer_copy
//! [`prime_by_rendering`]: ImagePrimer::prime_by_rendering
//! [`prime_by_image_store`]: ImagePrimer::prime_by_image_store

pub use self::{
    buffer_copy::{BufferCopyJob, BufferCopyPiece, BufferCopySession, CopyDestination},
    shader::{ShaderCompileError, ShaderCompiler},
    subresource::{
        extract_region, walk_sparse_image_memory_bindings, walk_subresource_range, LayoutPolicy,
        LevelSize,
    },
};
use self::{render::RenderKitBuilder, shader::glsl_image_format, store::StoreKitBuilder};
use crate::{
    builder::StateBuilder,
    cleanup::CleanupStack,
    command::{Command, ImageBarrier, Object},
    format::{
        format_info, ChannelConverter, ConvertError, FormatConverter, STAGING_ELEMENT_SIZE,
        STAGING_FORMAT,
    },
    memory::find_memory_type_index,
    scratch::{QueueCommandBatch, ScratchResources},
    state::{ImageInfo, ImageObject, State},
    DeviceSize, NonExhaustive,
};
use ash::vk::{self, Handle};
use smallvec::SmallVec;
use std::{error::Error, fmt};

mod buffer_copy;
mod render;
mod shader;
mod store;
mod subresource;

/// Parameters to create a new [`ImagePrimer`].
#[derive(Clone, Debug)]
pub struct ImagePrimerCreateInfo<'a> {
    /// How much memory is allocated for a staging image, relative to the size of its data.
    ///
    /// The default value is twice the data size plus 4 KiB.
    pub staging_memory_margin: StagingMemoryMargin,

    /// The preferred local work group size of the image-store compute shader. It is clamped to
    /// the device's limits.
    ///
    /// The default value is `128`.
    pub store_local_group_size: u32,

    pub _ne: NonExhaustive<'a>,
}

impl Default for ImagePrimerCreateInfo<'_> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ImagePrimerCreateInfo<'_> {
    /// Returns a default `ImagePrimerCreateInfo`.
    #[inline]
    pub const fn new() -> Self {
        ImagePrimerCreateInfo {
            staging_memory_margin: StagingMemoryMargin {
                multiplier: 2,
                slack: 4096,
            },
            store_local_group_size: 128,
            _ne: crate::NE,
        }
    }
}

/// Over-allocation of staging image memory: `size * multiplier + slack`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingMemoryMargin {
    pub multiplier: DeviceSize,
    pub slack: DeviceSize,
}

impl StagingMemoryMargin {
    #[inline]
    pub fn apply(self, size: DeviceSize) -> DeviceSize {
        size * self.multiplier.max(1) + self.slack
    }
}

/// The ways an image can be primed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimingStrategy {
    BufferCopy,
    Rendering,
    ImageStore,
}

/// The collaborators that kit builders borrow from the primer.
pub(crate) struct Collaborators<'p> {
    pub compiler: &'p dyn ShaderCompiler,
    pub converter: &'p dyn FormatConverter,
}

/// Restores the contents of images, owning the pipelines and related objects that the render
/// and image-store strategies share across images.
pub struct ImagePrimer {
    staging_memory_margin: StagingMemoryMargin,
    store_local_group_size: u32,
    compiler: Box<dyn ShaderCompiler>,
    converter: Box<dyn FormatConverter>,
    render_kits: RenderKitBuilder,
    store_kits: StoreKitBuilder,
}

impl ImagePrimer {
    /// Creates a new `ImagePrimer` that converts formats with a [`ChannelConverter`].
    pub fn new(create_info: &ImagePrimerCreateInfo<'_>, compiler: Box<dyn ShaderCompiler>) -> Self {
        Self::with_converter(create_info, compiler, Box::new(ChannelConverter))
    }

    /// Creates a new `ImagePrimer` with a custom format converter.
    pub fn with_converter(
        create_info: &ImagePrimerCreateInfo<'_>,
        compiler: Box<dyn ShaderCompiler>,
        converter: Box<dyn FormatConverter>,
    ) -> Self {
        let &ImagePrimerCreateInfo {
            staging_memory_margin,
            store_local_group_size,
            _ne: _,
        } = create_info;

        ImagePrimer {
            staging_memory_margin,
            store_local_group_size: store_local_group_size.max(1),
            compiler,
            converter,
            render_kits: RenderKitBuilder::new(),
            store_kits: StoreKitBuilder::new(),
        }
    }

    /// Returns the strategy that [`prime`](Self::prime) would use for `image`.
    pub fn select_strategy(
        &self,
        sb: &StateBuilder<'_>,
        image: vk::Image,
    ) -> Result<PrimingStrategy, PrimeError> {
        let target = new_image(sb, image)?;
        let info = &target.info;
        let physical_device = sb
            .physical_device_of(target.device)
            .ok_or(PrimeError::missing(target.device))?;
        let features = physical_device.format_features(info.format, info.tiling);

        if info.samples != vk::SampleCountFlags::TYPE_1 {
            return Err(PrimeError::UnsupportedSampleCount(info.samples));
        }

        if info.usage.contains(vk::ImageUsageFlags::TRANSFER_DST)
            && features.contains(vk::FormatFeatureFlags::TRANSFER_DST)
        {
            return Ok(PrimingStrategy::BufferCopy);
        }

        let uncompressed = format_info(info.format).is_some_and(|f| !f.compressed);

        if uncompressed && info.image_type == vk::ImageType::TYPE_2D {
            let renderable = if target.aspects.contains(vk::ImageAspectFlags::COLOR) {
                info.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                    && features.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT)
            } else {
                info.usage
                    .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
                    && features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            };

            if renderable {
                return Ok(PrimingStrategy::Rendering);
            }
        }

        if target.aspects == vk::ImageAspectFlags::COLOR
            && info.usage.contains(vk::ImageUsageFlags::STORAGE)
            && features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
            && glsl_image_format(info.format).is_some()
        {
            return Ok(PrimingStrategy::ImageStore);
        }

        Err(PrimeError::UnsupportedStrategy { image })
    }

    /// Primes `image` with the strategy chosen by [`select_strategy`](Self::select_strategy),
    /// and returns that strategy.
    pub fn prime(
        &mut self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        image: vk::Image,
        opaque_bound_ranges: &[vk::ImageSubresourceRange],
        queue: vk::Queue,
        sparse_binding_queue: Option<vk::Queue>,
    ) -> Result<PrimingStrategy, PrimeError> {
        let strategy = self.select_strategy(sb, image)?;

        log::debug!("priming image {image:?} with strategy {strategy:?}");

        match strategy {
            PrimingStrategy::BufferCopy => self.prime_by_buffer_copy(
                sb,
                scratch,
                image,
                opaque_bound_ranges,
                queue,
                sparse_binding_queue,
            ),
            PrimingStrategy::Rendering => self.prime_by_rendering(
                sb,
                scratch,
                image,
                opaque_bound_ranges,
                queue,
                sparse_binding_queue,
            ),
            PrimingStrategy::ImageStore => self.prime_by_image_store(
                sb,
                scratch,
                image,
                opaque_bound_ranges,
                queue,
                sparse_binding_queue,
            ),
        }?;

        Ok(strategy)
    }

    /// Copies the captured data of `image` into it from a scratch buffer.
    ///
    /// Every subresource in `opaque_bound_ranges` is copied, and for sparse-resident images
    /// every bound sparse block. Each subresource ends up in the layout it had in the captured
    /// state.
    pub fn prime_by_buffer_copy(
        &mut self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        image: vk::Image,
        opaque_bound_ranges: &[vk::ImageSubresourceRange],
        queue: vk::Queue,
        sparse_binding_queue: Option<vk::Queue>,
    ) -> Result<(), PrimeError> {
        let src = old_image(sb, image)?;
        let target = new_image(sb, image)?;

        if target.info.samples != vk::SampleCountFlags::TYPE_1 {
            return Err(PrimeError::UnsupportedSampleCount(target.info.samples));
        }

        wait_for_sparse_binding(sb, src, queue, sparse_binding_queue);

        let job = BufferCopyJob::in_place(src);
        let mut session = BufferCopySession::new(&job, &*self.converter);

        for range in opaque_bound_ranges {
            session.collect_copies_from_subresource_range(sb, range)?;
        }

        if src.is_sparse_resident() {
            session.collect_copies_from_sparse_bindings(sb)?;
        }

        session.rollout(sb, scratch, queue);

        Ok(())
    }

    /// Renders the captured data of `image` into it, reading it from staging images as input
    /// attachments.
    ///
    /// The image must be a single-sampled, uncompressed 2D image with color or depth/stencil
    /// attachment usage. Each subresource ends up in the layout it had in the captured state.
    pub fn prime_by_rendering(
        &mut self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        image: vk::Image,
        opaque_bound_ranges: &[vk::ImageSubresourceRange],
        queue: vk::Queue,
        sparse_binding_queue: Option<vk::Queue>,
    ) -> Result<(), PrimeError> {
        let src = old_image(sb, image)?;
        wait_for_sparse_binding(sb, src, queue, sparse_binding_queue);

        let ImagePrimer {
            staging_memory_margin,
            compiler,
            converter,
            render_kits,
            ..
        } = self;
        let collaborators = Collaborators {
            compiler: &**compiler,
            converter: &**converter,
        };

        render_kits.prime(
            sb,
            scratch,
            &collaborators,
            *staging_memory_margin,
            image,
            opaque_bound_ranges,
            queue,
        )
    }

    /// Stores the captured data of `image` into it from a compute shader.
    ///
    /// The image must be a single-sampled color image with storage usage, of a format that can
    /// be declared as a storage image. Each subresource ends up in the layout it had in the
    /// captured state.
    pub fn prime_by_image_store(
        &mut self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        image: vk::Image,
        opaque_bound_ranges: &[vk::ImageSubresourceRange],
        queue: vk::Queue,
        sparse_binding_queue: Option<vk::Queue>,
    ) -> Result<(), PrimeError> {
        let src = old_image(sb, image)?;
        wait_for_sparse_binding(sb, src, queue, sparse_binding_queue);

        let ImagePrimer {
            store_local_group_size,
            compiler,
            converter,
            store_kits,
            ..
        } = self;
        let collaborators = Collaborators {
            compiler: &**compiler,
            converter: &**converter,
        };

        store_kits.prime(
            sb,
            scratch,
            &collaborators,
            *store_local_group_size,
            image,
            opaque_bound_ranges,
            queue,
        )
    }

    /// Destroys every pipeline, layout, render pass and shader module the primer created.
    ///
    /// Scratch work that uses them must have finished, so `scratch` is freed first when it is
    /// given.
    pub fn free(mut self, sb: &mut StateBuilder<'_>, scratch: Option<ScratchResources>) {
        if let Some(scratch) = scratch {
            scratch.free(sb);
        }

        self.store_kits.free(sb);
        self.render_kits.free(sb);
    }
}

impl fmt::Debug for ImagePrimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePrimer")
            .field("staging_memory_margin", &self.staging_memory_margin)
            .field("store_local_group_size", &self.store_local_group_size)
            .field("render_kits", &self.render_kits)
            .field("store_kits", &self.store_kits)
            .finish_non_exhaustive()
    }
}

/// Error that can happen when priming an image.
#[derive(Clone, Debug, PartialEq)]
pub enum PrimeError {
    /// An object the primer needs is in neither state.
    MissingObject {
        object_type: vk::ObjectType,
        handle: u64,
    },

    /// The captured state has no data for a subresource.
    MissingLevelData {
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
    },

    /// The format is unknown, compressed where that is not supported, or has no counterpart in
    /// the chosen strategy.
    UnsupportedFormat(vk::Format),

    /// The strategy cannot write this aspect.
    UnsupportedAspect(vk::ImageAspectFlags),

    /// The strategy cannot write images of this type.
    UnsupportedImageType(vk::ImageType),

    /// Multisampled images cannot be primed.
    UnsupportedSampleCount(vk::SampleCountFlags),

    /// The image's usage and format features allow none of the strategies.
    UnsupportedStrategy { image: vk::Image },

    /// The physical device has no memory type that fits.
    NoSuitableMemoryType,

    /// A generated shader failed to compile.
    ShaderCompilation(ShaderCompileError),

    /// Data did not have the size its subresource requires.
    DataSizeMismatch {
        expected: DeviceSize,
        actual: DeviceSize,
    },

    /// Data could not be converted between formats.
    Conversion(ConvertError),
}

impl PrimeError {
    fn missing<H: Handle>(handle: H) -> Self {
        PrimeError::MissingObject {
            object_type: H::TYPE,
            handle: handle.as_raw(),
        }
    }

    /// Returns whether the error is about a configuration that the strategy does not support.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            PrimeError::UnsupportedFormat(_)
                | PrimeError::UnsupportedAspect(_)
                | PrimeError::UnsupportedImageType(_)
                | PrimeError::UnsupportedSampleCount(_)
                | PrimeError::UnsupportedStrategy { .. },
        )
    }

    /// Returns whether the subresource can be skipped and priming continue with the next one.
    pub(crate) fn is_skippable(&self) -> bool {
        self.is_unsupported()
            || matches!(
                self,
                PrimeError::MissingLevelData { .. } | PrimeError::Conversion(_),
            )
    }
}

impl Error for PrimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PrimeError::ShaderCompilation(err) => Some(err),
            PrimeError::Conversion(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for PrimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingObject {
                object_type,
                handle,
            } => write!(f, "the {object_type:?} object {handle:#x} does not exist"),
            Self::MissingLevelData {
                image,
                aspect,
                layer,
                level,
            } => write!(
                f,
                "image {image:?} has no data for aspect {aspect:?}, layer {layer}, level {level}",
            ),
            Self::UnsupportedFormat(format) => {
                write!(f, "the format {format:?} is not supported for priming")
            }
            Self::UnsupportedAspect(aspect) => {
                write!(f, "the aspect {aspect:?} is not supported for priming")
            }
            Self::UnsupportedImageType(image_type) => {
                write!(f, "the image type {image_type:?} is not supported for priming")
            }
            Self::UnsupportedSampleCount(samples) => {
                write!(f, "images with {samples:?} samples cannot be primed")
            }
            Self::UnsupportedStrategy { image } => {
                write!(f, "no priming strategy supports image {image:?}")
            }
            Self::NoSuitableMemoryType => f.write_str("no suitable memory type was found"),
            Self::ShaderCompilation(_) => f.write_str("a priming shader failed to compile"),
            Self::DataSizeMismatch { expected, actual } => write!(
                f,
                "subresource data has {actual} bytes where {expected} bytes are required",
            ),
            Self::Conversion(_) => f.write_str("subresource data could not be converted"),
        }
    }
}

impl From<ConvertError> for PrimeError {
    fn from(err: ConvertError) -> Self {
        Self::Conversion(err)
    }
}

impl From<ShaderCompileError> for PrimeError {
    fn from(err: ShaderCompileError) -> Self {
        Self::ShaderCompilation(err)
    }
}

/// Logs and drops errors that only concern one subresource.
pub(crate) fn skip_subresource(result: Result<(), PrimeError>) -> Result<(), PrimeError> {
    match result {
        Err(err) if err.is_skippable() => {
            log::warn!("skipping subresource: {err}");

            Ok(())
        }
        result => result,
    }
}

fn old_image<'a>(sb: &StateBuilder<'a>, image: vk::Image) -> Result<&'a ImageObject, PrimeError> {
    sb.old_state()
        .images
        .get(&image)
        .ok_or(PrimeError::missing(image))
}

fn new_image<'s>(sb: &'s StateBuilder<'_>, image: vk::Image) -> Result<&'s ImageObject, PrimeError> {
    sb.new_state()
        .images
        .get(&image)
        .ok_or(PrimeError::missing(image))
}

/// Waits for the sparse-binding queue before a sparse image is primed on another queue, so that
/// its binds have completed.
fn wait_for_sparse_binding(
    sb: &mut StateBuilder<'_>,
    image: &ImageObject,
    queue: vk::Queue,
    sparse_binding_queue: Option<vk::Queue>,
) {
    let Some(sparse_binding_queue) = sparse_binding_queue else {
        return;
    };

    if image
        .info
        .flags
        .contains(vk::ImageCreateFlags::SPARSE_BINDING)
        && sparse_binding_queue != queue
    {
        log::trace!("waiting for sparse binding queue {sparse_binding_queue:?}");

        sb.write(Command::QueueWaitIdle {
            queue: sparse_binding_queue,
        });
    }
}

/// Creates `count` staging images shaped like `target` in the staging format, each bound to its
/// own memory, and registers them with `cleanup`.
pub(crate) fn allocate_staging_images(
    sb: &mut StateBuilder<'_>,
    margin: StagingMemoryMargin,
    device: vk::Device,
    target: &ImageInfo,
    count: u32,
    cleanup: &mut CleanupStack,
) -> Result<Vec<vk::Image>, PrimeError> {
    let physical_device = sb
        .physical_device_of(device)
        .ok_or(PrimeError::missing(device))?;
    let memory_type_index =
        find_memory_type_index(physical_device, vk::MemoryPropertyFlags::DEVICE_LOCAL, !0)
            .or_else(|| find_memory_type_index(physical_device, vk::MemoryPropertyFlags::empty(), !0))
            .ok_or(PrimeError::NoSuitableMemoryType)?;

    let info = ImageInfo {
        flags: vk::ImageCreateFlags::empty(),
        image_type: target.image_type,
        format: STAGING_FORMAT,
        extent: target.extent,
        mip_levels: target.mip_levels,
        array_layers: target.array_layers,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::INPUT_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
    };
    let data_size: DeviceSize = (0..info.mip_levels)
        .map(|level| {
            let extent = info.level_extent(level);

            DeviceSize::from(extent.width)
                * DeviceSize::from(extent.height)
                * DeviceSize::from(extent.depth)
                * DeviceSize::from(STAGING_ELEMENT_SIZE)
        })
        .sum::<DeviceSize>()
        * DeviceSize::from(info.array_layers);
    let size = margin.apply(data_size);

    let mut images = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let memory = sb.new_handle();
        sb.write(Command::AllocateMemory {
            device,
            memory,
            size,
            memory_type_index,
        });
        cleanup.push(device, Object::DeviceMemory(memory));

        let image = sb.new_handle();
        sb.write(Command::CreateImage {
            device,
            image,
            info,
        });
        sb.write(Command::BindImageMemory {
            device,
            image,
            memory,
            offset: 0,
        });
        cleanup.push(device, Object::Image(image));

        log::debug!("created staging image {image:?} with {size} bytes of memory");

        images.push(image);
    }

    Ok(images)
}

/// Builds barriers that move every subresource of `image` from `old_layout` into the layout
/// chosen by `policy`.
///
/// The aspects of a subresource share one barrier when their layouts agree. Otherwise each
/// aspect gets its own barrier, which relies on separate depth/stencil layouts.
pub(crate) fn final_layout_barriers(
    old_state: &State,
    image: &ImageObject,
    policy: LayoutPolicy,
    old_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
) -> Vec<ImageBarrier> {
    let aspects = crate::format::aspect_bits(image.aspects);
    let mut barriers = Vec::new();

    let mut push = |aspect_mask, level, layer, new_layout| {
        barriers.push(ImageBarrier {
            image: image.handle,
            src_access,
            dst_access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            old_layout,
            new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: level,
                level_count: 1,
                base_array_layer: layer,
                layer_count: 1,
            },
        });
    };

    for level in 0..image.info.mip_levels {
        for layer in 0..image.info.array_layers {
            let layouts: SmallVec<[_; 4]> = aspects
                .iter()
                .map(|&aspect| {
                    (aspect, policy.resolve(old_state, image.handle, aspect, layer, level))
                })
                .collect();

            match layouts.split_first() {
                Some((&(_, layout), rest)) if rest.iter().all(|&(_, l)| l == layout) => {
                    push(image.aspects, level, layer, layout);
                }
                Some(_) => {
                    for &(aspect, layout) in &layouts {
                        push(aspect, level, layer, layout);
                    }
                }
                None => push(
                    image.aspects,
                    level,
                    layer,
                    policy.resolve(
                        old_state,
                        image.handle,
                        vk::ImageAspectFlags::COLOR,
                        layer,
                        level,
                    ),
                ),
            }
        }
    }

    barriers
}

/// Builds a barrier that moves every subresource of `image` from `UNDEFINED` into `new_layout`.
pub(crate) fn initial_layout_barrier(
    image: &ImageObject,
    new_layout: vk::ImageLayout,
    dst_access: vk::AccessFlags,
) -> ImageBarrier {
    ImageBarrier {
        image: image.handle,
        src_access: vk::AccessFlags::empty(),
        dst_access,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        subresource_range: image.full_range(),
    }
}

/// Commits a batch that only records a barrier moving `image` into its final layouts, and hands
/// `cleanup` over to be destroyed after the batch.
pub(crate) fn commit_final_layouts(
    sb: &mut StateBuilder<'_>,
    scratch: &mut ScratchResources,
    queue: vk::Queue,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    src_stages: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    cleanup: &mut CleanupStack,
) {
    let mut batch = QueueCommandBatch::new("final layouts");

    if let Some(target) = sb.new_state().images.get(&image) {
        let barriers = final_layout_barriers(
            sb.old_state(),
            target,
            LayoutPolicy::SameAsImage,
            old_layout,
            src_access,
        );

        batch.record_commands_on_commit(move |sb, command_buffer| {
            sb.write(Command::CmdPipelineBarrier {
                command_buffer,
                src_stages,
                dst_stages: vk::PipelineStageFlags::ALL_COMMANDS,
                buffer_barriers: Vec::new(),
                image_barriers: barriers,
            });
        });
    }

    batch.destroy_all_after_execution(cleanup);
    scratch.commit(sb, queue, batch);
}
