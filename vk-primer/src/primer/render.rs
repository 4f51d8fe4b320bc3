// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    allocate_staging_images, commit_final_layouts, initial_layout_barrier, new_image,
    old_image, shader, skip_subresource, BufferCopyJob, BufferCopySession, Collaborators,
    CopyDestination, LayoutPolicy, PrimeError, StagingMemoryMargin,
};
use crate::{
    builder::StateBuilder,
    cache::KitCache,
    cleanup::CleanupStack,
    command::{
        AttachmentInfo, ClearValue, Command, DescriptorResource, DescriptorSetLayoutBinding,
        DescriptorWrite, GraphicsPipelineInfo, ImageViewInfo, MemoryWrite, Object,
        RenderPassInfo,
    },
    format::{aspect_bits, format_info, STAGING_FORMAT},
    scratch::{QueueCommandBatch, ScratchResources},
    state::ImageInfo,
    DeviceSize,
};
use ash::vk;
use std::collections::{BTreeMap, BTreeSet};

/// Stencil values are written one bit per render pass.
const STENCIL_BITS: u32 = 8;

/// Load operations of one render pass variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct TargetOps {
    load_op: vk::AttachmentLoadOp,
    stencil_load_op: vk::AttachmentLoadOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct RenderPassKey {
    device: vk::Device,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    input_count: u32,
    ops: TargetOps,
}

/// The objects that draw one aspect of one format.
#[derive(Clone, Copy, Debug)]
struct RenderKit {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    /// One render pass and pipeline per pass over a subresource.
    passes: [(vk::RenderPass, vk::Pipeline); STENCIL_BITS as usize],
    pass_count: u32,
}

/// Creates and caches the render passes, pipelines and layouts used to prime images by
/// rendering.
#[derive(Debug, Default)]
pub(super) struct RenderKitBuilder {
    descriptor_set_layouts: KitCache<(vk::Device, u32, bool), vk::DescriptorSetLayout>,
    pipeline_layouts: KitCache<(vk::Device, vk::DescriptorSetLayout), vk::PipelineLayout>,
    render_passes: KitCache<RenderPassKey, vk::RenderPass>,
    shader_modules: KitCache<(vk::Device, String), vk::ShaderModule>,
    pipelines: KitCache<(vk::RenderPass, vk::ImageAspectFlags), vk::Pipeline>,
    cleanup: CleanupStack,
}

impl RenderKitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prime(
        &mut self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        collaborators: &Collaborators<'_>,
        margin: StagingMemoryMargin,
        image: vk::Image,
        ranges: &[vk::ImageSubresourceRange],
        queue: vk::Queue,
    ) -> Result<(), PrimeError> {
        let src = old_image(sb, image)?;
        let target = new_image(sb, image)?;
        let (device, info, aspects) = (target.device, target.info, target.aspects);
        let is_color = aspects == vk::ImageAspectFlags::COLOR;
        let attachment_layout = attachment_layout(is_color);
        let (attachment_stages, attachment_access) = attachment_access(is_color);
        let barrier = initial_layout_barrier(target, attachment_layout, attachment_access);

        if info.image_type != vk::ImageType::TYPE_2D {
            return Err(PrimeError::UnsupportedImageType(info.image_type));
        }

        if info.samples != vk::SampleCountFlags::TYPE_1 {
            return Err(PrimeError::UnsupportedSampleCount(info.samples));
        }

        let format = format_info(info.format)
            .filter(|f| !f.compressed)
            .ok_or(PrimeError::UnsupportedFormat(info.format))?;
        let attachment_usage = if is_color {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        } else {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        };

        if !info.usage.contains(attachment_usage) {
            return Err(PrimeError::UnsupportedStrategy { image });
        }

        let mut kits = BTreeMap::new();

        for aspect in aspect_bits(aspects) {
            let element = format
                .aspect_format(aspect)
                .ok_or(PrimeError::UnsupportedAspect(aspect))?;

            if element.has_wide_components() {
                return Err(PrimeError::UnsupportedFormat(info.format));
            }

            let input_count = shader::words_per_texel(element).div_ceil(4);
            let fragment_shader = shader::render_fragment_shader(element, aspect, input_count);
            let kit = self.kit(
                sb,
                collaborators,
                device,
                info.format,
                aspects,
                aspect,
                input_count,
                fragment_shader,
            )?;

            kits.insert(aspect, (kit, input_count));
        }

        let mut staging_cleanup = CleanupStack::new();
        let mut destinations = BTreeMap::new();

        for (&aspect, &(_, input_count)) in &kits {
            match allocate_staging_images(sb, margin, device, &info, input_count, &mut staging_cleanup)
            {
                Ok(images) => {
                    destinations.insert(aspect, CopyDestination::Unpacked(images));
                }
                Err(err) => {
                    staging_cleanup.unwind(sb);

                    return Err(err);
                }
            }
        }

        let mut batch = QueueCommandBatch::new("render target layout");
        batch.record_commands_on_commit(move |sb, command_buffer| {
            sb.write(Command::CmdPipelineBarrier {
                command_buffer,
                src_stages: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stages: attachment_stages,
                buffer_barriers: Vec::new(),
                image_barriers: vec![barrier],
            });
        });
        scratch.commit(sb, queue, batch);

        let job = BufferCopyJob {
            src_image: image,
            destinations,
            final_layout: LayoutPolicy::Uniform(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        };
        let mut session = BufferCopySession::new(&job, collaborators.converter);
        let collected = ranges
            .iter()
            .try_for_each(|range| session.collect_copies_from_subresource_range(sb, range))
            .and_then(|()| {
                if src.is_sparse_resident() {
                    session.collect_copies_from_sparse_bindings(sb)
                } else {
                    Ok(())
                }
            });

        let result = collected.and_then(|()| {
            let staging_aspects: BTreeMap<vk::Image, vk::ImageAspectFlags> = job
                .destinations
                .iter()
                .flat_map(|(&aspect, destination)| match destination {
                    CopyDestination::Unpacked(images) => {
                        images.iter().map(|&i| (i, aspect)).collect::<Vec<_>>()
                    }
                    CopyDestination::Direct(_) => Vec::new(),
                })
                .collect();
            let subresources: BTreeSet<(u32, u32, vk::ImageAspectFlags)> = session
                .pieces()
                .iter()
                .filter_map(|piece| {
                    let aspect = *staging_aspects.get(&piece.dst_image)?;

                    Some((piece.level, piece.layer, aspect))
                })
                .collect();

            session.rollout(sb, scratch, queue);

            for (level, layer, aspect) in subresources {
                let (kit, _) = kits[&aspect];
                let inputs: &[vk::Image] = match &job.destinations[&aspect] {
                    CopyDestination::Unpacked(images) => images,
                    CopyDestination::Direct(_) => &[],
                };
                let pass = RenderPass {
                    device,
                    target: image,
                    info: &info,
                    aspects,
                    aspect,
                    level,
                    layer,
                    inputs,
                };

                skip_subresource(pass.record(sb, scratch, queue, &kit))?;
            }

            Ok(())
        });

        commit_final_layouts(
            sb,
            scratch,
            queue,
            image,
            attachment_layout,
            attachment_stages,
            attachment_access,
            &mut staging_cleanup,
        );

        result
    }

    /// Returns the kit drawing `aspect` of `format`, creating what is missing.
    fn kit(
        &mut self,
        sb: &mut StateBuilder<'_>,
        collaborators: &Collaborators<'_>,
        device: vk::Device,
        format: vk::Format,
        aspects: vk::ImageAspectFlags,
        aspect: vk::ImageAspectFlags,
        input_count: u32,
        fragment_shader: String,
    ) -> Result<RenderKit, PrimeError> {
        let RenderKitBuilder {
            descriptor_set_layouts,
            pipeline_layouts,
            render_passes,
            shader_modules,
            pipelines,
            cleanup,
        } = self;

        let stencil = aspect == vk::ImageAspectFlags::STENCIL;

        let set_layout =
            descriptor_set_layouts.get_or_try_insert((device, input_count, stencil), || {
                let mut bindings: Vec<_> = (0..input_count)
                    .map(|binding| DescriptorSetLayoutBinding {
                        binding,
                        descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT,
                        descriptor_count: 1,
                        stages: vk::ShaderStageFlags::FRAGMENT,
                    })
                    .collect();

                if stencil {
                    bindings.push(DescriptorSetLayoutBinding {
                        binding: input_count,
                        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                        descriptor_count: 1,
                        stages: vk::ShaderStageFlags::FRAGMENT,
                    });
                }

                let layout = sb.new_handle();
                sb.write(Command::CreateDescriptorSetLayout {
                    device,
                    layout,
                    bindings,
                });
                cleanup.push(device, Object::DescriptorSetLayout(layout));

                Ok::<_, PrimeError>(layout)
            })?;

        let pipeline_layout = pipeline_layouts.get_or_try_insert((device, set_layout), || {
            let layout = sb.new_handle();
            sb.write(Command::CreatePipelineLayout {
                device,
                layout,
                set_layouts: vec![set_layout],
            });
            cleanup.push(device, Object::PipelineLayout(layout));

            Ok::<_, PrimeError>(layout)
        })?;

        let vertex_shader = shader::shader_module(
            sb,
            shader_modules,
            cleanup,
            collaborators.compiler,
            device,
            vk::ShaderStageFlags::VERTEX,
            shader::full_screen_vertex_shader(),
        )?;
        let fragment_shader = shader::shader_module(
            sb,
            shader_modules,
            cleanup,
            collaborators.compiler,
            device,
            vk::ShaderStageFlags::FRAGMENT,
            fragment_shader,
        )?;

        let pass_count = if stencil { STENCIL_BITS } else { 1 };
        let mut passes = [(vk::RenderPass::null(), vk::Pipeline::null()); STENCIL_BITS as usize];

        for (index, pass) in passes.iter_mut().take(pass_count as usize).enumerate() {
            let key = RenderPassKey {
                device,
                format,
                aspect,
                input_count,
                ops: target_ops(aspects, aspect, index == 0),
            };
            let render_pass = render_passes.get_or_try_insert(key, || {
                let render_pass = sb.new_handle();
                sb.write(Command::CreateRenderPass {
                    device,
                    render_pass,
                    info: render_pass_info(&key),
                });
                cleanup.push(device, Object::RenderPass(render_pass));
                log::debug!("created render pass {render_pass:?} for {aspect:?} of {format:?}");

                Ok::<_, PrimeError>(render_pass)
            })?;
            let pipeline = pipelines.get_or_try_insert((render_pass, aspect), || {
                let pipeline = sb.new_handle();
                sb.write(Command::CreateGraphicsPipeline {
                    device,
                    pipeline,
                    info: pipeline_info(
                        pipeline_layout,
                        render_pass,
                        vertex_shader,
                        fragment_shader,
                        aspect,
                    ),
                });
                cleanup.push(device, Object::Pipeline(pipeline));

                Ok::<_, PrimeError>(pipeline)
            })?;

            *pass = (render_pass, pipeline);
        }

        Ok(RenderKit {
            set_layout,
            pipeline_layout,
            passes,
            pass_count,
        })
    }

    /// Destroys every cached object.
    pub fn free(&mut self, sb: &mut StateBuilder<'_>) {
        self.cleanup.unwind(sb);
    }
}

/// One subresource drawn by a [`RenderKit`].
struct RenderPass<'a> {
    device: vk::Device,
    target: vk::Image,
    info: &'a ImageInfo,
    aspects: vk::ImageAspectFlags,
    aspect: vk::ImageAspectFlags,
    level: u32,
    layer: u32,
    inputs: &'a [vk::Image],
}

impl RenderPass<'_> {
    /// Creates the views, framebuffer and descriptor set of the subresource and commits a batch
    /// that draws into it once per pass of `kit`.
    fn record(
        &self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        queue: vk::Queue,
        kit: &RenderKit,
    ) -> Result<(), PrimeError> {
        let device = self.device;
        let extent = self.info.level_extent(self.level);
        let extent = vk::Extent2D {
            width: extent.width,
            height: extent.height,
        };
        let stencil = self.aspect == vk::ImageAspectFlags::STENCIL;
        let mut batch = QueueCommandBatch::new(format!(
            "render {:?} level {} layer {}",
            self.aspect, self.level, self.layer,
        ));

        let target_view = self.view(sb, &mut batch, self.target, self.info.format, self.aspects);
        let input_views: Vec<_> = self
            .inputs
            .iter()
            .map(|&input| {
                self.view(sb, &mut batch, input, STAGING_FORMAT, vk::ImageAspectFlags::COLOR)
            })
            .collect();

        let (first_render_pass, _) = kit.passes[0];
        let framebuffer = sb.new_handle();
        sb.write(Command::CreateFramebuffer {
            device,
            framebuffer,
            render_pass: first_render_pass,
            attachments: std::iter::once(target_view)
                .chain(input_views.iter().copied())
                .collect(),
            extent,
            layers: 1,
        });
        batch.destroy_after_execution(device, Object::Framebuffer(framebuffer));

        let mut pool_sizes = vec![(
            vk::DescriptorType::INPUT_ATTACHMENT,
            input_views.len() as u32,
        )];

        if stencil {
            pool_sizes.push((vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1));
        }

        let pool = sb.new_handle();
        sb.write(Command::CreateDescriptorPool {
            device,
            pool,
            max_sets: 1,
            pool_sizes,
        });
        batch.destroy_after_execution(device, Object::DescriptorPool(pool));

        let set = sb.new_handle();
        sb.write(Command::AllocateDescriptorSets {
            device,
            pool,
            sets: vec![(set, kit.set_layout)],
        });

        let mut writes: Vec<_> = input_views
            .iter()
            .zip(0..)
            .map(|(&view, binding)| DescriptorWrite {
                dst_set: set,
                dst_binding: binding,
                resource: DescriptorResource::InputAttachment {
                    view,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            })
            .collect();
        let mut dynamic_offsets = vec![Vec::new()];

        if stencil {
            let alignment = sb
                .physical_device_of(device)
                .ok_or(PrimeError::missing(device))?
                .limits
                .min_uniform_buffer_offset_alignment
                .max(4);
            let bit_writes = (0..STENCIL_BITS)
                .map(|bit| MemoryWrite {
                    offset: DeviceSize::from(bit) * alignment,
                    data: sb.store(bit.to_le_bytes().to_vec()),
                })
                .collect();
            let buffer = batch.new_scratch_buffer(
                sb,
                DeviceSize::from(STENCIL_BITS) * alignment,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                bit_writes,
            );

            writes.push(DescriptorWrite {
                dst_set: set,
                dst_binding: input_views.len() as u32,
                resource: DescriptorResource::UniformBufferDynamic {
                    buffer,
                    offset: 0,
                    range: 4,
                },
            });
            dynamic_offsets = (0..STENCIL_BITS)
                .map(|bit| vec![(DeviceSize::from(bit) * alignment) as u32])
                .collect();
        }

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let passes: Vec<_> = kit.passes[..kit.pass_count as usize]
            .iter()
            .copied()
            .zip(dynamic_offsets)
            .collect();
        let pipeline_layout = kit.pipeline_layout;

        batch.record_commands_on_commit(move |sb, command_buffer| {
            sb.write(Command::UpdateDescriptorSets { device, writes });

            for (bit, ((render_pass, pipeline), dynamic_offsets)) in passes.into_iter().enumerate() {
                let clear_values = if stencil && bit == 0 {
                    vec![ClearValue::DepthStencil {
                        depth: 0.0,
                        stencil: 0,
                    }]
                } else {
                    Vec::new()
                };

                sb.write(Command::CmdBeginRenderPass {
                    command_buffer,
                    render_pass,
                    framebuffer,
                    render_area,
                    clear_values,
                });
                sb.write(Command::CmdBindPipeline {
                    command_buffer,
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                    pipeline,
                });
                sb.write(Command::CmdBindDescriptorSets {
                    command_buffer,
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                    layout: pipeline_layout,
                    first_set: 0,
                    sets: vec![set],
                    dynamic_offsets,
                });
                sb.write(Command::CmdSetViewport {
                    command_buffer,
                    viewport,
                });
                sb.write(Command::CmdSetScissor {
                    command_buffer,
                    scissor: render_area,
                });

                if stencil {
                    let mask = 1 << bit;

                    sb.write(Command::CmdSetStencilCompareMask {
                        command_buffer,
                        face_mask: vk::StencilFaceFlags::FRONT_AND_BACK,
                        compare_mask: 0xff,
                    });
                    sb.write(Command::CmdSetStencilWriteMask {
                        command_buffer,
                        face_mask: vk::StencilFaceFlags::FRONT_AND_BACK,
                        write_mask: mask,
                    });
                    sb.write(Command::CmdSetStencilReference {
                        command_buffer,
                        face_mask: vk::StencilFaceFlags::FRONT_AND_BACK,
                        reference: mask,
                    });
                }

                sb.write(Command::CmdDraw {
                    command_buffer,
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                });
                sb.write(Command::CmdEndRenderPass { command_buffer });
            }
        });

        log::trace!(
            "rendering {:?} of image {:?} level {} layer {} in {} passes",
            self.aspect,
            self.target,
            self.level,
            self.layer,
            kit.pass_count,
        );

        scratch.commit(sb, queue, batch);

        Ok(())
    }

    /// Creates a view of the subresource in `image`, destroyed after `batch`.
    fn view(
        &self,
        sb: &mut StateBuilder<'_>,
        batch: &mut QueueCommandBatch,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> vk::ImageView {
        let view = sb.new_handle();
        sb.write(Command::CreateImageView {
            device: self.device,
            view,
            info: ImageViewInfo {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask,
                    base_mip_level: self.level,
                    level_count: 1,
                    base_array_layer: self.layer,
                    layer_count: 1,
                },
            },
        });
        batch.destroy_after_execution(self.device, Object::ImageView(view));

        view
    }
}

fn attachment_layout(is_color: bool) -> vk::ImageLayout {
    if is_color {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    }
}

fn attachment_access(is_color: bool) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    if is_color {
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
    } else {
        (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
    }
}

/// The aspect being drawn is overwritten, except that stencil bits accumulate over the passes
/// after a clear. Other aspects of the target are kept.
fn target_ops(
    aspects: vk::ImageAspectFlags,
    aspect: vk::ImageAspectFlags,
    first_pass: bool,
) -> TargetOps {
    let keep_or_ignore = |other: vk::ImageAspectFlags| {
        if aspects.contains(other) {
            vk::AttachmentLoadOp::LOAD
        } else {
            vk::AttachmentLoadOp::DONT_CARE
        }
    };

    match aspect {
        vk::ImageAspectFlags::STENCIL => TargetOps {
            load_op: keep_or_ignore(vk::ImageAspectFlags::DEPTH),
            stencil_load_op: if first_pass {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            },
        },
        vk::ImageAspectFlags::DEPTH => TargetOps {
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_load_op: keep_or_ignore(vk::ImageAspectFlags::STENCIL),
        },
        _ => TargetOps {
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        },
    }
}

fn render_pass_info(key: &RenderPassKey) -> RenderPassInfo {
    let is_color = key.aspect == vk::ImageAspectFlags::COLOR;
    let layout = attachment_layout(is_color);
    let target = AttachmentInfo {
        format: key.format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: key.ops.load_op,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: key.ops.stencil_load_op,
        stencil_store_op: vk::AttachmentStoreOp::STORE,
        initial_layout: layout,
        final_layout: layout,
    };
    let input = AttachmentInfo {
        format: STAGING_FORMAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::LOAD,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    let target_reference = vk::AttachmentReference {
        attachment: 0,
        layout,
    };

    RenderPassInfo {
        attachments: std::iter::once(target)
            .chain(std::iter::repeat(input).take(key.input_count as usize))
            .collect(),
        input_attachments: (1..=key.input_count)
            .map(|attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
            .collect(),
        color_attachment: is_color.then_some(target_reference),
        depth_stencil_attachment: (!is_color).then_some(target_reference),
    }
}

fn pipeline_info(
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    aspect: vk::ImageAspectFlags,
) -> GraphicsPipelineInfo {
    let stencil = aspect == vk::ImageAspectFlags::STENCIL;
    let depth = aspect == vk::ImageAspectFlags::DEPTH;
    let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

    if stencil {
        dynamic_states.extend([
            vk::DynamicState::STENCIL_COMPARE_MASK,
            vk::DynamicState::STENCIL_WRITE_MASK,
            vk::DynamicState::STENCIL_REFERENCE,
        ]);
    }

    GraphicsPipelineInfo {
        layout,
        render_pass,
        subpass: 0,
        vertex_shader,
        fragment_shader,
        samples: vk::SampleCountFlags::TYPE_1,
        color_write_mask: (aspect == vk::ImageAspectFlags::COLOR).then_some(
            vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
        ),
        depth_test_enable: depth,
        depth_write_enable: depth,
        depth_compare_op: vk::CompareOp::ALWAYS,
        stencil_test_enable: stencil,
        stencil_op: vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::REPLACE,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            compare_mask: 0xff,
            write_mask: 0xff,
            reference: 0,
        },
        dynamic_states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        primer::{ImagePrimer, ImagePrimerCreateInfo, PrimingStrategy},
        scratch::ScratchResourcesCreateInfo,
        tests::{image_2d, FailingCompiler, FakeCompiler},
    };

    fn render_passes(commands: &[Command]) -> BTreeMap<vk::RenderPass, RenderPassInfo> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::CreateRenderPass {
                    render_pass, info, ..
                } => Some((*render_pass, info.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn stencil_is_rendered_bit_by_bit() {
        test_state!(fixture);

        let image = fixture.add_image(
            image_2d(
                vk::Format::S8_UINT,
                4,
                4,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        let queue = fixture.queue;
        let range = fixture.old_state.images[&image].full_range();
        let mut primer = ImagePrimer::new(&ImagePrimerCreateInfo::default(), Box::new(FakeCompiler));
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        let strategy = primer
            .prime(&mut sb, &mut scratch, image, &[range], queue, None)
            .unwrap();
        assert_eq!(strategy, PrimingStrategy::Rendering);
        primer.free(&mut sb, Some(scratch));
        drop(sb);

        let commands = fixture.sink.commands();
        let begins: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::CmdBeginRenderPass { render_pass, .. } => Some(*render_pass),
                _ => None,
            })
            .collect();
        assert_eq!(begins.len(), 8);

        let passes = render_passes(commands);
        assert_eq!(passes.len(), 2);
        let first = &passes[&begins[0]].attachments[0];
        assert_eq!(first.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        for later in &begins[1..] {
            assert_eq!(
                passes[later].attachments[0].stencil_load_op,
                vk::AttachmentLoadOp::LOAD,
            );
        }

        let write_masks: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::CmdSetStencilWriteMask { write_mask, .. } => Some(*write_mask),
                _ => None,
            })
            .collect();
        assert_eq!(write_masks, [1, 2, 4, 8, 16, 32, 64, 128]);

        let dynamic_offsets: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::CmdBindDescriptorSets {
                    dynamic_offsets, ..
                } => Some(dynamic_offsets[0]),
                _ => None,
            })
            .collect();
        assert_eq!(dynamic_offsets, (0..8).map(|i| i * 256).collect::<Vec<_>>());

        let level = fixture.new_state.images[&image]
            .level(vk::ImageAspectFlags::STENCIL, 0, 0)
            .unwrap();
        assert_eq!(level.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn color_draws_once_per_subresource() {
        test_state!(fixture);

        let image = fixture.add_image(
            ImageInfo {
                array_layers: 3,
                ..image_2d(
                    vk::Format::R16G16B16A16_SFLOAT,
                    8,
                    8,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT,
                )
            },
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let queue = fixture.queue;
        let range = fixture.old_state.images[&image].full_range();
        let mut primer = ImagePrimer::new(&ImagePrimerCreateInfo::default(), Box::new(FakeCompiler));
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        primer
            .prime_by_rendering(&mut sb, &mut scratch, image, &[range], queue, None)
            .unwrap();
        primer.free(&mut sb, Some(scratch));
        drop(sb);

        let sink = &fixture.sink;
        assert_eq!(sink.count("vkCmdBeginRenderPass"), 3);
        assert_eq!(sink.count("vkCmdDraw"), 3);
        assert_eq!(sink.count("vkCreateRenderPass"), 1);
        assert_eq!(sink.count("vkCreateGraphicsPipelines"), 1);

        // Four 16-bit channels unpack to four words, which fit one staging image.
        assert_eq!(sink.count("vkCreateImage"), 1);

        let passes = render_passes(sink.commands());
        let info = passes.values().next().unwrap();
        assert_eq!(info.attachments.len(), 2);
        assert!(info.color_attachment.is_some());
        assert_eq!(info.input_attachments.len(), 1);

        // Every created object is destroyed.
        assert!(fixture.new_state.images.keys().all(|&i| i == image));
        assert_eq!(
            sink.count("vkCreateImageView"),
            sink.count("vkDestroyImageView"),
        );
        assert_eq!(
            sink.count("vkCreateFramebuffer"),
            sink.count("vkDestroyFramebuffer"),
        );

        for layer in 0..3 {
            let level = fixture.new_state.images[&image]
                .level(vk::ImageAspectFlags::COLOR, layer, 0)
                .unwrap();
            assert_eq!(level.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
    }

    #[test]
    fn compile_failure_creates_nothing_per_image() {
        test_state!(fixture);

        let image = fixture.add_image(
            image_2d(
                vk::Format::R8G8B8A8_UNORM,
                4,
                4,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ),
            vk::ImageLayout::GENERAL,
        );
        let queue = fixture.queue;
        let range = fixture.old_state.images[&image].full_range();
        let mut primer =
            ImagePrimer::new(&ImagePrimerCreateInfo::default(), Box::new(FailingCompiler));
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        let result = primer.prime_by_rendering(&mut sb, &mut scratch, image, &[range], queue, None);
        assert!(matches!(result, Err(PrimeError::ShaderCompilation(_))));
        primer.free(&mut sb, Some(scratch));
        drop(sb);

        assert_eq!(fixture.sink.count("vkCreateImage"), 0);
        assert_eq!(fixture.sink.count("vkCmdBeginRenderPass"), 0);
    }

    #[test]
    fn render_requires_2d_attachments() {
        test_state!(fixture);

        let image = fixture.add_image(
            image_2d(
                vk::Format::R8G8B8A8_UNORM,
                4,
                4,
                vk::ImageUsageFlags::STORAGE,
            ),
            vk::ImageLayout::GENERAL,
        );
        let queue = fixture.queue;
        let mut primer = ImagePrimer::new(&ImagePrimerCreateInfo::default(), Box::new(FakeCompiler));
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        assert_eq!(
            primer.prime_by_rendering(&mut sb, &mut scratch, image, &[], queue, None),
            Err(PrimeError::UnsupportedStrategy { image }),
        );
        primer.free(&mut sb, Some(scratch));
    }

    #[test]
    fn depth_keeps_stencil() {
        let ops = target_ops(
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            vk::ImageAspectFlags::DEPTH,
            true,
        );
        assert_eq!(ops.load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(ops.stencil_load_op, vk::AttachmentLoadOp::LOAD);

        let ops = target_ops(vk::ImageAspectFlags::STENCIL, vk::ImageAspectFlags::STENCIL, false);
        assert_eq!(ops.load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(ops.stencil_load_op, vk::AttachmentLoadOp::LOAD);
    }
}
