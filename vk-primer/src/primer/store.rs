// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    buffer_copy::{check_size, level_data},
    commit_final_layouts, extract_region, initial_layout_barrier, new_image, old_image, shader,
    skip_subresource, walk_sparse_image_memory_bindings, walk_subresource_range, Collaborators,
    PrimeError,
};
use crate::{
    builder::StateBuilder,
    cache::KitCache,
    cleanup::CleanupStack,
    command::{
        Command, ComputePipelineInfo, DescriptorResource, DescriptorSetLayoutBinding,
        DescriptorWrite, ImageViewInfo, MemoryWrite, Object, SpecializationConstant,
    },
    format::{format_info, unpack_for_priming, ElementFormat, FormatConverter},
    round_up,
    scratch::{QueueCommandBatch, ScratchResources},
    state::{ImageInfo, ImageObject},
    DeviceSize,
};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Per-dispatch parameters, read by the compute shader from a dynamic uniform buffer.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct StoreMetadata {
    /// Texel offset of the region in the subresource.
    offset: [i32; 4],
    /// Texel extent of the region.
    extent: [u32; 4],
    /// First texel of the dispatch in the region, texel count, first word in the texel buffer,
    /// and words per texel.
    range: [u32; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct StorePipelineKey {
    device: vk::Device,
    format: vk::Format,
    image_type: vk::ImageType,
    local_size: u32,
}

/// Unpacked texels of one region of a subresource.
#[derive(Debug)]
struct StoreJob {
    level: u32,
    layer: u32,
    offset: vk::Offset3D,
    extent: vk::Extent3D,
    data: Vec<u8>,
}

/// Creates and caches the compute pipelines and layouts used to prime images by image stores.
#[derive(Debug, Default)]
pub(super) struct StoreKitBuilder {
    descriptor_set_layouts: KitCache<vk::Device, vk::DescriptorSetLayout>,
    pipeline_layouts: KitCache<vk::Device, vk::PipelineLayout>,
    shader_modules: KitCache<(vk::Device, String), vk::ShaderModule>,
    pipelines: KitCache<StorePipelineKey, vk::Pipeline>,
    cleanup: CleanupStack,
}

impl StoreKitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prime(
        &mut self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        collaborators: &Collaborators<'_>,
        local_group_size: u32,
        image: vk::Image,
        ranges: &[vk::ImageSubresourceRange],
        queue: vk::Queue,
    ) -> Result<(), PrimeError> {
        let src = old_image(sb, image)?;
        let target = new_image(sb, image)?;
        let (device, info) = (target.device, target.info);
        let barrier = initial_layout_barrier(
            target,
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::SHADER_WRITE,
        );

        if info.samples != vk::SampleCountFlags::TYPE_1 {
            return Err(PrimeError::UnsupportedSampleCount(info.samples));
        }

        if target.aspects != vk::ImageAspectFlags::COLOR {
            return Err(PrimeError::UnsupportedAspect(target.aspects));
        }

        if !info.usage.contains(vk::ImageUsageFlags::STORAGE) {
            return Err(PrimeError::UnsupportedStrategy { image });
        }

        let format = format_info(info.format)
            .filter(|f| !f.compressed)
            .ok_or(PrimeError::UnsupportedFormat(info.format))?;
        let image_format = shader::glsl_image_format(info.format)
            .ok_or(PrimeError::UnsupportedFormat(info.format))?;
        let element = format
            .aspect_format(vk::ImageAspectFlags::COLOR)
            .filter(|e| !e.has_wide_components())
            .ok_or(PrimeError::UnsupportedFormat(info.format))?;

        let limits = sb
            .physical_device_of(device)
            .ok_or(PrimeError::missing(device))?
            .limits;
        let words_per_texel = shader::words_per_texel(element);

        if words_per_texel > limits.max_texel_buffer_elements {
            return Err(PrimeError::UnsupportedFormat(info.format));
        }

        let local_size = local_group_size
            .min(limits.max_compute_work_group_size[0])
            .min(limits.max_compute_work_group_invocations)
            .max(1);
        let (pipeline_layout, set_layout, pipeline) = self.kit(
            sb,
            collaborators,
            StorePipelineKey {
                device,
                format: info.format,
                image_type: info.image_type,
                local_size,
            },
            element,
            image_format,
        )?;

        let mut batch = QueueCommandBatch::new("image store layout");
        batch.record_commands_on_commit(move |sb, command_buffer| {
            sb.write(Command::CmdPipelineBarrier {
                command_buffer,
                src_stages: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stages: vk::PipelineStageFlags::COMPUTE_SHADER,
                buffer_barriers: Vec::new(),
                image_barriers: vec![barrier],
            });
        });
        scratch.commit(sb, queue, batch);

        let result = collect_jobs(collaborators.converter, src, element, ranges).map(|jobs| {
            let dispatcher = Dispatcher {
                device,
                image,
                info: &info,
                words_per_texel,
                local_size,
                texels_per_chunk: DeviceSize::from(
                    limits.max_texel_buffer_elements / words_per_texel,
                ),
                texels_per_dispatch: DeviceSize::from(limits.max_compute_work_group_count[0])
                    * DeviceSize::from(local_size),
                metadata_stride: round_up(
                    size_of::<StoreMetadata>() as DeviceSize,
                    limits.min_uniform_buffer_offset_alignment.max(1),
                ),
                pipeline_layout,
                set_layout,
                pipeline,
            };

            for job in &jobs {
                dispatcher.record(sb, scratch, queue, job);
            }
        });

        commit_final_layouts(
            sb,
            scratch,
            queue,
            image,
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_WRITE,
            &mut CleanupStack::new(),
        );

        result
    }

    /// Returns the pipeline layout, descriptor set layout and pipeline for `key`, creating what
    /// is missing.
    fn kit(
        &mut self,
        sb: &mut StateBuilder<'_>,
        collaborators: &Collaborators<'_>,
        key: StorePipelineKey,
        element: &ElementFormat,
        image_format: &str,
    ) -> Result<(vk::PipelineLayout, vk::DescriptorSetLayout, vk::Pipeline), PrimeError> {
        let StoreKitBuilder {
            descriptor_set_layouts,
            pipeline_layouts,
            shader_modules,
            pipelines,
            cleanup,
        } = self;
        let device = key.device;

        let set_layout = descriptor_set_layouts.get_or_try_insert(device, || {
            let bindings = [
                vk::DescriptorType::STORAGE_IMAGE,
                vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            ]
            .into_iter()
            .zip(0..)
            .map(|(descriptor_type, binding)| DescriptorSetLayoutBinding {
                binding,
                descriptor_type,
                descriptor_count: 1,
                stages: vk::ShaderStageFlags::COMPUTE,
            })
            .collect();

            let layout = sb.new_handle();
            sb.write(Command::CreateDescriptorSetLayout {
                device,
                layout,
                bindings,
            });
            cleanup.push(device, Object::DescriptorSetLayout(layout));

            Ok::<_, PrimeError>(layout)
        })?;

        let pipeline_layout = pipeline_layouts.get_or_try_insert(device, || {
            let layout = sb.new_handle();
            sb.write(Command::CreatePipelineLayout {
                device,
                layout,
                set_layouts: vec![set_layout],
            });
            cleanup.push(device, Object::PipelineLayout(layout));

            Ok::<_, PrimeError>(layout)
        })?;

        let pipeline = pipelines.get_or_try_insert(key, || {
            let shader = shader::shader_module(
                sb,
                shader_modules,
                cleanup,
                collaborators.compiler,
                device,
                vk::ShaderStageFlags::COMPUTE,
                shader::store_compute_shader(element, image_format, key.image_type),
            )?;

            let pipeline = sb.new_handle();
            sb.write(Command::CreateComputePipeline {
                device,
                pipeline,
                info: ComputePipelineInfo {
                    layout: pipeline_layout,
                    shader,
                    specialization: vec![SpecializationConstant {
                        constant_id: 0,
                        value: key.local_size,
                    }],
                },
            });
            cleanup.push(device, Object::Pipeline(pipeline));
            log::debug!(
                "created image store pipeline {pipeline:?} for {:?} with local size {}",
                key.format,
                key.local_size,
            );

            Ok::<_, PrimeError>(pipeline)
        })?;

        Ok((pipeline_layout, set_layout, pipeline))
    }

    /// Destroys every cached object.
    pub fn free(&mut self, sb: &mut StateBuilder<'_>) {
        self.cleanup.unwind(sb);
    }
}

/// Unpacks the data of every subresource in `ranges`, and of every bound sparse block.
fn collect_jobs(
    converter: &dyn FormatConverter,
    src: &ImageObject,
    element: &ElementFormat,
    ranges: &[vk::ImageSubresourceRange],
) -> Result<Vec<StoreJob>, PrimeError> {
    let mut jobs = Vec::new();

    for range in ranges {
        walk_subresource_range(src, range, |aspect, layer, level, size| {
            let job = level_data(src, aspect, layer, level).and_then(|data| {
                if let Some(expected) = size.data_size {
                    check_size(expected, data.len())?;
                }

                let (data, _) = unpack_for_priming(converter, data, element)?;

                Ok(StoreJob {
                    level,
                    layer,
                    offset: vk::Offset3D::default(),
                    extent: size.extent,
                    data,
                })
            });

            skip_subresource(job.map(|job| jobs.push(job)))
        })?;
    }

    if src.is_sparse_resident() {
        walk_sparse_image_memory_bindings(src, |aspect, layer, level, block| {
            let job = level_data(src, aspect, layer, level).and_then(|data| {
                let level_extent = src.info.level_extent(level);
                let (region, extent) = extract_region(
                    data,
                    level_extent,
                    [1, 1, 1],
                    element.size,
                    block.offset,
                    block.extent,
                )
                .ok_or(PrimeError::DataSizeMismatch {
                    expected: DeviceSize::from(element.size)
                        * DeviceSize::from(level_extent.width)
                        * DeviceSize::from(level_extent.height)
                        * DeviceSize::from(level_extent.depth),
                    actual: data.len() as DeviceSize,
                })?;
                let (data, _) = unpack_for_priming(converter, &region, element)?;

                Ok(StoreJob {
                    level,
                    layer,
                    offset: block.offset,
                    extent,
                    data,
                })
            });

            skip_subresource(job.map(|job| jobs.push(job)))
        })?;
    }

    log::trace!("storing {} regions of image {:?}", jobs.len(), src.handle);

    Ok(jobs)
}

/// Splits store jobs into texel-buffer chunks and dispatches.
struct Dispatcher<'a> {
    device: vk::Device,
    image: vk::Image,
    info: &'a ImageInfo,
    words_per_texel: u32,
    local_size: u32,
    /// The most texels one uniform texel buffer holds.
    texels_per_chunk: DeviceSize,
    /// The most texels one dispatch covers.
    texels_per_dispatch: DeviceSize,
    metadata_stride: DeviceSize,
    pipeline_layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    pipeline: vk::Pipeline,
}

/// One texel buffer of a store job, and the metadata of its dispatches.
struct Chunk {
    buffer: vk::Buffer,
    buffer_view: vk::BufferView,
    set: vk::DescriptorSet,
    data_size: DeviceSize,
    metadata_offset: DeviceSize,
    dispatches: Vec<u32>,
}

impl Dispatcher<'_> {
    /// Commits a batch that stores `job` into the image, one descriptor set and scratch buffer
    /// per chunk.
    fn record(
        &self,
        sb: &mut StateBuilder<'_>,
        scratch: &mut ScratchResources,
        queue: vk::Queue,
        job: &StoreJob,
    ) {
        let device = self.device;
        let texel_size = DeviceSize::from(self.words_per_texel) * 4;
        let texels = job.data.len() as DeviceSize / texel_size;

        if texels == 0 {
            return;
        }

        let chunk_count = texels.div_ceil(self.texels_per_chunk);
        let mut batch = QueueCommandBatch::new(format!(
            "image store level {} layer {}",
            job.level, job.layer,
        ));

        let view = sb.new_handle();
        sb.write(Command::CreateImageView {
            device,
            view,
            info: ImageViewInfo {
                image: self.image,
                view_type: match self.info.image_type {
                    vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
                    vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
                    _ => vk::ImageViewType::TYPE_2D,
                },
                format: self.info.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: job.level,
                    level_count: 1,
                    base_array_layer: job.layer,
                    layer_count: 1,
                },
            },
        });
        batch.destroy_after_execution(device, Object::ImageView(view));

        let pool = sb.new_handle();
        sb.write(Command::CreateDescriptorPool {
            device,
            pool,
            max_sets: chunk_count as u32,
            pool_sizes: vec![
                (vk::DescriptorType::STORAGE_IMAGE, chunk_count as u32),
                (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, chunk_count as u32),
                (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, chunk_count as u32),
            ],
        });
        batch.destroy_after_execution(device, Object::DescriptorPool(pool));

        let sets: Vec<vk::DescriptorSet> = (0..chunk_count).map(|_| sb.new_handle()).collect();
        sb.write(Command::AllocateDescriptorSets {
            device,
            pool,
            sets: sets.iter().map(|&set| (set, self.set_layout)).collect(),
        });

        let mut chunks = Vec::with_capacity(sets.len());

        for (index, &set) in sets.iter().enumerate() {
            let first = index as DeviceSize * self.texels_per_chunk;
            let count = self.texels_per_chunk.min(texels - first);
            let data_size = count * texel_size;
            let data = &job.data[(first * texel_size) as usize..(first * texel_size + data_size) as usize];

            let metadata_offset = round_up(data_size, self.metadata_stride);
            let mut writes = vec![MemoryWrite {
                offset: 0,
                data: sb.store(data.to_vec()),
            }];
            let mut dispatches = Vec::new();
            let mut done = 0;

            while done < count {
                let dispatch_count = self.texels_per_dispatch.min(count - done);
                let metadata = StoreMetadata {
                    offset: [job.offset.x, job.offset.y, job.offset.z, 0],
                    extent: [job.extent.width, job.extent.height, job.extent.depth, 0],
                    range: [
                        (first + done) as u32,
                        dispatch_count as u32,
                        (done * DeviceSize::from(self.words_per_texel)) as u32,
                        self.words_per_texel,
                    ],
                };

                writes.push(MemoryWrite {
                    offset: metadata_offset + dispatches.len() as DeviceSize * self.metadata_stride,
                    data: sb.store(bytemuck::bytes_of(&metadata).to_vec()),
                });
                dispatches.push((dispatch_count as u32).div_ceil(self.local_size));
                done += dispatch_count;
            }

            let buffer = batch.new_scratch_buffer(
                sb,
                metadata_offset + dispatches.len() as DeviceSize * self.metadata_stride,
                vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::UNIFORM_BUFFER,
                writes,
            );

            // Created on commit, once the buffer exists.
            let buffer_view = sb.new_handle();
            batch.destroy_after_execution(device, Object::BufferView(buffer_view));

            chunks.push(Chunk {
                buffer,
                buffer_view,
                set,
                data_size,
                metadata_offset,
                dispatches,
            });
        }

        let (pipeline_layout, pipeline, stride) =
            (self.pipeline_layout, self.pipeline, self.metadata_stride);

        batch.record_commands_on_commit(move |sb, command_buffer| {
            let mut writes = Vec::with_capacity(chunks.len() * 3);

            for chunk in &chunks {
                sb.write(Command::CreateBufferView {
                    device,
                    view: chunk.buffer_view,
                    buffer: chunk.buffer,
                    format: vk::Format::R32_UINT,
                    offset: 0,
                    range: chunk.data_size,
                });

                writes.extend([
                    DescriptorWrite {
                        dst_set: chunk.set,
                        dst_binding: 0,
                        resource: DescriptorResource::StorageImage {
                            view,
                            layout: vk::ImageLayout::GENERAL,
                        },
                    },
                    DescriptorWrite {
                        dst_set: chunk.set,
                        dst_binding: 1,
                        resource: DescriptorResource::UniformTexelBuffer(chunk.buffer_view),
                    },
                    DescriptorWrite {
                        dst_set: chunk.set,
                        dst_binding: 2,
                        resource: DescriptorResource::UniformBufferDynamic {
                            buffer: chunk.buffer,
                            offset: chunk.metadata_offset,
                            range: size_of::<StoreMetadata>() as DeviceSize,
                        },
                    },
                ]);
            }

            sb.write(Command::UpdateDescriptorSets { device, writes });
            sb.write(Command::CmdBindPipeline {
                command_buffer,
                bind_point: vk::PipelineBindPoint::COMPUTE,
                pipeline,
            });

            for chunk in &chunks {
                for (index, &groups) in chunk.dispatches.iter().enumerate() {
                    sb.write(Command::CmdBindDescriptorSets {
                        command_buffer,
                        bind_point: vk::PipelineBindPoint::COMPUTE,
                        layout: pipeline_layout,
                        first_set: 0,
                        sets: vec![chunk.set],
                        dynamic_offsets: vec![(index as DeviceSize * stride) as u32],
                    });
                    sb.write(Command::CmdDispatch {
                        command_buffer,
                        group_count: [groups, 1, 1],
                    });
                }
            }
        });

        scratch.commit(sb, queue, batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        primer::{ImagePrimer, ImagePrimerCreateInfo, PrimingStrategy},
        scratch::ScratchResourcesCreateInfo,
        tests::{image_2d, FakeCompiler},
    };

    fn dispatches(commands: &[Command]) -> Vec<[u32; 3]> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::CmdDispatch { group_count, .. } => Some(*group_count),
                _ => None,
            })
            .collect()
    }

    fn primer(local_size: u32) -> ImagePrimer {
        ImagePrimer::new(
            &ImagePrimerCreateInfo {
                store_local_group_size: local_size,
                ..Default::default()
            },
            Box::new(FakeCompiler),
        )
    }

    #[test]
    fn texels_are_split_into_buffer_sized_chunks() {
        test_state!(fixture);

        fixture.set_limits(|limits| limits.max_texel_buffer_elements = 32);
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
        let range = fixture.old_state.images[&image].full_range();
        let mut primer = primer(4);
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        let strategy = primer
            .prime(&mut sb, &mut scratch, image, &[range], queue, None)
            .unwrap();
        assert_eq!(strategy, PrimingStrategy::ImageStore);
        primer.free(&mut sb, Some(scratch));
        drop(sb);

        let sink = &fixture.sink;
        assert_eq!(sink.count("vkCreateBuffer"), 2);
        assert_eq!(sink.count("vkCreateBufferView"), 2);
        assert_eq!(sink.count("vkDestroyBufferView"), 2);
        assert_eq!(sink.count("vkCreateComputePipelines"), 1);
        assert_eq!(sink.count("vkDestroyPipeline"), 1);
        assert_eq!(dispatches(sink.commands()), [[2, 1, 1], [2, 1, 1]]);

        // Each buffer view holds 8 texels of 4 words.
        for command in sink.commands() {
            if let Command::CreateBufferView { range, format, .. } = command {
                assert_eq!(*range, 8 * 16);
                assert_eq!(*format, vk::Format::R32_UINT);
            }
        }

        let specialization: Vec<_> = sink
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::CreateComputePipeline { info, .. } => Some(info.specialization.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            specialization,
            [vec![SpecializationConstant {
                constant_id: 0,
                value: 4,
            }]],
        );
    }

    #[test]
    fn dispatches_respect_group_count_limit() {
        test_state!(fixture);

        fixture.set_limits(|limits| limits.max_compute_work_group_count[0] = 1);
        let image = fixture.add_image(
            image_2d(
                vk::Format::R32_UINT,
                4,
                4,
                vk::ImageUsageFlags::STORAGE,
            ),
            vk::ImageLayout::GENERAL,
        );
        let queue = fixture.queue;
        let range = fixture.old_state.images[&image].full_range();
        let mut primer = primer(4);
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        primer
            .prime_by_image_store(&mut sb, &mut scratch, image, &[range], queue, None)
            .unwrap();
        primer.free(&mut sb, Some(scratch));
        drop(sb);

        let commands = fixture.sink.commands();
        assert_eq!(dispatches(commands), [[1, 1, 1]; 4]);

        let offsets: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::CmdBindDescriptorSets {
                    dynamic_offsets, ..
                } => Some(dynamic_offsets[0]),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, [0, 256, 512, 768]);

        // The metadata of the last dispatch starts at its fourth texel.
        let records: Vec<StoreMetadata> = commands
            .iter()
            .filter_map(|c| match c {
                Command::FlushMappedMemoryRanges { writes, .. } => Some(writes.clone()),
                _ => None,
            })
            .flatten()
            .filter(|w| w.data.size() == size_of::<StoreMetadata>() as DeviceSize)
            .filter_map(|w| fixture.store.load(&w.data))
            .map(|bytes| bytemuck::pod_read_unaligned(&bytes))
            .collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].range, [12, 4, 12, 1]);
        assert_eq!(records[3].extent, [4, 4, 1, 0]);

        let level = fixture.new_state.images[&image]
            .level(vk::ImageAspectFlags::COLOR, 0, 0)
            .unwrap();
        assert_eq!(level.layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn local_size_is_clamped_to_limits() {
        test_state!(fixture);

        fixture.set_limits(|limits| limits.max_compute_work_group_invocations = 64);
        let image = fixture.add_image(
            image_2d(
                vk::Format::R8G8B8A8_UNORM,
                16,
                16,
                vk::ImageUsageFlags::STORAGE,
            ),
            vk::ImageLayout::GENERAL,
        );
        let queue = fixture.queue;
        let range = fixture.old_state.images[&image].full_range();
        let mut primer = primer(128);
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        primer
            .prime_by_image_store(&mut sb, &mut scratch, image, &[range], queue, None)
            .unwrap();
        primer.free(&mut sb, Some(scratch));
        drop(sb);

        assert_eq!(dispatches(fixture.sink.commands()), [[4, 1, 1]]);
    }

    #[test]
    fn store_requires_a_storage_color_image() {
        test_state!(fixture);

        let depth = fixture.add_image(
            image_2d(
                vk::Format::D32_SFLOAT,
                4,
                4,
                vk::ImageUsageFlags::STORAGE,
            ),
            vk::ImageLayout::GENERAL,
        );
        let sampled = fixture.add_image(
            image_2d(
                vk::Format::R8G8B8A8_UNORM,
                4,
                4,
                vk::ImageUsageFlags::SAMPLED,
            ),
            vk::ImageLayout::GENERAL,
        );
        let queue = fixture.queue;
        let mut primer = primer(64);
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        assert_eq!(
            primer.prime_by_image_store(&mut sb, &mut scratch, depth, &[], queue, None),
            Err(PrimeError::UnsupportedAspect(vk::ImageAspectFlags::DEPTH)),
        );
        assert_eq!(
            primer.prime_by_image_store(&mut sb, &mut scratch, sampled, &[], queue, None),
            Err(PrimeError::UnsupportedStrategy { image: sampled }),
        );
        primer.free(&mut sb, Some(scratch));
        drop(sb);

        assert_eq!(fixture.sink.count("vkCreateComputePipelines"), 0);
    }
}
