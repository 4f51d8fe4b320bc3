// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Priming by copying from a scratch buffer.

use super::{
    extract_region, final_layout_barriers, initial_layout_barrier, skip_subresource,
    walk_sparse_image_memory_bindings, walk_subresource_range, LayoutPolicy, LevelSize,
    PrimeError,
};
use crate::{
    builder::StateBuilder,
    command::{Command, MemoryWrite},
    content::HashedData,
    format::{
        format_info, unpack_for_priming, FormatConverter, FormatInfo, STAGING_ELEMENT_SIZE,
    },
    round_up,
    scratch::{QueueCommandBatch, ScratchResources},
    state::{ImageObject, SparseBoundImageBlock},
    DeviceSize,
};
use ash::vk;
use std::collections::BTreeMap;

/// Copy regions in the scratch buffer start at multiples of this, and take up a multiple of it.
const PIECE_ALIGNMENT: DeviceSize = 8;

/// Where the data of one aspect of the source image goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CopyDestination {
    /// Into each of these image aspects, converted to the image's format if it differs.
    Direct(Vec<(vk::Image, vk::ImageAspectFlags)>),
    /// Unpacked and spread over staging images, 16 bytes of each texel per image.
    Unpacked(Vec<vk::Image>),
}

/// What a buffer-copy priming writes: the source image, where each of its aspects goes, and
/// which layouts the destinations are left in.
#[derive(Clone, Debug)]
pub struct BufferCopyJob {
    pub src_image: vk::Image,
    pub destinations: BTreeMap<vk::ImageAspectFlags, CopyDestination>,
    pub final_layout: LayoutPolicy,
}

impl BufferCopyJob {
    /// A job that restores every aspect of `image` into itself, in its captured layouts.
    pub fn in_place(image: &ImageObject) -> Self {
        let destinations = crate::format::aspect_bits(image.aspects)
            .into_iter()
            .map(|aspect| (aspect, CopyDestination::Direct(vec![(image.handle, aspect)])))
            .collect();

        BufferCopyJob {
            src_image: image.handle,
            destinations,
            final_layout: LayoutPolicy::SameAsImage,
        }
    }
}

/// One region of a destination image and the data copied into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopyPiece {
    pub dst_image: vk::Image,
    pub dst_aspect: vk::ImageAspectFlags,
    pub layer: u32,
    pub level: u32,
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
    /// Offset of the data in the scratch buffer.
    pub buffer_offset: DeviceSize,
    /// The data, padded with zeros.
    pub data: HashedData,
}

/// Collects the pieces of a [`BufferCopyJob`] and then records the copies.
pub struct BufferCopySession<'j> {
    job: &'j BufferCopyJob,
    converter: &'j dyn FormatConverter,
    pieces: Vec<BufferCopyPiece>,
    total_size: DeviceSize,
}

impl<'j> BufferCopySession<'j> {
    pub fn new(job: &'j BufferCopyJob, converter: &'j dyn FormatConverter) -> Self {
        BufferCopySession {
            job,
            converter,
            pieces: Vec::new(),
            total_size: 0,
        }
    }

    /// The pieces collected so far, in scratch buffer order.
    #[inline]
    pub fn pieces(&self) -> &[BufferCopyPiece] {
        &self.pieces
    }

    /// The size of the scratch buffer that holds every piece.
    #[inline]
    pub fn total_size(&self) -> DeviceSize {
        self.total_size
    }

    /// Adds a piece for every subresource of the source image in `range`.
    ///
    /// Subresources that cannot be primed are skipped with a warning. Data of the wrong size is
    /// an error.
    pub fn collect_copies_from_subresource_range(
        &mut self,
        sb: &StateBuilder<'_>,
        range: &vk::ImageSubresourceRange,
    ) -> Result<(), PrimeError> {
        let src = source(sb, self.job.src_image)?;
        let Some(src_format) = format_info(src.info.format) else {
            log::warn!("skipping image {:?} of unknown format", src.handle);
            return Ok(());
        };

        walk_subresource_range(src, range, |aspect, layer, level, size| {
            skip_subresource(self.collect_subresource(sb, src, &src_format, aspect, layer, level, size))
        })
    }

    /// Adds a piece for every sparse block of the source image that has memory bound.
    pub fn collect_copies_from_sparse_bindings(
        &mut self,
        sb: &StateBuilder<'_>,
    ) -> Result<(), PrimeError> {
        let src = source(sb, self.job.src_image)?;
        let Some(src_format) = format_info(src.info.format) else {
            log::warn!("skipping image {:?} of unknown format", src.handle);
            return Ok(());
        };

        walk_sparse_image_memory_bindings(src, |aspect, layer, level, block| {
            skip_subresource(self.collect_sparse_block(sb, src, &src_format, aspect, layer, level, block))
        })
    }

    fn collect_sparse_block(
        &mut self,
        sb: &StateBuilder<'_>,
        src: &ImageObject,
        src_format: &FormatInfo,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
        block: &SparseBoundImageBlock,
    ) -> Result<(), PrimeError> {
        let data = level_data(src, aspect, layer, level)?;
        let level_extent = src.info.level_extent(level);
        let block_size = src_format
            .aspect_block_size(aspect)
            .ok_or(PrimeError::UnsupportedAspect(aspect))?;
        let (bytes, extent) = extract_region(
            data,
            level_extent,
            src_format.block_extent,
            block_size,
            block.offset,
            block.extent,
        )
        .ok_or(PrimeError::DataSizeMismatch {
            expected: src_format
                .aspect_data_size(aspect, level_extent)
                .unwrap_or_default(),
            actual: data.len() as DeviceSize,
        })?;

        self.collect_region(sb, src_format, aspect, layer, level, block.offset, extent, &bytes)
    }

    fn collect_subresource(
        &mut self,
        sb: &StateBuilder<'_>,
        src: &ImageObject,
        src_format: &FormatInfo,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
        size: LevelSize,
    ) -> Result<(), PrimeError> {
        let data = level_data(src, aspect, layer, level)?;

        if let Some(expected) = size.data_size {
            check_size(expected, data.len())?;
        }

        self.collect_region(
            sb,
            src_format,
            aspect,
            layer,
            level,
            vk::Offset3D::default(),
            size.extent,
            data,
        )
    }

    fn collect_region(
        &mut self,
        sb: &StateBuilder<'_>,
        src_format: &FormatInfo,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
        offset: vk::Offset3D,
        extent: vk::Extent3D,
        data: &[u8],
    ) -> Result<(), PrimeError> {
        let Some(destination) = self.job.destinations.get(&aspect) else {
            return Ok(());
        };
        let src_element = src_format.aspect_format(aspect);

        match destination {
            CopyDestination::Direct(destinations) => {
                for &(dst_image, dst_aspect) in destinations {
                    let dst_format = sb
                        .image(dst_image)
                        .map(|i| i.info.format)
                        .ok_or(PrimeError::missing(dst_image))?;

                    if dst_format == src_format.format && dst_aspect == aspect {
                        let granularity = src_format.aspect_block_size(aspect).unwrap_or(1);
                        self.push_piece(
                            sb,
                            dst_image,
                            dst_aspect,
                            granularity,
                            (layer, level, offset, extent),
                            data.to_vec(),
                        );
                        continue;
                    }

                    let dst_info =
                        format_info(dst_format).ok_or(PrimeError::UnsupportedFormat(dst_format))?;
                    let (Some(src_element), Some(dst_element)) =
                        (src_element, dst_info.aspect_format(dst_aspect))
                    else {
                        return Err(PrimeError::UnsupportedFormat(dst_format));
                    };
                    let converted = if src_element == dst_element {
                        data.to_vec()
                    } else {
                        self.converter.convert(data, src_element, dst_element)?
                    };

                    if let Some(expected) = dst_info.aspect_data_size(dst_aspect, extent) {
                        check_size(expected, converted.len())?;
                    }

                    self.push_piece(
                        sb,
                        dst_image,
                        dst_aspect,
                        dst_element.size,
                        (layer, level, offset, extent),
                        converted,
                    );
                }
            }
            CopyDestination::Unpacked(staging_images) => {
                let src_element =
                    src_element.ok_or(PrimeError::UnsupportedFormat(src_format.format))?;
                let (unpacked, layout) = unpack_for_priming(self.converter, data, src_element)?;
                let texel_size = layout.size as usize;
                let staging_size = STAGING_ELEMENT_SIZE as usize;

                if texel_size.div_ceil(staging_size) != staging_images.len() {
                    return Err(PrimeError::DataSizeMismatch {
                        expected: (staging_images.len() * staging_size) as DeviceSize,
                        actual: texel_size as DeviceSize,
                    });
                }

                let texels = DeviceSize::from(extent.width)
                    * DeviceSize::from(extent.height)
                    * DeviceSize::from(extent.depth);
                check_size(texels * texel_size as DeviceSize, unpacked.len())?;

                for (index, &staging_image) in staging_images.iter().enumerate() {
                    let start = (index * staging_size).min(texel_size);
                    let end = ((index + 1) * staging_size).min(texel_size);
                    let mut slice = Vec::with_capacity(texels as usize * staging_size);

                    for texel in unpacked.chunks_exact(texel_size) {
                        slice.extend_from_slice(&texel[start..end]);
                        slice.resize(slice.len() + staging_size - (end - start), 0);
                    }

                    self.push_piece(
                        sb,
                        staging_image,
                        vk::ImageAspectFlags::COLOR,
                        STAGING_ELEMENT_SIZE,
                        (layer, level, offset, extent),
                        slice,
                    );
                }
            }
        }

        Ok(())
    }

    /// Pads `data` to a multiple of both the piece alignment and the destination's texel block
    /// size, stores it, and places it after the previous piece.
    fn push_piece(
        &mut self,
        sb: &StateBuilder<'_>,
        dst_image: vk::Image,
        dst_aspect: vk::ImageAspectFlags,
        block_size: u32,
        (layer, level, offset, extent): (u32, u32, vk::Offset3D, vk::Extent3D),
        mut data: Vec<u8>,
    ) {
        let granularity = lcm(PIECE_ALIGNMENT, DeviceSize::from(block_size.max(1)));
        let padded = round_up(data.len() as DeviceSize, granularity);
        data.resize(padded as usize, 0);

        self.pieces.push(BufferCopyPiece {
            dst_image,
            dst_aspect,
            layer,
            level,
            offset,
            extent,
            buffer_offset: self.total_size,
            data: sb.store(data),
        });
        self.total_size += padded;
    }

    /// Records the copies of every collected piece into a batch and commits it to `queue`.
    ///
    /// Each destination image is transitioned from `UNDEFINED` to `TRANSFER_DST_OPTIMAL`, copied
    /// into with one `vkCmdCopyBufferToImage`, and then transitioned into the job's final
    /// layouts. Does nothing if no piece was collected.
    pub fn rollout(self, sb: &mut StateBuilder<'_>, scratch: &mut ScratchResources, queue: vk::Queue) {
        if self.pieces.is_empty() {
            return;
        }

        let mut batch = QueueCommandBatch::new("buffer copy");
        let writes = self
            .pieces
            .iter()
            .map(|piece| MemoryWrite {
                offset: piece.buffer_offset,
                data: piece.data,
            })
            .collect();
        let buffer = batch.new_scratch_buffer(
            sb,
            self.total_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            writes,
        );

        let mut regions: BTreeMap<vk::Image, Vec<vk::BufferImageCopy>> = BTreeMap::new();

        for piece in &self.pieces {
            regions
                .entry(piece.dst_image)
                .or_default()
                .push(vk::BufferImageCopy {
                    buffer_offset: piece.buffer_offset,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: piece.dst_aspect,
                        mip_level: piece.level,
                        base_array_layer: piece.layer,
                        layer_count: 1,
                    },
                    image_offset: piece.offset,
                    image_extent: piece.extent,
                });
        }

        let mut before = Vec::new();
        let mut after = Vec::new();

        for &dst_image in regions.keys() {
            let Some(image) = sb.image(dst_image) else {
                continue;
            };

            before.push(initial_layout_barrier(
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
            ));
            after.extend(final_layout_barriers(
                sb.old_state(),
                image,
                self.job.final_layout,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
            ));
        }

        log::trace!(
            "copying {} pieces ({} bytes) into {} images",
            self.pieces.len(),
            self.total_size,
            regions.len(),
        );

        batch.record_commands_on_commit(move |sb, command_buffer| {
            sb.write(Command::CmdPipelineBarrier {
                command_buffer,
                src_stages: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stages: vk::PipelineStageFlags::TRANSFER,
                buffer_barriers: Vec::new(),
                image_barriers: before,
            });

            for (dst_image, regions) in regions {
                sb.write(Command::CmdCopyBufferToImage {
                    command_buffer,
                    src_buffer: buffer,
                    dst_image,
                    dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    regions,
                });
            }

            sb.write(Command::CmdPipelineBarrier {
                command_buffer,
                src_stages: vk::PipelineStageFlags::TRANSFER,
                dst_stages: vk::PipelineStageFlags::ALL_COMMANDS,
                buffer_barriers: Vec::new(),
                image_barriers: after,
            });
        });

        scratch.commit(sb, queue, batch);
    }
}

fn source<'a>(sb: &StateBuilder<'a>, image: vk::Image) -> Result<&'a ImageObject, PrimeError> {
    sb.old_state()
        .images
        .get(&image)
        .ok_or(PrimeError::missing(image))
}

pub(super) fn level_data(
    image: &ImageObject,
    aspect: vk::ImageAspectFlags,
    layer: u32,
    level: u32,
) -> Result<&[u8], PrimeError> {
    image
        .level(aspect, layer, level)
        .map(|l| l.data.as_slice())
        .filter(|data| !data.is_empty())
        .ok_or(PrimeError::MissingLevelData {
            image: image.handle,
            aspect,
            layer,
            level,
        })
}

pub(super) fn check_size(expected: DeviceSize, actual: usize) -> Result<(), PrimeError> {
    if expected == actual as DeviceSize {
        Ok(())
    } else {
        Err(PrimeError::DataSizeMismatch {
            expected,
            actual: actual as DeviceSize,
        })
    }
}

fn lcm(a: DeviceSize, b: DeviceSize) -> DeviceSize {
    let (mut x, mut y) = (a, b);

    while y != 0 {
        (x, y) = (y, x % y);
    }

    a / x * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::ChannelConverter,
        scratch::ScratchResourcesCreateInfo,
        state::{ImageInfo, SparseBlockKey},
        tests::image_2d,
    };
    use ash::vk::Handle;

    fn copies(commands: &[Command]) -> Vec<(vk::Image, Vec<vk::BufferImageCopy>)> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::CmdCopyBufferToImage {
                    dst_image, regions, ..
                } => Some((*dst_image, regions.clone())),
                _ => None,
            })
            .collect()
    }

    fn flushed_writes(commands: &[Command]) -> Vec<MemoryWrite> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::FlushMappedMemoryRanges { writes, .. } => Some(writes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn copies_identical_formats_unchanged() {
        test_state!(fixture);

        let image = fixture.add_image(
            image_2d(
                vk::Format::R8G8B8A8_UNORM,
                4,
                4,
                vk::ImageUsageFlags::TRANSFER_DST,
            ),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let source: Vec<u8> = (0..64).collect();
        fixture.set_data(image, vk::ImageAspectFlags::COLOR, 0, 0, source.clone());
        let queue = fixture.queue;

        let job = BufferCopyJob::in_place(&fixture.old_state.images[&image]);
        let range = fixture.old_state.images[&image].full_range();
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        let mut session = BufferCopySession::new(&job, &ChannelConverter);
        session
            .collect_copies_from_subresource_range(&sb, &range)
            .unwrap();
        assert_eq!(session.total_size(), 64);
        session.rollout(&mut sb, &mut scratch, queue);
        scratch.free(&mut sb);
        drop(sb);

        let copies = copies(fixture.sink.commands());
        assert_eq!(copies.len(), 1);
        let (dst_image, regions) = &copies[0];
        assert_eq!(*dst_image, image);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].buffer_offset, 0);
        assert_eq!(
            (
                regions[0].image_extent.width,
                regions[0].image_extent.height,
                regions[0].image_extent.depth,
            ),
            (4, 4, 1),
        );

        let writes = flushed_writes(fixture.sink.commands());
        assert_eq!(writes.len(), 1);
        assert_eq!(
            fixture.store.load(&writes[0].data).as_deref(),
            Some(source.as_slice()),
        );

        // The image is back in its captured layout.
        let level = fixture.new_state.images[&image]
            .level(vk::ImageAspectFlags::COLOR, 0, 0)
            .unwrap();
        assert_eq!(level.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn converts_packed_depth_into_another_format() {
        test_state!(fixture);

        let (width, height) = (3, 2);
        let src = fixture.add_image(
            image_2d(
                vk::Format::D24_UNORM_S8_UINT,
                width,
                height,
                vk::ImageUsageFlags::TRANSFER_DST,
            ),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        let dst = fixture.add_image(
            image_2d(
                vk::Format::D32_SFLOAT,
                width,
                height,
                vk::ImageUsageFlags::TRANSFER_DST,
            ),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );

        let job = BufferCopyJob {
            src_image: src,
            destinations: BTreeMap::from([(
                vk::ImageAspectFlags::DEPTH,
                CopyDestination::Direct(vec![(dst, vk::ImageAspectFlags::DEPTH)]),
            )]),
            final_layout: LayoutPolicy::Uniform(vk::ImageLayout::GENERAL),
        };
        let range = fixture.old_state.images[&src].full_range();
        let sb = fixture.builder();

        let mut session = BufferCopySession::new(&job, &ChannelConverter);
        session
            .collect_copies_from_subresource_range(&sb, &range)
            .unwrap();

        // Stencil has no destination, so only depth is staged.
        let pieces = session.pieces();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].dst_image, dst);
        assert_eq!(pieces[0].data.size(), round_up(u64::from(width * height) * 4, 8));
        assert_eq!(session.total_size(), 24);
    }

    #[test]
    fn pieces_are_padded_and_packed_back_to_back() {
        test_state!(fixture);

        let image = fixture.add_image(
            ImageInfo {
                mip_levels: 3,
                array_layers: 2,
                ..image_2d(
                    vk::Format::R8_UNORM,
                    5,
                    3,
                    vk::ImageUsageFlags::TRANSFER_DST,
                )
            },
            vk::ImageLayout::GENERAL,
        );
        let queue = fixture.queue;
        let job = BufferCopyJob::in_place(&fixture.old_state.images[&image]);
        let range = fixture.old_state.images[&image].full_range();
        let mut scratch = ScratchResources::new(&ScratchResourcesCreateInfo::default());
        let mut sb = fixture.builder();

        let mut session = BufferCopySession::new(&job, &ChannelConverter);
        session
            .collect_copies_from_subresource_range(&sb, &range)
            .unwrap();

        let mut expected_offset = 0;

        for piece in session.pieces() {
            assert_eq!(piece.buffer_offset, expected_offset);
            assert_eq!(piece.data.size() % 8, 0);
            expected_offset += piece.data.size();
        }

        assert_eq!(session.pieces().len(), 6);
        assert_eq!(session.total_size(), expected_offset);

        // Levels are 5x3, 2x1 and 1x1 bytes.
        let sizes: Vec<_> = session.pieces().iter().map(|p| p.data.size()).collect();
        assert_eq!(sizes, [16, 16, 8, 8, 8, 8]);

        session.rollout(&mut sb, &mut scratch, queue);
        drop(sb);

        let copies = copies(fixture.sink.commands());
        let order: Vec<_> = copies[0]
            .1
            .iter()
            .map(|r| (r.image_subresource.mip_level, r.image_subresource.base_array_layer))
            .collect();
        assert_eq!(order, [(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        test_state!(fixture);

        let image = fixture.add_image(
            image_2d(
                vk::Format::R8G8B8A8_UNORM,
                4,
                4,
                vk::ImageUsageFlags::TRANSFER_DST,
            ),
            vk::ImageLayout::GENERAL,
        );
        fixture.set_data(image, vk::ImageAspectFlags::COLOR, 0, 0, vec![0; 60]);
        let job = BufferCopyJob::in_place(&fixture.old_state.images[&image]);
        let range = fixture.old_state.images[&image].full_range();
        let sb = fixture.builder();

        let mut session = BufferCopySession::new(&job, &ChannelConverter);
        assert_eq!(
            session.collect_copies_from_subresource_range(&sb, &range),
            Err(PrimeError::DataSizeMismatch {
                expected: 64,
                actual: 60,
            }),
        );
    }

    #[test]
    fn sparse_blocks_become_regions() {
        test_state!(fixture);

        let info = ImageInfo {
            flags: vk::ImageCreateFlags::SPARSE_BINDING | vk::ImageCreateFlags::SPARSE_RESIDENCY,
            ..image_2d(
                vk::Format::R8_UINT,
                4,
                4,
                vk::ImageUsageFlags::TRANSFER_DST,
            )
        };
        let image = fixture.add_image(info, vk::ImageLayout::GENERAL);
        fixture.set_data(image, vk::ImageAspectFlags::COLOR, 0, 0, (0..16).collect());

        let blocks = &mut fixture.old_state.images.get_mut(&image).unwrap().sparse_blocks;
        for (block, x) in [(0, 0), (1, 2)] {
            blocks.insert(
                SparseBlockKey {
                    aspect: vk::ImageAspectFlags::COLOR,
                    layer: 0,
                    level: 0,
                    block,
                },
                SparseBoundImageBlock {
                    offset: vk::Offset3D { x, y: 2, z: 0 },
                    extent: vk::Extent3D {
                        width: 2,
                        height: 2,
                        depth: 1,
                    },
                    memory: vk::DeviceMemory::from_raw(0x60),
                    memory_offset: 0,
                },
            );
        }

        let job = BufferCopyJob::in_place(&fixture.old_state.images[&image]);
        let sb = fixture.builder();

        let mut session = BufferCopySession::new(&job, &ChannelConverter);
        session.collect_copies_from_sparse_bindings(&sb).unwrap();

        let pieces = session.pieces();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[1].offset.x, 2);
        assert_eq!(pieces[1].buffer_offset, 8);
        assert_eq!(
            sb.content_store().load(&pieces[1].data).as_deref(),
            Some([10, 11, 14, 15, 0, 0, 0, 0].as_slice()),
        );
    }

    #[test]
    fn unpacks_into_staging_slices() {
        test_state!(fixture);

        let src = fixture.add_image(
            image_2d(
                vk::Format::R8G8_UINT,
                2,
                1,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ),
            vk::ImageLayout::GENERAL,
        );
        fixture.set_data(src, vk::ImageAspectFlags::COLOR, 0, 0, vec![1, 2, 3, 4]);
        let staging = fixture.add_image(
            image_2d(
                crate::format::STAGING_FORMAT,
                2,
                1,
                vk::ImageUsageFlags::TRANSFER_DST,
            ),
            vk::ImageLayout::UNDEFINED,
        );

        let job = BufferCopyJob {
            src_image: src,
            destinations: BTreeMap::from([(
                vk::ImageAspectFlags::COLOR,
                CopyDestination::Unpacked(vec![staging]),
            )]),
            final_layout: LayoutPolicy::Uniform(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        };
        let range = fixture.old_state.images[&src].full_range();
        let sb = fixture.builder();

        let mut session = BufferCopySession::new(&job, &ChannelConverter);
        session
            .collect_copies_from_subresource_range(&sb, &range)
            .unwrap();

        let pieces = session.pieces();
        assert_eq!(pieces.len(), 1);

        let mut expected = Vec::new();
        for value in [1u32, 2, 0, 0, 3, 4, 0, 0] {
            expected.extend_from_slice(&value.to_le_bytes());
        }
        assert_eq!(
            sb.content_store().load(&pieces[0].data).as_deref(),
            Some(expected.as_slice()),
        );
    }

    #[test]
    fn lcm_of_block_sizes() {
        assert_eq!(lcm(8, 1), 8);
        assert_eq!(lcm(8, 12), 24);
        assert_eq!(lcm(8, 16), 16);
    }
}
