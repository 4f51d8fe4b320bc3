// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Enumeration of image subresources and the layouts they end up in.

use crate::{
    format::{aspect_bits, format_info},
    state::{ImageObject, SparseBoundImageBlock, State},
    DeviceSize,
};
use ash::vk::{self, Handle};

/// Size information of one subresource, passed to the visitor of [`walk_subresource_range`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSize {
    pub extent: vk::Extent3D,
    /// Size of the subresource's data in the aspect's buffer-copy layout, if the format is known.
    pub data_size: Option<DeviceSize>,
}

/// Visits every subresource of `image` in `range`, aspects first, then mip levels, then array
/// layers, each in increasing order.
///
/// Buffer offsets of copy regions are accumulated in this order. Aspects in `range` that the
/// image does not have are skipped. Stops at the first error returned by `visit`.
pub fn walk_subresource_range<E>(
    image: &ImageObject,
    range: &vk::ImageSubresourceRange,
    mut visit: impl FnMut(vk::ImageAspectFlags, u32, u32, LevelSize) -> Result<(), E>,
) -> Result<(), E> {
    let format = format_info(image.info.format);
    let (levels, layers) = image.resolve_range(range);

    for aspect in aspect_bits(range.aspect_mask & image.aspects) {
        for level in levels.clone() {
            let extent = image.info.level_extent(level);
            let data_size = format
                .as_ref()
                .and_then(|f| f.aspect_data_size(aspect, extent));

            for layer in layers.clone() {
                visit(aspect, layer, level, LevelSize { extent, data_size })?;
            }
        }
    }

    Ok(())
}

/// Visits every sparse block of `image` that has memory bound, in key order.
pub fn walk_sparse_image_memory_bindings<E>(
    image: &ImageObject,
    mut visit: impl FnMut(vk::ImageAspectFlags, u32, u32, &SparseBoundImageBlock) -> Result<(), E>,
) -> Result<(), E> {
    for (key, block) in &image.sparse_blocks {
        if block.memory.is_null() {
            continue;
        }

        visit(key.aspect, key.layer, key.level, block)?;
    }

    Ok(())
}

/// Decides which layout a primed subresource is left in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// The layout the subresource had in the captured state.
    SameAsImage,
    /// The same layout for every subresource.
    Uniform(vk::ImageLayout),
}

impl LayoutPolicy {
    /// Returns the layout for one subresource of `image`.
    ///
    /// Captured layouts that an image cannot be transitioned into (`UNDEFINED` and
    /// `PREINITIALIZED`), and subresources unknown to the captured state, resolve to `GENERAL`.
    pub fn resolve(
        &self,
        old_state: &State,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        layer: u32,
        level: u32,
    ) -> vk::ImageLayout {
        match *self {
            LayoutPolicy::Uniform(layout) => layout,
            LayoutPolicy::SameAsImage => {
                let layout = old_state
                    .images
                    .get(&image)
                    .and_then(|i| i.level(aspect, layer, level))
                    .map_or(vk::ImageLayout::UNDEFINED, |l| l.layout);

                match layout {
                    vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED => {
                        vk::ImageLayout::GENERAL
                    }
                    layout => layout,
                }
            }
        }
    }
}

/// Copies the texel blocks of a region out of tightly packed subresource data.
///
/// The region is clamped to `level_extent`. Returns the bytes of the region and the clamped
/// extent, or `None` if `data` is too short or the region lies outside the subresource.
pub fn extract_region(
    data: &[u8],
    level_extent: vk::Extent3D,
    block_extent: [u32; 3],
    block_size: u32,
    offset: vk::Offset3D,
    extent: vk::Extent3D,
) -> Option<(Vec<u8>, vk::Extent3D)> {
    let origin = [offset.x, offset.y, offset.z].map(|o| u32::try_from(o).ok());
    let [Some(ox), Some(oy), Some(oz)] = origin else {
        return None;
    };

    let clamped = vk::Extent3D {
        width: extent.width.min(level_extent.width.checked_sub(ox)?),
        height: extent.height.min(level_extent.height.checked_sub(oy)?),
        depth: extent.depth.min(level_extent.depth.checked_sub(oz)?),
    };

    let [bw, bh, bd] = block_extent;
    let row_blocks = level_extent.width.div_ceil(bw) as usize;
    let rows = level_extent.height.div_ceil(bh) as usize;
    let block_size = block_size as usize;
    let (bx, by, bz) = ((ox / bw) as usize, (oy / bh) as usize, (oz / bd) as usize);
    let (ew, eh, ed) = (
        clamped.width.div_ceil(bw) as usize,
        clamped.height.div_ceil(bh) as usize,
        clamped.depth.div_ceil(bd) as usize,
    );

    let mut out = Vec::with_capacity(ew * eh * ed * block_size);

    for z in 0..ed {
        for y in 0..eh {
            let start = (((bz + z) * rows + by + y) * row_blocks + bx) * block_size;
            out.extend_from_slice(data.get(start..start + ew * block_size)?);
        }
    }

    Some((out, clamped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::{ImageInfo, SparseBlockKey},
        tests::image_2d,
    };

    fn image(info: ImageInfo) -> ImageObject {
        ImageObject::new(vk::Image::from_raw(1), vk::Device::from_raw(2), info)
    }

    #[test]
    fn walk_is_complete_and_ordered() {
        let image = image(ImageInfo {
            mip_levels: 3,
            array_layers: 4,
            ..image_2d(
                vk::Format::D24_UNORM_S8_UINT,
                8,
                8,
                vk::ImageUsageFlags::TRANSFER_DST,
            )
        });

        for (aspect_mask, aspect_count) in [
            (vk::ImageAspectFlags::DEPTH, 1),
            (vk::ImageAspectFlags::STENCIL, 1),
            (
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
                2,
            ),
        ] {
            for (base_level, level_count, base_layer, layer_count) in
                [(0, 3, 0, 4), (1, 2, 2, 2), (2, 1, 3, 1)]
            {
                let range = vk::ImageSubresourceRange {
                    aspect_mask,
                    base_mip_level: base_level,
                    level_count,
                    base_array_layer: base_layer,
                    layer_count,
                };

                let mut visited = Vec::new();
                walk_subresource_range(&image, &range, |aspect, layer, level, _| {
                    visited.push((aspect, level, layer));
                    Ok::<_, ()>(())
                })
                .unwrap();

                assert_eq!(visited.len(), aspect_count * (level_count * layer_count) as usize);

                let mut sorted = visited.clone();
                sorted.sort();
                sorted.dedup();
                assert_eq!(visited, sorted);
            }
        }
    }

    #[test]
    fn walk_reports_level_sizes() {
        let image = image(ImageInfo {
            mip_levels: 2,
            ..image_2d(
                vk::Format::R8G8B8A8_UNORM,
                4,
                2,
                vk::ImageUsageFlags::TRANSFER_DST,
            )
        });

        let mut sizes = Vec::new();
        walk_subresource_range(&image, &image.full_range(), |_, _, _, size| {
            sizes.push(size.data_size);
            Ok::<_, ()>(())
        })
        .unwrap();

        assert_eq!(sizes, [Some(32), Some(8)]);
    }

    #[test]
    fn walk_stops_at_errors() {
        let image = image(ImageInfo {
            array_layers: 4,
            ..image_2d(
                vk::Format::R8_UNORM,
                1,
                1,
                vk::ImageUsageFlags::TRANSFER_DST,
            )
        });

        let mut count = 0;
        let result = walk_subresource_range(&image, &image.full_range(), |_, layer, _, _| {
            count += 1;
            if layer == 1 {
                Err(layer)
            } else {
                Ok(())
            }
        });

        assert_eq!(result, Err(1));
        assert_eq!(count, 2);
    }

    #[test]
    fn sparse_walk_skips_unbound_blocks() {
        let mut image = image(image_2d(
            vk::Format::R8_UNORM,
            64,
            64,
            vk::ImageUsageFlags::TRANSFER_DST,
        ));

        for (block, memory) in [(0, 0x50), (1, 0), (2, 0x51)] {
            image.sparse_blocks.insert(
                SparseBlockKey {
                    aspect: vk::ImageAspectFlags::COLOR,
                    layer: 0,
                    level: 0,
                    block,
                },
                SparseBoundImageBlock {
                    offset: vk::Offset3D {
                        x: block as i32 * 16,
                        y: 0,
                        z: 0,
                    },
                    extent: vk::Extent3D {
                        width: 16,
                        height: 16,
                        depth: 1,
                    },
                    memory: vk::DeviceMemory::from_raw(memory),
                    memory_offset: 0,
                },
            );
        }

        let mut offsets = Vec::new();
        walk_sparse_image_memory_bindings(&image, |_, _, _, block| {
            offsets.push(block.offset.x);
            Ok::<_, ()>(())
        })
        .unwrap();

        assert_eq!(offsets, [0, 32]);
    }

    #[test]
    fn same_as_image_replaces_unusable_layouts() {
        let mut state = State::new();
        let mut object = image(image_2d(
            vk::Format::R8_UNORM,
            1,
            1,
            vk::ImageUsageFlags::TRANSFER_DST,
        ));
        let handle = object.handle;
        object
            .level_mut(vk::ImageAspectFlags::COLOR, 0, 0)
            .unwrap()
            .layout = vk::ImageLayout::PREINITIALIZED;
        state.images.insert(handle, object);

        let color = vk::ImageAspectFlags::COLOR;
        assert_eq!(
            LayoutPolicy::SameAsImage.resolve(&state, handle, color, 0, 0),
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(
            LayoutPolicy::Uniform(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .resolve(&state, handle, color, 0, 0),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        state
            .images
            .get_mut(&handle)
            .unwrap()
            .level_mut(color, 0, 0)
            .unwrap()
            .layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        assert_eq!(
            LayoutPolicy::SameAsImage.resolve(&state, handle, color, 0, 0),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
    }

    #[test]
    fn extracts_clamped_regions() {
        // 4x3 image of one byte per texel, value = y * 4 + x.
        let data: Vec<u8> = (0..12).collect();
        let level_extent = vk::Extent3D {
            width: 4,
            height: 3,
            depth: 1,
        };

        let (region, extent) = extract_region(
            &data,
            level_extent,
            [1, 1, 1],
            1,
            vk::Offset3D { x: 2, y: 1, z: 0 },
            vk::Extent3D {
                width: 4,
                height: 4,
                depth: 1,
            },
        )
        .unwrap();

        assert_eq!(region, [6, 7, 10, 11]);
        assert_eq!((extent.width, extent.height, extent.depth), (2, 2, 1));

        assert!(extract_region(
            &data,
            level_extent,
            [1, 1, 1],
            1,
            vk::Offset3D { x: 5, y: 0, z: 0 },
            level_extent,
        )
        .is_none());
    }
}
