// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Element layouts of the image formats the primer understands.
//!
//! Each format is described per aspect as an [`ElementFormat`]: a list of bit-packed
//! [`Component`]s and the size of one element in bytes. For depth/stencil formats the aspect
//! layouts are the ones used by buffer-image copies, so `D24_UNORM_S8_UINT` has a 4-byte depth
//! element with the depth value in the low 24 bits and a 1-byte stencil element.
//!
//! Block-compressed formats only carry their block size and extent. Their contents can be copied
//! as-is but never converted.

pub use self::convert::{unpack_for_priming, unpacked_format, ChannelConverter, ConvertError, FormatConverter};
use crate::DeviceSize;
use ash::vk;
use smallvec::SmallVec;

mod convert;

/// The format of the staging images used as input attachments by render priming.
pub const STAGING_FORMAT: vk::Format = vk::Format::R32G32B32A32_UINT;

/// The size in bytes of one texel of [`STAGING_FORMAT`].
pub const STAGING_ELEMENT_SIZE: u32 = 16;

/// The channel a component contributes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Red,
    Green,
    Blue,
    Alpha,
    Depth,
    Stencil,
}

/// How the bits of a component are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumericKind {
    Unorm,
    Snorm,
    Uint,
    Sint,
    Ufloat,
    Sfloat,
    Srgb,
}

impl NumericKind {
    /// Returns whether the component holds a two's-complement signed value.
    #[inline]
    pub fn is_signed(self) -> bool {
        matches!(self, NumericKind::Snorm | NumericKind::Sint)
    }

    /// Returns whether the component holds a floating-point value.
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, NumericKind::Ufloat | NumericKind::Sfloat)
    }

    /// Returns whether the component is read as a normalized value in shaders.
    #[inline]
    pub fn is_normalized(self) -> bool {
        matches!(self, NumericKind::Unorm | NumericKind::Snorm | NumericKind::Srgb)
    }
}

/// A single channel of an element, `bits` wide and starting `offset` bits into the element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Component {
    pub channel: Channel,
    pub kind: NumericKind,
    pub bits: u32,
    pub offset: u32,
}

/// The layout of one element of an image aspect.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementFormat {
    pub components: SmallVec<[Component; 4]>,
    /// Size of one element in bytes.
    pub size: u32,
}

impl ElementFormat {
    /// Lays out `channels` one after the other, each `bits` wide.
    pub fn array(kind: NumericKind, bits: u32, channels: &[Channel]) -> Self {
        let components = channels
            .iter()
            .enumerate()
            .map(|(i, &channel)| Component {
                channel,
                kind,
                bits,
                offset: i as u32 * bits,
            })
            .collect();

        ElementFormat {
            components,
            size: channels.len() as u32 * bits / 8,
        }
    }

    /// Creates a packed layout of `size` bytes from `(channel, kind, bits, offset)` tuples.
    pub fn packed(size: u32, components: &[(Channel, NumericKind, u32, u32)]) -> Self {
        ElementFormat {
            components: components
                .iter()
                .map(|&(channel, kind, bits, offset)| Component {
                    channel,
                    kind,
                    bits,
                    offset,
                })
                .collect(),
            size,
        }
    }

    /// Returns the component for `channel`, if present.
    pub fn component(&self, channel: Channel) -> Option<&Component> {
        self.components.iter().find(|c| c.channel == channel)
    }

    /// Returns whether any component is wider than 32 bits.
    pub fn has_wide_components(&self) -> bool {
        self.components.iter().any(|c| c.bits > 32)
    }
}

/// Everything the primer needs to know about a `vk::Format`.
#[derive(Clone, Debug)]
pub struct FormatInfo {
    pub format: vk::Format,
    pub aspects: vk::ImageAspectFlags,
    /// Texel extent of one block. `[1, 1, 1]` for uncompressed formats.
    pub block_extent: [u32; 3],
    /// Size in bytes of one block of the color aspect, or of the largest aspect element for
    /// depth/stencil formats.
    pub block_size: u32,
    pub compressed: bool,
    color: Option<ElementFormat>,
    depth: Option<ElementFormat>,
    stencil: Option<ElementFormat>,
}

impl FormatInfo {
    fn color(format: vk::Format, element: ElementFormat) -> Self {
        FormatInfo {
            format,
            aspects: vk::ImageAspectFlags::COLOR,
            block_extent: [1, 1, 1],
            block_size: element.size,
            compressed: false,
            color: Some(element),
            depth: None,
            stencil: None,
        }
    }

    fn compressed(format: vk::Format, block_extent: [u32; 2], block_size: u32) -> Self {
        FormatInfo {
            format,
            aspects: vk::ImageAspectFlags::COLOR,
            block_extent: [block_extent[0], block_extent[1], 1],
            block_size,
            compressed: true,
            color: None,
            depth: None,
            stencil: None,
        }
    }

    fn depth_stencil(
        format: vk::Format,
        depth: Option<ElementFormat>,
        stencil: Option<ElementFormat>,
    ) -> Self {
        let mut aspects = vk::ImageAspectFlags::empty();

        if depth.is_some() {
            aspects |= vk::ImageAspectFlags::DEPTH;
        }

        if stencil.is_some() {
            aspects |= vk::ImageAspectFlags::STENCIL;
        }

        let block_size = depth
            .iter()
            .chain(stencil.iter())
            .map(|e| e.size)
            .max()
            .unwrap_or(0);

        FormatInfo {
            format,
            aspects,
            block_extent: [1, 1, 1],
            block_size,
            compressed: false,
            color: None,
            depth,
            stencil,
        }
    }

    /// Returns the element layout of `aspect`, or `None` if the aspect is absent or the format
    /// is compressed.
    pub fn aspect_format(&self, aspect: vk::ImageAspectFlags) -> Option<&ElementFormat> {
        match aspect {
            vk::ImageAspectFlags::COLOR => self.color.as_ref(),
            vk::ImageAspectFlags::DEPTH => self.depth.as_ref(),
            vk::ImageAspectFlags::STENCIL => self.stencil.as_ref(),
            _ => None,
        }
    }

    /// Returns the size in bytes of one block of `aspect` as laid out in a buffer.
    pub fn aspect_block_size(&self, aspect: vk::ImageAspectFlags) -> Option<u32> {
        if !self.aspects.contains(aspect) || aspect.is_empty() {
            return None;
        }

        match self.aspect_format(aspect) {
            Some(element) => Some(element.size),
            None if self.compressed => Some(self.block_size),
            None => None,
        }
    }

    /// Returns the number of bytes `aspect` occupies for a region of `extent` texels.
    pub fn aspect_data_size(
        &self,
        aspect: vk::ImageAspectFlags,
        extent: vk::Extent3D,
    ) -> Option<DeviceSize> {
        let block_size = self.aspect_block_size(aspect)?;
        let [bw, bh, bd] = self.block_extent;
        let blocks = DeviceSize::from(extent.width.div_ceil(bw))
            * DeviceSize::from(extent.height.div_ceil(bh))
            * DeviceSize::from(extent.depth.div_ceil(bd));

        Some(blocks * DeviceSize::from(block_size))
    }
}

/// Returns the single-bit aspects of `mask`, lowest bit first.
pub fn aspect_bits(mask: vk::ImageAspectFlags) -> SmallVec<[vk::ImageAspectFlags; 4]> {
    (0..32)
        .map(|i| vk::ImageAspectFlags::from_raw(1 << i))
        .filter(|&bit| mask.contains(bit))
        .collect()
}

/// Returns the aspects of `format`, defaulting to `COLOR` for formats not in the table.
pub fn format_aspects(format: vk::Format) -> vk::ImageAspectFlags {
    format_info(format).map_or(vk::ImageAspectFlags::COLOR, |info| info.aspects)
}

/// Looks up the description of `format`.
pub fn format_info(format: vk::Format) -> Option<FormatInfo> {
    use Channel::{Alpha as A, Blue as B, Depth as D, Green as G, Red as R, Stencil as S};
    use NumericKind::*;

    const C1: &[Channel] = &[R];
    const C2: &[Channel] = &[R, G];
    const C3: &[Channel] = &[R, G, B];
    const C3_BGR: &[Channel] = &[B, G, R];
    const C4: &[Channel] = &[R, G, B, A];
    const C4_BGRA: &[Channel] = &[B, G, R, A];

    let array = |kind, bits, channels| {
        Some(FormatInfo::color(
            format,
            ElementFormat::array(kind, bits, channels),
        ))
    };
    let packed = |size, components: &[(Channel, NumericKind, u32, u32)]| {
        Some(FormatInfo::color(
            format,
            ElementFormat::packed(size, components),
        ))
    };
    let compressed = |w, h, size| Some(FormatInfo::compressed(format, [w, h], size));
    let depth = |kind, bits, size| Some(ElementFormat::packed(size, &[(D, kind, bits, 0)]));
    let stencil = || Some(ElementFormat::packed(1, &[(S, Uint, 8, 0)]));

    match format {
        vk::Format::R4G4B4A4_UNORM_PACK16 => packed(
            2,
            &[(R, Unorm, 4, 12), (G, Unorm, 4, 8), (B, Unorm, 4, 4), (A, Unorm, 4, 0)],
        ),
        vk::Format::B4G4R4A4_UNORM_PACK16 => packed(
            2,
            &[(B, Unorm, 4, 12), (G, Unorm, 4, 8), (R, Unorm, 4, 4), (A, Unorm, 4, 0)],
        ),
        vk::Format::R5G6B5_UNORM_PACK16 => {
            packed(2, &[(R, Unorm, 5, 11), (G, Unorm, 6, 5), (B, Unorm, 5, 0)])
        }
        vk::Format::B5G6R5_UNORM_PACK16 => {
            packed(2, &[(B, Unorm, 5, 11), (G, Unorm, 6, 5), (R, Unorm, 5, 0)])
        }
        vk::Format::R5G5B5A1_UNORM_PACK16 => packed(
            2,
            &[(R, Unorm, 5, 11), (G, Unorm, 5, 6), (B, Unorm, 5, 1), (A, Unorm, 1, 0)],
        ),
        vk::Format::A1R5G5B5_UNORM_PACK16 => packed(
            2,
            &[(A, Unorm, 1, 15), (R, Unorm, 5, 10), (G, Unorm, 5, 5), (B, Unorm, 5, 0)],
        ),

        vk::Format::R8_UNORM => array(Unorm, 8, C1),
        vk::Format::R8_SNORM => array(Snorm, 8, C1),
        vk::Format::R8_UINT => array(Uint, 8, C1),
        vk::Format::R8_SINT => array(Sint, 8, C1),
        vk::Format::R8_SRGB => array(Srgb, 8, C1),
        vk::Format::R8G8_UNORM => array(Unorm, 8, C2),
        vk::Format::R8G8_SNORM => array(Snorm, 8, C2),
        vk::Format::R8G8_UINT => array(Uint, 8, C2),
        vk::Format::R8G8_SINT => array(Sint, 8, C2),
        vk::Format::R8G8_SRGB => array(Srgb, 8, C2),
        vk::Format::R8G8B8_UNORM => array(Unorm, 8, C3),
        vk::Format::R8G8B8_SNORM => array(Snorm, 8, C3),
        vk::Format::R8G8B8_UINT => array(Uint, 8, C3),
        vk::Format::R8G8B8_SINT => array(Sint, 8, C3),
        vk::Format::R8G8B8_SRGB => array(Srgb, 8, C3),
        vk::Format::B8G8R8_UNORM => array(Unorm, 8, C3_BGR),
        vk::Format::B8G8R8_SNORM => array(Snorm, 8, C3_BGR),
        vk::Format::B8G8R8_UINT => array(Uint, 8, C3_BGR),
        vk::Format::B8G8R8_SINT => array(Sint, 8, C3_BGR),
        vk::Format::B8G8R8_SRGB => array(Srgb, 8, C3_BGR),
        vk::Format::R8G8B8A8_UNORM | vk::Format::A8B8G8R8_UNORM_PACK32 => array(Unorm, 8, C4),
        vk::Format::R8G8B8A8_SNORM | vk::Format::A8B8G8R8_SNORM_PACK32 => array(Snorm, 8, C4),
        vk::Format::R8G8B8A8_UINT | vk::Format::A8B8G8R8_UINT_PACK32 => array(Uint, 8, C4),
        vk::Format::R8G8B8A8_SINT | vk::Format::A8B8G8R8_SINT_PACK32 => array(Sint, 8, C4),
        vk::Format::R8G8B8A8_SRGB | vk::Format::A8B8G8R8_SRGB_PACK32 => array(Srgb, 8, C4),
        vk::Format::B8G8R8A8_UNORM => array(Unorm, 8, C4_BGRA),
        vk::Format::B8G8R8A8_SNORM => array(Snorm, 8, C4_BGRA),
        vk::Format::B8G8R8A8_UINT => array(Uint, 8, C4_BGRA),
        vk::Format::B8G8R8A8_SINT => array(Sint, 8, C4_BGRA),
        vk::Format::B8G8R8A8_SRGB => array(Srgb, 8, C4_BGRA),

        vk::Format::A2R10G10B10_UNORM_PACK32 => packed(
            4,
            &[(B, Unorm, 10, 0), (G, Unorm, 10, 10), (R, Unorm, 10, 20), (A, Unorm, 2, 30)],
        ),
        vk::Format::A2R10G10B10_UINT_PACK32 => packed(
            4,
            &[(B, Uint, 10, 0), (G, Uint, 10, 10), (R, Uint, 10, 20), (A, Uint, 2, 30)],
        ),
        vk::Format::A2B10G10R10_UNORM_PACK32 => packed(
            4,
            &[(R, Unorm, 10, 0), (G, Unorm, 10, 10), (B, Unorm, 10, 20), (A, Unorm, 2, 30)],
        ),
        vk::Format::A2B10G10R10_UINT_PACK32 => packed(
            4,
            &[(R, Uint, 10, 0), (G, Uint, 10, 10), (B, Uint, 10, 20), (A, Uint, 2, 30)],
        ),
        vk::Format::B10G11R11_UFLOAT_PACK32 => {
            packed(4, &[(R, Ufloat, 11, 0), (G, Ufloat, 11, 11), (B, Ufloat, 10, 22)])
        }

        vk::Format::R16_UNORM => array(Unorm, 16, C1),
        vk::Format::R16_SNORM => array(Snorm, 16, C1),
        vk::Format::R16_UINT => array(Uint, 16, C1),
        vk::Format::R16_SINT => array(Sint, 16, C1),
        vk::Format::R16_SFLOAT => array(Sfloat, 16, C1),
        vk::Format::R16G16_UNORM => array(Unorm, 16, C2),
        vk::Format::R16G16_SNORM => array(Snorm, 16, C2),
        vk::Format::R16G16_UINT => array(Uint, 16, C2),
        vk::Format::R16G16_SINT => array(Sint, 16, C2),
        vk::Format::R16G16_SFLOAT => array(Sfloat, 16, C2),
        vk::Format::R16G16B16_UNORM => array(Unorm, 16, C3),
        vk::Format::R16G16B16_UINT => array(Uint, 16, C3),
        vk::Format::R16G16B16_SINT => array(Sint, 16, C3),
        vk::Format::R16G16B16_SFLOAT => array(Sfloat, 16, C3),
        vk::Format::R16G16B16A16_UNORM => array(Unorm, 16, C4),
        vk::Format::R16G16B16A16_SNORM => array(Snorm, 16, C4),
        vk::Format::R16G16B16A16_UINT => array(Uint, 16, C4),
        vk::Format::R16G16B16A16_SINT => array(Sint, 16, C4),
        vk::Format::R16G16B16A16_SFLOAT => array(Sfloat, 16, C4),

        vk::Format::R32_UINT => array(Uint, 32, C1),
        vk::Format::R32_SINT => array(Sint, 32, C1),
        vk::Format::R32_SFLOAT => array(Sfloat, 32, C1),
        vk::Format::R32G32_UINT => array(Uint, 32, C2),
        vk::Format::R32G32_SINT => array(Sint, 32, C2),
        vk::Format::R32G32_SFLOAT => array(Sfloat, 32, C2),
        vk::Format::R32G32B32_UINT => array(Uint, 32, C3),
        vk::Format::R32G32B32_SINT => array(Sint, 32, C3),
        vk::Format::R32G32B32_SFLOAT => array(Sfloat, 32, C3),
        vk::Format::R32G32B32A32_UINT => array(Uint, 32, C4),
        vk::Format::R32G32B32A32_SINT => array(Sint, 32, C4),
        vk::Format::R32G32B32A32_SFLOAT => array(Sfloat, 32, C4),

        vk::Format::R64_UINT => array(Uint, 64, C1),
        vk::Format::R64_SINT => array(Sint, 64, C1),
        vk::Format::R64_SFLOAT => array(Sfloat, 64, C1),
        vk::Format::R64G64_UINT => array(Uint, 64, C2),
        vk::Format::R64G64_SINT => array(Sint, 64, C2),
        vk::Format::R64G64_SFLOAT => array(Sfloat, 64, C2),
        vk::Format::R64G64B64A64_UINT => array(Uint, 64, C4),
        vk::Format::R64G64B64A64_SINT => array(Sint, 64, C4),
        vk::Format::R64G64B64A64_SFLOAT => array(Sfloat, 64, C4),

        vk::Format::D16_UNORM => Some(FormatInfo::depth_stencil(format, depth(Unorm, 16, 2), None)),
        vk::Format::X8_D24_UNORM_PACK32 => {
            Some(FormatInfo::depth_stencil(format, depth(Unorm, 24, 4), None))
        }
        vk::Format::D32_SFLOAT => {
            Some(FormatInfo::depth_stencil(format, depth(Sfloat, 32, 4), None))
        }
        vk::Format::S8_UINT => Some(FormatInfo::depth_stencil(format, None, stencil())),
        vk::Format::D16_UNORM_S8_UINT => Some(FormatInfo::depth_stencil(
            format,
            depth(Unorm, 16, 2),
            stencil(),
        )),
        vk::Format::D24_UNORM_S8_UINT => Some(FormatInfo::depth_stencil(
            format,
            depth(Unorm, 24, 4),
            stencil(),
        )),
        vk::Format::D32_SFLOAT_S8_UINT => Some(FormatInfo::depth_stencil(
            format,
            depth(Sfloat, 32, 4),
            stencil(),
        )),

        vk::Format::BC1_RGB_UNORM_BLOCK
        | vk::Format::BC1_RGB_SRGB_BLOCK
        | vk::Format::BC1_RGBA_UNORM_BLOCK
        | vk::Format::BC1_RGBA_SRGB_BLOCK
        | vk::Format::BC4_UNORM_BLOCK
        | vk::Format::BC4_SNORM_BLOCK
        | vk::Format::ETC2_R8G8B8_UNORM_BLOCK
        | vk::Format::ETC2_R8G8B8_SRGB_BLOCK
        | vk::Format::ETC2_R8G8B8A1_UNORM_BLOCK
        | vk::Format::ETC2_R8G8B8A1_SRGB_BLOCK
        | vk::Format::EAC_R11_UNORM_BLOCK
        | vk::Format::EAC_R11_SNORM_BLOCK => compressed(4, 4, 8),
        vk::Format::BC2_UNORM_BLOCK
        | vk::Format::BC2_SRGB_BLOCK
        | vk::Format::BC3_UNORM_BLOCK
        | vk::Format::BC3_SRGB_BLOCK
        | vk::Format::BC5_UNORM_BLOCK
        | vk::Format::BC5_SNORM_BLOCK
        | vk::Format::BC6H_UFLOAT_BLOCK
        | vk::Format::BC6H_SFLOAT_BLOCK
        | vk::Format::BC7_UNORM_BLOCK
        | vk::Format::BC7_SRGB_BLOCK
        | vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK
        | vk::Format::ETC2_R8G8B8A8_SRGB_BLOCK
        | vk::Format::EAC_R11G11_UNORM_BLOCK
        | vk::Format::EAC_R11G11_SNORM_BLOCK
        | vk::Format::ASTC_4X4_UNORM_BLOCK
        | vk::Format::ASTC_4X4_SRGB_BLOCK => compressed(4, 4, 16),
        vk::Format::ASTC_8X8_UNORM_BLOCK | vk::Format::ASTC_8X8_SRGB_BLOCK => {
            compressed(8, 8, 16)
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_bits_are_ordered() {
        let mask = vk::ImageAspectFlags::STENCIL
            | vk::ImageAspectFlags::COLOR
            | vk::ImageAspectFlags::DEPTH;

        assert_eq!(
            aspect_bits(mask).as_slice(),
            &[
                vk::ImageAspectFlags::COLOR,
                vk::ImageAspectFlags::DEPTH,
                vk::ImageAspectFlags::STENCIL,
            ],
        );
        assert!(aspect_bits(vk::ImageAspectFlags::empty()).is_empty());
    }

    #[test]
    fn depth_stencil_aspects_use_copy_layouts() {
        let info = format_info(vk::Format::D24_UNORM_S8_UINT).unwrap();

        assert_eq!(
            info.aspects,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        );
        assert_eq!(info.aspect_block_size(vk::ImageAspectFlags::DEPTH), Some(4));
        assert_eq!(info.aspect_block_size(vk::ImageAspectFlags::STENCIL), Some(1));
        assert_eq!(info.aspect_block_size(vk::ImageAspectFlags::COLOR), None);

        let depth = info.aspect_format(vk::ImageAspectFlags::DEPTH).unwrap();
        assert_eq!(depth.components.len(), 1);
        assert_eq!(depth.components[0].bits, 24);
        assert_eq!(depth.components[0].offset, 0);
    }

    #[test]
    fn compressed_sizes_round_up_to_blocks() {
        let info = format_info(vk::Format::BC1_RGBA_UNORM_BLOCK).unwrap();
        let extent = vk::Extent3D {
            width: 5,
            height: 3,
            depth: 1,
        };

        assert!(info.compressed);
        assert!(info.aspect_format(vk::ImageAspectFlags::COLOR).is_none());
        assert_eq!(
            info.aspect_data_size(vk::ImageAspectFlags::COLOR, extent),
            Some(2 * 8),
        );
    }

    #[test]
    fn packed_and_array_sizes() {
        for (format, size) in [
            (vk::Format::R8_UNORM, 1),
            (vk::Format::R5G6B5_UNORM_PACK16, 2),
            (vk::Format::R8G8B8_SRGB, 3),
            (vk::Format::A2B10G10R10_UNORM_PACK32, 4),
            (vk::Format::R16G16B16A16_SFLOAT, 8),
            (vk::Format::R32G32B32A32_UINT, 16),
            (vk::Format::R64G64B64A64_SFLOAT, 32),
        ] {
            let info = format_info(format).unwrap();
            assert_eq!(info.block_size, size, "{format:?}");
            assert_eq!(
                info.aspect_format(vk::ImageAspectFlags::COLOR).unwrap().size,
                size,
            );
        }
    }

    #[test]
    fn unknown_formats_default_to_color() {
        assert!(format_info(vk::Format::G8_B8_R8_3PLANE_420_UNORM).is_none());
        assert_eq!(
            format_aspects(vk::Format::G8_B8_R8_3PLANE_420_UNORM),
            vk::ImageAspectFlags::COLOR,
        );
    }
}
