// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{Channel, Component, ElementFormat, NumericKind};
use half::f16;
use smallvec::SmallVec;
use std::{error::Error, fmt};

/// Converts tightly packed elements from one layout to another.
pub trait FormatConverter {
    /// Converts `data`, a whole number of `src` elements, into the same number of `dst`
    /// elements.
    fn convert(
        &self,
        data: &[u8],
        src: &ElementFormat,
        dst: &ElementFormat,
    ) -> Result<Vec<u8>, ConvertError>;
}

/// A [`FormatConverter`] that decodes every component to a numeric value and encodes it into
/// the destination component of the same channel.
///
/// Destination channels that the source lacks are filled with zero, except alpha which is
/// filled with one. When both layouts have a single component, the component is converted
/// regardless of its channel, which is how depth and stencil values move into and out of the
/// red channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelConverter;

impl FormatConverter for ChannelConverter {
    fn convert(
        &self,
        data: &[u8],
        src: &ElementFormat,
        dst: &ElementFormat,
    ) -> Result<Vec<u8>, ConvertError> {
        if src.size == 0 || dst.size == 0 {
            return Err(ConvertError::EmptyElement);
        }

        if data.len() % src.size as usize != 0 {
            return Err(ConvertError::LengthNotMultiple {
                len: data.len(),
                element_size: src.size,
            });
        }

        for component in src.components.iter().chain(dst.components.iter()) {
            check_component(component)?;
        }

        let sources: SmallVec<[Option<Component>; 4]> = dst
            .components
            .iter()
            .map(|d| source_component(src, dst, d.channel))
            .collect();

        let count = data.len() / src.size as usize;
        let mut out = vec![0u8; count * dst.size as usize];

        for (src_element, dst_element) in data
            .chunks_exact(src.size as usize)
            .zip(out.chunks_exact_mut(dst.size as usize))
        {
            for (d, s) in dst.components.iter().zip(&sources) {
                let value = match s {
                    Some(s) => decode(s, read_bits(src_element, s.offset, s.bits)),
                    None if d.channel == Channel::Alpha => Value::Float(1.0),
                    None => Value::Float(0.0),
                };

                write_bits(dst_element, d.offset, d.bits, encode(value, d));
            }
        }

        Ok(out)
    }
}

/// Returns the layout that priming stages `src` in.
///
/// Depth and stencil channels become red. Unsigned and normalized unsigned components widen to
/// 32-bit unsigned integers, signed ones to 32-bit signed integers, and floats to 32-bit floats.
/// Components wider than 32 bits keep 64 bits. The components are ordered by channel.
pub fn unpacked_format(src: &ElementFormat) -> ElementFormat {
    let mut components: SmallVec<[Component; 4]> = src
        .components
        .iter()
        .map(|c| {
            let channel = match c.channel {
                Channel::Depth | Channel::Stencil => Channel::Red,
                channel => channel,
            };
            let kind = match c.kind {
                NumericKind::Unorm | NumericKind::Uint | NumericKind::Srgb => NumericKind::Uint,
                NumericKind::Snorm | NumericKind::Sint => NumericKind::Sint,
                NumericKind::Ufloat | NumericKind::Sfloat => NumericKind::Sfloat,
            };
            let bits = if c.bits > 32 { 64 } else { 32 };

            Component {
                channel,
                kind,
                bits,
                offset: 0,
            }
        })
        .collect();

    components.sort_by_key(|c| c.channel);

    let mut offset = 0;

    for component in &mut components {
        component.offset = offset;
        offset += component.bits;
    }

    ElementFormat {
        components,
        size: offset / 8,
    }
}

/// Converts `data` from `src` into [`unpacked_format`]`(src)`.
///
/// Returns the converted bytes together with the unpacked layout. When the source is already
/// in its unpacked layout the bytes are returned unchanged.
pub fn unpack_for_priming(
    converter: &dyn FormatConverter,
    data: &[u8],
    src: &ElementFormat,
) -> Result<(Vec<u8>, ElementFormat), ConvertError> {
    let unpacked = unpacked_format(src);

    if unpacked == *src {
        return Ok((data.to_vec(), unpacked));
    }

    let data = converter.convert(data, src, &unpacked)?;

    Ok((data, unpacked))
}

fn source_component(src: &ElementFormat, dst: &ElementFormat, channel: Channel) -> Option<Component> {
    if let Some(component) = src.component(channel) {
        return Some(*component);
    }

    if src.components.len() == 1 && dst.components.len() == 1 {
        return Some(src.components[0]);
    }

    None
}

fn check_component(component: &Component) -> Result<(), ConvertError> {
    let supported = match component.kind {
        NumericKind::Sfloat => matches!(component.bits, 16 | 32 | 64),
        NumericKind::Ufloat => matches!(component.bits, 10 | 11),
        _ => (1..=64).contains(&component.bits),
    };

    if supported {
        Ok(())
    } else {
        Err(ConvertError::UnsupportedComponent {
            kind: component.kind,
            bits: component.bits,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Value {
    Unsigned { raw: u64, bits: u32, normalized: bool },
    Signed { raw: i64, bits: u32, normalized: bool },
    Float(f64),
}

impl Value {
    fn to_f64(self) -> f64 {
        match self {
            Value::Unsigned {
                raw,
                bits,
                normalized: true,
            } => raw as f64 / unsigned_max(bits) as f64,
            Value::Unsigned { raw, .. } => raw as f64,
            Value::Signed {
                raw,
                bits,
                normalized: true,
            } => (raw as f64 / signed_max(bits) as f64).max(-1.0),
            Value::Signed { raw, .. } => raw as f64,
            Value::Float(value) => value,
        }
    }
}

#[inline]
fn unsigned_max(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

#[inline]
fn signed_max(bits: u32) -> i64 {
    (unsigned_max(bits) >> 1) as i64
}

#[inline]
fn signed_min(bits: u32) -> i64 {
    -signed_max(bits) - 1
}

fn decode(component: &Component, raw: u64) -> Value {
    let bits = component.bits;

    match component.kind {
        NumericKind::Unorm | NumericKind::Srgb => Value::Unsigned {
            raw,
            bits,
            normalized: true,
        },
        NumericKind::Uint => Value::Unsigned {
            raw,
            bits,
            normalized: false,
        },
        NumericKind::Snorm | NumericKind::Sint => {
            let shift = 64 - bits;
            let raw = ((raw << shift) as i64) >> shift;

            Value::Signed {
                raw,
                bits,
                normalized: component.kind == NumericKind::Snorm,
            }
        }
        NumericKind::Sfloat => Value::Float(match bits {
            16 => f16::from_bits(raw as u16).to_f64(),
            32 => f64::from(f32::from_bits(raw as u32)),
            _ => f64::from_bits(raw),
        }),
        // Small unsigned floats share the exponent layout of half floats.
        NumericKind::Ufloat => Value::Float(f16::from_bits((raw << (11 - bits + 4)) as u16).to_f64()),
    }
}

fn encode(value: Value, component: &Component) -> u64 {
    let bits = component.bits;
    let max = unsigned_max(bits);

    match component.kind {
        NumericKind::Unorm | NumericKind::Srgb => match value {
            Value::Unsigned {
                raw,
                bits: src_bits,
                normalized: true,
            } => {
                if src_bits == bits {
                    raw
                } else {
                    let scaled = (u128::from(raw) * u128::from(max)
                        + u128::from(unsigned_max(src_bits)) / 2)
                        / u128::from(unsigned_max(src_bits));

                    scaled as u64
                }
            }
            Value::Unsigned { raw, .. } => raw.min(max),
            Value::Signed {
                normalized: false,
                raw,
                ..
            } => raw.clamp(0, i64::try_from(max).unwrap_or(i64::MAX)) as u64,
            value => (value.to_f64().clamp(0.0, 1.0) * max as f64).round() as u64,
        },
        NumericKind::Uint => match value {
            Value::Unsigned { raw, .. } => raw.min(max),
            Value::Signed { raw, .. } => raw.clamp(0, i64::try_from(max).unwrap_or(i64::MAX)) as u64,
            Value::Float(value) => value.clamp(0.0, max as f64) as u64,
        },
        NumericKind::Snorm | NumericKind::Sint => {
            let normalized = component.kind == NumericKind::Snorm;
            let signed = match value {
                Value::Signed {
                    raw,
                    bits: src_bits,
                    normalized: src_normalized,
                } if !normalized || !src_normalized || src_bits == bits => {
                    raw.clamp(signed_min(bits), signed_max(bits))
                }
                Value::Unsigned {
                    raw,
                    normalized: false,
                    ..
                } if !normalized => raw.min(signed_max(bits) as u64) as i64,
                value if normalized => {
                    (value.to_f64().clamp(-1.0, 1.0) * signed_max(bits) as f64).round() as i64
                }
                value => value
                    .to_f64()
                    .clamp(signed_min(bits) as f64, signed_max(bits) as f64)
                    as i64,
            };

            (signed as u64) & max
        }
        NumericKind::Sfloat => {
            let value = value.to_f64();

            match bits {
                16 => u64::from(f16::from_f64(value).to_bits()),
                32 => u64::from((value as f32).to_bits()),
                _ => value.to_bits(),
            }
        }
        NumericKind::Ufloat => {
            let half = f16::from_f64(value.to_f64()).to_bits();
            let shift = 11 - bits + 4;

            if half & 0x8000 != 0 {
                // Negative values clamp to zero.
                0
            } else if f16::from_bits(half).is_nan() {
                max
            } else {
                u64::from(half >> shift)
            }
        }
    }
}

fn read_bits(element: &[u8], offset: u32, bits: u32) -> u64 {
    let mut value = 0u64;

    for i in 0..bits {
        let bit = offset + i;
        let byte = element[(bit / 8) as usize];

        if byte & (1 << (bit % 8)) != 0 {
            value |= 1 << i;
        }
    }

    value
}

fn write_bits(element: &mut [u8], offset: u32, bits: u32, value: u64) {
    for i in 0..bits {
        let bit = offset + i;
        let byte = &mut element[(bit / 8) as usize];

        if value & (1 << i) != 0 {
            *byte |= 1 << (bit % 8);
        } else {
            *byte &= !(1 << (bit % 8));
        }
    }
}

/// Error that can happen when converting elements between layouts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvertError {
    /// The input is not a whole number of source elements.
    LengthNotMultiple { len: usize, element_size: u32 },

    /// A component has a kind and width combination that cannot be converted.
    UnsupportedComponent { kind: NumericKind, bits: u32 },

    /// One of the layouts has a zero element size.
    EmptyElement,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthNotMultiple { len, element_size } => write!(
                f,
                "the input length {len} is not a multiple of the element size {element_size}",
            ),
            Self::UnsupportedComponent { kind, bits } => {
                write!(f, "{bits}-bit {kind:?} components cannot be converted")
            }
            Self::EmptyElement => f.write_str("an element layout has a size of zero"),
        }
    }
}

impl Error for ConvertError {}
