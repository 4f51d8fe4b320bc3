// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! GLSL generation for the render and store kits.
//!
//! Every shader reads texels in the layout returned by
//! [`unpacked_format`](crate::format::unpacked_format): one or more 32-bit words per texel, one
//! word per channel. [`Lane`]s describe which word holds which channel and how the captured
//! component was encoded, so the generated code can rebuild the value the target expects.

use super::PrimeError;
use crate::{
    builder::StateBuilder,
    cache::KitCache,
    cleanup::CleanupStack,
    command::{Command, Object},
    format::{unpacked_format, Channel, ElementFormat, NumericKind},
};
use ash::vk;
use smallvec::SmallVec;
use std::{error::Error, fmt, fmt::Write};

/// Turns GLSL source into SPIR-V words.
///
/// The crate does not bundle a compiler; the caller provides one.
pub trait ShaderCompiler {
    fn compile(
        &self,
        stage: vk::ShaderStageFlags,
        source: &str,
    ) -> Result<Vec<u32>, ShaderCompileError>;
}

/// Error returned by a [`ShaderCompiler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderCompileError {
    message: String,
}

impl ShaderCompileError {
    pub fn new(message: impl Into<String>) -> Self {
        ShaderCompileError {
            message: message.into(),
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Error for ShaderCompileError {}

impl fmt::Display for ShaderCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader compilation failed: {}", self.message)
    }
}

/// The value type a shader hands to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum OutputClass {
    Float,
    Uint,
    Sint,
}

impl OutputClass {
    fn of(format: &ElementFormat) -> Self {
        match format.components.first().map(|c| c.kind) {
            Some(NumericKind::Uint) => OutputClass::Uint,
            Some(NumericKind::Sint) => OutputClass::Sint,
            _ => OutputClass::Float,
        }
    }

    fn vec4(self) -> &'static str {
        match self {
            OutputClass::Float => "vec4",
            OutputClass::Uint => "uvec4",
            OutputClass::Sint => "ivec4",
        }
    }

    fn image_prefix(self) -> &'static str {
        match self {
            OutputClass::Float => "",
            OutputClass::Uint => "u",
            OutputClass::Sint => "i",
        }
    }

    fn zero(self) -> &'static str {
        match self {
            OutputClass::Float => "0.0",
            OutputClass::Uint => "0u",
            OutputClass::Sint => "0",
        }
    }

    fn one(self) -> &'static str {
        match self {
            OutputClass::Float => "1.0",
            OutputClass::Uint => "1u",
            OutputClass::Sint => "1",
        }
    }
}

/// Where one captured component sits in the unpacked words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Lane {
    pub channel: Channel,
    pub kind: NumericKind,
    pub bits: u32,
    pub word: u32,
}

/// Returns the lanes of `src`, in the order of its components.
pub(crate) fn lanes(src: &ElementFormat) -> SmallVec<[Lane; 4]> {
    let unpacked = unpacked_format(src);

    src.components
        .iter()
        .filter_map(|c| {
            let channel = match c.channel {
                Channel::Depth | Channel::Stencil => Channel::Red,
                channel => channel,
            };
            let target = unpacked.component(channel)?;

            Some(Lane {
                channel: c.channel,
                kind: c.kind,
                bits: c.bits,
                word: target.offset / 32,
            })
        })
        .collect()
}

/// Returns the number of 32-bit words `src` unpacks to.
pub(crate) fn words_per_texel(src: &ElementFormat) -> u32 {
    unpacked_format(src).size.div_ceil(4)
}

/// Returns a GLSL expression that rebuilds the value of `lane` from its word.
fn lane_value(lane: &Lane, word: &str) -> String {
    match lane.kind {
        NumericKind::Unorm => format!("(float({word}) / {})", unorm_max(lane.bits)),
        NumericKind::Srgb => format!("srgb_to_linear(float({word}) / {})", unorm_max(lane.bits)),
        NumericKind::Snorm => format!(
            "max(float(int({word})) / {}, -1.0)",
            float_literal((1u64 << (lane.bits - 1)) - 1),
        ),
        NumericKind::Uint => word.to_owned(),
        NumericKind::Sint => format!("int({word})"),
        NumericKind::Ufloat | NumericKind::Sfloat => format!("uintBitsToFloat({word})"),
    }
}

fn unorm_max(bits: u32) -> String {
    float_literal((1u64 << bits) - 1)
}

fn float_literal(value: u64) -> String {
    format!("{value}.0")
}

/// Builds a four-component constructor of `class` from the lanes of a color element.
fn color_value(lanes: &[Lane], class: OutputClass, word: impl Fn(u32) -> String) -> String {
    let channels = [Channel::Red, Channel::Green, Channel::Blue, Channel::Alpha];
    let args: Vec<String> = channels
        .iter()
        .map(|&channel| match lanes.iter().find(|l| l.channel == channel) {
            Some(lane) => lane_value(lane, &word(lane.word)),
            None if channel == Channel::Alpha => class.one().to_owned(),
            None => class.zero().to_owned(),
        })
        .collect();

    format!("{}({})", class.vec4(), args.join(", "))
}

const SRGB_TO_LINEAR: &str = "\
float srgb_to_linear(float c) {
    return c <= 0.04045 ? c / 12.92 : pow((c + 0.055) / 1.055, 2.4);
}
";

fn uses_srgb(lanes: &[Lane]) -> bool {
    lanes.iter().any(|l| l.kind == NumericKind::Srgb)
}

/// A vertex shader that covers the viewport with one triangle of three vertices.
pub(crate) fn full_screen_vertex_shader() -> String {
    "\
#version 450

void main() {
    vec2 uv = vec2((gl_VertexIndex << 1) & 2, gl_VertexIndex & 2);
    gl_Position = vec4(uv * 2.0 - 1.0, 0.0, 1.0);
}
"
    .to_owned()
}

/// A fragment shader that writes the texel held by `input_count` staging input attachments
/// into an attachment of `aspect`.
///
/// For the stencil aspect the shader discards fragments whose bit, selected by the dynamic
/// uniform buffer at binding `input_count`, is clear.
pub(crate) fn render_fragment_shader(
    src: &ElementFormat,
    aspect: vk::ImageAspectFlags,
    input_count: u32,
) -> String {
    let lanes = lanes(src);
    let word = |w: u32| format!("t{}.{}", w / 4, ["x", "y", "z", "w"][(w % 4) as usize]);
    let mut s = String::from("#version 450\n\n");

    for i in 0..input_count {
        let _ = writeln!(
            s,
            "layout(input_attachment_index = {i}, set = 0, binding = {i}) \
             uniform usubpassInput in{i};",
        );
    }

    match aspect {
        vk::ImageAspectFlags::STENCIL => {
            let _ = writeln!(
                s,
                "layout(set = 0, binding = {input_count}) uniform StencilBit {{ uint bit; }} stencil;",
            );
        }
        vk::ImageAspectFlags::DEPTH => {}
        _ => {
            let class = OutputClass::of(src);
            let _ = writeln!(s, "layout(location = 0) out {} color;", class.vec4());
        }
    }

    s.push('\n');

    if uses_srgb(&lanes) {
        s.push_str(SRGB_TO_LINEAR);
        s.push('\n');
    }

    s.push_str("void main() {\n");

    for i in 0..input_count {
        let _ = writeln!(s, "    uvec4 t{i} = subpassLoad(in{i});");
    }

    match aspect {
        vk::ImageAspectFlags::STENCIL => {
            let w = lanes.first().map_or(0, |l| l.word);
            let _ = writeln!(
                s,
                "    if ((({} >> stencil.bit) & 1u) == 0u) {{\n        discard;\n    }}",
                word(w),
            );
        }
        vk::ImageAspectFlags::DEPTH => {
            let value = lanes
                .first()
                .map_or_else(|| "0.0".to_owned(), |l| lane_value(l, &word(l.word)));
            let _ = writeln!(s, "    gl_FragDepth = {value};");
        }
        _ => {
            let value = color_value(&lanes, OutputClass::of(src), word);
            let _ = writeln!(s, "    color = {value};");
        }
    }

    s.push_str("}\n");

    s
}

/// A compute shader that stores texels read from a uniform texel buffer into a storage image.
///
/// The local size is specialization constant 0. The metadata block at binding 2 holds the
/// region's offset and extent, and in `range` the index of the first texel, the texel count,
/// the index of the first word and the words per texel.
pub(crate) fn store_compute_shader(
    src: &ElementFormat,
    image_format: &str,
    image_type: vk::ImageType,
) -> String {
    let lanes = lanes(src);
    let class = OutputClass::of(src);
    let (dim, coord) = match image_type {
        vk::ImageType::TYPE_1D => ("1D", "meta.offset.x + int(x)"),
        vk::ImageType::TYPE_3D => ("3D", "meta.offset.xyz + ivec3(x, y, z)"),
        _ => ("2D", "meta.offset.xy + ivec2(x, y)"),
    };
    let word = |w: u32| format!("texelFetch(texels, base + {w}).x");
    let value = color_value(&lanes, class, word);

    let mut s = String::from("#version 450\n\n");
    let _ = writeln!(s, "layout(local_size_x_id = 0) in;\n");
    let _ = writeln!(
        s,
        "layout(set = 0, binding = 0, {image_format}) uniform writeonly {}image{dim} target;",
        class.image_prefix(),
    );
    s.push_str("layout(set = 0, binding = 1) uniform usamplerBuffer texels;\n");
    s.push_str(
        "layout(set = 0, binding = 2) uniform Metadata {\n    \
         ivec4 offset;\n    uvec4 extent;\n    uvec4 range;\n} meta;\n\n",
    );

    if uses_srgb(&lanes) {
        s.push_str(SRGB_TO_LINEAR);
        s.push('\n');
    }

    s.push_str(
        "\
void main() {
    uint index = gl_GlobalInvocationID.x;
    if (index >= meta.range.y) {
        return;
    }

    uint texel = meta.range.x + index;
    uint x = texel % meta.extent.x;
    uint y = (texel / meta.extent.x) % meta.extent.y;
    uint z = texel / (meta.extent.x * meta.extent.y);
    int base = int(meta.range.z + index * meta.range.w);

",
    );
    let _ = writeln!(s, "    imageStore(target, {coord}, {value});\n}}");

    s
}

/// Returns the GLSL image format qualifier of `format`, or `None` if storage images of that
/// format cannot be declared.
pub(crate) fn glsl_image_format(format: vk::Format) -> Option<&'static str> {
    Some(match format {
        vk::Format::R32G32B32A32_SFLOAT => "rgba32f",
        vk::Format::R16G16B16A16_SFLOAT => "rgba16f",
        vk::Format::R32G32_SFLOAT => "rg32f",
        vk::Format::R16G16_SFLOAT => "rg16f",
        vk::Format::B10G11R11_UFLOAT_PACK32 => "r11f_g11f_b10f",
        vk::Format::R32_SFLOAT => "r32f",
        vk::Format::R16_SFLOAT => "r16f",
        vk::Format::R16G16B16A16_UNORM => "rgba16",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "rgb10_a2",
        vk::Format::R8G8B8A8_UNORM => "rgba8",
        vk::Format::R16G16_UNORM => "rg16",
        vk::Format::R8G8_UNORM => "rg8",
        vk::Format::R16_UNORM => "r16",
        vk::Format::R8_UNORM => "r8",
        vk::Format::R16G16B16A16_SNORM => "rgba16_snorm",
        vk::Format::R8G8B8A8_SNORM => "rgba8_snorm",
        vk::Format::R16G16_SNORM => "rg16_snorm",
        vk::Format::R8G8_SNORM => "rg8_snorm",
        vk::Format::R16_SNORM => "r16_snorm",
        vk::Format::R8_SNORM => "r8_snorm",
        vk::Format::R32G32B32A32_SINT => "rgba32i",
        vk::Format::R16G16B16A16_SINT => "rgba16i",
        vk::Format::R8G8B8A8_SINT => "rgba8i",
        vk::Format::R32G32_SINT => "rg32i",
        vk::Format::R16G16_SINT => "rg16i",
        vk::Format::R8G8_SINT => "rg8i",
        vk::Format::R32_SINT => "r32i",
        vk::Format::R16_SINT => "r16i",
        vk::Format::R8_SINT => "r8i",
        vk::Format::R32G32B32A32_UINT => "rgba32ui",
        vk::Format::R16G16B16A16_UINT => "rgba16ui",
        vk::Format::A2B10G10R10_UINT_PACK32 => "rgb10_a2ui",
        vk::Format::R8G8B8A8_UINT => "rgba8ui",
        vk::Format::R32G32_UINT => "rg32ui",
        vk::Format::R16G16_UINT => "rg16ui",
        vk::Format::R8G8_UINT => "rg8ui",
        vk::Format::R32_UINT => "r32ui",
        vk::Format::R16_UINT => "r16ui",
        vk::Format::R8_UINT => "r8ui",
        _ => return None,
    })
}

/// Returns the shader module compiled from `source`, compiling and creating it on first use.
pub(crate) fn shader_module(
    sb: &mut StateBuilder<'_>,
    modules: &mut KitCache<(vk::Device, String), vk::ShaderModule>,
    cleanup: &mut CleanupStack,
    compiler: &dyn ShaderCompiler,
    device: vk::Device,
    stage: vk::ShaderStageFlags,
    source: String,
) -> Result<vk::ShaderModule, PrimeError> {
    modules.get_or_try_insert((device, source.clone()), || {
        let code = compiler.compile(stage, &source)?;
        let module = sb.new_handle();
        sb.write(Command::CreateShaderModule {
            device,
            module,
            stage,
            code,
        });
        cleanup.push(device, Object::ShaderModule(module));
        log::debug!("created {stage:?} shader module {module:?}");

        Ok::<_, PrimeError>(module)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_info;

    fn element(format: vk::Format, aspect: vk::ImageAspectFlags) -> ElementFormat {
        format_info(format)
            .and_then(|info| info.aspect_format(aspect).cloned())
            .unwrap()
    }

    #[test]
    fn lanes_follow_unpacked_words() {
        let bgra = element(vk::Format::B8G8R8A8_UNORM, vk::ImageAspectFlags::COLOR);
        let lanes = lanes(&bgra);

        let words: Vec<_> = lanes.iter().map(|l| (l.channel, l.word)).collect();
        assert_eq!(
            words,
            [
                (Channel::Blue, 2),
                (Channel::Green, 1),
                (Channel::Red, 0),
                (Channel::Alpha, 3),
            ],
        );
        assert_eq!(words_per_texel(&bgra), 4);

        let depth = element(vk::Format::D24_UNORM_S8_UINT, vk::ImageAspectFlags::DEPTH);
        assert_eq!(lanes_of_one(&depth), (Channel::Depth, NumericKind::Unorm, 24, 0));
        assert_eq!(words_per_texel(&depth), 1);
    }

    fn lanes_of_one(src: &ElementFormat) -> (Channel, NumericKind, u32, u32) {
        let lanes = lanes(src);
        assert_eq!(lanes.len(), 1);

        (lanes[0].channel, lanes[0].kind, lanes[0].bits, lanes[0].word)
    }

    #[test]
    fn fragment_shaders_match_the_aspect() {
        let color = render_fragment_shader(
            &element(vk::Format::R8G8B8A8_UINT, vk::ImageAspectFlags::COLOR),
            vk::ImageAspectFlags::COLOR,
            1,
        );
        assert!(color.contains("out uvec4 color"));
        assert!(color.contains("color = uvec4(t0.x, t0.y, t0.z, t0.w);"));

        let depth = render_fragment_shader(
            &element(vk::Format::D16_UNORM, vk::ImageAspectFlags::DEPTH),
            vk::ImageAspectFlags::DEPTH,
            1,
        );
        assert!(depth.contains("gl_FragDepth = (float(t0.x) / 65535.0);"));
        assert!(!depth.contains("out "));

        let stencil = render_fragment_shader(
            &element(vk::Format::S8_UINT, vk::ImageAspectFlags::STENCIL),
            vk::ImageAspectFlags::STENCIL,
            1,
        );
        assert!(stencil.contains("binding = 1) uniform StencilBit"));
        assert!(stencil.contains("discard;"));
    }

    #[test]
    fn missing_channels_get_defaults() {
        let shader = render_fragment_shader(
            &element(vk::Format::R8_SNORM, vk::ImageAspectFlags::COLOR),
            vk::ImageAspectFlags::COLOR,
            1,
        );

        assert!(shader.contains("vec4(max(float(int(t0.x)) / 127.0, -1.0), 0.0, 0.0, 1.0)"));
    }

    #[test]
    fn srgb_is_decoded_before_writing() {
        let shader = store_compute_shader(
            &element(vk::Format::R8G8B8A8_SRGB, vk::ImageAspectFlags::COLOR),
            "rgba8",
            vk::ImageType::TYPE_2D,
        );

        assert!(shader.contains("float srgb_to_linear(float c)"));
        assert!(shader.contains("srgb_to_linear(float(texelFetch(texels, base + 0).x) / 255.0)"));
    }

    #[test]
    fn compute_shader_addresses_the_image_type() {
        let src = element(vk::Format::R32_UINT, vk::ImageAspectFlags::COLOR);

        let shader = store_compute_shader(&src, "r32ui", vk::ImageType::TYPE_3D);
        assert!(shader.contains("r32ui) uniform writeonly uimage3D target;"));
        assert!(shader.contains("meta.offset.xyz + ivec3(x, y, z)"));
        assert!(shader.contains("local_size_x_id = 0"));

        let shader = store_compute_shader(&src, "r32ui", vk::ImageType::TYPE_1D);
        assert!(shader.contains("uimage1D"));
    }

    #[test]
    fn image_format_qualifiers() {
        assert_eq!(glsl_image_format(vk::Format::R8G8B8A8_UNORM), Some("rgba8"));
        assert_eq!(glsl_image_format(vk::Format::R32_UINT), Some("r32ui"));
        assert_eq!(glsl_image_format(vk::Format::B8G8R8A8_UNORM), None);
        assert_eq!(glsl_image_format(vk::Format::R8G8B8A8_SRGB), None);
    }
}
