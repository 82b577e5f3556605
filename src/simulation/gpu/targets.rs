//! Field formats, texture allocation and readback.

use half::f16;

use crate::simulation::field::{ChannelLayout, FieldDesc, FieldFormat, FormatSupport, Precision};
use crate::simulation::pass::FieldHandle;

/// A field resident in a `wgpu::Texture`.
#[derive(Debug)]
pub struct GpuField {
    pub(super) id: u64,
    pub(super) texture: wgpu::Texture,
    pub(super) view: wgpu::TextureView,
    pub(super) format: wgpu::TextureFormat,
    desc: FieldDesc,
}

impl FieldHandle for GpuField {
    fn desc(&self) -> &FieldDesc {
        &self.desc
    }

    fn id(&self) -> u64 {
        self.id
    }
}

pub fn texture_format(format: FieldFormat) -> wgpu::TextureFormat {
    match (format.layout, format.precision) {
        (ChannelLayout::R, Precision::Half) => wgpu::TextureFormat::R16Float,
        (ChannelLayout::R, Precision::Full) => wgpu::TextureFormat::R32Float,
        (ChannelLayout::Rg, Precision::Half) => wgpu::TextureFormat::Rg16Float,
        (ChannelLayout::Rg, Precision::Full) => wgpu::TextureFormat::Rg32Float,
        (ChannelLayout::Rgba, Precision::Half) => wgpu::TextureFormat::Rgba16Float,
        (ChannelLayout::Rgba, Precision::Full) => wgpu::TextureFormat::Rgba32Float,
    }
}

/// Renderable means both a color attachment and a sampled texture.
pub fn support_from_features(features: wgpu::TextureFormatFeatures) -> FormatSupport {
    let usages = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
    FormatSupport {
        renderable: features.allowed_usages.contains(usages),
        filterable: features
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE),
    }
}

pub(super) fn create_texture(
    device: &wgpu::Device,
    id: u64,
    desc: FieldDesc,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
    label: &str,
) -> GpuField {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuField {
        id,
        texture,
        view,
        format,
        desc,
    }
}

/// Copy rows are padded to this many bytes.
pub(super) fn padded_bytes_per_row(width: u32, bytes_per_texel: u32) -> u32 {
    let unpadded = width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Decode one padded row-major copy into RGBA, missing channels zero.
pub(super) fn decode_texels(
    data: &[u8],
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    bytes_per_row: u32,
) -> Vec<[f32; 4]> {
    let (channels, decode): (usize, fn(&[u8]) -> f32) = match format {
        wgpu::TextureFormat::R16Float => (1, decode_f16),
        wgpu::TextureFormat::Rg16Float => (2, decode_f16),
        wgpu::TextureFormat::Rgba16Float => (4, decode_f16),
        wgpu::TextureFormat::R32Float => (1, decode_f32),
        wgpu::TextureFormat::Rg32Float => (2, decode_f32),
        wgpu::TextureFormat::Rgba32Float => (4, decode_f32),
        wgpu::TextureFormat::Rgba8Unorm => (4, decode_unorm8),
        other => panic!("no readback decoder for {other:?}"),
    };
    let channel_bytes = match format {
        wgpu::TextureFormat::Rgba8Unorm => 1,
        wgpu::TextureFormat::R16Float | wgpu::TextureFormat::Rg16Float | wgpu::TextureFormat::Rgba16Float => 2,
        _ => 4,
    };
    let texel_bytes = channels * channel_bytes;

    let mut texels = Vec::with_capacity((width * height) as usize);
    for row in data.chunks(bytes_per_row as usize).take(height as usize) {
        for texel in row[..width as usize * texel_bytes].chunks_exact(texel_bytes) {
            let mut out = [0.0; 4];
            for (c, bytes) in texel.chunks_exact(channel_bytes).enumerate() {
                out[c] = decode(bytes);
            }
            texels.push(out);
        }
    }
    texels
}

fn decode_f16(bytes: &[u8]) -> f32 {
    f16::from_le_bytes([bytes[0], bytes[1]]).to_f32()
}

fn decode_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn decode_unorm8(bytes: &[u8]) -> f32 {
    bytes[0] as f32 / 255.0
}
