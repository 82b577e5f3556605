//! Stage programs as wgpu shader modules, bind group layouts and render pipelines.
//!
//! Layouts are derived from the linked [`ProgramInterface`]: every uniform block,
//! the sampler and every texture land at the slot the shader declared. Pipelines
//! depend on the target format, so they are created on first use per format.

use std::collections::BTreeMap;

use crate::simulation::field::FilterMode;
use crate::simulation::pass::{Binding, Bindings};
use crate::simulation::programs::{BindHandle, LinkedProgram, ProgramInterface, Visibility};
use crate::simulation::reflect::BindSlot;
use crate::simulation::stages::{StageId, VERTEX_ENTRY};

/// An executable stage program.
pub struct GpuProgram {
    pub(super) id: u64,
    pub(super) stage: StageId,
    pub(super) filter: FilterMode,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    fragment_entry: &'static str,
    pub(super) bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
}

impl GpuProgram {
    pub(super) fn new(device: &wgpu::Device, id: u64, linked: &LinkedProgram) -> Self {
        let stage = linked.stage;
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{stage} Vertex Shader")),
            source: wgpu::ShaderSource::Wgsl(linked.vertex.source.into()),
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{stage} Fragment Shader")),
            source: wgpu::ShaderSource::Wgsl(linked.fragment.source.into()),
        });

        let groups = layout_entries(&linked.interface, linked.filter);
        let bind_group_layouts: Vec<wgpu::BindGroupLayout> = groups
            .iter()
            .enumerate()
            .map(|(group, entries)| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{stage} Bind Group Layout {group}")),
                    entries,
                })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{stage} Pipeline Layout")),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        Self {
            id,
            stage,
            filter: linked.filter,
            vertex,
            fragment,
            fragment_entry: linked.fragment_entry,
            bind_group_layouts,
            pipeline_layout,
        }
    }

    /// Fullscreen triangle, no vertex buffers, no blending.
    pub(super) fn create_pipeline(&self, device: &wgpu::Device, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{} Pipeline ({format:?})", self.stage)),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.vertex,
                entry_point: Some(VERTEX_ENTRY),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.fragment,
                entry_point: Some(self.fragment_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        })
    }
}

fn shader_stages(visibility: Visibility) -> wgpu::ShaderStages {
    match visibility {
        Visibility::Vertex => wgpu::ShaderStages::VERTEX,
        Visibility::Fragment => wgpu::ShaderStages::FRAGMENT,
    }
}

/// Layout entries per bind group, indexed by group number. Gaps get empty groups.
fn layout_entries(interface: &ProgramInterface, filter: FilterMode) -> Vec<Vec<wgpu::BindGroupLayoutEntry>> {
    let mut slots: BTreeMap<BindSlot, wgpu::BindGroupLayoutEntry> = BTreeMap::new();

    for uniform in &interface.uniforms {
        slots.insert(
            uniform.slot,
            wgpu::BindGroupLayoutEntry {
                binding: uniform.slot.binding,
                visibility: shader_stages(uniform.visibility),
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        );
    }

    if let Some(slot) = interface.sampler {
        let ty = match filter {
            FilterMode::Linear => wgpu::SamplerBindingType::Filtering,
            FilterMode::Nearest => wgpu::SamplerBindingType::NonFiltering,
        };
        slots.insert(
            slot,
            wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(ty),
                count: None,
            },
        );
    }

    for (slot, _) in interface.textures() {
        slots.insert(
            slot,
            wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float {
                        filterable: filter == FilterMode::Linear,
                    },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
        );
    }

    let group_count = slots.keys().map(|s| s.group + 1).max().unwrap_or(0) as usize;
    let mut groups = vec![Vec::new(); group_count];
    for (slot, entry) in slots {
        groups[slot.group as usize].push(entry);
    }
    groups
}

/// Uniform blocks are sized up to a 16-byte multiple.
fn block_size(size: u32) -> usize {
    (size.max(16) as usize).div_ceil(16) * 16
}

/// Pack the scalar bindings into one byte buffer per uniform block.
pub fn pack_uniforms<F>(interface: &ProgramInterface, bindings: &Bindings<'_, F>) -> Vec<Vec<u8>> {
    let mut blocks: Vec<Vec<u8>> = interface
        .uniforms
        .iter()
        .map(|u| vec![0u8; block_size(u.size)])
        .collect();

    for (param, binding) in bindings.iter() {
        let value: Vec<f32> = match binding {
            Binding::Float(v) => vec![v],
            Binding::Vec2(v) => v.to_array().to_vec(),
            Binding::Vec3(v) => v.to_array().to_vec(),
            Binding::Texture(_) => continue,
        };
        let bytes: &[u8] = bytemuck::cast_slice(&value);
        for handle in interface.handles(param) {
            if let BindHandle::Uniform { block, offset } = *handle {
                let offset = offset as usize;
                blocks[block][offset..offset + bytes.len()].copy_from_slice(bytes);
            }
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::programs::{fragment_entry_for, link};
    use crate::simulation::stages::{Param, BASE_VERTEX_SOURCE};
    use glam::{Vec2, Vec3};

    struct NoField;

    fn interface(stage: StageId, filter: FilterMode) -> ProgramInterface {
        link(
            stage,
            BASE_VERTEX_SOURCE,
            stage.fragment_source(),
            fragment_entry_for(stage, filter),
            filter,
        )
        .unwrap()
        .interface
    }

    #[test]
    fn test_splat_uniforms_are_packed_at_reflected_offsets() {
        let interface = interface(StageId::Splat, FilterMode::Linear);
        let bindings: Bindings<'_, NoField> = Bindings::new()
            .vec2(Param::TexelSize, Vec2::new(0.5, 0.25))
            .vec3(Param::Color, Vec3::new(1.0, 2.0, 3.0))
            .float(Param::AspectRatio, 1.5)
            .vec2(Param::Point, Vec2::new(0.1, 0.2))
            .float(Param::Radius, 0.005);
        let blocks = pack_uniforms(&interface, &bindings);
        assert_eq!(blocks.len(), interface.uniforms.len());

        let fragment = interface
            .uniforms
            .iter()
            .position(|u| u.visibility == Visibility::Fragment)
            .unwrap();
        let floats: &[f32] = bytemuck::cast_slice(&blocks[fragment]);
        assert_eq!(&floats[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(floats[3], 1.5);
        assert_eq!(&floats[4..6], &[0.1, 0.2]);
        assert_eq!(floats[6], 0.005);

        let vertex = interface
            .uniforms
            .iter()
            .position(|u| u.visibility == Visibility::Vertex)
            .unwrap();
        let floats: &[f32] = bytemuck::cast_slice(&blocks[vertex]);
        assert_eq!(&floats[0..2], &[0.5, 0.25]);
    }

    #[test]
    fn test_layouts_follow_declared_groups() {
        let interface = interface(StageId::Display, FilterMode::Nearest);
        let groups = layout_entries(&interface, FilterMode::Nearest);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        // params, sampler, density, top, bottom
        assert_eq!(groups[1].len(), 5);
        assert!(matches!(
            groups[1][1].ty,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering)
        ));
        assert!(matches!(
            groups[1][2].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                ..
            }
        ));
    }

    #[test]
    fn test_block_size_rounds_to_sixteen() {
        assert_eq!(block_size(8), 16);
        assert_eq!(block_size(16), 16);
        assert_eq!(block_size(20), 32);
    }
}
