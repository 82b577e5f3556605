//! wgpu backend.
//!
//! Every pass is one render pass drawing a fullscreen triangle into the target
//! texture. Passes are recorded into a single command encoder that is submitted
//! once per tick, so program order is execution order.

pub mod pipelines;
pub mod targets;

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use pipelines::{pack_uniforms, GpuProgram};
pub use targets::GpuField;
use targets::{create_texture, decode_texels, padded_bytes_per_row, support_from_features, texture_format};

use super::backend::FluidBackend;
use super::field::{ChannelLayout, FieldDesc, FieldFormat, FilterMode, FormatSupport, Precision};
use super::pass::{Binding, FieldHandle, Pass, PassTarget};
use super::programs::{BindHandle, LinkedProgram, ProgramInterface};

/// Failed to get a device to run on.
#[derive(Debug, thiserror::Error)]
pub enum GpuInitError {
    #[error("no suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

/// Request a device with the optional float-texture features the adapter offers.
pub async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), wgpu::RequestDeviceError> {
    let wanted = wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES | wgpu::Features::FLOAT32_FILTERABLE;
    let required_features = adapter.features() & wanted;
    log::debug!("Requesting device with {:?}", required_features);

    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("Fluid Reveal Device"),
            required_features,
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        })
        .await
}

struct ScreenTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

pub struct GpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    encoder: Option<wgpu::CommandEncoder>,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    pipelines: HashMap<(u64, wgpu::TextureFormat), wgpu::RenderPipeline>,
    screen: Option<ScreenTarget>,
    next_id: u64,
}

impl GpuBackend {
    pub fn new(adapter: wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let sampler = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("Fluid Linear Sampler", wgpu::FilterMode::Linear);
        let nearest_sampler = sampler("Fluid Nearest Sampler", wgpu::FilterMode::Nearest);

        Self {
            adapter,
            device,
            queue,
            encoder: None,
            linear_sampler,
            nearest_sampler,
            pipelines: HashMap::new(),
            screen: None,
            next_id: 0,
        }
    }

    /// A backend with no surface, for offscreen use.
    pub async fn headless() -> Result<Self, GpuInitError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        let (device, queue) = request_device(&adapter).await?;
        Ok(Self::new(adapter, device, queue))
    }

    /// Where `Screen` passes draw until the next call. Usually the current swapchain view.
    pub fn set_screen(&mut self, view: wgpu::TextureView, format: wgpu::TextureFormat) {
        self.screen = Some(ScreenTarget { view, format });
    }

    pub fn clear_screen(&mut self) {
        self.screen = None;
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_encoder(&self) -> wgpu::CommandEncoder {
        self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fluid Step Encoder"),
        })
    }

    fn sampler(&self, filter: FilterMode) -> &wgpu::Sampler {
        match filter {
            FilterMode::Linear => &self.linear_sampler,
            FilterMode::Nearest => &self.nearest_sampler,
        }
    }

    fn bind_groups(
        &self,
        program: &GpuProgram,
        interface: &ProgramInterface,
        pass: &Pass<'_, GpuField>,
    ) -> Vec<wgpu::BindGroup> {
        let buffers: Vec<wgpu::Buffer> = pack_uniforms(interface, &pass.bindings)
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{} Uniforms {i}", program.stage)),
                    contents: bytes,
                    usage: wgpu::BufferUsages::UNIFORM,
                })
            })
            .collect();

        let mut entries: Vec<Vec<wgpu::BindGroupEntry<'_>>> = vec![Vec::new(); program.bind_group_layouts.len()];
        for (block, layout) in interface.uniforms.iter().enumerate() {
            entries[layout.slot.group as usize].push(wgpu::BindGroupEntry {
                binding: layout.slot.binding,
                resource: buffers[block].as_entire_binding(),
            });
        }
        if let Some(slot) = interface.sampler {
            entries[slot.group as usize].push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: wgpu::BindingResource::Sampler(self.sampler(program.filter)),
            });
        }
        for (param, binding) in pass.bindings.iter() {
            let Binding::Texture(field) = binding else {
                continue;
            };
            for handle in interface.handles(param) {
                if let BindHandle::Texture { slot } = *handle {
                    entries[slot.group as usize].push(wgpu::BindGroupEntry {
                        binding: slot.binding,
                        resource: wgpu::BindingResource::TextureView(&field.view),
                    });
                }
            }
        }

        entries
            .iter_mut()
            .zip(&program.bind_group_layouts)
            .enumerate()
            .map(|(group, (entries, layout))| {
                entries.sort_by_key(|e| e.binding);
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("{} Bind Group {group}", program.stage)),
                    layout,
                    entries: &entries[..],
                })
            })
            .collect()
    }
}

impl FluidBackend for GpuBackend {
    type Field = GpuField;
    type Program = GpuProgram;

    fn format_support(&self, format: FieldFormat) -> FormatSupport {
        let format = texture_format(format);
        let features = if self
            .device
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            self.adapter.get_texture_format_features(format)
        } else {
            format.guaranteed_format_features(self.device.features())
        };
        support_from_features(features)
    }

    fn create_field(&mut self, desc: &FieldDesc) -> GpuField {
        let id = self.next_id();
        let format = texture_format(desc.format);
        create_texture(
            &self.device,
            id,
            *desc,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            &format!("Fluid Field {id} ({})", desc.format),
        )
    }

    fn release(&mut self, field: GpuField) {
        field.texture.destroy();
    }

    fn create_image(&mut self, width: u32, height: u32, rgba: &[u8]) -> GpuField {
        let id = self.next_id();
        let desc = FieldDesc {
            width,
            height,
            format: FieldFormat::new(ChannelLayout::Rgba, Precision::Full),
            filter: FilterMode::Linear,
        };
        let field = create_texture(
            &self.device,
            id,
            desc,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
            &format!("Reveal Image {id}"),
        );
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &field.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        field
    }

    fn build_program(&mut self, linked: &LinkedProgram) -> Result<GpuProgram, String> {
        let id = self.next_id();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let program = GpuProgram::new(&self.device, id, linked);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(program),
        }
    }

    fn draw(&mut self, program: &GpuProgram, interface: &ProgramInterface, pass: &Pass<'_, GpuField>) {
        let (view, format) = match (&pass.target, &self.screen) {
            (PassTarget::Field(field), _) => (&field.view, field.format),
            (PassTarget::Screen { .. }, Some(screen)) => (&screen.view, screen.format),
            (PassTarget::Screen { .. }, None) => panic!("{}: screen pass with no screen target set", program.stage),
        };
        if !self.pipelines.contains_key(&(program.id, format)) {
            log::debug!("Creating {} pipeline for {:?}", program.stage, format);
            let pipeline = program.create_pipeline(&self.device, format);
            self.pipelines.insert((program.id, format), pipeline);
        }

        let bind_groups = self.bind_groups(program, interface, pass);
        let mut encoder = self.encoder.take().unwrap_or_else(|| self.create_encoder());
        {
            let label = format!("{} Pass", program.stage);
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some(pipeline) = self.pipelines.get(&(program.id, format)) {
                render_pass.set_pipeline(pipeline);
            }
            for (i, group) in bind_groups.iter().enumerate() {
                render_pass.set_bind_group(i as u32, group, &[]);
            }
            render_pass.draw(0..3, 0..1);
        }
        self.encoder = Some(encoder);
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn read_field(&mut self, field: &GpuField) -> Vec<[f32; 4]> {
        let (width, height) = (field.desc().width, field.desc().height);
        let bytes_per_texel = field.format.block_copy_size(None).unwrap_or(4);
        let bytes_per_row = padded_bytes_per_row(width, bytes_per_texel);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Fluid Readback Buffer"),
            size: (bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.encoder.take().unwrap_or_else(|| self.create_encoder());
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &field.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.encoder = Some(encoder);
        self.submit();

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            log::error!("Device poll failed during readback: {e}");
        }
        match rx.try_recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("Failed to map readback buffer: {e}");
                return vec![[0.0; 4]; (width * height) as usize];
            }
            Err(_) => {
                log::error!("Readback buffer map callback never ran");
                return vec![[0.0; 4]; (width * height) as usize];
            }
        }
        let texels = {
            let data = slice.get_mapped_range();
            decode_texels(&data, field.format, width, height, bytes_per_row)
        };
        staging.unmap();
        texels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::pass::Bindings;
    use crate::simulation::programs::ProgramRegistry;
    use crate::config::SimulationConfig;
    use crate::input::Impulse;
    use crate::simulation::cpu::CpuBackend;
    use crate::simulation::render_targets::RenderTargetPool;
    use crate::simulation::stages::{Param, StageId};
    use crate::simulation::stepper::SimulationStepper;
    use glam::{Vec2, Vec3};

    fn backend() -> Option<GpuBackend> {
        match pollster::block_on(GpuBackend::headless()) {
            Ok(backend) => Some(backend),
            Err(e) => {
                eprintln!("Skipping GPU test: {e}");
                None
            }
        }
    }

    #[test]
    fn test_clear_pass_on_gpu() {
        let Some(mut backend) = backend() else {
            return;
        };
        let pool = RenderTargetPool::new(&mut backend, (16, 16), 0).unwrap();
        let registry = ProgramRegistry::build(&mut backend, pool.filter()).unwrap();

        let fields = pool.fields();
        let bindings = Bindings::new()
            .vec2(Param::TexelSize, Vec2::splat(1.0 / 16.0))
            .float(Param::Value, 0.5)
            .texture(Param::InputField, fields.pressure.read());
        registry.run(&mut backend, &Pass::to_field(StageId::Clear, fields.pressure.write(), bindings));

        let texels = backend.read_field(fields.pressure.write());
        assert_eq!(texels.len(), 256);
        assert!(texels.iter().all(|t| t[0] == 0.0));
        assert_eq!(fields.pressure.write().size(), (16, 16));
    }

    /// Largest per-texel difference and the largest magnitude on the reference side.
    fn compare(gpu: &[[f32; 4]], cpu: &[[f32; 4]], channels: usize) -> (f32, f32) {
        assert_eq!(gpu.len(), cpu.len());
        let mut diff = 0.0f32;
        let mut peak = 0.0f32;
        for (g, c) in gpu.iter().zip(cpu) {
            for i in 0..channels {
                diff = diff.max((g[i] - c[i]).abs());
                peak = peak.max(c[i].abs());
            }
        }
        (diff, peak)
    }

    #[test]
    fn test_shaders_match_cpu_kernels() {
        let Some(mut gpu) = backend() else {
            return;
        };
        let size = (48, 32);
        let mut gpu_pool = RenderTargetPool::new(&mut gpu, size, 0).unwrap();
        let gpu_registry = ProgramRegistry::build(&mut gpu, gpu_pool.filter()).unwrap();

        let mut cpu = CpuBackend::new();
        let mut cpu_pool = RenderTargetPool::new(&mut cpu, size, 0).unwrap();
        let cpu_registry = ProgramRegistry::build(&mut cpu, cpu_pool.filter()).unwrap();

        let stepper = SimulationStepper::new(SimulationConfig::default());
        let splat = [Impulse {
            position: Vec2::new(0.4, 0.5),
            velocity_delta: Vec2::new(40.0, -10.0),
            color: Vec3::new(2.0, 1.0, 0.5),
        }];
        for tick in 0..5 {
            let impulses: &[Impulse] = if tick == 0 { &splat } else { &[] };
            stepper.step(&mut gpu, &gpu_registry, &mut gpu_pool, 0.016, impulses);
            gpu.submit();
            stepper.step(&mut cpu, &cpu_registry, &mut cpu_pool, 0.016, impulses);
        }

        let gpu_density = gpu.read_field(gpu_pool.fields().density.read());
        let cpu_density = cpu.read_field(cpu_pool.fields().density.read());
        let (diff, peak) = compare(&gpu_density, &cpu_density, 3);
        assert!(peak > 0.1, "{peak}");
        assert!(diff < 0.05 * peak.max(1.0), "density diff {diff}, peak {peak}");

        let gpu_velocity = gpu.read_field(gpu_pool.fields().velocity.read());
        let cpu_velocity = cpu.read_field(cpu_pool.fields().velocity.read());
        let (diff, peak) = compare(&gpu_velocity, &cpu_velocity, 2);
        assert!(peak > 1.0, "{peak}");
        // Half-float storage over 25 Jacobi iterations drifts more than density.
        assert!(diff < 0.3 * peak, "velocity diff {diff}, peak {peak}");
    }

    #[test]
    fn test_image_upload_round_trips() {
        let Some(mut backend) = backend() else {
            return;
        };
        let image = backend.create_image(2, 1, &[255, 0, 0, 255, 0, 255, 0, 255]);
        let texels = backend.read_field(&image);
        assert_eq!(texels, vec![[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]]);
    }
}
