//! WGSL front-end: parse, validate and reflect one shader module with naga.
//!
//! Reflection flattens every `var<uniform>` struct into its members (each member
//! is one parameter) and records sampled textures, samplers, and the `@location`
//! interface of each entry point. Linking two of these into a program happens in
//! [`super::programs`].

use std::fmt;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::stages::{ParamKind, StageId};

/// Which half of a program a shader source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderKind::Vertex => f.write_str("vertex"),
            ShaderKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// A source failed to parse or validate.
#[derive(Debug, thiserror::Error)]
#[error("{stage} {kind} shader failed to compile:\n{diagnostic}")]
pub struct ShaderCompileError {
    pub stage: StageId,
    pub kind: ShaderKind,
    pub diagnostic: String,
}

/// `@group(g) @binding(b)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindSlot {
    pub group: u32,
    pub binding: u32,
}

impl fmt::Display for BindSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@group({}) @binding({})", self.group, self.binding)
    }
}

/// Type of a uniform member as far as the solver cares.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberType {
    Known(ParamKind),
    /// Anything that isn't an f32 scalar, vec2 or vec3. Carries a readable name.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub ty: MemberType,
}

/// One `var<uniform>` struct.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    pub slot: BindSlot,
    /// Size in bytes as laid out by WGSL rules.
    pub size: u32,
    pub members: Vec<UniformMember>,
}

/// A `texture_2d<f32>` global.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureGlobal {
    pub name: String,
    pub slot: BindSlot,
}

/// `@location(n)` value flowing between stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Varying {
    pub location: u32,
    pub ty: naga::TypeInner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPointInfo {
    pub name: String,
    pub stage: naga::ShaderStage,
    pub inputs: Vec<Varying>,
    pub outputs: Vec<Varying>,
}

/// Everything the linker needs to know about one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleInterface {
    pub uniforms: Vec<UniformBlock>,
    pub textures: Vec<TextureGlobal>,
    pub samplers: Vec<BindSlot>,
    /// Globals of any other kind (storage buffers and so on).
    pub other_globals: Vec<(String, BindSlot)>,
    pub entry_points: Vec<EntryPointInfo>,
}

impl ModuleInterface {
    pub fn entry_point(&self, name: &str) -> Option<&EntryPointInfo> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    /// Every slot this module binds, with a label for diagnostics.
    pub fn bound_slots(&self) -> impl Iterator<Item = (BindSlot, String)> + '_ {
        let uniforms = self.uniforms.iter().map(|u| (u.slot, "uniform block".to_string()));
        let textures = self.textures.iter().map(|t| (t.slot, t.name.clone()));
        let samplers = self.samplers.iter().map(|s| (*s, "sampler".to_string()));
        let other = self.other_globals.iter().map(|(name, slot)| (*slot, name.clone()));
        uniforms.chain(textures).chain(samplers).chain(other)
    }
}

/// A parsed, validated and reflected shader source.
#[derive(Debug)]
pub struct CompiledShader {
    pub kind: ShaderKind,
    pub source: &'static str,
    pub module: naga::Module,
    pub interface: ModuleInterface,
}

/// Parse and validate `source`, then reflect its interface.
pub fn compile_shader(
    stage: StageId,
    kind: ShaderKind,
    source: &'static str,
) -> Result<CompiledShader, ShaderCompileError> {
    let fail = |diagnostic: String| ShaderCompileError {
        stage,
        kind,
        diagnostic,
    };

    let module = naga::front::wgsl::parse_str(source).map_err(|e| fail(e.emit_to_string(source)))?;

    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| fail(e.emit_to_string(source)))?;

    let interface = reflect_module(&module);
    log::debug!(
        "Compiled {stage} {kind} shader: {} uniform block(s), {} texture(s), {} entry point(s)",
        interface.uniforms.len(),
        interface.textures.len(),
        interface.entry_points.len()
    );

    Ok(CompiledShader {
        kind,
        source,
        module,
        interface,
    })
}

fn reflect_module(module: &naga::Module) -> ModuleInterface {
    let mut interface = ModuleInterface::default();

    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let slot = BindSlot {
            group: binding.group,
            binding: binding.binding,
        };
        let name = global.name.clone().unwrap_or_default();
        let inner = &module.types[global.ty].inner;

        match (global.space, inner) {
            (naga::AddressSpace::Uniform, naga::TypeInner::Struct { members, span }) => {
                let members = members
                    .iter()
                    .map(|m| UniformMember {
                        name: m.name.clone().unwrap_or_default(),
                        offset: m.offset,
                        ty: member_type(&module.types[m.ty].inner),
                    })
                    .collect();
                interface.uniforms.push(UniformBlock {
                    slot,
                    size: *span,
                    members,
                });
            }
            (naga::AddressSpace::Uniform, other) => {
                // A bare uniform is a single member named after the variable.
                interface.uniforms.push(UniformBlock {
                    slot,
                    size: other.size(module.to_ctx()),
                    members: vec![UniformMember {
                        name,
                        offset: 0,
                        ty: member_type(other),
                    }],
                });
            }
            (naga::AddressSpace::Handle, naga::TypeInner::Image { .. }) => {
                interface.textures.push(TextureGlobal { name, slot });
            }
            (naga::AddressSpace::Handle, naga::TypeInner::Sampler { .. }) => {
                interface.samplers.push(slot);
            }
            _ => interface.other_globals.push((name, slot)),
        }
    }

    for ep in &module.entry_points {
        let mut inputs = Vec::new();
        for arg in &ep.function.arguments {
            collect_varyings(module, arg.ty, arg.binding.as_ref(), &mut inputs);
        }
        let mut outputs = Vec::new();
        if let Some(result) = &ep.function.result {
            collect_varyings(module, result.ty, result.binding.as_ref(), &mut outputs);
        }
        interface.entry_points.push(EntryPointInfo {
            name: ep.name.clone(),
            stage: ep.stage,
            inputs,
            outputs,
        });
    }

    interface
}

fn member_type(inner: &naga::TypeInner) -> MemberType {
    match *inner {
        naga::TypeInner::Scalar(scalar) if scalar == naga::Scalar::F32 => MemberType::Known(ParamKind::Float),
        naga::TypeInner::Vector { size, scalar } if scalar == naga::Scalar::F32 => match size {
            naga::VectorSize::Bi => MemberType::Known(ParamKind::Vec2),
            naga::VectorSize::Tri => MemberType::Known(ParamKind::Vec3),
            _ => MemberType::Unsupported(format!("{inner:?}")),
        },
        ref other => MemberType::Unsupported(format!("{other:?}")),
    }
}

/// Struct arguments/results carry their bindings on the members.
fn collect_varyings(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    out: &mut Vec<Varying>,
) {
    let inner = &module.types[ty].inner;
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(Varying {
            location: *location,
            ty: inner.clone(),
        }),
        Some(_) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = inner {
                for member in members {
                    collect_varyings(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}
