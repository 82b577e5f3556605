//! Program compilation, linking and the fixed registry of solver stages.
//!
//! A program is the shared fullscreen vertex stage plus one fragment stage. Linking
//! checks the two halves against each other and against the solver's closed
//! parameter set, producing a [`ProgramInterface`] that maps each [`Param`] to the
//! places it must be written. Backends turn a [`LinkedProgram`] into their own
//! executable artifact.

use std::collections::HashMap;

use super::backend::FluidBackend;
use super::field::FilterMode;
use super::pass::{check_pass, Pass};
use super::reflect::{
    compile_shader, BindSlot, CompiledShader, MemberType, ShaderCompileError, ShaderKind,
};
use super::stages::{
    Param, ParamKind, StageId, BASE_VERTEX_SOURCE, FRAGMENT_ENTRY, MANUAL_FILTERING_ENTRY,
    VERTEX_ENTRY,
};

/// The two halves of a program don't fit together.
#[derive(Debug, thiserror::Error)]
pub enum ProgramLinkError {
    #[error("{stage}: {kind} entry point `{entry}` not found")]
    MissingEntryPoint {
        stage: StageId,
        kind: ShaderKind,
        entry: String,
    },
    #[error("{stage}: fragment input @location({location}) is not produced by the vertex stage with the same type")]
    UnmatchedVarying { stage: StageId, location: u32 },
    #[error("{stage}: `{name}` is not a known solver parameter")]
    UnknownParameter { stage: StageId, name: String },
    #[error("{stage}: required parameter `{}` is not declared", .param.shader_name())]
    MissingParameter { stage: StageId, param: Param },
    #[error("{stage}: parameter `{name}` has unsupported type {found}")]
    UnsupportedParameterType {
        stage: StageId,
        name: String,
        found: String,
    },
    #[error("{stage}: {slot} is declared by both `{first}` and `{second}`")]
    BindingConflict {
        stage: StageId,
        slot: BindSlot,
        first: String,
        second: String,
    },
    #[error("{stage}: backend rejected the program: {message}")]
    Backend { stage: StageId, message: String },
}

/// Any failure while building a program.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error(transparent)]
    Compile(#[from] ShaderCompileError),
    #[error(transparent)]
    Link(#[from] ProgramLinkError),
}

/// Which shader stage reads a uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Vertex,
    Fragment,
}

/// Byte layout of one uniform block the program reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub slot: BindSlot,
    pub size: u32,
    pub visibility: Visibility,
}

/// Where a parameter value has to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindHandle {
    /// Member of `uniforms[block]` at `offset` bytes.
    Uniform { block: usize, offset: u32 },
    /// Sampled texture at `slot`.
    Texture { slot: BindSlot },
}

/// The linked parameter interface of one program.
#[derive(Debug, Clone)]
pub struct ProgramInterface {
    pub stage: StageId,
    pub uniforms: Vec<UniformLayout>,
    pub sampler: Option<BindSlot>,
    params: HashMap<Param, Vec<BindHandle>>,
}

impl ProgramInterface {
    pub fn declares(&self, param: Param) -> bool {
        self.params.contains_key(&param)
    }

    /// Bind handles for `param`, empty if it isn't declared.
    pub fn handles(&self, param: Param) -> &[BindHandle] {
        self.params.get(&param).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn declared_params(&self) -> impl Iterator<Item = Param> + '_ {
        self.params.keys().copied()
    }

    /// Textures in binding order.
    pub fn textures(&self) -> Vec<(BindSlot, Param)> {
        let mut textures: Vec<_> = self
            .params
            .iter()
            .flat_map(|(param, handles)| {
                handles.iter().filter_map(move |h| match h {
                    BindHandle::Texture { slot } => Some((*slot, *param)),
                    BindHandle::Uniform { .. } => None,
                })
            })
            .collect();
        textures.sort_by_key(|(slot, _)| *slot);
        textures
    }
}

/// A program whose halves compiled and linked.
#[derive(Debug)]
pub struct LinkedProgram {
    pub stage: StageId,
    pub vertex: CompiledShader,
    pub fragment: CompiledShader,
    pub fragment_entry: &'static str,
    pub filter: FilterMode,
    pub interface: ProgramInterface,
}

/// Fragment entry point used for `stage` under `filter`.
pub fn fragment_entry_for(stage: StageId, filter: FilterMode) -> &'static str {
    match (stage, filter) {
        (StageId::Advection, FilterMode::Nearest) => MANUAL_FILTERING_ENTRY,
        _ => FRAGMENT_ENTRY,
    }
}

/// Compile both halves of `stage` and link them.
pub fn link(
    stage: StageId,
    vertex_source: &'static str,
    fragment_source: &'static str,
    fragment_entry: &'static str,
    filter: FilterMode,
) -> Result<LinkedProgram, ProgramError> {
    let vertex = compile_shader(stage, ShaderKind::Vertex, vertex_source)?;
    let fragment = compile_shader(stage, ShaderKind::Fragment, fragment_source)?;
    let interface = link_interface(stage, &vertex, &fragment, fragment_entry)?;

    Ok(LinkedProgram {
        stage,
        vertex,
        fragment,
        fragment_entry,
        filter,
        interface,
    })
}

fn link_interface(
    stage: StageId,
    vertex: &CompiledShader,
    fragment: &CompiledShader,
    fragment_entry: &str,
) -> Result<ProgramInterface, ProgramLinkError> {
    let vs = vertex
        .interface
        .entry_point(VERTEX_ENTRY)
        .filter(|ep| ep.stage == naga::ShaderStage::Vertex)
        .ok_or_else(|| ProgramLinkError::MissingEntryPoint {
            stage,
            kind: ShaderKind::Vertex,
            entry: VERTEX_ENTRY.to_string(),
        })?;
    let fs = fragment
        .interface
        .entry_point(fragment_entry)
        .filter(|ep| ep.stage == naga::ShaderStage::Fragment)
        .ok_or_else(|| ProgramLinkError::MissingEntryPoint {
            stage,
            kind: ShaderKind::Fragment,
            entry: fragment_entry.to_string(),
        })?;

    for input in &fs.inputs {
        if !vs.outputs.iter().any(|out| out == input) {
            return Err(ProgramLinkError::UnmatchedVarying {
                stage,
                location: input.location,
            });
        }
    }

    let mut seen: HashMap<BindSlot, String> = HashMap::new();
    for (slot, label) in vertex
        .interface
        .bound_slots()
        .chain(fragment.interface.bound_slots())
    {
        if let Some(first) = seen.insert(slot, label.clone()) {
            return Err(ProgramLinkError::BindingConflict {
                stage,
                slot,
                first,
                second: label,
            });
        }
    }

    let mut uniforms = Vec::new();
    let mut params: HashMap<Param, Vec<BindHandle>> = HashMap::new();

    for (shader, visibility) in [(vertex, Visibility::Vertex), (fragment, Visibility::Fragment)] {
        for block in &shader.interface.uniforms {
            let index = uniforms.len();
            uniforms.push(UniformLayout {
                slot: block.slot,
                size: block.size,
                visibility,
            });
            for member in &block.members {
                let param = Param::from_shader_name(&member.name).ok_or_else(|| {
                    ProgramLinkError::UnknownParameter {
                        stage,
                        name: member.name.clone(),
                    }
                })?;
                let found = match &member.ty {
                    MemberType::Known(kind) if *kind == param.kind() => None,
                    MemberType::Known(kind) => Some(format!("{kind:?}")),
                    MemberType::Unsupported(name) => Some(name.clone()),
                };
                if let Some(found) = found {
                    return Err(ProgramLinkError::UnsupportedParameterType {
                        stage,
                        name: member.name.clone(),
                        found,
                    });
                }
                params.entry(param).or_default().push(BindHandle::Uniform {
                    block: index,
                    offset: member.offset,
                });
            }
        }

        for texture in &shader.interface.textures {
            let param = Param::from_shader_name(&texture.name).ok_or_else(|| {
                ProgramLinkError::UnknownParameter {
                    stage,
                    name: texture.name.clone(),
                }
            })?;
            if param.kind() != ParamKind::Texture {
                return Err(ProgramLinkError::UnsupportedParameterType {
                    stage,
                    name: texture.name.clone(),
                    found: "texture".to_string(),
                });
            }
            params
                .entry(param)
                .or_default()
                .push(BindHandle::Texture { slot: texture.slot });
        }
    }

    if let Some((name, _)) = vertex
        .interface
        .other_globals
        .iter()
        .chain(fragment.interface.other_globals.iter())
        .next()
    {
        return Err(ProgramLinkError::UnsupportedParameterType {
            stage,
            name: name.clone(),
            found: "resource".to_string(),
        });
    }

    for &param in stage.required_params() {
        if !params.contains_key(&param) {
            return Err(ProgramLinkError::MissingParameter { stage, param });
        }
    }

    let sampler = vertex
        .interface
        .samplers
        .iter()
        .chain(fragment.interface.samplers.iter())
        .next()
        .copied();

    Ok(ProgramInterface {
        stage,
        uniforms,
        sampler,
        params,
    })
}

struct RegisteredProgram<P> {
    interface: ProgramInterface,
    program: P,
}

/// The nine compiled stage programs, addressed by [`StageId`].
pub struct ProgramRegistry<P> {
    programs: Vec<RegisteredProgram<P>>,
    filter: FilterMode,
}

impl<P> ProgramRegistry<P> {
    /// Compile every stage, failing on the first error.
    pub fn build<B>(backend: &mut B, filter: FilterMode) -> Result<Self, ProgramError>
    where
        B: FluidBackend<Program = P>,
    {
        let mut programs = Vec::with_capacity(StageId::ALL.len());
        for stage in StageId::ALL {
            let linked = link(
                stage,
                BASE_VERTEX_SOURCE,
                stage.fragment_source(),
                fragment_entry_for(stage, filter),
                filter,
            )?;
            let program = backend
                .build_program(&linked)
                .map_err(|message| ProgramLinkError::Backend { stage, message })?;
            log::debug!("Built {stage} program ({})", linked.fragment_entry);
            programs.push(RegisteredProgram {
                interface: linked.interface,
                program,
            });
        }
        log::info!("Program registry ready: {} stages, {:?} filtering", programs.len(), filter);
        Ok(Self { programs, filter })
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    /// Validate the bindings of `pass` and issue it.
    ///
    /// # Panics
    /// If the bindings don't match the program (see [`check_pass`]).
    pub fn run<B>(&self, backend: &mut B, pass: &Pass<'_, B::Field>)
    where
        B: FluidBackend<Program = P>,
    {
        let entry = &self.programs[pass.stage.index()];
        check_pass(&entry.interface, pass);
        backend.draw(&entry.program, &entry.interface, pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_fragment(stage: StageId, source: &'static str) -> Result<LinkedProgram, ProgramError> {
        link(stage, BASE_VERTEX_SOURCE, source, FRAGMENT_ENTRY, FilterMode::Linear)
    }

    #[test]
    fn test_all_stages_link() {
        for filter in [FilterMode::Linear, FilterMode::Nearest] {
            for stage in StageId::ALL {
                let linked = link(
                    stage,
                    BASE_VERTEX_SOURCE,
                    stage.fragment_source(),
                    fragment_entry_for(stage, filter),
                    filter,
                );
                assert!(linked.is_ok(), "{stage}: {:?}", linked.err());
            }
        }
    }

    #[test]
    fn test_texel_size_is_bound_in_both_stages_for_advection() {
        let linked = link_fragment(StageId::Advection, StageId::Advection.fragment_source()).unwrap();
        let handles = linked.interface.handles(Param::TexelSize);
        assert_eq!(handles.len(), 2);

        let visibilities: Vec<_> = handles
            .iter()
            .map(|h| match h {
                BindHandle::Uniform { block, .. } => linked.interface.uniforms[*block].visibility,
                BindHandle::Texture { .. } => panic!("texel_size bound as texture"),
            })
            .collect();
        assert!(visibilities.contains(&Visibility::Vertex));
        assert!(visibilities.contains(&Visibility::Fragment));
    }

    #[test]
    fn test_advection_uses_manual_filtering_when_nearest() {
        assert_eq!(fragment_entry_for(StageId::Advection, FilterMode::Nearest), MANUAL_FILTERING_ENTRY);
        assert_eq!(fragment_entry_for(StageId::Advection, FilterMode::Linear), FRAGMENT_ENTRY);
        assert_eq!(fragment_entry_for(StageId::Pressure, FilterMode::Nearest), FRAGMENT_ENTRY);
    }

    #[test]
    fn test_unknown_parameter_is_rejected() {
        let source = r#"
            struct Params { strength: f32 };
            @group(1) @binding(0) var<uniform> params: Params;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(params.strength); }
        "#;
        match link_fragment(StageId::Clear, source) {
            Err(ProgramError::Link(ProgramLinkError::UnknownParameter { name, .. })) => {
                assert_eq!(name, "strength")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_parameter_is_rejected() {
        let source = r#"
            struct Params { value: f32 };
            @group(1) @binding(0) var<uniform> params: Params;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(params.value); }
        "#;
        match link_fragment(StageId::Clear, source) {
            Err(ProgramError::Link(ProgramLinkError::MissingParameter { param, .. })) => {
                assert_eq!(param, Param::InputField)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_parameter_type_is_rejected() {
        let source = r#"
            struct Params { value: vec2<f32> };
            @group(1) @binding(0) var<uniform> params: Params;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(params.value, 0.0, 0.0); }
        "#;
        assert!(matches!(
            link_fragment(StageId::Clear, source),
            Err(ProgramError::Link(ProgramLinkError::UnsupportedParameterType { .. }))
        ));
    }

    #[test]
    fn test_binding_shared_with_vertex_stage_conflicts() {
        let source = r#"
            struct Params { value: f32 };
            @group(0) @binding(0) var<uniform> params: Params;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(params.value); }
        "#;
        assert!(matches!(
            link_fragment(StageId::Clear, source),
            Err(ProgramError::Link(ProgramLinkError::BindingConflict { .. }))
        ));
    }

    #[test]
    fn test_unmatched_varying_is_rejected() {
        let source = r#"
            @fragment fn fs_main(@location(7) extra: vec2<f32>) -> @location(0) vec4<f32> {
                return vec4<f32>(extra, 0.0, 1.0);
            }
        "#;
        match link_fragment(StageId::Curl, source) {
            Err(ProgramError::Link(ProgramLinkError::UnmatchedVarying { location, .. })) => {
                assert_eq!(location, 7)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_entry_point_is_rejected() {
        let linked = link(
            StageId::Curl,
            BASE_VERTEX_SOURCE,
            StageId::Curl.fragment_source(),
            "fs_other",
            FilterMode::Linear,
        );
        assert!(matches!(
            linked,
            Err(ProgramError::Link(ProgramLinkError::MissingEntryPoint {
                kind: ShaderKind::Fragment,
                ..
            }))
        ));
    }

    #[test]
    fn test_broken_source_is_a_compile_error() {
        match link_fragment(StageId::Splat, "fn broken( {") {
            Err(ProgramError::Compile(err)) => {
                assert_eq!(err.stage, StageId::Splat);
                assert_eq!(err.kind, ShaderKind::Fragment);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
