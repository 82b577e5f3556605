//! One draw of one stage program: its target and its explicit binding table.

use glam::{Vec2, Vec3};

use super::field::FieldDesc;
use super::programs::ProgramInterface;
use super::stages::{Param, ParamKind, StageId};

/// Backend field types expose their shape and a stable identity.
pub trait FieldHandle {
    fn desc(&self) -> &FieldDesc;

    /// Unique for the lifetime of the backend; never reused.
    fn id(&self) -> u64;

    fn size(&self) -> (u32, u32) {
        let desc = self.desc();
        (desc.width, desc.height)
    }
}

/// A value bound to a parameter for one draw.
#[derive(Debug)]
pub enum Binding<'a, F> {
    Texture(&'a F),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
}

// Manual impls: `F` itself doesn't need to be Copy.
impl<F> Clone for Binding<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for Binding<'_, F> {}

impl<F> Binding<'_, F> {
    pub fn kind(&self) -> ParamKind {
        match self {
            Binding::Texture(_) => ParamKind::Texture,
            Binding::Float(_) => ParamKind::Float,
            Binding::Vec2(_) => ParamKind::Vec2,
            Binding::Vec3(_) => ParamKind::Vec3,
        }
    }
}

/// Parameter values for one draw.
#[derive(Debug)]
pub struct Bindings<'a, F> {
    entries: Vec<(Param, Binding<'a, F>)>,
}

impl<F> Default for Bindings<'_, F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<'a, F> Bindings<'a, F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(self, param: Param, field: &'a F) -> Self {
        self.with(param, Binding::Texture(field))
    }

    pub fn float(self, param: Param, value: f32) -> Self {
        self.with(param, Binding::Float(value))
    }

    pub fn vec2(self, param: Param, value: Vec2) -> Self {
        self.with(param, Binding::Vec2(value))
    }

    pub fn vec3(self, param: Param, value: Vec3) -> Self {
        self.with(param, Binding::Vec3(value))
    }

    /// Bind `param`, replacing an earlier value.
    pub fn with(mut self, param: Param, binding: Binding<'a, F>) -> Self {
        match self.entries.iter_mut().find(|(p, _)| *p == param) {
            Some(entry) => entry.1 = binding,
            None => self.entries.push((param, binding)),
        }
        self
    }

    pub fn get(&self, param: Param) -> Option<Binding<'a, F>> {
        self.entries
            .iter()
            .find(|(p, _)| *p == param)
            .map(|(_, binding)| *binding)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Param, Binding<'a, F>)> + '_ {
        self.entries.iter().map(|(p, b)| (*p, *b))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where a pass draws.
#[derive(Debug)]
pub enum PassTarget<'a, F> {
    Field(&'a F),
    /// The presentation surface (GPU) or the software frame (CPU).
    Screen { width: u32, height: u32 },
}

impl<F: FieldHandle> PassTarget<'_, F> {
    pub fn size(&self) -> (u32, u32) {
        match self {
            PassTarget::Field(field) => field.size(),
            PassTarget::Screen { width, height } => (*width, *height),
        }
    }
}

#[derive(Debug)]
pub struct Pass<'a, F> {
    pub stage: StageId,
    pub target: PassTarget<'a, F>,
    pub bindings: Bindings<'a, F>,
}

impl<'a, F> Pass<'a, F> {
    pub fn to_field(stage: StageId, target: &'a F, bindings: Bindings<'a, F>) -> Self {
        Self {
            stage,
            target: PassTarget::Field(target),
            bindings,
        }
    }

    pub fn to_screen(stage: StageId, width: u32, height: u32, bindings: Bindings<'a, F>) -> Self {
        Self {
            stage,
            target: PassTarget::Screen { width, height },
            bindings,
        }
    }
}

/// Check a pass against the program it will run.
///
/// # Panics
/// These are programming errors, not runtime conditions:
/// * a bound parameter the program doesn't declare,
/// * a declared parameter left unbound,
/// * a value of the wrong kind,
/// * the target bound as one of its own sources,
/// * a source field whose shape differs from a field target.
pub fn check_pass<F: FieldHandle>(interface: &ProgramInterface, pass: &Pass<'_, F>) {
    let stage = pass.stage;
    assert_eq!(interface.stage, stage, "pass for {stage} issued with the {} program", interface.stage);

    for (param, binding) in pass.bindings.iter() {
        let name = param.shader_name();
        assert!(interface.declares(param), "{stage}: parameter `{name}` is not declared by the program");
        assert!(
            binding.kind() == param.kind(),
            "{stage}: parameter `{name}` expects {:?}, got {:?}",
            param.kind(),
            binding.kind()
        );

        if let Binding::Texture(source) = binding {
            if let PassTarget::Field(target) = &pass.target {
                assert!(source.id() != target.id(), "{stage}: `{name}` is also the render target");
                assert!(
                    source.size() == target.size(),
                    "{stage}: `{name}` is {:?} but the target is {:?}",
                    source.size(),
                    target.size()
                );
            }
        }
    }

    for param in interface.declared_params() {
        assert!(
            pass.bindings.get(param).is_some(),
            "{stage}: declared parameter `{}` is unbound",
            param.shader_name()
        );
    }
}
