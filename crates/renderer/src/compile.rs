use std::borrow::Cow;

use wgpu::naga::{self, ShaderStage};

use crate::types::{ShaderKind, UniformValue};

/// Bind group holding the std140 parameter block.
pub(crate) const UNIFORM_GROUP: u32 = 0;
/// Bind group holding the sampled inputs; binding `2N` is the texture and
/// `2N + 1` the sampler of texture unit `N`.
pub(crate) const TEXTURE_GROUP: u32 = 1;

/// Scalar layout of a member of the parameter block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MemberKind {
    Float(u32),
    Int(u32),
}

impl MemberKind {
    pub fn byte_len(self) -> usize {
        match self {
            MemberKind::Float(n) | MemberKind::Int(n) => n as usize * 4,
        }
    }

    pub fn accepts(self, value: &UniformValue) -> bool {
        match value {
            UniformValue::Int(_) => self == MemberKind::Int(1),
            _ => self == MemberKind::Float(value.components() as u32),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BlockMember {
    pub name: String,
    pub offset: u32,
    pub kind: MemberKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    pub binding: u32,
    pub size: u32,
    pub instance: Option<String>,
    pub members: Vec<BlockMember>,
}

impl BlockLayout {
    /// Finds a member by bare name or `instance.member`.
    pub fn position(&self, name: &str) -> Option<usize> {
        let bare = match (&self.instance, name.split_once('.')) {
            (Some(instance), Some((prefix, member))) if prefix == instance => member,
            _ => name,
        };
        self.members.iter().position(|member| member.name == bare)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    Texture,
    Sampler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResourceBinding {
    pub binding: u32,
    pub kind: ResourceKind,
}

impl ResourceBinding {
    pub fn unit(&self) -> u32 {
        self.binding / 2
    }
}

/// An entry-point input or output with a location binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Varying {
    pub name: String,
    pub location: u32,
    pub kind: MemberKind,
}

/// Location-bound inputs and outputs of a stage's `main`, sorted by location.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct StageInterface {
    pub inputs: Vec<Varying>,
    pub outputs: Vec<Varying>,
}

impl StageInterface {
    pub fn output_at(&self, location: u32) -> Option<&Varying> {
        self.outputs.iter().find(|output| output.location == location)
    }
}

/// What a device needs to know to drive a validated stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StageReflection {
    pub block: Option<BlockLayout>,
    pub resources: Vec<ResourceBinding>,
    pub interface: StageInterface,
}

/// What two stages agree on once linked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LinkedLayout {
    pub block: Option<BlockLayout>,
    pub resources: Vec<ResourceBinding>,
    pub attributes: Vec<Varying>,
}

/// A validated stage plus its wgpu module.
pub(crate) struct CompiledStage {
    pub module: wgpu::ShaderModule,
    pub reflection: StageReflection,
}

fn naga_stage(kind: ShaderKind) -> ShaderStage {
    match kind {
        ShaderKind::Vertex => ShaderStage::Vertex,
        ShaderKind::Fragment => ShaderStage::Fragment,
    }
}

/// Parses and validates a GLSL 450 stage with naga and reflects its bindings.
///
/// Needs no device. The error string is naga's own diagnostic rendered
/// against the source.
pub(crate) fn analyze_stage(kind: ShaderKind, source: &str) -> Result<StageReflection, String> {
    let stage = naga_stage(kind);
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(stage);
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| errors.emit_to_string(source))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    validator
        .validate(&module)
        .map_err(|error| error.emit_to_string(source))?;

    let (block, resources) = reflect(&module)?;
    let interface = entry_interface(&module, stage)?;
    Ok(StageReflection {
        block,
        resources,
        interface,
    })
}

/// [`analyze_stage`], then builds the wgpu module.
pub(crate) fn compile_stage(
    device: &wgpu::Device,
    kind: ShaderKind,
    source: &str,
) -> Result<CompiledStage, String> {
    let reflection = analyze_stage(kind, source)?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(match kind {
            ShaderKind::Vertex => "lumatrail vertex",
            ShaderKind::Fragment => "lumatrail fragment",
        }),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source.to_string()),
            stage: naga_stage(kind),
            defines: &[],
        },
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(error.to_string());
    }

    Ok(CompiledStage {
        module: shader,
        reflection,
    })
}

/// Checks that a vertex and a fragment stage fit together.
///
/// Every fragment input needs a vertex output of the same type at its
/// location, both stages must agree on the parameter block, and vertex
/// inputs must be float vectors.
pub(crate) fn link_stages(
    vertex: &StageReflection,
    fragment: &StageReflection,
) -> Result<LinkedLayout, String> {
    for input in &fragment.interface.inputs {
        match vertex.interface.output_at(input.location) {
            Some(output) if output.kind == input.kind => {}
            Some(output) => {
                return Err(format!(
                    "fragment input `{}` (location {}) is {:?} but the vertex stage writes {:?}",
                    input.name, input.location, input.kind, output.kind
                ))
            }
            None => {
                return Err(format!(
                    "fragment input `{}` (location {}) has no matching vertex output",
                    input.name, input.location
                ))
            }
        }
    }

    let block = match (&vertex.block, &fragment.block) {
        (Some(a), Some(b)) if a != b => {
            return Err("vertex and fragment stages declare different uniform blocks".into())
        }
        (Some(block), _) | (None, Some(block)) => Some(block.clone()),
        (None, None) => None,
    };

    let mut resources: Vec<ResourceBinding> = vertex
        .resources
        .iter()
        .chain(fragment.resources.iter())
        .copied()
        .collect();
    resources.sort_by_key(|resource| resource.binding);
    resources.dedup();

    if let Some(input) = vertex
        .interface
        .inputs
        .iter()
        .find(|input| !matches!(input.kind, MemberKind::Float(_)))
    {
        return Err(format!("vertex input `{}` must be a float vector", input.name));
    }

    Ok(LinkedLayout {
        block,
        resources,
        attributes: vertex.interface.inputs.clone(),
    })
}

fn entry_interface(module: &naga::Module, stage: ShaderStage) -> Result<StageInterface, String> {
    let entry = module
        .entry_points
        .iter()
        .find(|entry| entry.stage == stage)
        .ok_or_else(|| "missing entry point `main`".to_string())?;

    let mut interface = StageInterface::default();
    for argument in &entry.function.arguments {
        if let Some(naga::Binding::Location { location, .. }) = argument.binding {
            interface.inputs.push(varying(
                module,
                argument.name.as_deref(),
                location,
                argument.ty,
            )?);
        }
    }

    if let Some(result) = &entry.function.result {
        match (&module.types[result.ty].inner, &result.binding) {
            (naga::TypeInner::Struct { members, .. }, None) => {
                for member in members {
                    if let Some(naga::Binding::Location { location, .. }) = member.binding {
                        interface.outputs.push(varying(
                            module,
                            member.name.as_deref(),
                            location,
                            member.ty,
                        )?);
                    }
                }
            }
            (_, Some(naga::Binding::Location { location, .. })) => {
                interface
                    .outputs
                    .push(varying(module, None, *location, result.ty)?);
            }
            _ => {}
        }
    }

    interface.inputs.sort_by_key(|input| input.location);
    interface.outputs.sort_by_key(|output| output.location);
    Ok(interface)
}

fn varying(
    module: &naga::Module,
    name: Option<&str>,
    location: u32,
    ty: naga::Handle<naga::Type>,
) -> Result<Varying, String> {
    let name = name.map_or_else(|| format!("location{location}"), str::to_string);
    let kind = member_kind(&module.types[ty].inner)
        .ok_or_else(|| format!("`{name}` (location {location}) has an unsupported type"))?;
    Ok(Varying {
        name,
        location,
        kind,
    })
}

fn reflect(module: &naga::Module) -> Result<(Option<BlockLayout>, Vec<ResourceBinding>), String> {
    let mut block = None;
    let mut resources = Vec::new();

    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let inner = &module.types[global.ty].inner;
        match global.space {
            naga::AddressSpace::Uniform => {
                if binding.group != UNIFORM_GROUP {
                    return Err(format!(
                        "uniform block must live in set {UNIFORM_GROUP}, found set {}",
                        binding.group
                    ));
                }
                if block.is_some() {
                    return Err("only one uniform block per stage is supported".to_string());
                }
                let naga::TypeInner::Struct { members, span } = inner else {
                    return Err("uniform block is not a struct".to_string());
                };
                let mut layout = BlockLayout {
                    binding: binding.binding,
                    size: *span,
                    instance: global.name.clone(),
                    members: Vec::with_capacity(members.len()),
                };
                for member in members {
                    let Some(kind) = member_kind(&module.types[member.ty].inner) else {
                        return Err(format!(
                            "uniform `{}` has an unsupported type",
                            member.name.as_deref().unwrap_or("?")
                        ));
                    };
                    layout.members.push(BlockMember {
                        name: member.name.clone().unwrap_or_default(),
                        offset: member.offset,
                        kind,
                    });
                }
                block = Some(layout);
            }
            naga::AddressSpace::Handle => {
                if binding.group != TEXTURE_GROUP {
                    return Err(format!(
                        "textures and samplers must live in set {TEXTURE_GROUP}, found set {}",
                        binding.group
                    ));
                }
                let kind = match inner {
                    naga::TypeInner::Image { .. } => ResourceKind::Texture,
                    naga::TypeInner::Sampler { .. } => ResourceKind::Sampler,
                    _ => continue,
                };
                let expected_parity = match kind {
                    ResourceKind::Texture => 0,
                    ResourceKind::Sampler => 1,
                };
                if binding.binding % 2 != expected_parity {
                    return Err(format!(
                        "{kind:?} at binding {} breaks the texture/sampler pairing",
                        binding.binding
                    ));
                }
                resources.push(ResourceBinding {
                    binding: binding.binding,
                    kind,
                });
            }
            _ => {}
        }
    }

    resources.sort_by_key(|resource| resource.binding);
    Ok((block, resources))
}

fn member_kind(inner: &naga::TypeInner) -> Option<MemberKind> {
    let (scalar, count) = match inner {
        naga::TypeInner::Scalar(scalar) => (scalar, 1),
        naga::TypeInner::Vector { size, scalar } => (scalar, *size as u32),
        _ => return None,
    };
    match scalar.kind {
        naga::ScalarKind::Float if scalar.width == 4 => Some(MemberKind::Float(count)),
        naga::ScalarKind::Sint | naga::ScalarKind::Uint if scalar.width == 4 => {
            Some(MemberKind::Int(count))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(stage: ShaderStage, source: &str) -> naga::Module {
        let mut frontend = naga::front::glsl::Frontend::default();
        frontend
            .parse(&naga::front::glsl::Options::from(stage), source)
            .expect("shader parses")
    }

    #[test]
    fn reflects_block_offsets_and_texture_pairs() {
        let module = parse(
            ShaderStage::Fragment,
            crate::sources::ACCUMULATION_SHADER_GLSL,
        );
        let (block, resources) = reflect(&module).expect("reflection succeeds");
        let block = block.expect("parameter block");
        let duv = &block.members[block.position("duv").unwrap()];
        assert_eq!(duv.offset, 0);
        assert_eq!(duv.kind, MemberKind::Float(2));
        let decay = &block.members[block.position("decay").unwrap()];
        assert_eq!(decay.offset, 8);

        let units: Vec<_> = resources.iter().map(|r| (r.unit(), r.kind)).collect();
        assert_eq!(
            units,
            vec![
                (0, ResourceKind::Texture),
                (0, ResourceKind::Sampler),
                (1, ResourceKind::Texture),
                (1, ResourceKind::Sampler),
            ]
        );
    }

    #[test]
    fn stage_interfaces_come_from_the_entry_point() {
        let vertex = analyze_stage(ShaderKind::Vertex, crate::sources::VERTEX_SHADER_GLSL)
            .expect("builtin vertex stage");
        assert!(!vertex.interface.inputs.is_empty());
        assert!(vertex
            .interface
            .inputs
            .iter()
            .all(|input| matches!(input.kind, MemberKind::Float(_))));

        let fragment = analyze_stage(
            ShaderKind::Fragment,
            crate::sources::ACCUMULATION_SHADER_GLSL,
        )
        .expect("builtin accumulation stage");
        assert_eq!(fragment.interface.outputs.len(), 1);
        assert_eq!(fragment.interface.outputs[0].location, 0);
        assert_eq!(fragment.interface.outputs[0].kind, MemberKind::Float(4));
        for input in &fragment.interface.inputs {
            assert_eq!(
                vertex.interface.output_at(input.location).map(|output| output.kind),
                Some(input.kind)
            );
        }

        let linked = link_stages(&vertex, &fragment).expect("builtin stages link");
        assert_eq!(linked.attributes, vertex.interface.inputs);
        assert!(linked.block.is_some());
    }

    #[test]
    fn undeclared_identifiers_fail_analysis() {
        let source = "#version 450
layout(location = 0) out vec4 c;
void main() { float x = ; c = vec4(undeclared_name, 1.0); }
";
        assert!(analyze_stage(ShaderKind::Fragment, source).is_err());

        let source = "#version 450
layout(location = 0) out vec4 c;
void main() { c = vec4(undeclared_name, 1.0); }
";
        let log = analyze_stage(ShaderKind::Fragment, source).expect_err("unknown name");
        assert!(log.contains("undeclared_name"), "{log}");
    }

    #[test]
    fn mismatched_varyings_do_not_link() {
        let vertex = analyze_stage(
            ShaderKind::Vertex,
            "#version 450
layout(location = 0) in vec2 a_position;
layout(location = 0) out vec2 v_uv;
void main() { v_uv = a_position; gl_Position = vec4(a_position, 0.0, 1.0); }
",
        )
        .unwrap();
        let fragment = analyze_stage(
            ShaderKind::Fragment,
            "#version 450
layout(location = 0) in vec3 v_uv;
layout(location = 0) out vec4 color;
void main() { color = vec4(v_uv, 1.0); }
",
        )
        .unwrap();
        let log = link_stages(&vertex, &fragment).expect_err("type mismatch");
        assert!(log.contains("location 0"), "{log}");
    }

    #[test]
    fn syntax_errors_render_a_diagnostic() {
        let source = "#version 450\nvoid main() { float x = ; }\n";
        let mut frontend = naga::front::glsl::Frontend::default();
        let error = frontend
            .parse(&naga::front::glsl::Options::from(ShaderStage::Fragment), source)
            .expect_err("invalid shader");
        assert!(!error.emit_to_string(source).is_empty());
    }
}
