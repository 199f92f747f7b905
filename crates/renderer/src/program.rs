use std::collections::BTreeMap;

use crate::device::{GraphicsDevice, ProgramId, UniformLocation};
use crate::error::{PipelineError, PipelineResult};
use crate::scope::ProgramScope;
use crate::shader::ShaderUnit;
use crate::types::{ShaderKind, UniformValue};

#[derive(Clone, Debug, PartialEq)]
struct AttributeBinding {
    values: Vec<f32>,
    components: u32,
}

/// A linked vertex + fragment program with its recorded parameters.
///
/// Configuration calls ([`set_uniform`](Self::set_uniform),
/// [`set_vertex_attribute`](Self::set_vertex_attribute)) leave the device's
/// current program as they found it; only [`activate`](Self::activate)
/// changes it on purpose.
#[derive(Debug)]
pub struct PipelineProgram {
    handle: ProgramId,
    vertex: ShaderUnit,
    fragment: ShaderUnit,
    attributes: BTreeMap<String, AttributeBinding>,
    uniforms: BTreeMap<String, UniformValue>,
    live: bool,
}

impl PipelineProgram {
    /// Allocates a program, attaches both stages and links it.
    ///
    /// On link failure the program object and both stages are released
    /// before the error is returned.
    pub fn create<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        vertex: ShaderUnit,
        fragment: ShaderUnit,
    ) -> PipelineResult<Self> {
        let (Some(vertex_id), Some(fragment_id)) = (vertex.id(), fragment.id()) else {
            vertex.release(device);
            fragment.release(device);
            return Err(PipelineError::Link {
                log: "cannot link a released shader stage".to_string(),
            });
        };

        let handle = device.create_program();
        device.attach_shader(handle, vertex_id);
        device.attach_shader(handle, fragment_id);
        if let Err(log) = device.link_program(handle) {
            device.delete_program(handle);
            vertex.release(device);
            fragment.release(device);
            return Err(PipelineError::Link { log });
        }

        tracing::debug!(?handle, "linked program");
        Ok(Self {
            handle,
            vertex,
            fragment,
            attributes: BTreeMap::new(),
            uniforms: BTreeMap::new(),
            live: true,
        })
    }

    /// Compiles both stages from source and links them.
    pub fn from_sources<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        vertex: &str,
        fragment: &str,
    ) -> PipelineResult<Self> {
        let vertex = ShaderUnit::compile(device, ShaderKind::Vertex, vertex)?;
        let fragment = match ShaderUnit::compile(device, ShaderKind::Fragment, fragment) {
            Ok(unit) => unit,
            Err(err) => {
                vertex.release(device);
                return Err(err);
            }
        };
        Self::create(device, vertex, fragment)
    }

    pub fn handle(&self) -> ProgramId {
        self.handle
    }

    /// Replaces the vertex stage and re-links.
    pub fn set_vertex_stage<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        unit: ShaderUnit,
    ) -> PipelineResult<()> {
        self.replace_stage(device, unit, ShaderKind::Vertex)
    }

    /// Replaces the fragment stage and re-links.
    pub fn set_fragment_stage<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        unit: ShaderUnit,
    ) -> PipelineResult<()> {
        self.replace_stage(device, unit, ShaderKind::Fragment)
    }

    fn replace_stage<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        unit: ShaderUnit,
        kind: ShaderKind,
    ) -> PipelineResult<()> {
        let Some(new_id) = unit.id().filter(|_| unit.kind() == kind) else {
            let log = format!("expected a live {kind} stage, got a {} stage", unit.kind());
            unit.release(device);
            return Err(PipelineError::Link { log });
        };

        let slot = match kind {
            ShaderKind::Vertex => &mut self.vertex,
            ShaderKind::Fragment => &mut self.fragment,
        };
        let mut old = std::mem::replace(slot, unit);
        if let Some(old_id) = old.id() {
            device.detach_shader(self.handle, old_id);
        }
        old.release_in_place(device);
        device.attach_shader(self.handle, new_id);

        device.link_program(self.handle).map_err(|log| PipelineError::Link { log })?;
        tracing::debug!(handle = ?self.handle, stage = %kind, "re-linked program");
        self.reapply(device)
    }

    /// Re-links invalidate locations, so recorded parameters are written again.
    fn reapply<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) -> PipelineResult<()> {
        let uniforms: Vec<_> = self
            .uniforms
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        for (name, value) in uniforms {
            self.set_uniform(device, &name, value);
        }

        let attributes: Vec<_> = self
            .attributes
            .iter()
            .map(|(name, binding)| (name.clone(), binding.clone()))
            .collect();
        for (name, binding) in attributes {
            self.set_vertex_attribute(device, &name, &binding.values, binding.components)?;
        }
        Ok(())
    }

    /// Writes a uniform by name.
    ///
    /// Unknown names are a silent no-op and return `None`. The value is
    /// recorded either way so a later re-link can pick it up.
    pub fn set_uniform<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Option<UniformLocation> {
        let value = value.into();
        self.uniforms.insert(name.to_string(), value);

        let location = device.uniform_location(self.handle, name)?;
        let mut scope = ProgramScope::bind(device, self.handle);
        scope.set_uniform(location, value);
        Some(location)
    }

    /// Uploads and enables a per-vertex float array for `name`.
    ///
    /// Returns the attribute location, or `None` when the program has no
    /// such input.
    pub fn set_vertex_attribute<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        name: &str,
        values: &[f32],
        components: u32,
    ) -> PipelineResult<Option<u32>> {
        if !(1..=4).contains(&components) {
            return Err(PipelineError::InvalidData {
                expected: 4,
                actual: components as usize,
            });
        }
        let per_vertex = components as usize;
        if values.is_empty() || values.len() % per_vertex != 0 {
            return Err(PipelineError::InvalidData {
                expected: values.len().div_ceil(per_vertex).max(1) * per_vertex,
                actual: values.len(),
            });
        }

        self.attributes.insert(
            name.to_string(),
            AttributeBinding {
                values: values.to_vec(),
                components,
            },
        );

        let Some(location) = device.attrib_location(self.handle, name) else {
            return Ok(None);
        };
        let mut scope = ProgramScope::bind(device, self.handle);
        scope.vertex_attrib_array(location, values, components);
        Ok(Some(location))
    }

    /// Makes this the current program for drawing. Not restored.
    pub fn activate<D: GraphicsDevice + ?Sized>(&self, device: &mut D) {
        device.use_program(Some(self.handle));
    }

    /// Destroys the program and both stages.
    pub fn release<D: GraphicsDevice + ?Sized>(mut self, device: &mut D) {
        if device.current_program() == Some(self.handle) {
            device.use_program(None);
        }
        device.delete_program(self.handle);
        self.vertex.release_in_place(device);
        self.fragment.release_in_place(device);
        self.live = false;
    }
}

impl Drop for PipelineProgram {
    fn drop(&mut self) {
        if self.live {
            tracing::warn!(handle = ?self.handle, "program dropped without release");
        }
    }
}
