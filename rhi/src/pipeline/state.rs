//! Pipeline state objects.

use std::sync::Arc;

use crate::backend::{GpuBackend, PipelineId};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{ComparisonFunction, Format, PrimitiveTopology};

use super::{RootSignature, ShaderBytecode, ShaderStage};

/// Maximum number of simultaneously bound render targets.
pub const MAX_RENDER_TARGETS: usize = 8;

/// One element of a vertex input layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
}

impl InputElement {
    /// Element in slot 0 at `offset`.
    pub fn new(semantic_name: impl Into<String>, format: Format, offset: u32) -> Self {
        Self {
            semantic_name: semantic_name.into(),
            semantic_index: 0,
            format,
            input_slot: 0,
            aligned_byte_offset: offset,
        }
    }
}

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Polygon fill mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    Wireframe,
    #[default]
    Solid,
}

/// Rasterizer fixed-function state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
}

/// Blend fixed-function state. Alpha blending when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlendState {
    pub alpha_blend: bool,
}

/// Depth test fixed-function state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_function: ComparisonFunction,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_function: ComparisonFunction::Less,
        }
    }
}

impl DepthStencilState {
    /// Depth testing and writes disabled.
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_function: ComparisonFunction::Always,
        }
    }
}

/// Descriptor for creating a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_shader: ShaderBytecode,
    pub pixel_shader: Option<ShaderBytecode>,
    pub input_layout: Vec<InputElement>,
    pub topology: PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub blend: BlendState,
    pub depth_stencil: DepthStencilState,
    pub render_target_formats: Vec<Format>,
    pub depth_stencil_format: Option<Format>,
    pub sample_count: u32,
}

impl GraphicsPipelineDescriptor {
    /// Pipeline rendering to one target of `format`, without depth.
    pub fn new(vertex_shader: ShaderBytecode, pixel_shader: ShaderBytecode, format: Format) -> Self {
        Self {
            label: None,
            vertex_shader,
            pixel_shader: Some(pixel_shader),
            input_layout: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::default(),
            blend: BlendState::default(),
            depth_stencil: DepthStencilState::disabled(),
            render_target_formats: vec![format],
            depth_stencil_format: None,
            sample_count: 1,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the vertex input layout.
    pub fn with_input_layout(mut self, layout: Vec<InputElement>) -> Self {
        self.input_layout = layout;
        self
    }

    /// Enable depth testing against `format`.
    pub fn with_depth(mut self, format: Format, state: DepthStencilState) -> Self {
        self.depth_stencil_format = Some(format);
        self.depth_stencil = state;
        self
    }

    /// Set the rasterizer state.
    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Set the blend state.
    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    /// Check the state combination.
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.vertex_shader.stage() != ShaderStage::Vertex || self.vertex_shader.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "graphics pipeline needs vertex shader bytecode".into(),
            ));
        }
        if let Some(ps) = &self.pixel_shader
            && (ps.stage() != ShaderStage::Pixel || ps.is_empty())
        {
            return Err(GraphicsError::InvalidParameter(
                "pixel shader slot holds non-pixel bytecode".into(),
            ));
        }
        if self.render_target_formats.len() > MAX_RENDER_TARGETS {
            return Err(GraphicsError::out_of_range(
                "render target count",
                self.render_target_formats.len() as u64,
                0,
                MAX_RENDER_TARGETS as u64,
            ));
        }
        if let Some(format) = self
            .render_target_formats
            .iter()
            .find(|f| f.is_depth() || **f == Format::Unknown)
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} is not a render target format"
            )));
        }
        if let Some(format) = self.depth_stencil_format
            && !format.is_depth()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} is not a depth format"
            )));
        }
        if self.sample_count == 0 || !self.sample_count.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "invalid sample count {}",
                self.sample_count
            )));
        }
        Ok(())
    }
}

/// Descriptor for creating a compute pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub compute_shader: ShaderBytecode,
}

impl ComputePipelineDescriptor {
    /// Create a compute pipeline descriptor.
    pub fn new(compute_shader: ShaderBytecode) -> Self {
        Self {
            label: None,
            compute_shader,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Check the shader stage.
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.compute_shader.stage() != ShaderStage::Compute || self.compute_shader.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "compute pipeline needs compute shader bytecode".into(),
            ));
        }
        Ok(())
    }
}

/// Whether a pipeline drives the rasterizer or dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Immutable compiled pipeline, shared by many command lists.
pub struct PipelineState {
    backend: Arc<dyn GpuBackend>,
    id: PipelineId,
    kind: PipelineKind,
    root_signature: Arc<RootSignature>,
    label: Option<String>,
}

impl PipelineState {
    pub(crate) fn new_graphics(
        backend: Arc<dyn GpuBackend>,
        root_signature: Arc<RootSignature>,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> GraphicsResult<Self> {
        descriptor.validate()?;
        let id = backend.create_graphics_pipeline(descriptor, root_signature.native_id())?;
        log::debug!(
            "Created graphics pipeline {}",
            descriptor.label.as_deref().unwrap_or("(unnamed)")
        );
        Ok(Self {
            backend,
            id,
            kind: PipelineKind::Graphics,
            root_signature,
            label: descriptor.label.clone(),
        })
    }

    pub(crate) fn new_compute(
        backend: Arc<dyn GpuBackend>,
        root_signature: Arc<RootSignature>,
        descriptor: &ComputePipelineDescriptor,
    ) -> GraphicsResult<Self> {
        descriptor.validate()?;
        let id = backend.create_compute_pipeline(descriptor, root_signature.native_id())?;
        log::debug!(
            "Created compute pipeline {}",
            descriptor.label.as_deref().unwrap_or("(unnamed)")
        );
        Ok(Self {
            backend,
            id,
            kind: PipelineKind::Compute,
            root_signature,
            label: descriptor.label.clone(),
        })
    }

    /// Get the native id.
    pub fn native_id(&self) -> PipelineId {
        self.id
    }

    /// Graphics or compute.
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Root signature the pipeline was compiled against.
    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }

    /// Get the debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.id);
    }
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaders() -> (ShaderBytecode, ShaderBytecode) {
        (
            ShaderBytecode::new(ShaderStage::Vertex, vec![1u8, 2, 3], "VSMain"),
            ShaderBytecode::new(ShaderStage::Pixel, vec![4u8, 5, 6], "PSMain"),
        )
    }

    #[test]
    fn test_graphics_descriptor_validation() {
        let (vs, ps) = shaders();
        let desc = GraphicsPipelineDescriptor::new(vs.clone(), ps.clone(), Format::R8G8B8A8Unorm);
        assert!(desc.validate().is_ok());

        let swapped = GraphicsPipelineDescriptor::new(ps, vs, Format::R8G8B8A8Unorm);
        assert!(swapped.validate().is_err());
    }

    #[test]
    fn test_depth_format_checks() {
        let (vs, ps) = shaders();
        let bad_rt = GraphicsPipelineDescriptor::new(vs.clone(), ps.clone(), Format::D32Float);
        assert!(bad_rt.validate().is_err());

        let bad_depth = GraphicsPipelineDescriptor::new(vs, ps, Format::R8G8B8A8Unorm)
            .with_depth(Format::R32Float, DepthStencilState::default());
        assert!(bad_depth.validate().is_err());
    }

    #[test]
    fn test_compute_descriptor_validation() {
        let cs = ShaderBytecode::new(ShaderStage::Compute, vec![0u8; 4], "CSMain");
        assert!(ComputePipelineDescriptor::new(cs).validate().is_ok());
        let vs = ShaderBytecode::new(ShaderStage::Vertex, vec![0u8; 4], "VSMain");
        assert!(ComputePipelineDescriptor::new(vs).validate().is_err());
    }
}
