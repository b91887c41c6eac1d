//! A quad spinning around the view axis.
//!
//! The quad's vertex buffer, pipeline and draw call are static; only the
//! rotation changes per frame. The draw lives in a bundle recorded once per
//! frame slot, and the rotation is written into the slot's upload ring.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use redlilium_rhi::pipeline::{
    GraphicsPipelineDescriptor, InputElement, RootParameter, RootSignatureDescriptor,
    RootSignatureFlags, ShaderBytecode, ShaderStage, ShaderVisibility,
};
use redlilium_rhi::types::{Format, HeapType, PrimitiveTopology, VertexBufferView};
use redlilium_rhi::{
    CommandList, FrameHandler, FrameTime, GraphicsDevice, GraphicsResource, GraphicsResult,
    PipelineState, RenderContext, RootSignature,
};

/// Vertex with a 2D position and a color.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
}

/// Two triangles covering the center of the screen.
pub const QUAD_VERTICES: [Vertex; 6] = [
    Vertex { position: [-0.5, -0.5], color: [1.0, 0.0, 0.0] },
    Vertex { position: [0.5, -0.5], color: [0.0, 1.0, 0.0] },
    Vertex { position: [0.5, 0.5], color: [0.0, 0.0, 1.0] },
    Vertex { position: [-0.5, -0.5], color: [1.0, 0.0, 0.0] },
    Vertex { position: [0.5, 0.5], color: [0.0, 0.0, 1.0] },
    Vertex { position: [-0.5, 0.5], color: [1.0, 1.0, 0.0] },
];

/// Per-frame constants, read by the vertex shader from register b0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameConstants {
    /// Column-major rotation matrix.
    rotation: [f32; 16],
}

impl FrameConstants {
    fn rotation_z(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        #[rustfmt::skip]
        let rotation = [
            c,   s,   0.0, 0.0,
            -s,  c,   0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        Self { rotation }
    }
}

// Precompiled shader bytecode is produced offline. The software GPU does not
// execute shaders, so the demo ships tagged placeholder blobs.
const VERTEX_SHADER: &[u8] = b"DXBC spinning_quad.vs";
const PIXEL_SHADER: &[u8] = b"DXBC spinning_quad.ps";

const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.08, 1.0];

/// The spinning quad scene.
pub struct SpinningQuad {
    root_signature: Arc<RootSignature>,
    pipeline: Arc<PipelineState>,
    vertices: Arc<GraphicsResource>,
    /// Radians per second.
    speed: f32,
    angle: f32,
    draws: u64,
}

impl SpinningQuad {
    /// Create the scene's GPU objects for render targets of `format`.
    ///
    /// Uploads the vertex buffer synchronously, so the GPU timeline must be
    /// running.
    pub fn new(device: &Arc<GraphicsDevice>, format: Format) -> GraphicsResult<Self> {
        let root_signature = device.create_root_signature(
            RootSignatureDescriptor::new()
                .with_label("spinning quad")
                .with_parameter(RootParameter::ConstantBufferView {
                    register: 0,
                    space: 0,
                    visibility: ShaderVisibility::Vertex,
                })
                .with_flags(RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT),
        )?;

        let descriptor = GraphicsPipelineDescriptor::new(
            ShaderBytecode::new(ShaderStage::Vertex, VERTEX_SHADER, "VSMain"),
            ShaderBytecode::new(ShaderStage::Pixel, PIXEL_SHADER, "PSMain"),
            format,
        )
        .with_label("spinning quad")
        .with_input_layout(vec![
            InputElement::new("POSITION", Format::R32G32Float, 0),
            InputElement::new("COLOR", Format::R32G32B32Float, 8),
        ]);
        let pipeline = device.create_graphics_pipeline(&root_signature, &descriptor)?;

        let vertices =
            device.create_buffer_with_pod(&QUAD_VERTICES, HeapType::Default, Some("quad vertices"))?;
        log::debug!("Spinning quad ready ({} vertices)", QUAD_VERTICES.len());

        Ok(Self {
            root_signature,
            pipeline,
            vertices,
            speed: std::f32::consts::FRAC_PI_2,
            angle: 0.0,
            draws: 0,
        })
    }

    /// Set the rotation speed in radians per second.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn pipeline(&self) -> &Arc<PipelineState> {
        &self.pipeline
    }

    /// Current rotation in radians.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Number of frames that drew the quad.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Record the static draw. Used both for bundles and inline.
    pub fn record_draw(&self, list: &mut CommandList) -> GraphicsResult<()> {
        let view: VertexBufferView = self
            .vertices
            .vertex_buffer_view(std::mem::size_of::<Vertex>() as u32)?;
        list.set_primitive_topology(PrimitiveTopology::TriangleList)?;
        list.set_vertex_buffers(0, &[view])?;
        list.draw_instanced(QUAD_VERTICES.len() as u32, 1, 0, 0)
    }
}

impl FrameHandler for SpinningQuad {
    fn update(&mut self, time: &FrameTime) -> GraphicsResult<()> {
        self.angle = (self.angle + self.speed * time.delta.as_secs_f32()) % std::f32::consts::TAU;
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> GraphicsResult<()> {
        let rtv = ctx.presenter.render_target_view()?;
        ctx.list.clear_render_target_view(rtv, CLEAR_COLOR)?;

        let constants = ctx.upload.write_pod(&[FrameConstants::rotation_z(self.angle)])?;
        ctx.list.set_graphics_root_signature(&self.root_signature)?;
        ctx.list
            .set_graphics_root_constant_buffer_view(0, constants.gpu_address)?;

        match ctx.bundle {
            Some(bundle) => ctx.list.execute_bundle(bundle)?,
            None => self.record_draw(ctx.list)?,
        }
        self.draws += 1;

        if ctx.time.frame_index % 120 == 0 {
            log::trace!(
                "Frame {}: angle {:.3} rad",
                ctx.time.frame_index,
                self.angle
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use redlilium_rhi::{
        DeviceConfig, FrameLoop, FrameLoopConfig, PresentationParameters, SwapChainPresenter,
    };

    use super::*;

    fn setup(with_bundles: bool) -> (Arc<GraphicsDevice>, FrameLoop, SpinningQuad) {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        let params = PresentationParameters::new(16, 16);
        let quad = SpinningQuad::new(&device, params.back_buffer_format).unwrap();
        let presenter = SwapChainPresenter::new(&device, params).unwrap();
        let frame_loop = FrameLoop::new(&device, presenter, &FrameLoopConfig::new(2))
            .unwrap()
            .with_pipeline(quad.pipeline().clone());
        if with_bundles {
            frame_loop.init_bundles(|list| quad.record_draw(list)).unwrap();
        }
        (device, frame_loop, quad)
    }

    #[test]
    fn test_rotation_matrix() {
        let identity = FrameConstants::rotation_z(0.0);
        assert_eq!(identity.rotation[0], 1.0);
        assert_eq!(identity.rotation[5], 1.0);
        assert_eq!(identity.rotation[1], 0.0);
    }

    #[test]
    fn test_angle_advances_with_time() {
        let (_device, frame_loop, quad) = setup(false);
        let mut quad = quad.with_speed(1.0);
        frame_loop
            .tick(&mut quad, Duration::from_millis(500))
            .unwrap();
        assert!((quad.angle() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_draws_inline_and_from_bundles() {
        for with_bundles in [false, true] {
            let (device, frame_loop, mut quad) = setup(with_bundles);
            for _ in 0..4 {
                frame_loop
                    .tick(&mut quad, Duration::from_millis(16))
                    .unwrap();
            }
            frame_loop.wait_idle().unwrap();

            let stats = device.dummy_backend().unwrap().stats();
            assert_eq!(quad.draws(), 4);
            assert_eq!(stats.draw_calls, 4);
            assert_eq!(stats.bundles_executed, if with_bundles { 4 } else { 0 });
        }
    }
}
