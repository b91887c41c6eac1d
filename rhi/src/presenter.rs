//! Presentation: swap chain back buffers and their render target views.

use std::sync::Arc;

use crate::backend::{SwapChainDescriptor, SwapChainId};
use crate::command::CommandList;
use crate::config::PresentationParameters;
use crate::descriptors::DescriptorAllocator;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::profiling::{frame_mark, profile_scope};
use crate::resources::{DepthStencilView, GraphicsResource, RenderTargetView};
use crate::types::{
    ClearFlags, DescriptorHeapFlags, DescriptorHeapType, HeapType, QueueType, Rect,
    ResourceDescriptor, ResourceFlags, ResourceStates, Viewport,
};

/// Something frames can be drawn into and presented.
pub trait GraphicsPresenter: Send {
    /// Current presentation parameters.
    fn parameters(&self) -> &PresentationParameters;

    /// Index of the back buffer the next frame draws into.
    fn back_buffer_index(&self) -> GraphicsResult<u32>;

    /// The back buffer the next frame draws into.
    fn back_buffer(&self) -> GraphicsResult<&Arc<GraphicsResource>>;

    /// Render target view of the current back buffer.
    fn render_target_view(&self) -> GraphicsResult<&RenderTargetView>;

    /// The depth buffer view, if the presenter has one.
    fn depth_stencil_view(&self) -> Option<&DepthStencilView>;

    /// Make the current back buffer a render target and bind it.
    fn begin_draw(&self, list: &mut CommandList) -> GraphicsResult<()>;

    /// Return the current back buffer to the present state.
    fn end_draw(&self, list: &mut CommandList) -> GraphicsResult<()>;

    /// Present the current back buffer.
    fn present(&mut self) -> GraphicsResult<()>;

    /// Recreate the back buffers with a new size.
    fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()>;
}

/// A presenter backed by a native swap chain.
///
/// Back buffer render target views live in fixed slots of a private RTV
/// allocator, one slot per buffer. The optional depth buffer is created in
/// [`ResourceStates::DEPTH_WRITE`] and never leaves it.
pub struct SwapChainPresenter {
    device: Arc<GraphicsDevice>,
    swap_chain: SwapChainId,
    parameters: PresentationParameters,
    rtv_allocator: DescriptorAllocator,
    back_buffers: Vec<Arc<GraphicsResource>>,
    render_targets: Vec<RenderTargetView>,
    depth: Option<DepthStencilView>,
    present_count: u64,
}

impl SwapChainPresenter {
    /// Create a swap chain presenting from the device's direct queue.
    pub fn new(device: &Arc<GraphicsDevice>, parameters: PresentationParameters) -> GraphicsResult<Self> {
        let backend = device.backend();
        let rtv_allocator = DescriptorAllocator::new(
            backend.clone(),
            DescriptorHeapType::Rtv,
            parameters.buffer_count,
            DescriptorHeapFlags::empty(),
        )?;
        let swap_chain = backend.create_swap_chain(
            device.queue(QueueType::Direct).native_id(),
            &SwapChainDescriptor {
                width: parameters.width,
                height: parameters.height,
                format: parameters.back_buffer_format,
                buffer_count: parameters.buffer_count,
            },
        )?;
        log::info!(
            "Created swap chain {}x{} {:?} with {} buffers",
            parameters.width,
            parameters.height,
            parameters.back_buffer_format,
            parameters.buffer_count
        );

        let mut presenter = Self {
            device: device.clone(),
            swap_chain,
            parameters,
            rtv_allocator,
            back_buffers: Vec::new(),
            render_targets: Vec::new(),
            depth: None,
            present_count: 0,
        };
        presenter.create_size_dependent()?;
        Ok(presenter)
    }

    fn create_size_dependent(&mut self) -> GraphicsResult<()> {
        let backend = self.device.backend();
        let descriptor = ResourceDescriptor::texture_2d(
            self.parameters.width,
            self.parameters.height,
            self.parameters.back_buffer_format,
        )
        .with_flags(ResourceFlags::ALLOW_RENDER_TARGET);

        for index in 0..self.parameters.buffer_count {
            let id = backend.swap_chain_buffer(self.swap_chain, index)?;
            let buffer = Arc::new(GraphicsResource::new(
                backend.clone(),
                Arc::downgrade(&self.device),
                id,
                descriptor.clone().with_label(format!("back buffer {index}")),
                HeapType::Default,
                ResourceStates::PRESENT,
            ));
            let view = RenderTargetView::in_slot(&buffer, &self.rtv_allocator, index)?;
            self.back_buffers.push(buffer);
            self.render_targets.push(view);
        }

        self.depth = match self.parameters.depth_stencil_format {
            Some(format) => {
                let depth = self.device.create_resource(
                    &ResourceDescriptor::texture_2d(self.parameters.width, self.parameters.height, format)
                        .with_label("depth buffer")
                        .with_flags(
                            ResourceFlags::ALLOW_DEPTH_STENCIL | ResourceFlags::DENY_SHADER_RESOURCE,
                        ),
                    HeapType::Default,
                    ResourceStates::DEPTH_WRITE,
                )?;
                Some(DepthStencilView::new(&depth)?)
            }
            None => None,
        };
        Ok(())
    }

    fn current_index(&self) -> GraphicsResult<usize> {
        let index = self
            .device
            .backend()
            .current_back_buffer_index(self.swap_chain)? as usize;
        if index >= self.back_buffers.len() {
            return Err(GraphicsError::Internal(format!(
                "back buffer index {index} out of {} buffers",
                self.back_buffers.len()
            )));
        }
        Ok(index)
    }

    /// Number of successful presents.
    pub fn present_count(&self) -> u64 {
        self.present_count
    }

    /// All back buffers.
    pub fn back_buffers(&self) -> &[Arc<GraphicsResource>] {
        &self.back_buffers
    }

    /// Clear the current back buffer and the depth buffer.
    pub fn clear(&self, list: &mut CommandList, color: [f32; 4]) -> GraphicsResult<()> {
        list.clear_render_target_view(self.render_target_view()?, color)?;
        if let Some(depth) = &self.depth {
            list.clear_depth_stencil_view(depth, ClearFlags::DEPTH, 1.0, 0)?;
        }
        Ok(())
    }

    /// Full-size viewport.
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.parameters.width as f32, self.parameters.height as f32)
    }
}

impl GraphicsPresenter for SwapChainPresenter {
    fn parameters(&self) -> &PresentationParameters {
        &self.parameters
    }

    fn back_buffer_index(&self) -> GraphicsResult<u32> {
        self.current_index().map(|index| index as u32)
    }

    fn back_buffer(&self) -> GraphicsResult<&Arc<GraphicsResource>> {
        Ok(&self.back_buffers[self.current_index()?])
    }

    fn render_target_view(&self) -> GraphicsResult<&RenderTargetView> {
        Ok(&self.render_targets[self.current_index()?])
    }

    fn depth_stencil_view(&self) -> Option<&DepthStencilView> {
        self.depth.as_ref()
    }

    fn begin_draw(&self, list: &mut CommandList) -> GraphicsResult<()> {
        let index = self.current_index()?;
        list.resource_barrier_transition(
            &self.back_buffers[index],
            ResourceStates::PRESENT,
            ResourceStates::RENDER_TARGET,
        )?;
        list.set_render_targets(&[&self.render_targets[index]], self.depth.as_ref())?;
        list.set_viewport(self.viewport())?;
        list.set_scissor_rect(Rect::from_size(self.parameters.width, self.parameters.height))
    }

    fn end_draw(&self, list: &mut CommandList) -> GraphicsResult<()> {
        list.resource_barrier_transition(
            self.back_buffer()?,
            ResourceStates::RENDER_TARGET,
            ResourceStates::PRESENT,
        )
    }

    fn present(&mut self) -> GraphicsResult<()> {
        profile_scope!("present");
        match self
            .device
            .backend()
            .present(self.swap_chain, self.parameters.sync_interval)
        {
            Ok(()) => {
                self.present_count += 1;
                log::trace!("Presented frame {}", self.present_count);
                frame_mark!();
                Ok(())
            }
            Err(e) if e.is_device_lost() => {
                log::error!("Present failed, device lost: {e}");
                Err(e.into())
            }
            Err(e) => {
                log::warn!("Present failed: {e}");
                Err(e.into())
            }
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "cannot resize swap chain to {width}x{height}"
            )));
        }
        if width == self.parameters.width && height == self.parameters.height {
            return Ok(());
        }
        log::info!("Resizing swap chain to {width}x{height}");
        self.device.queue(QueueType::Direct).flush()?;

        self.render_targets.clear();
        self.back_buffers.clear();
        self.depth = None;

        if let Err(e) = self
            .device
            .backend()
            .resize_swap_chain(self.swap_chain, width, height)
        {
            log::warn!(
                "Swap chain resize failed, keeping {}x{}: {e}",
                self.parameters.width,
                self.parameters.height
            );
            self.create_size_dependent()?;
            return Err(e);
        }
        self.parameters.width = width;
        self.parameters.height = height;
        self.create_size_dependent()
    }
}

impl Drop for SwapChainPresenter {
    fn drop(&mut self) {
        self.render_targets.clear();
        self.back_buffers.clear();
        self.depth = None;
        self.device.backend().destroy_swap_chain(self.swap_chain);
    }
}

impl std::fmt::Debug for SwapChainPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChainPresenter")
            .field("swap_chain", &self.swap_chain)
            .field("parameters", &self.parameters)
            .field("present_count", &self.present_count)
            .finish()
    }
}

static_assertions::assert_impl_all!(SwapChainPresenter: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::error::PresentError;
    use crate::types::{CommandListType, Format};

    fn setup() -> (Arc<GraphicsDevice>, SwapChainPresenter) {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        let presenter = SwapChainPresenter::new(
            &device,
            PresentationParameters::new(64, 32).with_buffer_count(3),
        )
        .unwrap();
        (device, presenter)
    }

    #[test]
    fn test_back_buffers_cycle() {
        let (_device, mut presenter) = setup();
        assert_eq!(presenter.back_buffers().len(), 3);
        for expected in [0, 1, 2, 0] {
            assert_eq!(presenter.back_buffer_index().unwrap(), expected);
            presenter.present().unwrap();
        }
        assert_eq!(presenter.present_count(), 4);
    }

    #[test]
    fn test_draw_transitions_back_buffer() {
        let (device, presenter) = setup();
        let allocator = device.create_command_allocator(CommandListType::Direct).unwrap();
        let mut list = device
            .create_command_list(CommandListType::Direct, allocator, None)
            .unwrap();

        presenter.begin_draw(&mut list).unwrap();
        assert_eq!(
            presenter.back_buffer().unwrap().current_state(),
            ResourceStates::RENDER_TARGET
        );
        presenter.clear(&mut list, [1.0, 0.0, 0.0, 1.0]).unwrap();
        presenter.end_draw(&mut list).unwrap();
        assert_eq!(
            presenter.back_buffer().unwrap().current_state(),
            ResourceStates::PRESENT
        );

        let compiled = list.close().unwrap();
        device
            .queue(QueueType::Direct)
            .execute_command_lists(&[&compiled])
            .unwrap();
        let pixels = device
            .dummy_backend()
            .unwrap()
            .resource_bytes(presenter.back_buffer().unwrap().native_id())
            .unwrap();
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_resize_recreates_buffers() {
        let (_device, mut presenter) = setup();
        presenter.resize(128, 64).unwrap();
        assert_eq!(presenter.parameters().width, 128);
        assert_eq!(presenter.back_buffer().unwrap().width(), 128);
        assert_eq!(
            presenter.depth_stencil_view().unwrap().resource().height(),
            64
        );
        assert!(presenter.resize(0, 64).is_err());
    }

    #[test]
    fn test_failed_resize_keeps_old_buffers() {
        let (_device, mut presenter) = setup();
        let held = presenter.back_buffer().unwrap().clone();
        assert!(matches!(
            presenter.resize(128, 64),
            Err(GraphicsError::Validation(_))
        ));
        drop(held);

        assert_eq!(presenter.parameters().width, 64);
        assert_eq!(presenter.back_buffers().len(), 3);
        assert_eq!(presenter.back_buffer().unwrap().width(), 64);
        assert!(presenter.render_target_view().is_ok());
        assert!(presenter.depth_stencil_view().is_some());

        presenter.resize(64, 32).unwrap();
        assert!(presenter.render_target_view().is_ok());
        presenter.resize(128, 64).unwrap();
        assert_eq!(presenter.back_buffer().unwrap().width(), 128);
    }

    #[test]
    fn test_present_failure_is_classified() {
        let (device, mut presenter) = setup();
        device.dummy_backend().unwrap().simulate_device_removed();
        assert_eq!(
            presenter.present(),
            Err(GraphicsError::Present(PresentError::DeviceRemoved))
        );
        assert_eq!(presenter.present_count(), 0);
    }

    #[test]
    fn test_without_depth() {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        let presenter = SwapChainPresenter::new(
            &device,
            PresentationParameters::new(16, 16)
                .with_depth_stencil_format(None)
                .with_back_buffer_format(Format::B8G8R8A8Unorm),
        )
        .unwrap();
        assert!(presenter.depth_stencil_view().is_none());
    }
}
