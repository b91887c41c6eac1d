//! Views: a resource paired with the descriptor slot describing it.

use std::ops::Deref;
use std::sync::Arc;

use crate::descriptors::{CpuDescriptorHandle, DescriptorAllocator};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    DepthStencilViewDescription, DescriptorHeapType, RenderTargetViewDescription, ResourceFlags,
    ShaderResourceViewDescription, UnorderedAccessViewDescription, ViewDescription, ViewDimension,
};

use super::GraphicsResource;

/// An immutable pairing of a resource and a CPU descriptor handle.
///
/// The handle comes from a [`DescriptorAllocator`] and is only valid until
/// that allocator wraps around.
#[derive(Clone)]
pub struct ResourceView {
    resource: Arc<GraphicsResource>,
    handle: CpuDescriptorHandle,
    description: ViewDescription,
}

impl ResourceView {
    /// Write `description` into a fresh slot of `allocator`.
    pub fn create(
        resource: &Arc<GraphicsResource>,
        description: ViewDescription,
        allocator: &DescriptorAllocator,
    ) -> GraphicsResult<Self> {
        let handle = allocator.allocate(1)?;
        Self::create_at(resource, description, handle)
    }

    /// Write `description` into the slot at `handle`.
    pub fn create_at(
        resource: &Arc<GraphicsResource>,
        description: ViewDescription,
        handle: CpuDescriptorHandle,
    ) -> GraphicsResult<Self> {
        resource
            .backend()
            .create_view(Some(resource.native_id()), &description, handle)?;
        log::trace!(
            "Created {:?} view of {} at {:#x}",
            description.heap_type(),
            resource.label().unwrap_or("resource"),
            handle.ptr
        );
        Ok(Self {
            resource: resource.clone(),
            handle,
            description,
        })
    }

    /// The viewed resource.
    pub fn resource(&self) -> &Arc<GraphicsResource> {
        &self.resource
    }

    /// CPU handle of the descriptor slot.
    pub fn cpu_handle(&self) -> CpuDescriptorHandle {
        self.handle
    }

    /// The native view description.
    pub fn description(&self) -> &ViewDescription {
        &self.description
    }

    /// Heap type the view lives in.
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.description.heap_type()
    }
}

impl AsRef<ResourceView> for ResourceView {
    fn as_ref(&self) -> &ResourceView {
        self
    }
}

impl std::fmt::Debug for ResourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceView")
            .field("resource", &self.resource.label())
            .field("handle", &format_args!("{:#x}", self.handle.ptr))
            .field("description", &self.description)
            .finish()
    }
}

fn require_flags(
    resource: &GraphicsResource,
    flags: ResourceFlags,
    view: &str,
) -> GraphicsResult<()> {
    if !resource.descriptor().flags.contains(flags) {
        return Err(GraphicsError::InvalidParameter(format!(
            "{view} of {:?} requires {flags:?}",
            resource.label()
        )));
    }
    Ok(())
}

fn device_allocator(
    resource: &GraphicsResource,
    heap_type: DescriptorHeapType,
) -> GraphicsResult<Arc<DescriptorAllocator>> {
    Ok(resource.require_device()?.descriptor_allocator(heap_type).clone())
}

macro_rules! typed_view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(ResourceView);

        impl $name {
            /// Unwrap into the untyped view.
            pub fn into_inner(self) -> ResourceView {
                self.0
            }
        }

        impl Deref for $name {
            type Target = ResourceView;

            fn deref(&self) -> &ResourceView {
                &self.0
            }
        }

        impl AsRef<ResourceView> for $name {
            fn as_ref(&self) -> &ResourceView {
                &self.0
            }
        }
    };
}

typed_view! {
    /// Constant buffer view of a whole buffer, padded to 256 bytes.
    ConstantBufferView
}
typed_view! {
    /// Shader resource view of a buffer or texture.
    ShaderResourceView
}
typed_view! {
    /// Unordered access view of a buffer or texture.
    UnorderedAccessView
}
typed_view! {
    /// Render target view of a texture.
    RenderTargetView
}
typed_view! {
    /// Depth-stencil view of a depth texture.
    DepthStencilView
}

impl ConstantBufferView {
    /// Create a view of the whole buffer in the device's CBV/SRV/UAV heap.
    pub fn new(resource: &Arc<GraphicsResource>) -> GraphicsResult<Self> {
        let description = resource.whole_buffer_cbv()?;
        let allocator = device_allocator(resource, DescriptorHeapType::CbvSrvUav)?;
        ResourceView::create(resource, description, &allocator).map(Self)
    }

    pub(crate) fn from_existing(
        resource: Arc<GraphicsResource>,
        handle: CpuDescriptorHandle,
        description: ViewDescription,
    ) -> Self {
        Self(ResourceView {
            resource,
            handle,
            description,
        })
    }
}

impl ShaderResourceView {
    /// Create a view of the whole resource.
    ///
    /// Buffers are viewed as raw 32-bit elements, textures as all mips.
    pub fn new(resource: &Arc<GraphicsResource>) -> GraphicsResult<Self> {
        let dimension = if resource.is_buffer() {
            ViewDimension::Buffer {
                first_element: 0,
                num_elements: (resource.size_in_bytes() / 4) as u32,
                structure_byte_stride: 0,
            }
        } else {
            ViewDimension::Texture2D {
                most_detailed_mip: 0,
                mip_levels: u32::from(resource.descriptor().mip_levels),
            }
        };
        Self::with_description(
            resource,
            ShaderResourceViewDescription {
                format: resource.format(),
                dimension,
            },
        )
    }

    /// Create a view with an explicit description.
    pub fn with_description(
        resource: &Arc<GraphicsResource>,
        description: ShaderResourceViewDescription,
    ) -> GraphicsResult<Self> {
        if resource
            .descriptor()
            .flags
            .contains(ResourceFlags::DENY_SHADER_RESOURCE)
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} denies shader resource views",
                resource.label()
            )));
        }
        let allocator = device_allocator(resource, DescriptorHeapType::CbvSrvUav)?;
        ResourceView::create(resource, ViewDescription::ShaderResource(description), &allocator)
            .map(Self)
    }
}

impl UnorderedAccessView {
    /// Create a view of the whole resource.
    pub fn new(resource: &Arc<GraphicsResource>) -> GraphicsResult<Self> {
        let dimension = if resource.is_buffer() {
            ViewDimension::Buffer {
                first_element: 0,
                num_elements: (resource.size_in_bytes() / 4) as u32,
                structure_byte_stride: 0,
            }
        } else {
            ViewDimension::Texture2D {
                most_detailed_mip: 0,
                mip_levels: 1,
            }
        };
        Self::with_description(
            resource,
            UnorderedAccessViewDescription {
                format: resource.format(),
                dimension,
            },
        )
    }

    /// Create a view with an explicit description.
    pub fn with_description(
        resource: &Arc<GraphicsResource>,
        description: UnorderedAccessViewDescription,
    ) -> GraphicsResult<Self> {
        require_flags(resource, ResourceFlags::ALLOW_UNORDERED_ACCESS, "unordered access view")?;
        let allocator = device_allocator(resource, DescriptorHeapType::CbvSrvUav)?;
        ResourceView::create(resource, ViewDescription::UnorderedAccess(description), &allocator)
            .map(Self)
    }
}

impl RenderTargetView {
    /// Create a view in the device's RTV heap.
    pub fn new(resource: &Arc<GraphicsResource>) -> GraphicsResult<Self> {
        require_flags(resource, ResourceFlags::ALLOW_RENDER_TARGET, "render target view")?;
        let allocator = device_allocator(resource, DescriptorHeapType::Rtv)?;
        ResourceView::create(resource, Self::view_description(resource), &allocator).map(Self)
    }

    /// Create a view in a fixed slot of `allocator`.
    pub fn in_slot(
        resource: &Arc<GraphicsResource>,
        allocator: &DescriptorAllocator,
        slot: u32,
    ) -> GraphicsResult<Self> {
        require_flags(resource, ResourceFlags::ALLOW_RENDER_TARGET, "render target view")?;
        let handle = allocator.allocate_slot(slot)?;
        ResourceView::create_at(resource, Self::view_description(resource), handle).map(Self)
    }

    fn view_description(resource: &GraphicsResource) -> ViewDescription {
        ViewDescription::RenderTarget(RenderTargetViewDescription {
            format: resource.format(),
            mip_slice: 0,
        })
    }
}

impl DepthStencilView {
    /// Create a view in the device's DSV heap.
    pub fn new(resource: &Arc<GraphicsResource>) -> GraphicsResult<Self> {
        let allocator = device_allocator(resource, DescriptorHeapType::Dsv)?;
        Self::with_allocator(resource, &allocator)
    }

    /// Create a view in a fresh slot of `allocator`.
    pub fn with_allocator(
        resource: &Arc<GraphicsResource>,
        allocator: &DescriptorAllocator,
    ) -> GraphicsResult<Self> {
        require_flags(resource, ResourceFlags::ALLOW_DEPTH_STENCIL, "depth stencil view")?;
        let description = ViewDescription::DepthStencil(DepthStencilViewDescription {
            format: resource.format(),
            mip_slice: 0,
            read_only_depth: false,
        });
        ResourceView::create(resource, description, allocator).map(Self)
    }
}
