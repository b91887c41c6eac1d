//! Command list, queue and fixed-function recording types.

use bitflags::bitflags;

use super::Format;

/// Kind of command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandListType {
    /// Graphics, compute and copy commands. Executed on the direct queue.
    #[default]
    Direct,
    /// Restricted reusable list, inlined into a direct list.
    Bundle,
    /// Compute and copy commands.
    Compute,
    /// Copy commands only.
    Copy,
}

impl CommandListType {
    /// Queue type that executes lists of this type, if any.
    ///
    /// Bundles are never submitted to a queue directly.
    pub fn queue_type(self) -> Option<QueueType> {
        match self {
            Self::Direct => Some(QueueType::Direct),
            Self::Compute => Some(QueueType::Compute),
            Self::Copy => Some(QueueType::Copy),
            Self::Bundle => None,
        }
    }
}

/// Kind of hardware submission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Graphics queue.
    Direct,
    /// Asynchronous compute queue.
    Compute,
    /// Copy (DMA) queue.
    Copy,
}

impl QueueType {
    /// All queue types, in index order.
    pub const ALL: [Self; 3] = [Self::Direct, Self::Compute, Self::Copy];

    /// Dense index for enum-indexed tables.
    pub fn index(self) -> usize {
        match self {
            Self::Direct => 0,
            Self::Compute => 1,
            Self::Copy => 2,
        }
    }

    /// Command list type accepted by this queue.
    pub fn list_type(self) -> CommandListType {
        match self {
            Self::Direct => CommandListType::Direct,
            Self::Compute => CommandListType::Compute,
            Self::Copy => CommandListType::Copy,
        }
    }
}

/// Primitive topology used by draw calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Viewport transform.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport covering a `width` x `height` target with the full depth range.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Integer rectangle, used for scissor rects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Rectangle at the origin with the given size.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

bitflags! {
    /// Which aspects of a depth-stencil view to clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearFlags: u32 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
    }
}

/// Vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexBufferView {
    /// GPU virtual address of the first vertex.
    pub buffer_location: u64,
    /// Size of the bound range in bytes.
    pub size_in_bytes: u32,
    /// Distance between vertices in bytes.
    pub stride_in_bytes: u32,
}

/// Index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexBufferView {
    /// GPU virtual address of the first index.
    pub buffer_location: u64,
    /// Size of the bound range in bytes.
    pub size_in_bytes: u32,
    /// [`Format::R16Uint`] or [`Format::R32Uint`].
    pub format: Format,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_list_type_round_trip() {
        for queue in QueueType::ALL {
            assert_eq!(queue.list_type().queue_type(), Some(queue));
        }
        assert_eq!(CommandListType::Bundle.queue_type(), None);
    }

    #[test]
    fn test_viewport_full_depth() {
        let vp = Viewport::new(800.0, 600.0);
        assert_eq!(vp.min_depth, 0.0);
        assert_eq!(vp.max_depth, 1.0);
        assert_eq!(Rect::from_size(800, 600).right, 800);
    }
}
