use ash::vk;

use crate::{
    foundation::queue_family::QueueCapability,
    resources::{buffer::GfxBufferSlice, texture::GfxTexture},
};

/// barrier 一侧的同步范围
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxAccessScope {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl GfxAccessScope {
    const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    /// 去掉 queue 不支持的 stage 和 access，stage 全部被去掉时退化为 ALL_COMMANDS
    pub fn restrict_to(self, capability: QueueCapability) -> Self {
        type S = vk::PipelineStageFlags2;
        type A = vk::AccessFlags2;
        let graphics_stages = S::VERTEX_INPUT
            | S::VERTEX_SHADER
            | S::FRAGMENT_SHADER
            | S::EARLY_FRAGMENT_TESTS
            | S::LATE_FRAGMENT_TESTS
            | S::COLOR_ATTACHMENT_OUTPUT
            | S::ALL_GRAPHICS;
        let graphics_access = A::VERTEX_ATTRIBUTE_READ
            | A::INDEX_READ
            | A::INPUT_ATTACHMENT_READ
            | A::COLOR_ATTACHMENT_READ
            | A::COLOR_ATTACHMENT_WRITE
            | A::DEPTH_STENCIL_ATTACHMENT_READ
            | A::DEPTH_STENCIL_ATTACHMENT_WRITE;
        let shader_access = A::SHADER_READ
            | A::SHADER_WRITE
            | A::SHADER_SAMPLED_READ
            | A::SHADER_STORAGE_READ
            | A::SHADER_STORAGE_WRITE
            | A::UNIFORM_READ
            | A::INDIRECT_COMMAND_READ;

        let mut stage = self.stage;
        let mut access = self.access;
        if !capability.contains(QueueCapability::GRAPHICS) {
            stage &= !graphics_stages;
            access &= !graphics_access;
        }
        if !capability.contains(QueueCapability::COMPUTE) {
            stage &= !(S::COMPUTE_SHADER | S::DRAW_INDIRECT);
            access &= !shader_access;
        }
        if stage.is_empty() && !self.stage.is_empty() {
            stage = S::ALL_COMMANDS;
        }
        Self { stage, access }
    }
}

/// 纹理的逻辑 layout：描述纹理当前的用途
///
/// 通过固定的表映射到 stage / access / image layout
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

impl TextureLayout {
    pub const fn vk_layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::General => vk::ImageLayout::GENERAL,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    pub const fn access_scope(self) -> GfxAccessScope {
        type S = vk::PipelineStageFlags2;
        type A = vk::AccessFlags2;
        match self {
            Self::Undefined => GfxAccessScope::new(S::NONE, A::NONE),
            Self::General => GfxAccessScope::new(
                S::ALL_COMMANDS,
                A::from_raw(A::MEMORY_READ.as_raw() | A::MEMORY_WRITE.as_raw()),
            ),
            Self::ColorAttachment => GfxAccessScope::new(
                S::COLOR_ATTACHMENT_OUTPUT,
                A::from_raw(A::COLOR_ATTACHMENT_READ.as_raw() | A::COLOR_ATTACHMENT_WRITE.as_raw()),
            ),
            Self::DepthStencilAttachment => GfxAccessScope::new(
                S::from_raw(S::EARLY_FRAGMENT_TESTS.as_raw() | S::LATE_FRAGMENT_TESTS.as_raw()),
                A::from_raw(A::DEPTH_STENCIL_ATTACHMENT_READ.as_raw() | A::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()),
            ),
            Self::DepthStencilReadOnly => GfxAccessScope::new(
                S::from_raw(
                    S::EARLY_FRAGMENT_TESTS.as_raw() | S::LATE_FRAGMENT_TESTS.as_raw() | S::FRAGMENT_SHADER.as_raw(),
                ),
                A::from_raw(A::DEPTH_STENCIL_ATTACHMENT_READ.as_raw() | A::SHADER_READ.as_raw()),
            ),
            Self::ShaderReadOnly => GfxAccessScope::new(
                S::from_raw(S::FRAGMENT_SHADER.as_raw() | S::COMPUTE_SHADER.as_raw()),
                A::SHADER_READ,
            ),
            Self::TransferSrc => GfxAccessScope::new(S::TRANSFER, A::TRANSFER_READ),
            Self::TransferDst => GfxAccessScope::new(S::TRANSFER, A::TRANSFER_WRITE),
            // 由 presentation engine 负责可见性
            Self::Present => GfxAccessScope::new(S::NONE, A::NONE),
        }
    }
}

/// buffer 的逻辑访问状态
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    Undefined,
    /// vertex buffer 和 index buffer
    VertexInput,
    UniformRead,
    ShaderRead,
    ShaderReadWrite,
    IndirectArgument,
    TransferSrc,
    TransferDst,
}

impl BufferAccess {
    pub const fn access_scope(self) -> GfxAccessScope {
        type S = vk::PipelineStageFlags2;
        type A = vk::AccessFlags2;
        let shader_stages = S::from_raw(S::VERTEX_SHADER.as_raw() | S::FRAGMENT_SHADER.as_raw() | S::COMPUTE_SHADER.as_raw());
        match self {
            Self::Undefined => GfxAccessScope::new(S::NONE, A::NONE),
            Self::VertexInput => GfxAccessScope::new(
                S::VERTEX_INPUT,
                A::from_raw(A::VERTEX_ATTRIBUTE_READ.as_raw() | A::INDEX_READ.as_raw()),
            ),
            Self::UniformRead => GfxAccessScope::new(shader_stages, A::UNIFORM_READ),
            Self::ShaderRead => GfxAccessScope::new(shader_stages, A::SHADER_READ),
            Self::ShaderReadWrite => {
                GfxAccessScope::new(shader_stages, A::from_raw(A::SHADER_READ.as_raw() | A::SHADER_WRITE.as_raw()))
            }
            Self::IndirectArgument => GfxAccessScope::new(S::DRAW_INDIRECT, A::INDIRECT_COMMAND_READ),
            Self::TransferSrc => GfxAccessScope::new(S::TRANSFER, A::TRANSFER_READ),
            Self::TransferDst => GfxAccessScope::new(S::TRANSFER, A::TRANSFER_WRITE),
        }
    }
}

/// 纹理 layout 转换的描述，纯数据
#[derive(Copy, Clone, Debug)]
pub struct GfxTextureBarrier {
    pub image: vk::Image,
    pub old_layout: TextureLayout,
    pub new_layout: TextureLayout,
    pub range: vk::ImageSubresourceRange,
}

impl GfxTextureBarrier {
    /// 覆盖纹理所有 mip 和 layer
    pub fn new(texture: &dyn GfxTexture, old_layout: TextureLayout, new_layout: TextureLayout) -> Self {
        Self {
            image: texture.vk_image(),
            old_layout,
            new_layout,
            range: texture.full_range(),
        }
    }

    /// builder
    #[inline]
    pub fn with_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.range = range;
        self
    }

    /// 转换为 vk barrier，stage 会被限制在 queue 支持的范围内
    pub fn to_image_barrier(&self, capability: QueueCapability) -> GfxImageBarrier {
        let src = self.old_layout.access_scope().restrict_to(capability);
        let dst = self.new_layout.access_scope().restrict_to(capability);
        GfxImageBarrier::new()
            .image(self.image)
            .layout_transfer(self.old_layout.vk_layout(), self.new_layout.vk_layout())
            .src_mask(src.stage, src.access)
            .dst_mask(dst.stage, dst.access)
            .subresource_range(self.range)
    }
}

/// buffer 访问状态转换的描述，纯数据
#[derive(Copy, Clone, Debug)]
pub struct GfxBufferStateBarrier {
    pub slice: GfxBufferSlice,
    pub old_access: BufferAccess,
    pub new_access: BufferAccess,
}

impl GfxBufferStateBarrier {
    pub fn new(slice: GfxBufferSlice, old_access: BufferAccess, new_access: BufferAccess) -> Self {
        Self {
            slice,
            old_access,
            new_access,
        }
    }

    pub fn to_buffer_barrier(&self, capability: QueueCapability) -> GfxBufferBarrier {
        let src = self.old_access.access_scope().restrict_to(capability);
        let dst = self.new_access.access_scope().restrict_to(capability);
        GfxBufferBarrier::new()
            .buffer(self.slice.buffer, self.slice.offset, self.slice.size)
            .mask(GfxBarrierMask {
                src_stage: src.stage,
                dst_stage: dst.stage,
                src_access: src.access,
                dst_access: dst.access,
            })
    }
}

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// 便捷创建 image memory barrier 的结构体
#[derive(Copy, Clone)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: 1,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'_> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn subresource_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.inner.subresource_range = range;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

#[derive(Copy, Clone)]
pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'_> {
        &self.inner
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::resources::texture::GfxTextureRef;

    #[test]
    fn test_layout_table() {
        assert_eq!(TextureLayout::ShaderReadOnly.vk_layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(TextureLayout::Present.vk_layout(), vk::ImageLayout::PRESENT_SRC_KHR);

        let depth = TextureLayout::DepthStencilAttachment.access_scope();
        assert!(depth.stage.contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS));
        assert!(depth.access.contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_texture_barrier_uses_full_range() {
        let tex = GfxTextureRef::new(vk::Image::from_raw(3), vk::Format::D32_SFLOAT).with_levels(5, 2);
        let barrier = GfxTextureBarrier::new(&tex, TextureLayout::Undefined, TextureLayout::DepthStencilAttachment)
            .to_image_barrier(QueueCapability::all());
        let inner = barrier.inner();

        assert_eq!(inner.image, vk::Image::from_raw(3));
        assert_eq!(inner.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(inner.new_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(inner.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(inner.subresource_range.level_count, 5);
        assert_eq!(inner.subresource_range.layer_count, 2);
    }

    #[test]
    fn test_stages_restricted_to_queue() {
        let scope = TextureLayout::ShaderReadOnly.access_scope();

        let compute = scope.restrict_to(QueueCapability::COMPUTE | QueueCapability::TRANSFER);
        assert_eq!(compute.stage, vk::PipelineStageFlags2::COMPUTE_SHADER);

        let transfer = scope.restrict_to(QueueCapability::TRANSFER);
        assert_eq!(transfer.stage, vk::PipelineStageFlags2::ALL_COMMANDS);

        // NONE 保持不变
        let undefined = TextureLayout::Undefined.access_scope().restrict_to(QueueCapability::TRANSFER);
        assert_eq!(undefined.stage, vk::PipelineStageFlags2::NONE);
    }

    #[test]
    fn test_access_restricted_with_stages() {
        let compute_queue = QueueCapability::COMPUTE | QueueCapability::TRANSFER;

        // color attachment 在 compute queue 上没有对应的 stage，access 也一起去掉
        let color = TextureLayout::ColorAttachment.access_scope().restrict_to(compute_queue);
        assert_eq!(color.stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(color.access, vk::AccessFlags2::NONE);

        let sampled = TextureLayout::ShaderReadOnly.access_scope().restrict_to(compute_queue);
        assert_eq!(sampled.access, vk::AccessFlags2::SHADER_READ);

        let transfer = TextureLayout::ShaderReadOnly.access_scope().restrict_to(QueueCapability::TRANSFER);
        assert_eq!(transfer.access, vk::AccessFlags2::NONE);

        let depth = TextureLayout::DepthStencilReadOnly.access_scope().restrict_to(compute_queue);
        assert_eq!(depth.stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(depth.access, vk::AccessFlags2::SHADER_READ);

        // 通用的 memory access 和 transfer access 保留
        let general = TextureLayout::General.access_scope().restrict_to(QueueCapability::TRANSFER);
        assert_eq!(general.access, vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE);
        let copy = TextureLayout::TransferDst.access_scope().restrict_to(QueueCapability::TRANSFER);
        assert_eq!(copy.access, vk::AccessFlags2::TRANSFER_WRITE);

        // gfx queue 上保持原样
        let full = TextureLayout::ColorAttachment.access_scope().restrict_to(QueueCapability::all());
        assert_eq!(full, TextureLayout::ColorAttachment.access_scope());
    }

    #[test]
    fn test_compute_queue_barrier_has_no_graphics_access() {
        let tex = GfxTextureRef::new(vk::Image::from_raw(4), vk::Format::R8G8B8A8_UNORM);
        let barrier = GfxTextureBarrier::new(&tex, TextureLayout::ColorAttachment, TextureLayout::ShaderReadOnly)
            .to_image_barrier(QueueCapability::COMPUTE | QueueCapability::TRANSFER);
        let inner = barrier.inner();

        assert_eq!(inner.src_stage_mask, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(inner.dst_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(inner.dst_access_mask, vk::AccessFlags2::SHADER_READ);
    }

    #[test]
    fn test_buffer_barrier_mask() {
        let slice = GfxBufferSlice::new(vk::Buffer::from_raw(9), 16, 64);
        let barrier = GfxBufferStateBarrier::new(slice, BufferAccess::TransferDst, BufferAccess::VertexInput)
            .to_buffer_barrier(QueueCapability::all());
        let inner = barrier.inner();

        assert_eq!(inner.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(inner.dst_stage_mask, vk::PipelineStageFlags2::VERTEX_INPUT);
        assert_eq!((inner.offset, inner.size), (16, 64));
    }
}
