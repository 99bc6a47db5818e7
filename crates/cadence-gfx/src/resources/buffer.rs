use ash::vk;

/// host visible 的 buffer，由 backend 创建，常驻映射
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxHostBuffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
}

/// buffer 中的一段区域
///
/// 作为 vertex / index buffer 绑定、copy 的源和目标、buffer barrier 的对象
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxBufferSlice {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl GfxBufferSlice {
    #[inline]
    pub fn new(buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        Self { buffer, offset, size }
    }

    /// 整个 buffer
    #[inline]
    pub fn whole(buffer: vk::Buffer) -> Self {
        Self {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }
}

/// index buffer 的绑定
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxIndexBinding {
    pub slice: GfxBufferSlice,
    pub index_type: vk::IndexType,
}
