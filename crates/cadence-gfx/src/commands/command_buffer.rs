use std::rc::Rc;

use ash::vk;

use crate::{
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        rendering_info::GfxRenderingInfo,
    },
    foundation::{backend::GfxBackend, queue_family::QueueCapability},
    resources::buffer::{GfxBufferSlice, GfxIndexBinding},
};

slotmap::new_key_type! {
    /// command queue 内部 arena 中 command buffer 的索引
    pub struct GfxCommandBufferKey;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GfxCommandBufferState {
    /// 在 queue 的 idle pool 中
    Idle,
    /// 正在被某个 command list 录制
    Recording,
    /// 录制结束，等待 submit
    Executable,
    /// 已经 submit，GPU 可能还在使用
    InFlight,
}

/// 命令缓冲
///
/// 每个 command buffer 独占一个 command pool，复用之前 reset 整个 pool。
/// 由创建它的 [`crate::commands::command_queue::GfxCommandQueue`] 持有，外部只能拿到 key。
pub struct GfxCommandBuffer {
    pub(crate) vk_handle: vk::CommandBuffer,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) capability: QueueCapability,

    /// 最近一次 submit 的 id，0 表示从未 submit
    pub(crate) submission_id: u64,
    pub(crate) state: GfxCommandBufferState,

    pub(crate) name: String,
}

// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }

    #[inline]
    pub fn capability(&self) -> QueueCapability {
        self.capability
    }

    #[inline]
    pub fn submission_id(&self) -> u64 {
        self.submission_id
    }

    #[inline]
    pub fn state(&self) -> GfxCommandBufferState {
        self.state
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 向一个正在录制的 command buffer 写入命令
///
/// 只是 backend 和 handle 的组合，可以随意 clone；
/// 不检查 command buffer 的状态，状态机由 command list 维护。
#[derive(Clone)]
pub struct GfxCommandRecorder {
    backend: Rc<dyn GfxBackend>,
    vk_handle: vk::CommandBuffer,
}

impl GfxCommandRecorder {
    pub fn new(backend: Rc<dyn GfxBackend>, vk_handle: vk::CommandBuffer) -> Self {
        Self { backend, vk_handle }
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }

    #[inline]
    pub fn backend(&self) -> &Rc<dyn GfxBackend> {
        &self.backend
    }
}

// 数据传输类型
impl GfxCommandRecorder {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: GfxBufferSlice, dst: GfxBufferSlice) {
        assert!(src.size <= dst.size, "copy source ({}) is larger than destination ({})", src.size, dst.size);
        let region = vk::BufferCopy {
            src_offset: src.offset,
            dst_offset: dst.offset,
            size: src.size,
        };
        self.backend.cmd_copy_buffer(self.vk_handle, src.buffer, dst.buffer, region);
    }

    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer_to_image(
        &self,
        src: GfxBufferSlice,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        let region = vk::BufferImageCopy {
            buffer_offset: src.offset + region.buffer_offset,
            ..region
        };
        self.backend.cmd_copy_buffer_to_image(self.vk_handle, src.buffer, dst, dst_layout, region);
    }
}

// 绘制类型的命令
impl GfxCommandRecorder {
    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_begin_rendering(&self, rendering_info: &GfxRenderingInfo) {
        self.backend.cmd_begin_rendering(self.vk_handle, rendering_info);
    }

    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_end_rendering(&self) {
        self.backend.cmd_end_rendering(self.vk_handle);
    }

    /// 只能在 render pass 内使用
    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_clear_attachments(&self, attachments: &[vk::ClearAttachment], rects: &[vk::ClearRect]) {
        self.backend.cmd_clear_attachments(self.vk_handle, attachments, rects);
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_viewport(&self, viewport: vk::Viewport) {
        self.backend.cmd_set_viewport(self.vk_handle, viewport);
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_scissor(&self, scissor: vk::Rect2D) {
        self.backend.cmd_set_scissor(self.vk_handle, scissor);
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.backend.cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.backend.cmd_bind_descriptor_sets(self.vk_handle, bind_point, pipeline_layout, first_set, descriptor_sets);
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_vertex_buffers(&self, first_bind: u32, buffers: &[GfxBufferSlice]) {
        let (handles, offsets): (Vec<_>, Vec<_>) = buffers.iter().map(|slice| (slice.buffer, slice.offset)).unzip();
        self.backend.cmd_bind_vertex_buffers(self.vk_handle, first_bind, &handles, &offsets);
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_index_buffer(&self, binding: GfxIndexBinding) {
        self.backend.cmd_bind_index_buffer(self.vk_handle, binding.slice.buffer, binding.slice.offset, binding.index_type);
    }

    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.backend.cmd_draw(self.vk_handle, vertex_count, instance_count, first_vertex, first_instance);
    }

    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.backend.cmd_draw_indexed(
            self.vk_handle,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
    }
}

// 计算着色器相关命令
impl GfxCommandRecorder {
    #[inline]
    pub fn cmd_dispatch(&self, group_cnt: glam::UVec3) {
        self.backend.cmd_dispatch(self.vk_handle, group_cnt);
    }
}

// 同步相关命令
impl GfxCommandRecorder {
    /// image 和 buffer barrier 合并到一个 pipeline barrier 命令中
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn cmd_pipeline_barrier(&self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
        let image_barriers = image_barriers.iter().map(|b| *b.inner()).collect::<Vec<_>>();
        let buffer_barriers = buffer_barriers.iter().map(|b| *b.inner()).collect::<Vec<_>>();
        self.backend.cmd_pipeline_barrier(self.vk_handle, &image_barriers, &buffer_barriers);
    }
}

// debug 相关命令
impl GfxCommandRecorder {
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        self.backend.cmd_begin_label(self.vk_handle, label_name, label_color);
    }

    #[inline]
    pub fn end_label(&self) {
        self.backend.cmd_end_label(self.vk_handle);
    }

    #[inline]
    pub fn insert_label(&self, label_name: &str, label_color: glam::Vec4) {
        self.backend.cmd_insert_label(self.vk_handle, label_name, label_color);
    }
}
