//! 不依赖 GPU 的模拟 backend
//!
//! - 所有 handle 由递增的计数器生成
//! - 录制的命令和 submit 记录在 event log 中，测试通过 [`HeadlessBackend::take_events`] 检查
//! - timeline semaphore 的值由模拟的 GPU 推进：submit 进入 pending 队列，
//!   [`HeadlessBackend::retire_next`] / [`HeadlessBackend::retire_all`] 按 queue 顺序完成它们；
//!   CPU 端 wait 时也会按需推进
//! - [`HeadlessBackend::stall`] 模拟挂起的 GPU，此时 wait 只会超时

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
};

use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};

use crate::{
    commands::{rendering_info::GfxRenderingInfo, submit_info::GfxSubmitInfo},
    foundation::backend::GfxBackend,
    resources::{buffer::GfxHostBuffer, descriptor::GfxDescriptorWrite},
};

/// 模拟 backend 记录的事件
#[derive(Clone, Debug, PartialEq)]
pub enum HeadlessEvent {
    CreateCommandPool {
        pool: vk::CommandPool,
        queue_family_index: u32,
    },
    ResetCommandPool {
        pool: vk::CommandPool,
    },
    AllocateCommandBuffer {
        pool: vk::CommandPool,
        cmd: vk::CommandBuffer,
    },
    BeginCommandBuffer {
        cmd: vk::CommandBuffer,
    },
    EndCommandBuffer {
        cmd: vk::CommandBuffer,
    },
    Submit {
        queue: vk::Queue,
        command_buffers: Vec<vk::CommandBuffer>,
        waits: Vec<(vk::Semaphore, u64)>,
        signals: Vec<(vk::Semaphore, u64)>,
    },
    PipelineBarrier {
        cmd: vk::CommandBuffer,
        images: Vec<(vk::Image, vk::ImageLayout, vk::ImageLayout)>,
        buffers: Vec<vk::Buffer>,
    },
    BeginRendering {
        cmd: vk::CommandBuffer,
        color_views: Vec<vk::ImageView>,
        depth_view: Option<vk::ImageView>,
        extent: (u32, u32),
    },
    EndRendering {
        cmd: vk::CommandBuffer,
    },
    ClearAttachments {
        cmd: vk::CommandBuffer,
        aspects: Vec<vk::ImageAspectFlags>,
    },
    SetViewport {
        cmd: vk::CommandBuffer,
    },
    SetScissor {
        cmd: vk::CommandBuffer,
    },
    BindPipeline {
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        cmd: vk::CommandBuffer,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffers {
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
    },
    BindIndexBuffer {
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
    },
    Draw {
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        cmd: vk::CommandBuffer,
        group_count: glam::UVec3,
    },
    CopyBuffer {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        buffer_offset: u64,
    },
    BeginLabel {
        cmd: vk::CommandBuffer,
        label: String,
    },
    EndLabel {
        cmd: vk::CommandBuffer,
    },
    InsertLabel {
        cmd: vk::CommandBuffer,
        label: String,
    },
    ResetDescriptorPool {
        pool: vk::DescriptorPool,
    },
    UpdateDescriptorSet {
        set: vk::DescriptorSet,
        write_count: usize,
    },
}

impl HeadlessEvent {
    /// 是否是 bind 类的命令（pipeline、descriptor、vertex / index buffer）
    pub fn is_bind(&self) -> bool {
        matches!(
            self,
            Self::BindPipeline { .. }
                | Self::BindDescriptorSets { .. }
                | Self::BindVertexBuffers { .. }
                | Self::BindIndexBuffer { .. }
        )
    }
}

struct PendingSubmit {
    queue: vk::Queue,
    waits: Vec<(vk::Semaphore, u64)>,
    signals: Vec<(vk::Semaphore, u64)>,
}

struct DescriptorPoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Default)]
struct HeadlessState {
    semaphores: HashMap<vk::Semaphore, u64>,
    pending: VecDeque<PendingSubmit>,
    host_buffers: HashMap<vk::Buffer, Vec<u8>>,
    command_pools: HashMap<vk::CommandPool, u32>,
    descriptor_pools: HashMap<vk::DescriptorPool, DescriptorPoolState>,
    allocated_command_buffers: usize,
    submit_count: usize,
}

pub struct HeadlessBackend {
    queue_families: Vec<vk::QueueFamilyProperties>,
    next_handle: Cell<u64>,
    stalled: Cell<bool>,
    state: RefCell<HeadlessState>,
    events: RefCell<Vec<HeadlessEvent>>,
}

// 创建与销毁
impl HeadlessBackend {
    /// 模拟一个常见的独显：全能 family、async compute family、transfer family
    pub fn new() -> Self {
        let family = |queue_flags: vk::QueueFlags, queue_count: u32| vk::QueueFamilyProperties {
            queue_flags,
            queue_count,
            timestamp_valid_bits: 64,
            ..Default::default()
        };
        Self::with_queue_families(vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 16),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
            family(vk::QueueFlags::TRANSFER, 2),
        ])
    }

    pub fn with_queue_families(queue_families: Vec<vk::QueueFamilyProperties>) -> Self {
        Self {
            queue_families,
            next_handle: Cell::new(1),
            stalled: Cell::new(false),
            state: RefCell::new(HeadlessState::default()),
            events: RefCell::new(Vec::new()),
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

// 模拟 GPU 的控制
impl HeadlessBackend {
    /// 完成最早的一个可以执行的 submission
    ///
    /// 同一个 queue 上的 submission 按提交顺序完成；wait 条件不满足的 submission 会阻塞它所在的 queue。
    /// 返回是否有 submission 被完成。stall 状态下不会推进。
    pub fn retire_next(&self) -> bool {
        if self.stalled.get() {
            return false;
        }

        let mut state = self.state.borrow_mut();
        let mut blocked_queues = HashSet::new();
        let mut ready_idx = None;
        for (idx, pending) in state.pending.iter().enumerate() {
            if blocked_queues.contains(&pending.queue) {
                continue;
            }
            let ready = pending
                .waits
                .iter()
                .all(|(sem, value)| state.semaphores.get(sem).copied().unwrap_or_default() >= *value);
            if ready {
                ready_idx = Some(idx);
                break;
            }
            blocked_queues.insert(pending.queue);
        }

        let Some(pending) = ready_idx.and_then(|idx| state.pending.remove(idx)) else {
            return false;
        };
        for (sem, value) in pending.signals {
            let current = state.semaphores.entry(sem).or_default();
            *current = (*current).max(value);
        }
        true
    }

    /// 完成所有可以完成的 submission，返回完成的数量
    pub fn retire_all(&self) -> usize {
        let mut count = 0;
        while self.retire_next() {
            count += 1;
        }
        count
    }

    /// 模拟 GPU 挂起：不再完成任何 submission
    #[inline]
    pub fn stall(&self, stalled: bool) {
        self.stalled.set(stalled);
    }

    /// host 端直接 signal 一个 timeline semaphore
    pub fn signal_semaphore(&self, semaphore: vk::Semaphore, value: u64) {
        let mut state = self.state.borrow_mut();
        let current = state.semaphores.entry(semaphore).or_default();
        assert!(value >= *current, "timeline semaphore value can not decrease");
        *current = value;
    }
}

// 用于检查的接口
impl HeadlessBackend {
    /// 取出目前记录的所有事件，并清空 log
    #[inline]
    pub fn take_events(&self) -> Vec<HeadlessEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    #[inline]
    pub fn pending_submit_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    #[inline]
    pub fn submit_count(&self) -> usize {
        self.state.borrow().submit_count
    }

    #[inline]
    pub fn allocated_command_buffer_count(&self) -> usize {
        self.state.borrow().allocated_command_buffers
    }

    #[inline]
    pub fn live_host_buffer_count(&self) -> usize {
        self.state.borrow().host_buffers.len()
    }

    pub fn host_buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.borrow().host_buffers.get(&buffer).cloned()
    }
}

// tools
impl HeadlessBackend {
    fn new_handle<T: Handle>(&self) -> T {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        T::from_raw(raw)
    }

    #[inline]
    fn record(&self, event: HeadlessEvent) {
        self.events.borrow_mut().push(event);
    }

    fn semaphores_reached(&self, semaphores: &[vk::Semaphore], values: &[u64]) -> bool {
        let state = self.state.borrow();
        semaphores
            .iter()
            .zip(values)
            .all(|(sem, value)| state.semaphores.get(sem).copied().unwrap_or_default() >= *value)
    }
}

impl GfxBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties> {
        self.queue_families.clone()
    }

    fn get_device_queue(&self, queue_family_index: u32) -> vk::Queue {
        assert!((queue_family_index as usize) < self.queue_families.len(), "invalid queue family index");
        // 每个 family 一个 queue，handle 固定
        vk::Queue::from_raw(0x1000 + queue_family_index as u64)
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        self.retire_all();
        if self.state.borrow().pending.is_empty() { Ok(()) } else { Err(vk::Result::TIMEOUT) }
    }

    fn set_debug_name(&self, _object_type: vk::ObjectType, _raw_handle: u64, _name: &str) {}

    fn create_command_pool(&self, queue_family_index: u32, _name: &str) -> VkResult<vk::CommandPool> {
        let pool = self.new_handle();
        self.state.borrow_mut().command_pools.insert(pool, queue_family_index);
        self.record(HeadlessEvent::CreateCommandPool {
            pool,
            queue_family_index,
        });
        Ok(pool)
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        self.record(HeadlessEvent::ResetCommandPool { pool });
        Ok(())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state.borrow_mut().command_pools.remove(&pool);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool, _name: &str) -> VkResult<vk::CommandBuffer> {
        if !self.state.borrow().command_pools.contains_key(&pool) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let cmd = self.new_handle();
        self.state.borrow_mut().allocated_command_buffers += 1;
        self.record(HeadlessEvent::AllocateCommandBuffer { pool, cmd });
        Ok(cmd)
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(HeadlessEvent::BeginCommandBuffer { cmd });
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(HeadlessEvent::EndCommandBuffer { cmd });
        Ok(())
    }

    fn create_timeline_semaphore(&self, initial_value: u64, _name: &str) -> VkResult<vk::Semaphore> {
        let semaphore = self.new_handle();
        self.state.borrow_mut().semaphores.insert(semaphore, initial_value);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().semaphores.remove(&semaphore);
    }

    fn get_semaphore_counter_value(&self, semaphore: vk::Semaphore) -> VkResult<u64> {
        self.state.borrow().semaphores.get(&semaphore).copied().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn wait_semaphores(&self, semaphores: &[vk::Semaphore], values: &[u64], _timeout_ns: u64) -> VkResult<()> {
        assert_eq!(semaphores.len(), values.len());
        loop {
            if self.semaphores_reached(semaphores, values) {
                return Ok(());
            }
            if !self.retire_next() {
                return Err(vk::Result::TIMEOUT);
            }
        }
    }

    fn queue_submit(&self, queue: vk::Queue, submit_info: &GfxSubmitInfo) -> VkResult<()> {
        let waits = submit_info.wait_infos().iter().map(|info| (info.semaphore, info.value)).collect::<Vec<_>>();
        let signals = submit_info.signal_infos().iter().map(|info| (info.semaphore, info.value)).collect::<Vec<_>>();

        {
            let mut state = self.state.borrow_mut();
            state.submit_count += 1;
            state.pending.push_back(PendingSubmit {
                queue,
                waits: waits.clone(),
                signals: signals.clone(),
            });
        }
        self.record(HeadlessEvent::Submit {
            queue,
            command_buffers: submit_info.command_buffers().to_vec(),
            waits,
            signals,
        });
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        self.record(HeadlessEvent::PipelineBarrier {
            cmd,
            images: image_barriers.iter().map(|b| (b.image, b.old_layout, b.new_layout)).collect(),
            buffers: buffer_barriers.iter().map(|b| b.buffer).collect(),
        });
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering_info: &GfxRenderingInfo) {
        let extent = rendering_info.render_area().extent;
        self.record(HeadlessEvent::BeginRendering {
            cmd,
            color_views: rendering_info.color_views(),
            depth_view: rendering_info.depth_view(),
            extent: (extent.width, extent.height),
        });
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.record(HeadlessEvent::EndRendering { cmd });
    }

    fn cmd_clear_attachments(
        &self,
        cmd: vk::CommandBuffer,
        attachments: &[vk::ClearAttachment],
        _rects: &[vk::ClearRect],
    ) {
        self.record(HeadlessEvent::ClearAttachments {
            cmd,
            aspects: attachments.iter().map(|a| a.aspect_mask).collect(),
        });
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.record(HeadlessEvent::SetViewport { cmd });
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.record(HeadlessEvent::SetScissor { cmd });
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(HeadlessEvent::BindPipeline {
            cmd,
            bind_point,
            pipeline,
        });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(HeadlessEvent::BindDescriptorSets {
            cmd,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[u64],
    ) {
        self.record(HeadlessEvent::BindVertexBuffers {
            cmd,
            first_binding,
            buffers: buffers.to_vec(),
        });
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, _index_type: vk::IndexType) {
        self.record(HeadlessEvent::BindIndexBuffer { cmd, buffer, offset });
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(HeadlessEvent::Draw {
            cmd,
            vertex_count,
            instance_count,
        });
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(HeadlessEvent::DrawIndexed {
            cmd,
            index_count,
            instance_count,
        });
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: glam::UVec3) {
        self.record(HeadlessEvent::Dispatch { cmd, group_count });
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        self.record(HeadlessEvent::CopyBuffer {
            cmd,
            src,
            dst,
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        self.record(HeadlessEvent::CopyBufferToImage {
            cmd,
            src,
            dst,
            buffer_offset: region.buffer_offset,
        });
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, _color: glam::Vec4) {
        self.record(HeadlessEvent::BeginLabel {
            cmd,
            label: label.to_string(),
        });
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        self.record(HeadlessEvent::EndLabel { cmd });
    }

    fn cmd_insert_label(&self, cmd: vk::CommandBuffer, label: &str, _color: glam::Vec4) {
        self.record(HeadlessEvent::InsertLabel {
            cmd,
            label: label.to_string(),
        });
    }

    fn create_host_buffer(&self, size: u64, _usage: vk::BufferUsageFlags, _name: &str) -> VkResult<GfxHostBuffer> {
        let handle = self.new_handle();
        self.state.borrow_mut().host_buffers.insert(handle, vec![0; size as usize]);
        Ok(GfxHostBuffer { handle, size })
    }

    fn write_host_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        let Some(memory) = state.host_buffers.get_mut(&buffer) else {
            panic!("write to unknown host buffer {buffer:?}");
        };
        let begin = offset as usize;
        let end = begin + data.len();
        assert!(end <= memory.len(), "host buffer write out of range: {end} > {}", memory.len());
        memory[begin..end].copy_from_slice(data);
    }

    fn destroy_host_buffer(&self, buffer: vk::Buffer) {
        self.state.borrow_mut().host_buffers.remove(&buffer);
    }

    fn create_descriptor_pool(&self, max_sets: u32, _pool_sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        let pool = self.new_handle();
        self.state.borrow_mut().descriptor_pools.insert(pool, DescriptorPoolState { max_sets, allocated: 0 });
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let pool_state = state.descriptor_pools.get_mut(&pool).ok_or(vk::Result::ERROR_UNKNOWN)?;
        pool_state.allocated = 0;
        drop(state);
        self.record(HeadlessEvent::ResetDescriptorPool { pool });
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.borrow_mut().descriptor_pools.remove(&pool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        {
            let mut state = self.state.borrow_mut();
            let pool_state = state.descriptor_pools.get_mut(&pool).ok_or(vk::Result::ERROR_UNKNOWN)?;
            if pool_state.allocated >= pool_state.max_sets {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            pool_state.allocated += 1;
        }
        Ok(self.new_handle())
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[GfxDescriptorWrite]) {
        self.record(HeadlessEvent::UpdateDescriptorSet {
            set,
            write_count: writes.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submissions_retire_in_queue_order() {
        let backend = HeadlessBackend::new();
        let queue = backend.get_device_queue(0);
        let sem = backend.create_timeline_semaphore(0, "timeline").unwrap();

        for value in 1..=3 {
            let info = GfxSubmitInfo::new(&[]).signal(sem, vk::PipelineStageFlags2::ALL_COMMANDS, value);
            backend.queue_submit(queue, &info).unwrap();
        }
        assert_eq!(backend.get_semaphore_counter_value(sem).unwrap(), 0);

        assert!(backend.retire_next());
        assert_eq!(backend.get_semaphore_counter_value(sem).unwrap(), 1);
        assert_eq!(backend.retire_all(), 2);
        assert_eq!(backend.get_semaphore_counter_value(sem).unwrap(), 3);
        assert!(!backend.retire_next());
    }

    #[test]
    fn test_wait_retires_only_what_is_needed() {
        let backend = HeadlessBackend::new();
        let queue = backend.get_device_queue(0);
        let sem = backend.create_timeline_semaphore(0, "timeline").unwrap();
        for value in 1..=2 {
            let info = GfxSubmitInfo::new(&[]).signal(sem, vk::PipelineStageFlags2::ALL_COMMANDS, value);
            backend.queue_submit(queue, &info).unwrap();
        }

        backend.wait_semaphores(&[sem], &[1], u64::MAX).unwrap();
        assert_eq!(backend.get_semaphore_counter_value(sem).unwrap(), 1);
        assert_eq!(backend.pending_submit_count(), 1);
    }

    #[test]
    fn test_cross_queue_wait_blocks_until_signaled() {
        let backend = HeadlessBackend::new();
        let gfx_queue = backend.get_device_queue(0);
        let compute_queue = backend.get_device_queue(1);
        let gfx_sem = backend.create_timeline_semaphore(0, "gfx").unwrap();
        let compute_sem = backend.create_timeline_semaphore(0, "compute").unwrap();

        // compute 等待 gfx 的 1，gfx 晚于 compute 提交
        let compute_submit = GfxSubmitInfo::new(&[])
            .wait(gfx_sem, vk::PipelineStageFlags2::ALL_COMMANDS, 1)
            .signal(compute_sem, vk::PipelineStageFlags2::ALL_COMMANDS, 1);
        backend.queue_submit(compute_queue, &compute_submit).unwrap();
        let gfx_submit = GfxSubmitInfo::new(&[]).signal(gfx_sem, vk::PipelineStageFlags2::ALL_COMMANDS, 1);
        backend.queue_submit(gfx_queue, &gfx_submit).unwrap();

        assert!(backend.retire_next());
        assert_eq!(backend.get_semaphore_counter_value(gfx_sem).unwrap(), 1);
        assert_eq!(backend.get_semaphore_counter_value(compute_sem).unwrap(), 0);
        assert!(backend.retire_next());
        assert_eq!(backend.get_semaphore_counter_value(compute_sem).unwrap(), 1);
    }

    #[test]
    fn test_stalled_wait_times_out() {
        let backend = HeadlessBackend::new();
        let queue = backend.get_device_queue(0);
        let sem = backend.create_timeline_semaphore(0, "timeline").unwrap();
        let info = GfxSubmitInfo::new(&[]).signal(sem, vk::PipelineStageFlags2::ALL_COMMANDS, 1);
        backend.queue_submit(queue, &info).unwrap();

        backend.stall(true);
        assert_eq!(backend.wait_semaphores(&[sem], &[1], 0), Err(vk::Result::TIMEOUT));
        backend.stall(false);
        assert_eq!(backend.wait_semaphores(&[sem], &[1], 0), Ok(()));
    }

    #[test]
    fn test_descriptor_pool_exhaustion() {
        let backend = HeadlessBackend::new();
        let pool = backend.create_descriptor_pool(1, &[]).unwrap();
        let layout = vk::DescriptorSetLayout::null();

        assert!(backend.allocate_descriptor_set(pool, layout).is_ok());
        assert_eq!(backend.allocate_descriptor_set(pool, layout), Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        backend.reset_descriptor_pool(pool).unwrap();
        assert!(backend.allocate_descriptor_set(pool, layout).is_ok());
    }

    #[test]
    fn test_host_buffer_write() {
        let backend = HeadlessBackend::new();
        let buffer = backend.create_host_buffer(8, vk::BufferUsageFlags::TRANSFER_SRC, "stage").unwrap();
        backend.write_host_buffer(buffer.handle, 2, &[1, 2, 3]);
        assert_eq!(backend.host_buffer_contents(buffer.handle).unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
    }
}
