use std::rc::Rc;

use arrayvec::ArrayVec;
use ash::vk;
use itertools::Itertools;

use cadence_gfx::{
    basic::color::LabelColor,
    commands::{
        barrier::{GfxBufferBarrier, GfxBufferStateBarrier, GfxImageBarrier, GfxTextureBarrier},
        command_buffer::{GfxCommandBufferKey, GfxCommandRecorder},
        command_queue::GfxCommandQueue,
    },
    config::{MAX_BATCHED_BARRIERS, MAX_VERTEX_BUFFERS},
    foundation::queue_family::QueueCapability,
    resources::{
        buffer::{GfxBufferSlice, GfxIndexBinding},
        texture::GfxTexture,
        transfer_pool::GfxTransferChunkId,
    },
};

use crate::{
    program::{GfxBoundDescriptorSets, GfxProgram},
    render_context::RenderContext,
    render_target::RenderTarget,
};

fn same_object<T: ?Sized>(a: &Option<Rc<T>>, b: &Option<Rc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// 绘制需要的状态
///
/// 比较时 program 和 render target 按对象身份比较，buffer 按 handle 和 offset 比较
#[derive(Clone, Default)]
pub struct GraphicsState {
    pub program: Option<Rc<dyn GfxProgram>>,
    pub render_target: Option<Rc<dyn RenderTarget>>,
    pub vertex_buffers: ArrayVec<GfxBufferSlice, MAX_VERTEX_BUFFERS>,
    pub index_buffer: Option<GfxIndexBinding>,
}

impl GraphicsState {
    pub fn new(program: Rc<dyn GfxProgram>, render_target: Rc<dyn RenderTarget>) -> Self {
        Self {
            program: Some(program),
            render_target: Some(render_target),
            ..Default::default()
        }
    }

    /// builder
    #[inline]
    pub fn vertex_buffer(mut self, slice: GfxBufferSlice) -> Self {
        self.vertex_buffers.push(slice);
        self
    }

    /// builder
    #[inline]
    pub fn index_buffer(mut self, slice: GfxBufferSlice, index_type: vk::IndexType) -> Self {
        self.index_buffer = Some(GfxIndexBinding { slice, index_type });
        self
    }
}

impl PartialEq for GraphicsState {
    fn eq(&self, other: &Self) -> bool {
        same_object(&self.program, &other.program)
            && same_object(&self.render_target, &other.render_target)
            && self.vertex_buffers == other.vertex_buffers
            && self.index_buffer == other.index_buffer
    }
}

#[derive(Clone, Default)]
pub struct ComputeState {
    pub program: Option<Rc<dyn GfxProgram>>,
}

impl ComputeState {
    pub fn new(program: Rc<dyn GfxProgram>) -> Self {
        Self { program: Some(program) }
    }
}

enum CommandListState {
    Idle,
    Recording {
        key: GfxCommandBufferKey,
        recorder: GfxCommandRecorder,
        frame_id: u64,
    },
    /// 录制结束，等待 execute
    Ended { key: GfxCommandBufferKey, frame_id: u64 },
}

/// 在一个 command buffer 上录制命令
///
/// - `begin` 从 queue 取得 command buffer，`end` 结束录制，`execute_command_lists` 提交
/// - 缓存当前的 graphics / compute 状态，相同的状态不会重复绑定
/// - render pass 在 `set_graphics_state` 时惰性开启；切换 target、切换到 compute、
///   插入 barrier、copy 或者 `end` 时关闭
///
/// execute 之后可以再次 `begin`，复用同一个 command list。
pub struct CommandList {
    context: Rc<RenderContext>,
    queue: Rc<GfxCommandQueue>,
    name: String,

    state: CommandListState,
    graphics_state: GraphicsState,
    compute_state: ComputeState,

    /// 这个 command list 上已经绑定的 descriptor set
    graphics_bindings: GfxBoundDescriptorSets,
    compute_bindings: GfxBoundDescriptorSets,

    /// 这次录制写入过的 staging chunk，execute 时交给 submission 标记
    staging_chunks: Vec<GfxTransferChunkId>,
}

// 创建与销毁
impl CommandList {
    pub(crate) fn new(context: Rc<RenderContext>, queue: Rc<GfxCommandQueue>, name: &str) -> Self {
        Self {
            context,
            queue,
            name: name.to_string(),
            state: CommandListState::Idle,
            graphics_state: GraphicsState::default(),
            compute_state: ComputeState::default(),
            graphics_bindings: GfxBoundDescriptorSets::default(),
            compute_bindings: GfxBoundDescriptorSets::default(),
            staging_chunks: Vec::new(),
        }
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        let key = match self.state {
            CommandListState::Idle => return,
            CommandListState::Recording { key, .. } | CommandListState::Ended { key, .. } => key,
        };
        log::warn!("command list {} dropped before being executed, discard its recording", self.name);
        if matches!(self.state, CommandListState::Recording { .. }) {
            self.close_pass();
        }
        self.queue.discard_recording(key);
        self.staging_chunks.clear();
        self.context.on_list_closed();
        self.state = CommandListState::Idle;
    }
}

// getters
impl CommandList {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn queue(&self) -> &Rc<GfxCommandQueue> {
        &self.queue
    }

    #[inline]
    pub fn capability(&self) -> QueueCapability {
        self.queue.capability()
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        matches!(self.state, CommandListState::Recording { .. })
    }

    /// render pass 是否处于开启状态
    #[inline]
    pub fn is_pass_open(&self) -> bool {
        self.graphics_state.render_target.is_some()
    }

    /// 正在录制的 command buffer，用于直接写入 command list 没有封装的命令
    pub fn recorder(&self) -> &GfxCommandRecorder {
        match &self.state {
            CommandListState::Recording { recorder, .. } => recorder,
            _ => panic!("command list {} is not recording", self.name),
        }
    }
}

// 录制的开始与结束
impl CommandList {
    pub fn begin(&mut self) {
        assert!(
            matches!(self.state, CommandListState::Idle),
            "command list {} begins while it is still recording or not executed",
            self.name
        );

        let debug_name = format!("{}{}", self.context.frame_name(), self.name);
        let key = self.queue.create_command_buffer(&debug_name);
        self.state = CommandListState::Recording {
            key,
            recorder: self.queue.recorder(key),
            frame_id: self.context.frame_id(),
        };
        self.graphics_state = GraphicsState::default();
        self.compute_state = ComputeState::default();
        self.graphics_bindings.clear();
        self.compute_bindings.clear();
        self.staging_chunks.clear();
        self.context.on_list_begin();
    }

    /// 关闭 render pass 并结束录制
    pub fn end(&mut self) {
        self.close_pass();
        let CommandListState::Recording { key, frame_id, .. } = self.state else {
            panic!("command list {} ends without begin", self.name);
        };
        self.queue.end_command_buffer(key);
        self.state = CommandListState::Ended { key, frame_id };
    }

    fn close_pass(&mut self) {
        if let Some(render_target) = self.graphics_state.render_target.take() {
            render_target.end_pass(self.recorder());
        }
    }

    fn assert_capability(&self, capability: QueueCapability, what: &str) {
        assert!(
            self.queue.capability().contains(capability),
            "command list {} on {} can not {}",
            self.name,
            self.queue.name(),
            what
        );
    }
}

// 状态设置
impl CommandList {
    /// 设置绘制状态，与当前状态相同时不会录制任何命令
    pub fn set_graphics_state(&mut self, state: &GraphicsState) {
        self.assert_capability(QueueCapability::GRAPHICS, "set graphics state");
        let recorder = self.recorder().clone();
        if *state == self.graphics_state {
            return;
        }

        if !same_object(&self.graphics_state.render_target, &state.render_target) {
            self.close_pass();
            if let Some(render_target) = &state.render_target {
                render_target.begin_pass(&recorder);
            }
        }

        if !same_object(&self.graphics_state.program, &state.program) {
            if let Some(program) = &state.program {
                program.use_program(&recorder, &mut self.graphics_bindings);
            }
        }

        if self.graphics_state.vertex_buffers != state.vertex_buffers && !state.vertex_buffers.is_empty() {
            recorder.cmd_bind_vertex_buffers(0, &state.vertex_buffers);
        }

        if self.graphics_state.index_buffer != state.index_buffer {
            if let Some(index_buffer) = state.index_buffer {
                recorder.cmd_bind_index_buffer(index_buffer);
            }
        }

        self.graphics_state = state.clone();
    }

    /// 设置计算状态，会关闭当前的 render pass
    pub fn set_compute_state(&mut self, state: &ComputeState) {
        self.assert_capability(QueueCapability::COMPUTE, "set compute state");
        self.close_pass();

        if !same_object(&self.compute_state.program, &state.program) {
            if let Some(program) = &state.program {
                let recorder = self.recorder().clone();
                program.use_program(&recorder, &mut self.compute_bindings);
            }
        }
        self.compute_state = state.clone();
    }
}

// 绘制类型的命令
impl CommandList {
    /// 清除所有 color attachment，范围是整个 render area
    pub fn clear_color(&mut self, color: glam::Vec4) {
        let render_target = self.open_render_target("clear color");
        assert!(render_target.has_color(), "render target {} has no color attachment", render_target.name());

        let clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: color.to_array(),
            },
        };
        let attachments = (0..render_target.color_attachment_count())
            .map(|idx| vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: idx,
                clear_value,
            })
            .collect_vec();
        self.recorder().cmd_clear_attachments(&attachments, &[Self::full_clear_rect(render_target.as_ref())]);
    }

    /// 清除 depth，`stencil` 为 Some 时同时清除 stencil
    pub fn clear_depth_stencil(&mut self, depth: f32, stencil: Option<u32>) {
        let render_target = self.open_render_target("clear depth stencil");
        assert!(render_target.has_depth(), "render target {} has no depth attachment", render_target.name());

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if stencil.is_some() {
            assert!(render_target.has_stencil(), "render target {} has no stencil", render_target.name());
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }
        let attachment = vk::ClearAttachment {
            aspect_mask,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth,
                    stencil: stencil.unwrap_or(0),
                },
            },
        };
        self.recorder().cmd_clear_attachments(&[attachment], &[Self::full_clear_rect(render_target.as_ref())]);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.flush_graphics_bindings("draw");
        self.recorder().cmd_draw(vertex_count, instance_count, first_vertex, first_instance);
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        assert!(self.graphics_state.index_buffer.is_some(), "command list {}: draw indexed without index buffer", self.name);
        self.flush_graphics_bindings("draw indexed");
        self.recorder().cmd_draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance);
    }

    pub fn dispatch(&mut self, group_count: glam::UVec3) {
        let Some(program) = self.compute_state.program.clone() else {
            panic!("command list {}: dispatch without compute program", self.name);
        };
        let recorder = self.recorder().clone();
        program.flush_bindings(
            &recorder,
            self.context.current_frame_mut().descriptor_cache_mut(),
            &mut self.compute_bindings,
        );
        recorder.cmd_dispatch(group_count);
    }

    fn open_render_target(&self, what: &str) -> Rc<dyn RenderTarget> {
        match &self.graphics_state.render_target {
            Some(render_target) => render_target.clone(),
            None => panic!("command list {}: {} without an open render pass", self.name, what),
        }
    }

    fn full_clear_rect(render_target: &dyn RenderTarget) -> vk::ClearRect {
        vk::ClearRect {
            rect: render_target.render_area(),
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn flush_graphics_bindings(&mut self, what: &str) {
        self.open_render_target(what);
        let Some(program) = self.graphics_state.program.clone() else {
            panic!("command list {}: {} without graphics program", self.name, what);
        };
        let recorder = self.recorder().clone();
        program.flush_bindings(
            &recorder,
            self.context.current_frame_mut().descriptor_cache_mut(),
            &mut self.graphics_bindings,
        );
    }
}

// 同步相关命令
impl CommandList {
    /// 批量转换纹理的 layout，会关闭当前的 render pass
    pub fn set_texture_state(&mut self, barriers: &[GfxTextureBarrier]) {
        assert!(
            barriers.len() <= MAX_BATCHED_BARRIERS,
            "command list {}: {} texture barriers in one batch, limit is {}",
            self.name,
            barriers.len(),
            MAX_BATCHED_BARRIERS
        );
        if barriers.is_empty() {
            return;
        }
        self.close_pass();

        let capability = self.queue.capability();
        let image_barriers = barriers
            .iter()
            .map(|barrier| barrier.to_image_barrier(capability))
            .collect::<ArrayVec<GfxImageBarrier, MAX_BATCHED_BARRIERS>>();
        self.recorder().cmd_pipeline_barrier(&image_barriers, &[]);
    }

    /// 批量转换 buffer 的访问状态，会关闭当前的 render pass
    pub fn set_buffer_state(&mut self, barriers: &[GfxBufferStateBarrier]) {
        assert!(
            barriers.len() <= MAX_BATCHED_BARRIERS,
            "command list {}: {} buffer barriers in one batch, limit is {}",
            self.name,
            barriers.len(),
            MAX_BATCHED_BARRIERS
        );
        if barriers.is_empty() {
            return;
        }
        self.close_pass();

        let capability = self.queue.capability();
        let buffer_barriers = barriers
            .iter()
            .map(|barrier| barrier.to_buffer_barrier(capability))
            .collect::<ArrayVec<GfxBufferBarrier, MAX_BATCHED_BARRIERS>>();
        self.recorder().cmd_pipeline_barrier(&[], &buffer_barriers);
    }
}

// 数据传输类型
impl CommandList {
    pub fn copy_buffer(&mut self, src: GfxBufferSlice, dst: GfxBufferSlice) {
        self.assert_capability(QueueCapability::TRANSFER, "copy buffer");
        self.close_pass();
        self.recorder().cmd_copy_buffer(src, dst);
    }

    /// 通过当前帧的 staging 内存上传数据到 `dst`
    ///
    /// `dst` 之后的使用需要调用方通过 `set_buffer_state` 同步
    pub fn upload_buffer(&mut self, dst: GfxBufferSlice, data: &[u8]) {
        self.assert_capability(QueueCapability::TRANSFER, "upload buffer");
        assert!(
            data.len() as vk::DeviceSize <= dst.size,
            "command list {}: upload {} bytes into a slice of {} bytes",
            self.name,
            data.len(),
            dst.size
        );
        if data.is_empty() {
            return;
        }

        let staging = self.stage(data);
        self.copy_buffer(staging, GfxBufferSlice::new(dst.buffer, dst.offset, staging.size));
    }

    pub fn upload_pod<T: bytemuck::Pod>(&mut self, dst: GfxBufferSlice, data: &[T]) {
        self.upload_buffer(dst, bytemuck::cast_slice(data));
    }

    /// 上传纹理的第 0 层 mip，纹理需要处于 `TextureLayout::TransferDst`
    pub fn upload_texture(&mut self, texture: &dyn GfxTexture, data: &[u8], extent: vk::Extent3D) {
        self.assert_capability(QueueCapability::TRANSFER, "upload texture");
        assert!(!data.is_empty(), "command list {}: upload an empty texture", self.name);
        self.close_pass();

        let staging = self.stage(data);
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: texture.aspect_mask(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: extent,
        };
        self.recorder().cmd_copy_buffer_to_image(
            staging,
            texture.vk_image(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            region,
        );
    }
}

impl CommandList {
    /// 写入当前帧的 staging 内存，并记下用到的 chunk
    fn stage(&mut self, data: &[u8]) -> GfxBufferSlice {
        let allocation = self.context.upload(&self.queue, data);
        if !self.staging_chunks.contains(&allocation.chunk) {
            self.staging_chunks.push(allocation.chunk);
        }
        allocation.region
    }
}

// debug 相关命令
impl CommandList {
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        self.recorder().begin_label(label_name, label_color);
    }

    #[inline]
    pub fn end_label(&self) {
        self.recorder().end_label();
    }

    #[inline]
    pub fn insert_label(&self, label_name: &str) {
        self.recorder().insert_label(label_name, LabelColor::COLOR_CMD);
    }
}

/// 将录制完成的 command list 作为一个 batch 提交
///
/// 所有 command list 必须属于同一个 render context 和同一个 queue，并且在当前帧录制、已经 `end`。
/// 提交之后 command list 回到 idle 状态，可以再次 `begin`。返回这次 submit 的 id。
pub fn execute_command_lists(lists: &mut [&mut CommandList]) -> u64 {
    assert!(!lists.is_empty(), "execute zero command lists");
    let context = lists[0].context.clone();
    let queue = lists[0].queue.clone();

    let keys = lists
        .iter()
        .map(|list| {
            assert!(Rc::ptr_eq(&list.context, &context), "command list {} belongs to another render context", list.name);
            assert!(
                Rc::ptr_eq(&list.queue, &queue),
                "command list {} records on {}, not {}",
                list.name,
                list.queue.name(),
                queue.name()
            );
            let CommandListState::Ended { key, frame_id } = list.state else {
                panic!("command list {} is executed before end", list.name);
            };
            assert_eq!(frame_id, context.frame_id(), "command list {} was recorded in an earlier frame", list.name);
            key
        })
        .collect_vec();

    let staging_chunks = lists.iter().flat_map(|list| list.staging_chunks.iter().copied()).unique().collect_vec();

    let submission_id = queue.submit(&keys);
    for list in lists.iter_mut() {
        list.state = CommandListState::Idle;
        list.staging_chunks.clear();
        context.on_list_closed();
    }
    context.record_submission(&queue, submission_id, &staging_chunks);

    log::trace!("{}: execute {} command lists as submission {}", queue.name(), lists.len(), submission_id);
    submission_id
}
