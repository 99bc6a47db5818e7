use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    collections::HashMap,
    rc::Rc,
};

use itertools::Itertools;

use cadence_gfx::{
    commands::command_queue::GfxCommandQueue,
    foundation::{check::fatal_device_lost, queue_family::QueueCapability},
    gfx::Gfx,
    resources::transfer_pool::{GfxTransferAllocation, GfxTransferChunkId, GfxTransferPool, GfxTransferPoolStats},
};

use crate::{
    command_list::CommandList,
    debug_command::DebugCommand,
    descriptor_cache::FrameDescriptorCache,
    frame_counter::{FrameCounter, FrameLabel},
};

/// 一个 queue 在某个 frame slot 中的资源
struct FrameQueueSlot {
    /// 这一帧在该 queue 上最后一次 submit 的 id，0 表示没有 submit
    wait_id: u64,
    transfer_pool: GfxTransferPool,
}

/// 一个 frame slot 的 transient 资源
///
/// 只有在这个 slot 之前的 submission 全部完成之后才会被 reset
pub struct FrameContext {
    label: FrameLabel,
    queue_slots: HashMap<QueueCapability, FrameQueueSlot>,
    descriptor_cache: FrameDescriptorCache,
}

impl FrameContext {
    #[inline]
    pub fn label(&self) -> FrameLabel {
        self.label
    }

    #[inline]
    pub fn descriptor_cache(&self) -> &FrameDescriptorCache {
        &self.descriptor_cache
    }

    #[inline]
    pub fn descriptor_cache_mut(&mut self) -> &mut FrameDescriptorCache {
        &mut self.descriptor_cache
    }

    /// 各个 queue 的 staging pool 使用情况，按 queue 类别排序
    pub fn transfer_stats(&self) -> Vec<(QueueCapability, GfxTransferPoolStats)> {
        self.queue_slots
            .iter()
            .map(|(capability, slot)| (*capability, slot.transfer_pool.stats()))
            .sorted_by_key(|(capability, _)| std::cmp::Reverse(capability.bits()))
            .collect()
    }

    /// 这个 slot 需要等待的 submission，按 queue 类别排序
    pub fn wait_ids(&self) -> Vec<(QueueCapability, u64)> {
        self.queue_slots
            .iter()
            .filter(|(_, slot)| slot.wait_id > 0)
            .map(|(capability, slot)| (*capability, slot.wait_id))
            .sorted_by_key(|(capability, _)| std::cmp::Reverse(capability.bits()))
            .collect()
    }

    fn queue_slot(&mut self, gfx: &Gfx, capability: QueueCapability) -> &mut FrameQueueSlot {
        let label = self.label;
        self.queue_slots.entry(capability).or_insert_with(|| FrameQueueSlot {
            wait_id: 0,
            transfer_pool: gfx.create_transfer_pool(&format!("{}-{}", capability.name(), label)),
        })
    }
}

/// frame pacing 与 frame slot 的管理
///
/// CPU 最多领先 GPU `fif_count` 帧：进入新的一帧时，等待这一帧对应的 slot 上次的 submission 完成，
/// 然后回收这个 slot 的 descriptor set 和 staging 内存。
///
/// 以 `Rc` 共享，command list 持有它的引用。只能在单个线程上使用。
pub struct RenderContext {
    gfx: Rc<Gfx>,
    frame_counter: RefCell<FrameCounter>,
    frames: Vec<RefCell<FrameContext>>,

    /// begin 之后还没有 execute 的 command list 数量
    open_lists: Cell<usize>,
    wait_timeout_ns: u64,
}

// 创建与销毁
impl RenderContext {
    pub fn new(gfx: Rc<Gfx>) -> Rc<Self> {
        let config = gfx.config();
        let fif_count = config.fif_count;
        let frames = (0..fif_count)
            .map(|idx| {
                let label = FrameLabel::from_usize(idx);
                RefCell::new(FrameContext {
                    label,
                    queue_slots: HashMap::new(),
                    descriptor_cache: FrameDescriptorCache::new(
                        gfx.backend().clone(),
                        config.descriptor_sets_per_frame,
                        &format!("frame-{label}-descriptors"),
                    ),
                })
            })
            .collect_vec();
        let wait_timeout_ns = config.frame_wait_timeout_ns();

        log::info!("render context created with {} frames in flight", fif_count);
        Rc::new(Self {
            gfx,
            frame_counter: RefCell::new(FrameCounter::new(fif_count)),
            frames,
            open_lists: Cell::new(0),
            wait_timeout_ns,
        })
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        log::info!("destroying render context at frame {}", self.frame_id());
        // staging 内存和 descriptor pool 销毁之前，GPU 必须已经不再使用它们
        if !std::thread::panicking() {
            self.gfx.wait_idle();
        }
    }
}

// getters
impl RenderContext {
    #[inline]
    pub fn gfx(&self) -> &Rc<Gfx> {
        &self.gfx
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.borrow().frame_id()
    }

    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        self.frame_counter.borrow().frame_label()
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        self.frame_counter.borrow().frame_name()
    }

    /// 某个 frame slot 的资源
    #[inline]
    pub fn frame(&self, label: FrameLabel) -> Ref<'_, FrameContext> {
        self.frames[*label].borrow()
    }

    #[inline]
    pub fn current_frame_mut(&self) -> RefMut<'_, FrameContext> {
        self.frames[*self.frame_label()].borrow_mut()
    }

    #[inline]
    pub fn open_list_count(&self) -> usize {
        self.open_lists.get()
    }
}

// command list 相关
impl RenderContext {
    /// 创建一个在 `capability` 类别的 queue 上录制的 command list
    pub fn create_command_list(self: &Rc<Self>, capability: QueueCapability, name: &str) -> CommandList {
        CommandList::new(self.clone(), self.gfx.queue(capability), name)
    }

    pub(crate) fn on_list_begin(&self) {
        self.open_lists.set(self.open_lists.get() + 1);
    }

    pub(crate) fn on_list_closed(&self) {
        debug_assert!(self.open_lists.get() > 0);
        self.open_lists.set(self.open_lists.get() - 1);
    }

    /// 从当前帧的 staging pool 中分配内存并写入数据
    pub(crate) fn upload(&self, queue: &GfxCommandQueue, data: &[u8]) -> GfxTransferAllocation {
        let mut frame = self.current_frame_mut();
        frame.queue_slot(&self.gfx, queue.capability()).transfer_pool.upload(data)
    }

    /// 记录当前帧在 queue 上的 submission：frame pacing 会等待它，
    /// 它用到的 staging chunk 会被它标记
    pub(crate) fn record_submission(
        &self,
        queue: &GfxCommandQueue,
        submission_id: u64,
        staging_chunks: &[GfxTransferChunkId],
    ) {
        let mut frame = self.current_frame_mut();
        let slot = frame.queue_slot(&self.gfx, queue.capability());
        slot.wait_id = slot.wait_id.max(submission_id);
        slot.transfer_pool.submit(submission_id, staging_chunks);
    }
}

// frame pacing
impl RenderContext {
    /// 进入新的一帧
    ///
    /// 等待新 slot 上一次使用时的所有 submission 完成（超时视为 device lost），
    /// 回收所有 queue 上已经完成的 command buffer，然后 reset 这个 slot 的 transient 资源
    pub fn new_frame(&self) {
        assert_eq!(
            self.open_lists.get(),
            0,
            "new frame while {} command lists are not executed",
            self.open_lists.get()
        );

        let label = self.frame_counter.borrow_mut().advance();
        self.wait_frame_slot(label);
        self.recycle_finished_commands();

        let mut frame = self.frames[*label].borrow_mut();
        frame.descriptor_cache.reset();
        for (capability, slot) in frame.queue_slots.iter_mut() {
            let finished_id = self.gfx.queue(*capability).last_finished_id();
            slot.transfer_pool.reset(finished_id);
            slot.wait_id = 0;
        }
        log::debug!("begin frame {}", self.frame_name());
    }

    /// 等待所有 frame slot 的 submission 完成
    ///
    /// 与 `new_frame` 使用相同的等待逻辑，只是覆盖所有 slot；不会 reset 任何 slot 的资源
    pub fn force_full_sync(&self) {
        assert_eq!(
            self.open_lists.get(),
            0,
            "full sync while {} command lists are recording",
            self.open_lists.get()
        );

        for idx in 0..self.frames.len() {
            self.wait_frame_slot(FrameLabel::from_usize(idx));
        }
        self.recycle_finished_commands();
        log::info!("full sync done at frame {}", self.frame_name());
    }

    /// 阻塞等待 slot 记录的所有 submission，没有 submit 过的 queue 会被跳过
    fn wait_frame_slot(&self, label: FrameLabel) {
        let wait_ids = self.frames[*label].borrow().wait_ids();
        for (capability, submission_id) in wait_ids {
            let queue = self.gfx.queue(capability);
            log::trace!("frame slot {}: wait {} submission {}", label, queue.name(), submission_id);
            if !queue.wait_for_command_submission(submission_id, self.wait_timeout_ns) {
                fatal_device_lost(&format!(
                    "frame slot {} waiting for {} submission {} (timeout: {} ms)",
                    label,
                    queue.name(),
                    submission_id,
                    self.wait_timeout_ns / 1_000_000
                ));
            }
        }
    }

    fn recycle_finished_commands(&self) {
        for queue in self.gfx.queues() {
            queue.query_tracking_id();
            queue.process_in_flight_commands();
        }
    }
}

// debug 相关
impl RenderContext {
    pub fn run_debug_command(&self, command: DebugCommand) {
        log::info!("run debug command {}", command);
        match command {
            DebugCommand::FullSync => self.force_full_sync(),
            DebugCommand::DumpPools => self.dump_pools(),
        }
    }

    fn dump_pools(&self) {
        for queue in self.gfx.queues() {
            let stats = queue.stats();
            log::info!(
                "{}: created {}, idle {}, in-flight {}, recording {}, submission {}, finished {}",
                queue.name(),
                stats.created,
                stats.idle,
                stats.in_flight,
                stats.recording,
                stats.submission_id,
                stats.last_finished_id
            );
        }
        for frame in &self.frames {
            let frame = frame.borrow();
            for (capability, stats) in frame.transfer_stats() {
                log::info!(
                    "frame {} {} staging: {} chunks, {}/{} bytes, referenced by submission {}",
                    frame.label,
                    capability.name(),
                    stats.chunks,
                    stats.used,
                    stats.capacity,
                    stats.last_submission_id
                );
            }
            log::info!("frame {} descriptor sets: {}", frame.label, frame.descriptor_cache.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::{self, Handle};
    use cadence_gfx::{
        foundation::headless::HeadlessEvent,
        resources::{buffer::GfxBufferSlice, descriptor::GfxDescriptorWrite},
    };

    use super::*;
    use crate::{
        command_list::{GraphicsState, execute_command_lists},
        program::GfxProgram,
        test_utils::{create_context, program, render_target},
    };

    fn record_and_execute(context: &Rc<RenderContext>, capability: QueueCapability) -> u64 {
        let mut list = context.create_command_list(capability, "frame");
        list.begin();
        list.insert_label("work");
        list.end();
        execute_command_lists(&mut [&mut list])
    }

    #[test]
    fn test_new_frame_waits_for_slot_submission_only() {
        let (backend, context) = create_context(2);
        let queue = context.gfx().queue(QueueCapability::GRAPHICS);

        assert_eq!(record_and_execute(&context, QueueCapability::GRAPHICS), 1);
        context.new_frame();
        assert_eq!(record_and_execute(&context, QueueCapability::GRAPHICS), 2);
        assert_eq!(queue.last_finished_id(), 0);

        // frame 2 与 frame 0 共用 slot A，只等待 frame 0 的 submission
        context.new_frame();
        assert_eq!(context.frame_id(), 2);
        assert_eq!(queue.last_finished_id(), 1);
        assert_eq!(backend.pending_submit_count(), 1);
        assert!(!queue.poll_command_submission(2));
    }

    #[test]
    fn test_first_frames_do_not_wait() {
        let (backend, context) = create_context(3);
        record_and_execute(&context, QueueCapability::GRAPHICS);
        context.new_frame();
        record_and_execute(&context, QueueCapability::GRAPHICS);
        context.new_frame();

        assert_eq!(backend.pending_submit_count(), 2);
    }

    #[test]
    fn test_command_buffers_recycled_across_frames() {
        let (backend, context) = create_context(2);
        for _ in 0..10 {
            record_and_execute(&context, QueueCapability::GRAPHICS);
            backend.retire_all();
            context.new_frame();
        }

        assert_eq!(backend.allocated_command_buffer_count(), 1);
        let stats = context.gfx().queue(QueueCapability::GRAPHICS).stats();
        assert_eq!((stats.created, stats.idle, stats.in_flight), (1, 1, 0));
    }

    #[test]
    fn test_slot_resources_reset_after_wait() {
        let (backend, context) = create_context(2);
        let gfx_program = program(vk::PipelineBindPoint::GRAPHICS, 10);
        gfx_program.set_descriptors(0, &[GfxDescriptorWrite::storage_buffer(0, vk::Buffer::from_raw(0x5000), 0, 16)]);
        let dyn_program: Rc<dyn GfxProgram> = gfx_program;

        let mut list = context.create_command_list(QueueCapability::GRAPHICS, "frame");
        list.begin();
        list.upload_buffer(GfxBufferSlice::new(vk::Buffer::from_raw(0x5001), 0, 64), &[7; 48]);
        list.set_graphics_state(&GraphicsState::new(dyn_program, render_target("a", 1, false)));
        list.draw(3, 1, 0, 0);
        list.end();
        let id = execute_command_lists(&mut [&mut list]);

        let slot_a = context.frame_label();
        assert_eq!(context.frame(slot_a).descriptor_cache().len(), 1);
        assert_eq!(context.frame(slot_a).transfer_stats()[0].1.used, 48);

        context.new_frame();
        context.new_frame();
        assert_eq!(context.frame_label(), slot_a);
        assert!(context.gfx().queue(QueueCapability::GRAPHICS).last_finished_id() >= id);

        let frame = context.frame(slot_a);
        assert!(frame.descriptor_cache().is_empty());
        assert!(frame.wait_ids().is_empty());
        assert_eq!(frame.transfer_stats()[0].1.used, 0);
        assert_eq!(frame.transfer_stats()[0].1.chunks, 1);
        assert!(backend.take_events().iter().any(|e| matches!(e, HeadlessEvent::ResetDescriptorPool { .. })));
    }

    #[test]
    fn test_interleaved_uploads_tag_staging_with_each_submission() {
        let (_backend, context) = create_context(2);
        let dst = GfxBufferSlice::new(vk::Buffer::from_raw(0x5000), 0, 64);

        let mut first = context.create_command_list(QueueCapability::TRANSFER, "first");
        let mut second = context.create_command_list(QueueCapability::TRANSFER, "second");
        first.begin();
        second.begin();
        first.upload_buffer(dst, &[1; 16]);
        second.upload_buffer(dst, &[2; 16]);
        first.end();
        second.end();

        assert_eq!(execute_command_lists(&mut [&mut first]), 1);
        let stats = context.frame(context.frame_label()).transfer_stats()[0].1;
        assert_eq!((stats.chunks, stats.last_submission_id), (1, 1));

        // 第二个 list 也读取同一个 chunk，它的 submission 同样需要标记
        assert_eq!(execute_command_lists(&mut [&mut second]), 2);
        let stats = context.frame(context.frame_label()).transfer_stats()[0].1;
        assert_eq!((stats.chunks, stats.last_submission_id), (1, 2));

        // 没有 upload 的 submission 不会标记 chunk
        first.begin();
        first.end();
        assert_eq!(execute_command_lists(&mut [&mut first]), 3);
        assert_eq!(context.frame(context.frame_label()).transfer_stats()[0].1.last_submission_id, 2);
    }

    #[test]
    fn test_slot_tracks_every_queue() {
        let (_backend, context) = create_context(2);
        let gfx_id = record_and_execute(&context, QueueCapability::GRAPHICS);
        let transfer_id = record_and_execute(&context, QueueCapability::TRANSFER);
        let compute_id = record_and_execute(&context, QueueCapability::COMPUTE);
        let gfx_id_2 = record_and_execute(&context, QueueCapability::GRAPHICS);

        assert_eq!((gfx_id, transfer_id, compute_id, gfx_id_2), (1, 1, 1, 2));
        assert_eq!(
            context.frame(context.frame_label()).wait_ids(),
            vec![
                (QueueCapability::all(), 2),
                (QueueCapability::COMPUTE | QueueCapability::TRANSFER, 1),
                (QueueCapability::TRANSFER, 1),
            ]
        );
    }

    #[test]
    fn test_full_sync_waits_for_every_slot() {
        let (backend, context) = create_context(3);
        for _ in 0..3 {
            record_and_execute(&context, QueueCapability::GRAPHICS);
            record_and_execute(&context, QueueCapability::COMPUTE);
            context.new_frame();
        }
        assert!(backend.pending_submit_count() > 0);

        context.run_debug_command(DebugCommand::FullSync);
        assert_eq!(backend.pending_submit_count(), 0);
        for queue in context.gfx().queues() {
            let stats = queue.stats();
            assert_eq!(stats.last_finished_id, stats.submission_id);
            assert_eq!(stats.idle, stats.created);
        }
        context.run_debug_command(DebugCommand::DumpPools);
    }

    #[test]
    #[should_panic(expected = "full sync while 1 command lists are recording")]
    fn test_full_sync_while_recording_panics() {
        let (_backend, context) = create_context(2);
        let mut list = context.create_command_list(QueueCapability::GRAPHICS, "frame");
        list.begin();
        context.force_full_sync();
    }

    #[test]
    #[should_panic(expected = "new frame while 1 command lists are not executed")]
    fn test_new_frame_with_pending_list_panics() {
        let (_backend, context) = create_context(2);
        let mut list = context.create_command_list(QueueCapability::GRAPHICS, "frame");
        list.begin();
        list.end();
        context.new_frame();
    }

    #[test]
    #[should_panic(expected = "device lost")]
    fn test_hung_gpu_is_fatal_on_frame_wait() {
        let (backend, context) = create_context(2);
        record_and_execute(&context, QueueCapability::GRAPHICS);
        backend.stall(true);
        context.new_frame();
        context.new_frame();
    }

    #[test]
    #[should_panic(expected = "recorded in an earlier frame")]
    fn test_execute_list_from_previous_frame_panics() {
        let (_backend, context) = create_context(2);
        let mut list = context.create_command_list(QueueCapability::GRAPHICS, "frame");
        list.begin();
        list.end();
        // 绕过 new_frame 的检查，模拟跨帧 execute
        context.on_list_closed();
        context.new_frame();
        context.on_list_begin();
        execute_command_lists(&mut [&mut list]);
    }
}
