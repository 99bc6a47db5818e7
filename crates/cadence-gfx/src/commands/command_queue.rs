use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use ash::vk;
use slotmap::SlotMap;

use crate::{
    basic::color::LabelColor,
    commands::{
        command_buffer::{GfxCommandBuffer, GfxCommandBufferKey, GfxCommandBufferState, GfxCommandRecorder},
        semaphore::GfxTimelineSemaphore,
        submit_info::{GfxSemaphoreList, GfxSemaphoreSubmit, GfxSubmitInfo},
    },
    config::MAX_SUBMIT_SEMAPHORES,
    foundation::{
        backend::GfxBackend,
        check::fatal_device_lost,
        queue_family::{GfxQueueFamily, QueueCapability},
    },
    vk_check,
};

/// queue 中 command buffer 的统计，用于 pool dump
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxQueueStats {
    pub created: usize,
    pub idle: usize,
    pub in_flight: usize,
    /// 正在录制或者录制完成等待 submit 的数量
    pub recording: usize,
    pub submission_id: u64,
    pub last_finished_id: u64,
}

/// 一个硬件 queue，以及在它上面执行的所有 command buffer
///
/// # 完成追踪
/// 每次 submit 分配一个递增的 submission id，并在 queue 自己的 timeline semaphore 上 signal 这个 id。
/// `last_finished_id` 是已知完成的最大 id，只会增大，且不超过 `submission_id`。
///
/// # command buffer 的归属
/// 每个 command buffer 在任意时刻只处于以下之一：idle pool、in-flight 列表、正在被录制。
/// in-flight 的 command buffer 只有在 `process_in_flight_commands` 中确认完成后才会回到 idle pool。
///
/// 所有函数都是 `&self`，内部状态使用 `Cell` / `RefCell`，只能在单个线程上使用。
pub struct GfxCommandQueue {
    backend: Rc<dyn GfxBackend>,
    vk_queue: vk::Queue,
    queue_family: GfxQueueFamily,
    capability: QueueCapability,
    name: String,

    timeline: GfxTimelineSemaphore,
    submission_id: Cell<u64>,
    last_finished_id: Cell<u64>,

    command_buffers: RefCell<SlotMap<GfxCommandBufferKey, GfxCommandBuffer>>,
    idle: RefCell<Vec<GfxCommandBufferKey>>,
    in_flight: RefCell<Vec<GfxCommandBufferKey>>,

    /// 只对下一次 submit 有效
    pending_waits: RefCell<GfxSemaphoreList>,
    pending_signals: RefCell<GfxSemaphoreList>,

    /// `wait_idle` 和 `one_time_exec` 的等待超时
    wait_timeout_ns: u64,
}

// 创建与销毁
impl GfxCommandQueue {
    pub fn new(
        backend: Rc<dyn GfxBackend>,
        queue_family: GfxQueueFamily,
        capability: QueueCapability,
        wait_timeout_ns: u64,
    ) -> Self {
        let capability = capability.class();
        assert!(
            queue_family.supports(capability),
            "queue family {} ({:?}) does not support {:?}",
            queue_family.name,
            queue_family.queue_flags,
            capability
        );

        let name = format!("{}-queue", capability.name());
        let vk_queue = backend.get_device_queue(queue_family.queue_family_index);
        backend.set_debug_name(vk::ObjectType::QUEUE, vk::Handle::as_raw(vk_queue), &name);
        let timeline = GfxTimelineSemaphore::new(backend.clone(), 0, &format!("{name}-timeline"));

        log::info!(
            "create command queue {}: family {} ({})",
            name,
            queue_family.queue_family_index,
            queue_family.name
        );

        Self {
            backend,
            vk_queue,
            queue_family,
            capability,
            name,
            timeline,
            submission_id: Cell::new(0),
            last_finished_id: Cell::new(0),
            command_buffers: RefCell::new(SlotMap::with_key()),
            idle: RefCell::new(Vec::new()),
            in_flight: RefCell::new(Vec::new()),
            pending_waits: RefCell::new(GfxSemaphoreList::new()),
            pending_signals: RefCell::new(GfxSemaphoreList::new()),
            wait_timeout_ns,
        }
    }
}

impl Drop for GfxCommandQueue {
    fn drop(&mut self) {
        log::info!("destroying command queue {}", self.name);

        // 销毁之前确保 GPU 不再使用任何 command buffer
        let submission_id = self.submission_id.get();
        if submission_id > self.last_finished_id.get() && !self.timeline.wait_timeline(submission_id, self.wait_timeout_ns)
        {
            log::error!("queue {} still busy at destruction, submission {}", self.name, submission_id);
        }

        let recording = self
            .command_buffers
            .borrow()
            .values()
            .filter(|cmd| matches!(cmd.state, GfxCommandBufferState::Recording | GfxCommandBufferState::Executable))
            .count();
        if recording > 0 {
            log::warn!("queue {} destroyed with {} command buffers still recording", self.name, recording);
        }

        for (_, cmd) in self.command_buffers.borrow_mut().drain() {
            self.backend.destroy_command_pool(cmd.command_pool);
        }
    }
}

// getters
impl GfxCommandQueue {
    #[inline]
    pub fn vk_queue(&self) -> vk::Queue {
        self.vk_queue
    }

    #[inline]
    pub fn queue_family(&self) -> &GfxQueueFamily {
        &self.queue_family
    }

    #[inline]
    pub fn capability(&self) -> QueueCapability {
        self.capability
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn backend(&self) -> &Rc<dyn GfxBackend> {
        &self.backend
    }

    /// queue 自己的 timeline semaphore，其他 queue 可以等待它
    #[inline]
    pub fn timeline_semaphore(&self) -> vk::Semaphore {
        self.timeline.handle()
    }

    /// 最近一次分配的 submission id
    #[inline]
    pub fn submission_id(&self) -> u64 {
        self.submission_id.get()
    }

    /// 已知完成的最大 submission id，不会查询 GPU
    #[inline]
    pub fn last_finished_id(&self) -> u64 {
        self.last_finished_id.get()
    }

    /// 指定 command buffer 的状态，key 无效时返回 None
    pub fn command_buffer_state(&self, key: GfxCommandBufferKey) -> Option<GfxCommandBufferState> {
        self.command_buffers.borrow().get(key).map(|cmd| cmd.state)
    }

    /// 指定 command buffer 最近一次 submit 的 id
    pub fn command_buffer_submission_id(&self, key: GfxCommandBufferKey) -> Option<u64> {
        self.command_buffers.borrow().get(key).map(|cmd| cmd.submission_id)
    }

    pub fn stats(&self) -> GfxQueueStats {
        let created = self.command_buffers.borrow().len();
        let idle = self.idle.borrow().len();
        let in_flight = self.in_flight.borrow().len();
        GfxQueueStats {
            created,
            idle,
            in_flight,
            recording: created - idle - in_flight,
            submission_id: self.submission_id.get(),
            last_finished_id: self.last_finished_id.get(),
        }
    }
}

// command buffer 的分配与录制
impl GfxCommandQueue {
    /// 取得一个 command buffer 并开始录制
    ///
    /// 优先复用 idle pool 中的 command buffer（它之前的 submission 已经完成，复用前 reset 其 pool），
    /// 否则创建新的 pool 和 command buffer
    pub fn create_command_buffer(&self, debug_name: &str) -> GfxCommandBufferKey {
        let reused = self.idle.borrow_mut().pop();
        let key = match reused {
            Some(key) => {
                let mut command_buffers = self.command_buffers.borrow_mut();
                let cmd = &mut command_buffers[key];
                debug_assert!(cmd.submission_id <= self.last_finished_id.get());
                vk_check!(self.backend.reset_command_pool(cmd.command_pool));
                cmd.name = debug_name.to_string();
                key
            }
            None => {
                let pool_name = format!("{}-pool-{}", self.name, self.command_buffers.borrow().len());
                let command_pool =
                    vk_check!(self.backend.create_command_pool(self.queue_family.queue_family_index, &pool_name));
                let vk_handle = vk_check!(self.backend.allocate_command_buffer(command_pool, debug_name));

                let key = self.command_buffers.borrow_mut().insert(GfxCommandBuffer {
                    vk_handle,
                    command_pool,
                    capability: self.capability,
                    submission_id: 0,
                    state: GfxCommandBufferState::Idle,
                    name: debug_name.to_string(),
                });
                log::debug!("queue {}: allocate command buffer #{}", self.name, self.command_buffers.borrow().len());
                key
            }
        };

        let vk_handle = {
            let mut command_buffers = self.command_buffers.borrow_mut();
            let cmd = &mut command_buffers[key];
            cmd.state = GfxCommandBufferState::Recording;
            cmd.vk_handle
        };
        vk_check!(self.backend.begin_command_buffer(vk_handle));
        self.backend.cmd_begin_label(vk_handle, debug_name, LabelColor::COLOR_CMD);
        key
    }

    /// 用于向录制中的 command buffer 写入命令
    pub fn recorder(&self, key: GfxCommandBufferKey) -> GfxCommandRecorder {
        let command_buffers = self.command_buffers.borrow();
        let cmd = &command_buffers[key];
        assert_eq!(cmd.state, GfxCommandBufferState::Recording, "command buffer {} is not recording", cmd.name);
        GfxCommandRecorder::new(self.backend.clone(), cmd.vk_handle)
    }

    /// 结束录制，之后可以 submit
    pub fn end_command_buffer(&self, key: GfxCommandBufferKey) {
        let mut command_buffers = self.command_buffers.borrow_mut();
        let cmd = &mut command_buffers[key];
        assert_eq!(cmd.state, GfxCommandBufferState::Recording, "command buffer {} is not recording", cmd.name);
        self.backend.cmd_end_label(cmd.vk_handle);
        vk_check!(self.backend.end_command_buffer(cmd.vk_handle));
        cmd.state = GfxCommandBufferState::Executable;
    }

    /// 放弃一个没有 submit 的 command buffer，直接回到 idle pool
    ///
    /// 下次复用时会 reset 它的 pool
    pub fn discard_recording(&self, key: GfxCommandBufferKey) {
        let mut command_buffers = self.command_buffers.borrow_mut();
        let cmd = &mut command_buffers[key];
        match cmd.state {
            GfxCommandBufferState::Recording => {
                self.backend.cmd_end_label(cmd.vk_handle);
                vk_check!(self.backend.end_command_buffer(cmd.vk_handle));
            }
            GfxCommandBufferState::Executable => {}
            state => panic!("can not discard command buffer {} in state {:?}", cmd.name, state),
        }
        log::debug!("queue {}: discard command buffer {}", self.name, cmd.name);
        cmd.state = GfxCommandBufferState::Idle;
        self.idle.borrow_mut().push(key);
    }
}

// submit 与依赖
impl GfxCommandQueue {
    /// 下一次 submit 需要等待的 semaphore
    pub fn add_wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, stage: vk::PipelineStageFlags2) {
        let mut waits = self.pending_waits.borrow_mut();
        assert!(
            waits.len() < MAX_SUBMIT_SEMAPHORES,
            "queue {}: too many wait semaphores, limit is {}",
            self.name,
            MAX_SUBMIT_SEMAPHORES
        );
        waits.push(GfxSemaphoreSubmit { semaphore, value, stage });
    }

    /// 下一次 submit 需要额外 signal 的 semaphore
    ///
    /// 最后一个位置留给 queue 自己的 timeline
    pub fn add_signal_semaphore(&self, semaphore: vk::Semaphore, value: u64, stage: vk::PipelineStageFlags2) {
        let mut signals = self.pending_signals.borrow_mut();
        assert!(
            signals.len() < MAX_SUBMIT_SEMAPHORES - 1,
            "queue {}: too many signal semaphores, limit is {} (one slot is reserved)",
            self.name,
            MAX_SUBMIT_SEMAPHORES - 1
        );
        signals.push(GfxSemaphoreSubmit { semaphore, value, stage });
    }

    /// 下一次 submit 需要等待另一个 queue 的某个 submission 完成
    pub fn add_wait_queue(&self, other: &GfxCommandQueue, submission_id: u64) {
        assert!(!std::ptr::eq(self, other), "queue {} can not wait on itself", self.name);
        assert!(
            submission_id <= other.submission_id(),
            "queue {} has not assigned submission {} yet",
            other.name,
            submission_id
        );
        self.add_wait_semaphore(other.timeline_semaphore(), submission_id, vk::PipelineStageFlags2::ALL_COMMANDS);
    }

    /// 将录制完成的 command buffer 作为一个 batch 提交
    ///
    /// 返回这次 submit 的 id；queue 的 timeline semaphore 会在 GPU 执行完成后 signal 这个 id
    pub fn submit(&self, keys: &[GfxCommandBufferKey]) -> u64 {
        assert!(!keys.is_empty(), "queue {}: submit with zero command buffers", self.name);

        let submission_id = self.submission_id.get() + 1;
        self.submission_id.set(submission_id);

        let mut vk_handles = Vec::with_capacity(keys.len());
        {
            let mut command_buffers = self.command_buffers.borrow_mut();
            let mut in_flight = self.in_flight.borrow_mut();
            for key in keys {
                let cmd = &mut command_buffers[*key];
                assert_eq!(
                    cmd.state,
                    GfxCommandBufferState::Executable,
                    "command buffer {} submitted before being ended",
                    cmd.name
                );
                cmd.submission_id = submission_id;
                cmd.state = GfxCommandBufferState::InFlight;
                in_flight.push(*key);
                vk_handles.push(cmd.vk_handle);
            }
        }

        let waits = std::mem::take(&mut *self.pending_waits.borrow_mut());
        let signals = std::mem::take(&mut *self.pending_signals.borrow_mut());
        let submit_info = GfxSubmitInfo::new(&vk_handles).waits(&waits).signals(&signals).signal(
            self.timeline.handle(),
            vk::PipelineStageFlags2::ALL_COMMANDS,
            submission_id,
        );
        vk_check!(self.backend.queue_submit(self.vk_queue, &submit_info));

        log::debug!(
            "queue {}: submit #{} with {} command buffers, {} waits, {} signals",
            self.name,
            submission_id,
            keys.len(),
            waits.len(),
            signals.len() + 1
        );
        submission_id
    }
}

// 完成追踪
impl GfxCommandQueue {
    /// 读取 timeline 的当前值，更新 `last_finished_id`，不会阻塞
    pub fn query_tracking_id(&self) -> u64 {
        let counter = self.timeline.counter_value().min(self.submission_id.get());
        let last_finished_id = self.last_finished_id.get().max(counter);
        self.last_finished_id.set(last_finished_id);
        last_finished_id
    }

    /// 将已经完成的 in-flight command buffer 放回 idle pool
    ///
    /// 唯一的回收点，只依据 `last_finished_id`，不会查询 GPU
    pub fn process_in_flight_commands(&self) {
        let last_finished_id = self.last_finished_id.get();
        let mut command_buffers = self.command_buffers.borrow_mut();
        let mut idle = self.idle.borrow_mut();
        let mut recycled = 0;
        self.in_flight.borrow_mut().retain(|key| {
            let cmd = &mut command_buffers[*key];
            if cmd.submission_id <= last_finished_id {
                cmd.state = GfxCommandBufferState::Idle;
                idle.push(*key);
                recycled += 1;
                false
            } else {
                true
            }
        });
        if recycled > 0 {
            log::trace!("queue {}: recycle {} command buffers", self.name, recycled);
        }
    }

    /// submission 是否已经完成，不会阻塞
    ///
    /// id 为 0 或者尚未分配时返回 false
    pub fn poll_command_submission(&self, submission_id: u64) -> bool {
        if submission_id == 0 || submission_id > self.submission_id.get() {
            return false;
        }
        submission_id <= self.last_finished_id.get() || submission_id <= self.query_tracking_id()
    }

    /// 阻塞等待 submission 完成
    ///
    /// id 为 0 或者尚未分配时直接返回 false；超时返回 false，queue 的状态不变
    pub fn wait_for_command_submission(&self, submission_id: u64, timeout_ns: u64) -> bool {
        if submission_id == 0 || submission_id > self.submission_id.get() {
            return false;
        }
        if submission_id <= self.last_finished_id.get() {
            return true;
        }
        if !self.timeline.wait_timeline(submission_id, timeout_ns) {
            log::warn!("queue {}: wait for submission {} timed out", self.name, submission_id);
            return false;
        }
        self.last_finished_id.set(self.last_finished_id.get().max(submission_id));
        true
    }

    /// 等待目前所有的 submission 完成，并回收 command buffer
    ///
    /// 超时视为 device lost
    pub fn wait_idle(&self) {
        let submission_id = self.submission_id.get();
        if submission_id > 0 && !self.wait_for_command_submission(submission_id, self.wait_timeout_ns) {
            fatal_device_lost(&format!("queue {} wait idle on submission {}", self.name, submission_id));
        }
        self.process_in_flight_commands();
    }

    /// 录制、提交并等待一段命令执行完成，用于初始化阶段的上传等操作
    pub fn one_time_exec<F, R>(&self, name: &str, func: F) -> R
    where
        F: FnOnce(&GfxCommandRecorder) -> R,
    {
        let key = self.create_command_buffer(name);
        let result = func(&self.recorder(key));
        self.end_command_buffer(key);

        let submission_id = self.submit(&[key]);
        if !self.wait_for_command_submission(submission_id, self.wait_timeout_ns) {
            fatal_device_lost(&format!("queue {} one time exec {}", self.name, name));
        }
        self.process_in_flight_commands();
        result
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::foundation::{
        headless::{HeadlessBackend, HeadlessEvent},
        queue_family::GfxQueueFamilies,
    };

    fn create_queue(capability: QueueCapability) -> (Rc<HeadlessBackend>, GfxCommandQueue) {
        cadence_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::new());
        let families = GfxQueueFamilies::discover(&backend.queue_family_properties()).unwrap();
        let family = families.family_for(capability).clone();
        let queue = GfxCommandQueue::new(backend.clone(), family, capability, 1_000_000_000);
        (backend, queue)
    }

    fn record_one(queue: &GfxCommandQueue, name: &str) -> GfxCommandBufferKey {
        let key = queue.create_command_buffer(name);
        queue.end_command_buffer(key);
        key
    }

    #[test]
    fn test_first_submission_is_polled_after_completion() {
        let (backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let key = record_one(&queue, "first");

        let id = queue.submit(&[key]);
        assert_eq!(id, 1);
        assert!(!queue.poll_command_submission(1));

        backend.retire_all();
        assert!(queue.poll_command_submission(1));
        assert_eq!(queue.last_finished_id(), 1);
    }

    #[test]
    fn test_invalid_ids_have_no_side_effects() {
        let (backend, queue) = create_queue(QueueCapability::GRAPHICS);
        assert!(!queue.poll_command_submission(0));
        assert!(!queue.poll_command_submission(1));
        assert!(!queue.wait_for_command_submission(0, 0));
        assert!(!queue.wait_for_command_submission(5, 0));

        let key = record_one(&queue, "cmd");
        queue.submit(&[key]);
        backend.retire_all();
        assert!(!queue.wait_for_command_submission(2, 0));
        assert_eq!(queue.last_finished_id(), 0);
    }

    #[test]
    fn test_idle_buffer_reused_and_new_ones_allocated() {
        let (backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let key = record_one(&queue, "warmup");
        queue.submit(&[key]);
        backend.retire_all();
        queue.query_tracking_id();
        queue.process_in_flight_commands();
        assert_eq!(queue.stats().idle, 1);
        let allocated_before = backend.allocated_command_buffer_count();
        backend.take_events();

        let keys = (0..3).map(|i| queue.create_command_buffer(&format!("cmd-{i}"))).collect::<Vec<_>>();

        assert_eq!(backend.allocated_command_buffer_count() - allocated_before, 2);
        assert!(keys.contains(&key));
        let resets =
            backend.take_events().iter().filter(|e| matches!(e, HeadlessEvent::ResetCommandPool { .. })).count();
        assert_eq!(resets, 1);

        let stats = queue.stats();
        assert_eq!((stats.created, stats.idle, stats.in_flight, stats.recording), (3, 0, 0, 3));
    }

    #[test]
    fn test_in_flight_buffer_never_reused_before_completion() {
        let (backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let first = record_one(&queue, "first");
        queue.submit(&[first]);

        // GPU 尚未完成，不能复用
        queue.query_tracking_id();
        queue.process_in_flight_commands();
        let second = queue.create_command_buffer("second");
        assert_ne!(first, second);
        assert_eq!(queue.command_buffer_state(first), Some(GfxCommandBufferState::InFlight));

        backend.retire_all();
        queue.query_tracking_id();
        queue.process_in_flight_commands();
        assert_eq!(queue.command_buffer_state(first), Some(GfxCommandBufferState::Idle));
        assert!(queue.command_buffer_submission_id(first).unwrap() <= queue.last_finished_id());
    }

    #[test]
    fn test_each_buffer_in_exactly_one_place() {
        let (backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let check = |queue: &GfxCommandQueue| {
            let stats = queue.stats();
            assert_eq!(stats.idle + stats.in_flight + stats.recording, stats.created);
        };

        let a = record_one(&queue, "a");
        let b = record_one(&queue, "b");
        check(&queue);
        queue.submit(&[a]);
        check(&queue);
        let _c = queue.create_command_buffer("c");
        check(&queue);
        queue.submit(&[b]);
        backend.retire_next();
        queue.query_tracking_id();
        queue.process_in_flight_commands();
        check(&queue);
        assert_eq!(queue.stats().idle, 1);
        assert_eq!(queue.stats().in_flight, 1);
    }

    #[test]
    fn test_last_finished_id_is_monotonic() {
        let (backend, queue) = create_queue(QueueCapability::COMPUTE);
        let mut last = 0;
        for _ in 0..4 {
            let key = record_one(&queue, "cmd");
            queue.submit(&[key]);
            backend.retire_next();
            let current = queue.query_tracking_id();
            assert!(current >= last);
            assert!(current <= queue.submission_id());
            last = current;
        }

        // 外部把 timeline 推得超过了分配的 id，也不会超过 submission_id
        backend.signal_semaphore(queue.timeline_semaphore(), 100);
        assert_eq!(queue.query_tracking_id(), queue.submission_id());
    }

    #[test]
    fn test_submit_appends_own_timeline_signal() {
        let (backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let external = vk::Semaphore::from_raw(0xdead);
        queue.add_wait_semaphore(external, 7, vk::PipelineStageFlags2::ALL_COMMANDS);
        queue.add_signal_semaphore(external, 8, vk::PipelineStageFlags2::ALL_COMMANDS);
        let key = record_one(&queue, "cmd");
        backend.take_events();

        let id = queue.submit(&[key]);
        let events = backend.take_events();
        let HeadlessEvent::Submit { waits, signals, .. } = &events[0] else {
            panic!("expected a submit event, got {:?}", events[0]);
        };
        assert_eq!(waits, &vec![(external, 7)]);
        assert_eq!(signals, &vec![(external, 8), (queue.timeline_semaphore(), id)]);

        // 依赖只对一次 submit 有效
        let key = record_one(&queue, "cmd");
        backend.take_events();
        queue.submit(&[key]);
        let events = backend.take_events();
        let HeadlessEvent::Submit { waits, signals, .. } = &events[0] else {
            panic!("expected a submit event");
        };
        assert!(waits.is_empty());
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn test_cross_queue_wait() {
        cadence_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::new());
        let families = GfxQueueFamilies::discover(&backend.queue_family_properties()).unwrap();
        let gfx = GfxCommandQueue::new(
            backend.clone(),
            families.family_for(QueueCapability::GRAPHICS).clone(),
            QueueCapability::GRAPHICS,
            0,
        );
        let compute = GfxCommandQueue::new(
            backend.clone(),
            families.family_for(QueueCapability::COMPUTE).clone(),
            QueueCapability::COMPUTE,
            0,
        );

        let key = record_one(&gfx, "producer");
        let produced = gfx.submit(&[key]);
        backend.stall(true);

        compute.add_wait_queue(&gfx, produced);
        let key = record_one(&compute, "consumer");
        let consumed = compute.submit(&[key]);
        assert!(!compute.wait_for_command_submission(consumed, 0));

        backend.stall(false);
        assert!(compute.wait_for_command_submission(consumed, 0));
        assert!(gfx.poll_command_submission(produced));
    }

    #[test]
    fn test_wait_timeout_keeps_state() {
        let (backend, queue) = create_queue(QueueCapability::TRANSFER);
        let key = record_one(&queue, "cmd");
        let id = queue.submit(&[key]);

        backend.stall(true);
        assert!(!queue.wait_for_command_submission(id, 0));
        assert_eq!(queue.last_finished_id(), 0);
        assert_eq!(queue.stats().in_flight, 1);

        backend.stall(false);
        assert!(queue.wait_for_command_submission(id, 0));
    }

    #[test]
    fn test_discard_recording_returns_to_idle() {
        let (_backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let key = queue.create_command_buffer("abandoned");
        queue.discard_recording(key);

        assert_eq!(queue.command_buffer_state(key), Some(GfxCommandBufferState::Idle));
        assert_eq!(queue.create_command_buffer("reuse"), key);
    }

    #[test]
    fn test_one_time_exec() {
        let (backend, queue) = create_queue(QueueCapability::TRANSFER);
        let value = queue.one_time_exec("upload", |cmd| {
            cmd.insert_label("inside", LabelColor::COLOR_UPLOAD);
            42
        });

        assert_eq!(value, 42);
        assert_eq!(backend.pending_submit_count(), 0);
        assert_eq!(queue.stats().idle, 1);
    }

    #[test]
    #[should_panic(expected = "zero command buffers")]
    fn test_submit_nothing_panics() {
        let (_backend, queue) = create_queue(QueueCapability::GRAPHICS);
        queue.submit(&[]);
    }

    #[test]
    #[should_panic(expected = "submitted before being ended")]
    fn test_submit_recording_buffer_panics() {
        let (_backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let key = queue.create_command_buffer("still recording");
        queue.submit(&[key]);
    }

    #[test]
    #[should_panic(expected = "too many signal semaphores")]
    fn test_signal_slot_reserved_for_timeline() {
        let (_backend, queue) = create_queue(QueueCapability::GRAPHICS);
        for value in 0..MAX_SUBMIT_SEMAPHORES as u64 {
            queue.add_signal_semaphore(vk::Semaphore::from_raw(1), value, vk::PipelineStageFlags2::ALL_COMMANDS);
        }
    }

    #[test]
    #[should_panic(expected = "device lost")]
    fn test_wait_idle_on_hung_gpu_is_fatal() {
        let (backend, queue) = create_queue(QueueCapability::GRAPHICS);
        let key = record_one(&queue, "cmd");
        queue.submit(&[key]);
        backend.stall(true);
        queue.wait_idle();
    }
}
