use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::Context;
use itertools::Itertools;

use crate::{
    commands::command_queue::GfxCommandQueue,
    config::GfxConfig,
    foundation::{
        backend::GfxBackend,
        queue_family::{GfxQueueFamilies, QueueCapability},
    },
    resources::transfer_pool::GfxTransferPool,
    vk_check,
};

/// GFX 层的入口
///
/// 持有 backend 与配置，按能力类别懒创建 command queue：
/// 第一次请求某个类别时，在最专用的 queue family 上创建 queue，之后一直复用。
///
/// 只能在单个线程上使用。
pub struct Gfx {
    backend: Rc<dyn GfxBackend>,
    config: GfxConfig,
    queue_families: GfxQueueFamilies,

    queues: RefCell<HashMap<QueueCapability, Rc<GfxCommandQueue>>>,
}

// 创建与销毁
impl Gfx {
    pub fn new(backend: Rc<dyn GfxBackend>, config: GfxConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let queue_families = GfxQueueFamilies::discover(&backend.queue_family_properties())
            .with_context(|| format!("backend {} has no graphics + compute queue family", backend.name()))?;

        log::info!("gfx created on backend {}, fif count: {}", backend.name(), config.fif_count);
        Ok(Self {
            backend,
            config,
            queue_families,
            queues: RefCell::new(HashMap::new()),
        })
    }
}

impl Drop for Gfx {
    fn drop(&mut self) {
        log::info!("destroying gfx");
        // queue 析构时会各自等待自己的 timeline
        for (_, queue) in self.queues.get_mut().drain() {
            if Rc::strong_count(&queue) > 1 {
                log::warn!("queue {} is still referenced when gfx is destroyed", queue.name());
            }
        }
    }
}

// getters
impl Gfx {
    #[inline]
    pub fn backend(&self) -> &Rc<dyn GfxBackend> {
        &self.backend
    }

    #[inline]
    pub fn config(&self) -> &GfxConfig {
        &self.config
    }

    #[inline]
    pub fn queue_families(&self) -> &GfxQueueFamilies {
        &self.queue_families
    }

    /// 能执行 `capability` 中所有命令的 queue，相同类别的请求返回同一个 queue
    pub fn queue(&self, capability: QueueCapability) -> Rc<GfxCommandQueue> {
        assert!(!capability.is_empty(), "queue capability must not be empty");
        let class = capability.class();
        self.queues
            .borrow_mut()
            .entry(class)
            .or_insert_with(|| {
                let family = self.queue_families.family_for(class).clone();
                Rc::new(GfxCommandQueue::new(self.backend.clone(), family, class, self.config.frame_wait_timeout_ns()))
            })
            .clone()
    }

    /// 目前已经创建的所有 queue，按能力类别排序
    pub fn queues(&self) -> Vec<Rc<GfxCommandQueue>> {
        self.queues
            .borrow()
            .iter()
            .sorted_by_key(|(capability, _)| std::cmp::Reverse(capability.bits()))
            .map(|(_, queue)| queue.clone())
            .collect_vec()
    }
}

// tools
impl Gfx {
    /// 按照配置创建一个 staging 内存池
    pub fn create_transfer_pool(&self, name: &str) -> GfxTransferPool {
        GfxTransferPool::new(
            self.backend.clone(),
            self.config.transfer_chunk_size,
            self.config.transfer_alignment,
            name,
        )
    }

    /// 等待所有 queue 上的 submission 完成并回收 command buffer
    pub fn wait_idle(&self) {
        for queue in self.queues() {
            queue.wait_idle();
        }
        vk_check!(self.backend.device_wait_idle());
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::foundation::headless::HeadlessBackend;

    fn create_gfx() -> (Rc<HeadlessBackend>, Gfx) {
        cadence_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::new());
        let gfx = Gfx::new(backend.clone(), GfxConfig::default()).unwrap();
        (backend, gfx)
    }

    #[test]
    fn test_queues_are_created_lazily_per_class() {
        let (_backend, gfx) = create_gfx();
        assert!(gfx.queues().is_empty());

        let graphics = gfx.queue(QueueCapability::GRAPHICS);
        let graphics_transfer = gfx.queue(QueueCapability::GRAPHICS | QueueCapability::TRANSFER);
        assert!(Rc::ptr_eq(&graphics, &graphics_transfer));

        let compute = gfx.queue(QueueCapability::COMPUTE);
        let transfer = gfx.queue(QueueCapability::TRANSFER);
        assert_eq!(compute.queue_family().queue_family_index, 1);
        assert_eq!(transfer.queue_family().queue_family_index, 2);

        let names = gfx.queues().iter().map(|q| q.name().to_string()).collect_vec();
        assert_eq!(names, vec!["gfx-queue", "compute-queue", "transfer-queue"]);
    }

    #[test]
    fn test_single_family_device_shares_family() {
        cadence_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::with_queue_families(vec![vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            queue_count: 1,
            ..Default::default()
        }]));
        let gfx = Gfx::new(backend, GfxConfig::default()).unwrap();

        let transfer = gfx.queue(QueueCapability::TRANSFER);
        assert_eq!(transfer.queue_family().queue_family_index, 0);
        assert_eq!(transfer.capability(), QueueCapability::TRANSFER);
    }

    #[test]
    fn test_device_without_universal_family_is_rejected() {
        let backend = Rc::new(HeadlessBackend::with_queue_families(vec![vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::TRANSFER,
            queue_count: 1,
            ..Default::default()
        }]));
        assert!(Gfx::new(backend, GfxConfig::default()).is_err());
    }

    #[test]
    fn test_wait_idle_drains_all_queues() {
        let (backend, gfx) = create_gfx();
        for capability in [QueueCapability::GRAPHICS, QueueCapability::TRANSFER] {
            let queue = gfx.queue(capability);
            let key = queue.create_command_buffer("cmd");
            queue.end_command_buffer(key);
            queue.submit(&[key]);
        }
        assert_eq!(backend.pending_submit_count(), 2);

        gfx.wait_idle();
        assert_eq!(backend.pending_submit_count(), 0);
        for queue in gfx.queues() {
            assert_eq!(queue.stats().in_flight, 0);
        }
    }
}
