use std::rc::Rc;

use ash::vk;

use crate::{
    foundation::{backend::GfxBackend, check::VkResultExt},
    vk_check,
};

/// timeline semaphore
///
/// 由唯一的所有者持有（通常是 command queue），drop 时销毁
pub struct GfxTimelineSemaphore {
    handle: vk::Semaphore,
    backend: Rc<dyn GfxBackend>,
}

// 创建与销毁
impl GfxTimelineSemaphore {
    pub fn new(backend: Rc<dyn GfxBackend>, initial_value: u64, debug_name: &str) -> Self {
        let handle = vk_check!(backend.create_timeline_semaphore(initial_value, debug_name));
        Self { handle, backend }
    }
}

impl Drop for GfxTimelineSemaphore {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.handle);
    }
}

// getters
impl GfxTimelineSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

// tools
impl GfxTimelineSemaphore {
    /// 当前的 counter 值，不会阻塞
    #[inline]
    pub fn counter_value(&self) -> u64 {
        self.backend.get_semaphore_counter_value(self.handle).check("get_semaphore_counter_value")
    }

    /// 阻塞等待 counter 达到 `timeline_value`
    ///
    /// 超时返回 false，其他 driver 错误是致命的
    pub fn wait_timeline(&self, timeline_value: u64, timeout_ns: u64) -> bool {
        match self.backend.wait_semaphores(&[self.handle], &[timeline_value], timeout_ns) {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(e) => crate::foundation::check::fatal_vk_error(e, "wait_semaphores", file!(), line!()),
        }
    }
}
