use arrayvec::ArrayVec;
use ash::vk;

use crate::config::MAX_SUBMIT_SEMAPHORES;

/// submit 时的一条 semaphore 依赖
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxSemaphoreSubmit {
    pub semaphore: vk::Semaphore,
    /// timeline value；binary semaphore 时忽略
    pub value: u64,
    pub stage: vk::PipelineStageFlags2,
}

impl GfxSemaphoreSubmit {
    #[inline]
    pub fn vk_info(&self) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default().semaphore(self.semaphore).value(self.value).stage_mask(self.stage)
    }
}

pub type GfxSemaphoreList = ArrayVec<GfxSemaphoreSubmit, MAX_SUBMIT_SEMAPHORES>;

/// Gfx 关于 submitInfo 的封装，更易用
///
/// wait / signal 的数量有上限 [`MAX_SUBMIT_SEMAPHORES`]，超出属于调用方的逻辑错误
#[derive(Default, Clone, Debug)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBuffer>,
    wait_infos: GfxSemaphoreList,
    signal_infos: GfxSemaphoreList,
}

impl GfxSubmitInfo {
    pub fn new(command_buffers: &[vk::CommandBuffer]) -> Self {
        Self {
            command_buffers: command_buffers.to_vec(),
            ..Default::default()
        }
    }

    /// builder
    #[inline]
    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: u64) -> Self {
        Self::push(&mut self.wait_infos, GfxSemaphoreSubmit { semaphore, value, stage }, "wait");
        self
    }

    /// builder
    #[inline]
    pub fn signal(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: u64) -> Self {
        Self::push(&mut self.signal_infos, GfxSemaphoreSubmit { semaphore, value, stage }, "signal");
        self
    }

    /// builder
    pub fn waits(mut self, waits: &[GfxSemaphoreSubmit]) -> Self {
        for wait in waits {
            Self::push(&mut self.wait_infos, *wait, "wait");
        }
        self
    }

    /// builder
    pub fn signals(mut self, signals: &[GfxSemaphoreSubmit]) -> Self {
        for signal in signals {
            Self::push(&mut self.signal_infos, *signal, "signal");
        }
        self
    }

    fn push(list: &mut GfxSemaphoreList, info: GfxSemaphoreSubmit, kind: &str) {
        if list.try_push(info).is_err() {
            panic!("too many {kind} semaphores in one submit, limit is {MAX_SUBMIT_SEMAPHORES}");
        }
    }
}

// getters
impl GfxSubmitInfo {
    #[inline]
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    #[inline]
    pub fn wait_infos(&self) -> &[GfxSemaphoreSubmit] {
        &self.wait_infos
    }

    #[inline]
    pub fn signal_infos(&self) -> &[GfxSemaphoreSubmit] {
        &self.signal_infos
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn test_builder_collects_semaphores() {
        let sem = vk::Semaphore::from_raw(7);
        let info = GfxSubmitInfo::new(&[vk::CommandBuffer::from_raw(1)])
            .wait(sem, vk::PipelineStageFlags2::ALL_COMMANDS, 3)
            .signal(sem, vk::PipelineStageFlags2::ALL_COMMANDS, 4);

        assert_eq!(info.command_buffers().len(), 1);
        assert_eq!(info.wait_infos()[0].value, 3);
        assert_eq!(info.signal_infos()[0].vk_info().value, 4);
    }

    #[test]
    #[should_panic(expected = "too many wait semaphores")]
    fn test_wait_list_is_bounded() {
        let mut info = GfxSubmitInfo::new(&[]);
        for value in 0..=MAX_SUBMIT_SEMAPHORES as u64 {
            info = info.wait(vk::Semaphore::from_raw(1), vk::PipelineStageFlags2::ALL_COMMANDS, value);
        }
    }
}
