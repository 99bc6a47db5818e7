use std::cell::RefCell;

use ash::vk;

use cadence_gfx::{commands::command_buffer::GfxCommandRecorder, resources::descriptor::GfxDescriptorWrite};

use crate::descriptor_cache::FrameDescriptorCache;

/// 某个 command list 上每个 set index 当前绑定的 descriptor set
///
/// 由 command list 持有，graphics 和 compute 各一份；program 只是读写它
#[derive(Clone, Debug, Default)]
pub struct GfxBoundDescriptorSets {
    sets: Vec<Option<vk::DescriptorSet>>,
}

impl GfxBoundDescriptorSets {
    /// 绑定新的 pipeline 之后，之前的绑定都不再有效
    #[inline]
    pub fn clear(&mut self) {
        self.sets.clear();
    }

    #[inline]
    pub fn get(&self, set_index: usize) -> Option<vk::DescriptorSet> {
        self.sets.get(set_index).copied().flatten()
    }

    pub fn set(&mut self, set_index: usize, descriptor_set: vk::DescriptorSet) {
        if self.sets.len() <= set_index {
            self.sets.resize(set_index + 1, None);
        }
        self.sets[set_index] = Some(descriptor_set);
    }
}

/// command list 使用的 shader program
///
/// command list 只在 program 变化时调用 `use_program`，
/// 每次 draw / dispatch 之前调用 `flush_bindings` 提交尚未绑定的资源。
/// 同一个 program 可以同时被多个 command list 使用，绑定状态记录在 command list 的 `bound` 中。
pub trait GfxProgram {
    fn name(&self) -> &str;

    fn bind_point(&self) -> vk::PipelineBindPoint;

    fn pipeline(&self) -> vk::Pipeline;

    /// 绑定 pipeline
    fn use_program(&self, cmd: &GfxCommandRecorder, bound: &mut GfxBoundDescriptorSets) {
        cmd.cmd_bind_pipeline(self.bind_point(), self.pipeline());
        bound.clear();
    }

    /// 绑定与 `bound` 不同的 descriptor set，set 从当前帧的 cache 中分配
    fn flush_bindings(
        &self,
        cmd: &GfxCommandRecorder,
        descriptor_cache: &mut FrameDescriptorCache,
        bound: &mut GfxBoundDescriptorSets,
    );
}

struct DescriptorSetBinding {
    layout: vk::DescriptorSetLayout,
    writes: Vec<GfxDescriptorWrite>,
}

/// 一个 pipeline 加上它每个 descriptor set 的资源绑定
///
/// pipeline 和 layout 由外部创建并管理生命周期
pub struct GfxPipelineProgram {
    name: String,
    bind_point: vk::PipelineBindPoint,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,

    sets: RefCell<Vec<DescriptorSetBinding>>,
}

// 创建与销毁
impl GfxPipelineProgram {
    pub fn new(
        name: &str,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
        pipeline_layout: vk::PipelineLayout,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Self {
        let sets = set_layouts
            .iter()
            .map(|layout| DescriptorSetBinding {
                layout: *layout,
                writes: Vec::new(),
            })
            .collect();
        Self {
            name: name.to_string(),
            bind_point,
            pipeline,
            pipeline_layout,
            sets: RefCell::new(sets),
        }
    }
}

// getters
impl GfxPipelineProgram {
    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn set_count(&self) -> usize {
        self.sets.borrow().len()
    }
}

// tools
impl GfxPipelineProgram {
    /// 设置某个 descriptor set 的内容，下一次 draw / dispatch 时生效
    ///
    /// 内容不变时 cache 返回同一个 set，不会触发重新绑定
    pub fn set_descriptors(&self, set_index: u32, writes: &[GfxDescriptorWrite]) {
        let mut sets = self.sets.borrow_mut();
        let set_count = sets.len();
        let Some(set) = sets.get_mut(set_index as usize) else {
            panic!("program {} has {} descriptor sets, set {} is out of range", self.name, set_count, set_index);
        };
        set.writes = writes.to_vec();
    }
}

impl GfxProgram for GfxPipelineProgram {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    #[inline]
    fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    fn flush_bindings(
        &self,
        cmd: &GfxCommandRecorder,
        descriptor_cache: &mut FrameDescriptorCache,
        bound: &mut GfxBoundDescriptorSets,
    ) {
        for (set_index, set) in self.sets.borrow().iter().enumerate() {
            if set.writes.is_empty() {
                continue;
            }
            let descriptor_set = descriptor_cache.get_or_allocate(set.layout, &set.writes);
            if bound.get(set_index) == Some(descriptor_set) {
                continue;
            }
            cmd.cmd_bind_descriptor_sets(self.bind_point, self.pipeline_layout, set_index as u32, &[descriptor_set]);
            bound.set(set_index, descriptor_set);
        }
    }
}
