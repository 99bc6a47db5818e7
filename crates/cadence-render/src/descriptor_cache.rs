use std::{collections::HashMap, rc::Rc};

use ash::vk;

use cadence_gfx::{
    foundation::backend::GfxBackend,
    resources::descriptor::{GfxDescriptorWrite, default_pool_sizes},
    vk_check,
};

/// 一个 frame slot 内的 descriptor set 缓存
///
/// 相同的 (layout, writes) 在同一帧内只会分配和写入一次。
/// 只能在 frame pacing 确认这个 slot 之前的 submission 都完成后 reset。
pub struct FrameDescriptorCache {
    backend: Rc<dyn GfxBackend>,
    pool: vk::DescriptorPool,
    sets: HashMap<(vk::DescriptorSetLayout, Vec<GfxDescriptorWrite>), vk::DescriptorSet>,
    name: String,
}

// 创建与销毁
impl FrameDescriptorCache {
    pub fn new(backend: Rc<dyn GfxBackend>, max_sets: u32, name: &str) -> Self {
        let pool = vk_check!(backend.create_descriptor_pool(max_sets, &default_pool_sizes(max_sets)));
        backend.set_debug_name(vk::ObjectType::DESCRIPTOR_POOL, vk::Handle::as_raw(pool), name);
        Self {
            backend,
            pool,
            sets: HashMap::new(),
            name: name.to_string(),
        }
    }
}

impl Drop for FrameDescriptorCache {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_pool(self.pool);
    }
}

// tools
impl FrameDescriptorCache {
    /// 取得内容为 `writes` 的 descriptor set，不存在时分配并写入
    pub fn get_or_allocate(
        &mut self,
        layout: vk::DescriptorSetLayout,
        writes: &[GfxDescriptorWrite],
    ) -> vk::DescriptorSet {
        let key = (layout, writes.to_vec());
        if let Some(set) = self.sets.get(&key) {
            return *set;
        }

        let set = vk_check!(self.backend.allocate_descriptor_set(self.pool, layout));
        self.backend.update_descriptor_set(set, writes);
        self.sets.insert(key, set);
        set
    }

    /// 回收所有 descriptor set
    pub fn reset(&mut self) {
        vk_check!(self.backend.reset_descriptor_pool(self.pool));
        log::debug!("descriptor cache {}: reset {} sets", self.name, self.sets.len());
        self.sets.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use cadence_gfx::foundation::headless::{HeadlessBackend, HeadlessEvent};

    use super::*;

    #[test]
    fn test_identical_writes_share_one_set() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut cache = FrameDescriptorCache::new(backend.clone(), 4, "cache");
        let layout = vk::DescriptorSetLayout::from_raw(7);
        let writes = [GfxDescriptorWrite::uniform_buffer(0, vk::Buffer::from_raw(3), 0, 64)];

        let a = cache.get_or_allocate(layout, &writes);
        let b = cache.get_or_allocate(layout, &writes);
        assert_eq!(a, b);

        let other = [GfxDescriptorWrite::uniform_buffer(0, vk::Buffer::from_raw(3), 64, 64)];
        assert_ne!(cache.get_or_allocate(layout, &other), a);
        assert_eq!(cache.len(), 2);

        let updates =
            backend.take_events().iter().filter(|e| matches!(e, HeadlessEvent::UpdateDescriptorSet { .. })).count();
        assert_eq!(updates, 2);
    }

    #[test]
    fn test_reset_recycles_pool() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut cache = FrameDescriptorCache::new(backend.clone(), 1, "cache");
        let layout = vk::DescriptorSetLayout::from_raw(7);

        cache.get_or_allocate(layout, &[GfxDescriptorWrite::storage_image(0, vk::ImageView::from_raw(1))]);
        cache.reset();
        assert!(cache.is_empty());

        // pool 只能容纳 1 个 set，reset 之后可以再次分配
        cache.get_or_allocate(layout, &[GfxDescriptorWrite::storage_image(0, vk::ImageView::from_raw(2))]);
        assert_eq!(cache.len(), 1);
    }
}
