use std::rc::Rc;

use ash::vk;

use crate::{
    foundation::backend::GfxBackend,
    resources::buffer::{GfxBufferSlice, GfxHostBuffer},
    vk_check,
};

struct GfxTransferChunk {
    buffer: GfxHostBuffer,
    /// 写指针，只增不减，直到 pool reset
    offset: vk::DeviceSize,
    /// 引用过这个 chunk 的最大 submission id
    last_submission_id: u64,
}

impl GfxTransferChunk {
    #[inline]
    fn is_fresh(&self) -> bool {
        self.offset == 0
    }
}

/// pool 中某个 chunk 的索引，reset 之后仍然有效
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxTransferChunkId(usize);

/// 一次子分配：数据所在的区域，以及它属于哪个 chunk
///
/// 使用者在 submit 时需要把 `chunk` 交给 [`GfxTransferPool::submit`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxTransferAllocation {
    pub chunk: GfxTransferChunkId,
    pub region: GfxBufferSlice,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxTransferPoolStats {
    pub chunks: usize,
    pub capacity: vk::DeviceSize,
    pub used: vk::DeviceSize,
    /// 所有 chunk 被引用过的最大 submission id
    pub last_submission_id: u64,
}

/// 用于上传数据的 staging 内存池
///
/// 从 host visible 的 chunk 中线性地子分配。当前 chunk 放不下时，
/// 换到一个已经 reset 的、足够大的 chunk，或者新建一个 `max(default_chunk_size, size)` 的 chunk；
/// 旧 chunk 剩余的空间被放弃，直到 reset 才会再被使用。
///
/// 属于某个 frame slot 中的某个 queue：submit 的 id 都来自同一个 queue 的 timeline。
/// 多个 command list 可以交错地写入同一个 chunk，每个 submission 只标记它自己用到的 chunk。
pub struct GfxTransferPool {
    backend: Rc<dyn GfxBackend>,
    chunks: Vec<GfxTransferChunk>,
    current: Option<usize>,

    default_chunk_size: vk::DeviceSize,
    alignment: vk::DeviceSize,
    name: String,
}

// 创建与销毁
impl GfxTransferPool {
    pub fn new(
        backend: Rc<dyn GfxBackend>,
        default_chunk_size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        name: &str,
    ) -> Self {
        assert!(default_chunk_size > 0);
        assert!(alignment.is_power_of_two(), "transfer alignment must be a power of two");
        Self {
            backend,
            chunks: Vec::new(),
            current: None,
            default_chunk_size,
            alignment,
            name: name.to_string(),
        }
    }

    /// 释放所有 chunk 的内存
    ///
    /// 调用方需要保证 GPU 已经不再使用这些 chunk
    pub fn destroy(&mut self) {
        for chunk in self.chunks.drain(..) {
            self.backend.destroy_host_buffer(chunk.buffer.handle);
        }
        self.current = None;
    }
}

impl Drop for GfxTransferPool {
    fn drop(&mut self) {
        if !self.chunks.is_empty() {
            log::debug!("transfer pool {}: release {} chunks", self.name, self.chunks.len());
        }
        self.destroy();
    }
}

// tools
impl GfxTransferPool {
    /// 分配一段 staging 内存，起始位置按 `alignment` 对齐
    pub fn suballocate(&mut self, size: vk::DeviceSize) -> GfxTransferAllocation {
        assert!(size > 0, "transfer pool {}: suballocate 0 bytes", self.name);

        if let Some(idx) = self.current {
            if let Some(allocation) = self.try_suballocate(idx, size) {
                return allocation;
            }
        }

        // 当前 chunk 放不下，剩余空间被放弃
        let current = self.current;
        let reusable = self
            .chunks
            .iter()
            .enumerate()
            .position(|(idx, chunk)| Some(idx) != current && chunk.is_fresh() && chunk.buffer.size >= size);
        let idx = match reusable {
            Some(idx) => idx,
            None => self.create_chunk(size),
        };
        self.current = Some(idx);

        match self.try_suballocate(idx, size) {
            Some(allocation) => allocation,
            None => unreachable!("fresh chunk must fit the request"),
        }
    }

    /// 将数据写入之前分配的区域
    pub fn write(&self, region: GfxBufferSlice, data: &[u8]) {
        assert!(
            data.len() as vk::DeviceSize <= region.size,
            "transfer pool {}: write {} bytes into a region of {} bytes",
            self.name,
            data.len(),
            region.size
        );
        self.backend.write_host_buffer(region.buffer, region.offset, data);
    }

    /// 分配并写入
    pub fn upload(&mut self, data: &[u8]) -> GfxTransferAllocation {
        let allocation = self.suballocate(data.len() as vk::DeviceSize);
        self.write(allocation.region, data);
        allocation
    }

    /// 记录 `chunks` 被这次 submission 引用
    ///
    /// 不会重置写指针
    pub fn submit(&mut self, submission_id: u64, chunks: &[GfxTransferChunkId]) {
        for GfxTransferChunkId(idx) in chunks {
            let chunk = &mut self.chunks[*idx];
            chunk.last_submission_id = chunk.last_submission_id.max(submission_id);
        }
    }

    /// 重置所有 chunk 的写指针
    ///
    /// 只能在所有引用过这些 chunk 的 submission 都已经完成之后调用
    pub fn reset(&mut self, finished_id: u64) {
        for (idx, chunk) in self.chunks.iter_mut().enumerate() {
            assert!(
                chunk.last_submission_id <= finished_id,
                "transfer pool {}: chunk {} is still referenced by submission {} (finished: {})",
                self.name,
                idx,
                chunk.last_submission_id,
                finished_id
            );
            chunk.offset = 0;
        }
        self.current = None;
    }

    pub fn stats(&self) -> GfxTransferPoolStats {
        GfxTransferPoolStats {
            chunks: self.chunks.len(),
            capacity: self.chunks.iter().map(|chunk| chunk.buffer.size).sum(),
            used: self.chunks.iter().map(|chunk| chunk.offset).sum(),
            last_submission_id: self.chunks.iter().map(|chunk| chunk.last_submission_id).max().unwrap_or(0),
        }
    }

    #[inline]
    fn align_up(&self, value: vk::DeviceSize) -> vk::DeviceSize {
        (value + self.alignment - 1) & !(self.alignment - 1)
    }

    fn try_suballocate(&mut self, idx: usize, size: vk::DeviceSize) -> Option<GfxTransferAllocation> {
        let begin = self.align_up(self.chunks[idx].offset);
        let chunk = &mut self.chunks[idx];
        if begin + size > chunk.buffer.size {
            return None;
        }
        chunk.offset = begin + size;
        Some(GfxTransferAllocation {
            chunk: GfxTransferChunkId(idx),
            region: GfxBufferSlice::new(chunk.buffer.handle, begin, size),
        })
    }

    fn create_chunk(&mut self, size: vk::DeviceSize) -> usize {
        let capacity = self.default_chunk_size.max(size);
        let name = format!("{}-chunk-{}", self.name, self.chunks.len());
        let buffer = vk_check!(self.backend.create_host_buffer(capacity, vk::BufferUsageFlags::TRANSFER_SRC, &name));
        log::info!("transfer pool {}: create chunk #{} with {} bytes", self.name, self.chunks.len(), capacity);

        self.chunks.push(GfxTransferChunk {
            buffer,
            offset: 0,
            last_submission_id: 0,
        });
        self.chunks.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::headless::HeadlessBackend;

    fn create_pool(backend: &Rc<HeadlessBackend>) -> GfxTransferPool {
        GfxTransferPool::new(backend.clone(), 1024, 256, "test")
    }

    #[test]
    fn test_suballocations_are_aligned() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);

        let a = pool.suballocate(10).region;
        let b = pool.suballocate(10).region;
        assert_eq!(a.buffer, b.buffer);
        assert_eq!((a.offset, b.offset), (0, 256));
        assert_eq!(pool.stats().used, 266);
    }

    #[test]
    fn test_overflow_abandons_tail_until_reset() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);

        let first = pool.suballocate(600).region;
        let second = pool.suballocate(600);
        assert_ne!(first.buffer, second.region.buffer);
        assert_eq!(second.region.offset, 0);
        assert_eq!(pool.stats().chunks, 2);

        // 第一个 chunk 还剩 256 字节，但是已经被放弃
        let third = pool.suballocate(100);
        assert_eq!(third.chunk, second.chunk);
        assert_eq!(third.region.offset, 768);

        pool.submit(1, &[second.chunk]);
        pool.reset(1);
        let after_reset = pool.suballocate(100).region;
        assert_eq!(after_reset.buffer, first.buffer);
        assert_eq!(after_reset.offset, 0);
        assert_eq!(pool.stats().chunks, 2);
    }

    #[test]
    fn test_large_request_gets_dedicated_chunk() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);

        pool.suballocate(10);
        let large = pool.suballocate(5000).region;
        assert_eq!(large.offset, 0);
        assert_eq!(pool.stats().capacity, 1024 + 5000);

        // reset 后大 chunk 可以被复用
        pool.reset(0);
        pool.suballocate(1000);
        let large_again = pool.suballocate(4000).region;
        assert_eq!(large_again.buffer, large.buffer);
        assert_eq!(pool.stats().chunks, 2);
    }

    #[test]
    fn test_upload_writes_host_memory() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);

        pool.suballocate(4);
        let region = pool.upload(&[9, 8, 7]).region;
        let contents = backend.host_buffer_contents(region.buffer).unwrap();
        assert_eq!(&contents[256..259], &[9, 8, 7]);
    }

    #[test]
    #[should_panic(expected = "still referenced by submission 3")]
    fn test_reset_before_completion_panics() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);
        let allocation = pool.suballocate(16);
        pool.submit(3, &[allocation.chunk]);
        pool.reset(2);
    }

    #[test]
    fn test_submit_tags_only_given_chunks() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);
        let first = pool.suballocate(600);
        let second = pool.suballocate(600);
        assert_ne!(first.chunk, second.chunk);

        pool.submit(1, &[first.chunk]);
        pool.submit(5, &[]);
        assert_eq!(pool.stats().last_submission_id, 1);

        // 第二个 chunk 没有被任何 submission 引用
        pool.submit(2, &[second.chunk]);
        pool.reset(2);
    }

    #[test]
    #[should_panic(expected = "still referenced by submission 2 (finished: 1)")]
    fn test_interleaved_writers_each_tag_the_shared_chunk() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);

        // 两个 command list 交错写入同一个 chunk，分别 submit
        let a = pool.suballocate(16);
        let b = pool.suballocate(16);
        assert_eq!(a.chunk, b.chunk);
        pool.submit(1, &[a.chunk]);
        pool.submit(2, &[b.chunk]);
        assert_eq!(pool.stats().last_submission_id, 2);

        pool.reset(1);
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut pool = create_pool(&backend);
        pool.suballocate(2000);
        pool.suballocate(2000);
        assert_eq!(backend.live_host_buffer_count(), 2);

        drop(pool);
        assert_eq!(backend.live_host_buffer_count(), 0);
    }
}
