use ash::{prelude::VkResult, vk};

use crate::{
    commands::{rendering_info::GfxRenderingInfo, submit_info::GfxSubmitInfo},
    resources::{buffer::GfxHostBuffer, descriptor::GfxDescriptorWrite},
};

/// driver 的抽象边界
///
/// 只包含 submission 层真正会用到的 driver 调用，所有 handle 都是 ash 的原生类型。
/// 两个实现：
/// - [`crate::foundation::vulkan::VulkanBackend`]：真实设备
/// - [`crate::foundation::headless::HeadlessBackend`]：确定性的模拟，用于测试和无 GPU 环境
///
/// 所有函数都只在单个线程上调用。
pub trait GfxBackend {
    fn name(&self) -> &str;

    fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties>;

    fn get_device_queue(&self, queue_family_index: u32) -> vk::Queue;

    fn device_wait_idle(&self) -> VkResult<()>;

    fn set_debug_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str);

    // command pool / buffer
    fn create_command_pool(&self, queue_family_index: u32, name: &str) -> VkResult<vk::CommandPool>;
    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool, name: &str) -> VkResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    // timeline semaphore
    fn create_timeline_semaphore(&self, initial_value: u64, name: &str) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn get_semaphore_counter_value(&self, semaphore: vk::Semaphore) -> VkResult<u64>;
    /// 等待所有 semaphore 达到对应的 value；超时返回 `Err(vk::Result::TIMEOUT)`
    fn wait_semaphores(&self, semaphores: &[vk::Semaphore], values: &[u64], timeout_ns: u64) -> VkResult<()>;

    // submit
    fn queue_submit(&self, queue: vk::Queue, submit_info: &GfxSubmitInfo) -> VkResult<()>;

    // 同步命令
    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    );

    // 绘制类型的命令
    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering_info: &GfxRenderingInfo);
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    fn cmd_clear_attachments(&self, cmd: vk::CommandBuffer, attachments: &[vk::ClearAttachment], rects: &[vk::ClearRect]);
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, first_binding: u32, buffers: &[vk::Buffer], offsets: &[u64]);
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: glam::UVec3);

    // 数据传输类型
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy);
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    );

    // debug label
    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, color: glam::Vec4);
    fn cmd_end_label(&self, cmd: vk::CommandBuffer);
    fn cmd_insert_label(&self, cmd: vk::CommandBuffer, label: &str, color: glam::Vec4);

    // host visible buffer，用于 staging
    fn create_host_buffer(&self, size: u64, usage: vk::BufferUsageFlags, name: &str) -> VkResult<GfxHostBuffer>;
    fn write_host_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]);
    fn destroy_host_buffer(&self, buffer: vk::Buffer);

    // descriptor
    fn create_descriptor_pool(&self, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[GfxDescriptorWrite]);
}
