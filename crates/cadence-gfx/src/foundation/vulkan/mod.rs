//! 基于 ash + vk-mem 的真实设备 backend

pub mod device;
pub mod instance;
pub mod physical_device;

use std::{cell::RefCell, collections::HashMap, ffi::CString, mem::ManuallyDrop};

use anyhow::Context;
use ash::{prelude::VkResult, vk};
use itertools::Itertools;
use vk_mem::Alloc;

use crate::{
    commands::{rendering_info::GfxRenderingInfo, submit_info::GfxSubmitInfo},
    config::GfxConfig,
    foundation::{
        backend::GfxBackend,
        queue_family::GfxQueueFamilies,
        vulkan::{device::GfxDevice, instance::GfxInstance, physical_device::GfxPhysicalDevice},
    },
    resources::{
        buffer::GfxHostBuffer,
        descriptor::{GfxDescriptorResource, GfxDescriptorWrite},
    },
};

/// 常驻映射的 host buffer
struct HostAllocation {
    allocation: vk_mem::Allocation,
    mapped_ptr: *mut u8,
    size: vk::DeviceSize,
}

pub struct VulkanBackend {
    /// 需要保证 entry 的生命周期长于 instance
    _vk_entry: ash::Entry,
    instance: GfxInstance,
    physical_device: GfxPhysicalDevice,
    device: GfxDevice,
    /// vma 依赖 instance 和 device，需要在它们之前销毁
    allocator: ManuallyDrop<vk_mem::Allocator>,

    host_buffers: RefCell<HashMap<vk::Buffer, HostAllocation>>,
}

// 创建与销毁
impl VulkanBackend {
    pub fn new(config: &GfxConfig) -> anyhow::Result<Self> {
        let vk_entry = unsafe { ash::Entry::load() }.context("failed to load vulkan library")?;
        let instance = GfxInstance::new(&vk_entry, &config.app_name, config.enable_validation)?;
        let physical_device = GfxPhysicalDevice::new_descrete_physical_device(instance.ash_instance())?;
        log::info!("selected gpu: {}", physical_device.name());

        let families = GfxQueueFamilies::discover(&physical_device.queue_family_props)
            .context("gpu has no graphics + compute + transfer queue family")?;
        let device = GfxDevice::new(
            instance.ash_instance(),
            physical_device.vk_handle,
            &families,
            instance.debug_utils_enabled(),
        )?;

        let mut vma_ci =
            vk_mem::AllocatorCreateInfo::new(instance.ash_instance(), &device.device, physical_device.vk_handle);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci) }.context("failed to create vma allocator")?;

        Ok(Self {
            _vk_entry: vk_entry,
            instance,
            physical_device,
            device,
            allocator: ManuallyDrop::new(allocator),
            host_buffers: RefCell::new(HashMap::new()),
        })
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("destroying vulkan backend");
        unsafe {
            if let Err(e) = self.device.device.device_wait_idle() {
                log::error!("device wait idle failed during shutdown: {e:?}");
            }

            let leaked = std::mem::take(&mut *self.host_buffers.borrow_mut());
            if !leaked.is_empty() {
                log::warn!("{} host buffers are not destroyed before shutdown", leaked.len());
            }
            for (buffer, mut host_alloc) in leaked {
                self.allocator.unmap_memory(&mut host_alloc.allocation);
                self.allocator.destroy_buffer(buffer, &mut host_alloc.allocation);
            }

            ManuallyDrop::drop(&mut self.allocator);
        }
        self.device.destroy();
        self.instance.destroy();
    }
}

// tools
impl VulkanBackend {
    #[inline]
    fn vk_device(&self) -> &ash::Device {
        &self.device.device
    }

    fn debug_label<'a>(label: &'a CString, color: glam::Vec4) -> vk::DebugUtilsLabelEXT<'a> {
        vk::DebugUtilsLabelEXT::default().label_name(label.as_c_str()).color(color.into())
    }

    fn cstring(name: &str) -> CString {
        // 名字中的 nul 只会影响调试信息，直接丢弃
        CString::new(name.replace('\0', "")).unwrap_or_default()
    }
}

impl GfxBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties> {
        self.physical_device.queue_family_props.clone()
    }

    fn get_device_queue(&self, queue_family_index: u32) -> vk::Queue {
        unsafe { self.vk_device().get_device_queue(queue_family_index, 0) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.vk_device().device_wait_idle() }
    }

    fn set_debug_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str) {
        let Some(debug_utils) = &self.device.debug_utils else {
            return;
        };
        let name = Self::cstring(name);
        let name_info = vk::DebugUtilsObjectNameInfoEXT {
            object_type,
            object_handle: raw_handle,
            ..Default::default()
        }
        .object_name(name.as_c_str());
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {name:?}: {e:?}");
        }
    }

    fn create_command_pool(&self, queue_family_index: u32, name: &str) -> VkResult<vk::CommandPool> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { self.vk_device().create_command_pool(&pool_ci, None)? };
        self.set_debug_name(vk::ObjectType::COMMAND_POOL, vk::Handle::as_raw(pool), name);
        Ok(pool)
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        unsafe { self.vk_device().reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.vk_device().destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool, name: &str) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.vk_device().allocate_command_buffers(&info)? }
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        self.set_debug_name(vk::ObjectType::COMMAND_BUFFER, vk::Handle::as_raw(cmd), name);
        Ok(cmd)
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.vk_device().begin_command_buffer(cmd, &begin_info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.vk_device().end_command_buffer(cmd) }
    }

    fn create_timeline_semaphore(&self, initial_value: u64, name: &str) -> VkResult<vk::Semaphore> {
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore = unsafe { self.vk_device().create_semaphore(&timeline_semaphore_ci, None)? };
        self.set_debug_name(vk::ObjectType::SEMAPHORE, vk::Handle::as_raw(semaphore), name);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.vk_device().destroy_semaphore(semaphore, None) }
    }

    fn get_semaphore_counter_value(&self, semaphore: vk::Semaphore) -> VkResult<u64> {
        unsafe { self.vk_device().get_semaphore_counter_value(semaphore) }
    }

    fn wait_semaphores(&self, semaphores: &[vk::Semaphore], values: &[u64], timeout_ns: u64) -> VkResult<()> {
        let wait_info = vk::SemaphoreWaitInfo::default().semaphores(semaphores).values(values);
        unsafe { self.vk_device().wait_semaphores(&wait_info, timeout_ns) }
    }

    fn queue_submit(&self, queue: vk::Queue, submit_info: &GfxSubmitInfo) -> VkResult<()> {
        let command_buffer_infos = submit_info
            .command_buffers()
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
            .collect_vec();
        let wait_infos = submit_info.wait_infos().iter().map(|info| info.vk_info()).collect_vec();
        let signal_infos = submit_info.signal_infos().iter().map(|info| info.vk_info()).collect_vec();

        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe { self.vk_device().queue_submit2(queue, std::slice::from_ref(&submit), vk::Fence::null()) }
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(image_barriers)
            .buffer_memory_barriers(buffer_barriers);
        unsafe { self.vk_device().cmd_pipeline_barrier2(cmd, &dependency_info) }
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering_info: &GfxRenderingInfo) {
        let rendering_info = rendering_info.rendering_info();
        unsafe { self.device.dynamic_rendering.cmd_begin_rendering(cmd, &rendering_info) }
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.dynamic_rendering.cmd_end_rendering(cmd) }
    }

    fn cmd_clear_attachments(&self, cmd: vk::CommandBuffer, attachments: &[vk::ClearAttachment], rects: &[vk::ClearRect]) {
        unsafe { self.vk_device().cmd_clear_attachments(cmd, attachments, rects) }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.vk_device().cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport)) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.vk_device().cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor)) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.vk_device().cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe { self.vk_device().cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[]) }
    }

    fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, first_binding: u32, buffers: &[vk::Buffer], offsets: &[u64]) {
        unsafe { self.vk_device().cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets) }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        unsafe { self.vk_device().cmd_bind_index_buffer(cmd, buffer, offset, index_type) }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.vk_device().cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance) }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.vk_device().cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: glam::UVec3) {
        unsafe { self.vk_device().cmd_dispatch(cmd, group_count.x, group_count.y, group_count.z) }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        unsafe { self.vk_device().cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region)) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        unsafe { self.vk_device().cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, std::slice::from_ref(&region)) }
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, color: glam::Vec4) {
        if let Some(debug_utils) = &self.device.debug_utils {
            let label = Self::cstring(label);
            unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &Self::debug_label(&label, color)) }
        }
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.device.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(cmd) }
        }
    }

    fn cmd_insert_label(&self, cmd: vk::CommandBuffer, label: &str, color: glam::Vec4) {
        if let Some(debug_utils) = &self.device.debug_utils {
            let label = Self::cstring(label);
            unsafe { debug_utils.cmd_insert_debug_utils_label(cmd, &Self::debug_label(&label, color)) }
        }
    }

    fn create_host_buffer(&self, size: u64, usage: vk::BufferUsageFlags, name: &str) -> VkResult<GfxHostBuffer> {
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci)? };
        let mapped_ptr = match unsafe { self.allocator.map_memory(&mut allocation) } {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                return Err(e);
            }
        };
        self.set_debug_name(vk::ObjectType::BUFFER, vk::Handle::as_raw(buffer), name);

        self.host_buffers.borrow_mut().insert(
            buffer,
            HostAllocation {
                allocation,
                mapped_ptr,
                size,
            },
        );
        Ok(GfxHostBuffer { handle: buffer, size })
    }

    fn write_host_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) {
        let host_buffers = self.host_buffers.borrow();
        let Some(host_alloc) = host_buffers.get(&buffer) else {
            panic!("write to unknown host buffer {buffer:?}");
        };
        assert!(
            offset + data.len() as u64 <= host_alloc.size,
            "host buffer write out of range: {} > {}",
            offset + data.len() as u64,
            host_alloc.size
        );

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), host_alloc.mapped_ptr.add(offset as usize), data.len());
        }
        // 非 coherent 内存需要 flush，coherent 内存上 vma 会忽略
        if let Err(e) = self.allocator.flush_allocation(&host_alloc.allocation, offset, data.len() as u64) {
            crate::foundation::check::fatal_vk_error(e, "flush_allocation", file!(), line!());
        }
    }

    fn destroy_host_buffer(&self, buffer: vk::Buffer) {
        let Some(mut host_alloc) = self.host_buffers.borrow_mut().remove(&buffer) else {
            log::warn!("destroy unknown host buffer {buffer:?}");
            return;
        };
        unsafe {
            self.allocator.unmap_memory(&mut host_alloc.allocation);
            self.allocator.destroy_buffer(buffer, &mut host_alloc.allocation);
        }
    }

    fn create_descriptor_pool(&self, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(pool_sizes);
        unsafe { self.vk_device().create_descriptor_pool(&pool_ci, None) }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        unsafe { self.vk_device().reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.vk_device().destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&layout));
        unsafe { self.vk_device().allocate_descriptor_sets(&alloc_info)? }
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[GfxDescriptorWrite]) {
        // 先把所有 info 收集起来，保证 write 中的指针有效
        let buffer_infos = writes
            .iter()
            .map(|write| match write.resource {
                GfxDescriptorResource::Buffer { buffer, offset, range } => {
                    vk::DescriptorBufferInfo::default().buffer(buffer).offset(offset).range(range)
                }
                GfxDescriptorResource::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect_vec();
        let image_infos = writes
            .iter()
            .map(|write| match write.resource {
                GfxDescriptorResource::Image {
                    sampler,
                    image_view,
                    layout,
                } => vk::DescriptorImageInfo::default().sampler(sampler).image_view(image_view).image_layout(layout),
                GfxDescriptorResource::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect_vec();

        let vk_writes = writes
            .iter()
            .enumerate()
            .map(|(idx, write)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.descriptor_type);
                match write.resource {
                    GfxDescriptorResource::Buffer { .. } => {
                        vk_write.buffer_info(std::slice::from_ref(&buffer_infos[idx]))
                    }
                    GfxDescriptorResource::Image { .. } => vk_write.image_info(std::slice::from_ref(&image_infos[idx])),
                }
            })
            .collect_vec();

        unsafe { self.vk_device().update_descriptor_sets(&vk_writes, &[]) }
    }
}
