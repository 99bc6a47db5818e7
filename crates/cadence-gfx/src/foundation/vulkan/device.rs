use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::foundation::queue_family::GfxQueueFamilies;

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及用到的扩展函数指针
pub struct GfxDevice {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 动态渲染扩展 API
    pub(crate) dynamic_rendering: ash::khr::dynamic_rendering::Device,
    /// 调试工具扩展 API，instance 没有启用 debug utils 时为 None
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
}

// 构造与销毁
impl GfxDevice {
    /// 为每个不重复的 queue family 创建一个 queue
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        families: &GfxQueueFamilies,
        debug_utils_enabled: bool,
    ) -> anyhow::Result<Self> {
        let queue_priorities = [1.0_f32];
        let queue_create_infos = families
            .unique_families()
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family.queue_family_index)
                    .queue_priorities(&queue_priorities)
            })
            .collect_vec();

        let device_exts = Self::basic_device_exts().iter().map(|e| e.as_ptr()).collect_vec();
        let mut exts_str = String::new();
        for ext in &device_exts {
            exts_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("device exts: {}", exts_str);

        let mut dynamic_rendering_features = vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);
        let mut sync2_features = vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true);
        let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true);
        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut dynamic_rendering_features)
            .push_next(&mut sync2_features)
            .push_next(&mut timeline_features);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None) }
            .context("failed to create vk device")?;

        let dynamic_rendering = ash::khr::dynamic_rendering::Device::new(instance, &device);
        let debug_utils = debug_utils_enabled.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        Ok(Self {
            device,
            dynamic_rendering,
            debug_utils,
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying device");
        unsafe {
            self.device.destroy_device(None);
        }
    }

    /// 必要的 device extensions
    ///
    /// timeline semaphore 和 synchronization2 已经提升到 core-1.3
    fn basic_device_exts() -> Vec<&'static CStr> {
        vec![ash::khr::dynamic_rendering::NAME]
    }
}
