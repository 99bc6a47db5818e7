use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    pub(crate) queue_family_props: Vec<vk::QueueFamilyProperties>,
}

impl GfxPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个支持 vulkan 1.3 的显卡
    pub fn new_descrete_physical_device(instance: &ash::Instance) -> anyhow::Result<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }.context("failed to enumerate gpus")?;
        pdevices
            .iter()
            .map(|pdevice| Self::new(*pdevice, instance))
            .filter(|pdevice| pdevice.basic_props.api_version >= vk::API_VERSION_1_3)
            // 优先使用独立显卡
            .find_or_first(Self::is_descrete_gpu)
            .context("no gpu supports vulkan 1.3")
    }

    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Self {
        unsafe {
            let basic_props = instance.get_physical_device_properties(pdevice);
            let physical_device_name = CStr::from_ptr(basic_props.device_name.as_ptr());
            log::info!("found gpu: {:?}, type: {:?}", physical_device_name, basic_props.device_type);

            let queue_family_props = instance.get_physical_device_queue_family_properties(pdevice);
            log::debug!("physical device: queue family props:\n{:#?}", queue_family_props);

            Self {
                vk_handle: pdevice,
                basic_props,
                queue_family_props,
            }
        }
    }

    /// 当前 gpu 是否是独立显卡
    #[inline]
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.basic_props.device_name.as_ptr()) }.to_string_lossy().into_owned()
    }
}
