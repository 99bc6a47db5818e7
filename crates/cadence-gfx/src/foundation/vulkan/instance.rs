use std::ffi::{CStr, CString, c_char};

use anyhow::Context;
use ash::vk;

/// vk instance 以及可选的 debug messenger
pub struct GfxInstance {
    pub(crate) ash_instance: ash::Instance,
    debug_msger: Option<GfxDebugMsger>,
}

struct GfxDebugMsger {
    vk_debug_utils_instance: ash::ext::debug_utils::Instance,
    vk_debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

// 创建与销毁
impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// `enable_validation` 为 true 时启用 validation layer 和 debug utils；
    /// 设备上没有对应的 layer / extension 时降级为不启用，并输出 warn
    pub fn new(vk_entry: &ash::Entry, app_name: &str, enable_validation: bool) -> anyhow::Result<Self> {
        let app_name = CString::new(app_name).context("app name contains nul")?;
        let engine_name = c"Cadence";
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let supported_exts = unsafe { vk_entry.enumerate_instance_extension_properties(None)? };
        let debug_utils_supported = supported_exts
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == ash::ext::debug_utils::NAME);

        let supported_layers = unsafe { vk_entry.enumerate_instance_layer_properties()? };
        let validation_layer = c"VK_LAYER_KHRONOS_validation";
        let validation_supported = supported_layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == validation_layer);

        let enable_debug_utils = enable_validation && debug_utils_supported;
        if enable_validation && !(debug_utils_supported && validation_supported) {
            log::warn!(
                "validation requested but not available: debug_utils={}, validation layer={}",
                debug_utils_supported,
                validation_supported
            );
        }

        let mut enabled_extensions: Vec<*const c_char> = vec![];
        if enable_debug_utils {
            enabled_extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let mut enabled_layers: Vec<*const c_char> = vec![];
        if enable_validation && validation_supported {
            enabled_layers.push(validation_layer.as_ptr());
        }
        log::info!("instance extensions: {}, layers: {}", enabled_extensions.len(), enabled_layers.len());

        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        let ash_instance =
            unsafe { vk_entry.create_instance(&instance_ci, None) }.context("failed to create vk instance")?;

        let debug_msger = if enable_debug_utils {
            let loader = ash::ext::debug_utils::Instance::new(vk_entry, &ash_instance);
            let messenger = unsafe { loader.create_debug_utils_messenger(&Self::debug_utils_messenger_ci(), None)? };
            Some(GfxDebugMsger {
                vk_debug_utils_instance: loader,
                vk_debug_utils_messenger: messenger,
            })
        } else {
            None
        };

        Ok(Self {
            ash_instance,
            debug_msger,
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying instance");
        unsafe {
            if let Some(msger) = &self.debug_msger {
                msger.vk_debug_utils_instance.destroy_debug_utils_messenger(msger.vk_debug_utils_messenger, None);
            }
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getters
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn debug_utils_enabled(&self) -> bool {
        self.debug_msger.is_some()
    }
}

// 构造过程辅助函数
impl GfxInstance {
    fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

/// debug messenger 的回调函数
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };
    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{:?}]\n{}", message_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{:?}]\n{}", message_type, msg),
        _ => log::info!("[{:?}]\n{}", message_type, msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}
