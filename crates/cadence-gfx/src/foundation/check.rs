//! driver 调用失败时的处理
//!
//! submission 层没有可恢复的错误路径：driver 返回错误时，设备状态已经不可信，
//! 记录现场（表达式、文件、行号）之后直接终止。

use ash::vk;

/// 检查一个返回 `VkResult` 的表达式，失败时记录 error log 并 panic
///
/// ```ignore
/// let cmd = vk_check!(backend.allocate_command_buffer(pool));
/// ```
#[macro_export]
macro_rules! vk_check {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => $crate::foundation::check::fatal_vk_error(err, stringify!($expr), file!(), line!()),
        }
    };
}

#[cold]
#[inline(never)]
pub fn fatal_vk_error(err: vk::Result, expr: &str, file: &str, line: u32) -> ! {
    log::error!("vulkan call failed: {err:?}\n\texpr: {expr}\n\tat {file}:{line}");
    panic!("vulkan call failed: {err:?} ({expr}) at {file}:{line}");
}

/// GPU 长时间没有完成某个 submission，视为 device lost
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal_device_lost(what: &str) -> ! {
    let location = std::panic::Location::caller();
    log::error!("device lost: {what}\n\tat {}:{}", location.file(), location.line());
    panic!("device lost: {what}");
}

/// `VkResult` 的便捷检查，和 [`vk_check!`] 行为一致，位置信息来自调用方
pub trait VkResultExt<T> {
    fn check(self, what: &str) -> T;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[inline]
    #[track_caller]
    fn check(self, what: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                let location = std::panic::Location::caller();
                fatal_vk_error(err, what, location.file(), location.line())
            }
        }
    }
}
