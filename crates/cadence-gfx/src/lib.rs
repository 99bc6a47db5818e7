//! Cadence 的 GFX 层
//!
//! 负责 GPU 命令的提交与同步：command buffer 的分配与回收、按能力划分的 command queue、
//! timeline semaphore 跟踪、barrier 的逻辑布局映射，以及按帧回收的 staging 内存。
//!
//! 所有 driver 调用都经过 [`foundation::backend::GfxBackend`]，
//! 既可以落到真实的 Vulkan 设备，也可以落到无 GPU 的 headless 模拟设备上。

pub mod basic;
pub mod commands;
pub mod config;
pub mod foundation;
pub mod gfx;
pub mod resources;
