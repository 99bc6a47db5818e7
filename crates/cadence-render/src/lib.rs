//! Cadence 的录制层
//!
//! [`command_list::CommandList`] 在一个 command buffer 上录制命令，惰性地开关 render pass，
//! 过滤冗余的状态切换；[`render_context::RenderContext`] 负责 frame pacing，
//! 在复用某个 frame slot 之前等待它之前的 submission 完成，再回收 descriptor set 和 staging 内存。

pub mod command_list;
pub mod debug_command;
pub mod descriptor_cache;
pub mod frame_counter;
pub mod program;
pub mod render_context;
pub mod render_target;

#[cfg(test)]
pub(crate) mod test_utils;
