pub mod backend;
pub mod check;
pub mod headless;
pub mod queue_family;
pub mod vulkan;
