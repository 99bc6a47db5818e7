pub mod barrier;
pub mod command_buffer;
pub mod command_queue;
pub mod rendering_info;
pub mod semaphore;
pub mod submit_info;
