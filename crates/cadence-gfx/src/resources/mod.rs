pub mod buffer;
pub mod descriptor;
pub mod texture;
pub mod transfer_pool;
