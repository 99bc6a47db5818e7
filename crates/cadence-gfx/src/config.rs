use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// 一次 submit 中 wait 或 signal semaphore 的上限
///
/// signal 列表中最后一个位置固定留给 queue 自己的 timeline
pub const MAX_SUBMIT_SEMAPHORES: usize = 8;

/// 一次 `set_texture_state` / `set_buffer_state` 能批量提交的 barrier 上限
pub const MAX_BATCHED_BARRIERS: usize = 16;

/// 一个 graphics state 能同时绑定的 vertex buffer 上限
pub const MAX_VERTEX_BUFFERS: usize = 8;

/// GFX 层的配置
///
/// 所有字段都有默认值，toml 中只需要写需要覆盖的部分：
/// ```toml
/// fif_count = 2
/// frame_wait_timeout_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    pub app_name: String,

    /// frames in flight 的数量
    pub fif_count: usize,

    /// 帧同步等待的超时时间，超时视为 device lost
    pub frame_wait_timeout_ms: u64,

    /// staging chunk 的默认大小（字节）
    pub transfer_chunk_size: u64,
    /// staging 子分配的对齐，必须是 2 的幂
    pub transfer_alignment: u64,

    /// 每帧 descriptor pool 能分配的 set 数量
    pub descriptor_sets_per_frame: u32,

    /// 是否启用 validation layer（仅 Vulkan backend）
    pub enable_validation: bool,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            app_name: "Cadence".to_string(),
            fif_count: 3,
            frame_wait_timeout_ms: 10_000,
            transfer_chunk_size: 4 * 1024 * 1024,
            transfer_alignment: 256,
            descriptor_sets_per_frame: 1024,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GfxConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse gfx config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&text)?;
        log::info!("gfx config loaded from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.fif_count > 0, "fif_count must be at least 1");
        anyhow::ensure!(self.transfer_chunk_size > 0, "transfer_chunk_size must not be 0");
        anyhow::ensure!(
            self.transfer_alignment.is_power_of_two(),
            "transfer_alignment must be a power of two, got {}",
            self.transfer_alignment
        );
        anyhow::ensure!(self.descriptor_sets_per_frame > 0, "descriptor_sets_per_frame must not be 0");
        Ok(())
    }

    #[inline]
    pub fn frame_wait_timeout_ns(&self) -> u64 {
        self.frame_wait_timeout_ms.saturating_mul(1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GfxConfig::from_toml_str("fif_count = 2\ntransfer_chunk_size = 1024").unwrap();

        assert_eq!(config.fif_count, 2);
        assert_eq!(config.transfer_chunk_size, 1024);
        assert_eq!(config.transfer_alignment, GfxConfig::default().transfer_alignment);
        assert_eq!(config.frame_wait_timeout_ns(), 10_000 * 1_000_000);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(GfxConfig::from_toml_str("fif_count = 0").is_err());
        assert!(GfxConfig::from_toml_str("transfer_alignment = 24").is_err());
        assert!(GfxConfig::from_toml_str("fif_count = \"three\"").is_err());
    }
}
