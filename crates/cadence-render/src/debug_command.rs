use std::{fmt::Display, str::FromStr};

/// 可以在运行时触发的调试命令
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugCommand {
    /// 等待所有 frame slot 的 submission 完成
    FullSync,
    /// 输出所有 queue 和 staging pool 的使用情况
    DumpPools,
}

impl DebugCommand {
    pub const ALL: [Self; 2] = [Self::FullSync, Self::DumpPools];

    pub fn name(self) -> &'static str {
        match self {
            Self::FullSync => "gfx.full_sync",
            Self::DumpPools => "gfx.dump_pools",
        }
    }
}

impl Display for DebugCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DebugCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL.into_iter().find(|cmd| cmd.name() == s).ok_or_else(|| {
            anyhow::anyhow!("unknown debug command `{}`, available: {}", s, itertools::join(Self::ALL, ", "))
        })
    }
}
