use ash::vk;

bitflags::bitflags! {
    /// command buffer / queue 的能力类别，可以组合
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct QueueCapability: u32 {
        const GRAPHICS = 0b001;
        const COMPUTE  = 0b010;
        const TRANSFER = 0b100;
    }
}

impl QueueCapability {
    /// 能力类别对应的 vk queue flags
    #[inline]
    pub fn vk_queue_flags(self) -> vk::QueueFlags {
        let mut flags = vk::QueueFlags::empty();
        if self.contains(Self::GRAPHICS) {
            flags |= vk::QueueFlags::GRAPHICS;
        }
        if self.contains(Self::COMPUTE) {
            flags |= vk::QueueFlags::COMPUTE;
        }
        if self.contains(Self::TRANSFER) {
            flags |= vk::QueueFlags::TRANSFER;
        }
        flags
    }

    /// 规范的能力类别：GRAPHICS 隐含 COMPUTE 和 TRANSFER，COMPUTE 隐含 TRANSFER
    ///
    /// 相同类别的请求会落到同一个 command queue 上
    #[inline]
    pub fn class(self) -> Self {
        if self.contains(Self::GRAPHICS) {
            Self::all()
        } else if self.contains(Self::COMPUTE) {
            Self::COMPUTE | Self::TRANSFER
        } else {
            Self::TRANSFER
        }
    }

    pub fn name(self) -> &'static str {
        match self.class() {
            c if c == Self::all() => "gfx",
            c if c.contains(Self::COMPUTE) => "compute",
            _ => "transfer",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxQueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

impl GfxQueueFamily {
    /// graphics 和 compute family 隐含 transfer 能力
    #[inline]
    pub fn supports(&self, capability: QueueCapability) -> bool {
        let mut flags = self.queue_flags;
        if flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
            flags |= vk::QueueFlags::TRANSFER;
        }
        flags.contains(capability.vk_queue_flags())
    }
}

/// 设备上可用的 queue family
///
/// - gfx：全能的 family，graphics + compute + transfer，一定存在
/// - compute：不含 graphics 的 async compute family
/// - transfer：只有 transfer 的 DMA family
#[derive(Clone, Debug)]
pub struct GfxQueueFamilies {
    pub gfx: GfxQueueFamily,
    pub compute: Option<GfxQueueFamily>,
    pub transfer: Option<GfxQueueFamily>,
}

impl GfxQueueFamilies {
    /// 根据 physical device 的 queue family 属性找到各类 family
    ///
    /// 设备上没有全能 family 时返回 None
    pub fn discover(props: &[vk::QueueFamilyProperties]) -> Option<Self> {
        let find_queue_family = |name: &str, include_flags: vk::QueueFlags, exclude_flags: vk::QueueFlags| {
            props
                .iter()
                .enumerate()
                .find(|(_, props)| {
                    props.queue_count > 0
                        && props.queue_flags.contains(include_flags)
                        && (props.queue_flags & exclude_flags).is_empty()
                })
                .map(|(family_idx, props)| GfxQueueFamily {
                    name: name.to_string(),
                    queue_family_index: family_idx as u32,
                    queue_flags: props.queue_flags,
                    queue_count: props.queue_count,
                })
        };

        // transfer 是 graphics / compute family 隐含的能力，不要求 flags 里显式带上
        let gfx =
            find_queue_family("gfx", vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::empty())?;
        let compute = find_queue_family("compute-only", vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS);
        let transfer = find_queue_family(
            "transfer-only",
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        );

        log::info!(
            "queue families: gfx={}, compute={:?}, transfer={:?}",
            gfx.queue_family_index,
            compute.as_ref().map(|f| f.queue_family_index),
            transfer.as_ref().map(|f| f.queue_family_index)
        );

        Some(Self { gfx, compute, transfer })
    }

    /// 能满足某个能力类别的、最专用的 family
    pub fn family_for(&self, capability: QueueCapability) -> &GfxQueueFamily {
        match capability.class() {
            c if c.contains(QueueCapability::GRAPHICS) => &self.gfx,
            c if c.contains(QueueCapability::COMPUTE) => self.compute.as_ref().unwrap_or(&self.gfx),
            _ => self.transfer.as_ref().or(self.compute.as_ref()).unwrap_or(&self.gfx),
        }
    }

    /// 所有不重复的 family，用于创建 device 时申请 queue
    pub fn unique_families(&self) -> Vec<&GfxQueueFamily> {
        let mut families = vec![&self.gfx];
        for family in [self.compute.as_ref(), self.transfer.as_ref()].into_iter().flatten() {
            if families.iter().all(|f| f.queue_family_index != family.queue_family_index) {
                families.push(family);
            }
        }
        families
    }
}
