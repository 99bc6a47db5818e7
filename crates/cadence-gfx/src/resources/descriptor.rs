use ash::vk::{self, Handle};

/// descriptor 指向的资源
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        sampler: vk::Sampler,
        image_view: vk::ImageView,
        layout: vk::ImageLayout,
    },
}

/// descriptor set 中一个 binding 的写入
///
/// 可以 hash，per-frame descriptor cache 用 (layout, writes) 作为 key
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorWrite {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resource: GfxDescriptorResource,
}

impl GfxDescriptorWrite {
    pub fn uniform_buffer(binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize, range: vk::DeviceSize) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            resource: GfxDescriptorResource::Buffer { buffer, offset, range },
        }
    }

    pub fn storage_buffer(binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize, range: vk::DeviceSize) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            resource: GfxDescriptorResource::Buffer { buffer, offset, range },
        }
    }

    pub fn sampled_image(binding: u32, sampler: vk::Sampler, image_view: vk::ImageView) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            resource: GfxDescriptorResource::Image {
                sampler,
                image_view,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }
    }

    pub fn storage_image(binding: u32, image_view: vk::ImageView) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
            resource: GfxDescriptorResource::Image {
                sampler: vk::Sampler::null(),
                image_view,
                layout: vk::ImageLayout::GENERAL,
            },
        }
    }
}

/// 每帧 descriptor pool 的默认容量分布
pub fn default_pool_sizes(max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    [
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::DescriptorType::STORAGE_IMAGE,
    ]
    .into_iter()
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: max_sets * 4,
    })
    .collect()
}
