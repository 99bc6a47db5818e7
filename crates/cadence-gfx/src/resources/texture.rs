use ash::vk;

/// 纹理对象需要向 submission 层提供的信息
///
/// 用于构建 texture barrier 和 buffer -> image 的 copy
pub trait GfxTexture {
    fn vk_image(&self) -> vk::Image;
    fn has_depth(&self) -> bool;
    fn has_stencil(&self) -> bool;
    fn mip_levels(&self) -> u32;
    fn array_layers(&self) -> u32;

    fn aspect_mask(&self) -> vk::ImageAspectFlags {
        match (self.has_depth(), self.has_stencil()) {
            (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            (true, false) => vk::ImageAspectFlags::DEPTH,
            (false, true) => vk::ImageAspectFlags::STENCIL,
            (false, false) => vk::ImageAspectFlags::COLOR,
        }
    }

    /// 覆盖所有 mip 和 layer 的 subresource range
    fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect_mask(),
            base_mip_level: 0,
            level_count: self.mip_levels(),
            base_array_layer: 0,
            layer_count: self.array_layers(),
        }
    }
}

/// 外部创建的 image 的引用，不拥有 image
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxTextureRef {
    pub image: vk::Image,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl GfxTextureRef {
    pub fn new(image: vk::Image, format: vk::Format) -> Self {
        Self {
            image,
            format,
            mip_levels: 1,
            array_layers: 1,
        }
    }

    /// builder
    #[inline]
    pub fn with_levels(mut self, mip_levels: u32, array_layers: u32) -> Self {
        self.mip_levels = mip_levels;
        self.array_layers = array_layers;
        self
    }

    /// 根据 format 推断 image 的 aspect
    pub fn infer_image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }

            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,

            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }

            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

impl GfxTexture for GfxTextureRef {
    #[inline]
    fn vk_image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    fn has_depth(&self) -> bool {
        Self::infer_image_aspect(self.format).contains(vk::ImageAspectFlags::DEPTH)
    }

    #[inline]
    fn has_stencil(&self) -> bool {
        Self::infer_image_aspect(self.format).contains(vk::ImageAspectFlags::STENCIL)
    }

    #[inline]
    fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    fn array_layers(&self) -> u32 {
        self.array_layers
    }
}
