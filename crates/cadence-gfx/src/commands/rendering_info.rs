use ash::vk;

/// dynamic rendering 的参数
///
/// attachment 使用 LOAD / STORE，清屏通过 `cmd_clear_attachments` 显式完成
#[derive(Clone, Debug)]
pub struct GfxRenderingInfo {
    color_attach_info: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attach_info: Option<vk::RenderingAttachmentInfo<'static>>,
    with_stencil: bool,
    render_area: vk::Rect2D,
}

impl GfxRenderingInfo {
    /// `depth_attach_image` 的第二个元素表示 depth image 是否带有 stencil aspect
    pub fn new(
        color_attach_images: &[vk::ImageView],
        depth_attach_image: Option<(vk::ImageView, bool)>,
        render_area: vk::Rect2D,
    ) -> Self {
        Self {
            color_attach_info: color_attach_images.iter().map(|view| Self::get_color_attachment(*view)).collect(),
            depth_attach_info: depth_attach_image.map(|(view, _)| Self::get_depth_attachment(view)),
            with_stencil: depth_attach_image.is_some_and(|(_, stencil)| stencil),
            render_area,
        }
    }

    pub fn rendering_info(&self) -> vk::RenderingInfo<'_> {
        let mut info = vk::RenderingInfo::default()
            .layer_count(1)
            .render_area(self.render_area)
            .color_attachments(&self.color_attach_info);
        if let Some(depth_attach) = &self.depth_attach_info {
            info = info.depth_attachment(depth_attach);
            if self.with_stencil {
                info = info.stencil_attachment(depth_attach);
            }
        }
        info
    }

    fn get_color_attachment(image_view: vk::ImageView) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .image_view(image_view)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
    }

    fn get_depth_attachment(depth_image_view: vk::ImageView) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .image_view(depth_image_view)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
    }
}

// getters
impl GfxRenderingInfo {
    #[inline]
    pub fn color_views(&self) -> Vec<vk::ImageView> {
        self.color_attach_info.iter().map(|info| info.image_view).collect()
    }

    #[inline]
    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.depth_attach_info.as_ref().map(|info| info.image_view)
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }
}
