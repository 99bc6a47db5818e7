use ash::vk;

use cadence_gfx::{
    basic::color::LabelColor,
    commands::{command_buffer::GfxCommandRecorder, rendering_info::GfxRenderingInfo},
};

/// command list 渲染的目标
///
/// 由 command list 惰性地开启和关闭：同一个 target 上连续的绘制只会开启一次 pass
pub trait RenderTarget {
    fn name(&self) -> &str;

    fn render_area(&self) -> vk::Rect2D;

    fn color_attachment_count(&self) -> u32;

    fn has_color(&self) -> bool {
        self.color_attachment_count() > 0
    }

    fn has_depth(&self) -> bool;

    fn has_stencil(&self) -> bool;

    fn begin_pass(&self, cmd: &GfxCommandRecorder);

    fn end_pass(&self, cmd: &GfxCommandRecorder);
}

/// 基于 dynamic rendering 的 render target
///
/// attachment 的 image 需要事先通过 texture barrier 转换到 attachment layout
pub struct GfxRenderTarget {
    name: String,
    rendering_info: GfxRenderingInfo,
    has_depth: bool,
    has_stencil: bool,
}

impl GfxRenderTarget {
    /// `depth` 的第二个元素表示 depth image 是否带有 stencil
    pub fn new(
        name: &str,
        color_views: &[vk::ImageView],
        depth: Option<(vk::ImageView, bool)>,
        extent: vk::Extent2D,
    ) -> Self {
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        Self {
            name: name.to_string(),
            rendering_info: GfxRenderingInfo::new(color_views, depth, render_area),
            has_depth: depth.is_some(),
            has_stencil: depth.is_some_and(|(_, stencil)| stencil),
        }
    }
}

impl RenderTarget for GfxRenderTarget {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn render_area(&self) -> vk::Rect2D {
        self.rendering_info.render_area()
    }

    #[inline]
    fn color_attachment_count(&self) -> u32 {
        self.rendering_info.color_views().len() as u32
    }

    #[inline]
    fn has_depth(&self) -> bool {
        self.has_depth
    }

    #[inline]
    fn has_stencil(&self) -> bool {
        self.has_stencil
    }

    /// 开启 pass，viewport 和 scissor 覆盖整个 render area
    fn begin_pass(&self, cmd: &GfxCommandRecorder) {
        let area = self.render_area();
        cmd.begin_label(&self.name, LabelColor::COLOR_PASS);
        cmd.cmd_begin_rendering(&self.rendering_info);
        cmd.cmd_set_viewport(vk::Viewport {
            x: area.offset.x as f32,
            y: area.offset.y as f32,
            width: area.extent.width as f32,
            height: area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.cmd_set_scissor(area);
    }

    fn end_pass(&self, cmd: &GfxCommandRecorder) {
        cmd.cmd_end_rendering();
        cmd.end_label();
    }
}
