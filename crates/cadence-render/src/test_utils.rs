use std::rc::Rc;

use ash::vk::{self, Handle};

use cadence_gfx::{config::GfxConfig, foundation::headless::HeadlessBackend, gfx::Gfx};

use crate::{
    program::GfxPipelineProgram,
    render_context::RenderContext,
    render_target::{GfxRenderTarget, RenderTarget},
};

pub(crate) fn create_context(fif_count: usize) -> (Rc<HeadlessBackend>, Rc<RenderContext>) {
    cadence_crate_tools::init_log::init_test_log();
    let backend = Rc::new(HeadlessBackend::new());
    let config = GfxConfig {
        fif_count,
        transfer_chunk_size: 1024,
        descriptor_sets_per_frame: 16,
        ..Default::default()
    };
    let gfx = Rc::new(Gfx::new(backend.clone(), config).unwrap());
    (backend, RenderContext::new(gfx))
}

/// color view 的 handle 是 `view`，depth view 的 handle 是 `view + 100`
pub(crate) fn render_target(name: &str, view: u64, depth_stencil: bool) -> Rc<dyn RenderTarget> {
    Rc::new(GfxRenderTarget::new(
        name,
        &[vk::ImageView::from_raw(view)],
        depth_stencil.then(|| (vk::ImageView::from_raw(view + 100), true)),
        vk::Extent2D {
            width: 64,
            height: 32,
        },
    ))
}

pub(crate) fn program(bind_point: vk::PipelineBindPoint, pipeline: u64) -> Rc<GfxPipelineProgram> {
    Rc::new(GfxPipelineProgram::new(
        &format!("program-{pipeline}"),
        bind_point,
        vk::Pipeline::from_raw(pipeline),
        vk::PipelineLayout::from_raw(pipeline + 1),
        &[vk::DescriptorSetLayout::from_raw(pipeline + 2)],
    ))
}
