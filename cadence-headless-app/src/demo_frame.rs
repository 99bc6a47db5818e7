use std::rc::Rc;

use ash::vk::{self, Handle};

use cadence_gfx::{
    basic::color::LabelColor,
    commands::barrier::{BufferAccess, GfxBufferStateBarrier, GfxTextureBarrier, TextureLayout},
    foundation::queue_family::QueueCapability,
    resources::{buffer::GfxBufferSlice, descriptor::GfxDescriptorWrite, texture::GfxTextureRef},
};
use cadence_render::{
    command_list::{CommandList, ComputeState, GraphicsState, execute_command_lists},
    program::{GfxPipelineProgram, GfxProgram},
    render_context::RenderContext,
    render_target::{GfxRenderTarget, RenderTarget},
};

/// 只在模拟设备上使用的资源，handle 都是伪造的
struct DemoScene {
    color: GfxTextureRef,
    target: Rc<dyn RenderTarget>,
    mesh_program: Rc<GfxPipelineProgram>,
    cull_program: Rc<GfxPipelineProgram>,
    vertices: GfxBufferSlice,
    constants: GfxBufferSlice,
}

impl DemoScene {
    fn new() -> Self {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let mesh_program = GfxPipelineProgram::new(
            "mesh",
            vk::PipelineBindPoint::GRAPHICS,
            vk::Pipeline::from_raw(0xa000),
            vk::PipelineLayout::from_raw(0xa001),
            &[vk::DescriptorSetLayout::from_raw(0xa002)],
        );
        let cull_program = GfxPipelineProgram::new(
            "cull",
            vk::PipelineBindPoint::COMPUTE,
            vk::Pipeline::from_raw(0xb000),
            vk::PipelineLayout::from_raw(0xb001),
            &[vk::DescriptorSetLayout::from_raw(0xb002)],
        );
        Self {
            color: GfxTextureRef::new(vk::Image::from_raw(0xc000), vk::Format::R8G8B8A8_UNORM),
            target: Rc::new(GfxRenderTarget::new("main-pass", &[vk::ImageView::from_raw(0xc001)], None, extent)),
            mesh_program: Rc::new(mesh_program),
            cull_program: Rc::new(cull_program),
            vertices: GfxBufferSlice::new(vk::Buffer::from_raw(0xd000), 0, 36 * 16),
            constants: GfxBufferSlice::new(vk::Buffer::from_raw(0xd001), 0, 256),
        }
    }
}

/// 每帧的工作：transfer queue 上传常量，graphics queue 绘制，async compute queue 做剔除
///
/// 真实设备上没有可用的 pipeline，只录制 debug label，仍然经过完整的提交与 frame pacing
pub struct DemoFrame {
    context: Rc<RenderContext>,
    upload_list: CommandList,
    graphics_list: CommandList,
    compute_list: CommandList,
    scene: Option<DemoScene>,
}

impl DemoFrame {
    pub fn new(context: Rc<RenderContext>, with_scene: bool) -> Self {
        Self {
            upload_list: context.create_command_list(QueueCapability::TRANSFER, "upload"),
            graphics_list: context.create_command_list(QueueCapability::GRAPHICS, "main"),
            compute_list: context.create_command_list(QueueCapability::COMPUTE, "cull"),
            scene: with_scene.then(DemoScene::new),
            context,
        }
    }

    pub fn run_frame(&mut self) {
        let frame_id = self.context.frame_id();

        self.upload_list.begin();
        match &self.scene {
            Some(scene) => {
                let constants = [frame_id as f32; 16];
                self.upload_list.upload_pod(scene.constants, &constants);
            }
            None => self.upload_list.insert_label("upload"),
        }
        self.upload_list.end();
        let upload_id = execute_command_lists(&mut [&mut self.upload_list]);

        let graphics_queue = self.graphics_list.queue().clone();
        graphics_queue.add_wait_queue(self.upload_list.queue(), upload_id);
        self.graphics_list.begin();
        if let Some(scene) = &self.scene {
            Self::record_graphics(&mut self.graphics_list, scene);
        } else {
            self.graphics_list.insert_label("main");
        }
        self.graphics_list.end();
        let graphics_id = execute_command_lists(&mut [&mut self.graphics_list]);

        self.compute_list.queue().add_wait_queue(&graphics_queue, graphics_id);
        self.compute_list.begin();
        if let Some(scene) = &self.scene {
            let cull_program: Rc<dyn GfxProgram> = scene.cull_program.clone();
            scene.cull_program.set_descriptors(0, &[GfxDescriptorWrite::storage_buffer(
                0,
                scene.vertices.buffer,
                scene.vertices.offset,
                scene.vertices.size,
            )]);
            self.compute_list.set_compute_state(&ComputeState::new(cull_program));
            self.compute_list.dispatch(glam::UVec3::new(64, 1, 1));
        } else {
            self.compute_list.insert_label("cull");
        }
        self.compute_list.end();
        execute_command_lists(&mut [&mut self.compute_list]);
    }

    fn record_graphics(list: &mut CommandList, scene: &DemoScene) {
        list.begin_label("main-pass", LabelColor::COLOR_STAGE);
        list.set_buffer_state(&[GfxBufferStateBarrier::new(
            scene.constants,
            BufferAccess::Undefined,
            BufferAccess::UniformRead,
        )]);
        list.set_texture_state(&[GfxTextureBarrier::new(
            &scene.color,
            TextureLayout::Undefined,
            TextureLayout::ColorAttachment,
        )]);

        scene.mesh_program.set_descriptors(0, &[GfxDescriptorWrite::uniform_buffer(
            0,
            scene.constants.buffer,
            scene.constants.offset,
            scene.constants.size,
        )]);
        let mesh_program: Rc<dyn GfxProgram> = scene.mesh_program.clone();
        let state = GraphicsState::new(mesh_program, scene.target.clone()).vertex_buffer(scene.vertices);

        list.set_graphics_state(&state);
        list.clear_color(glam::Vec4::new(0.1, 0.1, 0.12, 1.0));
        for instance in 0..4 {
            // 相同的状态不会产生额外的 bind
            list.set_graphics_state(&state);
            list.draw(36, 1, 0, instance);
        }

        list.set_texture_state(&[GfxTextureBarrier::new(
            &scene.color,
            TextureLayout::ColorAttachment,
            TextureLayout::ShaderReadOnly,
        )]);
        list.end_label();
    }
}
