use std::{path::PathBuf, rc::Rc};

use anyhow::Context;
use clap::Parser;

use cadence_gfx::{
    config::GfxConfig,
    foundation::{backend::GfxBackend, headless::HeadlessBackend, vulkan::VulkanBackend},
    gfx::Gfx,
};
use cadence_render::{debug_command::DebugCommand, render_context::RenderContext};

use crate::demo_frame::DemoFrame;

mod demo_frame;

#[derive(Parser)]
#[command(name = "cadence-headless")]
#[command(about = "Run the cadence frame loop without a window")]
struct Cli {
    /// gfx config file (toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run on a real Vulkan device instead of the simulated one
    #[arg(long)]
    vulkan: bool,

    /// Number of frames to run
    #[arg(short, long, default_value_t = 16)]
    frames: u64,

    /// Debug commands executed after the frame loop
    #[arg(long = "debug-command", default_values = ["gfx.dump_pools", "gfx.full_sync"])]
    debug_commands: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    cadence_crate_tools::init_log::init_log(log::LevelFilter::Info);
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GfxConfig::load(path)?,
        None => GfxConfig::default(),
    };
    let debug_commands =
        cli.debug_commands.iter().map(|cmd| cmd.parse::<DebugCommand>()).collect::<anyhow::Result<Vec<_>>>()?;

    // headless 模式下需要手动推进模拟的 GPU
    let (backend, headless): (Rc<dyn GfxBackend>, Option<Rc<HeadlessBackend>>) = if cli.vulkan {
        let backend = VulkanBackend::new(&config).context("failed to create vulkan backend")?;
        (Rc::new(backend), None)
    } else {
        let backend = Rc::new(HeadlessBackend::new());
        (backend.clone(), Some(backend))
    };

    let gfx = Rc::new(Gfx::new(backend, config)?);
    let context = RenderContext::new(gfx);
    let mut demo = DemoFrame::new(context.clone(), headless.is_some());

    for frame in 0..cli.frames {
        if frame > 0 {
            context.new_frame();
        }
        demo.run_frame();

        // 模拟的 GPU 每帧只完成一个 submission，让 frame pacing 的等待真正发生
        if let Some(headless) = &headless {
            headless.retire_next();
        }
    }

    for command in debug_commands {
        context.run_debug_command(command);
    }
    log::info!("ran {} frames on {}", cli.frames, context.gfx().backend().name());
    Ok(())
}
