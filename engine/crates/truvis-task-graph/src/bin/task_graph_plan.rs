//! 离线查看执行计划
//!
//! 用 `RecordingContext` 编译一个示例帧（GBuffer → 光照 → Bloom → Tonemap → 呈现），
//! 打印执行计划与统计信息。
//!
//! ```text
//! cargo run --bin task_graph_plan -- [config.toml]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use serde::Deserialize;
use truvis_crate_tools::init_log::init_log;
use truvis_crate_tools::resource::TruvisPath;
use truvis_task_graph::context::RecordingContext;
use truvis_task_graph::{
    CompiledTaskGraph, SIZE_DISPLAY, SIZE_SCENE, TaskGraphBuilder, TgBufferDesc, TgCompileInfo, TgExecuteData,
    TgExternalTexture, TgTextureDesc, size_scene_div,
};

/// TOML 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TgPlanConfig {
    scene_width: u32,
    scene_height: u32,
    display_width: u32,
    display_height: u32,

    headless: bool,
    merge_resources: bool,
    alias_memory: bool,

    show_stats: bool,
    print_plan: bool,
    /// 录制的帧数
    frames: u32,
    log_level: String,
}

impl Default for TgPlanConfig {
    fn default() -> Self {
        let info = TgCompileInfo::default();
        Self {
            scene_width: info.scene_width,
            scene_height: info.scene_height,
            display_width: info.display_width,
            display_height: info.display_height,
            headless: false,
            merge_resources: info.merge_resources,
            alias_memory: info.alias_memory,
            show_stats: true,
            print_plan: true,
            frames: 1,
            log_level: "info".to_string(),
        }
    }
}

impl TgPlanConfig {
    /// 从 TOML 文件加载配置
    fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;
        toml::from_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))
    }

    fn compile_info(&self) -> TgCompileInfo {
        TgCompileInfo {
            scene_width: self.scene_width,
            scene_height: self.scene_height,
            display_width: self.display_width,
            display_height: self.display_height,
            headless: self.headless,
            merge_resources: self.merge_resources,
            alias_memory: self.alias_memory,
            show_stats: self.show_stats,
            ..Default::default()
        }
    }
}

/// 示例帧
fn build_sample_frame(headless: bool) -> TaskGraphBuilder {
    let mut builder = TaskGraphBuilder::new();

    let mut gbuffer = builder.add_graphics_task("gbuffer");
    let albedo = gbuffer.add_cleared_color_attachment(
        "albedo",
        TgTextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, SIZE_SCENE, SIZE_SCENE),
        [0.0, 0.0, 0.0, 1.0],
    );
    let normal = gbuffer.add_color_attachment(
        "normal",
        TgTextureDesc::new_2d(vk::Format::R16G16B16A16_SFLOAT, SIZE_SCENE, SIZE_SCENE),
    );
    let depth = gbuffer.add_cleared_depth_attachment(
        "depth",
        TgTextureDesc::new_2d(vk::Format::D32_SFLOAT, SIZE_SCENE, SIZE_SCENE),
        1.0,
    );
    gbuffer.set_function(|ctx| log::trace!("draw gbuffer, render area {:?}", ctx.render_area()));

    let mut lighting = builder.add_compute_task("lighting");
    lighting.add_texture_input(albedo);
    lighting.add_texture_input(normal);
    lighting.add_texture_input(depth);
    let hdr = lighting.add_texture_output(
        "hdr",
        TgTextureDesc::new_2d(vk::Format::R16G16B16A16_SFLOAT, SIZE_SCENE, SIZE_SCENE),
    );
    let counters = lighting.add_cleared_buffer_output("light_counters", TgBufferDesc::new(4096), 0);
    lighting.set_function(|_| log::trace!("dispatch lighting"));

    let mut bloom = builder.add_compute_task("bloom");
    bloom.add_texture_input(hdr);
    let bloom_tex = bloom.add_texture_output(
        "bloom",
        TgTextureDesc::new_2d(vk::Format::R16G16B16A16_SFLOAT, size_scene_div(2), size_scene_div(2)),
    );
    bloom.add_buffer_input(counters, vk::BufferUsageFlags::STORAGE_BUFFER);
    bloom.set_function(|_| log::trace!("dispatch bloom"));

    let mut tonemap = builder.add_compute_task("tonemap");
    tonemap.add_texture_input(hdr);
    tonemap.add_texture_input(bloom_tex);
    let ldr = tonemap.add_texture_output(
        "ldr",
        TgTextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, SIZE_DISPLAY, SIZE_DISPLAY),
    );
    tonemap.set_function(|_| log::trace!("dispatch tonemap"));

    if headless {
        let mut capture = builder.add_compute_task("capture");
        capture.add_texture_input(ldr);
        capture.set_function(|_| log::trace!("read back ldr"));
        return builder;
    }

    let swapchain = builder.register_presentation_texture("swapchain", || TgExternalTexture {
        image: vk::Image::from_raw(0x5c00_0001),
        view: vk::ImageView::from_raw(0x5c00_0002),
    });
    builder.add_transfer_task("copy_to_swapchain").blit_texture(swapchain, ldr);
    builder.add_default_present_task().set_presentation_image(swapchain);

    builder
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| TruvisPath::config_path("task_graph.toml"));
    let config_exists = config_path.exists();
    let config = if config_exists { TgPlanConfig::from_file(&config_path)? } else { TgPlanConfig::default() };

    let level = config
        .log_level
        .parse::<log::LevelFilter>()
        .with_context(|| format!("无效的日志级别: {}", config.log_level))?;
    init_log(level);
    if !config_exists {
        log::warn!("config {:?} not found, using defaults", config_path);
    }

    tracy_client::Client::start();

    let info = config.compile_info();
    let mut ctx = RecordingContext::new();
    let mut graph = CompiledTaskGraph::compile(build_sample_frame(config.headless), &info, &mut ctx)
        .context("编译任务图失败")?;

    for frame in 0..config.frames {
        ctx.clear_commands();
        graph.execute(&mut ctx, &mut TgExecuteData::new(vk::CommandBuffer::null())).context("录制命令失败")?;
        log::info!("frame {}: recorded {} commands", frame, ctx.commands().len());
        tracy_client::frame_mark();
    }

    if config.print_plan {
        graph.print_execution_plan();
    }
    if config.show_stats {
        graph.print_stats();
    }

    graph.free(&mut ctx);
    log::info!("live objects after free: {}", ctx.live_objects());
    Ok(())
}
