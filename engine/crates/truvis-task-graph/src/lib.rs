//! TaskGraph - 帧任务图编译器
//!
//! 渲染代码只需要声明 GPU 任务（compute / graphics / transfer / present）
//! 以及每个任务读写了哪些纹理和缓冲区，显存分配与同步由编译器完成。
//!
//! # 编译流水线
//!
//! ```text
//! TgResourceTable → Validator → LifetimeAnalyzer → Merger → MemoryPacker → BarrierPlanner
//! ```
//!
//! 编译结果 `CompiledTaskGraph` 是不可变的执行计划，每帧调用一次 `execute`。
//!
//! # 使用示例
//!
//! ```ignore
//! use truvis_task_graph::*;
//!
//! let mut builder = TaskGraphBuilder::new();
//! let swapchain = builder.register_presentation_texture("swapchain", move || swapchain_image());
//!
//! let mut task = builder.add_compute_task("lighting");
//! let hdr = task.add_texture_output(
//!     "hdr",
//!     TgTextureDesc::new_2d(vk::Format::R16G16B16A16_SFLOAT, SIZE_SCENE, SIZE_SCENE),
//! );
//! task.set_function(|ctx| { /* dispatch */ });
//!
//! let mut task = builder.add_graphics_task("tonemap");
//! task.add_texture_input(hdr);
//! task.add_existing_color_attachment(swapchain);
//! task.set_function(|ctx| { /* draw */ });
//!
//! builder.add_default_present_task().set_presentation_image(swapchain);
//!
//! let mut graph = CompiledTaskGraph::compile(builder, &compile_info, &mut vulkan_ctx)?;
//! graph.execute(&mut vulkan_ctx, &mut TgExecuteData::new(cmd))?;
//! graph.free(&mut vulkan_ctx);
//! ```
//!
//! # 模块结构
//!
//! - `handle`: 逻辑资源句柄
//! - `resource_desc` / `resource_table`: 资源描述与注册表
//! - `task` / `builder`: 任务定义与构建器
//! - `validator`: 图合法性检查
//! - `lifetime`: 资源生命周期分析
//! - `merger`: 描述符级别的粗粒度别名
//! - `packing`: 时间维度上的显存装箱
//! - `resource_state` / `barrier`: 访问状态与 barrier 规划
//! - `context`: 图形 API 抽象（Vulkan 实现与录制实现）
//! - `compiled_graph`: 编译入口与逐帧执行

/// tracy 区间；客户端未启动时不记录
macro_rules! tg_span {
    ($name:literal) => {
        tracy_client::Client::running().map(|_| tracy_client::span!($name))
    };
}

pub mod barrier;
pub mod builder;
pub mod compile_info;
pub mod compiled_graph;
pub mod context;
pub mod error;
pub mod handle;
pub mod lifetime;
pub mod merger;
pub mod packing;
pub mod resource_desc;
pub mod resource_state;
pub mod resource_table;
pub mod stats;
pub mod task;
pub mod validator;

pub use ash::vk;

pub use barrier::{BarrierPlanner, TgAttachmentPlan, TgBufferBarrier, TgImageBarrier, TgTaskBarriers};
pub use builder::{
    TaskGraphBuilder, TgComputeTaskBuilder, TgGraphicsTaskBuilder, TgPipelineTaskBuilder, TgPresentTaskBuilder,
    TgTransferTaskBuilder,
};
pub use compile_info::TgCompileInfo;
pub use compiled_graph::{CompiledTaskGraph, TgExecuteData, TgPhysicalResource};
pub use context::{GraphicsContext, TgAllocationId};
pub use error::TaskGraphError;
pub use handle::{TgBufferRef, TgResourceRef, TgTextureRef};
pub use lifetime::{LifetimeAnalyzer, TgLifetime, TgLifetimes};
pub use merger::{Merger, TgMergeResult, TgMergedSlot, TgSlotDesc};
pub use packing::{MemoryBucket, PackError, TgMemoryKind, TgMemoryRequest, pack_resources};
pub use resource_desc::{
    AUTO_FULL_MIP_CHAIN, SIZE_DISPLAY, SIZE_SCENE, TgBufferDesc, TgTextureDesc, resolve_relative_size,
    size_display_div, size_scene_div,
};
pub use resource_state::{TgBufferState, TgImageState};
pub use resource_table::{TgExternalTexture, TgResourceTable};
pub use stats::TgStats;
pub use task::{TgAccess, TgClearValue, TgTaskContext, TgTaskKind, TgTextureUsage};
pub use validator::{MAX_COLOR_ATTACHMENTS, ValidationError, Validator};
