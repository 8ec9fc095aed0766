//! 编译入口与逐帧执行
//!
//! `CompiledTaskGraph::compile` 依次运行 Validator → LifetimeAnalyzer → Merger →
//! MemoryPacker → BarrierPlanner，并创建所有物理资源。编译结果不可变，
//! 每帧调用一次 `execute` 把命令录制到调用方提供的命令缓冲区。

use std::any::Any;
use std::time::Instant;

use ash::vk;
use itertools::Itertools;
use slotmap::SecondaryMap;

use crate::barrier::{BarrierPlanner, TgAttachmentPlan, TgTaskBarriers};
use crate::builder::TaskGraphBuilder;
use crate::compile_info::TgCompileInfo;
use crate::context::{GraphicsContext, TgAllocationId, TgRenderingAttachment};
use crate::error::TaskGraphError;
use crate::handle::{TgBufferRef, TgTextureRef};
use crate::lifetime::LifetimeAnalyzer;
use crate::merger::{Merger, TgMergeResult, TgSlotDesc};
use crate::packing::{MemoryBucket, TgMemoryKind, TgMemoryRequest, pack_resources};
use crate::resource_desc::{TgBufferDesc, TgTextureDesc};
use crate::resource_table::TgResourceTable;
use crate::stats::TgStats;
use crate::task::{TgClearValue, TgTaskContext, TgTaskKind, TgTaskNode};
use crate::validator::Validator;

/// 物理资源：一个合并槽位对应的 image 或 buffer
///
/// 外部资源的句柄在每帧执行开始时通过回调刷新。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TgPhysicalResource {
    Texture {
        image: vk::Image,
        view: vk::ImageView,
        desc: TgTextureDesc,
        external: bool,
    },
    Buffer {
        buffer: vk::Buffer,
        desc: TgBufferDesc,
        external: bool,
    },
}

impl TgPhysicalResource {
    #[inline]
    pub fn image(&self) -> vk::Image {
        match self {
            Self::Texture { image, .. } => *image,
            Self::Buffer { .. } => vk::Image::null(),
        }
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        match self {
            Self::Texture { view, .. } => *view,
            Self::Buffer { .. } => vk::ImageView::null(),
        }
    }

    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        match self {
            Self::Buffer { buffer, .. } => *buffer,
            Self::Texture { .. } => vk::Buffer::null(),
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        match self {
            Self::Texture { external, .. } | Self::Buffer { external, .. } => *external,
        }
    }
}

/// 每帧执行时的输入
pub struct TgExecuteData<'a> {
    /// 已经 begin 的命令缓冲区
    pub cmd: vk::CommandBuffer,
    /// 透传给任务回调的每帧数据
    pub user_data: Option<&'a mut dyn Any>,
}

impl<'a> TgExecuteData<'a> {
    pub fn new(cmd: vk::CommandBuffer) -> Self {
        Self { cmd, user_data: None }
    }

    pub fn with_user_data(mut self, user_data: &'a mut dyn Any) -> Self {
        self.user_data = Some(user_data);
        self
    }
}

/// 编译后的任务图
///
/// 独占所有物理资源和显存块，必须用创建它的 context 调用 `free` 释放。
/// 多帧并行时调用方持有多个独立的 `CompiledTaskGraph`。
pub struct CompiledTaskGraph {
    resources: TgResourceTable,
    tasks: Vec<TgTaskNode>,
    merge: TgMergeResult,

    /// 按槽位索引
    physical: Vec<TgPhysicalResource>,
    /// 按 bucket 索引
    allocations: Vec<TgAllocationId>,
    buckets: Vec<MemoryBucket>,
    barriers: Vec<TgTaskBarriers>,

    /// 逻辑句柄到物理句柄的查询表，提供给任务回调
    texture_lookup: SecondaryMap<TgTextureRef, (vk::Image, vk::ImageView)>,
    buffer_lookup: SecondaryMap<TgBufferRef, vk::Buffer>,

    stats: TgStats,
    freed: bool,
}

// new & init
impl CompiledTaskGraph {
    /// 编译任务图并创建所有物理资源
    ///
    /// 校验失败时不会创建任何对象；之后任何一步失败都会释放已创建的对象再返回错误。
    pub fn compile(
        builder: TaskGraphBuilder,
        info: &TgCompileInfo,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<Self, TaskGraphError> {
        let _span = tg_span!("CompiledTaskGraph::compile");
        let start = Instant::now();

        Validator::validate(&builder, info)?;

        let (mut resources, tasks) = builder.into_parts();
        resources.resolve(info);

        let lifetimes = LifetimeAnalyzer::analyze(&tasks);
        let merge = Merger::merge(&resources, &lifetimes, info.merge_resources);

        let mut graph = Self {
            resources,
            tasks,
            merge,
            physical: Vec::new(),
            allocations: Vec::new(),
            buckets: Vec::new(),
            barriers: Vec::new(),
            texture_lookup: SecondaryMap::new(),
            buffer_lookup: SecondaryMap::new(),
            stats: TgStats::default(),
            freed: false,
        };

        if let Err(e) = graph.create_physical_resources(info, ctx) {
            log::error!("TaskGraph compile failed: {e}");
            graph.free(ctx);
            return Err(e);
        }

        graph.barriers = BarrierPlanner::plan(&graph.tasks, &graph.merge, &graph.buckets);
        graph.build_lookup_tables();

        graph.stats.compile_time = start.elapsed();
        graph.stats.task_count = graph.tasks.len();
        graph.stats.barriers = graph.barriers.iter().map(TgTaskBarriers::barrier_count).sum();

        log::info!(
            "TaskGraph compiled: {} tasks, {} physical resources, {} memory buckets",
            graph.tasks.len(),
            graph.stats.physical_resources,
            graph.buckets.len()
        );
        if info.show_stats {
            graph.print_stats();
        }

        Ok(graph)
    }

    /// 创建 image / buffer，装箱，分配显存并绑定，最后创建 view
    fn create_physical_resources(
        &mut self,
        info: &TgCompileInfo,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<(), TaskGraphError> {
        let _span = tg_span!("CompiledTaskGraph::create_physical_resources");

        let mut requests = Vec::new();
        for (slot_index, slot) in self.merge.slots.iter().enumerate() {
            let resource = match slot.desc {
                TgSlotDesc::Texture(desc) if slot.external => TgPhysicalResource::Texture {
                    image: vk::Image::null(),
                    view: vk::ImageView::null(),
                    desc,
                    external: true,
                },
                TgSlotDesc::Buffer(desc) if slot.external => TgPhysicalResource::Buffer {
                    buffer: vk::Buffer::null(),
                    desc,
                    external: true,
                },
                TgSlotDesc::Texture(desc) => {
                    let image = ctx.create_image(&slot.name, &desc).map_err(TaskGraphError::vulkan("creating images"))?;
                    requests.push(TgMemoryRequest::new(
                        slot_index,
                        TgMemoryKind::Image,
                        ctx.image_memory_requirements(image),
                        slot.lifetime,
                    ));
                    TgPhysicalResource::Texture {
                        image,
                        view: vk::ImageView::null(),
                        desc,
                        external: false,
                    }
                }
                TgSlotDesc::Buffer(desc) => {
                    let buffer =
                        ctx.create_buffer(&slot.name, &desc).map_err(TaskGraphError::vulkan("creating buffers"))?;
                    requests.push(TgMemoryRequest::new(
                        slot_index,
                        TgMemoryKind::Buffer,
                        ctx.buffer_memory_requirements(buffer),
                        slot.lifetime,
                    ));
                    TgPhysicalResource::Buffer {
                        buffer,
                        desc,
                        external: false,
                    }
                }
            };
            self.physical.push(resource);
        }

        self.buckets = pack_resources(&requests, info.alias_memory)?;

        for bucket in &self.buckets {
            let requirements = vk::MemoryRequirements {
                size: bucket.size,
                alignment: bucket.alignment,
                memory_type_bits: bucket.memory_type_bits,
            };
            let allocation =
                ctx.allocate_memory(&requirements).map_err(TaskGraphError::vulkan("allocating memory"))?;
            self.allocations.push(allocation);

            for placement in &bucket.placements {
                match self.physical[placement.slot] {
                    TgPhysicalResource::Texture { image, .. } => ctx
                        .bind_image_memory(image, allocation, placement.offset)
                        .map_err(TaskGraphError::vulkan("binding image memory"))?,
                    TgPhysicalResource::Buffer { buffer, .. } => ctx
                        .bind_buffer_memory(buffer, allocation, placement.offset)
                        .map_err(TaskGraphError::vulkan("binding buffer memory"))?,
                }
            }
        }

        for (slot, resource) in self.merge.slots.iter().zip(self.physical.iter_mut()) {
            if let TgPhysicalResource::Texture {
                image,
                view,
                desc,
                external: false,
            } = resource
            {
                *view = ctx
                    .create_image_view(&slot.name, *image, desc)
                    .map_err(TaskGraphError::vulkan("creating image views"))?;
            }
        }

        self.collect_memory_stats(&requests);
        Ok(())
    }

    fn collect_memory_stats(&mut self, requests: &[TgMemoryRequest]) {
        let stats = &mut self.stats;
        stats.logical_resources = self.merge.texture_slots.len() + self.merge.buffer_slots.len();
        stats.merged_resources = self.merge.merged_count;
        stats.physical_resources = requests.len();
        stats.external_resources = self.merge.slots.iter().filter(|s| s.external).count();
        stats.textures = self.physical.iter().filter(|p| matches!(p, TgPhysicalResource::Texture { .. })).count();
        stats.buffers = self.physical.len() - stats.textures;
        stats.memory_buckets = self.buckets.len();
        stats.memory_used = self.buckets.iter().map(|b| b.size).sum();

        for request in requests {
            let members = self.merge.slots[request.slot].members.len() as u64;
            stats.memory_unaliased += request.size * members;
            stats.merged_bytes_saved += request.size * (members - 1);
        }
    }

    fn build_lookup_tables(&mut self) {
        for (texture, &slot) in &self.merge.texture_slots {
            let physical = &self.physical[slot];
            self.texture_lookup.insert(texture, (physical.image(), physical.view()));
        }
        for (buffer, &slot) in &self.merge.buffer_slots {
            self.buffer_lookup.insert(buffer, self.physical[slot].buffer());
        }
    }
}

// getter
impl CompiledTaskGraph {
    #[inline]
    pub fn stats(&self) -> &TgStats {
        &self.stats
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn tasks(&self) -> &[TgTaskNode] {
        &self.tasks
    }

    #[inline]
    pub fn resources(&self) -> &TgResourceTable {
        &self.resources
    }

    #[inline]
    pub fn merge_result(&self) -> &TgMergeResult {
        &self.merge
    }

    #[inline]
    pub fn physical_resources(&self) -> &[TgPhysicalResource] {
        &self.physical
    }

    #[inline]
    pub fn buckets(&self) -> &[MemoryBucket] {
        &self.buckets
    }

    #[inline]
    pub fn barriers(&self) -> &[TgTaskBarriers] {
        &self.barriers
    }

    #[inline]
    pub fn is_freed(&self) -> bool {
        self.freed
    }

    pub fn texture_physical(&self, texture: TgTextureRef) -> Option<&TgPhysicalResource> {
        self.merge.texture_slot(texture).map(|slot| &self.physical[slot])
    }

    pub fn buffer_physical(&self, buffer: TgBufferRef) -> Option<&TgPhysicalResource> {
        self.merge.buffer_slot(buffer).map(|slot| &self.physical[slot])
    }
}

// 执行
impl CompiledTaskGraph {
    /// 把整帧命令录制到 `data.cmd`
    ///
    /// 先调用所有外部资源的回调，然后按声明顺序执行每个任务：
    /// barriers → (graphics) begin rendering → 回调 → end rendering。
    pub fn execute(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        data: &mut TgExecuteData<'_>,
    ) -> Result<(), TaskGraphError> {
        if self.freed {
            return Err(TaskGraphError::Freed);
        }
        let _span = tg_span!("CompiledTaskGraph::execute");

        self.resolve_externals();

        let cmd = data.cmd;
        let physical = &self.physical;
        for (task, plan) in self.tasks.iter_mut().zip(&self.barriers) {
            let _span = tg_span!("TaskGraph::task");
            ctx.cmd_begin_label(cmd, &task.name);

            Self::record_clears(ctx, cmd, physical, plan);
            Self::record_barriers(ctx, cmd, physical, plan);

            match &mut task.kind {
                TgTaskKind::Compute { function } => {
                    if let Some(function) = function {
                        let mut task_ctx = TgTaskContext {
                            cmd,
                            textures: &self.texture_lookup,
                            buffers: &self.buffer_lookup,
                            render_area: None,
                            user_data: data.user_data.as_deref_mut(),
                        };
                        function(&mut task_ctx);
                    }
                }
                TgTaskKind::Graphics { function } => {
                    let rendering = Self::begin_rendering(ctx, cmd, physical, plan);
                    if let Some(function) = function {
                        let mut task_ctx = TgTaskContext {
                            cmd,
                            textures: &self.texture_lookup,
                            buffers: &self.buffer_lookup,
                            render_area: plan.render_area,
                            user_data: data.user_data.as_deref_mut(),
                        };
                        function(&mut task_ctx);
                    }
                    if rendering {
                        ctx.cmd_end_rendering(cmd);
                    }
                }
                TgTaskKind::Transfer { .. } => Self::record_blits(ctx, cmd, physical, plan),
                // 呈现所需的 layout 转换已在 barrier 中完成
                TgTaskKind::Present { .. } => {}
            }

            ctx.cmd_end_label(cmd);
        }

        Ok(())
    }

    /// 调用外部资源回调，刷新物理句柄与查询表
    fn resolve_externals(&mut self) {
        for (texture, logical) in self.resources.iter_textures_mut() {
            let Some(resolve) = logical.external.as_mut() else {
                continue;
            };
            let Some(slot) = self.merge.texture_slot(texture) else {
                continue;
            };
            let external = resolve();
            if let TgPhysicalResource::Texture { image, view, .. } = &mut self.physical[slot] {
                *image = external.image;
                *view = external.view;
            }
            self.texture_lookup.insert(texture, (external.image, external.view));
        }

        for (buffer, logical) in self.resources.iter_buffers_mut() {
            let Some(resolve) = logical.external.as_mut() else {
                continue;
            };
            let Some(slot) = self.merge.buffer_slot(buffer) else {
                continue;
            };
            let external = resolve();
            if let TgPhysicalResource::Buffer { buffer, .. } = &mut self.physical[slot] {
                *buffer = external;
            }
            self.buffer_lookup.insert(buffer, external);
        }
    }

    fn record_clears(
        ctx: &mut dyn GraphicsContext,
        cmd: vk::CommandBuffer,
        physical: &[TgPhysicalResource],
        plan: &TgTaskBarriers,
    ) {
        if !plan.has_clears() {
            return;
        }

        let image_barriers = plan.pre_clear_image_barriers.iter().map(|b| b.to_vk(physical[b.slot].image())).collect_vec();
        let buffer_barriers =
            plan.pre_clear_buffer_barriers.iter().map(|b| b.to_vk(physical[b.slot].buffer())).collect_vec();
        if !image_barriers.is_empty() || !buffer_barriers.is_empty() {
            ctx.cmd_pipeline_barrier(cmd, &image_barriers, &buffer_barriers);
        }

        for clear in &plan.texture_clears {
            let color = match clear.value {
                TgClearValue::Color(color) => color,
                TgClearValue::Depth(depth) => [depth, 0.0, 0.0, 0.0],
            };
            ctx.cmd_clear_color_image(cmd, physical[clear.slot].image(), color, clear.aspect);
        }
        for clear in &plan.buffer_clears {
            ctx.cmd_fill_buffer(cmd, physical[clear.slot].buffer(), clear.value);
        }
    }

    fn record_barriers(
        ctx: &mut dyn GraphicsContext,
        cmd: vk::CommandBuffer,
        physical: &[TgPhysicalResource],
        plan: &TgTaskBarriers,
    ) {
        if !plan.has_barriers() {
            return;
        }

        let image_barriers = plan.image_barriers.iter().map(|b| b.to_vk(physical[b.slot].image())).collect_vec();
        let buffer_barriers = plan.buffer_barriers.iter().map(|b| b.to_vk(physical[b.slot].buffer())).collect_vec();
        ctx.cmd_pipeline_barrier(cmd, &image_barriers, &buffer_barriers);
    }

    /// 没有附件时不开启 rendering，返回是否开启
    fn begin_rendering(
        ctx: &mut dyn GraphicsContext,
        cmd: vk::CommandBuffer,
        physical: &[TgPhysicalResource],
        plan: &TgTaskBarriers,
    ) -> bool {
        let Some(extent) = plan.render_area else {
            return false;
        };

        let to_attachment = |attachment: &TgAttachmentPlan| TgRenderingAttachment {
            view: physical[attachment.slot].view(),
            layout: attachment.layout,
            load_op: attachment.load_op,
            store_op: attachment.store_op,
            clear_value: attachment.clear.map(|c| c.to_vk()).unwrap_or_default(),
        };
        let color_attachments = plan.attachments.iter().filter(|a| !a.is_depth()).map(to_attachment).collect_vec();
        let depth_attachment = plan.attachments.iter().find(|a| a.is_depth()).map(to_attachment);

        ctx.cmd_begin_rendering(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            &color_attachments,
            depth_attachment.as_ref(),
        );
        true
    }

    fn record_blits(
        ctx: &mut dyn GraphicsContext,
        cmd: vk::CommandBuffer,
        physical: &[TgPhysicalResource],
        plan: &TgTaskBarriers,
    ) {
        let far_corner = |extent: vk::Extent3D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: extent.depth as i32,
        };
        let first_layer = |aspect: vk::ImageAspectFlags| vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };

        for blit in &plan.blits {
            let region = vk::ImageBlit2::default()
                .src_subresource(first_layer(blit.src_aspect))
                .src_offsets([vk::Offset3D::default(), far_corner(blit.src_extent)])
                .dst_subresource(first_layer(blit.dst_aspect))
                .dst_offsets([vk::Offset3D::default(), far_corner(blit.dst_extent)]);
            ctx.cmd_blit_image(cmd, physical[blit.src_slot].image(), physical[blit.dst_slot].image(), &region);
        }
    }
}

// destroy
impl CompiledTaskGraph {
    /// 释放所有物理资源和显存块；重复调用无副作用
    pub fn free(&mut self, ctx: &mut dyn GraphicsContext) {
        if self.freed {
            return;
        }
        let _span = tg_span!("CompiledTaskGraph::free");

        for resource in self.physical.iter_mut().filter(|r| !r.is_external()) {
            match resource {
                TgPhysicalResource::Texture { image, view, .. } => {
                    if *view != vk::ImageView::null() {
                        ctx.destroy_image_view(*view);
                    }
                    if *image != vk::Image::null() {
                        ctx.destroy_image(*image);
                    }
                    *view = vk::ImageView::null();
                    *image = vk::Image::null();
                }
                TgPhysicalResource::Buffer { buffer, .. } => {
                    if *buffer != vk::Buffer::null() {
                        ctx.destroy_buffer(*buffer);
                    }
                    *buffer = vk::Buffer::null();
                }
            }
        }
        for allocation in self.allocations.drain(..) {
            ctx.free_memory(allocation);
        }

        self.texture_lookup.clear();
        self.buffer_lookup.clear();
        self.freed = true;
        log::debug!("TaskGraph freed {} physical resources", self.physical.len());
    }
}

impl Drop for CompiledTaskGraph {
    fn drop(&mut self) {
        if !self.freed {
            log::warn!("CompiledTaskGraph dropped without free, GPU objects are leaked");
        }
    }
}

// 调试方法
impl CompiledTaskGraph {
    pub fn print_stats(&self) {
        self.stats.log();
    }

    /// 打印执行计划（用于调试）
    ///
    /// 输出每个任务的资源访问、物理槽位以及 barrier / clear / 附件信息。
    pub fn print_execution_plan(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              TaskGraph Execution Plan                            ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Tasks: {}  |  Physical Resources: {}  |  Memory Buckets: {}",
            self.tasks.len(),
            self.physical.len(),
            self.buckets.len()
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (index, (task, plan)) in self.tasks.iter().zip(&self.barriers).enumerate() {
            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] {} Task: \"{}\"", index + 1, self.tasks.len(), task.kind.type_name(), task.name);
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            if !task.textures.is_empty() {
                log::info!("│ Textures:");
                for access in &task.textures {
                    let icon = if access.access.is_write() { "✏️ " } else { "📖" };
                    log::info!(
                        "│   {} \"{}\" {:?} as {:?} -> slot \"{}\"",
                        icon,
                        self.resources.texture_name(access.texture),
                        access.access,
                        access.usage,
                        self.slot_name(self.merge.texture_slot(access.texture))
                    );
                }
            }

            if !task.buffers.is_empty() {
                log::info!("│ Buffers:");
                for access in &task.buffers {
                    let icon = if access.access.is_write() { "✏️ " } else { "📖" };
                    log::info!(
                        "│   {} \"{}\" {:?} ({:?}) -> slot \"{}\"",
                        icon,
                        self.resources.buffer_name(access.buffer),
                        access.access,
                        access.usage,
                        self.slot_name(self.merge.buffer_slot(access.buffer))
                    );
                }
            }

            if plan.has_clears() {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                for clear in &plan.texture_clears {
                    log::info!("│   🧹 Clear image \"{}\" to {:?}", self.slot_name(Some(clear.slot)), clear.value);
                }
                for clear in &plan.buffer_clears {
                    log::info!("│   🧹 Fill buffer \"{}\" with {:#x}", self.slot_name(Some(clear.slot)), clear.value);
                }
            }

            if plan.has_barriers() || !plan.pre_clear_image_barriers.is_empty() {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!(
                    "│ Barriers: {} image, {} buffer",
                    plan.pre_clear_image_barriers.len() + plan.image_barriers.len(),
                    plan.pre_clear_buffer_barriers.len() + plan.buffer_barriers.len()
                );

                for barrier in plan.pre_clear_image_barriers.iter().chain(&plan.image_barriers) {
                    let layout_change = if barrier.is_layout_transition() {
                        format!("{:?} → {:?}", barrier.src.layout, barrier.dst.layout)
                    } else {
                        format!("{:?} (no layout change)", barrier.src.layout)
                    };
                    log::info!("│   🔒 Image \"{}\":", self.slot_name(Some(barrier.slot)));
                    log::info!("│       Layout: {}", layout_change);
                    log::info!(
                        "│       Stage:  {} → {}",
                        Self::format_pipeline_stage(barrier.src.stage),
                        Self::format_pipeline_stage(barrier.dst.stage)
                    );
                    log::info!(
                        "│       Access: {} → {}",
                        Self::format_access_flags(barrier.src.access),
                        Self::format_access_flags(barrier.dst.access)
                    );
                    log::info!("│       Aspect: {:?}", barrier.aspect);
                }

                for barrier in plan.pre_clear_buffer_barriers.iter().chain(&plan.buffer_barriers) {
                    log::info!("│   🔒 Buffer \"{}\":", self.slot_name(Some(barrier.slot)));
                    log::info!(
                        "│       Stage:  {} → {}",
                        Self::format_pipeline_stage(barrier.src.stage),
                        Self::format_pipeline_stage(barrier.dst.stage)
                    );
                    log::info!(
                        "│       Access: {} → {}",
                        Self::format_access_flags(barrier.src.access),
                        Self::format_access_flags(barrier.dst.access)
                    );
                }
            } else {
                log::info!("│ No barriers required");
            }

            if !plan.attachments.is_empty() {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                if let Some(area) = plan.render_area {
                    log::info!("│ Render Area: {}x{}", area.width, area.height);
                }
                for attachment in &plan.attachments {
                    log::info!(
                        "│   🎯 {:?} \"{}\" load: {:?}, store: {:?}",
                        attachment.usage,
                        self.slot_name(Some(attachment.slot)),
                        attachment.load_op,
                        attachment.store_op
                    );
                }
            }

            for blit in &plan.blits {
                log::info!(
                    "│   ↪ Blit \"{}\" → \"{}\"",
                    self.slot_name(Some(blit.src_slot)),
                    self.slot_name(Some(blit.dst_slot))
                );
            }

            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        log::info!("");
        for (index, bucket) in self.buckets.iter().enumerate() {
            log::info!(
                "Memory bucket #{}: {} bytes, align {}, {} resources [{}]",
                index,
                bucket.size,
                bucket.alignment,
                bucket.placements.len(),
                bucket
                    .placements
                    .iter()
                    .map(|p| format!("{}@{} {}", self.slot_name(Some(p.slot)), p.offset, p.lifetime))
                    .join(", ")
            );
        }
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }

    fn slot_name(&self, slot: Option<usize>) -> &str {
        slot.and_then(|slot| self.merge.slots.get(slot)).map_or("<unused>", |s| s.name.as_str())
    }

    /// 格式化 PipelineStageFlags2 为可读字符串
    fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
        const NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
            (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
            (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
            (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
            (vk::PipelineStageFlags2::INDEX_INPUT, "INDEX_INPUT"),
            (vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT, "VERTEX_ATTRIBUTE_INPUT"),
            (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
            (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
            (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
            (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
        ];

        if stage.is_empty() {
            return "NONE".to_string();
        }
        let stages = NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect_vec();
        if stages.is_empty() { format!("{:?}", stage) } else { stages.join(" | ") }
    }

    /// 格式化 AccessFlags2 为可读字符串
    fn format_access_flags(access: vk::AccessFlags2) -> String {
        const NAMES: &[(vk::AccessFlags2, &str)] = &[
            (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
            (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
            (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
            (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
            (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
            (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
            (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
        ];

        if access == vk::AccessFlags2::NONE {
            return "NONE".to_string();
        }
        let flags = NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect_vec();
        if flags.is_empty() { format!("{:?}", access) } else { flags.join(" | ") }
    }
}
