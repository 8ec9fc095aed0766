//! Barrier 规划
//!
//! 按任务声明顺序模拟每个物理槽位的访问状态，生成每个任务执行前需要的
//! image / buffer barrier、clear 操作以及附件的 load/store 设置。
//!
//! 规划在编译期完成一次，执行时只负责把结果翻译成命令。

use ash::vk;

use crate::context::full_subresource_range;
use crate::merger::{TgMergeResult, TgSlotDesc};
use crate::packing::MemoryBucket;
use crate::resource_state::{TgBufferState, TgImageState, infer_image_aspect};
use crate::task::{TgClearValue, TgTaskKind, TgTaskNode, TgTextureUsage};

/// 图像 Barrier 描述
///
/// `src` 是源同步范围（stage 与写访问）以及旧 layout，`dst` 是任务需要的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgImageBarrier {
    /// 物理槽位索引
    pub slot: usize,
    pub src: TgImageState,
    pub dst: TgImageState,
    pub aspect: vk::ImageAspectFlags,
}

impl TgImageBarrier {
    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.src.layout != self.dst.layout
    }

    /// 覆盖整个 image 的所有 mip 与 layer
    pub fn to_vk(&self, image: vk::Image) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .image(image)
            .old_layout(self.src.layout)
            .new_layout(self.dst.layout)
            .src_stage_mask(self.src.stage)
            .src_access_mask(self.src.access)
            .dst_stage_mask(self.dst.stage)
            .dst_access_mask(self.dst.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(full_subresource_range(self.aspect))
    }
}

/// 缓冲区 Barrier 描述（整个 buffer）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgBufferBarrier {
    pub slot: usize,
    pub src: TgBufferState,
    pub dst: TgBufferState,
}

impl TgBufferBarrier {
    pub fn to_vk(&self, buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .src_stage_mask(self.src.stage)
            .src_access_mask(self.src.access)
            .dst_stage_mask(self.dst.stage)
            .dst_access_mask(self.dst.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
    }
}

/// 任务执行前的图像清除（图像处于 TRANSFER_DST_OPTIMAL）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TgTextureClear {
    pub slot: usize,
    pub value: TgClearValue,
    pub aspect: vk::ImageAspectFlags,
}

/// 任务执行前的缓冲区填充
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgBufferClear {
    pub slot: usize,
    pub value: u32,
}

/// dynamic rendering 的单个附件
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TgAttachmentPlan {
    pub slot: usize,
    pub usage: TgTextureUsage,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: Option<TgClearValue>,
}

impl TgAttachmentPlan {
    #[inline]
    pub fn is_depth(&self) -> bool {
        self.usage == TgTextureUsage::DepthAttachment
    }
}

/// 全范围 blit，使用 LINEAR 过滤
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgBlitPlan {
    pub src_slot: usize,
    pub dst_slot: usize,
    pub src_extent: vk::Extent3D,
    pub dst_extent: vk::Extent3D,
    pub src_aspect: vk::ImageAspectFlags,
    pub dst_aspect: vk::ImageAspectFlags,
}

/// 单个任务执行前需要的全部同步与准备工作
///
/// 执行顺序：pre-clear barriers → clears → barriers → 开始渲染 → 回调
#[derive(Clone, Debug, Default)]
pub struct TgTaskBarriers {
    pub pre_clear_image_barriers: Vec<TgImageBarrier>,
    pub pre_clear_buffer_barriers: Vec<TgBufferBarrier>,
    pub texture_clears: Vec<TgTextureClear>,
    pub buffer_clears: Vec<TgBufferClear>,

    pub image_barriers: Vec<TgImageBarrier>,
    pub buffer_barriers: Vec<TgBufferBarrier>,

    /// 仅 graphics 任务非空
    pub attachments: Vec<TgAttachmentPlan>,
    /// 所有附件尺寸的最小值
    pub render_area: Option<vk::Extent2D>,

    pub blits: Vec<TgBlitPlan>,
}

impl TgTaskBarriers {
    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.image_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    #[inline]
    pub fn has_clears(&self) -> bool {
        !self.texture_clears.is_empty() || !self.buffer_clears.is_empty()
    }

    #[inline]
    pub fn barrier_count(&self) -> usize {
        self.pre_clear_image_barriers.len()
            + self.pre_clear_buffer_barriers.len()
            + self.image_barriers.len()
            + self.buffer_barriers.len()
    }
}

/// 单个图像槽位的跟踪状态
#[derive(Clone, Copy, Debug)]
struct ImageTracker {
    layout: vk::ImageLayout,
    /// 最近一次写入的 (stage, access)
    last_write: Option<(vk::PipelineStageFlags2, vk::AccessFlags2)>,
    /// 最近一次写入之后读过的 stage
    read_stages: vk::PipelineStageFlags2,
}

impl Default for ImageTracker {
    fn default() -> Self {
        Self {
            layout: vk::ImageLayout::UNDEFINED,
            last_write: None,
            read_stages: vk::PipelineStageFlags2::NONE,
        }
    }
}

impl ImageTracker {
    /// 源同步范围：上次写入与之后的读取
    fn src_state(&self) -> TgImageState {
        let (write_stage, write_access) =
            self.last_write.unwrap_or((vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE));
        let stage = write_stage | self.read_stages;
        let stage = if stage.is_empty() { vk::PipelineStageFlags2::TOP_OF_PIPE } else { stage };
        TgImageState::new(stage, write_access, self.layout)
    }

    /// 该槽位最后一次访问留下的同步范围，用于显存别名的下一个占用者
    fn hazard(&self) -> Option<(vk::PipelineStageFlags2, vk::AccessFlags2)> {
        if !self.read_stages.is_empty() {
            Some((self.read_stages, vk::AccessFlags2::NONE))
        } else {
            self.last_write
        }
    }

    /// 写入：layout 变化、WAW 或 WAR 时需要 barrier
    fn write(&mut self, dst: TgImageState) -> Option<TgImageState> {
        let needed = self.layout != dst.layout || self.last_write.is_some() || !self.read_stages.is_empty();
        let src = if self.read_stages.is_empty() {
            self.src_state()
        } else {
            // WAR 只需要执行依赖
            TgImageState::new(self.read_stages, vk::AccessFlags2::NONE, self.layout)
        };

        self.layout = dst.layout;
        self.last_write = Some((dst.stage, dst.src_access()));
        self.read_stages = vk::PipelineStageFlags2::NONE;

        needed.then_some(src)
    }

    /// 读取：layout 变化时转换一次；同 layout 下每个新 stage 只做一次可见性同步
    fn read(&mut self, dst: TgImageState) -> Option<TgImageState> {
        if self.layout != dst.layout {
            let src = self.src_state();
            self.layout = dst.layout;
            self.read_stages = dst.stage;
            return Some(src);
        }

        let pending = self.last_write.is_some() && !self.read_stages.contains(dst.stage);
        let src = self.src_state();
        self.read_stages |= dst.stage;
        pending.then_some(src)
    }
}

#[derive(Clone, Copy, Debug)]
struct BufferTracker {
    last_write: Option<TgBufferState>,
    read_stages: vk::PipelineStageFlags2,
}

impl Default for BufferTracker {
    fn default() -> Self {
        Self {
            last_write: None,
            read_stages: vk::PipelineStageFlags2::NONE,
        }
    }
}

impl BufferTracker {
    fn hazard(&self) -> Option<(vk::PipelineStageFlags2, vk::AccessFlags2)> {
        if !self.read_stages.is_empty() {
            Some((self.read_stages, vk::AccessFlags2::NONE))
        } else {
            self.last_write.map(|write| (write.stage, write.access))
        }
    }

    fn write(&mut self, dst: TgBufferState) -> Option<TgBufferState> {
        let src = if !self.read_stages.is_empty() {
            Some(TgBufferState::new(self.read_stages, vk::AccessFlags2::NONE))
        } else {
            self.last_write
        };

        self.last_write = Some(TgBufferState::new(dst.stage, dst.src_access()));
        self.read_stages = vk::PipelineStageFlags2::NONE;
        src
    }

    fn read(&mut self, dst: TgBufferState) -> Option<TgBufferState> {
        let pending = !self.read_stages.contains(dst.stage);
        let src = self
            .last_write
            .filter(|_| pending)
            .map(|write| TgBufferState::new(write.stage | self.read_stages, write.access));
        self.read_stages |= dst.stage;
        src
    }
}

/// 每个槽位在显存上的前任：同一 bucket 中字节区间重叠、生命周期在它之前结束的槽位
fn alias_predecessors(buckets: &[MemoryBucket], slot_count: usize) -> Vec<Vec<usize>> {
    let mut predecessors = vec![Vec::new(); slot_count];
    for bucket in buckets {
        for next in &bucket.placements {
            predecessors[next.slot] = bucket
                .placements
                .iter()
                .filter(|prev| {
                    prev.lifetime.last_task < next.lifetime.first_task
                        && prev.offset < next.offset + next.size
                        && next.offset < prev.offset + prev.size
                })
                .map(|prev| prev.slot)
                .collect();
        }
    }
    predecessors
}

pub struct BarrierPlanner;

impl BarrierPlanner {
    /// 为每个任务计算 barrier，返回值与 `tasks` 一一对应
    ///
    /// 所有图像（包括外部图像）在每帧开始时都视为 UNDEFINED。
    /// 槽位第一次被访问时，需要等待 `buckets` 中与它共享字节的前任槽位的最后一次访问。
    pub fn plan(tasks: &[TgTaskNode], merge: &TgMergeResult, buckets: &[MemoryBucket]) -> Vec<TgTaskBarriers> {
        let _span = tg_span!("BarrierPlanner::plan");

        let mut image_trackers = vec![ImageTracker::default(); merge.slots.len()];
        let mut buffer_trackers = vec![BufferTracker::default(); merge.slots.len()];

        let predecessors = alias_predecessors(buckets, merge.slots.len());
        let mut touched = vec![false; merge.slots.len()];
        // 前任们留下的同步范围，作为新占用者的 "上一次写入"
        let mut inherit_alias = |slot: usize,
                                 image_trackers: &mut [ImageTracker],
                                 buffer_trackers: &mut [BufferTracker]| {
            if std::mem::replace(&mut touched[slot], true) {
                return;
            }
            let hazard = predecessors[slot]
                .iter()
                .filter_map(|&prev| match merge.slots[prev].desc {
                    TgSlotDesc::Texture(_) => image_trackers[prev].hazard(),
                    TgSlotDesc::Buffer(_) => buffer_trackers[prev].hazard(),
                })
                .reduce(|(stage_a, access_a), (stage_b, access_b)| (stage_a | stage_b, access_a | access_b));
            let Some((stage, access)) = hazard else {
                return;
            };
            match merge.slots[slot].desc {
                TgSlotDesc::Texture(_) => image_trackers[slot].last_write = Some((stage, access)),
                TgSlotDesc::Buffer(_) => buffer_trackers[slot].last_write = Some(TgBufferState::new(stage, access)),
            }
        };

        let texture_desc = |slot: usize| match merge.slots[slot].desc {
            TgSlotDesc::Texture(desc) => Some(desc),
            TgSlotDesc::Buffer(_) => None,
        };

        tasks
            .iter()
            .map(|task| {
                let queue = task.kind.queue_stage();
                let mut plan = TgTaskBarriers::default();

                // ---------- 纹理 ----------
                for access in &task.textures {
                    let Some(slot) = merge.texture_slot(access.texture) else {
                        continue;
                    };
                    let Some(desc) = texture_desc(slot) else {
                        continue;
                    };
                    let aspect = infer_image_aspect(desc.format);
                    let dst = TgImageState::for_access(queue, access.usage, access.access, desc.format);
                    inherit_alias(slot, &mut image_trackers, &mut buffer_trackers);
                    let tracker = &mut image_trackers[slot];

                    // 非附件的清除：先转到 TRANSFER_DST 再 clear
                    if let (Some(clear), false) = (access.clear, access.usage.is_attachment()) {
                        if let Some(src) = tracker.write(TgImageState::TRANSFER_DST) {
                            plan.pre_clear_image_barriers.push(TgImageBarrier {
                                slot,
                                src,
                                dst: TgImageState::TRANSFER_DST,
                                aspect,
                            });
                        }
                        plan.texture_clears.push(TgTextureClear {
                            slot,
                            value: clear,
                            aspect,
                        });
                    }

                    let prior_layout = tracker.layout;
                    let src = if access.access.is_write() { tracker.write(dst) } else { tracker.read(dst) };
                    if let Some(src) = src {
                        plan.image_barriers.push(TgImageBarrier { slot, src, dst, aspect });
                    }

                    if access.usage.is_attachment() {
                        let load_op = if access.clear.is_some() {
                            vk::AttachmentLoadOp::CLEAR
                        } else if access.creates || prior_layout == vk::ImageLayout::UNDEFINED {
                            vk::AttachmentLoadOp::DONT_CARE
                        } else {
                            vk::AttachmentLoadOp::LOAD
                        };
                        plan.attachments.push(TgAttachmentPlan {
                            slot,
                            usage: access.usage,
                            layout: dst.layout,
                            load_op,
                            store_op: vk::AttachmentStoreOp::STORE,
                            clear: access.clear,
                        });

                        let extent = desc.extent_2d();
                        plan.render_area = Some(match plan.render_area {
                            Some(area) => vk::Extent2D {
                                width: area.width.min(extent.width),
                                height: area.height.min(extent.height),
                            },
                            None => extent,
                        });
                    }
                }

                // ---------- 缓冲区 ----------
                for access in &task.buffers {
                    let Some(slot) = merge.buffer_slot(access.buffer) else {
                        continue;
                    };
                    inherit_alias(slot, &mut image_trackers, &mut buffer_trackers);
                    let tracker = &mut buffer_trackers[slot];

                    if let Some(value) = access.clear {
                        if let Some(src) = tracker.write(TgBufferState::TRANSFER_DST) {
                            plan.pre_clear_buffer_barriers.push(TgBufferBarrier {
                                slot,
                                src,
                                dst: TgBufferState::TRANSFER_DST,
                            });
                        }
                        plan.buffer_clears.push(TgBufferClear { slot, value });
                    }

                    let (dst, src) = if access.access.is_write() {
                        let dst = TgBufferState::for_write(queue, access.access);
                        (dst, tracker.write(dst))
                    } else {
                        let dst = TgBufferState::for_read(queue, access.usage);
                        (dst, tracker.read(dst))
                    };
                    if let Some(src) = src {
                        plan.buffer_barriers.push(TgBufferBarrier { slot, src, dst });
                    }
                }

                // ---------- blit ----------
                if let TgTaskKind::Transfer { blits } = &task.kind {
                    plan.blits = blits
                        .iter()
                        .filter_map(|blit| {
                            let src_slot = merge.texture_slot(blit.src)?;
                            let dst_slot = merge.texture_slot(blit.dst)?;
                            let src_desc = texture_desc(src_slot)?;
                            let dst_desc = texture_desc(dst_slot)?;
                            Some(TgBlitPlan {
                                src_slot,
                                dst_slot,
                                src_extent: src_desc.extent(),
                                dst_extent: dst_desc.extent(),
                                src_aspect: infer_image_aspect(src_desc.format),
                                dst_aspect: infer_image_aspect(dst_desc.format),
                            })
                        })
                        .collect();
                }

                plan
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TaskGraphBuilder;
    use crate::handle::TgTextureRef;
    use crate::lifetime::LifetimeAnalyzer;
    use crate::merger::Merger;
    use crate::packing::{TgMemoryKind, TgMemoryRequest, pack_resources};
    use crate::resource_desc::{TgBufferDesc, TgTextureDesc};
    use crate::resource_table::TgExternalTexture;

    fn rgba8(size: u32) -> TgTextureDesc {
        TgTextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, size, size)
    }

    fn plan(builder: &TaskGraphBuilder) -> (TgMergeResult, Vec<TgTaskBarriers>) {
        let lifetimes = LifetimeAnalyzer::analyze(builder.tasks());
        let merge = Merger::merge(builder.resources(), &lifetimes, true);
        let plans = BarrierPlanner::plan(builder.tasks(), &merge, &[]);
        (merge, plans)
    }

    /// 每个槽位申请同样大小的显存，生命周期不重叠的槽位会落在同一块显存的 0 偏移
    fn plan_aliased(builder: &TaskGraphBuilder) -> (TgMergeResult, Vec<MemoryBucket>, Vec<TgTaskBarriers>) {
        let lifetimes = LifetimeAnalyzer::analyze(builder.tasks());
        let merge = Merger::merge(builder.resources(), &lifetimes, true);
        let requests = merge
            .slots
            .iter()
            .enumerate()
            .map(|(slot, merged)| TgMemoryRequest {
                slot,
                kind: match merged.desc {
                    TgSlotDesc::Texture(_) => TgMemoryKind::Image,
                    TgSlotDesc::Buffer(_) => TgMemoryKind::Buffer,
                },
                size: 64 * 1024,
                alignment: 1024,
                memory_type_bits: 0b1,
                lifetime: merged.lifetime,
            })
            .collect::<Vec<_>>();
        let buckets = pack_resources(&requests, true).unwrap();
        let plans = BarrierPlanner::plan(builder.tasks(), &merge, &buckets);
        (merge, buckets, plans)
    }

    fn barriers_for(plans: &[TgTaskBarriers], slot: usize) -> Vec<(usize, TgImageBarrier)> {
        plans
            .iter()
            .enumerate()
            .flat_map(|(i, p)| p.image_barriers.iter().filter(|b| b.slot == slot).map(move |b| (i, *b)))
            .collect()
    }

    #[test]
    fn test_write_then_read_transitions_once() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("write_a");
        let a = t0.add_texture_output("a", rgba8(512));
        t0.set_function(|_| {});

        for name in ["reader0", "reader1"] {
            let mut t = builder.add_compute_task(name);
            t.add_texture_input(a);
            t.set_function(|_| {});
        }

        let (merge, plans) = plan(&builder);
        let slot = merge.texture_slot(a).unwrap();
        let barriers = barriers_for(&plans, slot);

        // UNDEFINED → GENERAL，然后 GENERAL → SHADER_READ_ONLY，第二个读者不需要 barrier
        assert_eq!(barriers.len(), 2);
        let (task, initial) = barriers[0];
        assert_eq!(task, 0);
        assert_eq!(initial.src.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(initial.dst, TgImageState::STORAGE_WRITE_COMPUTE);

        let (task, to_read) = barriers[1];
        assert_eq!(task, 1);
        assert!(to_read.is_layout_transition());
        assert_eq!(to_read.src.layout, vk::ImageLayout::GENERAL);
        assert_eq!(to_read.src.access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(to_read.dst, TgImageState::SHADER_READ_COMPUTE);
        assert!(plans[2].image_barriers.is_empty());
    }

    #[test]
    fn test_new_reader_stage_gets_memory_barrier() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("write_a");
        let a = t0.add_texture_output("a", rgba8(64));
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("compute_read");
        t1.add_texture_input(a);
        t1.set_function(|_| {});

        let mut t2 = builder.add_graphics_task("graphics_read");
        t2.add_texture_input(a);
        t2.add_color_attachment("out", rgba8(64));
        t2.set_function(|_| {});

        let (merge, plans) = plan(&builder);
        let slot = merge.texture_slot(a).unwrap();
        let barriers = barriers_for(&plans, slot);

        assert_eq!(barriers.len(), 3);
        let (task, visibility) = barriers[2];
        assert_eq!(task, 2);
        assert!(!visibility.is_layout_transition());
        assert_eq!(visibility.dst.stage, vk::PipelineStageFlags2::ALL_GRAPHICS);
    }

    #[test]
    fn test_write_after_read() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("write");
        let a = t0.add_texture_output("a", rgba8(64));
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("read");
        t1.add_texture_input(a);
        t1.set_function(|_| {});

        let mut t2 = builder.add_compute_task("rewrite");
        t2.add_existing_texture_output(a);
        t2.set_function(|_| {});

        let (merge, plans) = plan(&builder);
        let slot = merge.texture_slot(a).unwrap();
        let (task, war) = barriers_for(&plans, slot)[2];
        assert_eq!(task, 2);
        assert_eq!(war.src.stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(war.src.access, vk::AccessFlags2::NONE);
        assert_eq!(war.src.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_attachments_load_ops_and_render_area() {
        let mut builder = TaskGraphBuilder::new();
        let swapchain = builder.register_presentation_texture("swapchain", TgExternalTexture::default);

        let mut g0 = builder.add_graphics_task("scene");
        let color = g0.add_cleared_color_attachment("color", rgba8(512), [0.0, 0.0, 0.0, 1.0]);
        let depth = g0.add_depth_attachment("depth", TgTextureDesc::new_2d(vk::Format::D32_SFLOAT, 256, 512));
        g0.set_function(|_| {});

        let mut g1 = builder.add_graphics_task("overlay");
        g1.add_existing_color_attachment(color);
        g1.add_existing_depth_attachment(depth);
        g1.set_function(|_| {});

        let mut g2 = builder.add_graphics_task("composite");
        g2.add_texture_input(color);
        g2.add_existing_color_attachment(swapchain);
        g2.set_function(|_| {});

        builder.add_default_present_task().set_presentation_image(swapchain);

        let info = crate::compile_info::TgCompileInfo {
            display_width: 512,
            display_height: 512,
            ..Default::default()
        };
        let (mut resources, tasks) = builder.into_parts();
        resources.resolve(&info);
        let lifetimes = LifetimeAnalyzer::analyze(&tasks);
        let merge = Merger::merge(&resources, &lifetimes, true);
        let plans = BarrierPlanner::plan(&tasks, &merge, &[]);

        let scene = &plans[0];
        assert_eq!(scene.attachments.len(), 2);
        assert_eq!(scene.attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(scene.attachments[1].load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(scene.attachments[1].layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert!(scene.attachments[1].is_depth());
        assert_eq!(scene.render_area, Some(vk::Extent2D { width: 256, height: 512 }));

        let overlay = &plans[1];
        assert!(overlay.attachments.iter().all(|a| a.load_op == vk::AttachmentLoadOp::LOAD));

        // 交换链图像在 composite 中被写入，在 present 中转到 PRESENT_SRC_KHR
        let swapchain_slot = merge.texture_slot(swapchain).unwrap();
        let present = &plans[3];
        assert_eq!(present.image_barriers.len(), 1);
        assert_eq!(present.image_barriers[0].slot, swapchain_slot);
        assert_eq!(present.image_barriers[0].src.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(present.image_barriers[0].dst.layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_cleared_compute_output() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("accumulate");
        let a = t0.add_cleared_texture_output("accum", rgba8(64), [0.0; 4]);
        let counters = t0.add_cleared_buffer_output("counters", TgBufferDesc::new(256), 0);
        t0.set_function(|_| {});

        let (merge, plans) = plan(&builder);
        let slot = merge.texture_slot(a).unwrap();
        let p = &plans[0];

        assert_eq!(p.pre_clear_image_barriers.len(), 1);
        assert_eq!(p.pre_clear_image_barriers[0].dst, TgImageState::TRANSFER_DST);
        assert_eq!(
            p.texture_clears,
            vec![TgTextureClear {
                slot,
                value: TgClearValue::Color([0.0; 4]),
                aspect: vk::ImageAspectFlags::COLOR
            }]
        );
        // TRANSFER_DST → GENERAL
        assert_eq!(p.image_barriers.len(), 1);
        assert_eq!(p.image_barriers[0].src.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(p.image_barriers[0].src.stage, vk::PipelineStageFlags2::TRANSFER);

        // buffer 首次 fill 无需 barrier，fill 之后到 compute 写需要 barrier
        let buffer_slot = merge.buffer_slot(counters).unwrap();
        assert!(p.pre_clear_buffer_barriers.is_empty());
        assert_eq!(p.buffer_clears, vec![TgBufferClear { slot: buffer_slot, value: 0 }]);
        assert_eq!(p.buffer_barriers.len(), 1);
        assert_eq!(p.buffer_barriers[0].src, TgBufferState::TRANSFER_DST);
    }

    #[test]
    fn test_buffer_read_after_write() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("build_indirect");
        let args = t0.add_buffer_output("args", TgBufferDesc::new(64));
        t0.set_function(|_| {});

        let mut t1 = builder.add_graphics_task("draw");
        t1.add_buffer_input(args, vk::BufferUsageFlags::INDIRECT_BUFFER);
        t1.add_color_attachment("out", rgba8(64));
        t1.set_function(|_| {});

        let mut t2 = builder.add_graphics_task("draw_again");
        t2.add_buffer_input(args, vk::BufferUsageFlags::INDIRECT_BUFFER);
        t2.add_color_attachment("out2", rgba8(32));
        t2.set_function(|_| {});

        let (_, plans) = plan(&builder);
        assert!(plans[0].buffer_barriers.is_empty());
        assert_eq!(plans[1].buffer_barriers.len(), 1);
        let barrier = plans[1].buffer_barriers[0];
        assert_eq!(barrier.src.stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert!(barrier.dst.stage.contains(vk::PipelineStageFlags2::DRAW_INDIRECT));
        assert!(plans[2].buffer_barriers.is_empty());
    }

    #[test]
    fn test_blit_plan() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("render");
        let src = t0.add_texture_output("src", rgba8(128));
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("alloc_dst");
        let dst: TgTextureRef = t1.add_texture_output("dst", rgba8(64));
        t1.set_function(|_| {});

        builder.add_transfer_task("downsample").blit_texture(dst, src);

        let (merge, plans) = plan(&builder);
        let blit = &plans[2];
        assert_eq!(blit.blits.len(), 1);
        assert_eq!(blit.blits[0].src_slot, merge.texture_slot(src).unwrap());
        assert_eq!(blit.blits[0].dst_extent.width, 64);

        let layouts: Vec<_> = blit.image_barriers.iter().map(|b| b.dst.layout).collect();
        assert!(layouts.contains(&vk::ImageLayout::TRANSFER_SRC_OPTIMAL));
        assert!(layouts.contains(&vk::ImageLayout::TRANSFER_DST_OPTIMAL));
    }

    #[test]
    fn test_to_vk_covers_all_subresources() {
        let barrier = TgImageBarrier {
            slot: 0,
            src: TgImageState::UNDEFINED,
            dst: TgImageState::COLOR_ATTACHMENT_WRITE,
            aspect: vk::ImageAspectFlags::COLOR,
        };
        let vk_barrier = barrier.to_vk(vk::Image::null());
        assert_eq!(vk_barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(vk_barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(vk_barrier.subresource_range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(vk_barrier.subresource_range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }

    #[test]
    fn test_aliased_texture_waits_for_previous_write() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("write_a");
        let a = t0.add_texture_output("a", TgTextureDesc::new_2d(vk::Format::R8_UNORM, 256, 256));
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("rewrite_a");
        t1.add_existing_texture_output(a);
        t1.set_function(|_| {});

        let mut t2 = builder.add_compute_task("write_b");
        let b = t2.add_texture_output("b", rgba8(128));
        t2.set_function(|_| {});

        let (merge, buckets, plans) = plan_aliased(&builder);
        let slot_a = merge.texture_slot(a).unwrap();
        let slot_b = merge.texture_slot(b).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].placement_of(slot_b).unwrap().offset, buckets[0].placement_of(slot_a).unwrap().offset);

        let (task, first_b) = barriers_for(&plans, slot_b)[0];
        assert_eq!(task, 2);
        assert_eq!(first_b.src.stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(first_b.src.access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(first_b.src.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first_b.dst, TgImageState::STORAGE_WRITE_COMPUTE);
    }

    #[test]
    fn test_aliased_texture_waits_for_previous_readers() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("write_a");
        let a = t0.add_texture_output("a", TgTextureDesc::new_2d(vk::Format::R8_UNORM, 256, 256));
        t0.set_function(|_| {});

        let mut t1 = builder.add_graphics_task("read_a");
        t1.add_texture_input(a);
        t1.set_function(|_| {});

        let mut t2 = builder.add_compute_task("write_b");
        let b = t2.add_texture_output("b", rgba8(128));
        t2.set_function(|_| {});

        let (merge, _, plans) = plan_aliased(&builder);
        let (task, first_b) = barriers_for(&plans, merge.texture_slot(b).unwrap())[0];
        assert_eq!(task, 2);
        // 前任最后是读取，只需要执行依赖
        assert_eq!(first_b.src.stage, vk::PipelineStageFlags2::ALL_GRAPHICS);
        assert_eq!(first_b.src.access, vk::AccessFlags2::NONE);
        assert_eq!(first_b.src.layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_aliased_buffer_waits_for_previous_write() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("write_c");
        t0.add_buffer_output("c", TgBufferDesc::new(256));
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("write_d");
        let d = t1.add_buffer_output("d", TgBufferDesc::new(128));
        t1.set_function(|_| {});

        let (merge, buckets, plans) = plan_aliased(&builder);
        assert_eq!(buckets.len(), 1);
        assert!(plans[0].buffer_barriers.is_empty());

        let slot_d = merge.buffer_slot(d).unwrap();
        assert_eq!(plans[1].buffer_barriers.len(), 1);
        let barrier = plans[1].buffer_barriers[0];
        assert_eq!(barrier.slot, slot_d);
        assert_eq!(
            barrier.src,
            TgBufferState::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_WRITE)
        );
    }

    #[test]
    fn test_created_attachment_in_reused_slot_does_not_load() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("write_a");
        let a = t0.add_texture_output("a", rgba8(64));
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("read_a");
        t1.add_texture_input(a);
        t1.set_function(|_| {});

        let mut g = builder.add_graphics_task("draw");
        let color = g.add_color_attachment("color", rgba8(64));
        g.set_function(|_| {});

        let (merge, plans) = plan(&builder);
        assert_eq!(merge.texture_slot(a), merge.texture_slot(color));
        assert_eq!(plans[2].attachments.len(), 1);
        assert_eq!(plans[2].attachments[0].load_op, vk::AttachmentLoadOp::DONT_CARE);
    }
}
