//! 描述符级别的资源合并
//!
//! 描述符完全一致、生命周期不重叠的逻辑资源共享同一个物理槽位。
//! 这是在显存装箱之前的一层粗粒度别名：合并后的槽位只需要创建一个 image / buffer。

use slotmap::SecondaryMap;

use crate::handle::{TgBufferRef, TgResourceRef, TgTextureRef};
use crate::lifetime::{TgLifetime, TgLifetimes};
use crate::resource_desc::{TgBufferDesc, TgTextureDesc};
use crate::resource_table::TgResourceTable;

/// 物理槽位的描述符
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TgSlotDesc {
    Texture(TgTextureDesc),
    Buffer(TgBufferDesc),
}

impl TgSlotDesc {
    /// 除 usage 外完全一致才能合并
    fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Texture(a), Self::Texture(b)) => a.same_shape(b),
            (Self::Buffer(a), Self::Buffer(b)) => a.same_shape(b),
            _ => false,
        }
    }

    fn union_usage(&mut self, other: &Self) {
        match (self, other) {
            (Self::Texture(a), Self::Texture(b)) => a.usage |= b.usage,
            (Self::Buffer(a), Self::Buffer(b)) => a.usage |= b.usage,
            _ => {}
        }
    }

    #[inline]
    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_))
    }
}

/// 合并后的物理槽位
#[derive(Clone, Debug)]
pub struct TgMergedSlot {
    /// 成员名称以 `_` 连接
    pub name: String,
    pub desc: TgSlotDesc,
    /// 所有成员生命周期的并集
    pub lifetime: TgLifetime,
    pub members: Vec<TgResourceRef>,
    pub external: bool,
}

#[derive(Debug, Default)]
pub struct TgMergeResult {
    pub slots: Vec<TgMergedSlot>,
    pub texture_slots: SecondaryMap<TgTextureRef, usize>,
    pub buffer_slots: SecondaryMap<TgBufferRef, usize>,
    /// 并入已有槽位的逻辑资源数量
    pub merged_count: usize,
}

impl TgMergeResult {
    #[inline]
    pub fn texture_slot(&self, texture: TgTextureRef) -> Option<usize> {
        self.texture_slots.get(texture).copied()
    }

    #[inline]
    pub fn buffer_slot(&self, buffer: TgBufferRef) -> Option<usize> {
        self.buffer_slots.get(buffer).copied()
    }

    pub fn slot_of(&self, resource: TgResourceRef) -> Option<usize> {
        match resource {
            TgResourceRef::Texture(texture) => self.texture_slot(texture),
            TgResourceRef::Buffer(buffer) => self.buffer_slot(buffer),
        }
    }
}

pub struct Merger;

impl Merger {
    /// 按注册顺序遍历资源，接受第一个描述符一致且生命周期不重叠的槽位
    ///
    /// `enable == false` 时每个资源独占一个槽位。
    pub fn merge(resources: &TgResourceTable, lifetimes: &TgLifetimes, enable: bool) -> TgMergeResult {
        let _span = tg_span!("Merger::merge");

        let mut result = TgMergeResult::default();

        for (texture, logical) in resources.iter_textures() {
            let Some(lifetime) = lifetimes.textures.get(texture).copied() else {
                log::warn!("TaskGraph: texture \"{}\" is never used by any task, skipped", logical.name);
                continue;
            };
            let slot = Self::place(
                &mut result,
                &logical.name,
                TgSlotDesc::Texture(logical.desc),
                lifetime,
                texture.into(),
                logical.is_external(),
                enable,
            );
            result.texture_slots.insert(texture, slot);
        }

        for (buffer, logical) in resources.iter_buffers() {
            let Some(lifetime) = lifetimes.buffers.get(buffer).copied() else {
                log::warn!("TaskGraph: buffer \"{}\" is never used by any task, skipped", logical.name);
                continue;
            };
            let slot = Self::place(
                &mut result,
                &logical.name,
                TgSlotDesc::Buffer(logical.desc),
                lifetime,
                buffer.into(),
                logical.is_external(),
                enable,
            );
            result.buffer_slots.insert(buffer, slot);
        }

        log::debug!(
            "TaskGraph: {} logical resources merged into {} slots ({} merged)",
            result.texture_slots.len() + result.buffer_slots.len(),
            result.slots.len(),
            result.merged_count
        );

        result
    }

    fn place(
        result: &mut TgMergeResult,
        name: &str,
        desc: TgSlotDesc,
        lifetime: TgLifetime,
        member: TgResourceRef,
        external: bool,
        enable: bool,
    ) -> usize {
        if enable && !external {
            let candidate = result
                .slots
                .iter()
                .position(|slot| !slot.external && slot.desc.same_shape(&desc) && !slot.lifetime.overlaps(&lifetime));

            if let Some(index) = candidate {
                let slot = &mut result.slots[index];
                slot.name.push('_');
                slot.name.push_str(name);
                slot.desc.union_usage(&desc);
                slot.lifetime = slot.lifetime.union(lifetime);
                slot.members.push(member);
                result.merged_count += 1;
                return index;
            }
        }

        result.slots.push(TgMergedSlot {
            name: name.to_string(),
            desc,
            lifetime,
            members: vec![member],
            external,
        });
        result.slots.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TaskGraphBuilder;
    use crate::lifetime::LifetimeAnalyzer;
    use crate::resource_table::TgExternalTexture;
    use ash::vk;

    fn r8() -> TgTextureDesc {
        TgTextureDesc::new_2d(vk::Format::R8_UNORM, 256, 256)
    }

    fn merge(builder: &TaskGraphBuilder, enable: bool) -> TgMergeResult {
        let lifetimes = LifetimeAnalyzer::analyze(builder.tasks());
        Merger::merge(builder.resources(), &lifetimes, enable)
    }

    /// A 活跃于 0..1，B 活跃于 2..3
    fn disjoint_pair() -> (TaskGraphBuilder, TgTextureRef, TgTextureRef) {
        let mut builder = TaskGraphBuilder::new();

        let mut t0 = builder.add_compute_task("t0");
        let a = t0.add_texture_output("a", r8());
        t0.set_function(|_| {});
        let mut t1 = builder.add_compute_task("t1");
        t1.add_texture_input(a);
        t1.set_function(|_| {});

        let mut t2 = builder.add_compute_task("t2");
        let b = t2.add_texture_output("b", r8());
        t2.set_function(|_| {});
        let mut t3 = builder.add_compute_task("t3");
        t3.add_texture_input(b);
        t3.set_function(|_| {});

        (builder, a, b)
    }

    #[test]
    fn test_merge_identical_disjoint() {
        let (builder, a, b) = disjoint_pair();
        let result = merge(&builder, true);

        assert_eq!(result.slots.len(), 1);
        assert_eq!(result.merged_count, 1);
        assert_eq!(result.texture_slot(a), result.texture_slot(b));

        let slot = &result.slots[0];
        assert_eq!(slot.name, "a_b");
        assert_eq!(slot.lifetime, TgLifetime { first_task: 0, last_task: 3 });
        assert_eq!(slot.members, vec![a.into(), b.into()]);
    }

    #[test]
    fn test_merge_disabled() {
        let (builder, a, b) = disjoint_pair();
        let result = merge(&builder, false);

        assert_eq!(result.slots.len(), 2);
        assert_eq!(result.merged_count, 0);
        assert_ne!(result.texture_slot(a), result.texture_slot(b));
    }

    #[test]
    fn test_overlapping_lifetimes_do_not_merge() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("t0");
        let a = t0.add_texture_output("a", r8());
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("t1");
        t1.add_texture_input(a);
        let b = t1.add_texture_output("b", r8());
        t1.set_function(|_| {});

        let result = merge(&builder, true);
        assert_eq!(result.slots.len(), 2);
        assert_ne!(result.texture_slot(a), result.texture_slot(b));
    }

    #[test]
    fn test_different_shape_does_not_merge() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("t0");
        t0.add_texture_output("a", r8());
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("t1");
        t1.add_texture_output("b", r8().with_mip_levels(2));
        t1.set_function(|_| {});

        assert_eq!(merge(&builder, true).slots.len(), 2);
    }

    #[test]
    fn test_merge_unions_usage() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("t0");
        t0.add_texture_output("storage", r8());
        t0.set_function(|_| {});

        let mut t1 = builder.add_graphics_task("t1");
        t1.add_color_attachment("color", r8());
        t1.set_function(|_| {});

        let result = merge(&builder, true);
        assert_eq!(result.slots.len(), 1);
        let TgSlotDesc::Texture(desc) = result.slots[0].desc else {
            panic!("expected texture slot");
        };
        assert!(desc.usage.contains(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn test_external_and_unused_resources() {
        let mut builder = TaskGraphBuilder::new();
        let history = builder.register_external_texture("history", r8(), TgExternalTexture::default);
        let unused = builder.declare_texture("unused", r8());

        let mut t0 = builder.add_compute_task("t0");
        t0.add_texture_input(history);
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("t1");
        let a = t1.add_texture_output("a", r8());
        t1.set_function(|_| {});

        let result = merge(&builder, true);
        assert_eq!(result.slots.len(), 2);
        assert!(result.slots[result.texture_slot(history).unwrap()].external);
        assert_ne!(result.texture_slot(history), result.texture_slot(a));
        assert_eq!(result.texture_slot(unused), None);
    }
}
