//! 资源生命周期分析
//!
//! 按声明顺序线性扫描所有任务，得到每个逻辑资源被使用的闭区间 `[first_task, last_task]`。

use slotmap::SecondaryMap;

use crate::handle::{TgBufferRef, TgResourceRef, TgTextureRef};
use crate::task::TgTaskNode;

/// 闭区间任务索引范围
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TgLifetime {
    pub first_task: usize,
    pub last_task: usize,
}

impl TgLifetime {
    #[inline]
    pub fn new(task_index: usize) -> Self {
        Self {
            first_task: task_index,
            last_task: task_index,
        }
    }

    #[inline]
    pub fn extend(&mut self, task_index: usize) {
        self.first_task = self.first_task.min(task_index);
        self.last_task = self.last_task.max(task_index);
    }

    #[inline]
    pub fn union(self, other: Self) -> Self {
        Self {
            first_task: self.first_task.min(other.first_task),
            last_task: self.last_task.max(other.last_task),
        }
    }

    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.last_task >= other.first_task && other.last_task >= self.first_task
    }

    #[inline]
    pub fn contains(&self, task_index: usize) -> bool {
        self.first_task <= task_index && task_index <= self.last_task
    }
}

impl std::fmt::Display for TgLifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.first_task, self.last_task)
    }
}

/// 所有被引用资源的生命周期
#[derive(Debug, Default)]
pub struct TgLifetimes {
    pub textures: SecondaryMap<TgTextureRef, TgLifetime>,
    pub buffers: SecondaryMap<TgBufferRef, TgLifetime>,
}

impl TgLifetimes {
    pub fn get(&self, resource: TgResourceRef) -> Option<TgLifetime> {
        match resource {
            TgResourceRef::Texture(texture) => self.textures.get(texture).copied(),
            TgResourceRef::Buffer(buffer) => self.buffers.get(buffer).copied(),
        }
    }
}

pub struct LifetimeAnalyzer;

impl LifetimeAnalyzer {
    /// 单次线性扫描，未被任何任务引用的资源不会出现在结果中
    pub fn analyze(tasks: &[TgTaskNode]) -> TgLifetimes {
        let _span = tg_span!("LifetimeAnalyzer::analyze");

        let mut lifetimes = TgLifetimes::default();
        for (task_index, task) in tasks.iter().enumerate() {
            for access in &task.textures {
                Self::extend(&mut lifetimes.textures, access.texture, task_index);
            }
            for access in &task.buffers {
                Self::extend(&mut lifetimes.buffers, access.buffer, task_index);
            }
        }
        lifetimes
    }

    fn extend<K: slotmap::Key>(map: &mut SecondaryMap<K, TgLifetime>, key: K, task_index: usize) {
        match map.get_mut(key) {
            Some(lifetime) => lifetime.extend(task_index),
            None => {
                // 这里不检查 key 是否仍在注册表中，由 Validator 负责
                map.insert(key, TgLifetime::new(task_index));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TaskGraphBuilder;
    use crate::resource_desc::{TgBufferDesc, TgTextureDesc};
    use ash::vk;

    #[test]
    fn test_lifetime_overlap() {
        let a = TgLifetime { first_task: 0, last_task: 1 };
        let b = TgLifetime { first_task: 1, last_task: 2 };
        let c = TgLifetime { first_task: 2, last_task: 3 };
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&c));
        assert_eq!(a.union(c), TgLifetime { first_task: 0, last_task: 3 });
    }

    #[test]
    fn test_analyze_matches_builder_bookkeeping() {
        let mut builder = TaskGraphBuilder::new();
        let desc = TgTextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, 64, 64);

        let mut t0 = builder.add_compute_task("t0");
        let a = t0.add_texture_output("a", desc);
        let buf = t0.add_buffer_output("counters", TgBufferDesc::new(256));
        t0.set_function(|_| {});

        let mut t1 = builder.add_compute_task("t1");
        t1.add_texture_input(a);
        let b = t1.add_texture_output("b", desc);
        t1.set_function(|_| {});

        let mut t2 = builder.add_compute_task("t2");
        t2.add_texture_input(b);
        t2.add_buffer_input(buf, vk::BufferUsageFlags::STORAGE_BUFFER);
        t2.set_function(|_| {});

        let lifetimes = LifetimeAnalyzer::analyze(builder.tasks());

        for (texture, lifetime) in &lifetimes.textures {
            assert!(lifetime.first_task <= lifetime.last_task);
            assert_eq!(builder.resources().get_texture(texture).unwrap().lifetime(), Some(*lifetime));
            // 端点都必须是真正访问了该资源的任务
            for endpoint in [lifetime.first_task, lifetime.last_task] {
                assert!(builder.tasks()[endpoint].textures.iter().any(|t| t.texture == texture));
            }
        }

        assert_eq!(lifetimes.textures[a], TgLifetime { first_task: 0, last_task: 1 });
        assert_eq!(lifetimes.textures[b], TgLifetime { first_task: 1, last_task: 2 });
        assert_eq!(lifetimes.get(buf.into()), Some(TgLifetime { first_task: 0, last_task: 2 }));
    }
}
