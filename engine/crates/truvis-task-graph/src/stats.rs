//! 编译统计

use std::time::Duration;

/// 单次编译的统计信息
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TgStats {
    pub compile_time: Duration,
    pub task_count: usize,
    /// 被任务引用的逻辑资源数量
    pub logical_resources: usize,
    /// 并入已有槽位的逻辑资源数量
    pub merged_resources: usize,
    /// 合并节省的字节数（按各成员的显存需求计算）
    pub merged_bytes_saved: u64,
    /// 需要 TaskGraph 分配的物理资源
    pub physical_resources: usize,
    pub external_resources: usize,
    pub memory_buckets: usize,
    /// 所有显存块大小之和
    pub memory_used: u64,
    /// 不做任何别名时需要的显存
    pub memory_unaliased: u64,
    pub textures: usize,
    pub buffers: usize,
    pub barriers: usize,
}

impl TgStats {
    #[inline]
    pub fn memory_saved(&self) -> u64 {
        self.memory_unaliased.saturating_sub(self.memory_used)
    }

    pub fn log(&self) {
        const MB: f64 = 1024.0 * 1024.0;

        log::info!("TaskGraph stats:");
        log::info!("  compile time       : {:.3} ms", self.compile_time.as_secs_f64() * 1000.0);
        log::info!("  tasks              : {}", self.task_count);
        log::info!("  logical resources  : {}", self.logical_resources);
        log::info!(
            "  merged resources   : {} ({:.2} MB saved)",
            self.merged_resources,
            self.merged_bytes_saved as f64 / MB
        );
        log::info!(
            "  physical resources : {} ({} textures, {} buffers, {} external)",
            self.physical_resources,
            self.textures,
            self.buffers,
            self.external_resources
        );
        log::info!("  memory buckets     : {}", self.memory_buckets);
        log::info!(
            "  memory used        : {:.2} MB (unaliased {:.2} MB, saved {:.2} MB)",
            self.memory_used as f64 / MB,
            self.memory_unaliased as f64 / MB,
            self.memory_saved() as f64 / MB
        );
        log::info!("  barriers           : {}", self.barriers);
    }
}
