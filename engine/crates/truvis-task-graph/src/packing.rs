//! 时间维度上的显存装箱
//!
//! 每个 `MemoryBucket` 对应一次真实的显存分配，大小等于第一个（也是最大的）占用者。
//! bucket 内部按任务区间切分为若干 `TimeSlice`，每个 slice 记录该区间内的空闲字节块。
//! 两个资源共享 bucket 的前提：生命周期不重叠，或者在所有重叠的 slice 中字节区间不重叠。
//! buffer 与 optimal tiling 的 image 从不共享 bucket，因此不需要考虑 `bufferImageGranularity`。

use ash::vk;
use itertools::Itertools;

use crate::lifetime::TgLifetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error("memory request for slot {slot} has zero size")]
    ZeroSize { slot: usize },

    #[error("memory request for slot {slot} has alignment {alignment}, which is not a power of two")]
    InvalidAlignment { slot: usize, alignment: vk::DeviceSize },

    #[error("memory request for slot {slot} allows no memory type")]
    NoMemoryType { slot: usize },
}

/// 线性资源（buffer）与非线性资源（image）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TgMemoryKind {
    Buffer,
    Image,
}

/// 一个待装箱的显存需求
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgMemoryRequest {
    /// 对应的物理槽位索引
    pub slot: usize,
    pub kind: TgMemoryKind,
    pub size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
    pub memory_type_bits: u32,
    pub lifetime: TgLifetime,
}

impl TgMemoryRequest {
    pub fn new(
        slot: usize,
        kind: TgMemoryKind,
        requirements: vk::MemoryRequirements,
        lifetime: TgLifetime,
    ) -> Self {
        Self {
            slot,
            kind,
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
            lifetime,
        }
    }
}

/// 字节区间 `[offset, offset + size)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl Block {
    #[inline]
    pub fn end(&self) -> vk::DeviceSize {
        self.offset + self.size
    }

    /// 按对齐后的起点能否放下 `size` 字节
    #[inline]
    pub fn can_fit(&self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> bool {
        align_up(self.offset, alignment) + size <= self.end()
    }
}

/// 一段连续任务区间内 bucket 的占用情况
#[derive(Clone, Debug)]
pub struct TimeSlice {
    pub first_task: usize,
    pub last_task: usize,
    /// 按 offset 升序
    pub free_blocks: Vec<Block>,
    /// 在此区间内活跃的物理槽位
    pub occupants: Vec<usize>,
}

impl TimeSlice {
    fn free(first_task: usize, last_task: usize, bucket_size: vk::DeviceSize) -> Self {
        Self {
            first_task,
            last_task,
            free_blocks: vec![Block {
                offset: 0,
                size: bucket_size,
            }],
            occupants: Vec::new(),
        }
    }

    #[inline]
    fn range(&self) -> TgLifetime {
        TgLifetime {
            first_task: self.first_task,
            last_task: self.last_task,
        }
    }
}

/// 资源在 bucket 中的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgPlacement {
    pub slot: usize,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub lifetime: TgLifetime,
}

/// 一次真实的显存分配
#[derive(Clone, Debug)]
pub struct MemoryBucket {
    pub kind: TgMemoryKind,
    pub size: vk::DeviceSize,
    /// 所有占用者对齐要求的最大值
    pub alignment: vk::DeviceSize,
    /// 所有占用者 memory type bits 的交集
    pub memory_type_bits: u32,
    /// 按 first_task 升序，彼此相邻无空洞
    pub slices: Vec<TimeSlice>,
    /// 第一个元素是创建 bucket 的占用者
    pub placements: Vec<TgPlacement>,
}

// new & init
impl MemoryBucket {
    /// 以第一个占用者创建 bucket，大小与之相同
    pub fn new(request: &TgMemoryRequest) -> Self {
        Self {
            kind: request.kind,
            size: request.size,
            alignment: request.alignment,
            memory_type_bits: request.memory_type_bits,
            slices: vec![TimeSlice {
                first_task: request.lifetime.first_task,
                last_task: request.lifetime.last_task,
                free_blocks: Vec::new(),
                occupants: vec![request.slot],
            }],
            placements: vec![TgPlacement {
                slot: request.slot,
                offset: 0,
                size: request.size,
                lifetime: request.lifetime,
            }],
        }
    }
}

// getter
impl MemoryBucket {
    #[inline]
    pub fn placement_of(&self, slot: usize) -> Option<&TgPlacement> {
        self.placements.iter().find(|p| p.slot == slot)
    }
}

impl MemoryBucket {
    /// 尝试把资源放进该 bucket
    ///
    /// 返回 false 时 bucket 保持不变。
    pub fn add_resource(&mut self, request: &TgMemoryRequest) -> bool {
        if request.kind != self.kind || request.size > self.size {
            return false;
        }
        if self.memory_type_bits & request.memory_type_bits == 0 {
            return false;
        }
        // 第一个占用者独占整个 bucket
        if self.placements[0].lifetime.overlaps(&request.lifetime) {
            return false;
        }

        let Some(block) = self
            .find_fittable_regions(request.lifetime)
            .into_iter()
            .filter(|block| block.can_fit(request.size, request.alignment))
            .min_by_key(|block| (block.size, block.offset))
        else {
            return false;
        };
        let offset = align_up(block.offset, request.alignment);

        // 可行性确认后才修改 slice
        let TgLifetime { first_task, last_task } = request.lifetime;
        self.fill_gaps(first_task, last_task);
        self.split_at(first_task);
        self.split_at(last_task + 1);

        for slice in self.slices.iter_mut().filter(|s| request.lifetime.overlaps(&s.range())) {
            reserve(&mut slice.free_blocks, offset, request.size);
            slice.occupants.push(request.slot);
        }

        self.alignment = self.alignment.max(request.alignment);
        self.memory_type_bits &= request.memory_type_bits;
        self.placements.push(TgPlacement {
            slot: request.slot,
            offset,
            size: request.size,
            lifetime: request.lifetime,
        });
        true
    }

    /// 与 `lifetime` 重叠的所有 slice 共同空闲的字节块
    ///
    /// 未被任何 slice 覆盖的区间视为整块空闲。
    fn find_fittable_regions(&self, lifetime: TgLifetime) -> Vec<Block> {
        self.slices
            .iter()
            .filter(|slice| lifetime.overlaps(&slice.range()))
            .fold(
                vec![Block {
                    offset: 0,
                    size: self.size,
                }],
                |free, slice| intersect(&free, &slice.free_blocks),
            )
    }

    /// 将跨越 `task` 的 slice 一分为二，使 `task` 成为某个 slice 的起点
    fn split_at(&mut self, task: usize) {
        let Some(index) = self.slices.iter().position(|s| s.first_task < task && task <= s.last_task) else {
            return;
        };
        let mut tail = self.slices[index].clone();
        tail.first_task = task;
        self.slices[index].last_task = task - 1;
        self.slices.insert(index + 1, tail);
    }

    /// 插入空闲 slice，使 bucket 覆盖 `[first_task, last_task]` 以及与已有 slice 之间的空洞
    fn fill_gaps(&mut self, first_task: usize, last_task: usize) {
        let covered_first = self.slices.first().map_or(first_task, |s| s.first_task).min(first_task);
        let covered_last = self.slices.last().map_or(last_task, |s| s.last_task).max(last_task);

        let mut filled = Vec::with_capacity(self.slices.len() + 2);
        let mut cursor = covered_first;
        for slice in self.slices.drain(..) {
            if slice.first_task > cursor {
                filled.push(TimeSlice::free(cursor, slice.first_task - 1, self.size));
            }
            cursor = slice.last_task + 1;
            filled.push(slice);
        }
        if cursor <= covered_last {
            filled.push(TimeSlice::free(cursor, covered_last, self.size));
        }
        self.slices = filled;
    }
}

/// 装箱入口
///
/// 按 size 降序（稳定）依次放入已有 bucket，放不下时新开一个 bucket。
/// `alias == false` 时每个资源独占一个 bucket。
pub fn pack_resources(requests: &[TgMemoryRequest], alias: bool) -> Result<Vec<MemoryBucket>, PackError> {
    let _span = tg_span!("pack_resources");

    for request in requests {
        if request.size == 0 {
            return Err(PackError::ZeroSize { slot: request.slot });
        }
        if !request.alignment.is_power_of_two() {
            return Err(PackError::InvalidAlignment {
                slot: request.slot,
                alignment: request.alignment,
            });
        }
        if request.memory_type_bits == 0 {
            return Err(PackError::NoMemoryType { slot: request.slot });
        }
    }

    let mut buckets: Vec<MemoryBucket> = Vec::new();
    for request in requests.iter().sorted_by(|a, b| b.size.cmp(&a.size)) {
        if alias && buckets.iter_mut().any(|bucket| bucket.add_resource(request)) {
            continue;
        }
        log::debug!(
            "TaskGraph: open memory bucket #{} for slot {} ({} bytes)",
            buckets.len(),
            request.slot,
            request.size
        );
        buckets.push(MemoryBucket::new(request));
    }

    Ok(buckets)
}

#[inline]
pub fn align_up(offset: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        offset
    } else {
        offset.div_ceil(alignment) * alignment
    }
}

/// 两个有序空闲块列表的交集
fn intersect(a: &[Block], b: &[Block]) -> Vec<Block> {
    itertools::iproduct!(a, b)
        .filter_map(|(x, y)| {
            let offset = x.offset.max(y.offset);
            let end = x.end().min(y.end());
            (offset < end).then_some(Block {
                offset,
                size: end - offset,
            })
        })
        .sorted_by_key(|block| block.offset)
        .collect()
}

/// 从空闲块列表中扣除 `[offset, offset + size)`
fn reserve(blocks: &mut Vec<Block>, offset: vk::DeviceSize, size: vk::DeviceSize) {
    let end = offset + size;
    let mut remaining = Vec::with_capacity(blocks.len() + 1);
    for block in blocks.drain(..) {
        if block.end() <= offset || block.offset >= end {
            remaining.push(block);
            continue;
        }
        if block.offset < offset {
            remaining.push(Block {
                offset: block.offset,
                size: offset - block.offset,
            });
        }
        if block.end() > end {
            remaining.push(Block {
                offset: end,
                size: block.end() - end,
            });
        }
    }
    *blocks = remaining;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(slot: usize, size: u64, alignment: u64, first: usize, last: usize) -> TgMemoryRequest {
        TgMemoryRequest {
            slot,
            kind: TgMemoryKind::Image,
            size,
            alignment,
            memory_type_bits: 0b1,
            lifetime: TgLifetime {
                first_task: first,
                last_task: last,
            },
        }
    }

    /// 共享 bucket 的两个资源：生命周期不重叠，或字节区间不重叠
    fn assert_no_collisions(buckets: &[MemoryBucket]) {
        for bucket in buckets {
            for p in &bucket.placements {
                assert!(p.offset + p.size <= bucket.size, "slot {} out of bucket", p.slot);
            }
            for (a, b) in bucket.placements.iter().tuple_combinations() {
                let bytes_disjoint = a.offset + a.size <= b.offset || b.offset + b.size <= a.offset;
                assert!(
                    !a.lifetime.overlaps(&b.lifetime) || bytes_disjoint,
                    "slot {} and slot {} collide",
                    a.slot,
                    b.slot
                );
            }
            // slice 覆盖连续且有序
            for (prev, next) in bucket.slices.iter().tuple_windows() {
                assert_eq!(prev.last_task + 1, next.first_task);
            }
        }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(600, 256), 768);
        assert_eq!(align_up(13, 1), 13);
    }

    #[test]
    fn test_disjoint_lifetimes_share_offset() {
        let requests = [request(0, 1024, 256, 0, 1), request(1, 1024, 256, 2, 3)];
        let buckets = pack_resources(&requests, true).unwrap();

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].placement_of(1).unwrap().offset, 0);
        assert_no_collisions(&buckets);
    }

    #[test]
    fn test_overlapping_seed_opens_new_bucket() {
        let requests = [request(0, 1024, 256, 0, 3), request(1, 256, 256, 2, 3)];
        let buckets = pack_resources(&requests, true).unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[1].placements[0].slot, 1);
        assert_no_collisions(&buckets);
    }

    #[test]
    fn test_best_fit_with_alignment() {
        let requests = [
            request(0, 1024, 256, 0, 1),
            request(1, 600, 256, 2, 3),
            request(2, 256, 256, 2, 3),
            request(3, 100, 4, 3, 4),
        ];
        let buckets = pack_resources(&requests, true).unwrap();

        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        assert_eq!(bucket.placement_of(1).unwrap().offset, 0);
        // [600, 1024) 对齐到 256 后从 768 开始
        assert_eq!(bucket.placement_of(2).unwrap().offset, 768);
        // 任务 3 上剩余 [600, 768)，任务 4 上整块空闲
        assert_eq!(bucket.placement_of(3).unwrap().offset, 600);
        assert_no_collisions(&buckets);

        let last = bucket.slices.last().unwrap();
        assert_eq!((last.first_task, last.last_task), (4, 4));
        assert_eq!(last.occupants, vec![3]);
    }

    #[test]
    fn test_sorted_descending_by_size() {
        let requests = [request(0, 128, 1, 0, 0), request(1, 4096, 1, 1, 1)];
        let buckets = pack_resources(&requests, true).unwrap();

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].size, 4096);
        assert_eq!(buckets[0].placements[0].slot, 1);
    }

    #[test]
    fn test_gap_is_filled_with_free_slice() {
        let requests = [request(0, 512, 1, 0, 0), request(1, 512, 1, 5, 6)];
        let buckets = pack_resources(&requests, true).unwrap();

        assert_eq!(buckets.len(), 1);
        let ranges: Vec<_> = buckets[0].slices.iter().map(|s| (s.first_task, s.last_task)).collect();
        assert_eq!(ranges, vec![(0, 0), (1, 4), (5, 6)]);
        assert!(buckets[0].slices[1].occupants.is_empty());
        assert_no_collisions(&buckets);
    }

    #[test]
    fn test_memory_type_and_alignment_union() {
        let mut a = request(0, 1024, 64, 0, 0);
        a.memory_type_bits = 0b0111;
        let mut b = request(1, 512, 256, 1, 1);
        b.memory_type_bits = 0b0110;
        let mut c = request(2, 512, 16, 2, 2);
        c.memory_type_bits = 0b1000;

        let buckets = pack_resources(&[a, b, c], true).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].memory_type_bits, 0b0110);
        assert_eq!(buckets[0].alignment, 256);
        assert_eq!(buckets[1].placements[0].slot, 2);
    }

    #[test]
    fn test_alias_disabled() {
        let requests = [request(0, 1024, 256, 0, 1), request(1, 1024, 256, 2, 3)];
        let buckets = pack_resources(&requests, false).unwrap();
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn test_rejected_request_keeps_bucket_intact() {
        let mut bucket = MemoryBucket::new(&request(0, 1024, 256, 0, 1));
        assert!(bucket.add_resource(&request(1, 900, 1, 2, 3)));
        let before = bucket.clone();

        // 任务 3 上只剩 124 字节
        assert!(!bucket.add_resource(&request(2, 200, 1, 3, 5)));
        assert_eq!(bucket.slices.len(), before.slices.len());
        assert_eq!(bucket.placements, before.placements);
    }

    #[test]
    fn test_invalid_requests() {
        assert_eq!(
            pack_resources(&[request(3, 0, 1, 0, 0)], true).unwrap_err(),
            PackError::ZeroSize { slot: 3 }
        );
        assert_eq!(
            pack_resources(&[request(1, 64, 48, 0, 0)], true).unwrap_err(),
            PackError::InvalidAlignment {
                slot: 1,
                alignment: 48
            }
        );
        let mut no_type = request(2, 64, 1, 0, 0);
        no_type.memory_type_bits = 0;
        assert_eq!(pack_resources(&[no_type], true).unwrap_err(), PackError::NoMemoryType { slot: 2 });
    }

    #[test]
    fn test_many_resources_never_collide() {
        let requests: Vec<_> = (0..24)
            .map(|i| {
                let first = (i * 7) % 11;
                let size = 256 * (1 + (i as u64 * 5) % 9);
                request(i, size, 256, first, first + i % 4)
            })
            .collect();
        let buckets = pack_resources(&requests, true).unwrap();

        let placed: usize = buckets.iter().map(|b| b.placements.len()).sum();
        assert_eq!(placed, requests.len());
        assert_no_collisions(&buckets);
    }

    #[test]
    fn test_buffers_and_images_never_share_bucket() {
        let image = request(0, 4096, 256, 0, 1);
        let mut buffer = request(1, 1024, 256, 2, 3);
        buffer.kind = TgMemoryKind::Buffer;
        let mut other_buffer = request(2, 512, 256, 0, 0);
        other_buffer.kind = TgMemoryKind::Buffer;

        let buckets = pack_resources(&[image, buffer, other_buffer], true).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].kind, TgMemoryKind::Image);
        assert_eq!(buckets[0].placements.len(), 1);
        assert_eq!(buckets[1].kind, TgMemoryKind::Buffer);
        assert_eq!(buckets[1].placements.len(), 2);
        assert_no_collisions(&buckets);
    }
}
