use std::collections::{HashMap, HashSet};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use super::{GraphicsContext, TgAllocationId, TgRenderingAttachment};
use crate::resource_desc::{TgBufferDesc, TgTextureDesc};

/// 录制下来的 image barrier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgRecordedImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgRecordedBufferBarrier {
    pub buffer: vk::Buffer,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
}

/// 录制下来的命令
#[derive(Clone, Debug, PartialEq)]
pub enum TgRecordedCommand {
    PipelineBarrier {
        images: Vec<TgRecordedImageBarrier>,
        buffers: Vec<TgRecordedBufferBarrier>,
    },
    ClearColorImage {
        image: vk::Image,
        color: [f32; 4],
    },
    FillBuffer {
        buffer: vk::Buffer,
        value: u32,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
    },
    BeginRendering {
        render_area: vk::Extent2D,
        color_attachments: Vec<(vk::ImageView, vk::AttachmentLoadOp)>,
        depth_attachment: Option<(vk::ImageView, vk::AttachmentLoadOp)>,
    },
    EndRendering,
    BeginLabel(String),
    EndLabel,
}

/// 纯 CPU 的 `GraphicsContext`
///
/// 生成假句柄、按格式估算显存需求，并记录所有命令与存活对象，
/// 用于测试和没有 GPU 时查看执行计划。
pub struct RecordingContext {
    next_handle: u64,

    images: HashMap<vk::Image, String>,
    image_descs: HashMap<vk::Image, TgTextureDesc>,
    image_views: HashSet<vk::ImageView>,
    buffers: HashMap<vk::Buffer, (String, TgBufferDesc)>,
    allocations: HashMap<TgAllocationId, vk::MemoryRequirements>,
    /// 句柄原始值 -> (allocation, offset)
    bindings: HashMap<u64, (TgAllocationId, vk::DeviceSize)>,

    /// 曾经分配过的显存块总数
    total_allocations: usize,
    /// 允许的 memory type，用于模拟不同资源的类型约束
    memory_type_bits: u32,
    /// 第 N 次分配时返回 OUT_OF_DEVICE_MEMORY
    fail_allocation_at: Option<usize>,

    commands: Vec<TgRecordedCommand>,
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl RecordingContext {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            images: HashMap::new(),
            image_descs: HashMap::new(),
            image_views: HashSet::new(),
            buffers: HashMap::new(),
            allocations: HashMap::new(),
            bindings: HashMap::new(),
            total_allocations: 0,
            memory_type_bits: 0b1,
            fail_allocation_at: None,
            commands: Vec::new(),
        }
    }

    pub fn with_memory_type_bits(mut self, memory_type_bits: u32) -> Self {
        self.memory_type_bits = memory_type_bits;
        self
    }

    /// 第 `index` 次（从 0 开始）`allocate_memory` 返回失败
    pub fn fail_allocation_at(mut self, index: usize) -> Self {
        self.fail_allocation_at = Some(index);
        self
    }
}

// getter
impl RecordingContext {
    #[inline]
    pub fn commands(&self) -> &[TgRecordedCommand] {
        &self.commands
    }

    #[inline]
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    #[inline]
    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn live_image_views(&self) -> usize {
        self.image_views.len()
    }

    #[inline]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    #[inline]
    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }

    /// 存活对象总数（image、view、buffer、显存块）
    pub fn live_objects(&self) -> usize {
        self.live_images() + self.live_image_views() + self.live_buffers() + self.live_allocations()
    }

    pub fn image_name(&self, image: vk::Image) -> Option<&str> {
        self.images.get(&image).map(String::as_str)
    }

    pub fn buffer_name(&self, buffer: vk::Buffer) -> Option<&str> {
        self.buffers.get(&buffer).map(|(name, _)| name.as_str())
    }

    /// 按名称查找 image（名称为合并后的槽位名）
    pub fn find_image(&self, name: &str) -> Option<vk::Image> {
        self.images.iter().find(|(_, n)| n.as_str() == name).map(|(image, _)| *image)
    }

    pub fn image_binding(&self, image: vk::Image) -> Option<(TgAllocationId, vk::DeviceSize)> {
        self.bindings.get(&image.as_raw()).copied()
    }

    pub fn buffer_binding(&self, buffer: vk::Buffer) -> Option<(TgAllocationId, vk::DeviceSize)> {
        self.bindings.get(&buffer.as_raw()).copied()
    }

    /// 所有 image barrier，按录制顺序展开
    pub fn image_barriers(&self) -> impl Iterator<Item = &TgRecordedImageBarrier> {
        self.commands.iter().flat_map(|command| -> &[TgRecordedImageBarrier] {
            match command {
                TgRecordedCommand::PipelineBarrier { images, .. } => images,
                _ => &[],
            }
        })
    }
}

// tools
impl RecordingContext {
    fn next_raw_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn texel_size(format: vk::Format) -> vk::DeviceSize {
        match format {
            vk::Format::R8_UNORM | vk::Format::R8_UINT | vk::Format::R8_SNORM | vk::Format::S8_UINT => 1,
            vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::R16_UINT | vk::Format::D16_UNORM => 2,
            vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => 8,
            vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,
            _ => 4,
        }
    }

    fn bind(
        &mut self,
        raw: u64,
        allocation: TgAllocationId,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<()> {
        let Some(requirements) = self.allocations.get(&allocation) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        if offset + size > requirements.size {
            log::error!(
                "RecordingContext: binding [{}, {}) exceeds allocation of {} bytes",
                offset,
                offset + size,
                requirements.size
            );
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        self.bindings.insert(raw, (allocation, offset));
        Ok(())
    }
}

impl GraphicsContext for RecordingContext {
    fn create_image(&mut self, name: &str, desc: &TgTextureDesc) -> VkResult<vk::Image> {
        let image = vk::Image::from_raw(self.next_raw_handle());
        self.images.insert(image, name.to_string());
        self.image_descs.insert(image, *desc);
        Ok(image)
    }

    fn create_image_view(&mut self, _name: &str, image: vk::Image, _desc: &TgTextureDesc) -> VkResult<vk::ImageView> {
        if !self.images.contains_key(&image) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let view = vk::ImageView::from_raw(self.next_raw_handle());
        self.image_views.insert(view);
        Ok(view)
    }

    fn create_buffer(&mut self, name: &str, desc: &TgBufferDesc) -> VkResult<vk::Buffer> {
        let buffer = vk::Buffer::from_raw(self.next_raw_handle());
        self.buffers.insert(buffer, (name.to_string(), *desc));
        Ok(buffer)
    }

    /// 所有 mip 层的大小之和，对齐到 1 KiB
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        const ALIGNMENT: vk::DeviceSize = 1024;

        let size = self.image_descs.get(&image).map_or(0, |desc| {
            let texel = Self::texel_size(desc.format);
            (0..desc.mip_levels)
                .map(|mip| {
                    let w = (desc.width >> mip).max(1) as vk::DeviceSize;
                    let h = (desc.height >> mip).max(1) as vk::DeviceSize;
                    let d = (desc.depth >> mip).max(1) as vk::DeviceSize;
                    w * h * d * texel
                })
                .sum::<vk::DeviceSize>()
                * desc.array_layers as vk::DeviceSize
        });

        vk::MemoryRequirements {
            size: size.div_ceil(ALIGNMENT) * ALIGNMENT,
            alignment: ALIGNMENT,
            memory_type_bits: self.memory_type_bits,
        }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        const ALIGNMENT: vk::DeviceSize = 256;

        let size = self.buffers.get(&buffer).map_or(0, |(_, desc)| desc.size);
        vk::MemoryRequirements {
            size: size.div_ceil(ALIGNMENT) * ALIGNMENT,
            alignment: ALIGNMENT,
            memory_type_bits: self.memory_type_bits,
        }
    }

    fn allocate_memory(&mut self, requirements: &vk::MemoryRequirements) -> VkResult<TgAllocationId> {
        if self.fail_allocation_at == Some(self.total_allocations) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let id = TgAllocationId(self.next_raw_handle());
        self.allocations.insert(id, *requirements);
        self.total_allocations += 1;
        Ok(id)
    }

    fn bind_image_memory(
        &mut self,
        image: vk::Image,
        allocation: TgAllocationId,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let size = self.image_memory_requirements(image).size;
        self.bind(image.as_raw(), allocation, offset, size)
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: vk::Buffer,
        allocation: TgAllocationId,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let size = self.buffer_memory_requirements(buffer).size;
        self.bind(buffer.as_raw(), allocation, offset, size)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        if !self.image_views.remove(&view) {
            log::error!("RecordingContext: double free of image view {:?}", view);
        }
    }

    fn destroy_image(&mut self, image: vk::Image) {
        if self.images.remove(&image).is_none() {
            log::error!("RecordingContext: double free of image {:?}", image);
        }
        self.image_descs.remove(&image);
        self.bindings.remove(&image.as_raw());
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if self.buffers.remove(&buffer).is_none() {
            log::error!("RecordingContext: double free of buffer {:?}", buffer);
        }
        self.bindings.remove(&buffer.as_raw());
    }

    fn free_memory(&mut self, allocation: TgAllocationId) {
        if self.allocations.remove(&allocation).is_none() {
            log::error!("RecordingContext: double free of allocation {:?}", allocation);
        }
    }

    fn cmd_pipeline_barrier(
        &mut self,
        _cmd: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        self.commands.push(TgRecordedCommand::PipelineBarrier {
            images: image_barriers
                .iter()
                .map(|b| TgRecordedImageBarrier {
                    image: b.image,
                    old_layout: b.old_layout,
                    new_layout: b.new_layout,
                    src_stage: b.src_stage_mask,
                    dst_stage: b.dst_stage_mask,
                })
                .collect(),
            buffers: buffer_barriers
                .iter()
                .map(|b| TgRecordedBufferBarrier {
                    buffer: b.buffer,
                    src_stage: b.src_stage_mask,
                    dst_stage: b.dst_stage_mask,
                })
                .collect(),
        });
    }

    fn cmd_clear_color_image(
        &mut self,
        _cmd: vk::CommandBuffer,
        image: vk::Image,
        color: [f32; 4],
        _aspect: vk::ImageAspectFlags,
    ) {
        self.commands.push(TgRecordedCommand::ClearColorImage { image, color });
    }

    fn cmd_fill_buffer(&mut self, _cmd: vk::CommandBuffer, buffer: vk::Buffer, value: u32) {
        self.commands.push(TgRecordedCommand::FillBuffer { buffer, value });
    }

    fn cmd_blit_image(&mut self, _cmd: vk::CommandBuffer, src: vk::Image, dst: vk::Image, _region: &vk::ImageBlit2<'_>) {
        self.commands.push(TgRecordedCommand::BlitImage { src, dst });
    }

    fn cmd_begin_rendering(
        &mut self,
        _cmd: vk::CommandBuffer,
        render_area: vk::Rect2D,
        color_attachments: &[TgRenderingAttachment],
        depth_attachment: Option<&TgRenderingAttachment>,
    ) {
        self.commands.push(TgRecordedCommand::BeginRendering {
            render_area: render_area.extent,
            color_attachments: color_attachments.iter().map(|a| (a.view, a.load_op)).collect(),
            depth_attachment: depth_attachment.map(|a| (a.view, a.load_op)),
        });
    }

    fn cmd_end_rendering(&mut self, _cmd: vk::CommandBuffer) {
        self.commands.push(TgRecordedCommand::EndRendering);
    }

    fn cmd_begin_label(&mut self, _cmd: vk::CommandBuffer, name: &str) {
        self.commands.push(TgRecordedCommand::BeginLabel(name.to_string()));
    }

    fn cmd_end_label(&mut self, _cmd: vk::CommandBuffer) {
        self.commands.push(TgRecordedCommand::EndLabel);
    }
}
