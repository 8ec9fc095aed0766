//! 图形 API 抽象
//!
//! TaskGraph 不依赖全局设备单例，编译、执行和释放都通过显式传入的 `GraphicsContext` 完成。
//!
//! - `VulkanContext`: 基于 ash + vk-mem 的真实实现
//! - `RecordingContext`: 纯 CPU 实现，记录所有调用，用于测试和离线查看执行计划

mod recording;
mod vulkan;

pub use recording::{RecordingContext, TgRecordedBufferBarrier, TgRecordedCommand, TgRecordedImageBarrier};
pub use vulkan::VulkanContext;

use ash::prelude::VkResult;
use ash::vk;

use crate::resource_desc::{TgBufferDesc, TgTextureDesc};

/// 由 context 分配的一块显存
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TgAllocationId(pub u64);

/// 一个 dynamic rendering 附件
#[derive(Clone, Copy)]
pub struct TgRenderingAttachment {
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: vk::ClearValue,
}

impl TgRenderingAttachment {
    pub fn to_vk(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(self.clear_value)
    }
}

/// TaskGraph 需要的全部图形 API 能力
///
/// 创建类方法返回 `VkResult`，失败时由编译流程负责回收已创建的对象。
pub trait GraphicsContext {
    // ============ 资源创建 ============

    /// 创建不绑定内存的 image
    fn create_image(&mut self, name: &str, desc: &TgTextureDesc) -> VkResult<vk::Image>;

    /// 覆盖整个 image 的 view，必须在内存绑定之后调用
    fn create_image_view(&mut self, name: &str, image: vk::Image, desc: &TgTextureDesc) -> VkResult<vk::ImageView>;

    /// 创建不绑定内存的 buffer
    fn create_buffer(&mut self, name: &str, desc: &TgBufferDesc) -> VkResult<vk::Buffer>;

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    /// 分配一整块显存，之后由多个资源按偏移绑定
    fn allocate_memory(&mut self, requirements: &vk::MemoryRequirements) -> VkResult<TgAllocationId>;

    fn bind_image_memory(
        &mut self,
        image: vk::Image,
        allocation: TgAllocationId,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;

    fn bind_buffer_memory(
        &mut self,
        buffer: vk::Buffer,
        allocation: TgAllocationId,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;

    // ============ 资源销毁 ============

    fn destroy_image_view(&mut self, view: vk::ImageView);

    fn destroy_image(&mut self, image: vk::Image);

    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    fn free_memory(&mut self, allocation: TgAllocationId);

    // ============ 命令录制 ============

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    fn cmd_pipeline_barrier(
        &mut self,
        cmd: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    );

    /// image 需处于 TRANSFER_DST_OPTIMAL
    ///
    /// - command type: action
    /// - supported queue types: graphics, compute
    fn cmd_clear_color_image(
        &mut self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        color: [f32; 4],
        aspect: vk::ImageAspectFlags,
    );

    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    fn cmd_fill_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, value: u32);

    /// src 处于 TRANSFER_SRC_OPTIMAL，dst 处于 TRANSFER_DST_OPTIMAL
    ///
    /// - command type: action
    /// - supported queue types: graphics
    fn cmd_blit_image(&mut self, cmd: vk::CommandBuffer, src: vk::Image, dst: vk::Image, region: &vk::ImageBlit2<'_>);

    /// - command type: action, state
    /// - supported queue types: graphics
    fn cmd_begin_rendering(
        &mut self,
        cmd: vk::CommandBuffer,
        render_area: vk::Rect2D,
        color_attachments: &[TgRenderingAttachment],
        depth_attachment: Option<&TgRenderingAttachment>,
    );

    /// - command type: action, state
    /// - supported queue types: graphics
    fn cmd_end_rendering(&mut self, cmd: vk::CommandBuffer);

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    fn cmd_begin_label(&mut self, cmd: vk::CommandBuffer, name: &str);

    fn cmd_end_label(&mut self, cmd: vk::CommandBuffer);
}

/// 覆盖全部 mip 与 layer 的子资源范围
#[inline]
pub(crate) fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}
