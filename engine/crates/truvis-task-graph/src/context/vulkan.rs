use std::collections::HashMap;
use std::ffi::CString;

use ash::prelude::VkResult;
use ash::vk;
use vk_mem::Alloc;

use super::{GraphicsContext, TgAllocationId, TgRenderingAttachment, full_subresource_range};
use crate::resource_desc::{TgBufferDesc, TgTextureDesc};
use crate::resource_state::infer_image_aspect;

/// 基于 ash 与 vk-mem 的 `GraphicsContext`
///
/// 设备、分配器由调用方持有；context 只记录自己分配的显存块。
/// 需要 Vulkan 1.3（synchronization2 与 dynamic rendering）。
pub struct VulkanContext<'a> {
    device: &'a ash::Device,
    allocator: &'a vk_mem::Allocator,
    debug_utils: Option<&'a ash::ext::debug_utils::Device>,

    allocations: HashMap<TgAllocationId, vk_mem::Allocation>,
    next_allocation_id: u64,
}

// new & init
impl<'a> VulkanContext<'a> {
    pub fn new(
        device: &'a ash::Device,
        allocator: &'a vk_mem::Allocator,
        debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    ) -> Self {
        Self {
            device,
            allocator,
            debug_utils,
            allocations: HashMap::new(),
            next_allocation_id: 0,
        }
    }
}

// getter
impl VulkanContext<'_> {
    #[inline]
    pub fn device(&self) -> &ash::Device {
        self.device
    }

    #[inline]
    pub fn live_allocation_count(&self) -> usize {
        self.allocations.len()
    }
}

// tools
impl VulkanContext<'_> {
    fn set_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: &str) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        let name = label_name(name);
        let result = unsafe {
            debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            )
        };
        if let Err(e) = result {
            log::warn!("Failed to set debug name {:?}: {:?}", name, e);
        }
    }

    fn allocation_mut(&mut self, allocation: TgAllocationId) -> VkResult<&mut vk_mem::Allocation> {
        self.allocations.get_mut(&allocation).ok_or(vk::Result::ERROR_UNKNOWN)
    }
}

impl GraphicsContext for VulkanContext<'_> {
    fn create_image(&mut self, name: &str, desc: &TgTextureDesc) -> VkResult<vk::Image> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type())
            .format(desc.format)
            .extent(desc.extent())
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None)? };
        self.set_debug_name(image, &format!("TgImage::{name}"));
        Ok(image)
    }

    fn create_image_view(&mut self, name: &str, image: vk::Image, desc: &TgTextureDesc) -> VkResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.view_type())
            .format(desc.format)
            .subresource_range(full_subresource_range(infer_image_aspect(desc.format)));

        let view = unsafe { self.device.create_image_view(&create_info, None)? };
        self.set_debug_name(view, &format!("TgImageView::{name}"));
        Ok(view)
    }

    fn create_buffer(&mut self, name: &str, desc: &TgBufferDesc) -> VkResult<vk::Buffer> {
        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&create_info, None)? };
        self.set_debug_name(buffer, &format!("TgBuffer::{name}"));
        Ok(buffer)
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn allocate_memory(&mut self, requirements: &vk::MemoryRequirements) -> VkResult<TgAllocationId> {
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let allocation = unsafe { self.allocator.allocate_memory(requirements, &alloc_ci)? };

        let id = TgAllocationId(self.next_allocation_id);
        self.next_allocation_id += 1;
        self.allocations.insert(id, allocation);
        Ok(id)
    }

    fn bind_image_memory(
        &mut self,
        image: vk::Image,
        allocation: TgAllocationId,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let allocator = self.allocator;
        let allocation = self.allocation_mut(allocation)?;
        unsafe { allocator.bind_image_memory2(allocation, offset, image, std::ptr::null()) }
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: vk::Buffer,
        allocation: TgAllocationId,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let allocator = self.allocator;
        let allocation = self.allocation_mut(allocation)?;
        unsafe { allocator.bind_buffer_memory2(allocation, offset, buffer, std::ptr::null()) }
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn destroy_image(&mut self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn free_memory(&mut self, allocation: TgAllocationId) {
        match self.allocations.remove(&allocation) {
            Some(mut allocation) => unsafe { self.allocator.free_memory(&mut allocation) },
            None => log::warn!("VulkanContext: free of unknown allocation {:?}", allocation),
        }
    }

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(image_barriers)
            .buffer_memory_barriers(buffer_barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(cmd, &dependency_info);
        }
    }

    fn cmd_clear_color_image(
        &mut self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        color: [f32; 4],
        aspect: vk::ImageAspectFlags,
    ) {
        unsafe {
            self.device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearColorValue { float32: color },
                &[full_subresource_range(aspect)],
            );
        }
    }

    fn cmd_fill_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, value: u32) {
        unsafe {
            self.device.cmd_fill_buffer(cmd, buffer, 0, vk::WHOLE_SIZE, value);
        }
    }

    fn cmd_blit_image(&mut self, cmd: vk::CommandBuffer, src: vk::Image, dst: vk::Image, region: &vk::ImageBlit2<'_>) {
        let regions = std::slice::from_ref(region);
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(regions)
            .filter(vk::Filter::LINEAR);
        unsafe {
            self.device.cmd_blit_image2(cmd, &blit_info);
        }
    }

    fn cmd_begin_rendering(
        &mut self,
        cmd: vk::CommandBuffer,
        render_area: vk::Rect2D,
        color_attachments: &[TgRenderingAttachment],
        depth_attachment: Option<&TgRenderingAttachment>,
    ) {
        let color_infos: Vec<_> = color_attachments.iter().map(TgRenderingAttachment::to_vk).collect();
        let depth_info = depth_attachment.map(TgRenderingAttachment::to_vk);

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth_info) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_info);
        }

        unsafe {
            self.device.cmd_begin_rendering(cmd, &rendering_info);
        }
    }

    fn cmd_end_rendering(&mut self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_end_rendering(cmd);
        }
    }

    fn cmd_begin_label(&mut self, cmd: vk::CommandBuffer, name: &str) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        // 必须与 cmd_end_label 成对，名字中的 NUL 替换掉而不是跳过
        let name = label_name(name);
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                cmd,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color([0.2, 0.6, 0.9, 1.0]),
            );
        }
    }

    fn cmd_end_label(&mut self, cmd: vk::CommandBuffer) {
        if let Some(debug_utils) = self.debug_utils {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(cmd);
            }
        }
    }
}

fn label_name(name: &str) -> CString {
    CString::new(name.replace('\0', " ")).unwrap_or_default()
}

impl Drop for VulkanContext<'_> {
    fn drop(&mut self) {
        if !self.allocations.is_empty() {
            log::warn!(
                "VulkanContext dropped with {} live allocations, call CompiledTaskGraph::free first",
                self.allocations.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_name_replaces_interior_nul() {
        assert_eq!(label_name("gbuffer").as_bytes(), b"gbuffer");
        assert_eq!(label_name("bad\0name").as_bytes(), b"bad name");
    }
}
