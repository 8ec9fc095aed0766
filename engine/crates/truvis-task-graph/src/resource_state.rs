//! 资源访问状态
//!
//! 封装 Vulkan 的 pipeline stage、access mask 和 image layout，
//! 提供预定义的常用状态组合，以及按任务类型推导状态的辅助函数。

use ash::vk;

use crate::task::{TgAccess, TgTextureUsage};

/// 任务类型对应的着色器 stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TgQueueStage {
    Compute,
    Graphics,
    Transfer,
    Present,
}

impl TgQueueStage {
    #[inline]
    pub fn shader_stage(self) -> vk::PipelineStageFlags2 {
        match self {
            Self::Compute => vk::PipelineStageFlags2::COMPUTE_SHADER,
            Self::Graphics => vk::PipelineStageFlags2::ALL_GRAPHICS,
            Self::Transfer => vk::PipelineStageFlags2::TRANSFER,
            Self::Present => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        }
    }
}

/// 图像资源状态
///
/// 描述图像在某个任务中的使用方式，用于自动计算 barrier。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TgImageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for TgImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl TgImageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    // ============ 预定义状态常量 ============

    /// 未定义状态（每帧开始时所有图像都处于该状态）
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    /// 颜色附件输出
    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 颜色附件读写（load 之前的内容，如 blend）
    pub const COLOR_ATTACHMENT_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 着色器只读采样（计算着色器）
    pub const SHADER_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 着色器只读采样（图形管线任意着色器）
    pub const SHADER_READ_GRAPHICS: Self = Self::new(
        vk::PipelineStageFlags2::ALL_GRAPHICS,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 存储图像写入（计算着色器）
    pub const STORAGE_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    /// 存储图像读写（计算着色器）
    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// 存储图像写入（图形管线）
    pub const STORAGE_WRITE_GRAPHICS: Self = Self::new(
        vk::PipelineStageFlags2::ALL_GRAPHICS,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    /// 存储图像读写（图形管线）
    pub const STORAGE_READ_WRITE_GRAPHICS: Self = Self::new(
        vk::PipelineStageFlags2::ALL_GRAPHICS,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// 传输源
    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    /// 传输目标（blit 目标、clear 目标）
    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// 呈现（swapchain image）
    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    const DEPTH_TEST_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
    );

    // ============ 按格式推导的状态 ============

    /// 深度附件写入，layout 取决于格式是否带 stencil
    pub fn depth_attachment(format: vk::Format, load_previous: bool) -> Self {
        let access = if load_previous {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        } else {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        };
        let layout = if format_has_stencil(format) {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        };
        Self::new(Self::DEPTH_TEST_STAGES, access, layout)
    }

    /// 着色器采样读取；深度格式使用对应的只读深度 layout
    pub fn sampled_read(format: vk::Format, stage: vk::PipelineStageFlags2) -> Self {
        let layout = if format_has_stencil(format) {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        } else if format_has_depth(format) {
            vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        };
        Self::new(stage, vk::AccessFlags2::SHADER_SAMPLED_READ, layout)
    }

    /// 根据任务类型、访问方式与用途推导所需状态
    pub fn for_access(queue: TgQueueStage, usage: TgTextureUsage, access: TgAccess, format: vk::Format) -> Self {
        match usage {
            TgTextureUsage::Shader => match (queue, access) {
                (TgQueueStage::Compute, TgAccess::Read) => Self::sampled_read(format, Self::SHADER_READ_COMPUTE.stage),
                (TgQueueStage::Compute, TgAccess::Write) => Self::STORAGE_WRITE_COMPUTE,
                (TgQueueStage::Compute, TgAccess::ReadWrite) => Self::STORAGE_READ_WRITE_COMPUTE,
                (_, TgAccess::Read) => Self::sampled_read(format, Self::SHADER_READ_GRAPHICS.stage),
                (_, TgAccess::Write) => Self::STORAGE_WRITE_GRAPHICS,
                (_, TgAccess::ReadWrite) => Self::STORAGE_READ_WRITE_GRAPHICS,
            },
            TgTextureUsage::ColorAttachment => {
                if access.is_read() {
                    Self::COLOR_ATTACHMENT_READ_WRITE
                } else {
                    Self::COLOR_ATTACHMENT_WRITE
                }
            }
            TgTextureUsage::DepthAttachment => Self::depth_attachment(format, access.is_read()),
            TgTextureUsage::TransferSrc => Self::TRANSFER_SRC,
            TgTextureUsage::TransferDst => Self::TRANSFER_DST,
            TgTextureUsage::Present => Self::PRESENT,
        }
    }

    // ============ 辅助方法 ============

    /// 写操作的 access flags
    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    /// 用于 barrier src 的 access（读操作不需要 make available）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & Self::WRITE_ACCESS
    }
}

/// 缓冲区资源状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TgBufferState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl Default for TgBufferState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl TgBufferState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    // ============ 预定义状态常量 ============

    pub const UNDEFINED: Self = Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);

    pub const VERTEX_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);

    pub const INDEX_BUFFER: Self = Self::new(vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ);

    pub const INDIRECT_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::DRAW_INDIRECT, vk::AccessFlags2::INDIRECT_COMMAND_READ);

    /// 传输目标（fill buffer）
    pub const TRANSFER_DST: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);

    // ============ 按用途推导的状态 ============

    /// 根据读取时声明的 usage 推导 stage 与 access
    ///
    /// 多个 usage 同时存在时合并所有 stage 与 access。
    pub fn for_read(queue: TgQueueStage, usage: vk::BufferUsageFlags) -> Self {
        let shader_stage = queue.shader_stage();
        let mut stage = vk::PipelineStageFlags2::NONE;
        let mut access = vk::AccessFlags2::NONE;

        if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
            stage |= Self::INDEX_BUFFER.stage;
            access |= Self::INDEX_BUFFER.access;
        }
        if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
            stage |= Self::VERTEX_BUFFER.stage;
            access |= Self::VERTEX_BUFFER.access;
        }
        if usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER) {
            stage |= Self::INDIRECT_BUFFER.stage;
            access |= Self::INDIRECT_BUFFER.access;
        }
        if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            stage |= shader_stage;
            access |= vk::AccessFlags2::UNIFORM_READ;
        }
        if usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) || stage.is_empty() {
            stage |= shader_stage;
            access |= vk::AccessFlags2::SHADER_STORAGE_READ;
        }

        Self::new(stage, access)
    }

    pub fn for_write(queue: TgQueueStage, access: TgAccess) -> Self {
        let stage = queue.shader_stage();
        if queue == TgQueueStage::Transfer {
            return Self::TRANSFER_DST;
        }
        if access.is_read() {
            Self::new(stage, vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE)
        } else {
            Self::new(stage, vk::AccessFlags2::SHADER_STORAGE_WRITE)
        }
    }

    // ============ 辅助方法 ============

    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & Self::WRITE_ACCESS
    }
}

// ============ 格式辅助 ============

pub fn format_has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn format_has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// 根据 format 推断图像的 aspect flags
pub fn infer_image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match (format_has_depth(format), format_has_stencil(format)) {
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        (false, true) => vk::ImageAspectFlags::STENCIL,
        (false, false) => vk::ImageAspectFlags::COLOR,
    }
}
