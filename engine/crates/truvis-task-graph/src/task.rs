//! 任务定义
//!
//! 任务是一次 GPU 工作（compute dispatch、draw、transfer 或 present），
//! 按声明顺序执行，不做隐式重排。每个任务持有一组有序的资源访问记录。

use std::any::Any;

use ash::vk;
use slotmap::SecondaryMap;

use crate::handle::{TgBufferRef, TgTextureRef};
use crate::resource_state::TgQueueStage;

/// 访问方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TgAccess {
    Read,
    Write,
    ReadWrite,
}

impl TgAccess {
    #[inline]
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// 同一任务对同一资源的两次声明合并
    #[inline]
    pub fn combine(self, other: Self) -> Self {
        if self == other { self } else { Self::ReadWrite }
    }
}

/// 纹理在任务中的用途
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TgTextureUsage {
    /// 着色器访问：读为采样，写为 storage image
    Shader,
    ColorAttachment,
    DepthAttachment,
    TransferSrc,
    TransferDst,
    Present,
}

impl TgTextureUsage {
    /// 该用途需要的 vk::ImageUsageFlags
    pub fn image_usage(self, access: TgAccess) -> vk::ImageUsageFlags {
        match self {
            Self::Shader if access.is_write() => vk::ImageUsageFlags::STORAGE,
            Self::Shader => vk::ImageUsageFlags::SAMPLED,
            Self::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            Self::DepthAttachment => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            Self::TransferSrc => vk::ImageUsageFlags::TRANSFER_SRC,
            Self::TransferDst => vk::ImageUsageFlags::TRANSFER_DST,
            Self::Present => vk::ImageUsageFlags::empty(),
        }
    }

    #[inline]
    pub fn is_attachment(self) -> bool {
        matches!(self, Self::ColorAttachment | Self::DepthAttachment)
    }
}

/// 清除值
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TgClearValue {
    Color([f32; 4]),
    Depth(f32),
}

impl TgClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::Depth(depth) => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        }
    }
}

/// 纹理访问记录
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TgTextureAccess {
    pub texture: TgTextureRef,
    pub access: TgAccess,
    pub usage: TgTextureUsage,
    pub clear: Option<TgClearValue>,
    /// 该访问创建了资源（携带完整描述符）
    pub creates: bool,
}

/// 缓冲区访问记录
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TgBufferAccess {
    pub buffer: TgBufferRef,
    pub access: TgAccess,
    pub usage: vk::BufferUsageFlags,
    pub clear: Option<u32>,
    pub creates: bool,
}

/// 完整范围的 blit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgBlit {
    pub dst: TgTextureRef,
    pub src: TgTextureRef,
}

/// compute / graphics 任务的执行回调
pub type TgTaskFn = Box<dyn FnMut(&mut TgTaskContext<'_>)>;

/// 任务类型及其专属数据
pub enum TgTaskKind {
    Compute { function: Option<TgTaskFn> },
    Graphics { function: Option<TgTaskFn> },
    Transfer { blits: Vec<TgBlit> },
    Present { image: Option<TgTextureRef> },
}

impl TgTaskKind {
    #[inline]
    pub fn queue_stage(&self) -> TgQueueStage {
        match self {
            Self::Compute { .. } => TgQueueStage::Compute,
            Self::Graphics { .. } => TgQueueStage::Graphics,
            Self::Transfer { .. } => TgQueueStage::Transfer,
            Self::Present { .. } => TgQueueStage::Present,
        }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Compute { .. } => "Compute",
            Self::Graphics { .. } => "Graphics",
            Self::Transfer { .. } => "Transfer",
            Self::Present { .. } => "Present",
        }
    }
}

impl std::fmt::Debug for TgTaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compute { function } => f.debug_struct("Compute").field("has_function", &function.is_some()).finish(),
            Self::Graphics { function } => {
                f.debug_struct("Graphics").field("has_function", &function.is_some()).finish()
            }
            Self::Transfer { blits } => f.debug_struct("Transfer").field("blits", blits).finish(),
            Self::Present { image } => f.debug_struct("Present").field("image", image).finish(),
        }
    }
}

/// 任务节点
#[derive(Debug)]
pub struct TgTaskNode {
    pub name: String,
    pub textures: Vec<TgTextureAccess>,
    pub buffers: Vec<TgBufferAccess>,
    pub kind: TgTaskKind,
}

impl TgTaskNode {
    pub fn new(name: impl Into<String>, kind: TgTaskKind) -> Self {
        Self {
            name: name.into(),
            textures: Vec::new(),
            buffers: Vec::new(),
            kind,
        }
    }

    #[inline]
    pub fn attachments(&self) -> impl Iterator<Item = &TgTextureAccess> {
        self.textures.iter().filter(|t| t.usage.is_attachment())
    }
}

/// 任务执行时的上下文
///
/// 提供命令缓冲区、逻辑句柄到物理资源的查询，以及调用方传入的每帧数据。
pub struct TgTaskContext<'a> {
    pub cmd: vk::CommandBuffer,

    pub(crate) textures: &'a SecondaryMap<TgTextureRef, (vk::Image, vk::ImageView)>,
    pub(crate) buffers: &'a SecondaryMap<TgBufferRef, vk::Buffer>,
    pub(crate) render_area: Option<vk::Extent2D>,
    pub(crate) user_data: Option<&'a mut dyn Any>,
}

impl TgTaskContext<'_> {
    #[inline]
    pub fn texture(&self, texture: TgTextureRef) -> Option<vk::Image> {
        self.textures.get(texture).map(|(image, _)| *image)
    }

    #[inline]
    pub fn texture_view(&self, texture: TgTextureRef) -> Option<vk::ImageView> {
        self.textures.get(texture).map(|(_, view)| *view)
    }

    #[inline]
    pub fn buffer(&self, buffer: TgBufferRef) -> Option<vk::Buffer> {
        self.buffers.get(buffer).copied()
    }

    /// graphics 任务的渲染区域（所有附件尺寸的最小值）
    #[inline]
    pub fn render_area(&self) -> Option<vk::Extent2D> {
        self.render_area
    }

    /// 获取调用方传入的每帧数据
    pub fn user_data<T: Any>(&mut self) -> Option<&mut T> {
        self.user_data.as_deref_mut().and_then(|data| data.downcast_mut::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_combine() {
        assert_eq!(TgAccess::Read.combine(TgAccess::Read), TgAccess::Read);
        assert_eq!(TgAccess::Read.combine(TgAccess::Write), TgAccess::ReadWrite);
        assert_eq!(TgAccess::Write.combine(TgAccess::ReadWrite), TgAccess::ReadWrite);
        assert!(TgAccess::ReadWrite.is_read() && TgAccess::ReadWrite.is_write());
    }

    #[test]
    fn test_texture_usage_flags() {
        assert_eq!(TgTextureUsage::Shader.image_usage(TgAccess::Read), vk::ImageUsageFlags::SAMPLED);
        assert_eq!(TgTextureUsage::Shader.image_usage(TgAccess::Write), vk::ImageUsageFlags::STORAGE);
        assert_eq!(
            TgTextureUsage::ColorAttachment.image_usage(TgAccess::Write),
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        );
        assert_eq!(TgTextureUsage::TransferSrc.image_usage(TgAccess::Read), vk::ImageUsageFlags::TRANSFER_SRC);
    }

    #[test]
    fn test_context_user_data() {
        let textures = SecondaryMap::new();
        let buffers = SecondaryMap::new();
        let mut frame_index = 7u32;
        let mut ctx = TgTaskContext {
            cmd: vk::CommandBuffer::null(),
            textures: &textures,
            buffers: &buffers,
            render_area: None,
            user_data: Some(&mut frame_index as &mut dyn Any),
        };

        assert!(ctx.user_data::<String>().is_none());
        if let Some(v) = ctx.user_data::<u32>() {
            *v += 1;
        }
        drop(ctx);
        assert_eq!(frame_index, 8);
    }
}
