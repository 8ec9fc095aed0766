//! 资源描述
//!
//! 纹理的宽高可以是绝对值，也可以是相对尺寸标记：
//! 高两位选择"相对场景分辨率"或"相对显示分辨率"，低 30 位是可选的除数（0 表示不除）。

use ash::vk;

use crate::compile_info::TgCompileInfo;

/// 相对场景分辨率
pub const SIZE_SCENE: u32 = 1 << 30;
/// 相对显示分辨率
pub const SIZE_DISPLAY: u32 = 1 << 31;

const RELATIVE_SIZE_MASK: u32 = SIZE_SCENE | SIZE_DISPLAY;

/// 自动生成完整 mip 链：`1 + floor(log2(max(width, height)))`
pub const AUTO_FULL_MIP_CHAIN: u32 = u32::MAX;

/// 场景分辨率的 1/x
#[inline]
pub const fn size_scene_div(x: u32) -> u32 {
    SIZE_SCENE | x
}

/// 显示分辨率的 1/x
#[inline]
pub const fn size_display_div(x: u32) -> u32 {
    SIZE_DISPLAY | x
}

/// 解析相对尺寸，非相对尺寸原样返回
pub const fn resolve_relative_size(scene: u32, display: u32, rel_size: u32) -> u32 {
    let divisor = rel_size & !RELATIVE_SIZE_MASK;
    if rel_size & SIZE_SCENE != 0 {
        if divisor == 0 { scene } else { scene / divisor }
    } else if rel_size & SIZE_DISPLAY != 0 {
        if divisor == 0 { display } else { display / divisor }
    } else {
        rel_size
    }
}

/// 完整 mip 链的层数
#[inline]
pub fn full_mip_chain_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// 纹理描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgTextureDesc {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    /// 所有任务需要的 usage 之并，由 builder 累加
    pub usage: vk::ImageUsageFlags,
}

// new & init
impl TgTextureDesc {
    pub fn new_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            depth: 1,
            array_layers: 1,
            mip_levels: 1,
            usage: vk::ImageUsageFlags::empty(),
        }
    }

    #[inline]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    #[inline]
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }
}

// getter
impl TgTextureDesc {
    #[inline]
    pub fn image_type(&self) -> vk::ImageType {
        if self.depth > 1 { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D }
    }

    #[inline]
    pub fn view_type(&self) -> vk::ImageViewType {
        if self.depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else if self.array_layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// 除 usage 以外的字段完全一致
    pub fn same_shape(&self, other: &Self) -> bool {
        self.format == other.format
            && self.width == other.width
            && self.height == other.height
            && self.depth == other.depth
            && self.array_layers == other.array_layers
            && self.mip_levels == other.mip_levels
    }

    #[inline]
    pub fn is_relative(&self) -> bool {
        self.width & RELATIVE_SIZE_MASK != 0 || self.height & RELATIVE_SIZE_MASK != 0
    }
}

// tools
impl TgTextureDesc {
    /// 解析相对尺寸和自动 mip 链
    ///
    /// 解析结果至少为 1，避免除数大于分辨率时得到空图像。
    pub fn resolve(&self, info: &TgCompileInfo) -> Self {
        let width = resolve_relative_size(info.scene_width, info.display_width, self.width).max(1);
        let height = resolve_relative_size(info.scene_height, info.display_height, self.height).max(1);
        let mip_levels = if self.mip_levels == AUTO_FULL_MIP_CHAIN {
            full_mip_chain_levels(width, height)
        } else {
            self.mip_levels.max(1)
        };

        Self {
            width,
            height,
            mip_levels,
            depth: self.depth.max(1),
            array_layers: self.array_layers.max(1),
            ..*self
        }
    }
}

/// 缓冲区描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TgBufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl TgBufferDesc {
    pub fn new(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::empty(),
        }
    }

    #[inline]
    pub fn with_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    #[inline]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.size == other.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_size() {
        assert_eq!(resolve_relative_size(1280, 1920, SIZE_SCENE), 1280);
        assert_eq!(resolve_relative_size(1280, 1920, SIZE_DISPLAY), 1920);
        assert_eq!(resolve_relative_size(1280, 1920, size_scene_div(2)), 640);
        assert_eq!(resolve_relative_size(1280, 1920, size_display_div(4)), 480);
        assert_eq!(resolve_relative_size(1280, 1920, 300), 300);
    }

    #[test]
    fn test_full_mip_chain() {
        assert_eq!(full_mip_chain_levels(1, 1), 1);
        assert_eq!(full_mip_chain_levels(512, 512), 10);
        assert_eq!(full_mip_chain_levels(1920, 1080), 11);
        assert_eq!(full_mip_chain_levels(0, 0), 1);
    }

    #[test]
    fn test_texture_desc_resolve() {
        let info = TgCompileInfo {
            scene_width: 1600,
            scene_height: 900,
            display_width: 2560,
            display_height: 1440,
            ..Default::default()
        };

        let desc = TgTextureDesc::new_2d(vk::Format::R16G16B16A16_SFLOAT, size_scene_div(2), SIZE_DISPLAY)
            .with_mip_levels(AUTO_FULL_MIP_CHAIN);
        assert!(desc.is_relative());

        let resolved = desc.resolve(&info);
        assert!(!resolved.is_relative());
        assert_eq!(resolved.width, 800);
        assert_eq!(resolved.height, 1440);
        assert_eq!(resolved.mip_levels, 11);
        assert_eq!(resolved.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn test_resolve_never_yields_empty_extent() {
        let info = TgCompileInfo {
            scene_width: 4,
            scene_height: 4,
            ..Default::default()
        };
        let desc = TgTextureDesc::new_2d(vk::Format::R8_UNORM, size_scene_div(16), size_scene_div(16));
        let resolved = desc.resolve(&info);
        assert_eq!(resolved.extent_2d(), vk::Extent2D { width: 1, height: 1 });
    }

    #[test]
    fn test_same_shape_ignores_usage() {
        let a = TgTextureDesc::new_2d(vk::Format::R8_UNORM, 256, 256).with_usage(vk::ImageUsageFlags::STORAGE);
        let b = TgTextureDesc::new_2d(vk::Format::R8_UNORM, 256, 256).with_usage(vk::ImageUsageFlags::SAMPLED);
        let c = TgTextureDesc::new_2d(vk::Format::R8_UNORM, 256, 128);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
        assert_eq!(a.image_type(), vk::ImageType::TYPE_2D);
        assert_eq!(a.with_depth(4).image_type(), vk::ImageType::TYPE_3D);
    }
}
