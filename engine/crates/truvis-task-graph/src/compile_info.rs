use ash::vk;

/// 编译参数
///
/// 相对尺寸（`SIZE_SCENE` / `SIZE_DISPLAY`）在编译时根据这里的分辨率解析。
#[derive(Clone, Debug)]
pub struct TgCompileInfo {
    pub scene_width: u32,
    pub scene_height: u32,
    pub display_width: u32,
    pub display_height: u32,

    /// 呈现纹理的格式（`register_presentation_texture` 注册的纹理使用该格式）
    pub swapchain_format: vk::Format,

    /// 无窗口运行：此时任何任务都不能写入呈现纹理
    pub headless: bool,

    /// 是否合并描述符相同、生命周期不重叠的逻辑资源
    pub merge_resources: bool,
    /// 是否在同一块显存中按时间段装箱多个资源
    pub alias_memory: bool,

    /// 编译完成后打印统计信息
    pub show_stats: bool,
}

impl Default for TgCompileInfo {
    fn default() -> Self {
        Self {
            scene_width: 1920,
            scene_height: 1080,
            display_width: 1920,
            display_height: 1080,
            swapchain_format: vk::Format::B8G8R8A8_UNORM,
            headless: false,
            merge_resources: true,
            alias_memory: true,
            show_stats: false,
        }
    }
}

impl TgCompileInfo {
    #[inline]
    pub fn scene_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.scene_width,
            height: self.scene_height,
        }
    }

    #[inline]
    pub fn display_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.display_width,
            height: self.display_height,
        }
    }
}
