//! 逻辑资源注册表
//!
//! 管理 TaskGraph 中声明的所有逻辑纹理和缓冲区。
//! 资源按注册顺序存放在 SlotMap 中（不会删除元素，因此遍历顺序即注册顺序）。

use ash::vk;
use slotmap::SlotMap;

use crate::compile_info::TgCompileInfo;
use crate::handle::{TgBufferRef, TgTextureRef};
use crate::lifetime::TgLifetime;
use crate::resource_desc::{TgBufferDesc, TgTextureDesc};

/// 外部纹理：由协作方每帧提供的 image 与 view
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TgExternalTexture {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

pub type TgExternalTextureFn = Box<dyn FnMut() -> TgExternalTexture>;
pub type TgExternalBufferFn = Box<dyn FnMut() -> vk::Buffer>;

/// 逻辑纹理
pub struct TgLogicalTexture {
    pub name: String,
    pub desc: TgTextureDesc,

    /// builder 在记录访问时顺带扩展的生命周期
    pub(crate) lifetime: Option<TgLifetime>,

    pub(crate) external: Option<TgExternalTextureFn>,
    pub(crate) is_presentation: bool,
}

impl TgLogicalTexture {
    #[inline]
    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    #[inline]
    pub fn is_presentation(&self) -> bool {
        self.is_presentation
    }

    #[inline]
    pub fn lifetime(&self) -> Option<TgLifetime> {
        self.lifetime
    }
}

/// 逻辑缓冲区
pub struct TgLogicalBuffer {
    pub name: String,
    pub desc: TgBufferDesc,

    pub(crate) lifetime: Option<TgLifetime>,

    pub(crate) external: Option<TgExternalBufferFn>,
}

impl TgLogicalBuffer {
    #[inline]
    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    #[inline]
    pub fn lifetime(&self) -> Option<TgLifetime> {
        self.lifetime
    }
}

/// 资源注册表
#[derive(Default)]
pub struct TgResourceTable {
    textures: SlotMap<TgTextureRef, TgLogicalTexture>,
    buffers: SlotMap<TgBufferRef, TgLogicalBuffer>,
}

// new & init
impl TgResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册由 TaskGraph 负责分配的纹理
    pub fn register_texture(&mut self, name: impl Into<String>, desc: TgTextureDesc) -> TgTextureRef {
        self.textures.insert(TgLogicalTexture {
            name: name.into(),
            desc,
            lifetime: None,
            external: None,
            is_presentation: false,
        })
    }

    /// 注册外部纹理，执行时通过回调获取 image
    pub fn register_external_texture(
        &mut self,
        name: impl Into<String>,
        desc: TgTextureDesc,
        resolve: TgExternalTextureFn,
    ) -> TgTextureRef {
        self.textures.insert(TgLogicalTexture {
            name: name.into(),
            desc,
            lifetime: None,
            external: Some(resolve),
            is_presentation: false,
        })
    }

    pub fn register_buffer(&mut self, name: impl Into<String>, desc: TgBufferDesc) -> TgBufferRef {
        self.buffers.insert(TgLogicalBuffer {
            name: name.into(),
            desc,
            lifetime: None,
            external: None,
        })
    }

    pub fn register_external_buffer(
        &mut self,
        name: impl Into<String>,
        desc: TgBufferDesc,
        resolve: TgExternalBufferFn,
    ) -> TgBufferRef {
        self.buffers.insert(TgLogicalBuffer {
            name: name.into(),
            desc,
            lifetime: None,
            external: Some(resolve),
        })
    }

    /// 标记为呈现纹理（swapchain image）
    pub(crate) fn mark_presentation(&mut self, texture: TgTextureRef) {
        if let Some(tex) = self.textures.get_mut(texture) {
            tex.is_presentation = true;
        }
    }
}

// getter
impl TgResourceTable {
    #[inline]
    pub fn get_texture(&self, texture: TgTextureRef) -> Option<&TgLogicalTexture> {
        self.textures.get(texture)
    }

    #[inline]
    pub fn get_buffer(&self, buffer: TgBufferRef) -> Option<&TgLogicalBuffer> {
        self.buffers.get(buffer)
    }

    #[inline]
    pub fn iter_textures(&self) -> impl Iterator<Item = (TgTextureRef, &TgLogicalTexture)> {
        self.textures.iter()
    }

    #[inline]
    pub fn iter_buffers(&self) -> impl Iterator<Item = (TgBufferRef, &TgLogicalBuffer)> {
        self.buffers.iter()
    }

    #[inline]
    pub(crate) fn iter_textures_mut(&mut self) -> impl Iterator<Item = (TgTextureRef, &mut TgLogicalTexture)> {
        self.textures.iter_mut()
    }

    #[inline]
    pub(crate) fn iter_buffers_mut(&mut self) -> impl Iterator<Item = (TgBufferRef, &mut TgLogicalBuffer)> {
        self.buffers.iter_mut()
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn texture_name(&self, texture: TgTextureRef) -> &str {
        self.textures.get(texture).map_or("<unknown texture>", |t| t.name.as_str())
    }

    #[inline]
    pub fn buffer_name(&self, buffer: TgBufferRef) -> &str {
        self.buffers.get(buffer).map_or("<unknown buffer>", |b| b.name.as_str())
    }
}

// tools
impl TgResourceTable {
    /// 编译时解析所有纹理的相对尺寸、mip 链和呈现格式
    pub(crate) fn resolve(&mut self, info: &TgCompileInfo) {
        for (_, texture) in self.textures.iter_mut() {
            texture.desc = texture.desc.resolve(info);
            if texture.is_presentation && texture.desc.format == vk::Format::UNDEFINED {
                texture.desc.format = info.swapchain_format;
            }
        }
    }

    /// 记录一次访问：扩展生命周期
    pub(crate) fn touch_texture(&mut self, texture: TgTextureRef, task_index: usize, usage: vk::ImageUsageFlags) {
        if let Some(tex) = self.textures.get_mut(texture) {
            tex.desc.usage |= usage;
            extend_lifetime(&mut tex.lifetime, task_index);
        }
    }

    pub(crate) fn touch_buffer(&mut self, buffer: TgBufferRef, task_index: usize, usage: vk::BufferUsageFlags) {
        if let Some(buf) = self.buffers.get_mut(buffer) {
            buf.desc.usage |= usage;
            extend_lifetime(&mut buf.lifetime, task_index);
        }
    }
}

fn extend_lifetime(lifetime: &mut Option<TgLifetime>, task_index: usize) {
    match lifetime {
        Some(lifetime) => lifetime.extend(task_index),
        None => *lifetime = Some(TgLifetime::new(task_index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_desc::SIZE_DISPLAY;

    #[test]
    fn test_register_and_touch() {
        let mut table = TgResourceTable::new();
        let tex = table.register_texture("gbuffer", TgTextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, 64, 64));
        let buf = table.register_buffer("indices", TgBufferDesc::new(1024));

        table.touch_texture(tex, 3, vk::ImageUsageFlags::STORAGE);
        table.touch_texture(tex, 1, vk::ImageUsageFlags::SAMPLED);
        table.touch_buffer(buf, 2, vk::BufferUsageFlags::INDEX_BUFFER);

        let tex = table.get_texture(tex).unwrap();
        assert_eq!(tex.lifetime(), Some(TgLifetime { first_task: 1, last_task: 3 }));
        assert_eq!(tex.desc.usage, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED);
        assert!(!tex.is_external());

        let buf = table.get_buffer(buf).unwrap();
        assert_eq!(buf.lifetime(), Some(TgLifetime::new(2)));
        assert_eq!(buf.desc.usage, vk::BufferUsageFlags::INDEX_BUFFER);
    }

    #[test]
    fn test_iteration_follows_registration_order() {
        let mut table = TgResourceTable::new();
        let names = ["a", "b", "c", "d"];
        for name in names {
            table.register_texture(name, TgTextureDesc::new_2d(vk::Format::R8_UNORM, 8, 8));
        }
        let iterated: Vec<_> = table.iter_textures().map(|(_, t)| t.name.as_str()).collect();
        assert_eq!(iterated, names);
    }

    #[test]
    fn test_resolve_presentation_format() {
        let mut table = TgResourceTable::new();
        let swapchain = table.register_external_texture(
            "swapchain",
            TgTextureDesc::new_2d(vk::Format::UNDEFINED, SIZE_DISPLAY, SIZE_DISPLAY),
            Box::new(TgExternalTexture::default),
        );
        table.mark_presentation(swapchain);

        let info = TgCompileInfo {
            display_width: 800,
            display_height: 600,
            swapchain_format: vk::Format::B8G8R8A8_SRGB,
            ..Default::default()
        };
        table.resolve(&info);

        let swapchain = table.get_texture(swapchain).unwrap();
        assert!(swapchain.is_external() && swapchain.is_presentation());
        assert_eq!(swapchain.desc.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(swapchain.desc.extent_2d(), vk::Extent2D { width: 800, height: 600 });
    }
}
