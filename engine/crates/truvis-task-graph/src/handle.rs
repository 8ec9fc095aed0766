//! TaskGraph 逻辑资源句柄
//!
//! 句柄是 `TgResourceTable` 中的代际索引，与物理资源（vk::Image / vk::Buffer）分离。
//! 编译后通过 `CompiledTaskGraph` 的查询接口换取物理句柄。

use slotmap::new_key_type;

new_key_type! {
    /// 逻辑纹理句柄
    pub struct TgTextureRef;

    /// 逻辑缓冲区句柄
    pub struct TgBufferRef;
}

/// 纹理或缓冲区句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TgResourceRef {
    Texture(TgTextureRef),
    Buffer(TgBufferRef),
}

impl From<TgTextureRef> for TgResourceRef {
    #[inline]
    fn from(value: TgTextureRef) -> Self {
        Self::Texture(value)
    }
}

impl From<TgBufferRef> for TgResourceRef {
    #[inline]
    fn from(value: TgBufferRef) -> Self {
        Self::Buffer(value)
    }
}
