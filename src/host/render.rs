//! 渲染侧资源: 纹理句柄与渲染上下文
//!
//! 纹理只能在渲染线程创建、更新和销毁。

use anyhow::Result;

/// 显示层纹理句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// 显示层接口
pub trait TextureSurface {
    fn create_streaming(&mut self, format: PixelFormat, width: u16, height: u16)
        -> Result<TextureId>;

    /// 原地更新, `data` 尺寸与创建时一致
    fn update(&mut self, texture: TextureId, data: &[u8]) -> Result<()>;

    fn destroy(&mut self, texture: TextureId);
}

/// 每路流的显示资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    pub texture: TextureId,
    pub width: u16,
    pub height: u16,
    /// 标记后在下一次上传纹理时移除
    pub done: bool,
    pub last_pts: i64,
}
