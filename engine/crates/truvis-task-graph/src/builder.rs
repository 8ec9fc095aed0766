//! TaskGraph 构建器
//!
//! 按声明顺序记录任务以及每个任务对资源的读写。构建阶段不做任何 GPU 工作，
//! 只追加簿记信息：访问记录、usage 累加、生命周期扩展。
//!
//! # 使用流程
//!
//! 1. 创建 builder: `TaskGraphBuilder::new()`
//! 2. 注册外部资源: `register_external_texture` / `register_presentation_texture`
//! 3. 添加任务: `add_compute_task` / `add_graphics_task` / `add_transfer_task` / `add_present_task`
//! 4. 编译: `CompiledTaskGraph::compile(builder, ...)`

use std::ops::{Deref, DerefMut};

use ash::vk;

use crate::handle::{TgBufferRef, TgTextureRef};
use crate::resource_desc::{SIZE_DISPLAY, TgBufferDesc, TgTextureDesc};
use crate::resource_table::{TgExternalTexture, TgResourceTable};
use crate::task::{
    TgAccess, TgBlit, TgBufferAccess, TgClearValue, TgTaskContext, TgTaskKind, TgTaskNode, TgTextureAccess,
    TgTextureUsage,
};

/// 默认呈现任务的名称
pub const DEFAULT_PRESENT_TASK_NAME: &str = "Final Presentation";

/// TaskGraph 构建器
///
/// 在 `compile` 消费之前独占所有资源与任务记录。
#[derive(Default)]
pub struct TaskGraphBuilder {
    resources: TgResourceTable,
    tasks: Vec<TgTaskNode>,
}

// new & init
impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_task(&mut self, name: impl Into<String>, kind: TgTaskKind) -> usize {
        self.tasks.push(TgTaskNode::new(name, kind));
        self.tasks.len() - 1
    }

    pub fn add_compute_task(&mut self, name: impl Into<String>) -> TgComputeTaskBuilder<'_> {
        let task_index = self.push_task(name, TgTaskKind::Compute { function: None });
        TgComputeTaskBuilder {
            inner: TgPipelineTaskBuilder { builder: self, task_index },
        }
    }

    pub fn add_graphics_task(&mut self, name: impl Into<String>) -> TgGraphicsTaskBuilder<'_> {
        let task_index = self.push_task(name, TgTaskKind::Graphics { function: None });
        TgGraphicsTaskBuilder {
            inner: TgPipelineTaskBuilder { builder: self, task_index },
        }
    }

    pub fn add_transfer_task(&mut self, name: impl Into<String>) -> TgTransferTaskBuilder<'_> {
        let task_index = self.push_task(name, TgTaskKind::Transfer { blits: Vec::new() });
        TgTransferTaskBuilder { builder: self, task_index }
    }

    pub fn add_present_task(&mut self, name: impl Into<String>) -> TgPresentTaskBuilder<'_> {
        let task_index = self.push_task(name, TgTaskKind::Present { image: None });
        TgPresentTaskBuilder { builder: self, task_index }
    }

    /// 名为 "Final Presentation" 的呈现任务
    pub fn add_default_present_task(&mut self) -> TgPresentTaskBuilder<'_> {
        self.add_present_task(DEFAULT_PRESENT_TASK_NAME)
    }

    /// 预先声明一个由 TaskGraph 分配的纹理
    ///
    /// 第一个写入它的任务成为生产者；在此之前读取会被 Validator 拒绝。
    pub fn declare_texture(&mut self, name: impl Into<String>, desc: TgTextureDesc) -> TgTextureRef {
        self.resources.register_texture(name, desc)
    }

    pub fn declare_buffer(&mut self, name: impl Into<String>, desc: TgBufferDesc) -> TgBufferRef {
        self.resources.register_buffer(name, desc)
    }

    /// 注册外部纹理，执行时通过 `resolve` 获取 image / view，TaskGraph 不负责分配与释放
    pub fn register_external_texture(
        &mut self,
        name: impl Into<String>,
        desc: TgTextureDesc,
        resolve: impl FnMut() -> TgExternalTexture + 'static,
    ) -> TgTextureRef {
        self.resources.register_external_texture(name, desc, Box::new(resolve))
    }

    pub fn register_external_buffer(
        &mut self,
        name: impl Into<String>,
        desc: TgBufferDesc,
        resolve: impl FnMut() -> vk::Buffer + 'static,
    ) -> TgBufferRef {
        self.resources.register_external_buffer(name, desc, Box::new(resolve))
    }

    /// 注册呈现纹理（swapchain image）
    ///
    /// 尺寸为显示分辨率，格式在编译时取 `TgCompileInfo::swapchain_format`。
    pub fn register_presentation_texture(
        &mut self,
        name: impl Into<String>,
        resolve: impl FnMut() -> TgExternalTexture + 'static,
    ) -> TgTextureRef {
        let desc = TgTextureDesc::new_2d(vk::Format::UNDEFINED, SIZE_DISPLAY, SIZE_DISPLAY);
        let texture = self.resources.register_external_texture(name, desc, Box::new(resolve));
        self.resources.mark_presentation(texture);
        texture
    }
}

// getter
impl TaskGraphBuilder {
    #[inline]
    pub fn resources(&self) -> &TgResourceTable {
        &self.resources
    }

    #[inline]
    pub fn tasks(&self) -> &[TgTaskNode] {
        &self.tasks
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub(crate) fn into_parts(self) -> (TgResourceTable, Vec<TgTaskNode>) {
        (self.resources, self.tasks)
    }
}

// tools
impl TaskGraphBuilder {
    /// 记录纹理访问
    ///
    /// 同一任务内相同用途的读与写合并为 `ReadWrite`；其余重复声明原样保留，交给 Validator。
    fn record_texture_access(&mut self, task_index: usize, access: TgTextureAccess) {
        let mut image_usage = access.usage.image_usage(access.access);
        if access.clear.is_some() && access.usage == TgTextureUsage::Shader {
            image_usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        self.resources.touch_texture(access.texture, task_index, image_usage);

        let task = &mut self.tasks[task_index];
        let upgradable = task.textures.iter().position(|t| {
            t.texture == access.texture && t.usage == access.usage && Self::is_read_write_pair(t.access, access.access)
        });
        match upgradable {
            Some(index) => {
                let existing = &mut task.textures[index];
                existing.access = existing.access.combine(access.access);
                existing.creates |= access.creates;
                existing.clear = existing.clear.or(access.clear);
            }
            None => task.textures.push(access),
        }
    }

    fn record_buffer_access(&mut self, task_index: usize, access: TgBufferAccess) {
        let mut usage = access.usage;
        if access.clear.is_some() {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        self.resources.touch_buffer(access.buffer, task_index, usage);

        let task = &mut self.tasks[task_index];
        let upgradable = task
            .buffers
            .iter()
            .position(|b| b.buffer == access.buffer && Self::is_read_write_pair(b.access, access.access));
        match upgradable {
            Some(index) => {
                let existing = &mut task.buffers[index];
                existing.access = existing.access.combine(access.access);
                existing.usage |= access.usage;
                existing.creates |= access.creates;
                existing.clear = existing.clear.or(access.clear);
            }
            None => task.buffers.push(access),
        }
    }

    /// 一读一写可以合并；含 `ReadWrite` 的组合视为重复声明
    #[inline]
    fn is_read_write_pair(a: TgAccess, b: TgAccess) -> bool {
        matches!((a, b), (TgAccess::Read, TgAccess::Write) | (TgAccess::Write, TgAccess::Read))
    }

    fn texture_access(
        texture: TgTextureRef,
        usage: TgTextureUsage,
        access: TgAccess,
        clear: Option<TgClearValue>,
        creates: bool,
    ) -> TgTextureAccess {
        TgTextureAccess {
            texture,
            access,
            usage,
            clear,
            creates,
        }
    }
}

/// compute 与 graphics 任务共用的资源声明接口
pub struct TgPipelineTaskBuilder<'a> {
    builder: &'a mut TaskGraphBuilder,
    task_index: usize,
}

impl TgPipelineTaskBuilder<'_> {
    #[inline]
    pub fn task_index(&self) -> usize {
        self.task_index
    }

    fn task_mut(&mut self) -> &mut TgTaskNode {
        &mut self.builder.tasks[self.task_index]
    }

    fn create_texture(
        &mut self,
        name: impl Into<String>,
        desc: TgTextureDesc,
        usage: TgTextureUsage,
        clear: Option<TgClearValue>,
    ) -> TgTextureRef {
        let texture = self.builder.resources.register_texture(name, desc);
        self.builder.record_texture_access(
            self.task_index,
            TaskGraphBuilder::texture_access(texture, usage, TgAccess::Write, clear, true),
        );
        texture
    }

    fn create_buffer(&mut self, name: impl Into<String>, desc: TgBufferDesc, clear: Option<u32>) -> TgBufferRef {
        let buffer = self.builder.resources.register_buffer(name, desc);
        self.builder.record_buffer_access(
            self.task_index,
            TgBufferAccess {
                buffer,
                access: TgAccess::Write,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                clear,
                creates: true,
            },
        );
        buffer
    }

    /// 创建新纹理并作为输出（storage image）
    pub fn add_texture_output(&mut self, name: impl Into<String>, desc: TgTextureDesc) -> TgTextureRef {
        self.create_texture(name, desc, TgTextureUsage::Shader, None)
    }

    /// 创建新纹理，在任务执行前清除为 `clear_color`
    pub fn add_cleared_texture_output(
        &mut self,
        name: impl Into<String>,
        desc: TgTextureDesc,
        clear_color: [f32; 4],
    ) -> TgTextureRef {
        self.create_texture(name, desc, TgTextureUsage::Shader, Some(TgClearValue::Color(clear_color)))
    }

    /// 写入已存在的纹理，只扩展生命周期
    pub fn add_existing_texture_output(&mut self, texture: TgTextureRef) {
        self.builder.record_texture_access(
            self.task_index,
            TaskGraphBuilder::texture_access(texture, TgTextureUsage::Shader, TgAccess::Write, None, false),
        );
    }

    pub fn add_texture_input(&mut self, texture: TgTextureRef) {
        self.builder.record_texture_access(
            self.task_index,
            TaskGraphBuilder::texture_access(texture, TgTextureUsage::Shader, TgAccess::Read, None, false),
        );
    }

    pub fn add_buffer_output(&mut self, name: impl Into<String>, desc: TgBufferDesc) -> TgBufferRef {
        self.create_buffer(name, desc, None)
    }

    /// 创建新缓冲区，在任务执行前用 `clear_value` 填充
    pub fn add_cleared_buffer_output(
        &mut self,
        name: impl Into<String>,
        desc: TgBufferDesc,
        clear_value: u32,
    ) -> TgBufferRef {
        self.create_buffer(name, desc, Some(clear_value))
    }

    pub fn add_existing_buffer_output(&mut self, buffer: TgBufferRef) {
        self.builder.record_buffer_access(
            self.task_index,
            TgBufferAccess {
                buffer,
                access: TgAccess::Write,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                clear: None,
                creates: false,
            },
        );
    }

    /// 读取缓冲区，`usage` 决定等待的 pipeline stage（index / vertex / indirect / uniform / storage）
    pub fn add_buffer_input(&mut self, buffer: TgBufferRef, usage: vk::BufferUsageFlags) {
        self.builder.record_buffer_access(
            self.task_index,
            TgBufferAccess {
                buffer,
                access: TgAccess::Read,
                usage,
                clear: None,
                creates: false,
            },
        );
    }
}

/// compute 任务构建器
pub struct TgComputeTaskBuilder<'a> {
    inner: TgPipelineTaskBuilder<'a>,
}

impl TgComputeTaskBuilder<'_> {
    pub fn set_function(&mut self, function: impl FnMut(&mut TgTaskContext<'_>) + 'static) {
        if let TgTaskKind::Compute { function: slot } = &mut self.inner.task_mut().kind {
            *slot = Some(Box::new(function));
        }
    }
}

impl<'a> Deref for TgComputeTaskBuilder<'a> {
    type Target = TgPipelineTaskBuilder<'a>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for TgComputeTaskBuilder<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// graphics 任务构建器
pub struct TgGraphicsTaskBuilder<'a> {
    inner: TgPipelineTaskBuilder<'a>,
}

impl TgGraphicsTaskBuilder<'_> {
    pub fn set_function(&mut self, function: impl FnMut(&mut TgTaskContext<'_>) + 'static) {
        if let TgTaskKind::Graphics { function: slot } = &mut self.inner.task_mut().kind {
            *slot = Some(Box::new(function));
        }
    }

    fn record_attachment(&mut self, texture: TgTextureRef, usage: TgTextureUsage, access: TgAccess, clear: Option<TgClearValue>) {
        let task_index = self.inner.task_index;
        self.inner
            .builder
            .record_texture_access(task_index, TaskGraphBuilder::texture_access(texture, usage, access, clear, false));
    }

    // ============ 颜色附件 ============

    pub fn add_color_attachment(&mut self, name: impl Into<String>, desc: TgTextureDesc) -> TgTextureRef {
        self.inner.create_texture(name, desc, TgTextureUsage::ColorAttachment, None)
    }

    pub fn add_cleared_color_attachment(
        &mut self,
        name: impl Into<String>,
        desc: TgTextureDesc,
        clear_color: [f32; 4],
    ) -> TgTextureRef {
        self.inner.create_texture(
            name,
            desc,
            TgTextureUsage::ColorAttachment,
            Some(TgClearValue::Color(clear_color)),
        )
    }

    /// 使用已存在的纹理作为颜色附件，保留（load）之前的内容
    pub fn add_existing_color_attachment(&mut self, texture: TgTextureRef) {
        self.record_attachment(texture, TgTextureUsage::ColorAttachment, TgAccess::ReadWrite, None);
    }

    /// 使用已存在的纹理作为颜色附件，并在渲染开始时清除
    pub fn add_cleared_existing_color_attachment(&mut self, texture: TgTextureRef, clear_color: [f32; 4]) {
        self.record_attachment(
            texture,
            TgTextureUsage::ColorAttachment,
            TgAccess::Write,
            Some(TgClearValue::Color(clear_color)),
        );
    }

    // ============ 深度附件 ============

    pub fn add_depth_attachment(&mut self, name: impl Into<String>, desc: TgTextureDesc) -> TgTextureRef {
        self.inner.create_texture(name, desc, TgTextureUsage::DepthAttachment, None)
    }

    pub fn add_cleared_depth_attachment(
        &mut self,
        name: impl Into<String>,
        desc: TgTextureDesc,
        clear_depth: f32,
    ) -> TgTextureRef {
        self.inner.create_texture(
            name,
            desc,
            TgTextureUsage::DepthAttachment,
            Some(TgClearValue::Depth(clear_depth)),
        )
    }

    pub fn add_existing_depth_attachment(&mut self, texture: TgTextureRef) {
        self.record_attachment(texture, TgTextureUsage::DepthAttachment, TgAccess::ReadWrite, None);
    }
}

impl<'a> Deref for TgGraphicsTaskBuilder<'a> {
    type Target = TgPipelineTaskBuilder<'a>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for TgGraphicsTaskBuilder<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// transfer 任务构建器
pub struct TgTransferTaskBuilder<'a> {
    builder: &'a mut TaskGraphBuilder,
    task_index: usize,
}

impl TgTransferTaskBuilder<'_> {
    /// 整幅 blit（线性过滤），`src` 为读，`dst` 为写
    pub fn blit_texture(&mut self, dst: TgTextureRef, src: TgTextureRef) {
        let task_index = self.task_index;
        self.builder.record_texture_access(
            task_index,
            TaskGraphBuilder::texture_access(src, TgTextureUsage::TransferSrc, TgAccess::Read, None, false),
        );
        self.builder.record_texture_access(
            task_index,
            TaskGraphBuilder::texture_access(dst, TgTextureUsage::TransferDst, TgAccess::Write, None, false),
        );
        if let TgTaskKind::Transfer { blits } = &mut self.builder.tasks[task_index].kind {
            blits.push(TgBlit { dst, src });
        }
    }
}

/// present 任务构建器
pub struct TgPresentTaskBuilder<'a> {
    builder: &'a mut TaskGraphBuilder,
    task_index: usize,
}

impl TgPresentTaskBuilder<'_> {
    /// 指定要呈现的纹理，该纹理被标记为呈现纹理
    pub fn set_presentation_image(&mut self, texture: TgTextureRef) {
        let task_index = self.task_index;
        self.builder.resources.mark_presentation(texture);

        let task = &mut self.builder.tasks[task_index];
        if let TgTaskKind::Present { image } = &mut task.kind {
            if let Some(previous) = image.replace(texture) {
                log::warn!("Present task \"{}\" replaces its presentation image", task.name);
                task.textures.retain(|t| !(t.texture == previous && t.usage == TgTextureUsage::Present));
            }
        }

        self.builder.record_texture_access(
            task_index,
            TaskGraphBuilder::texture_access(texture, TgTextureUsage::Present, TgAccess::Read, None, false),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8(width: u32, height: u32) -> TgTextureDesc {
        TgTextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, width, height)
    }

    #[test]
    fn test_tasks_keep_declaration_order() {
        let mut builder = TaskGraphBuilder::new();
        builder.add_compute_task("a");
        builder.add_graphics_task("b");
        builder.add_transfer_task("c");
        builder.add_default_present_task();

        let names: Vec<_> = builder.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", DEFAULT_PRESENT_TASK_NAME]);
        assert!(matches!(builder.tasks()[3].kind, TgTaskKind::Present { image: None }));
    }

    #[test]
    fn test_usage_accumulates_across_tasks() {
        let mut builder = TaskGraphBuilder::new();

        let mut t0 = builder.add_compute_task("t0");
        let tex = t0.add_cleared_texture_output("tex", rgba8(32, 32), [0.0; 4]);

        let mut t1 = builder.add_graphics_task("t1");
        t1.add_texture_input(tex);

        let dst = builder.declare_texture("dst", rgba8(32, 32));
        builder.add_transfer_task("t2").blit_texture(dst, tex);

        let tex = builder.resources().get_texture(tex).unwrap();
        assert_eq!(
            tex.desc.usage,
            vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
        );
        assert_eq!(tex.lifetime().map(|l| (l.first_task, l.last_task)), Some((0, 2)));

        let dst = builder.resources().get_texture(dst).unwrap();
        assert_eq!(dst.desc.usage, vk::ImageUsageFlags::TRANSFER_DST);
    }

    #[test]
    fn test_output_after_input_upgrades_to_read_write() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("t0");
        let tex = t0.add_texture_output("tex", rgba8(8, 8));

        let mut t1 = builder.add_compute_task("t1");
        t1.add_texture_input(tex);
        t1.add_existing_texture_output(tex);

        let accesses = &builder.tasks()[1].textures;
        assert_eq!(accesses.len(), 1);
        assert_eq!(accesses[0].access, TgAccess::ReadWrite);
        assert!(!accesses[0].creates);
    }

    #[test]
    fn test_duplicate_declarations_are_kept() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("t0");
        let tex = t0.add_texture_output("tex", rgba8(8, 8));

        let mut t1 = builder.add_compute_task("t1");
        t1.add_texture_input(tex);
        t1.add_texture_input(tex);

        assert_eq!(builder.tasks()[1].textures.len(), 2);
    }

    #[test]
    fn test_attachments_and_present() {
        let mut builder = TaskGraphBuilder::new();
        let swapchain = builder.register_presentation_texture("swapchain", TgExternalTexture::default);

        let mut g = builder.add_graphics_task("forward");
        let depth = g.add_cleared_depth_attachment(
            "depth",
            TgTextureDesc::new_2d(vk::Format::D32_SFLOAT, SIZE_DISPLAY, SIZE_DISPLAY),
            1.0,
        );
        g.add_cleared_existing_color_attachment(swapchain, [0.0, 0.0, 0.0, 1.0]);
        g.set_function(|_| {});

        builder.add_default_present_task().set_presentation_image(swapchain);

        let forward = &builder.tasks()[0];
        assert_eq!(forward.attachments().count(), 2);
        let depth_access = forward.textures.iter().find(|t| t.texture == depth).unwrap();
        assert_eq!(depth_access.usage, TgTextureUsage::DepthAttachment);
        assert_eq!(depth_access.clear, Some(TgClearValue::Depth(1.0)));
        assert!(depth_access.creates);

        let swapchain_tex = builder.resources().get_texture(swapchain).unwrap();
        assert!(swapchain_tex.is_presentation() && swapchain_tex.is_external());
        assert_eq!(swapchain_tex.desc.usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        assert_eq!(swapchain_tex.lifetime().map(|l| l.last_task), Some(1));

        assert!(matches!(builder.tasks()[1].kind, TgTaskKind::Present { image: Some(t) } if t == swapchain));
    }

    #[test]
    fn test_buffer_input_usage() {
        let mut builder = TaskGraphBuilder::new();
        let mut t0 = builder.add_compute_task("cull");
        let indirect = t0.add_cleared_buffer_output("draw_args", TgBufferDesc::new(4096), 0);

        let mut t1 = builder.add_graphics_task("draw");
        t1.add_buffer_input(indirect, vk::BufferUsageFlags::INDIRECT_BUFFER);

        let buffer = builder.resources().get_buffer(indirect).unwrap();
        assert_eq!(
            buffer.desc.usage,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::INDIRECT_BUFFER
        );
        assert_eq!(builder.tasks()[0].buffers[0].clear, Some(0));
    }
}
