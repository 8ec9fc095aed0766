//! 图合法性检查
//!
//! 在任何 GPU 对象创建之前运行一次。发现问题时返回全部错误，编译随之中止。

use std::collections::{HashMap, HashSet};

use slotmap::SecondaryMap;

use crate::builder::TaskGraphBuilder;
use crate::compile_info::TgCompileInfo;
use crate::handle::{TgBufferRef, TgResourceRef, TgTextureRef};
use crate::resource_table::TgResourceTable;
use crate::task::{TgTaskKind, TgTaskNode, TgTextureUsage};

/// 单个 graphics 任务允许的最大颜色附件数
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("task \"{task}\" has no execution function")]
    MissingFunction { task: String },

    #[error("present task \"{task}\" has no presentation image")]
    MissingPresentationImage { task: String },

    #[error("task \"{task}\" references a {kind} that is not registered in this graph")]
    StaleHandle { task: String, kind: &'static str },

    #[error("task \"{task}\" lists \"{resource}\" as an input more than once")]
    DuplicateInput { task: String, resource: String },

    #[error("task \"{task}\" lists \"{resource}\" as an output more than once")]
    DuplicateOutput { task: String, resource: String },

    #[error("task \"{task}\" uses \"{resource}\" with conflicting usages ({first:?} and {second:?})")]
    ConflictingUsage {
        task: String,
        resource: String,
        first: TgTextureUsage,
        second: TgTextureUsage,
    },

    #[error("task \"{task}\" has {count} color attachments, the maximum is {max}")]
    TooManyColorAttachments { task: String, count: usize, max: usize },

    #[error("task \"{task}\" has {count} depth attachments, the maximum is 1")]
    TooManyDepthAttachments { task: String, count: usize },

    #[error("task \"{task}\" creates \"{resource}\", which was already created by an earlier output")]
    ResourceRecreated { task: String, resource: String },

    #[error("task \"{task}\" reads \"{resource}\" before any earlier task has produced it")]
    InputNotProduced { task: String, resource: String },

    #[error("task \"{task}\" writes the presentation texture \"{resource}\" while running headless")]
    PresentWhileHeadless { task: String, resource: String },

    #[error("no task writes the presentation texture, but the graph is not headless")]
    NoPresentationWrite,
}

pub struct Validator;

impl Validator {
    /// 检查整张图，返回全部错误（每条错误同时输出到日志）
    pub fn validate(builder: &TaskGraphBuilder, info: &TgCompileInfo) -> Result<(), Vec<ValidationError>> {
        let _span = tg_span!("Validator::validate");

        let errors = Self::collect_errors(builder.resources(), builder.tasks(), info);
        if errors.is_empty() {
            return Ok(());
        }

        for error in &errors {
            log::error!("TaskGraph validation failed: {error}");
        }
        Err(errors)
    }

    fn collect_errors(resources: &TgResourceTable, tasks: &[TgTaskNode], info: &TgCompileInfo) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // 外部资源视为在第一个任务之前就已生产
        let mut texture_producers: SecondaryMap<TgTextureRef, usize> = SecondaryMap::new();
        let mut buffer_producers: SecondaryMap<TgBufferRef, usize> = SecondaryMap::new();

        // 名称 -> 是否为外部资源
        let mut created_names: HashMap<&str, bool> = HashMap::new();
        for (_, texture) in resources.iter_textures().filter(|(_, t)| t.is_external()) {
            created_names.insert(texture.name.as_str(), true);
        }
        for (_, buffer) in resources.iter_buffers().filter(|(_, b)| b.is_external()) {
            created_names.insert(buffer.name.as_str(), true);
        }

        let mut presentation_writers = Vec::new();

        for (task_index, task) in tasks.iter().enumerate() {
            let task_name = || task.name.clone();

            match &task.kind {
                TgTaskKind::Compute { function: None } | TgTaskKind::Graphics { function: None } => {
                    errors.push(ValidationError::MissingFunction { task: task_name() });
                }
                TgTaskKind::Present { image: None } => {
                    errors.push(ValidationError::MissingPresentationImage { task: task_name() });
                }
                _ => {}
            }

            let mut inputs: HashSet<TgResourceRef> = HashSet::new();
            let mut outputs: HashSet<TgResourceRef> = HashSet::new();
            let mut usages: HashMap<TgTextureRef, TgTextureUsage> = HashMap::new();

            // ---------- 纹理 ----------
            for access in &task.textures {
                let Some(texture) = resources.get_texture(access.texture) else {
                    errors.push(ValidationError::StaleHandle {
                        task: task_name(),
                        kind: "texture",
                    });
                    continue;
                };
                let resource = || texture.name.clone();

                if access.access.is_read() && !inputs.insert(access.texture.into()) {
                    errors.push(ValidationError::DuplicateInput {
                        task: task_name(),
                        resource: resource(),
                    });
                }
                if access.access.is_write() && !outputs.insert(access.texture.into()) {
                    errors.push(ValidationError::DuplicateOutput {
                        task: task_name(),
                        resource: resource(),
                    });
                }
                match usages.get(&access.texture) {
                    Some(&first) if first != access.usage => errors.push(ValidationError::ConflictingUsage {
                        task: task_name(),
                        resource: resource(),
                        first,
                        second: access.usage,
                    }),
                    Some(_) => {}
                    None => {
                        usages.insert(access.texture, access.usage);
                    }
                }

                if access.access.is_read() && !texture.is_external() && !texture_producers.contains_key(access.texture)
                {
                    errors.push(ValidationError::InputNotProduced {
                        task: task_name(),
                        resource: resource(),
                    });
                }

                if texture.is_presentation() && (access.access.is_write() || access.usage == TgTextureUsage::Present)
                {
                    presentation_writers.push((task_index, texture.name.clone()));
                }
            }

            // ---------- 缓冲区 ----------
            for access in &task.buffers {
                let Some(buffer) = resources.get_buffer(access.buffer) else {
                    errors.push(ValidationError::StaleHandle {
                        task: task_name(),
                        kind: "buffer",
                    });
                    continue;
                };
                let resource = || buffer.name.clone();

                if access.access.is_read() && !inputs.insert(access.buffer.into()) {
                    errors.push(ValidationError::DuplicateInput {
                        task: task_name(),
                        resource: resource(),
                    });
                }
                if access.access.is_write() && !outputs.insert(access.buffer.into()) {
                    errors.push(ValidationError::DuplicateOutput {
                        task: task_name(),
                        resource: resource(),
                    });
                }
                if access.access.is_read() && !buffer.is_external() && !buffer_producers.contains_key(access.buffer) {
                    errors.push(ValidationError::InputNotProduced {
                        task: task_name(),
                        resource: resource(),
                    });
                }
            }

            // ---------- 附件数量 ----------
            let color_count = task.textures.iter().filter(|t| t.usage == TgTextureUsage::ColorAttachment).count();
            if color_count > MAX_COLOR_ATTACHMENTS {
                errors.push(ValidationError::TooManyColorAttachments {
                    task: task_name(),
                    count: color_count,
                    max: MAX_COLOR_ATTACHMENTS,
                });
            }
            let depth_count = task.textures.iter().filter(|t| t.usage == TgTextureUsage::DepthAttachment).count();
            if depth_count > 1 {
                errors.push(ValidationError::TooManyDepthAttachments {
                    task: task_name(),
                    count: depth_count,
                });
            }

            // ---------- 生产者与重复创建 ----------
            // 读检查完成后再登记本任务的写入，保证生产者严格早于读取者
            for access in task.textures.iter().filter(|t| t.access.is_write()) {
                let Some(texture) = resources.get_texture(access.texture) else {
                    continue;
                };
                if access.creates {
                    Self::check_recreated(&mut created_names, &texture.name, &task.name, &mut errors);
                }
                if !texture_producers.contains_key(access.texture) {
                    texture_producers.insert(access.texture, task_index);
                }
            }
            for access in task.buffers.iter().filter(|b| b.access.is_write()) {
                let Some(buffer) = resources.get_buffer(access.buffer) else {
                    continue;
                };
                if access.creates {
                    Self::check_recreated(&mut created_names, &buffer.name, &task.name, &mut errors);
                }
                if !buffer_producers.contains_key(access.buffer) {
                    buffer_producers.insert(access.buffer, task_index);
                }
            }
        }

        // ---------- 呈现约束 ----------
        if info.headless {
            for (task_index, resource) in presentation_writers {
                errors.push(ValidationError::PresentWhileHeadless {
                    task: tasks[task_index].name.clone(),
                    resource,
                });
            }
        } else if presentation_writers.is_empty() {
            errors.push(ValidationError::NoPresentationWrite);
        }

        errors
    }

    fn check_recreated<'a>(
        created_names: &mut HashMap<&'a str, bool>,
        name: &'a str,
        task: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        match created_names.get(name) {
            Some(false) => errors.push(ValidationError::ResourceRecreated {
                task: task.to_string(),
                resource: name.to_string(),
            }),
            Some(true) => {}
            None => {
                created_names.insert(name, false);
            }
        }
    }
}
