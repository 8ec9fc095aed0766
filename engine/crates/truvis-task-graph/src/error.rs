use ash::vk;

use crate::packing::PackError;
use crate::validator::ValidationError;

/// 编译与执行阶段的错误
#[derive(Debug, thiserror::Error)]
pub enum TaskGraphError {
    /// 图声明不合法，未创建任何 GPU 对象
    #[error("task graph validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("memory packing failed: {0}")]
    Pack(#[from] PackError),

    /// 图形 API 调用失败；编译期间失败时已创建的对象会被全部释放
    #[error("vulkan call failed while {stage}: {result:?}")]
    Vulkan { stage: &'static str, result: vk::Result },

    #[error("task graph has already been freed")]
    Freed,
}

impl From<Vec<ValidationError>> for TaskGraphError {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self::Validation(errors)
    }
}

impl TaskGraphError {
    /// 用于 `map_err`：`.map_err(TaskGraphError::vulkan("creating images"))`
    pub(crate) fn vulkan(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { stage, result }
    }
}
