//! 发布编排领域模型
//!
//! 包含发布任务、节点任务、分批节点与拓扑实体，内容摘要计算，
//! 以及各仓储的抽象接口。

#[macro_use]
mod text_enum;

pub mod content_hash;
pub mod entities;
pub mod repositories;
pub mod value_objects;

pub use content_hash::*;
pub use entities::*;
pub use release_core::{ReleaseError, ReleaseResult};
pub use repositories::*;
pub use value_objects::*;
