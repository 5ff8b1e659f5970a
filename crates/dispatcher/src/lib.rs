//! 发布分发
//!
//! 拓扑解析、发布任务的创建与复用、节点任务分发与补发、
//! 节点拉取认领以及结果对账。

pub mod catch_up;
pub mod dispatcher;
pub mod pull;
pub mod reconciler;
pub mod release_store;
pub mod service;
pub mod topology;

pub use catch_up::CatchUpDispatcher;
pub use dispatcher::AgentTaskDispatcher;
pub use pull::PullService;
pub use reconciler::{StatusReconciler, StatusReport};
pub use release_store::{ReleaseTaskStore, StoredRelease};
pub use service::{
    group_batches, AgentGatewayService, BatchView, ReleaseControlService, ReleaseOrchestrator,
    ReleaseView, SubmitOutcome,
};
pub use topology::TopologyResolver;
