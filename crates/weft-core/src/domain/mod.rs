//! Domain model (IDs, pipeline definitions, tasks, errors).

pub mod errors;
pub mod graph;
pub mod ids;
pub mod operator_ref;
pub mod pipeline;
pub mod task;

pub use self::errors::{ErrorKind, WeftError};
pub use self::graph::StageGraph;
pub use self::ids::{BlobId, RunId, TaskId};
pub use self::operator_ref::OperatorRef;
pub use self::pipeline::{PipelineSpec, Stage, StepOption};
pub use self::task::{
    INPUT_STAGE, OUTPUT_TOPIC, Task, TaskContext, TaskMeta, TaskStage, completion_topic,
    run_scope,
};
