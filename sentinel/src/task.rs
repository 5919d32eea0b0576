//! The pluggable analytic interface a task engine drives. Concrete vision
//! pipelines (model loading, inference) are an external collaborator per the
//! scope of this crate; this module defines the seam and ships the trivial
//! built-in tasks the catalog can reference for tasks with no associated
//! image stream.

use sentinelcam_types::{JobClass, Rect};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("unknown task {0:?}")]
    UnknownTask(String),
    #[error("task failed: {0}")]
    Failed(String),
}

/// The result of processing one frame, if the task produced a detection.
pub struct FrameOutcome {
    pub clas: String,
    pub rect: Rect,
}

/// One unit of scheduled work. `pipeline` is invoked once per frame when the
/// job has an event/image stream, or exactly once with `frame = None`
/// otherwise; `finalize` runs once after the loop ends regardless of outcome.
pub trait Task: Send {
    /// Process one decoded BGR frame (or `None` for a pure analytic task).
    /// Returning `Ok(false)` ends the job early without consuming the rest
    /// of the ring buffer.
    fn pipeline(&mut self, frame: Option<&[u8]>) -> Result<(bool, Option<FrameOutcome>), TaskError>;

    fn finalize(&mut self) -> Result<(), TaskError>;
}

/// A no-op task used by tests and by task names with no catalog entry beyond
/// class/config-path bookkeeping. Consumes the entire ring buffer without
/// producing detections.
pub struct NullTask;

impl Task for NullTask {
    fn pipeline(&mut self, _frame: Option<&[u8]>) -> Result<(bool, Option<FrameOutcome>), TaskError> {
        Ok((true, None))
    }

    fn finalize(&mut self) -> Result<(), TaskError> {
        Ok(())
    }
}

/// One `{task_name -> {class, config_path, trk_type?, ringctrl?}}` catalog
/// entry.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TaskDescriptor {
    pub class: JobClass,
    pub config_path: std::path::PathBuf,
    #[serde(default)]
    pub trk_type: Option<String>,
    #[serde(default)]
    pub ringctrl: Option<String>,
}

/// Builds a [`Task`] by name. Real deployments register model-backed
/// factories; this crate ships only [`NullTask`] for tasks that are pure
/// bookkeeping exercises over the frame stream.
pub fn build_task(name: &str) -> Result<Box<dyn Task>, TaskError> {
    match name {
        "NullTask" | "MobileNetSSD_allFrames" => Ok(Box::new(NullTask)),
        other => Err(TaskError::UnknownTask(other.to_string())),
    }
}
