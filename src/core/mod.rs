//! Pure data model: stages, transitions, the validated registry, visit
//! history, and the mutable flow state with its serializable snapshot.

pub mod history;
pub mod registry;
pub mod stage;
pub mod state;

pub use history::{FlowHistory, HistoryEntry};
pub use registry::StageRegistry;
pub use stage::{Condition, Stage, StageHook, TransitionDef};
pub use state::{EngineState, FlowState, SnapshotError, STATE_VERSION};
