pub mod dispatcher;
pub mod executor;
pub mod goal;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod template;

pub use executor::{ConversationExecutor, ExecutorSettings};
pub use manager::{RunManager, RunManagerOptions};
pub use registry::{ControlHandle, RunRegistry};
pub use retry::InferencePolicy;
