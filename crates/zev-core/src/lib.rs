pub mod config;
pub mod flush;
pub mod groq;
pub mod models;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod stream;

// Re-export main types for convenience
pub use config::{Config, HistoryMode};
pub use flush::{batch, FlushPolicy, FlushScheduler, Flushed};
pub use groq::{GroqClient, GroqError};
pub use pipeline::{run_sequential_pipeline, superagent_workflow, PipelineError, PipelineStep, StepExecutor, StepOutput};
pub use state::{ChatMessage, ChatRole, Conversation};
pub use storage::{ConversationStore, MemoryStorage, Preferences, SqliteStorage, Storage};
pub use stream::{decode_fragments, Channel, Fragment};
