pub mod action_ledger;
pub mod candidates;
pub mod collaborators;
pub mod completeness;
pub mod config;
pub mod conversation_store;
pub mod error;
pub mod focus_lock;
pub mod grammar;
pub mod inheritance;
pub mod interpreter;
pub mod orchestrator;
pub mod task_queue;

pub use action_ledger::*;
pub use candidates::*;
pub use collaborators::*;
pub use completeness::*;
pub use config::*;
pub use conversation_store::*;
pub use error::*;
pub use focus_lock::*;
pub use grammar::*;
pub use inheritance::*;
pub use interpreter::*;
pub use orchestrator::*;
pub use task_queue::*;
