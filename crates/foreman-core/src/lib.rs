pub mod agent;
pub mod bus;
pub mod oracle;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use agent::decision::{Decision, Route, Specialist};
pub use agent::factory::RouterFactory;
pub use agent::router::{ConversationState, Router, RouterReply, TraceStep};
pub use oracle::{Oracle, OraclePool, RigOracle};
pub use session::{Session, SessionManager};
pub use tools::ToolRegistry;
