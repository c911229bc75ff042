pub mod context;
pub mod decision;
pub mod factory;
pub mod manager;
pub mod memory;
pub mod router;
pub mod specialist;

pub use context::ContextBuilder;
pub use decision::{Decision, Route, Specialist};
pub use factory::RouterFactory;
pub use manager::ManagerAgent;
pub use memory::{SummaryBufferMemory, Turn, TurnRole};
pub use router::{ConversationState, Router, RouterReply, TraceStep};
pub use specialist::SpecialistAgent;
