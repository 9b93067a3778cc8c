//! Search orchestration.
//!
//! A search turns the owner's term into zero or more [`SearchOutcome`]s.
//! Two strategies exist:
//! 1. [`DirectSearch`] queries the marketplace once and yields its projects
//! 2. [`Agent`] lets an LLM drive the marketplace tool in a loop; tool results
//!    become structured outcomes and assistant text becomes narrative outcomes

mod agent_loop;
mod direct;
mod outcome;
mod prompt;

pub use agent_loop::Agent;
pub use direct::DirectSearch;
pub use outcome::{JobSearch, SearchOutcome};
pub use prompt::{build_system_prompt, build_task};
