pub mod condition;
pub mod engine;
pub mod error;

pub use condition::{glob_match, matches};
pub use engine::PolicyEngine;
pub use error::RulesError;
