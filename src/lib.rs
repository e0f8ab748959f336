pub mod cache;
pub mod clients;
pub mod conditions;
pub mod config;
pub mod disagreement;
pub mod error;
pub mod generator;
pub mod improvement;
pub mod learning;
pub mod orchestrator;
pub mod prompts;
pub mod store;
pub mod utils;
pub mod validator;

pub use config::Config;
pub use error::{DualAiError, Result};
pub use generator::{ContentType, GenerationOptions, GenerationRequest};
pub use orchestrator::{DualAiService, WorkflowResult, WorkflowStatus};
pub use validator::{ValidationResponse, ValidationStatus};

// Load env from a simple, standardized location resolution.
// Loads .env if present and silently ignores it when missing.
pub fn load_env() {
    let _ = dotenvy::dotenv();
}
