pub mod orchestrator;

pub use orchestrator::{DetectionError, DetectionOrchestrator};
