pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod import;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use app::App;
pub use error::{ExtractError, PipelineError, PipelineResult};
