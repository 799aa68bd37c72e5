pub mod api;
pub mod db;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod stats;
pub mod utils;

pub use pipeline::{PipelineContext, PipelineJob, PipelineService};
