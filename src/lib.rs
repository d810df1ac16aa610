//! Customer review responder: sentiment analysis and reply suggestion over
//! HTTP, plus the pipeline that fine-tunes the reply model.

pub mod api;
pub mod capability;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod mode;
pub mod orchestrator;
pub mod responder;
pub mod sentiment;
pub mod text;
