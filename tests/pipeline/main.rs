#[path = "../support/mod.rs"]
mod support;

mod channel_pipeline;
mod tcp_pipeline;
