pub mod client;

pub use client::{CaptionClient, CaptionTransport, HttpCaptionTransport, RetryPolicy};
