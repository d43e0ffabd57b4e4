pub mod client;

pub use client::{HttpStoryGenerator, StoryError, StoryGenerator};
