pub mod caption;
pub mod media;
pub mod story;
