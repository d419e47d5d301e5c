pub mod config;
pub mod error;
pub mod layout;
pub mod ocr;
pub mod progress;
pub mod slicer;
pub mod text;
pub mod video;
