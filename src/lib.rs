pub mod background;
pub mod batch;
pub mod builtin_font;
pub mod catalog;
pub mod color;
pub mod compose;
pub mod config;
pub mod device_frame;
pub mod error_codes;
pub mod export;
pub mod jobs;
pub mod logging;
pub mod raster;
pub mod schema;
pub mod studio;
pub mod text;
