//! Everything that turns a scraped [`Dataset`](crate::models::Dataset) or page into publishable output.
//!
//! # Submodules
//!
//! - [`report`]: Disclaimer and per-country header/data messages
//! - [`tables`]: Pairs classification tables with their group text and renders them
//! - [`render`]: HTML to PNG rasterization and cropping
//!
//! # Output Structure
//!
//! ```text
//! image_dir/
//! ├── table_0.png   # Variants of Concern
//! ├── table_1.png   # Variants of Interest
//! ├── table_2.png   # Variants under monitoring
//! └── table_3.png   # De-escalated variants
//! ```

pub mod render;
pub mod report;
pub mod tables;
