//! Mask Canvas API
//!
//! Backend for the mask drawing app. Clients upload an original image, upload
//! masks drawn over it, and fetch time-limited URLs for both. File bytes live
//! in S3 (or any S3-compatible store); one small record per image lives in
//! SQLite or PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//!   Client
//!     │
//!     ▼
//! ┌──────────────┐   put / presign   ┌──────────────┐
//! │ HTTP API     │──────────────────▶│ S3 Gateway   │──▶ originals/{filename}
//! │ (axum)       │                   └──────────────┘    masks/{id}/{filename}
//! └──────────────┘
//!     │ insert / find / update
//!     ▼
//! ┌──────────────┐
//! │ Image Store  │──▶ images (id, original_key, mask_key, created_at, updated_at)
//! └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod image_store;
pub mod s3_gateway;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::ApiError;
pub use image_store::{ImageRecord, ImageStore, PgImageStore, SqliteImageStore};
pub use s3_gateway::{ObjectStorage, S3Gateway};
