//! # animanode-core
//!
//! Core types and primitives for the AnimaNode animation toolkit.
//! This crate contains foundational types shared across all AnimaNode crates:
//! frame buffers, colors, 2D transforms and matrices, time, configuration,
//! content hashing, and the error taxonomy.

pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod hash;
pub mod math;
pub mod time;
pub mod types;

pub use config::*;

pub use color::Color;
pub use error::{AnimaError, AnimaResult};
pub use frame::{FrameBuffer, PixelFormat};
pub use hash::{ContentHash, ContentHasher};
pub use math::{Affine2, Point2D, Transform2D};
pub use time::Duration;
pub use types::{BlendMode, Interpolation};
