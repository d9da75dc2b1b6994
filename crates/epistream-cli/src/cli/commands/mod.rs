pub mod build;
pub mod cache;
pub mod chart;
pub(crate) mod common;
pub mod dispatch;
pub mod frames;
pub mod locations;
pub mod upload;

pub use dispatch::dispatch;
