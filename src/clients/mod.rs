//! Type-safe wrappers around [`ResourceClient`](pipeline_framework::ResourceClient).

pub mod order_client;

pub use order_client::*;
