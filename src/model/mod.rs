//! Plain data types of the order domain.
//!
//! [`Order`] implements [`ActorEntity`](pipeline_framework::ActorEntity) in
//! [`crate::order_actor`], so the registry actor owns every instance.

pub mod order;

pub use order::*;
