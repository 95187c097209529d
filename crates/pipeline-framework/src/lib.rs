//! # Pipeline Framework
//!
//! Building blocks for a concurrent processing pipeline on top of Tokio:
//!
//! 1. **Registry** ([`ActorEntity`], [`ResourceActor`], [`ResourceClient`]) - a single task
//!    owns a map of records and serialises every create, read, update, action and scan.
//!    Callers talk to it through a cloneable client over mpsc/oneshot channels.
//! 2. **Worker pools** ([`WorkerPool`]) - bounded executors with a core/max worker count,
//!    a bounded queue, an [`OverflowPolicy`] and graceful shutdown with a grace period.
//! 3. **Cancellation** ([`CancelSource`], [`CancelToken`]) - cooperative, hierarchical
//!    cancellation flags that long waits race against.
//!
//! ## Registry
//!
//! ```rust
//! use pipeline_framework::{ActorEntity, ResourceActor};
//! use async_trait::async_trait;
//!
//! #[derive(Clone, Debug)]
//! struct Ticket {
//!     id: u32,
//!     title: String,
//!     closed: bool,
//! }
//!
//! #[derive(Debug)] struct TicketCreate { title: String }
//! #[derive(Debug)] enum TicketAction { Close }
//! #[derive(Debug, thiserror::Error)]
//! #[error("ticket error")]
//! struct TicketError;
//!
//! #[async_trait]
//! impl ActorEntity for Ticket {
//!     type Id = u32;
//!     type Create = TicketCreate;
//!     type Update = String;
//!     type Action = TicketAction;
//!     type ActionResult = bool;
//!     type Context = ();
//!     type Observer = ();
//!     type Error = TicketError;
//!
//!     fn from_create_params(id: u32, params: TicketCreate) -> Result<Self, Self::Error> {
//!         Ok(Self { id, title: params.title, closed: false })
//!     }
//!
//!     async fn on_update(&mut self, title: String, _: &()) -> Result<(), Self::Error> {
//!         self.title = title;
//!         Ok(())
//!     }
//!
//!     async fn handle_action(&mut self, _: TicketAction, _: &()) -> Result<bool, Self::Error> {
//!         let was_open = !self.closed;
//!         self.closed = true;
//!         Ok(was_open)
//!     }
//!
//!     fn is_expired(&self) -> bool {
//!         self.closed
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let (actor, client) = ResourceActor::<Ticket>::new(16);
//!     tokio::spawn(actor.run(()));
//!
//!     let id = client.create(TicketCreate { title: "flaky test".into() }).await.unwrap();
//!     assert!(client.perform_action(id, TicketAction::Close).await.unwrap());
//!
//!     // A closed ticket is returned by one last observed scan, then dropped.
//!     assert_eq!(client.scan(Some(())).await.unwrap().len(), 1);
//!     assert!(client.get(id).await.unwrap().is_none());
//! }
//! ```
//!
//! ## Context Injection
//!
//! Dependencies are handed to [`ResourceActor::run`] rather than to the constructor, so a
//! registry can be created before the shared services it updates exist.
//!
//! ## Worker Pools
//!
//! ```rust
//! use pipeline_framework::{OverflowPolicy, PoolConfig, PoolError, WorkerPool};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::new(
//!         PoolConfig::new("io")
//!             .with_bounds(1, 2)
//!             .with_queue_capacity(4)
//!             .with_overflow(OverflowPolicy::RejectWithError),
//!     )
//!     .unwrap();
//!
//!     let handle = pool.submit(async { 6 * 7 }).await.unwrap();
//!     assert_eq!(handle.await, Ok(42));
//!
//!     let report = pool.shutdown(Duration::from_secs(1)).await;
//!     assert_eq!(report.completed, 1);
//!     assert!(matches!(pool.submit(async {}).await, Err(PoolError::ShutDown { .. })));
//! }
//! ```

pub mod actor;
pub mod cancel;
pub mod client;
pub mod client_trait;
pub mod duration_ms;
pub mod entity;
pub mod error;
pub mod message;
pub mod pool;
pub mod tracing;

pub use actor::ResourceActor;
pub use cancel::{CancelSource, CancelToken, Cancelled};
pub use client::ResourceClient;
pub use client_trait::ActorClient;
pub use entity::ActorEntity;
pub use error::{FrameworkError, PoolError};
pub use message::{ResourceRequest, Response};
pub use pool::{OverflowPolicy, PoolConfig, PoolShutdownReport, PoolStatus, TaskHandle, WorkerPool};
