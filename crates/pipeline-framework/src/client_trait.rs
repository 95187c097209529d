//! # ActorClient Trait
//!
//! Common surface for domain-specific registry clients: default `get`, `delete` and `scan`
//! built on top of a generic [`ResourceClient`].
use crate::{ActorEntity, FrameworkError, ResourceClient};
use async_trait::async_trait;

/// Trait for domain clients to inherit the standard registry reads.
///
/// A domain client wraps a `ResourceClient<T>`, exposes its own typed operations, and
/// implements this trait to get lookups and scans mapped into its own error type.
#[async_trait]
pub trait ActorClient<T: ActorEntity>: Send + Sync {
    /// The domain-specific error type.
    type Error: Send + Sync;

    /// Access the inner generic ResourceClient.
    fn inner(&self) -> &ResourceClient<T>;

    /// Map framework errors to the domain error type.
    fn map_error(e: FrameworkError) -> Self::Error;

    /// Fetch a record by ID.
    #[tracing::instrument(skip(self))]
    async fn get(&self, id: T::Id) -> Result<Option<T>, Self::Error> {
        tracing::debug!("Sending request");
        self.inner().get(id).await.map_err(Self::map_error)
    }

    /// Delete a record by ID.
    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: T::Id) -> Result<(), Self::Error> {
        tracing::debug!("Sending request");
        self.inner().delete(id).await.map_err(Self::map_error)
    }

    /// Snapshot every record on behalf of `observer`.
    #[tracing::instrument(skip(self))]
    async fn scan(&self, observer: Option<T::Observer>) -> Result<Vec<T>, Self::Error> {
        self.inner().scan(observer).await.map_err(Self::map_error)
    }
}
