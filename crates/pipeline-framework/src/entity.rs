//! # ActorEntity Trait
//!
//! The `ActorEntity` trait is the contract a record type implements to live inside a
//! [`ResourceActor`](crate::ResourceActor) registry. It names the associated types for ids,
//! creation payloads, actions, injected context, observers and errors, and provides the
//! lifecycle hooks the actor calls while it owns the record.
//!
//! # Provided Methods (Hooks)
//! - [`ActorEntity::on_create`]
//! - [`ActorEntity::on_delete`]
//! - [`ActorEntity::on_observe`]
//! - [`ActorEntity::is_expired`]
//!
//! The defaults do nothing, so a record only implements the hooks it cares about.
//!
//! # Observation and Expiry
//! Readers that periodically scan the registry identify themselves with an
//! [`ActorEntity::Observer`] value. The actor hands it to every record during the scan and,
//! once the scan is complete, drops the records that report [`ActorEntity::is_expired`].
//! This lets a record decide for itself when every interested reader has seen its final state.

use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Trait that any record must implement to be owned by a `ResourceActor`.
///
/// # Async & Context
/// Hooks are async (`#[async_trait]`) and receive the `Context` that was injected when the
/// actor loop started. Dependencies are therefore bound at `run()` time, not at construction.
#[async_trait]
pub trait ActorEntity: Clone + Send + Sync + 'static {
    /// The unique identifier for this record.
    /// Must be convertible from u32 for automatic ID generation.
    type Id: Eq + Hash + Clone + Send + Sync + Display + Debug + From<u32>;

    /// The data required to create a new instance.
    type Create: Send + Sync + Debug;

    /// The data required to update an existing instance.
    type Update: Send + Sync + Debug;

    /// Record-specific operations (e.g. a status transition).
    type Action: Send + Sync + Debug;

    /// The result type returned by custom actions.
    type ActionResult: Send + Sync + Debug;

    /// The runtime context (dependencies) injected into the actor.
    /// Use `()` if no dependencies are needed.
    type Context: Send + Sync;

    /// Identifies a periodic reader of the registry.
    type Observer: Copy + Send + Sync + Debug;

    /// The error type for this record.
    ///
    /// One error enum per record type rather than one per action: clients match on a single
    /// type, at the cost of every action sharing the same set of variants.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Construct the full record from the ID and payload.
    /// This is called synchronously before `on_create`.
    fn from_create_params(id: Self::Id, params: Self::Create) -> Result<Self, Self::Error>;

    // --- Lifecycle Hooks (Async) ---

    /// Called after the record is built and before it is stored.
    async fn on_create(&mut self, _ctx: &Self::Context) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called when an update request is received.
    async fn on_update(
        &mut self,
        update: Self::Update,
        _ctx: &Self::Context,
    ) -> Result<(), Self::Error>;

    /// Called immediately before the record is removed.
    async fn on_delete(&self, _ctx: &Self::Context) -> Result<(), Self::Error> {
        Ok(())
    }

    // --- Action Handler (Async) ---

    /// Handle a custom record-specific action.
    async fn handle_action(
        &mut self,
        action: Self::Action,
        _ctx: &Self::Context,
    ) -> Result<Self::ActionResult, Self::Error>;

    // --- Observation ---

    /// Called for every record when `observer` scans the registry.
    fn on_observe(&mut self, _observer: Self::Observer) {}

    /// Whether the record may be dropped at the end of the current scan.
    fn is_expired(&self) -> bool {
        false
    }
}
