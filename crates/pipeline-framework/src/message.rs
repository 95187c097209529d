//! # Registry Messages
//!
//! Request types sent from a [`ResourceClient`](crate::ResourceClient) to its
//! [`ResourceActor`](crate::ResourceActor), each carrying a oneshot reply channel.

use crate::entity::ActorEntity;
use crate::error::FrameworkError;
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by actors.
pub type Response<T> = oneshot::Sender<Result<T, FrameworkError>>;

/// Message sent to the registry actor.
///
/// The CRUD variants (`Create`, `Get`, `Update`, `Delete`) cover the record lifecycle,
/// `Action` carries a record-specific operation and `Scan` reads every record at once.
///
/// Because the actor handles one message at a time, a `Scan` sees each record either
/// entirely before or entirely after any concurrent `Action`, never half-way through.
#[derive(Debug)]
pub enum ResourceRequest<T: ActorEntity> {
    Create {
        params: T::Create,
        respond_to: Response<T::Id>,
    },
    Get {
        id: T::Id,
        respond_to: Response<Option<T>>,
    },
    Update {
        id: T::Id,
        update: T::Update,
        respond_to: Response<T>,
    },
    Delete {
        id: T::Id,
        respond_to: Response<()>,
    },
    Action {
        id: T::Id,
        action: T::Action,
        respond_to: Response<T::ActionResult>,
    },
    /// Snapshot all records. With an observer, records are told who looked and expired
    /// records are evicted after the snapshot is taken.
    Scan {
        observer: Option<T::Observer>,
        respond_to: Response<Vec<T>>,
    },
}
