//! # Registry Actor
//!
//! `ResourceActor` owns a keyed store of records and applies every request to it from a
//! single task. Mutations and scans are serialized by the message loop, which is what gives
//! concurrent readers a consistent view without any lock on the store.

use crate::client::ResourceClient;
use crate::entity::ActorEntity;
use crate::error::FrameworkError;
use crate::message::ResourceRequest;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The generic actor that owns a collection of records.
///
/// This is the server half: it holds the store and the receiving end of the channel.
/// The client half, [`ResourceClient`], is cheap to clone and can be handed to any task.
///
/// # Usage Pattern
///
/// 1. **Create**: `ResourceActor::new(buffer)` returns the actor and its client.
/// 2. **Wire**: pass the dependencies into `actor.run(context)`.
/// 3. **Run**: spawn the returned future on the runtime.
///
/// The loop ends when every client has been dropped.
///
/// # Operations
///
/// * **Create**: allocates the next id, builds the record, runs `on_create`, stores it.
/// * **Get**: returns a clone of the record, or `None`.
/// * **Update** / **Action**: mutate the record in place through its hooks.
/// * **Delete**: runs `on_delete` and removes the record.
/// * **Scan**: clones every record. With an observer, each record is first told about the
///   observer, and records reporting `is_expired()` are evicted after the clone is taken.
pub struct ResourceActor<T: ActorEntity> {
    receiver: mpsc::Receiver<ResourceRequest<T>>,
    store: HashMap<T::Id, T>,
    next_id: u32,
}

impl<T: ActorEntity> ResourceActor<T> {
    /// Creates a new `ResourceActor` and its associated `ResourceClient`.
    ///
    /// `buffer_size` is the capacity of the request channel; clients wait for space when it
    /// is full.
    pub fn new(buffer_size: usize) -> (Self, ResourceClient<T>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let actor = Self {
            receiver,
            store: HashMap::new(),
            next_id: 1,
        };
        let client = ResourceClient::new(sender);
        (actor, client)
    }

    /// Runs the actor's event loop, processing messages until the channel closes.
    ///
    /// The `context` is handed to every record hook.
    pub async fn run(mut self, context: T::Context) {
        let entity_type = std::any::type_name::<T>()
            .split("::")
            .last()
            .unwrap_or("Unknown");
        info!(entity_type, "Registry started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                ResourceRequest::Create { params, respond_to } => {
                    debug!(entity_type, ?params, "Create");
                    let id = T::Id::from(self.next_id);
                    self.next_id += 1;

                    match T::from_create_params(id.clone(), params) {
                        Ok(mut item) => {
                            if let Err(e) = item.on_create(&context).await {
                                warn!(entity_type, error = %e, "on_create failed");
                                let _ =
                                    respond_to.send(Err(FrameworkError::EntityError(Box::new(e))));
                                continue;
                            }
                            self.store.insert(id.clone(), item);
                            debug!(entity_type, %id, size = self.store.len(), "Created");
                            let _ = respond_to.send(Ok(id));
                        }
                        Err(e) => {
                            warn!(entity_type, error = %e, "Create failed");
                            let _ = respond_to.send(Err(FrameworkError::EntityError(Box::new(e))));
                        }
                    }
                }
                ResourceRequest::Get { id, respond_to } => {
                    let item = self.store.get(&id).cloned();
                    debug!(entity_type, %id, found = item.is_some(), "Get");
                    let _ = respond_to.send(Ok(item));
                }
                ResourceRequest::Update {
                    id,
                    update,
                    respond_to,
                } => {
                    debug!(entity_type, %id, ?update, "Update");
                    let Some(item) = self.store.get_mut(&id) else {
                        warn!(entity_type, %id, "Not found");
                        let _ = respond_to.send(Err(FrameworkError::NotFound(id.to_string())));
                        continue;
                    };
                    let result = match item.on_update(update, &context).await {
                        Ok(()) => Ok(item.clone()),
                        Err(e) => {
                            warn!(entity_type, %id, error = %e, "Update failed");
                            Err(FrameworkError::EntityError(Box::new(e)))
                        }
                    };
                    let _ = respond_to.send(result);
                }
                ResourceRequest::Delete { id, respond_to } => {
                    debug!(entity_type, %id, "Delete");
                    let Some(item) = self.store.get(&id) else {
                        warn!(entity_type, %id, "Not found");
                        let _ = respond_to.send(Err(FrameworkError::NotFound(id.to_string())));
                        continue;
                    };
                    if let Err(e) = item.on_delete(&context).await {
                        warn!(entity_type, %id, error = %e, "on_delete failed");
                        let _ = respond_to.send(Err(FrameworkError::EntityError(Box::new(e))));
                        continue;
                    }
                    self.store.remove(&id);
                    debug!(entity_type, %id, size = self.store.len(), "Deleted");
                    let _ = respond_to.send(Ok(()));
                }
                ResourceRequest::Action {
                    id,
                    action,
                    respond_to,
                } => {
                    debug!(entity_type, %id, ?action, "Action");
                    let Some(item) = self.store.get_mut(&id) else {
                        warn!(entity_type, %id, "Not found");
                        let _ = respond_to.send(Err(FrameworkError::NotFound(id.to_string())));
                        continue;
                    };
                    let result = item
                        .handle_action(action, &context)
                        .await
                        .map_err(|e| FrameworkError::EntityError(Box::new(e)));
                    if let Err(e) = &result {
                        warn!(entity_type, %id, error = %e, "Action failed");
                    }
                    let _ = respond_to.send(result);
                }
                ResourceRequest::Scan {
                    observer,
                    respond_to,
                } => {
                    let snapshot = self.scan(observer);
                    debug!(entity_type, ?observer, size = snapshot.len(), "Scan");
                    let _ = respond_to.send(Ok(snapshot));
                }
            }
        }

        info!(entity_type, size = self.store.len(), "Registry shutdown");
    }

    fn scan(&mut self, observer: Option<T::Observer>) -> Vec<T> {
        let Some(observer) = observer else {
            return self.store.values().cloned().collect();
        };

        let snapshot = self
            .store
            .values_mut()
            .map(|item| {
                item.on_observe(observer);
                item.clone()
            })
            .collect();

        let before = self.store.len();
        self.store.retain(|_, item| !item.is_expired());
        let evicted = before - self.store.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.store.len(), "Evicted expired records");
        }
        snapshot
    }
}
