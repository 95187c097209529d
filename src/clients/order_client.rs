//! # Order Client
//!
//! Provides a high-level API over the order registry. It wraps a `ResourceClient<Order>`
//! and turns status changes into [`OrderAction`]s.
use crate::model::{Order, OrderAction, OrderCreate, OrderId, OrderStatus, Transition};
use crate::order_actor::OrderError;
use async_trait::async_trait;
use pipeline_framework::{ActorClient, FrameworkError, ResourceClient};
use tracing::{debug, instrument};

/// Client for the order registry. Cheap to clone.
#[derive(Clone)]
pub struct OrderClient {
    inner: ResourceClient<Order>,
}

impl OrderClient {
    pub fn new(inner: ResourceClient<Order>) -> Self {
        Self { inner }
    }

    #[instrument(skip(self, params), fields(customer = %params.customer))]
    pub async fn create_order(&self, params: OrderCreate) -> Result<OrderId, OrderError> {
        debug!("Sending create_order to registry");
        self.inner.create(params).await.map_err(OrderError::from)
    }

    /// Like [`ActorClient::get`], but a missing order is an error.
    pub async fn get_order(&self, id: OrderId) -> Result<Order, OrderError> {
        self.inner
            .get(id)
            .await?
            .ok_or_else(|| OrderError::NotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn advance(&self, id: OrderId, next: OrderStatus) -> Result<Transition, OrderError> {
        self.inner
            .perform_action(id, OrderAction::Advance(next))
            .await
            .map_err(OrderError::from)
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: OrderId, cause: String) -> Result<Transition, OrderError> {
        self.inner
            .perform_action(id, OrderAction::Cancel { cause })
            .await
            .map_err(OrderError::from)
    }

    /// `Shipped → Delivered`.
    pub async fn confirm_delivery(&self, id: OrderId) -> Result<Transition, OrderError> {
        self.advance(id, OrderStatus::Delivered).await
    }
}

#[async_trait]
impl ActorClient<Order> for OrderClient {
    type Error = OrderError;

    fn inner(&self) -> &ResourceClient<Order> {
        &self.inner
    }

    fn map_error(e: FrameworkError) -> Self::Error {
        OrderError::from(e)
    }
}

