mod log_store;

pub use log_store::{LogStore, SharedResourceState};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::engine::EngineError;
use crate::model::*;

/// Persistence collaborator of the engine. Rows come back as typed records with
/// resource and requester display names already resolved.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Create the requester or refresh its display fields.
    async fn register_requester(&self, requester: Requester) -> Result<(), EngineError>;

    /// Administrative seeding. Idempotent by name: an existing resource is returned as is.
    async fn seed_resource(&self, name: &str) -> Result<Resource, EngineError>;

    async fn set_resource_status(
        &self,
        id: ResourceId,
        status: ResourceStatus,
    ) -> Result<(), EngineError>;

    /// Active resources ordered by name.
    async fn list_active_resources(&self) -> Result<Vec<Resource>, EngineError>;

    async fn list_confirmed_reservations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError>;

    /// Conflict check and insert as one atomic step. Fails with
    /// `EngineError::Conflict` when a confirmed reservation of the same resource and
    /// date overlaps the request.
    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError>;

    /// Confirmed reservations of `requester_id` dated `on_or_after` or later, ordered by
    /// date then start time.
    async fn list_reservations_for_requester(
        &self,
        requester_id: RequesterId,
        on_or_after: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError>;

    /// `EngineError::NotFound` if the reservation is absent, already cancelled, or
    /// belongs to someone else.
    async fn cancel_reservation(
        &self,
        id: ReservationId,
        requester_id: RequesterId,
    ) -> Result<Reservation, EngineError>;
}
