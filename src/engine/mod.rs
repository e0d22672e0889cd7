mod conflict;
mod error;
mod present;
mod slots;
mod timetable;

pub use conflict::{check_no_conflict, find_conflict, has_conflict, validate_request};
pub use error::EngineError;
pub use present::{
    EMPTY_RESERVATION_LIST, EMPTY_TIMETABLE, format_date, format_time, render_reservation_list,
    render_timetable,
};
pub use slots::{SlotGrid, generate as generate_slots};
pub use timetable::build as build_timetable;

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::model::*;
use crate::store::ReservationStore;

/// Entry point for everything the front end does with reservations.
///
/// Reads go through the store and the pure timetable/presenter functions. Writes are
/// validated here and then handed to the store, which owns the atomic
/// check-and-insert.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    grid: SlotGrid,
}

impl Engine {
    pub fn new(store: Arc<dyn ReservationStore>, grid: SlotGrid) -> Self {
        Self { store, grid }
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    /// Local calendar date.
    pub fn today() -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    pub async fn seed_resources<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<Resource>, EngineError> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(self.store.seed_resource(name.as_ref()).await?);
        }
        info!(count = out.len(), "resources seeded");
        Ok(out)
    }

    pub async fn register_requester(&self, requester: Requester) -> Result<(), EngineError> {
        self.store.register_requester(requester).await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, EngineError> {
        self.store.list_active_resources().await
    }

    pub async fn build_timetable_for_date(&self, date: NaiveDate) -> Result<Timetable, EngineError> {
        let started = Instant::now();
        let resources = self.store.list_active_resources().await?;
        let reservations = self.store.list_confirmed_reservations(date).await?;
        let timetable = build_timetable(&resources, self.grid.slots(), &reservations, date);
        metrics::histogram!(crate::observability::TIMETABLE_BUILD_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(timetable)
    }

    pub async fn build_timetable_for_today(&self) -> Result<Timetable, EngineError> {
        self.build_timetable_for_date(Self::today()).await
    }

    /// Advisory check for a dialog about to ask for a topic. `reserve` checks again
    /// atomically, so `true` here is no promise.
    pub async fn check_available(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        span: Span,
    ) -> Result<bool, EngineError> {
        if span.start >= span.end {
            return Err(EngineError::InvalidSpan);
        }
        let existing = self.store.list_confirmed_reservations(date).await?;
        Ok(!has_conflict(resource_id, date, &span, &existing))
    }

    pub async fn reserve(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        if let Err(e) = validate_request(&new) {
            metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "rejected")
                .increment(1);
            return Err(e);
        }

        let (resource_id, date, span) = (new.resource_id, new.date, new.span);
        match self.store.insert_reservation(new).await {
            Ok(reservation) => {
                metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "confirmed")
                    .increment(1);
                info!(
                    id = %reservation.id,
                    resource = %reservation.resource_name,
                    %date,
                    %span,
                    requester = reservation.requester_id,
                    "reservation confirmed"
                );
                Ok(reservation)
            }
            Err(EngineError::Conflict(existing)) => {
                metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "conflict")
                    .increment(1);
                info!(%resource_id, %date, %span, %existing, "reservation rejected: conflict");
                Err(EngineError::Conflict(existing))
            }
            Err(e) => {
                let outcome = match e {
                    EngineError::WalError(_) => "error",
                    _ => "rejected",
                };
                metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => outcome)
                    .increment(1);
                warn!(%resource_id, %date, %span, "reservation failed: {e}");
                Err(e)
            }
        }
    }

    pub async fn cancel(
        &self,
        id: ReservationId,
        requester_id: RequesterId,
    ) -> Result<Reservation, EngineError> {
        let cancelled = self.store.cancel_reservation(id, requester_id).await?;
        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL).increment(1);
        info!(%id, requester = requester_id, "reservation cancelled");
        Ok(cancelled)
    }

    /// Confirmed reservations of the requester from today on.
    pub async fn reservations_for(
        &self,
        requester_id: RequesterId,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.reservations_for_from(requester_id, Self::today()).await
    }

    pub async fn reservations_for_from(
        &self,
        requester_id: RequesterId,
        from: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.store
            .list_reservations_for_requester(requester_id, from)
            .await
    }
}
