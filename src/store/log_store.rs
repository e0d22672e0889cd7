use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{EngineError, check_no_conflict, validate_request};
use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::ReservationStore;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// WAL-backed in-memory store.
///
/// Every write to a resource happens under that resource's write lock, so the conflict
/// check and the insert of a reservation are one atomic step. All writes append to the
/// WAL while holding the WAL mutex and apply before releasing it; lock order is always
/// resource, then WAL.
pub struct LogStore {
    resources: DashMap<ResourceId, SharedResourceState>,
    requesters: DashMap<RequesterId, Requester>,
    /// Reverse lookup: reservation id → resource id
    reservation_to_resource: DashMap<ReservationId, ResourceId>,
    wal: Mutex<Wal>,
    /// Serializes seeding so names stay unique.
    seed_lock: Mutex<()>,
}

impl LogStore {
    /// Open the store at `wal_path`, replaying any existing log.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let store = Self {
            resources: DashMap::new(),
            requesters: DashMap::new(),
            reservation_to_resource: DashMap::new(),
            wal: Mutex::new(wal),
            seed_lock: Mutex::new(()),
        };

        // Sole owner during replay: try_write never contends.
        for event in &events {
            match event {
                Event::RequesterRegistered { requester } => {
                    store.requesters.insert(requester.id, requester.clone());
                }
                Event::ResourceCreated { id, name } => {
                    store.insert_resource(*id, name.clone());
                }
                other => {
                    if let Some(rid) = event_resource_id(other)
                        && let Some(rs) = store.get_resource(&rid)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        store.apply_to_resource(&mut guard, other);
                    }
                }
            }
        }

        info!(
            events = events.len(),
            resources = store.resources.len(),
            requesters = store.requesters.len(),
            "store replayed {}",
            wal_path.display()
        );
        Ok(store)
    }

    pub fn get_resource(&self, id: &ResourceId) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn requester(&self, id: RequesterId) -> Option<Requester> {
        self.requesters.get(&id).map(|e| e.value().clone())
    }

    fn requester_name(&self, id: RequesterId) -> String {
        match self.requesters.get(&id) {
            Some(r) => r.display_name(),
            None => format!("user {id}"),
        }
    }

    /// Snapshot of resource handles. Never hold a DashMap ref across an await.
    fn handles(&self) -> Vec<SharedResourceState> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    fn insert_resource(&self, id: ResourceId, name: String) -> Resource {
        let resource = Resource {
            id,
            name,
            status: ResourceStatus::Active,
        };
        self.resources
            .insert(id, Arc::new(RwLock::new(ResourceState::new(resource.clone()))));
        resource
    }

    /// Apply a resource-level event. Caller holds the resource lock.
    fn apply_to_resource(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::ResourceStatusChanged { status, .. } => {
                rs.resource.status = *status;
            }
            Event::ReservationConfirmed {
                id,
                resource_id,
                requester_id,
                topic,
                date,
                span,
                created_at,
                participants,
            } => {
                rs.insert_reservation(Reservation {
                    id: *id,
                    resource_id: *resource_id,
                    resource_name: rs.resource.name.clone(),
                    requester_id: *requester_id,
                    requester_name: self.requester_name(*requester_id),
                    topic: topic.clone(),
                    date: *date,
                    span: *span,
                    status: ReservationStatus::Confirmed,
                    created_at: *created_at,
                    participants: participants.clone(),
                });
                self.reservation_to_resource.insert(*id, *resource_id);
            }
            Event::ReservationCancelled { id, .. } => {
                if let Some(r) = rs.get_mut(*id) {
                    r.status = ReservationStatus::Cancelled;
                }
            }
            Event::RequesterRegistered { .. } | Event::ResourceCreated { .. } => {}
        }
    }

    /// Append `event` durably, then run `apply` while still holding the WAL mutex.
    async fn persist(&self, event: &Event, apply: impl FnOnce()) -> Result<(), EngineError> {
        let mut wal = self.wal.lock().await;
        wal.append(event)
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        apply();
        Ok(())
    }

    /// Copy of a stored reservation with the requester name resolved now.
    fn resolved(&self, r: &Reservation) -> Reservation {
        let mut out = r.clone();
        out.requester_name = self.requester_name(r.requester_id);
        out
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.lock().await.appends_since_compact()
    }

    /// Rewrite the WAL with the minimal events recreating current state. Cancelled
    /// reservations are dropped. Returns `Ok(false)` without touching the log when a
    /// writer currently holds a resource lock; the caller retries later.
    pub async fn compact_wal(&self) -> Result<bool, EngineError> {
        let mut wal = self.wal.lock().await;

        let mut requesters: Vec<Requester> =
            self.requesters.iter().map(|e| e.value().clone()).collect();
        requesters.sort_by_key(|r| r.id);
        let mut events: Vec<Event> = requesters
            .into_iter()
            .map(|requester| Event::RequesterRegistered { requester })
            .collect();

        let mut handles = self.handles();
        handles.sort_by_key(|rs| rs.try_read().map(|g| g.resource.id).ok());
        for rs in &handles {
            // A writer holding a resource lock is waiting on the WAL mutex we hold.
            let Ok(guard) = rs.try_read() else {
                debug!("compaction skipped: resource busy");
                return Ok(false);
            };
            events.push(Event::ResourceCreated {
                id: guard.resource.id,
                name: guard.resource.name.clone(),
            });
            if !guard.resource.is_active() {
                events.push(Event::ResourceStatusChanged {
                    id: guard.resource.id,
                    status: guard.resource.status,
                });
            }
            for r in guard.reservations.iter().filter(|r| r.is_confirmed()) {
                events.push(Event::ReservationConfirmed {
                    id: r.id,
                    resource_id: r.resource_id,
                    requester_id: r.requester_id,
                    topic: r.topic.clone(),
                    date: r.date,
                    span: r.span,
                    created_at: r.created_at,
                    participants: r.participants.clone(),
                });
            }
        }

        wal.compact(&events)
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = events.len(), "compacted {}", wal.path().display());
        Ok(true)
    }
}

#[async_trait]
impl ReservationStore for LogStore {
    async fn register_requester(&self, mut requester: Requester) -> Result<(), EngineError> {
        // Names come from the chat profile; overlong ones are cut, never refused.
        requester.full_name = truncate_chars(&requester.full_name, MAX_REQUESTER_NAME_LEN).to_string();
        if let Some(username) = requester.username.as_mut() {
            *username = truncate_chars(username, MAX_REQUESTER_NAME_LEN).to_string();
        }
        if self.requester(requester.id).as_ref() == Some(&requester) {
            return Ok(());
        }
        let event = Event::RequesterRegistered {
            requester: requester.clone(),
        };
        self.persist(&event, || {
            self.requesters.insert(requester.id, requester);
        })
        .await
    }

    async fn seed_resource(&self, name: &str) -> Result<Resource, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::LimitExceeded("resource name is empty"));
        }
        if char_len(name) > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }

        let _seeding = self.seed_lock.lock().await;
        for rs in self.handles() {
            let guard = rs.read().await;
            if guard.resource.name == name {
                return Ok(guard.resource.clone());
            }
        }
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let id = Ulid::new();
        let event = Event::ResourceCreated {
            id,
            name: name.to_string(),
        };
        let mut created = None;
        self.persist(&event, || {
            created = Some(self.insert_resource(id, name.to_string()));
        })
        .await?;
        info!(%id, name, "resource created");
        created.ok_or(EngineError::UnknownResource(id))
    }

    async fn set_resource_status(
        &self,
        id: ResourceId,
        status: ResourceStatus,
    ) -> Result<(), EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::UnknownResource(id))?;
        let mut guard = rs.write().await;
        if guard.resource.status == status {
            return Ok(());
        }
        let event = Event::ResourceStatusChanged { id, status };
        self.persist(&event, || self.apply_to_resource(&mut guard, &event))
            .await
    }

    async fn list_active_resources(&self) -> Result<Vec<Resource>, EngineError> {
        let mut out = Vec::new();
        for rs in self.handles() {
            let guard = rs.read().await;
            if guard.resource.is_active() {
                out.push(guard.resource.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn list_confirmed_reservations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        for rs in self.handles() {
            let guard = rs.read().await;
            out.extend(guard.confirmed_on(date).map(|r| self.resolved(r)));
        }
        out.sort_by(|a, b| {
            a.resource_name
                .cmp(&b.resource_name)
                .then(a.span.start.cmp(&b.span.start))
        });
        Ok(out)
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        validate_request(&new)?;
        let rs = self
            .get_resource(&new.resource_id)
            .ok_or(EngineError::UnknownResource(new.resource_id))?;
        let mut guard = rs.write().await;
        if !guard.resource.is_active() {
            return Err(EngineError::UnknownResource(new.resource_id));
        }

        check_no_conflict(new.resource_id, new.date, &new.span, guard.on_date(new.date))?;

        let id = Ulid::new();
        let event = Event::ReservationConfirmed {
            id,
            resource_id: new.resource_id,
            requester_id: new.requester_id,
            topic: new.topic.trim().to_string(),
            date: new.date,
            span: new.span,
            created_at: Utc::now(),
            participants: new.participants,
        };
        self.persist(&event, || self.apply_to_resource(&mut guard, &event))
            .await?;

        guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .map(|r| self.resolved(r))
            .ok_or(EngineError::NotFound(id))
    }

    async fn list_reservations_for_requester(
        &self,
        requester_id: RequesterId,
        on_or_after: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        for rs in self.handles() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| {
                        r.requester_id == requester_id && r.is_confirmed() && r.date >= on_or_after
                    })
                    .map(|r| self.resolved(r)),
            );
        }
        out.sort_by(|a, b| {
            (a.date, a.span.start, &a.resource_name).cmp(&(b.date, b.span.start, &b.resource_name))
        });
        Ok(out)
    }

    async fn cancel_reservation(
        &self,
        id: ReservationId,
        requester_id: RequesterId,
    ) -> Result<Reservation, EngineError> {
        let resource_id = self
            .reservation_to_resource
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let owned = guard
            .reservations
            .iter()
            .any(|r| r.id == id && r.is_confirmed() && r.requester_id == requester_id);
        if !owned {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ReservationCancelled { id, resource_id };
        self.persist(&event, || self.apply_to_resource(&mut guard, &event))
            .await?;

        guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .map(|r| self.resolved(r))
            .ok_or(EngineError::NotFound(id))
    }
}

/// Resource targeted by a resource-level event.
fn event_resource_id(event: &Event) -> Option<ResourceId> {
    match event {
        Event::ResourceStatusChanged { id, .. } => Some(*id),
        Event::ReservationConfirmed { resource_id, .. }
        | Event::ReservationCancelled { resource_id, .. } => Some(*resource_id),
        Event::RequesterRegistered { .. } | Event::ResourceCreated { .. } => None,
    }
}
