use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type ResourceId = Ulid;
pub type ReservationId = Ulid;
/// Chat user id of the person making the request.
pub type RequesterId = i64;

/// Half-open interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for empty or inverted ranges.
    pub fn checked(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_time(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Active,
    Inactive,
}

/// A bookable room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub status: ResourceStatus,
}

impl Resource {
    pub fn is_active(&self) -> bool {
        self.status == ResourceStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: RequesterId,
    pub username: Option<String>,
    pub full_name: String,
}

impl Requester {
    /// Name shown on timetables: the full name, falling back to the username.
    pub fn display_name(&self) -> String {
        let full = self.full_name.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        match &self.username {
            Some(u) if !u.is_empty() => format!("@{u}"),
            _ => format!("user {}", self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

/// A claim on a resource for one interval on one date. Resource and requester display
/// fields are resolved by the store when the reservation is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub requester_id: RequesterId,
    pub requester_name: String,
    pub topic: String,
    pub date: NaiveDate,
    pub span: Span,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    /// Display order only.
    pub participants: Vec<String>,
}

impl Reservation {
    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

/// A complete reservation request, before the store assigns id and creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub resource_id: ResourceId,
    pub requester_id: RequesterId,
    pub topic: String,
    pub date: NaiveDate,
    pub span: Span,
    pub participants: Vec<String>,
}

/// One bookable interval of the day grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: usize,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyEntry {
    pub slot: Slot,
    /// `None` means free.
    pub reservation: Option<Reservation>,
}

impl OccupancyEntry {
    pub fn is_free(&self) -> bool {
        self.reservation.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchedule {
    pub resource: Resource,
    pub entries: Vec<OccupancyEntry>,
}

/// Occupancy of every resource on one date, resources ordered by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timetable {
    pub date: NaiveDate,
    pub schedules: Vec<ResourceSchedule>,
}

impl Timetable {
    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn schedule(&self, resource_name: &str) -> Option<&ResourceSchedule> {
        self.schedules.iter().find(|s| s.resource.name == resource_name)
    }
}

/// Per-resource state held by the store: the resource plus all its reservations,
/// sorted by `(date, span.start)`.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by `(date, start)`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = (reservation.date, reservation.span.start);
        let pos = self
            .reservations
            .binary_search_by_key(&key, |r| (r.date, r.span.start))
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn get_mut(&mut self, id: ReservationId) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// All reservations on `date`, any status.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        let lo = self.reservations.partition_point(|r| r.date < date);
        let hi = self.reservations.partition_point(|r| r.date <= date);
        self.reservations[lo..hi].iter()
    }

    pub fn confirmed_on(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.on_date(date).filter(|r| r.is_confirmed())
    }
}

/// WAL record. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RequesterRegistered {
        requester: Requester,
    },
    ResourceCreated {
        id: ResourceId,
        name: String,
    },
    ResourceStatusChanged {
        id: ResourceId,
        status: ResourceStatus,
    },
    ReservationConfirmed {
        id: ReservationId,
        resource_id: ResourceId,
        requester_id: RequesterId,
        topic: String,
        date: NaiveDate,
        span: Span,
        created_at: DateTime<Utc>,
        participants: Vec<String>,
    },
    ReservationCancelled {
        id: ReservationId,
        resource_id: ResourceId,
    },
}

#[cfg(test)]
pub(crate) fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}
