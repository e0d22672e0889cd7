use chrono::NaiveDate;
use tracing::warn;

use crate::model::*;

/// Materialize the occupancy grid for `date`.
///
/// Resources come out sorted by name (then id), so identical inputs in any order
/// produce an identical timetable. Each slot gets the first confirmed reservation of
/// that resource and date overlapping it, in `(start, end, id)` order. A second
/// overlapping reservation breaks the no-double-booking invariant; it is logged and
/// counted, and the first one stays attached.
pub fn build(
    resources: &[Resource],
    slots: &[Slot],
    reservations: &[Reservation],
    date: NaiveDate,
) -> Timetable {
    let mut ordered: Vec<&Resource> = resources.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    let mut relevant: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| r.date == date && r.is_confirmed())
        .collect();
    relevant.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then(a.span.end.cmp(&b.span.end))
            .then(a.id.cmp(&b.id))
    });

    let schedules = ordered
        .into_iter()
        .map(|resource| {
            let own: Vec<&Reservation> = relevant
                .iter()
                .copied()
                .filter(|r| r.resource_id == resource.id)
                .collect();
            let entries = slots
                .iter()
                .map(|slot| OccupancyEntry {
                    slot: *slot,
                    reservation: occupant(resource, slot, &own).cloned(),
                })
                .collect();
            ResourceSchedule {
                resource: resource.clone(),
                entries,
            }
        })
        .collect();

    Timetable { date, schedules }
}

fn occupant<'a>(resource: &Resource, slot: &Slot, own: &[&'a Reservation]) -> Option<&'a Reservation> {
    let mut hits = own.iter().copied().filter(|r| r.span.overlaps(&slot.span));
    let first = hits.next()?;
    for extra in hits {
        if extra.span.overlaps(&first.span) {
            warn!(
                resource = %resource.name,
                slot = %slot.span,
                kept = %first.id,
                ignored = %extra.id,
                "double booking detected while building timetable"
            );
            metrics::counter!(crate::observability::DOUBLE_BOOKINGS_DETECTED_TOTAL).increment(1);
        }
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::slots::generate;
    use crate::observability::DOUBLE_BOOKINGS_DETECTED_TOTAL;
    use chrono::{NaiveTime, Utc};
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use ulid::Ulid;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn room(name: &str) -> Resource {
        Resource {
            id: Ulid::new(),
            name: name.into(),
            status: ResourceStatus::Active,
        }
    }

    fn booking(resource: &Resource, start: NaiveTime, end: NaiveTime) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id: resource.id,
            resource_name: resource.name.clone(),
            requester_id: 1,
            requester_name: "Alice".into(),
            topic: "Planning".into(),
            date: day(),
            span: Span::new(start, end),
            status: ReservationStatus::Confirmed,
            created_at: Utc::now(),
            participants: vec![],
        }
    }

    fn booked_indices(schedule: &ResourceSchedule) -> Vec<usize> {
        schedule
            .entries
            .iter()
            .filter(|e| !e.is_free())
            .map(|e| e.slot.index)
            .collect()
    }

    #[test]
    fn single_booking_marks_one_slot() {
        let rooms = vec![room("Room A"), room("Room B"), room("Room C")];
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let res = vec![booking(&rooms[0], hm(10, 0), hm(11, 0))];
        let tt = build(&rooms, &slots, &res, day());

        assert_eq!(tt.schedules.len(), 3);
        let a = tt.schedule("Room A").unwrap();
        assert_eq!(a.entries.len(), 8);
        assert_eq!(booked_indices(a), vec![1]);
        assert_eq!(a.entries[1].reservation.as_ref().unwrap().id, res[0].id);
        assert!(booked_indices(tt.schedule("Room B").unwrap()).is_empty());
        assert!(booked_indices(tt.schedule("Room C").unwrap()).is_empty());
    }

    #[test]
    fn unaligned_booking_marks_every_touched_slot() {
        let rooms = vec![room("Room A")];
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let res = vec![booking(&rooms[0], hm(10, 30), hm(12, 15))];
        let tt = build(&rooms, &slots, &res, day());
        assert_eq!(booked_indices(&tt.schedules[0]), vec![1, 2, 3]);
    }

    #[test]
    fn resources_sorted_by_name_regardless_of_input_order() {
        let rooms = vec![room("Room C"), room("Room A"), room("Room B")];
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let tt = build(&rooms, &slots, &[], day());
        let names: Vec<_> = tt.schedules.iter().map(|s| s.resource.name.as_str()).collect();
        assert_eq!(names, vec!["Room A", "Room B", "Room C"]);
    }

    #[test]
    fn build_is_deterministic() {
        let rooms = vec![room("Room B"), room("Room A")];
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let res = vec![
            booking(&rooms[1], hm(13, 0), hm(14, 0)),
            booking(&rooms[0], hm(9, 0), hm(10, 30)),
            booking(&rooms[1], hm(10, 0), hm(11, 0)),
        ];
        let first = build(&rooms, &slots, &res, day());

        let mut rooms_rev = rooms.clone();
        rooms_rev.reverse();
        let mut res_rev = res.clone();
        res_rev.reverse();
        for _ in 0..3 {
            assert_eq!(build(&rooms, &slots, &res, day()), first);
            assert_eq!(build(&rooms_rev, &slots, &res_rev, day()), first);
        }
    }

    #[test]
    fn other_dates_and_cancelled_are_free() {
        let rooms = vec![room("Room A")];
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let mut cancelled = booking(&rooms[0], hm(9, 0), hm(10, 0));
        cancelled.status = ReservationStatus::Cancelled;
        let mut tomorrow = booking(&rooms[0], hm(11, 0), hm(12, 0));
        tomorrow.date = day().succ_opt().unwrap();
        let tt = build(&rooms, &slots, &[cancelled, tomorrow], day());
        assert!(tt.schedules[0].entries.iter().all(OccupancyEntry::is_free));
    }

    /// Counts double-booking detections; every other metric is dropped.
    #[derive(Default)]
    struct DoubleBookingRecorder {
        detected: Arc<AtomicU64>,
    }

    impl DoubleBookingRecorder {
        fn detected(&self) -> u64 {
            self.detected.load(Ordering::Relaxed)
        }
    }

    impl Recorder for DoubleBookingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            if key.name() == DOUBLE_BOOKINGS_DETECTED_TOTAL {
                Counter::from_arc(self.detected.clone())
            } else {
                Counter::noop()
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn double_booking_keeps_first_and_is_counted() {
        let rooms = vec![room("Room A")];
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let early = booking(&rooms[0], hm(10, 0), hm(11, 0));
        let late = booking(&rooms[0], hm(10, 30), hm(11, 0));

        let recorder = DoubleBookingRecorder::default();
        let tt = metrics::with_local_recorder(&recorder, || {
            build(&rooms, &slots, &[late, early.clone()], day())
        });

        assert_eq!(recorder.detected(), 1);
        let entry = &tt.schedules[0].entries[1];
        assert_eq!(entry.reservation.as_ref().unwrap().id, early.id);
        assert_eq!(booked_indices(&tt.schedules[0]), vec![1]);
    }

    #[test]
    fn adjacent_bookings_in_one_slot_are_not_double_bookings() {
        let rooms = vec![room("Room A")];
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let first_half = booking(&rooms[0], hm(10, 0), hm(10, 30));
        let second_half = booking(&rooms[0], hm(10, 30), hm(11, 0));

        let recorder = DoubleBookingRecorder::default();
        let tt = metrics::with_local_recorder(&recorder, || {
            build(&rooms, &slots, &[second_half, first_half.clone()], day())
        });

        assert_eq!(recorder.detected(), 0);
        let entry = &tt.schedules[0].entries[1];
        assert_eq!(entry.reservation.as_ref().unwrap().id, first_half.id);
        assert_eq!(booked_indices(&tt.schedules[0]), vec![1]);
    }

    #[test]
    fn every_attached_reservation_overlaps_its_slot() {
        let rooms = vec![room("Room A"), room("Room B")];
        let slots = generate(hm(8, 0), hm(18, 0), 30).unwrap();
        let res = vec![
            booking(&rooms[0], hm(8, 10), hm(9, 5)),
            booking(&rooms[0], hm(12, 0), hm(12, 30)),
            booking(&rooms[1], hm(17, 45), hm(18, 0)),
        ];
        let tt = build(&rooms, &slots, &res, day());
        for schedule in &tt.schedules {
            for entry in &schedule.entries {
                if let Some(r) = &entry.reservation {
                    assert!(r.span.overlaps(&entry.slot.span));
                    assert_eq!(r.resource_id, schedule.resource.id);
                }
            }
        }
    }

    #[test]
    fn no_resources_gives_empty_timetable() {
        let slots = generate(hm(9, 0), hm(17, 0), 60).unwrap();
        let tt = build(&[], &slots, &[], day());
        assert!(tt.is_empty());
        assert_eq!(tt.date, day());
    }
}
