use std::fmt::Write;

use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

pub const EMPTY_TIMETABLE: &str = "No schedule available.";
pub const EMPTY_RESERVATION_LIST: &str = "You have no active bookings.";

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d %b %Y").to_string()
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn render_timetable(timetable: &Timetable) -> String {
    if timetable.is_empty() {
        return EMPTY_TIMETABLE.to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "📅 Room Schedule - {}", format_date(timetable.date));
    out.push('\n');

    for schedule in &timetable.schedules {
        let _ = writeln!(out, "🏢 {}", schedule.resource.name);
        for entry in &schedule.entries {
            let (start, end) = (format_time(entry.slot.span.start), format_time(entry.slot.span.end));
            match &entry.reservation {
                None => {
                    let _ = writeln!(out, "  ✅ {start}-{end} FREE");
                }
                Some(r) => {
                    let _ = writeln!(out, "  ❌ {start}-{end} BOOKED");
                    let _ = writeln!(out, "     👤 By: {}", r.requester_name);
                    let _ = writeln!(out, "     📝 {}", r.topic);
                    if !r.participants.is_empty() {
                        let _ = writeln!(out, "     👥 {}", r.participants.join(", "));
                    }
                }
            }
        }
        out.push('\n');
    }

    out
}

pub fn render_reservation_list(reservations: &[Reservation]) -> String {
    if reservations.is_empty() {
        return EMPTY_RESERVATION_LIST.to_string();
    }

    let mut out = String::from("Your Bookings:\n\n");
    for (i, r) in reservations.iter().enumerate() {
        let _ = writeln!(out, "{}. 🏢 {}", i + 1, r.resource_name);
        let _ = writeln!(out, "   📅 {}", format_date(r.date));
        let _ = writeln!(
            out,
            "   ⏰ {} - {}",
            format_time(r.span.start),
            format_time(r.span.end)
        );
        let _ = writeln!(out, "   📝 {}", r.topic);
        if !r.participants.is_empty() {
            let _ = writeln!(out, "   👥 {}", r.participants.join(", "));
        }
        let _ = writeln!(out, "   🔖 ID: {}", r.id);
        out.push('\n');
    }

    out
}
