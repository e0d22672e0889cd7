use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveTime;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, format_date, format_time, render_reservation_list, render_timetable};
use crate::limits::*;
use crate::model::*;
use crate::session::{DialogSession, DialogStep, SessionTracker};

pub const UNKNOWN_COMMAND: &str = "Unknown command. Type /help for available commands.";

/// One chat message from one requester.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub requester: Requester,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Book,
    MyBookings,
    /// Optional booking id argument.
    Cancel(Option<String>),
    Abort,
    /// Free text, meaningful only inside a dialog.
    Text(String),
    Unknown(String),
}

pub fn parse_command(text: &str) -> Command {
    let text = text.trim();
    if !text.starts_with('/') {
        return Command::Text(text.to_string());
    }
    let mut parts = text.split_whitespace();
    let head = parts.next().unwrap_or_default();
    // "/book@SomeBot" addresses the bot in group chats
    let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
    match name.as_str() {
        "/start" => Command::Start,
        "/help" => Command::Help,
        "/book" => Command::Book,
        "/mybookings" => Command::MyBookings,
        "/cancel" => Command::Cancel(parts.next().map(str::to_string)),
        "/abort" => Command::Abort,
        _ => Command::Unknown(head.to_string()),
    }
}

/// Routes inbound chat messages to the engine and the dialog tracker, producing the
/// reply messages in order.
pub struct Dispatcher {
    engine: Arc<Engine>,
    sessions: SessionTracker,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, sessions: SessionTracker) -> Self {
        Self { engine, sessions }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub async fn handle(&self, inbound: Inbound) -> Vec<String> {
        let cmd = parse_command(&inbound.text);
        let label = crate::observability::command_label(&cmd);
        let started = Instant::now();

        let replies = match self.execute(&inbound.requester, cmd).await {
            Ok(replies) => replies,
            Err(e) => {
                error!(requester = inbound.requester.id, command = label, "command failed: {e}");
                vec!["Sorry, something went wrong. Please try again later.".to_string()]
            }
        };

        metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => label).increment(1);
        metrics::histogram!(crate::observability::COMMAND_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        replies
    }

    async fn execute(&self, requester: &Requester, cmd: Command) -> Result<Vec<String>, EngineError> {
        match cmd {
            Command::Start => {
                self.register(requester).await;
                Ok(vec![welcome_text()])
            }
            Command::Help => {
                let rooms = self.engine.list_resources().await?;
                Ok(vec![self.help_text(&rooms)])
            }
            Command::Book => self.begin_booking(requester).await,
            Command::MyBookings => {
                let mine = self.engine.reservations_for(requester.id).await?;
                Ok(vec![render_reservation_list(&mine)])
            }
            Command::Cancel(None) => {
                let mine = self.engine.reservations_for(requester.id).await?;
                if mine.is_empty() {
                    return Ok(vec![render_reservation_list(&mine)]);
                }
                Ok(vec![
                    render_reservation_list(&mine),
                    "To cancel, send /cancel <booking ID>".to_string(),
                ])
            }
            Command::Cancel(Some(arg)) => self.cancel(requester, &arg).await,
            Command::Abort => {
                if self.sessions.clear(requester.id).await {
                    Ok(vec!["Booking aborted.".to_string()])
                } else {
                    Ok(vec!["No booking in progress.".to_string()])
                }
            }
            Command::Text(text) => match self.sessions.get(requester.id).await {
                Some(session) => self.advance(requester, session, &text).await,
                None => Ok(vec![UNKNOWN_COMMAND.to_string()]),
            },
            Command::Unknown(_) => Ok(vec![UNKNOWN_COMMAND.to_string()]),
        }
    }

    /// Registration only feeds display names, so a failure never blocks the command.
    async fn register(&self, requester: &Requester) {
        if let Err(e) = self.engine.register_requester(requester.clone()).await {
            warn!(requester = requester.id, "registration failed: {e}");
        }
    }

    async fn begin_booking(&self, requester: &Requester) -> Result<Vec<String>, EngineError> {
        self.register(requester).await;
        let timetable = self.engine.build_timetable_for_today().await?;
        let rooms = self.engine.list_resources().await?;
        if rooms.is_empty() {
            return Ok(vec![render_timetable(&timetable)]);
        }
        self.sessions.start(requester.id).await;
        Ok(vec![render_timetable(&timetable), room_prompt(&rooms)])
    }

    async fn cancel(&self, requester: &Requester, arg: &str) -> Result<Vec<String>, EngineError> {
        let Ok(id) = Ulid::from_string(arg) else {
            return Ok(vec![format!("Invalid booking ID: {arg}")]);
        };
        match self.engine.cancel(id, requester.id).await {
            Ok(r) => Ok(vec![format!(
                "🗑 Booking cancelled: {}, {} {}",
                r.resource_name,
                format_date(r.date),
                r.span
            )]),
            Err(EngineError::NotFound(_)) => {
                Ok(vec!["Booking not found or already cancelled.".to_string()])
            }
            Err(e) => Err(e),
        }
    }

    /// Feed one free-text answer into the requester's dialog.
    async fn advance(
        &self,
        requester: &Requester,
        mut session: DialogSession,
        text: &str,
    ) -> Result<Vec<String>, EngineError> {
        debug!(requester = requester.id, step = ?session.step, "dialog input");
        match session.step {
            DialogStep::SelectResource => {
                let rooms = self.engine.list_resources().await?;
                let Some(room) = pick_room(&rooms, text) else {
                    return Ok(vec![format!("Unknown room: {text}"), room_prompt(&rooms)]);
                };
                let date = Engine::today();
                let free = self.free_starts(room.id, date).await?;
                session.draft.resource_id = Some(room.id);
                session.draft.resource_name = Some(room.name.clone());
                session.draft.date = Some(date);
                session.step = DialogStep::SelectTime;
                self.sessions.update(requester.id, session).await;
                Ok(vec![time_prompt(&room.name, &free)])
            }
            DialogStep::SelectTime => {
                let (Some(resource_id), Some(date)) = (session.draft.resource_id, session.draft.date)
                else {
                    return self.restart(requester).await;
                };
                let span = match self.parse_span(text) {
                    Ok(span) => span,
                    Err(msg) => return Ok(vec![msg]),
                };
                if !self.engine.check_available(resource_id, date, span).await? {
                    let name = session.draft.resource_name.clone().unwrap_or_default();
                    let free = self.free_starts(resource_id, date).await?;
                    return Ok(vec![
                        format!("❌ {name} is already booked during {span}."),
                        time_prompt(&name, &free),
                    ]);
                }
                session.draft.span = Some(span);
                session.step = DialogStep::EnterTopic;
                self.sessions.update(requester.id, session).await;
                Ok(vec!["📝 Enter the meeting topic:".to_string()])
            }
            DialogStep::EnterTopic => {
                let topic = text.trim();
                if topic.is_empty() {
                    return Ok(vec!["Topic cannot be empty. Enter the meeting topic:".to_string()]);
                }
                if char_len(topic) > MAX_TOPIC_LEN {
                    return Ok(vec![format!(
                        "Topic is too long (max {MAX_TOPIC_LEN} characters). Enter a shorter topic:"
                    )]);
                }
                session.draft.topic = Some(topic.to_string());
                session.step = DialogStep::EnterParticipants;
                self.sessions.update(requester.id, session).await;
                Ok(vec![
                    "👥 Enter participant names separated by commas, or - for none:".to_string(),
                ])
            }
            DialogStep::EnterParticipants => {
                session.draft.participants = parse_participants(text);
                let Some(request) = session.draft.to_request(requester.id) else {
                    return self.restart(requester).await;
                };
                match self.engine.reserve(request).await {
                    Ok(r) => {
                        self.sessions.clear(requester.id).await;
                        Ok(vec![confirmation_text(&r)])
                    }
                    Err(EngineError::Conflict(_)) => {
                        self.sessions.clear(requester.id).await;
                        let name = session.draft.resource_name.unwrap_or_default();
                        let span = session.draft.span.map(|s| s.to_string()).unwrap_or_default();
                        Ok(vec![format!(
                            "❌ Sorry, {name} was booked by someone else for {span}. Use /book to try again."
                        )])
                    }
                    Err(EngineError::LimitExceeded(msg)) => Ok(vec![format!(
                        "Invalid participants: {msg}. Enter participant names separated by commas, or - for none:"
                    )]),
                    Err(e) => {
                        self.sessions.clear(requester.id).await;
                        Err(e)
                    }
                }
            }
        }
    }

    /// A session with missing draft fields cannot continue.
    async fn restart(&self, requester: &Requester) -> Result<Vec<String>, EngineError> {
        warn!(requester = requester.id, "dialog state incomplete, starting over");
        self.sessions.clear(requester.id).await;
        Ok(vec!["Your booking session expired. Use /book to start again.".to_string()])
    }

    /// `HH:MM` selects the grid slot starting then; `HH:MM-HH:MM` is taken as given.
    fn parse_span(&self, text: &str) -> Result<Span, String> {
        let text = text.trim();
        if let Some((start, end)) = text.split_once('-') {
            let (Some(start), Some(end)) = (parse_hhmm(start), parse_hhmm(end)) else {
                return Err(format!("Invalid time range: {text}. Use HH:MM-HH:MM."));
            };
            return Span::checked(start, end)
                .ok_or_else(|| "End time must be after start time.".to_string());
        }
        let Some(start) = parse_hhmm(text) else {
            return Err(format!("Invalid time: {text}. Use HH:MM or HH:MM-HH:MM."));
        };
        self.engine
            .grid()
            .slot_starting_at(start)
            .map(|slot| slot.span)
            .ok_or_else(|| format!("No slot starts at {}.", format_time(start)))
    }

    async fn free_starts(
        &self,
        resource_id: ResourceId,
        date: chrono::NaiveDate,
    ) -> Result<Vec<NaiveTime>, EngineError> {
        let timetable = self.engine.build_timetable_for_date(date).await?;
        Ok(timetable
            .schedules
            .iter()
            .filter(|s| s.resource.id == resource_id)
            .flat_map(|s| &s.entries)
            .filter(|e| e.is_free())
            .map(|e| e.slot.span.start)
            .collect())
    }

    fn help_text(&self, rooms: &[Resource]) -> String {
        let grid = self.engine.grid();
        let mut out = String::from(
            "🏢 Room Booking Help\n\n\
             Available commands:\n\
             /book - Book a meeting room\n\
             /mybookings - Show your bookings\n\
             /cancel - Cancel a booking\n\
             /abort - Abort the booking in progress\n\
             /help - Show this help message\n\n\
             How to book:\n\
             1. Type /book\n\
             2. Pick a room by name or number\n\
             3. Enter a start time (HH:MM) or a range (HH:MM-HH:MM)\n\
             4. Enter the topic and participants\n\n\
             Rooms available:\n",
        );
        for room in rooms {
            let _ = writeln!(out, "- {}", room.name);
        }
        let _ = write!(
            out,
            "\nOperating hours:\n{} - {} ({}-minute slots)",
            format_time(grid.day_start()),
            format_time(grid.day_end()),
            grid.duration_minutes()
        );
        out
    }
}

fn welcome_text() -> String {
    "Welcome to Room Booking 🏢\n\n\
     Available commands:\n\
     /book - Book a meeting room\n\
     /mybookings - Show your bookings\n\
     /cancel - Cancel your booking\n\
     /help - Show help message\n\n\
     Let's get started!"
        .to_string()
}

fn room_prompt(rooms: &[Resource]) -> String {
    let mut out = String::from("Please select a room:\n");
    for (i, room) in rooms.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, room.name);
    }
    out
}

fn time_prompt(room: &str, free: &[NaiveTime]) -> String {
    if free.is_empty() {
        return format!(
            "🏢 {room} has no free slots today. Enter a custom range (HH:MM-HH:MM) or /abort."
        );
    }
    let starts: Vec<String> = free.iter().copied().map(format_time).collect();
    format!(
        "🏢 {room}\n⏰ Free slots: {}\nEnter a start time (HH:MM) or a range (HH:MM-HH:MM):",
        starts.join(", ")
    )
}

fn confirmation_text(r: &Reservation) -> String {
    let mut out = String::from("✅ Booking confirmed!\n\n");
    let _ = writeln!(out, "🏢 {}", r.resource_name);
    let _ = writeln!(out, "📅 {}", format_date(r.date));
    let _ = writeln!(out, "⏰ {} - {}", format_time(r.span.start), format_time(r.span.end));
    let _ = writeln!(out, "📝 {}", r.topic);
    if !r.participants.is_empty() {
        let _ = writeln!(out, "👥 {}", r.participants.join(", "));
    }
    let _ = write!(out, "🔖 ID: {}", r.id);
    out
}

/// Room by 1-based list number or case-insensitive name.
fn pick_room<'a>(rooms: &'a [Resource], text: &str) -> Option<&'a Resource> {
    let text = text.trim();
    if let Ok(n) = text.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| rooms.get(i));
    }
    rooms.iter().find(|r| r.name.eq_ignore_ascii_case(text))
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Comma separated names; `-` or blank means none.
fn parse_participants(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || text == "-" {
        return Vec::new();
    }
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
