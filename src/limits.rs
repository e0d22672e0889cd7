pub const MAX_RESOURCES: usize = 256;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_TOPIC_LEN: usize = 200;
pub const MAX_PARTICIPANTS: usize = 32;
pub const MAX_PARTICIPANT_NAME_LEN: usize = 100;
pub const MAX_REQUESTER_NAME_LEN: usize = 100;

/// Length in characters. Limits count characters, not bytes, so Lao or Thai names
/// get the same room as Latin ones.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// `s` cut to at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}
