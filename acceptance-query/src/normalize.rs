//! Event and property name normalization
//!
//! Event names and parameter keys come straight from the simulator trace and may
//! contain spaces, slashes or punctuation. Columns derived from them must be
//! plain identifiers so the filter language can reference them, and distinct
//! inputs must never share a column.
//!
//! The encoding keeps ASCII letters and digits and escapes everything else with
//! a two character `_` code:
//!
//! | input        | output            |
//! |--------------|-------------------|
//! | `_`          | `_u`              |
//! | space        | `_s`              |
//! | `/`          | `_l`              |
//! | any other    | `_x` + 6 hex digits |
//!
//! Every `_` in an encoded name is therefore followed by one of `u`, `s`, `l`,
//! `x`, which makes the encoding prefix-free. [`normalize_column`] joins event
//! and key with `__`, a sequence no encoded name contains.

/// Separator between the event part and the key part of a property column
pub const KEY_SEPARATOR: &str = "__";

/// Prefix of every event-derived column
pub const EVENT_PREFIX: &str = "Event_";

/// Map an event name to an identifier-safe string
pub fn normalize(event_name: &str) -> String {
    let mut out = String::with_capacity(event_name.len());
    for c in event_name.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => out.push(c),
            '_' => out.push_str("_u"),
            ' ' => out.push_str("_s"),
            '/' => out.push_str("_l"),
            other => out.push_str(&format!("_x{:06x}", other as u32)),
        }
    }
    out
}

/// Map a (property key, event name) pair to an identifier-safe string
pub fn normalize_column(property_key: &str, event_name: &str) -> String {
    format!(
        "{}{}{}",
        normalize(event_name),
        KEY_SEPARATOR,
        normalize(property_key)
    )
}

/// Column flagging the presence of an event
pub fn event_column(event_name: &str) -> String {
    format!("{}{}", EVENT_PREFIX, normalize(event_name))
}

/// Column holding the last seen value of an event parameter
pub fn event_key_column(property_key: &str, event_name: &str) -> String {
    format!(
        "{}{}",
        EVENT_PREFIX,
        normalize_column(property_key, event_name)
    )
}
