use anyhow::Result;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{LanguageModel, predict};

/// Atomic unit of extracted history. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    /// When the event happened, as stated in the source text (exact day,
    /// month, year, or a range).
    pub date: String,
    /// What happened.
    pub description: String,
    /// Where the information came from, when stated.
    #[serde(default)]
    pub source: Option<String>,
}

/// Ordered, append-only collection of events for one extraction pass.
/// Single-writer; not shared across tasks.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EventStore {
    pub events: Vec<Event>,
}

impl EventStore {
    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractedEvents {
    events: Vec<Event>,
}

/// Convert a prose timeline into discrete dated events with one structured
/// extraction call, then order them chronologically. The extraction itself
/// is not hardened: model failures propagate to the caller.
pub async fn extract_events(
    model: &dyn LanguageModel,
    model_id: &str,
    topic: &str,
    content: &str,
) -> Result<Vec<Event>> {
    let extracted = predict::<ExtractedEvents>(
        model,
        model_id,
        "Extract every distinct dated event mentioned in the content as it pertains to \
         the topic. Keep each description self-contained and carry the source when one \
         is stated.",
        &[("topic_pertaining_to", topic), ("content", content)],
        0.0,
    )
    .await?;

    let mut store = EventStore::default();
    for event in extracted.events {
        store.add_event(event);
    }
    sort_chronologically(&mut store.events);
    Ok(store.events)
}

/// Stable sort by parsed date; events whose dates cannot be parsed keep
/// their extraction order after all dated events.
pub fn sort_chronologically(events: &mut [Event]) {
    events.sort_by_key(|event| parse_event_date(&event.date).unwrap_or(NaiveDate::MAX));
}

/// Tolerant parser for the heterogeneous date strings extraction produces.
/// Ranges resolve to their leading endpoint.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let mut candidate = raw.trim();
    for separator in ["–", "—", " to ", " - "] {
        if let Some((leading, _)) = candidate.split_once(separator) {
            candidate = leading.trim();
        }
    }
    for qualifier in ["early ", "Early ", "mid-", "Mid-", "mid ", "Mid ", "late ", "Late "] {
        if let Some(stripped) = candidate.strip_prefix(qualifier) {
            candidate = stripped.trim();
        }
    }

    for format in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
            return Some(date);
        }
    }

    // Month-granular forms get pinned to the first of the month.
    for format in ["%B %Y %d", "%b %Y %d"] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{candidate} 1"), format) {
            return Some(date);
        }
    }
    let numeric_parts = candidate.split('-').collect::<Vec<&str>>();
    if let [year, month] = numeric_parts.as_slice()
        && let Ok(year) = year.parse::<i32>()
        && let Ok(month) = month.parse::<u32>()
    {
        return NaiveDate::from_ymd_opt(year, month, 1);
    }

    // Bare year pins to January 1st.
    if candidate.len() == 4
        && let Ok(year) = candidate.parse::<i32>()
    {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }

    None
}
