use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::district::DistrictKey;
use crate::event::{rank, RoadEvent};
use crate::pipeline::dedup_by_id;
use crate::source::Layer;

/// Ranked, deduplicated events of one district.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictResult {
    pub district_key: DistrictKey,
    pub events: Vec<RoadEvent>,
}

impl DistrictResult {
    /// Merge duplicate ids and sort into ranking order. An empty list is a valid result.
    pub fn new(district_key: DistrictKey, events: Vec<RoadEvent>) -> Self {
        let mut events = dedup_by_id(events);
        rank(&mut events);
        Self { district_key, events }
    }
}

/// Every distinct event across all districts, in ranking order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatewideDigest {
    pub events: Vec<RoadEvent>,
}

impl StatewideDigest {
    /// Combine district events; an event placed in several districts counts once.
    pub fn from_events(events: impl IntoIterator<Item = RoadEvent>) -> Self {
        let mut events = dedup_by_id(events);
        rank(&mut events);
        Self { events }
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a DistrictResult>) -> Self {
        Self::from_events(results.into_iter().flat_map(|r| r.events.iter().cloned()))
    }

    /// The `n` highest-ranked distinct events.
    pub fn top(&self, n: usize) -> &[RoadEvent] { &self.events[..n.min(self.events.len())] }
}

/// Event counts per layer, keyed the way the dashboard reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeCounts {
    pub closures: usize,
    pub restrictions: usize,
    pub construction: usize,
}

impl TypeCounts {
    pub fn tally<'a>(events: impl IntoIterator<Item = &'a RoadEvent>) -> Self {
        let mut counts = Self::default();
        for event in events {
            match event.kind {
                Layer::Closure => counts.closures += 1,
                Layer::Restriction => counts.restrictions += 1,
                Layer::Construction => counts.construction += 1,
            }
        }
        counts
    }
}

/// JSON document written per district, and for the statewide digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDocument {
    pub district_key: DistrictKey,
    /// Evaluation time of the run that produced the document.
    pub generated_at: DateTime<Utc>,
    pub counts: TypeCounts,
    pub total: usize,
    pub top: Vec<RoadEvent>,
    pub items: Vec<RoadEvent>,
}

impl EventDocument {
    pub fn district(result: &DistrictResult, generated_at: DateTime<Utc>, top: usize) -> Self {
        Self {
            district_key: result.district_key,
            generated_at,
            counts: TypeCounts::tally(&result.events),
            total: result.events.len(),
            top: result.events.iter().take(top).cloned().collect(),
            items: result.events.clone(),
        }
    }

    /// The statewide document: `top` holds the digest, `items` a longer browse list.
    pub fn statewide(digest: &StatewideDigest, generated_at: DateTime<Utc>, size: usize, items: usize) -> Self {
        Self {
            district_key: DistrictKey::STATEWIDE,
            generated_at,
            counts: TypeCounts::tally(&digest.events),
            total: digest.events.len(),
            top: digest.top(size).to_vec(),
            items: digest.top(items).to_vec(),
        }
    }
}
