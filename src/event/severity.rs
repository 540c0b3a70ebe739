use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::event::{EventStatus, RoadEvent};
use crate::source::Layer;

/// Additive point table. Each rule is evaluated on its own; an event collects
/// every bonus it qualifies for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointTable {
    pub closure: u32,
    pub restriction: u32,
    pub construction: u32,
    pub active: u32,
    pub interstate: u32,
    pub us_route: u32,
    pub state_route: u32,
    /// Text mentions a full closure ("road closed", "all lanes").
    pub full_closure: u32,
    /// Text mentions "closed" without matching a full-closure phrase.
    pub partial_closure: u32,
    /// End time falls within `ending_soon_hours` after evaluation.
    pub ending_soon: u32,
    pub ending_soon_hours: i64,
    pub interstate_pattern: String,
    pub us_route_pattern: String,
    pub state_route_pattern: String,
    pub full_closure_phrases: Vec<String>,
    pub partial_closure_phrases: Vec<String>,
}

impl Default for PointTable {
    fn default() -> Self {
        Self {
            closure: 60,
            restriction: 40,
            construction: 25,
            active: 20,
            interstate: 15,
            us_route: 10,
            state_route: 5,
            full_closure: 20,
            partial_closure: 10,
            ending_soon: 10,
            ending_soon_hours: 48,
            interstate_pattern: r"(?i)^I[- ]".to_string(),
            us_route_pattern: r"(?i)^US[- ]".to_string(),
            state_route_pattern: r"(?i)^IL[- ]".to_string(),
            full_closure_phrases: vec!["road closed".to_string(), "all lanes".to_string()],
            partial_closure_phrases: vec!["closed".to_string()],
        }
    }
}

/// Computes the deterministic severity of an event from its fields and the
/// evaluation time.
#[derive(Debug, Clone)]
pub struct SeverityScorer {
    table: PointTable,
    interstate: Regex,
    us_route: Regex,
    state_route: Regex,
    full_phrases: Vec<String>,
    partial_phrases: Vec<String>,
}

impl SeverityScorer {
    pub fn new(table: &PointTable) -> Result<Self> {
        let compile = |name: &str, pattern: &str| Regex::new(pattern)
            .with_context(|| format!("Invalid {name} pattern: {pattern:?}"));
        let lower = |phrases: &[String]| phrases.iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            interstate: compile("interstate", &table.interstate_pattern)?,
            us_route: compile("US route", &table.us_route_pattern)?,
            state_route: compile("state route", &table.state_route_pattern)?,
            full_phrases: lower(&table.full_closure_phrases),
            partial_phrases: lower(&table.partial_closure_phrases),
            table: table.clone(),
        })
    }

    pub fn score(&self, event: &RoadEvent, now: DateTime<Utc>) -> u32 {
        let t = &self.table;
        let mut score = match event.kind {
            Layer::Closure => t.closure,
            Layer::Restriction => t.restriction,
            Layer::Construction => t.construction,
        };

        if event.status == EventStatus::Active {
            score += t.active;
        }

        let road = event.road.trim();
        if self.interstate.is_match(road) {
            score += t.interstate;
        } else if self.us_route.is_match(road) {
            score += t.us_route;
        } else if self.state_route.is_match(road) {
            score += t.state_route;
        }

        let text = format!("{} {}", event.lanes, event.description).to_lowercase();
        if self.full_phrases.iter().any(|p| text.contains(p.as_str())) {
            score += t.full_closure;
        } else if self.partial_phrases.iter().any(|p| text.contains(p.as_str())) {
            score += t.partial_closure;
        }

        if let Some(end) = event.end {
            if end > now && end - now <= Duration::hours(t.ending_soon_hours) {
                score += t.ending_soon;
            }
        }

        score
    }

    /// Score every event in place.
    pub fn apply(&self, events: &mut [RoadEvent], now: DateTime<Utc>) {
        for event in events {
            event.severity = self.score(event, now);
        }
    }
}
