use ahash::AHashMap;

use crate::event::RoadEvent;

/// Collapse events sharing an `id`, keeping the instance with the most recent
/// `last_updated`. On a tie the first instance seen is kept. Output keeps
/// first-seen order.
pub fn dedup_by_id(events: impl IntoIterator<Item = RoadEvent>) -> Vec<RoadEvent> {
    let mut out: Vec<RoadEvent> = Vec::new();
    let mut slots: AHashMap<String, usize> = AHashMap::new();

    for event in events {
        match slots.get(&event.id) {
            Some(&slot) => {
                if event.last_updated > out[slot].last_updated {
                    out[slot] = event;
                }
            }
            None => {
                slots.insert(event.id.clone(), out.len());
                out.push(event);
            }
        }
    }
    out
}
