//! Fallback heuristic used when the optimizing solver has nothing usable.
//!
//! Slots are put in one global week order (day, start time, id). Each class
//! group owns a cursor into that order; an obligation's lessons are placed by
//! walking forward from its class group's cursor, wrapping around, and taking
//! the first slot the validator accepts. The cursor then moves past the
//! accepted slot, so a class group's lessons spread across the week instead of
//! piling up on Monday morning.
//!
//! Deterministic, never places more lessons than an obligation's weekly hours,
//! and tries each slot at most once per required lesson.

use crate::data::{ClassGroupId, PeriodId, ScheduleEntry, TeachingObligation, TimeSlot};
use crate::validator::{PlacementIndex, check_placement};
use itertools::Itertools;
use log::{debug, trace};
use std::collections::HashMap;

/// Next slot position to try, per class group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotCursors {
    positions: HashMap<ClassGroupId, usize>,
}

impl SlotCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, class_group_id: ClassGroupId) -> usize {
        self.positions.get(&class_group_id).copied().unwrap_or(0)
    }

    fn advance_past(&mut self, class_group_id: ClassGroupId, index: usize, slot_count: usize) {
        self.positions
            .insert(class_group_id, (index + 1) % slot_count);
    }
}

/// Slots in week order: day, then start time, then id.
pub fn order_slots(slots: &[TimeSlot]) -> Vec<&TimeSlot> {
    slots
        .iter()
        .sorted_by(|a, b| {
            a.day_of_week
                .cmp(&b.day_of_week)
                .then(a.start_time.cmp(&b.start_time))
                .then(a.id.cmp(&b.id))
        })
        .collect()
}

/// Greedily packs every obligation into the period's slots.
///
/// Class groups are processed by ascending id and obligations within a class
/// group in input order. Obligations that run out of legal slots are left
/// under-provisioned; the result may be empty.
pub fn pack(
    period_id: PeriodId,
    obligations: &[TeachingObligation],
    slots: &[TimeSlot],
) -> Vec<ScheduleEntry> {
    let ordered = order_slots(slots);
    let mut placed = PlacementIndex::new();
    let mut cursors = SlotCursors::new();
    let mut entries = Vec::new();

    if ordered.is_empty() {
        return entries;
    }

    for obligation in obligations.iter().sorted_by_key(|o| o.class_group_id) {
        let before = entries.len();
        place_obligation(
            period_id,
            obligation,
            &ordered,
            &mut placed,
            &mut cursors,
            &mut entries,
        );
        let delivered = entries.len() - before;
        if delivered < obligation.weekly_hours as usize {
            debug!(
                "Obligation {} (class group {}, teacher {}) placed {}/{} hours",
                obligation.id,
                obligation.class_group_id,
                obligation.teacher_id,
                delivered,
                obligation.weekly_hours
            );
        }
    }

    entries
}

fn place_obligation(
    period_id: PeriodId,
    obligation: &TeachingObligation,
    ordered: &[&TimeSlot],
    placed: &mut PlacementIndex,
    cursors: &mut SlotCursors,
    entries: &mut Vec<ScheduleEntry>,
) {
    let slot_count = ordered.len();

    for _ in 0..obligation.weekly_hours {
        let start = cursors.position(obligation.class_group_id);
        let accepted = (0..slot_count)
            .map(|step| (start + step) % slot_count)
            .find(|&index| match check_placement(obligation, ordered[index], placed) {
                Ok(()) => true,
                Err(kind) => {
                    trace!(
                        "Obligation {} rejected slot {}: {:?}",
                        obligation.id, ordered[index].id, kind
                    );
                    false
                }
            });

        // Placements only ever add occupancy, so once every slot is
        // rejected the remaining hours cannot be placed either.
        let Some(index) = accepted else {
            break;
        };

        let slot = ordered[index];
        placed.insert(obligation, slot);
        cursors.advance_past(obligation.class_group_id, index, slot_count);
        trace!(
            "Placed obligation {} in slot {} ({:?} {})",
            obligation.id, slot.id, slot.day_of_week, slot.start_time
        );
        entries.push(ScheduleEntry {
            period_id,
            class_group_id: obligation.class_group_id,
            time_slot_id: slot.id,
            obligation_id: obligation.id,
            room: None,
        });
    }
}
