//! Hard-constraint checks for schedule placements.
//!
//! A placement of an obligation into a slot is legal when, in order:
//! 1. the slot belongs to the obligation's period
//! 2. the obligation's class group is not already busy in that slot
//! 3. the obligation's teacher is not already busy in that slot
//!
//! The packer runs [`check_placement`] incrementally as it builds a schedule;
//! [`validate_schedule`] replays the same checks over a finished candidate.

use crate::data::{
    ClassGroupId, ObligationId, ScheduleEntry, TeacherId, TeachingObligation, TimeSlot, TimeSlotId,
};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Categories of constraint violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Slot, obligation or entry period disagree.
    PeriodMismatch,
    /// Class group booked twice in one slot.
    ClassGroupConflict,
    /// Teacher booked twice in one slot.
    TeacherConflict,
    /// Entry's class group differs from its obligation's class group.
    ClassGroupMismatch,
    /// Entry references an obligation that is not part of the input.
    UnknownObligation,
    /// Entry references a slot that is not part of the input.
    UnknownTimeSlot,
}

/// A rejected entry of a candidate schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub entry: ScheduleEntry,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: obligation {} / class group {} in slot {}",
            self.kind, self.entry.obligation_id, self.entry.class_group_id, self.entry.time_slot_id
        )
    }
}

/// Occupancy of class groups and teachers per slot for the placements made so far.
#[derive(Debug, Clone, Default)]
pub struct PlacementIndex {
    class_group_busy: HashSet<(ClassGroupId, TimeSlotId)>,
    teacher_busy: HashSet<(TeacherId, TimeSlotId)>,
}

impl PlacementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a placement. Callers check legality first.
    pub fn insert(&mut self, obligation: &TeachingObligation, slot: &TimeSlot) {
        self.class_group_busy
            .insert((obligation.class_group_id, slot.id));
        self.teacher_busy.insert((obligation.teacher_id, slot.id));
    }

    pub fn class_group_busy(&self, class_group_id: ClassGroupId, slot_id: TimeSlotId) -> bool {
        self.class_group_busy.contains(&(class_group_id, slot_id))
    }

    pub fn teacher_busy(&self, teacher_id: TeacherId, slot_id: TimeSlotId) -> bool {
        self.teacher_busy.contains(&(teacher_id, slot_id))
    }

    pub fn len(&self) -> usize {
        self.class_group_busy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_group_busy.is_empty()
    }
}

/// Checks one placement against everything already placed, stopping at the
/// first failed rule.
pub fn check_placement(
    obligation: &TeachingObligation,
    slot: &TimeSlot,
    placed: &PlacementIndex,
) -> Result<(), ViolationKind> {
    if slot.period_id != obligation.period_id {
        return Err(ViolationKind::PeriodMismatch);
    }
    if placed.class_group_busy(obligation.class_group_id, slot.id) {
        return Err(ViolationKind::ClassGroupConflict);
    }
    if placed.teacher_busy(obligation.teacher_id, slot.id) {
        return Err(ViolationKind::TeacherConflict);
    }
    Ok(())
}

pub fn is_legal_placement(
    obligation: &TeachingObligation,
    slot: &TimeSlot,
    placed: &PlacementIndex,
) -> bool {
    check_placement(obligation, slot, placed).is_ok()
}

/// Validates a complete candidate schedule against the period's inputs.
///
/// Entries are replayed in order; every offending entry is reported, and an
/// offending entry does not occupy its slot for the entries after it.
///
/// # Returns
/// `Ok(())` if all entries are legal, `Err(violations)` with every detected issue.
pub fn validate_schedule(
    entries: &[ScheduleEntry],
    obligations: &[TeachingObligation],
    slots: &[TimeSlot],
) -> Result<(), Vec<Violation>> {
    let obligation_map: HashMap<ObligationId, &TeachingObligation> =
        obligations.iter().map(|o| (o.id, o)).collect();
    let slot_map: HashMap<TimeSlotId, &TimeSlot> = slots.iter().map(|s| (s.id, s)).collect();

    let mut placed = PlacementIndex::new();
    let mut violations = Vec::new();

    for entry in entries {
        let violation = |kind| Violation {
            kind,
            entry: entry.clone(),
        };

        let Some(obligation) = obligation_map.get(&entry.obligation_id) else {
            violations.push(violation(ViolationKind::UnknownObligation));
            continue;
        };
        let Some(slot) = slot_map.get(&entry.time_slot_id) else {
            violations.push(violation(ViolationKind::UnknownTimeSlot));
            continue;
        };
        if entry.period_id != obligation.period_id {
            violations.push(violation(ViolationKind::PeriodMismatch));
            continue;
        }
        if entry.class_group_id != obligation.class_group_id {
            violations.push(violation(ViolationKind::ClassGroupMismatch));
            continue;
        }

        match check_placement(obligation, slot, &placed) {
            Ok(()) => placed.insert(obligation, slot),
            Err(kind) => violations.push(violation(kind)),
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}
