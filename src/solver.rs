use crate::data::{
    ClassGroupId, ObligationId, SolverPlacement, SolverRequest, SolverResponse, SolverSummary,
    TeacherId, TeachingObligation, TimeSlot, TimeSlotId, UnmetSoftConstraint, Weekday,
};
use chrono::Utc;
use good_lp::variable;
use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, default_solver,
};
use itertools::Itertools;
use log::{info, trace, warn};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Default penalty for each extra lesson of one obligation on the same day.
pub const DEFAULT_SPREAD_WEIGHT: f64 = 0.25;
/// Upper bound for the spread penalty. A placed lesson is worth 1, so the
/// penalty must stay below that or the model drops hours to avoid stacking.
pub const MAX_SPREAD_WEIGHT: f64 = 0.9;

/// Options the solver understands inside the request's `constraints` object.
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverConstraints {
    /// Slots a teacher must not be given, keyed by teacher id.
    #[serde(default)]
    pub teacher_unavailable: HashMap<String, Vec<TimeSlotId>>,
    /// Penalty per extra lesson of one obligation on the same day, in
    /// `[0, MAX_SPREAD_WEIGHT]`. Placing hours always outweighs spreading them.
    #[serde(default)]
    pub spread_weight: Option<f64>,
}

impl SolverConstraints {
    pub fn from_value(value: &serde_json::Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!("Ignoring unreadable constraints: {}", e);
            Self::default()
        })
    }

    fn unavailable_slots(&self) -> HashMap<TeacherId, HashSet<TimeSlotId>> {
        self.teacher_unavailable
            .iter()
            .filter_map(|(teacher, slots)| {
                teacher
                    .parse::<TeacherId>()
                    .ok()
                    .map(|id| (id, slots.iter().copied().collect()))
            })
            .collect()
    }
}

/// solves the timetable problem using the HiGHs ILP solver.
pub fn solve(input: &SolverRequest) -> Result<SolverResponse, String> {
    let start_time = Instant::now();
    let options = SolverConstraints::from_value(&input.constraints);
    let spread_weight = options
        .spread_weight
        .unwrap_or(DEFAULT_SPREAD_WEIGHT)
        .clamp(0.0, MAX_SPREAD_WEIGHT);
    let unavailable = options.unavailable_slots();

    // lookups
    let obligation_map: HashMap<ObligationId, &TeachingObligation> = input
        .teaching_assignments
        .iter()
        .map(|o| (o.id, o))
        .collect();
    let slot_map: HashMap<TimeSlotId, &TimeSlot> =
        input.time_slots.iter().map(|s| (s.id, s)).collect();

    //model setup
    info!(
        "Setting up ILP model with {} teaching assignments and {} time slots for period {}...",
        input.teaching_assignments.len(),
        input.time_slots.len(),
        input.period_id
    );
    let mut problem = ProblemVariables::new();
    let mut all_possible_placements = Vec::new();

    // x_os =  1 if obligation o is taught in slot s
    //         0 otherwise

    // pre-filter; implicitly handles period coherence and teacher availability
    for obligation in &input.teaching_assignments {
        for slot in &input.time_slots {
            if is_placement_possible(obligation, slot, input, &unavailable) {
                all_possible_placements.push((obligation.id, slot.id));
            }
        }
    }
    trace!(
        "Generated {} potential placement variables out of a theoretical maximum of {}.",
        all_possible_placements.len(),
        input.teaching_assignments.len() * input.time_slots.len()
    );

    if all_possible_placements.is_empty() {
        return Err("No possible placements found after pre-filtering. The problem might be too constrained.".to_string());
    }

    // decision map
    let mut placement_vars_map: HashMap<(ObligationId, TimeSlotId), Variable> = HashMap::new();
    let placement_vars_vec =
        problem.add_vector(variable().binary(), all_possible_placements.len());

    for (i, (obligation_id, slot_id)) in all_possible_placements.iter().enumerate() {
        placement_vars_map.insert((*obligation_id, *slot_id), placement_vars_vec[i]);
    }

    // soft constraint: spread an obligation's lessons over the week.
    // excess_od >= (lessons of o on day d) - 1
    let per_obligation_day: HashMap<(ObligationId, Weekday), Vec<Variable>> = placement_vars_map
        .iter()
        .map(|((o_id, s_id), var)| ((*o_id, slot_map[s_id].day_of_week), *var))
        .into_group_map();
    let mut stacking_links = Vec::new();
    for (_, vars) in per_obligation_day.into_iter().filter(|(_, vars)| vars.len() > 1) {
        let lessons_that_day: Expression = vars.iter().copied().sum();
        let excess = problem.add(variable().min(0));
        stacking_links.push((lessons_that_day, excess));
    }

    let hours_score: Expression = placement_vars_map.values().copied().sum();
    let stacking_penalty: Expression = stacking_links.iter().map(|(_, var)| *var).sum();
    let objective = hours_score - spread_weight * stacking_penalty;
    info!("Objective function defined: maximise placed hours, penalise same-day stacking.");

    let mut model = problem
        .maximise(objective)
        .using(default_solver)
        .set_option("threads", 1) // limit to 1 thread for reproducibility
        .set_option("random_seed", 1234) //set seed for reproducibility
        .set_option("log_to_console", "false");

    for (lessons_that_day, excess) in stacking_links {
        model.add_constraint(constraint!(excess + 1.0 >= lessons_that_day));
    }

    // begin hard constraints

    // never more lessons than the weekly hours
    info!("Adding 'weekly hours' constraints...");
    for obligation in &input.teaching_assignments {
        let placed: Expression = placement_vars_map
            .iter()
            .filter(|((o_id, _), _)| *o_id == obligation.id)
            .map(|(_, var)| *var)
            .sum();
        model.add_constraint(constraint!(placed <= f64::from(obligation.weekly_hours)));
    }

    // no class group double-booking
    info!("Adding 'no class group overlap' constraints...");
    let class_group_slots: HashMap<(ClassGroupId, TimeSlotId), Vec<Variable>> = placement_vars_map
        .iter()
        .map(|((o_id, s_id), var)| ((obligation_map[o_id].class_group_id, *s_id), *var))
        .into_group_map();
    for vars in class_group_slots.values().filter(|vars| vars.len() > 1) {
        let occupied: Expression = vars.iter().copied().sum();
        model.add_constraint(constraint!(occupied <= 1));
    }

    // no teacher overlap
    info!("Adding 'no teacher overlap' constraints...");
    let teacher_slots: HashMap<(TeacherId, TimeSlotId), Vec<Variable>> = placement_vars_map
        .iter()
        .map(|((o_id, s_id), var)| ((obligation_map[o_id].teacher_id, *s_id), *var))
        .into_group_map();
    for vars in teacher_slots.values().filter(|vars| vars.len() > 1) {
        let busy: Expression = vars.iter().copied().sum();
        model.add_constraint(constraint!(busy <= 1));
    }

    //solve
    info!("Starting ILP solver...");
    let solution = match model.solve() {
        Ok(s) => s,
        Err(e) => {
            return Err(format!(
                "No solution found. The problem might be too constrained. Solver error: {}",
                e
            ));
        }
    };
    let duration = start_time.elapsed();
    info!("Solution found in {:.2?}", duration);

    // get placements from solution
    let mut chosen: Vec<(ObligationId, TimeSlotId)> = placement_vars_map
        .iter()
        .filter(|(_, var)| solution.value(**var) > 0.9)
        .map(|(key, _)| *key)
        .collect();
    chosen.sort();

    let (score, unmet_soft_constraints) =
        calculate_score_and_unmet_constraints(&chosen, input, &obligation_map, &slot_map);

    let schedule = chosen
        .iter()
        .map(|(obligation_id, slot_id)| SolverPlacement {
            class_group_id: Some(obligation_map[obligation_id].class_group_id),
            time_slot_id: Some(*slot_id),
            teaching_assignment_id: Some(*obligation_id),
            room: None,
        })
        .collect();

    // build the final output
    Ok(SolverResponse {
        generated_at: Some(Utc::now()),
        period_id: Some(input.period_id),
        summary: Some(SolverSummary {
            teaching_assignments: input.teaching_assignments.len(),
            time_slots: input.time_slots.len(),
        }),
        schedule,
        score: Some(score),
        unmet_soft_constraints,
    })
}

// implicitly checks period coherence and teacher availability
fn is_placement_possible(
    obligation: &TeachingObligation,
    slot: &TimeSlot,
    input: &SolverRequest,
    unavailable: &HashMap<TeacherId, HashSet<TimeSlotId>>,
) -> bool {
    // nothing to place
    if obligation.weekly_hours == 0 {
        return false;
    }

    // slot, obligation and request agree on the period
    if slot.period_id != obligation.period_id || obligation.period_id != input.period_id {
        return false;
    }

    // teacher has to be available
    !unavailable
        .get(&obligation.teacher_id)
        .is_some_and(|slots| slots.contains(&slot.id))
}

fn calculate_score_and_unmet_constraints(
    chosen: &[(ObligationId, TimeSlotId)],
    input: &SolverRequest,
    obligation_map: &HashMap<ObligationId, &TeachingObligation>,
    slot_map: &HashMap<TimeSlotId, &TimeSlot>,
) -> (f64, Vec<UnmetSoftConstraint>) {
    let mut score = 0.0;
    let mut unmet = Vec::new();

    let delivered = chosen.iter().map(|(o_id, _)| *o_id).counts();
    for obligation in &input.teaching_assignments {
        let hours = delivered.get(&obligation.id).copied().unwrap_or(0) as u32;
        score += f64::from(hours);
        if hours < obligation.weekly_hours {
            unmet.push(UnmetSoftConstraint {
                constraint_type: "Weekly Hours".to_string(),
                description: format!(
                    "Teaching assignment {} for class group {} got {} of {} weekly hours.",
                    obligation.id, obligation.class_group_id, hours, obligation.weekly_hours
                ),
            });
        }
    }

    // spread lessons across the week
    let per_day = chosen
        .iter()
        .map(|(o_id, s_id)| (*o_id, slot_map[s_id].day_of_week))
        .counts();
    for ((obligation_id, day), lessons) in per_day.into_iter().sorted() {
        if lessons > 1 {
            score -= (lessons - 1) as f64;
            unmet.push(UnmetSoftConstraint {
                constraint_type: "Spread Across Week".to_string(),
                description: format!(
                    "Teaching assignment {} (teacher {}) has {} lessons on {:?}.",
                    obligation_id, obligation_map[&obligation_id].teacher_id, lessons, day
                ),
            });
        }
    }

    (score, unmet)
}
