use nanoid::nanoid;

use crate::distribute::distribute;
use crate::phase::{PhaseDefinition, PhaseShape, WorkerPhase};
use crate::plan::{PayloadDataset, Variables, WorkerPlan};

/// A phase that passed validation, with the id every worker's copy will share.
struct ClassifiedPhase<'a> {
    index: usize,
    id: String,
    definition: &'a PhaseDefinition,
    shape: PhaseShape,
}

fn classify(phases: &[PhaseDefinition]) -> Vec<ClassifiedPhase<'_>> {
    phases
        .iter()
        .enumerate()
        .filter_map(|(index, definition)| match definition.shape() {
            Some(shape) => Some(ClassifiedPhase {
                index,
                id: nanoid!(),
                definition,
                shape,
            }),
            None => {
                log::warn!("Skipping unrecognised load phase {index}: {definition:?}");
                None
            }
        })
        .collect()
}

/// Divide the load described by `phases` across `num_workers` workers.
///
/// Workers that end up with nothing but idle phases are dropped, so fewer plans than requested may
/// come back, possibly none at all. Survivors are numbered from 1 and each receives every
/// `n`th row of each payload dataset where `n` is the number of survivors.
pub fn divide_phases(
    phases: &[PhaseDefinition],
    num_workers: usize,
    datasets: &[PayloadDataset],
    variables: &Variables,
) -> Vec<WorkerPlan> {
    let num_workers = num_workers.max(1);
    let mut per_worker: Vec<Vec<WorkerPhase>> = vec![Vec::new(); num_workers];

    for phase in classify(phases) {
        for (worker, (shape, standby)) in split_shape(&phase.shape, num_workers)
            .into_iter()
            .enumerate()
        {
            per_worker[worker].push(WorkerPhase {
                index: phase.index,
                id: phase.id.clone(),
                name: phase.definition.name.clone(),
                duration_s: phase.definition.duration_s(),
                shape,
                standby,
                worker: 0,
                total_workers: 0,
            });
        }
    }

    let survivors: Vec<Vec<WorkerPhase>> = per_worker
        .into_iter()
        .filter(|phases| phases.iter().any(|p| !p.is_idle()))
        .collect();

    let final_worker_count = survivors.len();
    if final_worker_count < num_workers {
        log::info!(
            "Load divided across {final_worker_count} of {num_workers} requested workers, the rest had nothing to do"
        );
    }

    survivors
        .into_iter()
        .enumerate()
        .map(|(i, phases)| {
            finalise_plan(
                i,
                final_worker_count,
                phases,
                datasets.iter().map(|d| d.partition(i, final_worker_count)).collect(),
                variables,
            )
        })
        .collect()
}

/// Give each of `count` replicas the whole test, for platforms that multiply load rather than split it.
pub fn replicate_phases(
    phases: &[PhaseDefinition],
    count: usize,
    datasets: &[PayloadDataset],
    variables: &Variables,
) -> Vec<WorkerPlan> {
    let classified = classify(phases);
    if classified.is_empty() {
        return Vec::new();
    }

    (0..count)
        .map(|i| {
            let phases = classified
                .iter()
                .map(|phase| WorkerPhase {
                    index: phase.index,
                    id: phase.id.clone(),
                    name: phase.definition.name.clone(),
                    duration_s: phase.definition.duration_s(),
                    shape: phase.shape.clone(),
                    standby: false,
                    worker: 0,
                    total_workers: 0,
                })
                .collect();

            finalise_plan(i, count, phases, datasets.to_vec(), variables)
        })
        .collect()
}

fn finalise_plan(
    i: usize,
    total_workers: usize,
    mut phases: Vec<WorkerPhase>,
    payload: Vec<PayloadDataset>,
    variables: &Variables,
) -> WorkerPlan {
    for phase in &mut phases {
        phase.worker = i + 1;
        phase.total_workers = total_workers;
    }

    WorkerPlan {
        worker: i + 1,
        total_workers,
        phases,
        variables: variables.clone(),
        payload,
    }
}

/// One `(shape, standby)` per worker for a single phase.
fn split_shape(shape: &PhaseShape, n: usize) -> Vec<(PhaseShape, bool)> {
    match shape {
        PhaseShape::Ramp {
            arrival_rate,
            ramp_to,
            max_vusers,
        } => {
            let rate = arrival_rate / n as f64;
            let ramp = ramp_to / n as f64;
            let active = if rate > 0.0 || ramp > 0.0 { n } else { 0 };
            let caps = split_cap(*max_vusers, active);

            (0..n)
                .map(|i| {
                    (
                        PhaseShape::Ramp {
                            arrival_rate: rate,
                            ramp_to: ramp,
                            max_vusers: caps.as_ref().and_then(|c| c.get(i).copied()),
                        },
                        false,
                    )
                })
                .collect()
        }
        PhaseShape::Constant {
            arrival_rate,
            max_vusers,
        } => {
            let rates: Vec<f64> = if arrival_rate.fract() == 0.0 {
                distribute(*arrival_rate as u64, n)
                    .into_iter()
                    .map(|r| r as f64)
                    .collect()
            } else {
                vec![arrival_rate / n as f64; n]
            };
            let active = rates.iter().filter(|r| **r > 0.0).count();
            let caps = split_cap(*max_vusers, active);

            rates
                .into_iter()
                .enumerate()
                .map(|(i, rate)| {
                    (
                        PhaseShape::Constant {
                            arrival_rate: rate,
                            max_vusers: caps.as_ref().and_then(|c| c.get(i).copied()),
                        },
                        false,
                    )
                })
                .collect()
        }
        PhaseShape::ArrivalCount { .. } => (0..n)
            .map(|i| {
                if i == 0 {
                    (shape.clone(), false)
                } else {
                    (PhaseShape::Pause, true)
                }
            })
            .collect(),
        PhaseShape::Pause => vec![(PhaseShape::Pause, false); n],
    }
}

/// Active workers come first in every split, so the caps line up with worker positions.
fn split_cap(max_vusers: Option<u64>, active: usize) -> Option<Vec<u64>> {
    max_vusers.map(|max| distribute(max, active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn phases(yaml: &str) -> Vec<PhaseDefinition> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn divide(yaml: &str, n: usize) -> Vec<WorkerPlan> {
        divide_phases(&phases(yaml), n, &[], &Variables::new())
    }

    fn constant_rates(plans: &[WorkerPlan], phase: usize) -> Vec<f64> {
        plans
            .iter()
            .map(|p| match &p.phases[phase].shape {
                PhaseShape::Constant { arrival_rate, .. } => *arrival_rate,
                other => panic!("Expected a constant phase, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn single_arrival_count_runs_on_one_worker() {
        let plans = divide("[{ duration: 10, arrivalCount: 5 }]", 5);

        assert_eq!(1, plans.len());
        assert_eq!(1, plans[0].worker);
        assert_eq!(1, plans[0].total_workers);
        assert_eq!(
            PhaseShape::ArrivalCount { arrival_count: 5 },
            plans[0].phases[0].shape
        );
    }

    #[test]
    fn arrival_count_with_keep_alive_keeps_all_workers() {
        let plans = divide(
            r#"
            - { duration: 10, arrivalCount: 5, name: burst }
            - { duration: 60, arrivalRate: 5 }
            "#,
            5,
        );

        assert_eq!(5, plans.len());

        let literal: Vec<_> = plans
            .iter()
            .filter(|p| matches!(p.phases[0].shape, PhaseShape::ArrivalCount { .. }))
            .collect();
        assert_eq!(1, literal.len());

        let standby: Vec<_> = plans
            .iter()
            .map(|p| &p.phases[0])
            .filter(|p| p.shape == PhaseShape::Pause)
            .collect();
        assert_eq!(4, standby.len());
        for phase in standby {
            assert!(phase.standby);
            assert_eq!(Some("burst".to_string()), phase.name);
            assert_eq!(10, phase.duration_s);
        }
    }

    #[test]
    fn max_vusers_shares_sum_to_total() {
        let plans = divide("[{ duration: 10, arrivalRate: 10, maxVusers: 20 }]", 5);

        assert_eq!(5, plans.len());
        let caps: Vec<u64> = plans
            .iter()
            .filter_map(|p| p.phases[0].shape.max_vusers())
            .collect();
        assert_eq!(vec![4, 4, 4, 4, 4], caps);
        assert_eq!(20, caps.iter().sum::<u64>());
    }

    #[test]
    fn max_vusers_only_for_active_workers() {
        let plans = divide(
            r#"
            - { duration: 10, arrivalRate: 2, maxVusers: 7 }
            - { pause: 5 }
            "#,
            4,
        );

        assert_eq!(2, plans.len());
        assert_eq!(vec![1.0, 1.0], constant_rates(&plans, 0));

        let caps: Vec<Option<u64>> = plans.iter().map(|p| p.phases[0].shape.max_vusers()).collect();
        assert_eq!(vec![Some(4), Some(3)], caps);
    }

    #[test]
    fn pauses_alone_do_not_keep_a_worker() {
        let rows = (0..6).map(|i| vec![i.to_string()]).collect();
        let datasets = vec![PayloadDataset::new("users", rows)];

        let plans = divide_phases(
            &phases(
                r#"
                - { duration: 10, arrivalRate: 2 }
                - { pause: 5, name: rest }
                "#,
            ),
            4,
            &datasets,
            &Variables::new(),
        );

        assert_eq!(2, plans.len());
        for plan in &plans {
            assert_eq!(2, plan.total_workers);
            assert_eq!(PhaseShape::Pause, plan.phases[1].shape);
            assert_eq!(Some("rest".to_string()), plan.phases[1].name);
            assert_eq!(3, plan.payload[0].rows.len());
        }
    }

    #[test]
    fn only_pauses_leaves_nothing_to_run() {
        assert!(divide("[{ pause: 5 }, { pause: 10 }]", 3).is_empty());
    }

    #[test]
    fn ramp_only_has_zero_arrival_rate() {
        let plans = divide("[{ duration: 10, rampTo: 10 }]", 5);

        assert_eq!(5, plans.len());
        let mut rate_sum = 0.0;
        let mut ramp_sum = 0.0;
        for plan in &plans {
            match plan.phases[0].shape {
                PhaseShape::Ramp {
                    arrival_rate,
                    ramp_to,
                    ..
                } => {
                    rate_sum += arrival_rate;
                    ramp_sum += ramp_to;
                }
                ref other => panic!("Expected a ramp, got {other:?}"),
            }
        }
        assert_eq!(0.0, rate_sum);
        assert!((ramp_sum - 10.0).abs() < 1e-9);
    }

    #[test]
    fn low_rate_drops_idle_workers() {
        let plans = divide("[{ duration: 10, arrivalRate: 2 }]", 5);

        assert_eq!(2, plans.len());
        assert_eq!(vec![1.0, 1.0], constant_rates(&plans, 0));
        for (i, plan) in plans.iter().enumerate() {
            assert_eq!(i + 1, plan.worker);
            assert_eq!(2, plan.phases[0].total_workers);
            assert_eq!(i + 1, plan.phases[0].worker);
        }
    }

    #[test]
    fn fractional_rate_is_split_evenly() {
        let plans = divide("[{ duration: 10, arrivalRate: 1.5 }]", 3);

        assert_eq!(3, plans.len());
        assert_eq!(vec![0.5, 0.5, 0.5], constant_rates(&plans, 0));
    }

    #[test]
    fn phases_keep_order_and_shared_ids() {
        let plans = divide(
            r#"
            - { duration: 10, arrivalRate: 4, name: a }
            - { duration: 10 }
            - { duration: 20, arrivalRate: 8, name: c }
            "#,
            2,
        );

        assert_eq!(2, plans.len());
        let indices: Vec<usize> = plans[0].phases.iter().map(|p| p.index).collect();
        assert_eq!(vec![0, 2], indices);
        assert_eq!(plans[0].phases[0].id, plans[1].phases[0].id);
        assert_ne!(plans[0].phases[0].id, plans[0].phases[1].id);
    }

    #[test]
    fn nothing_to_run() {
        assert!(divide("[{ duration: 10, arrivalRate: 0 }]", 3).is_empty());
        assert!(divide("[{ duration: 10 }]", 3).is_empty());
        assert!(divide("[]", 3).is_empty());
    }

    #[test]
    fn payload_partitioned_across_survivors() {
        let datasets = vec![PayloadDataset::new(
            "users",
            (0..5).map(|i| vec![i.to_string()]).collect(),
        )];
        let plans = divide_phases(
            &phases("[{ duration: 10, arrivalRate: 2 }]"),
            4,
            &datasets,
            &Variables::new(),
        );

        assert_eq!(2, plans.len());
        assert_eq!(3, plans[0].payload[0].rows.len());
        assert_eq!(2, plans[1].payload[0].rows.len());
        assert_eq!(vec!["1".to_string()], plans[1].payload[0].rows[0]);
    }

    #[test]
    fn variables_are_copied_into_each_plan() {
        let mut variables = Variables::new();
        variables.insert("target".to_string(), serde_json::json!("localhost:80"));

        let plans = divide_phases(
            &phases("[{ duration: 10, arrivalRate: 2 }]"),
            2,
            &[],
            &variables,
        );

        for plan in plans {
            assert_eq!(variables, plan.variables);
        }
    }

    #[test]
    fn replicas_run_everything() {
        let datasets = vec![PayloadDataset::new("users", vec![vec!["a".to_string()]])];
        let plans = replicate_phases(
            &phases(
                r#"
                - { duration: 10, arrivalCount: 3 }
                - { duration: 10, arrivalRate: 1 }
                "#,
            ),
            3,
            &datasets,
            &Variables::new(),
        );

        assert_eq!(3, plans.len());
        for (i, plan) in plans.iter().enumerate() {
            assert_eq!(i + 1, plan.worker);
            assert_eq!(3, plan.total_workers);
            assert_eq!(
                PhaseShape::ArrivalCount { arrival_count: 3 },
                plan.phases[0].shape
            );
            assert_eq!(datasets, plan.payload);
        }
    }
}
