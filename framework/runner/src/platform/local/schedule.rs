use std::time::Duration;

use crate::phase::PhaseShape;

/// Guards against `0.9999999` arrivals after summing fractional rates.
const EPSILON: f64 = 1e-9;

/// Offsets from the start of a phase at which new virtual users arrive.
///
/// Rates are applied one second at a time. Fractional arrivals carry over to the next second, so a
/// rate of `0.5` produces one arrival every two seconds. A ramp uses the rate at the middle of
/// each second, which makes the total match the area under the ramp.
#[derive(Debug)]
pub(crate) struct ArrivalSchedule {
    kind: ScheduleKind,
    duration_s: u64,
}

#[derive(Debug)]
enum ScheduleKind {
    Rate {
        from: f64,
        to: f64,
        next_second: u64,
        carry: f64,
        current_second: u64,
        in_second: u64,
        emitted_in_second: u64,
    },
    Count {
        total: u64,
        emitted: u64,
    },
    Idle,
}

impl ArrivalSchedule {
    pub(crate) fn new(shape: &PhaseShape, duration_s: u64) -> Self {
        let rate = |from: f64, to: f64| ScheduleKind::Rate {
            from,
            to,
            next_second: 0,
            carry: 0.0,
            current_second: 0,
            in_second: 0,
            emitted_in_second: 0,
        };

        let kind = match shape {
            PhaseShape::Constant { arrival_rate, .. } => rate(*arrival_rate, *arrival_rate),
            PhaseShape::Ramp {
                arrival_rate,
                ramp_to,
                ..
            } => rate(*arrival_rate, *ramp_to),
            PhaseShape::ArrivalCount { arrival_count } => ScheduleKind::Count {
                total: *arrival_count,
                emitted: 0,
            },
            PhaseShape::Pause => ScheduleKind::Idle,
        };

        Self { kind, duration_s }
    }
}

impl Iterator for ArrivalSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let duration_s = self.duration_s;
        match &mut self.kind {
            ScheduleKind::Idle => None,
            ScheduleKind::Count { total, emitted } => {
                if *emitted >= *total {
                    return None;
                }
                let offset = Duration::from_secs(duration_s).mul_f64(*emitted as f64 / *total as f64);
                *emitted += 1;
                Some(offset)
            }
            ScheduleKind::Rate {
                from,
                to,
                next_second,
                carry,
                current_second,
                in_second,
                emitted_in_second,
            } => loop {
                if *emitted_in_second < *in_second {
                    let fraction = *emitted_in_second as f64 / *in_second as f64;
                    *emitted_in_second += 1;
                    return Some(Duration::from_secs_f64(*current_second as f64 + fraction));
                }

                if *next_second >= duration_s {
                    return None;
                }

                let progress = (*next_second as f64 + 0.5) / duration_s as f64;
                *carry += *from + (*to - *from) * progress;
                let arrivals = (*carry + EPSILON).floor();
                *carry -= arrivals;

                *current_second = *next_second;
                *in_second = arrivals as u64;
                *emitted_in_second = 0;
                *next_second += 1;
            },
        }
    }
}
