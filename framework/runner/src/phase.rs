use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A load phase as written in a test definition.
///
/// Every field is optional on the wire. Call [PhaseDefinition::shape] to find out which kind of
/// phase this is, or whether it is malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Length of the phase in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// New virtual users per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_rate: Option<f64>,
    /// Arrival rate to reach, linearly, by the end of the phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_to: Option<f64>,
    /// Upper bound on concurrently active virtual users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_vusers: Option<u64>,
    /// A fixed number of virtual users spread evenly over the phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_count: Option<u64>,
    /// Seconds to wait without creating any virtual users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<u64>,
}

/// The kind of load a phase generates, once it has been validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PhaseShape {
    #[serde(rename_all = "camelCase")]
    Constant {
        arrival_rate: f64,
        max_vusers: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Ramp {
        arrival_rate: f64,
        ramp_to: f64,
        max_vusers: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ArrivalCount { arrival_count: u64 },
    Pause,
}

impl PhaseDefinition {
    /// Classify this phase.
    ///
    /// A ramp is recognised first, then a constant rate, then a fixed count and finally a pause.
    /// Anything that needs a duration and does not have one, or that carries a rate which is not a
    /// finite non-negative number, is malformed and gives `None`.
    pub fn shape(&self) -> Option<PhaseShape> {
        if let Some(ramp_to) = self.ramp_to {
            let arrival_rate = self.arrival_rate.unwrap_or(0.0);
            if self.duration.is_none() || !valid_rate(arrival_rate) || !valid_rate(ramp_to) {
                return None;
            }
            return Some(PhaseShape::Ramp {
                arrival_rate,
                ramp_to,
                max_vusers: self.max_vusers,
            });
        }

        if let Some(arrival_rate) = self.arrival_rate {
            if self.duration.is_none() || !valid_rate(arrival_rate) {
                return None;
            }
            return Some(PhaseShape::Constant {
                arrival_rate,
                max_vusers: self.max_vusers,
            });
        }

        if let Some(arrival_count) = self.arrival_count {
            self.duration?;
            return Some(PhaseShape::ArrivalCount { arrival_count });
        }

        self.pause.map(|_| PhaseShape::Pause)
    }

    /// How long this phase lasts in seconds, taken from `pause` for pause phases.
    pub fn duration_s(&self) -> u64 {
        self.duration.or(self.pause).unwrap_or_default()
    }
}

fn valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= 0.0
}

impl PhaseShape {
    pub fn max_vusers(&self) -> Option<u64> {
        match self {
            PhaseShape::Constant { max_vusers, .. } | PhaseShape::Ramp { max_vusers, .. } => {
                *max_vusers
            }
            _ => None,
        }
    }
}

/// One worker's share of a load phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPhase {
    /// Position of the phase in the test definition.
    pub index: usize,
    /// Shared by every worker's copy of the same phase.
    pub id: String,
    pub name: Option<String>,
    pub duration_s: u64,
    pub shape: PhaseShape,
    /// Set when this pause stands in for an `arrivalCount` phase that another worker runs.
    #[serde(default)]
    pub standby: bool,
    /// 1-based index of the worker that owns this phase, set once the plans are final.
    pub worker: usize,
    pub total_workers: usize,
}

impl WorkerPhase {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_s)
    }

    /// Whether this phase creates no load for its worker. Pauses never do.
    pub fn is_idle(&self) -> bool {
        match &self.shape {
            PhaseShape::Constant { arrival_rate, .. } => *arrival_rate <= 0.0,
            PhaseShape::Ramp {
                arrival_rate,
                ramp_to,
                ..
            } => *arrival_rate <= 0.0 && *ramp_to <= 0.0,
            PhaseShape::ArrivalCount { .. } => false,
            PhaseShape::Pause => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> PhaseDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn classify_phases() {
        assert_eq!(
            Some(PhaseShape::Constant {
                arrival_rate: 20.0,
                max_vusers: None
            }),
            parse("{ duration: 60, arrivalRate: 20 }").shape()
        );
        assert_eq!(
            Some(PhaseShape::Ramp {
                arrival_rate: 0.0,
                ramp_to: 50.0,
                max_vusers: Some(10)
            }),
            parse("{ duration: 60, rampTo: 50, maxVusers: 10 }").shape()
        );
        assert_eq!(
            Some(PhaseShape::ArrivalCount { arrival_count: 5 }),
            parse("{ duration: 60, arrivalCount: 5 }").shape()
        );
        assert_eq!(Some(PhaseShape::Pause), parse("{ pause: 5 }").shape());
    }

    #[test]
    fn malformed_phases() {
        assert_eq!(None, parse("{ arrivalRate: 20 }").shape());
        assert_eq!(None, parse("{ duration: 10 }").shape());
        assert_eq!(None, parse("{ duration: 10, arrivalRate: -1 }").shape());
        assert_eq!(None, parse("{ arrivalCount: 3 }").shape());
    }

    #[test]
    fn pause_duration_comes_from_pause() {
        assert_eq!(7, parse("{ pause: 7 }").duration_s());
        assert_eq!(30, parse("{ duration: 30, arrivalRate: 1 }").duration_s());
    }

    #[test]
    fn only_phases_with_arrivals_are_busy() {
        let mut phase = WorkerPhase {
            index: 0,
            id: "p".to_string(),
            name: None,
            duration_s: 10,
            shape: PhaseShape::Pause,
            standby: false,
            worker: 1,
            total_workers: 1,
        };
        assert!(phase.is_idle());

        phase.standby = true;
        assert!(phase.is_idle());

        phase.shape = PhaseShape::Constant {
            arrival_rate: 0.0,
            max_vusers: None,
        };
        phase.standby = false;
        assert!(phase.is_idle());

        phase.shape = PhaseShape::Constant {
            arrival_rate: 0.5,
            max_vusers: None,
        };
        assert!(!phase.is_idle());

        phase.shape = PhaseShape::ArrivalCount { arrival_count: 1 };
        assert!(!phase.is_idle());
    }
}
