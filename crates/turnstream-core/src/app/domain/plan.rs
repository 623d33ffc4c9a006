//! Translation of backend plan snapshots into an ordered step list.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::types::Timestamp;

/// A plan as the backend reports it: numbered titles plus a pointer to the
/// step currently executing and its live reasoning text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    #[serde(default)]
    pub plan: Vec<(u32, String)>,
    #[serde(default)]
    pub current_step: u32,
    #[serde(default)]
    pub current_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlanStatus {
    Planned,
    Progress,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
}

pub fn step_id(index: u32) -> String {
    format!("step-{index}")
}

/// Rebuild the step list from `snapshot`, carrying start/end times over from
/// `previous` for steps with the same index.
///
/// Returns the new list and the id of the step in progress, if any.
pub fn apply_snapshot(
    previous: &[PlanStep],
    snapshot: &PlanSnapshot,
) -> (Vec<PlanStep>, Option<String>) {
    let mut current_step_id = None;

    let steps = snapshot
        .plan
        .iter()
        .map(|(index, title)| {
            let id = step_id(*index);
            let prior = previous.iter().find(|s| s.id == id);
            let mut start_time = prior.and_then(|s| s.start_time);
            let mut end_time = prior.and_then(|s| s.end_time);

            let status = match index.cmp(&snapshot.current_step) {
                std::cmp::Ordering::Less => PlanStatus::Done,
                std::cmp::Ordering::Equal => PlanStatus::Progress,
                std::cmp::Ordering::Greater => PlanStatus::Planned,
            };

            let reasoning = match status {
                PlanStatus::Progress => {
                    current_step_id = Some(id.clone());
                    if start_time.is_none() {
                        start_time = snapshot.timestamp;
                    }
                    Some(snapshot.current_message.clone())
                }
                PlanStatus::Done => {
                    if end_time.is_none() {
                        end_time = snapshot.timestamp;
                    }
                    prior.and_then(|s| s.reasoning.clone())
                }
                PlanStatus::Planned | PlanStatus::Failed => None,
            };

            PlanStep {
                id,
                title: title.clone(),
                description: None,
                status,
                reasoning,
                start_time,
                end_time,
            }
        })
        .collect();

    (steps, current_step_id)
}

/// Close every step still in progress. Steps that never received an end time
/// get `finished_at`.
pub fn finalize(steps: &mut [PlanStep], finished_at: Option<Timestamp>) {
    for step in steps.iter_mut() {
        if step.status == PlanStatus::Progress {
            step.status = PlanStatus::Done;
            if step.end_time.is_none() {
                step.end_time = finished_at;
            }
        }
    }
}
