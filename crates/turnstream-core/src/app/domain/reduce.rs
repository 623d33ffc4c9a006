use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::attachment::Attachment;
use super::event::{FullSnapshot, PartialDelta, StreamEvent, TerminalPayload};
use super::interaction::{InteractionRequest, NavigationIntent};
use super::message::{ChatAction, GlobalSessionState, LocalSessionState, merge_patch};
use super::plan::{self, PlanSnapshot};
use super::state::AggregationState;

/// Per-call result of [`fold`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldOutput {
    /// The in-progress message changed and should be pushed to live views.
    pub should_update: bool,
    /// Local or global scoped state changed and should be persisted.
    pub scoped_state_changed: bool,
    pub terminal_seen: bool,
    /// Navigation intents first seen in this call.
    pub navigation: Vec<NavigationIntent>,
    /// Interaction requests first seen in this call.
    pub interactions: Vec<InteractionRequest>,
}

/// Fold a batch of events into `state`, left to right.
///
/// Never fails. Unknown events are skipped; once a terminal has been seen only
/// further terminals, scoped-state patches and side-channel events have effect.
pub fn fold(state: &mut AggregationState, events: &[StreamEvent]) -> FoldOutput {
    let mut out = FoldOutput::default();

    for event in events {
        match event {
            StreamEvent::PartialDelta(delta) => handle_partial_delta(state, delta, &mut out),
            StreamEvent::FullSnapshot(snapshot) => handle_full_snapshot(state, snapshot, &mut out),
            StreamEvent::Terminal(payload) => handle_terminal(state, payload, &mut out),
            StreamEvent::SessionLocalPatch(patch) => handle_local_patch(state, patch, &mut out),
            StreamEvent::SessionGlobalPatch(patch) => handle_global_patch(state, patch, &mut out),
            StreamEvent::NavigationIntent(intent) => {
                if state.seen_navigation.insert(intent.clone()) {
                    out.navigation.push(intent.clone());
                } else {
                    trace!(target: "turnstream::aggregator", route = %intent.route, "Duplicate navigation intent");
                }
            }
            StreamEvent::InteractionRequest(request) => {
                if state.seen_interactions.insert(request.id.clone()) {
                    state
                        .active_interactions
                        .insert(request.id.clone(), request.clone());
                    out.interactions.push(request.clone());
                } else {
                    trace!(target: "turnstream::aggregator", id = %request.id, "Duplicate interaction request");
                }
            }
            StreamEvent::Unknown { event_type } => {
                debug!(target: "turnstream::aggregator", event_type = %event_type, "Skipping unknown event");
            }
        }
    }

    out
}

fn handle_partial_delta(state: &mut AggregationState, delta: &PartialDelta, out: &mut FoldOutput) {
    if state.done {
        return;
    }

    if let Some(chunk) = &delta.chunk {
        state.accumulated_response.push_chunk(chunk.clone());
        refresh_content(state);
        out.should_update = true;
    }
    if let Some(snapshot) = &delta.plan {
        apply_plan(state, snapshot);
        out.should_update = true;
    }
    if !delta.attachments.is_empty() {
        merge_attachments(state, &delta.attachments);
        out.should_update = true;
    }
}

fn handle_full_snapshot(state: &mut AggregationState, snapshot: &FullSnapshot, out: &mut FoldOutput) {
    if state.done {
        return;
    }

    state.accumulated_response = snapshot.response.clone();
    refresh_content(state);
    if let Some(plan) = &snapshot.plan {
        apply_plan(state, plan);
    }
    if !snapshot.attachments.is_empty() {
        merge_attachments(state, &snapshot.attachments);
    }
    replace_actions(state, &snapshot.actions);
    out.should_update = true;
}

fn handle_terminal(state: &mut AggregationState, payload: &TerminalPayload, out: &mut FoldOutput) {
    state.done = true;
    out.terminal_seen = true;

    if let Some(response) = &payload.response {
        state.accumulated_response = response.clone();
    }
    if !payload.attachments.is_empty() {
        merge_attachments(state, &payload.attachments);
    }
    replace_actions(state, &payload.actions);

    state.observe_timestamp(payload.finished_at);
    let finished_at = payload
        .finished_at
        .or(state.last_timestamp)
        .or(Some(state.message.timestamp));
    if let Some(steps) = state.message.plan_steps.as_mut() {
        plan::finalize(steps, finished_at);
    }
    state.message.current_step_id = None;

    out.should_update = true;
}

fn handle_local_patch(state: &mut AggregationState, patch: &Map<String, Value>, out: &mut FoldOutput) {
    let scope = &state.scope;
    let record = state.local_state.get_or_insert_with(|| LocalSessionState {
        session_id: scope.session_id.clone(),
        event_id: scope.event_id.clone(),
        patch: Map::new(),
    });
    merge_patch(&mut record.patch, patch.clone());
    out.scoped_state_changed = true;
}

fn handle_global_patch(state: &mut AggregationState, patch: &Map<String, Value>, out: &mut FoldOutput) {
    let scope = &state.scope;
    let record = state.global_state.get_or_insert_with(|| GlobalSessionState {
        app_id: scope.app_id.clone(),
        event_id: scope.event_id.clone(),
        patch: Map::new(),
    });
    merge_patch(&mut record.patch, patch.clone());
    out.scoped_state_changed = true;
}

fn refresh_content(state: &mut AggregationState) {
    state.message.content = state
        .accumulated_response
        .last_assistant_content()
        .unwrap_or_default()
        .to_string();
}

fn apply_plan(state: &mut AggregationState, snapshot: &PlanSnapshot) {
    state.observe_timestamp(snapshot.timestamp);
    let previous = state.message.plan_steps.as_deref().unwrap_or_default();
    let (steps, current) = plan::apply_snapshot(previous, snapshot);
    state.message.plan_steps = Some(steps);
    state.message.current_step_id = current;
}

fn merge_attachments(state: &mut AggregationState, attachments: &[Attachment]) {
    if state.attachments.extend(attachments.iter().cloned()) > 0 {
        state.message.files = state.attachments.to_files();
    }
}

fn replace_actions(state: &mut AggregationState, actions: &[ChatAction]) {
    if !actions.is_empty() {
        state.message.actions = actions.to_vec();
    }
}
