#[cfg(test)]
mod tests {
    use crate::app::domain::attachment::Attachment;
    use crate::app::domain::event::{PartialDelta, StreamEvent};
    use crate::app::domain::message::{Message, Role, dedup_consecutive};
    use crate::app::domain::plan::{PlanSnapshot, PlanStatus};
    use crate::app::domain::reduce::fold;
    use crate::app::domain::state::AggregationState;
    use crate::app::domain::types::{AppId, EventId, MessageId, SessionId};
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use std::collections::HashSet;

    fn fresh_state() -> AggregationState {
        let shell = Message::assistant_shell(
            MessageId::from_string("msg_prop"),
            SessionId::from_string("session_prop"),
            AppId::from_string("app_prop"),
        )
        .with_timestamp(0);
        AggregationState::new(shell, EventId::from_string("chat"))
    }

    fn arb_url() -> impl Strategy<Value = String> {
        (0u8..6).prop_map(|n| format!("https://cdn.example/{n}.png"))
    }

    fn arb_plan() -> impl Strategy<Value = PlanSnapshot> {
        (1u32..6, 0u32..8, 0u64..1_000).prop_map(|(len, current, ts)| PlanSnapshot {
            plan: (0..len).map(|i| (i, format!("step {i}"))).collect(),
            current_step: current,
            current_message: format!("on {current}"),
            timestamp: Some(ts),
        })
    }

    fn arb_event() -> impl Strategy<Value = StreamEvent> {
        prop_oneof![
            "[a-z ]{0,8}".prop_map(|t| StreamEvent::text_delta(&t)),
            prop::collection::vec(arb_url(), 0..3).prop_map(|urls| {
                StreamEvent::PartialDelta(PartialDelta {
                    attachments: urls.into_iter().map(Attachment::Url).collect(),
                    ..PartialDelta::default()
                })
            }),
            arb_plan().prop_map(|plan| StreamEvent::PartialDelta(PartialDelta {
                plan: Some(plan),
                ..PartialDelta::default()
            })),
            (0u8..4, 0i64..10).prop_map(|(k, v)| {
                let mut patch = serde_json::Map::new();
                patch.insert(format!("k{k}"), Value::from(v));
                StreamEvent::SessionLocalPatch(patch)
            }),
            "[a-z]{1,6}".prop_map(|event_type| StreamEvent::Unknown { event_type }),
        ]
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::User), Just(Role::Assistant)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_files_are_the_distinct_attachment_keys(
            urls in prop::collection::vec(arb_url(), 0..20),
        ) {
            let mut state = fresh_state();
            for url in &urls {
                fold(&mut state, &[StreamEvent::PartialDelta(PartialDelta {
                    attachments: vec![Attachment::Url(url.clone())],
                    ..PartialDelta::default()
                })]);
            }

            let distinct: HashSet<&String> = urls.iter().collect();
            prop_assert_eq!(state.message.files.len(), distinct.len());
        }

        #[test]
        fn prop_plan_statuses_follow_pointer(plan in arb_plan()) {
            let mut state = fresh_state();
            fold(&mut state, &[StreamEvent::PartialDelta(PartialDelta {
                plan: Some(plan.clone()),
                ..PartialDelta::default()
            })]);

            let steps = state.message.plan_steps.clone().unwrap_or_default();
            prop_assert_eq!(steps.len(), plan.plan.len());
            for ((index, _), step) in plan.plan.iter().zip(&steps) {
                let expected = match index.cmp(&plan.current_step) {
                    std::cmp::Ordering::Less => PlanStatus::Done,
                    std::cmp::Ordering::Equal => PlanStatus::Progress,
                    std::cmp::Ordering::Greater => PlanStatus::Planned,
                };
                prop_assert_eq!(step.status, expected);
                prop_assert_eq!(&step.id, &format!("step-{index}"));
            }
        }

        #[test]
        fn prop_terminal_leaves_nothing_in_progress(
            events in prop::collection::vec(arb_event(), 0..20),
        ) {
            let mut state = fresh_state();
            fold(&mut state, &events);
            fold(&mut state, &[StreamEvent::terminal()]);

            prop_assert!(state.done);
            prop_assert!(state.message.current_step_id.is_none());
            for step in state.message.plan_steps.iter().flatten() {
                prop_assert_ne!(step.status, PlanStatus::Progress);
            }
        }

        #[test]
        fn prop_nothing_but_patches_changes_after_terminal(
            before in prop::collection::vec(arb_event(), 0..10),
            after in prop::collection::vec(arb_event(), 0..10),
        ) {
            let mut state = fresh_state();
            fold(&mut state, &before);
            fold(&mut state, &[StreamEvent::terminal()]);
            let message = state.message.clone();

            let out = fold(&mut state, &after);

            prop_assert!(!out.should_update);
            prop_assert_eq!(state.message, message);
        }

        #[test]
        fn prop_dedup_drops_exactly_the_extended_messages(
            entries in prop::collection::vec((arb_role(), "[a-z]{0,6}"), 0..12),
        ) {
            let messages: Vec<Message> = entries
                .into_iter()
                .enumerate()
                .map(|(i, (role, content))| {
                    let mut m = Message::user(
                        SessionId::from_string("s"),
                        AppId::from_string("a"),
                        content,
                        vec![],
                        vec![],
                    )
                    .with_timestamp(i as u64);
                    m.role = role;
                    m
                })
                .collect();

            let kept: Vec<u64> = dedup_consecutive(&messages)
                .iter()
                .map(|m| m.timestamp)
                .collect();

            let expected: Vec<u64> = messages
                .iter()
                .enumerate()
                .filter(|(i, m)| {
                    messages.get(i + 1).is_none_or(|next| {
                        !(next.role == m.role && next.content.len() > m.content.len())
                    })
                })
                .map(|(_, m)| m.timestamp)
                .collect();

            prop_assert_eq!(kept, expected);
        }

        #[test]
        fn prop_local_patches_accumulate_every_key(
            keys in prop::collection::vec(0u8..6, 1..12),
        ) {
            let mut state = fresh_state();
            for (i, k) in keys.iter().enumerate() {
                let mut patch = serde_json::Map::new();
                patch.insert(format!("k{k}"), json!(i));
                fold(&mut state, &[StreamEvent::SessionLocalPatch(patch)]);
            }

            let distinct: HashSet<&u8> = keys.iter().collect();
            let local = state.local_state.clone().unwrap();
            prop_assert_eq!(local.patch.len(), distinct.len());
        }
    }
}
