//! Property-based tests for live-message parsing and identity derivation.
//!
//! Uses proptest to verify:
//! 1. Arbitrary input never panics the parser.
//! 2. Broadcast identities are `{action}-{entity id}` whenever an id is present.
//! 3. Notification identities depend only on task id and assignment timestamp.

use proptest::prelude::*;
use tasklist_proto::{Inbound, LiveMessage, TaskId};

/// Actions the parser maps onto task-payload messages.
fn arb_task_action() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "todo_created",
        "task_created",
        "todo_updated",
        "task_updated",
        "status_updated",
        "status_changed",
    ])
}

proptest! {
    #[test]
    fn parse_never_panics(raw in ".{0,512}") {
        let _ = Inbound::parse(&raw);
    }

    #[test]
    fn parse_never_panics_on_json_objects(key in "[a-zA-Z]{1,12}", value in any::<i64>()) {
        let raw = format!(r#"{{"{key}":{value}}}"#);
        let _ = Inbound::parse(&raw);
    }

    #[test]
    fn task_identity_uses_action_and_id(
        action in arb_task_action(),
        id in 1i64..1_000_000,
        list in 1i64..1000,
        name in "[a-zA-Z ]{0,32}",
        now in any::<i64>(),
    ) {
        let raw = format!(
            r#"{{"action":"{action}","data":{{"Id":{id},"TodoListId":{list},"TaskName":"{name}"}}}}"#
        );
        let inbound = Inbound::parse(&raw).unwrap();
        let identity = inbound.identity_at(now);
        prop_assert_eq!(identity.as_str(), format!("{action}-{id}"));
        prop_assert_eq!(inbound.message.entity_id(), Some(id));
    }

    #[test]
    fn notification_identity_ignores_payload_details(
        task in 1i64..1_000_000,
        stamp in "[0-9T:-]{1,24}",
        name_a in "[a-z]{0,10}",
        name_b in "[a-z]{0,10}",
    ) {
        let make = |name: &str| {
            format!(
                r#"{{"TodoId":{task},"TaskName":"{name}","Assignment":{{"UserId":1,"CanEdit":true,"AssignedAt":"{stamp}"}}}}"#
            )
        };
        let a = Inbound::parse(&make(&name_a)).unwrap();
        let b = Inbound::parse(&make(&name_b)).unwrap();
        prop_assert_eq!(a.identity_at(0), b.identity_at(1));
        match a.message {
            LiveMessage::Assignment(n) => prop_assert_eq!(n.task_id, TaskId::new(task)),
            other => prop_assert!(false, "expected Assignment, got {:?}", other),
        }
    }
}
