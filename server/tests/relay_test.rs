//! Relay flow tests.
//!
//! The server applies pushed patches to its copy of a document and fans the
//! canonical patches it drains back out to clients. These tests drive that
//! flow through the engine directly and check the wire shapes clients see.

use grove_engine::{create_factory, map_of, Document, Factory, Patch};
use serde_json::{json, Value};

fn todo_list() -> Factory {
    map_of(&create_factory(json!({"title": "", "done": false})))
}

/// Apply a push on the relay copy and return what it would broadcast.
fn relay(server: &mut Document, pushed: &[Patch]) -> Vec<Patch> {
    server.apply_patches(pushed).unwrap();
    server.take_patches()
}

#[cfg(test)]
mod relay_tests {
    use super::*;

    #[test]
    fn test_clients_converge_through_relay() {
        let factory = todo_list();
        let mut server = Document::new(&factory, None).unwrap();
        let mut alice = Document::new(&factory, None).unwrap();
        let mut bob = Document::new(&factory, None).unwrap();

        // Alice edits locally and pushes what her document emitted.
        alice
            .apply_patches(&[Patch::add("/t1", json!({"title": "milk"}))])
            .unwrap();
        let pushed = alice.take_patches();
        let broadcast = relay(&mut server, &pushed);

        // Bob replays the broadcast.
        bob.apply_patches(&broadcast).unwrap();

        assert_eq!(bob.snapshot().unwrap(), server.snapshot().unwrap());
        assert_eq!(
            bob.snapshot().unwrap(),
            json!({"t1": {"title": "milk", "done": false}})
        );
    }

    #[test]
    fn test_broadcast_is_canonical() {
        // A sparse add is expanded to the full child snapshot before it is
        // logged, so late joiners never need the factory defaults.
        let mut server = Document::new(&todo_list(), None).unwrap();
        let broadcast = relay(&mut server, &[Patch::add("/t1", json!({}))]);

        assert_eq!(
            broadcast,
            vec![Patch::add("/t1", json!({"title": "", "done": false}))]
        );
    }

    #[test]
    fn test_late_joiner_catches_up_from_snapshot_and_log() {
        let factory = todo_list();
        let mut server = Document::new(&factory, None).unwrap();
        let mut log = Vec::new();

        log.extend(relay(&mut server, &[Patch::add("/a", json!({"title": "x"}))]));
        let checkpoint = server.snapshot().unwrap();
        let seen = log.len();

        log.extend(relay(
            &mut server,
            &[
                Patch::replace("/a/done", json!(true)),
                Patch::add("/b", json!({})),
                Patch::remove("/a"),
            ],
        ));

        let mut late = Document::new(&factory, Some(&checkpoint)).unwrap();
        late.apply_patches(&log[seen..]).unwrap();

        assert_eq!(late.snapshot().unwrap(), server.snapshot().unwrap());
    }

    #[test]
    fn test_failed_push_still_broadcasts_applied_prefix() {
        let mut server = Document::new(&todo_list(), None).unwrap();

        let result = server.apply_patches(&[
            Patch::add("/a", json!({})),
            Patch::replace("/nope/title", json!("x")),
        ]);

        assert!(result.is_err());
        assert_eq!(server.take_patches().len(), 1);
    }

    #[test]
    fn test_logged_patch_wire_shape() {
        let patch = Patch::replace("/a/title", json!("y"));
        let logged: Value = json!({
            "seq": 3,
            "nodeId": "device-1",
            "patch": serde_json::to_value(&patch).unwrap(),
        });

        let decoded = Patch::try_from(logged["patch"].clone()).unwrap();
        assert_eq!(decoded, patch);
        assert_eq!(
            logged["patch"],
            json!({"op": "replace", "path": "/a/title", "value": "y"})
        );
    }
}
