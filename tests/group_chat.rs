//! Group engine tests: membership, authorization, unread and seenBy
//! accounting

mod common;

use common::{Client, Harness};
use serde_json::json;

use chathub_server::models::ServerEvent;

/// carol creates `g1` with dave and erin as members
fn group_fixture(hub: &mut Harness) -> (Client, Client, Client) {
    let mut carol = hub.connect();
    hub.register(&mut carol, "carol");
    let mut dave = hub.connect();
    hub.register(&mut dave, "dave");
    let mut erin = hub.connect();
    hub.register(&mut erin, "erin");

    hub.exec(
        &mut carol,
        json!({
            "type": "create_group",
            "data": {
                "group": {
                    "id": "g1",
                    "name": "Weekend Plans",
                    "memberIds": ["dave", "erin", "dave", "carol", "nobody"]
                }
            }
        }),
    );
    carol.drain();
    dave.drain();
    erin.drain();

    (carol, dave, erin)
}

fn send_group_message(hub: &mut Harness, client: &mut Client, id: &str, sender: &str, text: &str) {
    hub.exec(
        client,
        json!({
            "type": "send_group_message",
            "data": {
                "message": {
                    "id": id,
                    "groupId": "g1",
                    "senderId": sender,
                    "text": text
                }
            }
        }),
    );
}

#[test]
fn test_create_group_membership() {
    let mut hub = Harness::new();
    let (_carol, _dave, _erin) = group_fixture(&mut hub);

    let group = &hub.state.groups["g1"];
    // duplicates and unknown users dropped, creator always included
    assert_eq!(group.member_ids, vec!["carol", "dave", "erin"]);
    assert_eq!(group.creator_id, "carol");
    assert_eq!(group.admins, vec!["carol"]);
    assert!(group.unread_counts.values().all(|c| *c == 0));
}

#[test]
fn test_group_created_reaches_every_member() {
    let mut hub = Harness::new();

    let mut carol = hub.connect();
    hub.register(&mut carol, "carol");
    let mut dave = hub.connect();
    hub.register(&mut dave, "dave");

    hub.exec(
        &mut carol,
        json!({
            "type": "create_group",
            "data": { "group": { "id": "g1", "name": "Pair", "memberIds": ["dave"] } }
        }),
    );

    for client in [&mut carol, &mut dave] {
        assert!(client.drain().iter().any(|e| matches!(
            e,
            ServerEvent::GroupCreated { group } if group.id == "g1"
        )));
    }
}

#[test]
fn test_group_message_unread_and_admin_delete() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, mut erin) = group_fixture(&mut hub);

    // erin goes offline before the message lands
    hub.disconnect(&mut erin);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "anyone around?");
    assert!(dave.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupMessageSent { message, .. } if message.id == "gm1"
    )));
    assert!(carol.drain().iter().any(|e| matches!(
        e,
        ServerEvent::NewGroupMessage { message, .. } if message.id == "gm1"
    )));

    // erin returns: the snapshot carries the message and her unread count
    let mut erin = hub.connect();
    let events = hub.login(&mut erin, "erin");
    let snapshot = events
        .iter()
        .find_map(|e| match e {
            ServerEvent::LoginSuccess(snapshot) => Some(snapshot),
            _ => None,
        })
        .expect("login_success");
    assert!(snapshot.group_messages["g1"].iter().any(|m| m.id == "gm1"));
    let group = snapshot.groups.iter().find(|g| g.id == "g1").unwrap();
    assert_eq!(group.unread_counts["erin"], 1);
    assert_eq!(group.unread_counts["dave"], 0);

    // the admin deletes it; every member hears, the log and pin list drop it
    carol.drain();
    hub.exec(
        &mut carol,
        json!({
            "type": "delete_group_message",
            "data": { "groupId": "g1", "messageId": "gm1" }
        }),
    );
    for client in [&mut carol, &mut dave, &mut erin] {
        assert!(client.drain().iter().any(|e| matches!(
            e,
            ServerEvent::GroupMessageDeleted { message_id, .. } if message_id == "gm1"
        )));
    }
    assert!(hub.state.group_messages["g1"].is_empty());
    assert!(hub.state.groups["g1"].pinned_message_ids.is_empty());
    // erin never saw it, so her unread count returns to zero
    assert_eq!(hub.state.groups["g1"].unread_counts["erin"], 0);
}

#[test]
fn test_member_cannot_delete_foreign_group_message() {
    let mut hub = Harness::new();
    let (_carol, mut dave, mut erin) = group_fixture(&mut hub);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "mine");
    erin.drain();

    hub.exec(
        &mut erin,
        json!({
            "type": "delete_group_message",
            "data": { "groupId": "g1", "messageId": "gm1" }
        }),
    );
    assert!(erin.drain().is_empty());
    assert_eq!(hub.state.group_messages["g1"].len(), 1);
}

#[test]
fn test_mark_group_seen_updates_seen_by() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, mut erin) = group_fixture(&mut hub);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "one");
    send_group_message(&mut hub, &mut dave, "gm2", "dave", "two");
    assert_eq!(hub.state.groups["g1"].unread_counts["erin"], 2);
    carol.drain();
    dave.drain();
    erin.drain();

    hub.exec(
        &mut erin,
        json!({
            "type": "mark_group_seen",
            "data": { "groupId": "g1", "userId": "erin" }
        }),
    );

    assert_eq!(hub.state.groups["g1"].unread_counts["erin"], 0);
    for message in &hub.state.group_messages["g1"] {
        assert!(message.seen_by.contains(&"erin".to_string()));
        // the sender is in seenBy from the start
        assert!(message.seen_by.contains(&"dave".to_string()));
    }
    assert!(erin.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupUnreadUpdated { unread_count, .. } if *unread_count == 0
    )));
    assert!(dave.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupMessagesSeen { message_ids, seen_by, .. }
            if message_ids.len() == 2 && seen_by == "erin"
    )));

    // repeat sweep with nothing new stays quiet
    hub.exec(
        &mut erin,
        json!({
            "type": "mark_group_seen",
            "data": { "groupId": "g1", "userId": "erin" }
        }),
    );
    assert!(erin.drain().is_empty());
}

#[test]
fn test_mark_group_messages_seen_selective() {
    let mut hub = Harness::new();
    let (_carol, mut dave, mut erin) = group_fixture(&mut hub);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "one");
    send_group_message(&mut hub, &mut dave, "gm2", "dave", "two");
    dave.drain();
    erin.drain();

    // the selective variant insists on the bound identity
    hub.exec(
        &mut erin,
        json!({
            "type": "mark_group_messages_seen",
            "data": { "groupId": "g1", "userId": "dave", "messageIds": ["gm1"] }
        }),
    );
    assert!(erin.drain().is_empty());

    hub.exec(
        &mut erin,
        json!({
            "type": "mark_group_messages_seen",
            "data": { "groupId": "g1", "userId": "erin", "messageIds": ["gm1"] }
        }),
    );
    assert_eq!(hub.state.groups["g1"].unread_counts["erin"], 1);
    assert!(erin.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupUnreadUpdated { unread_count, .. } if *unread_count == 1
    )));
}

#[test]
fn test_empty_group_message_rejected() {
    let mut hub = Harness::new();
    let (_carol, mut dave, _erin) = group_fixture(&mut hub);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "   ");
    assert!(dave.drain().is_empty());
    assert!(hub.state.group_messages.get("g1").is_none());
}

#[test]
fn test_non_member_cannot_send() {
    let mut hub = Harness::new();
    let (_carol, _dave, _erin) = group_fixture(&mut hub);

    let mut mallory = hub.connect();
    hub.register(&mut mallory, "mallory");

    send_group_message(&mut hub, &mut mallory, "gm1", "mallory", "let me in");
    assert!(mallory.drain().is_empty());
    assert!(hub.state.group_messages.get("g1").is_none());
}

#[test]
fn test_creator_cannot_be_removed_or_demoted() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, _erin) = group_fixture(&mut hub);

    // promote dave so he has admin rights to try with
    hub.exec(
        &mut carol,
        json!({
            "type": "set_group_admin",
            "data": { "groupId": "g1", "userId": "dave", "isAdmin": true }
        }),
    );
    dave.drain();

    hub.exec(
        &mut dave,
        json!({
            "type": "remove_group_member",
            "data": { "groupId": "g1", "userId": "carol" }
        }),
    );
    assert!(dave.drain().is_empty());
    assert!(hub.state.groups["g1"].is_member("carol"));

    hub.exec(
        &mut dave,
        json!({
            "type": "set_group_admin",
            "data": { "groupId": "g1", "userId": "carol", "isAdmin": false }
        }),
    );
    assert!(hub.state.groups["g1"].is_admin("carol"));
}

#[test]
fn test_only_creator_sets_admins() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, mut erin) = group_fixture(&mut hub);

    hub.exec(
        &mut dave,
        json!({
            "type": "set_group_admin",
            "data": { "groupId": "g1", "userId": "erin", "isAdmin": true }
        }),
    );
    assert!(!hub.state.groups["g1"].is_admin("erin"));

    hub.exec(
        &mut carol,
        json!({
            "type": "set_group_admin",
            "data": { "groupId": "g1", "userId": "erin", "isAdmin": true }
        }),
    );
    assert!(hub.state.groups["g1"].is_admin("erin"));
    assert!(erin.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupUpdated { group: Some(group) }
            if group.admins.contains(&"erin".to_string())
    )));
}

#[test]
fn test_removed_member_receives_null_group() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, mut erin) = group_fixture(&mut hub);

    hub.exec(
        &mut carol,
        json!({
            "type": "remove_group_member",
            "data": { "groupId": "g1", "userId": "erin" }
        }),
    );

    // the removed member sees `group: null`, the rest see the new roster
    assert!(erin.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupUpdated { group: None }
    )));
    assert!(dave.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupUpdated { group: Some(group) }
            if !group.member_ids.contains(&"erin".to_string())
    )));
    assert!(!hub.state.groups["g1"].is_member("erin"));
    assert!(!hub.state.groups["g1"].unread_counts.contains_key("erin"));
}

#[test]
fn test_member_can_leave_but_not_remove_others() {
    let mut hub = Harness::new();
    let (_carol, mut dave, mut erin) = group_fixture(&mut hub);

    // a plain member removing someone else is dropped
    hub.exec(
        &mut dave,
        json!({
            "type": "remove_group_member",
            "data": { "groupId": "g1", "userId": "erin" }
        }),
    );
    assert!(hub.state.groups["g1"].is_member("erin"));

    // removing yourself is leaving
    hub.exec(
        &mut erin,
        json!({
            "type": "remove_group_member",
            "data": { "groupId": "g1", "userId": "erin" }
        }),
    );
    assert!(!hub.state.groups["g1"].is_member("erin"));
}

#[test]
fn test_add_member_starts_with_zero_unread() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, _erin) = group_fixture(&mut hub);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "before frank");

    let mut frank = hub.connect();
    hub.register(&mut frank, "frank");

    hub.exec(
        &mut carol,
        json!({
            "type": "add_group_member",
            "data": { "groupId": "g1", "userId": "frank" }
        }),
    );

    assert!(hub.state.groups["g1"].is_member("frank"));
    assert_eq!(hub.state.groups["g1"].unread_counts["frank"], 0);
    assert!(frank.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupUpdated { group: Some(group) }
            if group.member_ids.contains(&"frank".to_string())
    )));
}

#[test]
fn test_group_pin_is_admin_only_and_ordered() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, _erin) = group_fixture(&mut hub);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "one");
    send_group_message(&mut hub, &mut dave, "gm2", "dave", "two");

    let pin = |message_id: &str, is_pinned: bool| {
        json!({
            "type": "pin_group_message",
            "data": { "groupId": "g1", "messageId": message_id, "isPinned": is_pinned }
        })
    };

    hub.exec(&mut dave, pin("gm1", true));
    assert!(hub.state.groups["g1"].pinned_message_ids.is_empty());

    hub.exec(&mut carol, pin("gm2", true));
    hub.exec(&mut carol, pin("gm1", true));
    hub.exec(&mut carol, pin("gm2", true)); // repeat does not duplicate
    assert_eq!(hub.state.groups["g1"].pinned_message_ids, vec!["gm2", "gm1"]);

    hub.exec(&mut carol, pin("gm2", false));
    assert_eq!(hub.state.groups["g1"].pinned_message_ids, vec!["gm1"]);
}

#[test]
fn test_group_reaction_toggle() {
    let mut hub = Harness::new();
    let (_carol, mut dave, mut erin) = group_fixture(&mut hub);

    send_group_message(&mut hub, &mut dave, "gm1", "dave", "react to this");
    erin.drain();

    let react = json!({
        "type": "add_group_reaction",
        "data": { "groupId": "g1", "messageId": "gm1", "userId": "erin", "emoji": "🔥" }
    });

    hub.exec(&mut erin, react.clone());
    assert_eq!(hub.state.group_messages["g1"][0].reactions.len(), 1);
    assert!(erin.drain().iter().any(|e| matches!(
        e,
        ServerEvent::GroupReactionUpdated { reactions, .. } if reactions.len() == 1
    )));

    hub.exec(&mut erin, react);
    assert!(hub.state.group_messages["g1"][0].reactions.is_empty());
}

#[test]
fn test_group_typing_skips_the_typer() {
    let mut hub = Harness::new();
    let (mut carol, mut dave, mut erin) = group_fixture(&mut hub);

    hub.exec(
        &mut dave,
        json!({
            "type": "group_typing",
            "data": { "groupId": "g1", "userId": "dave", "isTyping": true }
        }),
    );

    assert!(dave.drain().is_empty());
    for client in [&mut carol, &mut erin] {
        assert!(client.drain().iter().any(|e| matches!(
            e,
            ServerEvent::GroupUserTyping { user_id, is_typing: true, .. } if user_id == "dave"
        )));
    }
}
