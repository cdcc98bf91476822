//! Live channels: backlog gating, dedup and restarts.

mod common;

use common::{client, signed, MockPool};
use nostr_sdk::prelude::*;
use std::time::Duration;
use tokio_stream::StreamExt;

const QUIET: Duration = Duration::from_millis(100);

#[tokio::test]
async fn backlog_delivers_only_the_newest_once() {
    let keys = Keys::generate();
    let pool = MockPool::new();
    let client = client(&pool);

    let mut stream = client
        .subscribe_profiles(&[keys.public_key()])
        .await
        .unwrap();
    for ts in [5, 3, 7] {
        pool.emit_to(0, &signed(&keys, 0, ts, &format!(r#"{{"name":"v{ts}"}}"#), vec![]));
    }
    pool.end_of_stored(0);

    let first = stream.next().await.unwrap();
    assert_eq!(first.event.created_at.as_secs(), 7);
    assert_eq!(first.profile.display(), Some("v7"));
    assert!(tokio::time::timeout(QUIET, stream.next()).await.is_err());

    pool.end_of_stored(0);
    assert!(tokio::time::timeout(QUIET, stream.next()).await.is_err());
}

#[tokio::test]
async fn live_events_after_backlog() {
    let keys = Keys::generate();
    let pool = MockPool::new();
    let client = client(&pool);

    let mut stream = client
        .subscribe_profiles(&[keys.public_key()])
        .await
        .unwrap();
    pool.end_of_stored(0);
    assert!(tokio::time::timeout(QUIET, stream.next()).await.is_err());

    let fresh = signed(&keys, 0, 9, r#"{"name":"nine"}"#, vec![]);
    pool.emit_to(0, &fresh);
    assert_eq!(stream.next().await.unwrap().event.id, fresh.id);

    pool.emit_to(0, &signed(&keys, 0, 8, r#"{"name":"eight"}"#, vec![]));
    pool.emit_to(0, &fresh);
    assert!(tokio::time::timeout(QUIET, stream.next()).await.is_err());
}

#[tokio::test]
async fn queued_update_superseded_before_delivery() {
    let keys = Keys::generate();
    let pool = MockPool::new();
    let client = client(&pool);

    let mut stream = client
        .subscribe_profiles(&[keys.public_key()])
        .await
        .unwrap();
    pool.end_of_stored(0);
    assert!(tokio::time::timeout(QUIET, stream.next()).await.is_err());

    // Both arrive before the worker gets to the first one.
    let older = signed(&keys, 0, 20, r#"{"name":"older"}"#, vec![]);
    let newer = signed(&keys, 0, 21, r#"{"name":"newer"}"#, vec![]);
    pool.emit_to(0, &older);
    pool.emit_to(0, &newer);

    let delivered = stream.next().await.unwrap();
    assert_eq!(delivered.event.id, newer.id);
    assert_eq!(delivered.profile.display(), Some("newer"));
    assert!(tokio::time::timeout(QUIET, stream.next()).await.is_err());
}

#[tokio::test]
async fn restart_stops_previous_subscription() {
    let a = Keys::generate();
    let b = Keys::generate();
    let pool = MockPool::new();
    let client = client(&pool);

    let mut first = client.subscribe_profiles(&[a.public_key()]).await.unwrap();
    let _second = client.subscribe_profiles(&[b.public_key()]).await.unwrap();

    assert!(pool.is_stopped(0));
    assert!(!pool.is_stopped(1));
    assert_eq!(
        pool.subscription_filter(1).unwrap(),
        Filter::new().kind(Kind::Metadata).author(b.public_key())
    );
    assert!(first.next().await.is_none());
}

#[tokio::test]
async fn contact_list_comes_with_profiles_in_list_order() {
    let me = Keys::generate();
    let alice = Keys::generate();
    let bob = Keys::generate();
    let list = signed(
        &me,
        3,
        10,
        "",
        vec![
            vec!["p", alice.public_key().to_hex().as_str()],
            vec!["p", bob.public_key().to_hex().as_str()],
            vec!["p", alice.public_key().to_hex().as_str()],
        ],
    );
    // Relays return bob first, and his profile is newer.
    let pool = MockPool::with_events(vec![
        list,
        signed(&bob, 0, 5, r#"{"name":"bob"}"#, vec![]),
        signed(&alice, 0, 1, r#"{"name":"alice"}"#, vec![]),
    ]);
    pool.set_auto_eose(true);
    let client = client(&pool);

    let mut stream = client.subscribe_contact_list(me.public_key()).await.unwrap();
    let contacts = stream.next().await.unwrap();
    assert_eq!(
        contacts.contact_pubkeys,
        vec![alice.public_key(), bob.public_key()]
    );
    let names: Vec<Option<&str>> = contacts
        .contacts
        .iter()
        .map(|c| c.profile.display())
        .collect();
    assert_eq!(names, vec![Some("alice"), Some("bob")]);
}

#[tokio::test]
async fn bookmark_list_resolves_notes_and_articles() {
    let me = Keys::generate();
    let writer = Keys::generate();
    let note = signed(&writer, 1, 50, "note", vec![]);
    let article = signed(&writer, 30023, 40, "article", vec![vec!["d", "a"]]);
    let reaction = signed(&writer, 7, 60, "+", vec![]);
    let list = signed(
        &me,
        30001,
        10,
        "",
        vec![
            vec!["d", "bookmark"],
            vec!["e", note.id.to_hex().as_str()],
            vec!["e", article.id.to_hex().as_str()],
            vec!["e", reaction.id.to_hex().as_str()],
        ],
    );
    let pool = MockPool::with_events(vec![list, note.clone(), article.clone(), reaction]);
    pool.set_auto_eose(true);
    let client = client(&pool);

    let mut stream = client
        .subscribe_bookmark_list(me.public_key())
        .await
        .unwrap();
    let bookmarks = stream.next().await.unwrap();
    assert_eq!(bookmarks.event_ids.len(), 3);
    let ids: Vec<EventId> = bookmarks.bookmarks.iter().map(|b| b.event.id).collect();
    assert_eq!(ids, vec![note.id, article.id]);

    client.shutdown().await;
    assert!(pool.is_stopped(0));
}
