mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use common::Fixture;
use tl_domain::entity::{new_id, ContentPart, Message, Status};
use tl_domain::message::Role;
use tl_engine::{HistoryResolver, ResolveMode, Selector, SelectorKind};
use tl_store::ConversationStore;

fn resolver(f: &Fixture) -> HistoryResolver {
    HistoryResolver::new(Arc::new(f.store.clone()))
}

fn texts(chain: &tl_engine::ResolvedChain) -> Vec<String> {
    chain
        .entries
        .iter()
        .map(|e| e.content_parts.iter().map(|p| p.text.as_str()).collect())
        .collect()
}

#[tokio::test]
async fn resolution_is_deterministic() {
    let f = Fixture::new(vec![]).await;
    f.say("one").await;
    f.say("two").await;
    f.say("three").await;

    let selector = Selector::new(SelectorKind::Thread, [f.thread.id.clone()]);
    let r = resolver(&f);
    let a = r.resolve(&selector, Some(&f.principal), ResolveMode::Run).await.unwrap();
    let b = r.resolve(&selector, Some(&f.principal), ResolveMode::Run).await.unwrap();

    assert_eq!(texts(&a[0]), vec!["one", "two", "three"]);
    assert_eq!(texts(&a[0]), texts(&b[0]));
    let ids = |c: &tl_engine::ResolvedChain| -> Vec<String> {
        c.entries.iter().map(|e| e.message.id.clone()).collect()
    };
    assert_eq!(ids(&a[0]), ids(&b[0]));
}

#[tokio::test]
async fn explicit_message_selects_that_version() {
    let f = Fixture::new(vec![]).await;
    let first = f.say("first").await;
    let original = f.say("original").await;

    // A newer edit of the second turn.
    let later = Utc::now() + Duration::seconds(5);
    let edit = Message {
        id: new_id(),
        edited_root_message_id: Some(original.id.clone()),
        seq: original.seq + 1,
        created_at: later,
        updated_at: later,
        ..original.clone()
    };
    let mut part = ContentPart::placeholder(&edit.id, 0);
    part.text = "edited".into();
    let mut tx = f.store.begin().await.unwrap();
    tx.put_message(edit.clone()).await.unwrap();
    tx.put_content_part(part).await.unwrap();
    tx.commit().await.unwrap();

    let r = resolver(&f);
    let by_thread = r
        .resolve(
            &Selector::new(SelectorKind::Thread, [f.thread.id.clone()]),
            Some(&f.principal),
            ResolveMode::Run,
        )
        .await
        .unwrap();
    assert_eq!(texts(&by_thread[0]), vec!["first", "edited"]);

    let by_message = r
        .resolve(
            &Selector::new(SelectorKind::Message, [original.id.clone()]),
            Some(&f.principal),
            ResolveMode::Run,
        )
        .await
        .unwrap();
    assert_eq!(texts(&by_message[0]), vec!["first", "original"]);
    assert_eq!(by_message[0].entries[0].message.id, first.id);
}

#[tokio::test]
async fn content_part_selector_anchors_on_its_message() {
    let f = Fixture::new(vec![]).await;
    f.say("a").await;
    let b = f.say("b").await;
    f.say("c").await;

    let part_id = f.parts_of(&b.id).await[0].id.clone();
    let chains = resolver(&f)
        .resolve(
            &Selector::new(SelectorKind::ContentPart, [part_id]),
            Some(&f.principal),
            ResolveMode::Run,
        )
        .await
        .unwrap();
    assert_eq!(texts(&chains[0]), vec!["a", "b"]);
}

#[tokio::test]
async fn deleted_group_is_skipped_by_the_tail() {
    let f = Fixture::new(vec![]).await;
    f.say("kept").await;
    let dropped = f.say("dropped").await;

    let mut group = f
        .store
        .message_groups(&[dropped.message_group_id.clone()])
        .await
        .unwrap()
        .remove(0);
    group.status = Status::Deleted;
    let mut tx = f.store.begin().await.unwrap();
    tx.put_message_group(group).await.unwrap();
    tx.commit().await.unwrap();

    let chains = resolver(&f)
        .resolve(
            &Selector::new(SelectorKind::Thread, [f.thread.id.clone()]),
            Some(&f.principal),
            ResolveMode::Run,
        )
        .await
        .unwrap();
    assert_eq!(texts(&chains[0]), vec!["kept"]);
    assert_eq!(chains[0].entries[0].message_group.role, Role::User);
}

#[tokio::test]
async fn cached_turns_are_kept_when_building_a_cache() {
    use tl_domain::entity::{CacheRef, RequestConfig};

    let config = RequestConfig {
        cached_content: Some(CacheRef {
            name: "cachedContents/abc".into(),
            expire_time: Utc::now() + Duration::hours(1),
        }),
        ..Default::default()
    };
    let f = Fixture::with_config(vec![], config).await;
    let mut cached = f.say("cached").await;
    cached.cache_id = Some("cachedContents/abc".into());
    let mut tx = f.store.begin().await.unwrap();
    tx.put_message(cached).await.unwrap();
    tx.commit().await.unwrap();
    f.say("fresh").await;

    let selector = Selector::new(SelectorKind::Thread, [f.thread.id.clone()]);
    let r = resolver(&f);
    let run = r.resolve(&selector, Some(&f.principal), ResolveMode::Run).await.unwrap();
    let build = r
        .resolve(&selector, Some(&f.principal), ResolveMode::CacheCreation)
        .await
        .unwrap();

    assert_eq!(texts(&run[0]), vec!["fresh"]);
    assert_eq!(texts(&build[0]), vec!["cached", "fresh"]);
}

#[tokio::test]
async fn count_only_skips_membership() {
    let f = Fixture::new(vec![]).await;
    f.say("hello").await;
    let selector = Selector::new(SelectorKind::Thread, [f.thread.id.clone()]);
    let r = resolver(&f);

    assert!(r.resolve(&selector, None, ResolveMode::CountOnly).await.is_ok());
    let err = r
        .resolve(&selector, None, ResolveMode::Run)
        .await
        .err()
        .expect("a run needs a user");
    assert_eq!(err.kind(), "forbidden");
}
