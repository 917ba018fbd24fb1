//! Room registry and membership integration tests.
//!
//! Drives the services directly over the in-memory store with a manual
//! clock. Concurrency tests run on a multi-thread runtime so joins really
//! race.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use chat_service::clock::{Clock, ManualClock};
use chat_service::errors::ChatError;
use chat_service::models::{MemberRow, MessageRow, RoomRow};
use chat_service::repositories::{ChatStore, MemoryChatStore, SeatOutcome, SeatRequest};
use chat_service::services::membership::JoinParams;
use chat_service::services::{ChatContext, MembershipManager, MessageChannel, RoomRegistry};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TTL_SECONDS: i64 = 30;

struct Core {
    store: Arc<MemoryChatStore>,
    clock: Arc<ManualClock>,
    rooms: RoomRegistry,
    members: MembershipManager,
    messages: MessageChannel,
}

fn core(capacity: i32) -> Core {
    let store = Arc::new(MemoryChatStore::new());
    let clock = Arc::new(ManualClock::default());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let ctx = ChatContext::new(
        store.clone(),
        dyn_clock,
        Duration::from_secs(TTL_SECONDS as u64),
        Duration::from_secs(5),
    );
    Core {
        store,
        clock,
        rooms: RoomRegistry::new(ctx.clone(), capacity),
        members: MembershipManager::new(ctx.clone()),
        messages: MessageChannel::new(ctx),
    }
}

fn params(device: &str, session: &str) -> JoinParams {
    JoinParams {
        device_hash: device.to_string(),
        nickname: format!("nick-{device}"),
        session_id: session.to_string(),
        user_id: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ensure_room_creates_one_room() {
    let core = Arc::new(core(30));

    let tasks = (0..32).map(|_| {
        let core = core.clone();
        tokio::spawn(async move { core.rooms.ensure_room("story-race").await })
    });
    let results = join_all(tasks).await;

    let ids: HashSet<_> = results
        .into_iter()
        .map(|r| r.expect("task panicked").expect("ensure failed").id)
        .collect();

    assert_eq!(ids.len(), 1);
    assert_eq!(core.store.room_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_never_exceed_capacity() {
    let capacity = 5;
    let core = Arc::new(core(capacity));
    let room = core.rooms.ensure_room("story-full").await.unwrap();

    // Room already at capacity - 1.
    for i in 0..capacity - 1 {
        let device = format!("seed-{i}");
        core.members
            .join(room.id, params(&device, &device))
            .await
            .unwrap();
    }

    let tasks = (0..20).map(|i| {
        let core = core.clone();
        tokio::spawn(async move {
            let device = format!("racer-{i}");
            core.members.join(room.id, params(&device, &device)).await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    let joined = results.iter().filter(|r| r.is_ok()).count();
    let full = results
        .iter()
        .filter(|r| matches!(r, Err(ChatError::RoomFull { .. })))
        .count();

    assert_eq!(joined, 1);
    assert_eq!(full, 19);

    let snapshot = core.rooms.get_room_snapshot("story-full").await.unwrap();
    assert_eq!(snapshot.active_members, i64::from(capacity));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_device_joins_hold_one_seat() {
    let core = Arc::new(core(10));
    let room = core.rooms.ensure_room("story-dup").await.unwrap();

    let tasks = (0..10).map(|_| {
        let core = core.clone();
        tokio::spawn(async move { core.members.join(room.id, params("dev-x", "sess-x")).await })
    });
    let member_ids: HashSet<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked").expect("join failed").member_id)
        .collect();

    assert_eq!(member_ids.len(), 1);
    assert_eq!(core.store.member_row_count(room.id).await, 1);
}

#[tokio::test]
async fn test_rejoin_with_same_session_is_idempotent() {
    let core = core(30);
    let room = core.rooms.ensure_room("story-1").await.unwrap();

    let first = core.members.join(room.id, params("dev-a", "s1")).await.unwrap();
    core.clock.advance(TimeDelta::seconds(10));
    let second = core.members.join(room.id, params("dev-a", "s1")).await.unwrap();

    assert_eq!(first.member_id, second.member_id);
    assert_eq!(second.room.active_members, 1);
    assert_eq!(core.store.member_row_count(room.id).await, 1);
}

#[tokio::test]
async fn test_second_live_session_conflicts() {
    let core = core(30);
    let room = core.rooms.ensure_room("story-1").await.unwrap();

    core.members.join(room.id, params("dev-a", "s1")).await.unwrap();
    let result = core.members.join(room.id, params("dev-a", "s2")).await;

    assert!(matches!(result, Err(ChatError::MemberConflict)));
    assert_eq!(core.store.member_row_count(room.id).await, 1);
}

#[tokio::test]
async fn test_silent_member_is_reaped_after_ttl() {
    let core = core(2);
    let room = core.rooms.ensure_room("story-1").await.unwrap();

    let a = core.members.join(room.id, params("dev-a", "sa")).await.unwrap();
    core.members.join(room.id, params("dev-b", "sb")).await.unwrap();
    assert!(matches!(
        core.members.join(room.id, params("dev-c", "sc")).await,
        Err(ChatError::RoomFull { .. })
    ));

    // b stays silent; a keeps touching.
    core.clock.advance(TimeDelta::seconds(20));
    core.members.touch_presence(a.member_id).await.unwrap();
    core.clock.advance(TimeDelta::seconds(TTL_SECONDS - 20));

    // b was last seen exactly TTL ago: still live.
    let snapshot = core.rooms.get_room_snapshot("story-1").await.unwrap();
    assert_eq!(snapshot.active_members, 2);

    core.clock.advance(TimeDelta::milliseconds(1));
    let snapshot = core.rooms.get_room_snapshot("story-1").await.unwrap();
    assert_eq!(snapshot.active_members, 1);

    let c = core.members.join(room.id, params("dev-c", "sc")).await.unwrap();
    assert_eq!(c.room.active_members, 2);
}

#[tokio::test]
async fn test_expired_device_gets_fresh_seat() {
    let core = core(30);
    let room = core.rooms.ensure_room("story-1").await.unwrap();

    let first = core.members.join(room.id, params("dev-a", "s1")).await.unwrap();
    core.clock.advance(TimeDelta::seconds(TTL_SECONDS + 1));

    // A different session is fine once the old seat has expired.
    let second = core.members.join(room.id, params("dev-a", "s2")).await.unwrap();

    assert_ne!(first.member_id, second.member_id);
    assert_eq!(second.room.active_members, 1);
    assert!(matches!(
        core.members.touch_presence(first.member_id).await,
        Err(ChatError::MemberNotFound)
    ));
}

#[tokio::test]
async fn test_leave_is_idempotent_and_frees_the_seat() {
    let core = core(1);
    let room = core.rooms.ensure_room("story-1").await.unwrap();

    let a = core.members.join(room.id, params("dev-a", "sa")).await.unwrap();

    let after_leave = core.members.leave(a.member_id).await.unwrap();
    assert_eq!(after_leave.active_members, 0);

    let again = core.members.leave(a.member_id).await.unwrap();
    assert_eq!(again.active_members, 0);

    let b = core.members.join(room.id, params("dev-b", "sb")).await.unwrap();
    assert_eq!(b.room.active_members, 1);
}

#[tokio::test]
async fn test_left_member_cannot_touch_or_send() {
    let core = core(30);
    let room = core.rooms.ensure_room("story-1").await.unwrap();
    let a = core.members.join(room.id, params("dev-a", "sa")).await.unwrap();
    core.members.leave(a.member_id).await.unwrap();

    assert!(matches!(
        core.members.touch_presence(a.member_id).await,
        Err(ChatError::MemberNotFound)
    ));
    assert!(matches!(
        core.messages.send(a.member_id, "hello").await,
        Err(ChatError::MemberNotFound)
    ));
}

#[tokio::test]
async fn test_capacity_two_scenario() {
    let core = core(2);
    let room = core.rooms.ensure_room("story-small").await.unwrap();

    let a = core.members.join(room.id, params("dev-a", "sa")).await.unwrap();
    let b = core.members.join(room.id, params("dev-b", "sb")).await.unwrap();
    assert_eq!(b.room.active_members, 2);

    match core.members.join(room.id, params("dev-c", "sc")).await {
        Err(ChatError::RoomFull {
            capacity,
            active_members,
        }) => {
            assert_eq!(capacity, 2);
            assert_eq!(active_members, 2);
        }
        other => panic!("expected RoomFull, got {other:?}"),
    }

    core.members.leave(a.member_id).await.unwrap();
    let c = core.members.join(room.id, params("dev-c", "sc")).await.unwrap();
    assert_eq!(c.room.active_members, 2);
}

#[tokio::test]
async fn test_join_story_creates_room_on_first_join() {
    let core = core(30);

    let membership = core
        .members
        .join_story(&core.rooms, "story-new", params("dev-a", "sa"))
        .await
        .unwrap();

    assert_eq!(membership.room.story_id, "story-new");
    assert_eq!(membership.room.active_members, 1);
    assert_eq!(core.store.room_count().await, 1);
}

#[tokio::test]
async fn test_rooms_for_user_lists_unleft_rooms() {
    let core = core(30);
    let mut with_user = params("dev-a", "sa");
    with_user.user_id = Some("user-1".to_string());

    core.members
        .join_story(&core.rooms, "story-1", with_user.clone())
        .await
        .unwrap();
    core.clock.advance(TimeDelta::seconds(1));
    let second = core
        .members
        .join_story(&core.rooms, "story-2", with_user)
        .await
        .unwrap();

    let rooms = core.members.rooms_for_user("user-1").await.unwrap();
    let stories: Vec<&str> = rooms.iter().map(|r| r.story_id.as_str()).collect();
    assert_eq!(stories, vec!["story-2", "story-1"]);

    core.members.leave(second.member_id).await.unwrap();
    let rooms = core.members.rooms_for_user("user-1").await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert!(core.members.rooms_for_user("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_outage_is_store_unavailable() {
    let core = core(30);
    let room = core.rooms.ensure_room("story-1").await.unwrap();
    core.store.set_available(false);

    assert!(matches!(
        core.members.join(room.id, params("dev-a", "sa")).await,
        Err(ChatError::StoreUnavailable(_))
    ));

    core.store.set_available(true);
    assert_eq!(core.store.member_row_count(room.id).await, 0);
}

/// Memory store whose first `missing_for` seat reservations report the room
/// as gone, as happens when a room row is removed between ensure and join.
struct VanishingRoomStore {
    inner: MemoryChatStore,
    missing_for: u32,
    reservations: AtomicU32,
}

impl VanishingRoomStore {
    fn new(missing_for: u32) -> Self {
        Self {
            inner: MemoryChatStore::new(),
            missing_for,
            reservations: AtomicU32::new(0),
        }
    }

    fn reservations(&self) -> u32 {
        self.reservations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatStore for VanishingRoomStore {
    async fn upsert_room(
        &self,
        story_id: &str,
        capacity: i32,
        now: DateTime<Utc>,
    ) -> Result<RoomRow, ChatError> {
        self.inner.upsert_room(story_id, capacity, now).await
    }

    async fn find_room_by_story(&self, story_id: &str) -> Result<Option<RoomRow>, ChatError> {
        self.inner.find_room_by_story(story_id).await
    }

    async fn find_room(&self, room_id: Uuid) -> Result<Option<RoomRow>, ChatError> {
        self.inner.find_room(room_id).await
    }

    async fn count_active_members(
        &self,
        room_id: Uuid,
        live_since: DateTime<Utc>,
    ) -> Result<i64, ChatError> {
        self.inner.count_active_members(room_id, live_since).await
    }

    async fn last_message_at(&self, room_id: Uuid) -> Result<Option<DateTime<Utc>>, ChatError> {
        self.inner.last_message_at(room_id).await
    }

    async fn reserve_seat(
        &self,
        request: &SeatRequest,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SeatOutcome, ChatError> {
        let attempt = self.reservations.fetch_add(1, Ordering::SeqCst);
        if attempt < self.missing_for {
            return Ok(SeatOutcome::RoomMissing);
        }
        self.inner.reserve_seat(request, live_since, now).await
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<MemberRow>, ChatError> {
        self.inner.find_member(member_id).await
    }

    async fn mark_left(
        &self,
        member_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError> {
        self.inner.mark_left(member_id, now).await
    }

    async fn touch_member(
        &self,
        member_id: Uuid,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError> {
        self.inner.touch_member(member_id, live_since, now).await
    }

    async fn insert_message(
        &self,
        member_id: Uuid,
        body: &str,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageRow>, ChatError> {
        self.inner
            .insert_message(member_id, body, live_since, now)
            .await
    }

    async fn list_messages(
        &self,
        room_id: Uuid,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRow>, ChatError> {
        self.inner.list_messages(room_id, before, limit).await
    }

    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomRow>, ChatError> {
        self.inner.rooms_for_user(user_id).await
    }

    async fn ping(&self) -> Result<(), ChatError> {
        self.inner.ping().await
    }
}

fn vanishing_core(missing_for: u32) -> (Arc<VanishingRoomStore>, RoomRegistry, MembershipManager) {
    let store = Arc::new(VanishingRoomStore::new(missing_for));
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
    let ctx = ChatContext::new(
        store.clone(),
        clock,
        Duration::from_secs(TTL_SECONDS as u64),
        Duration::from_secs(5),
    );
    (
        store,
        RoomRegistry::new(ctx.clone(), 30),
        MembershipManager::new(ctx),
    )
}

#[tokio::test]
async fn test_join_story_recovers_from_one_missing_room() {
    let (store, rooms, members) = vanishing_core(1);

    let membership = members
        .join_story(&rooms, "story-1", params("dev-a", "sa"))
        .await
        .unwrap();

    assert_eq!(membership.room.active_members, 1);
    assert_eq!(store.reservations(), 2);
}

#[tokio::test]
async fn test_join_story_retries_only_once() {
    let (store, rooms, members) = vanishing_core(5);

    let result = members
        .join_story(&rooms, "story-1", params("dev-a", "sa"))
        .await;

    assert!(matches!(result, Err(ChatError::RoomNotFound(_))));
    assert_eq!(store.reservations(), 2);
}
