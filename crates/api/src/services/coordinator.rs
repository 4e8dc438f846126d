//! Readiness consensus coordinator.
//!
//! Tracks, per closed group, which connected members have reported ready.
//! Unanimous readiness arms a countdown broadcast as an absolute deadline;
//! any regression (toggle back, disconnect) cancels it. An expired timer
//! re-validates its session under the lock before committing the terminal
//! ride-started transition, and the group version CAS in the starter makes
//! sure exactly one committer wins even against an explicit admin start.
//!
//! Roster and countdown events are pushed into the room while the
//! sessions lock is still held, so subscribers observe them in the same
//! order the session mutations happened. A cancellation can therefore
//! never be delivered before the countdown-started it cancels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::channel::{ReadyState, ServerEvent};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::lifecycle::{GroupLifecycle, LifecycleError};
use crate::services::rooms::RoomRegistry;

/// Commits the terminal ride-started transition. Seam between the
/// coordinator and the lifecycle service so countdown behavior is
/// testable without a database.
#[async_trait]
pub trait RideStarter: Send + Sync {
    async fn start(&self, group_id: Uuid) -> Result<(), LifecycleError>;
}

#[async_trait]
impl RideStarter for GroupLifecycle {
    async fn start(&self, group_id: Uuid) -> Result<(), LifecycleError> {
        self.record_ride_started(group_id).await
    }
}

/// Error type for readiness operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("Join the group channel before toggling readiness")]
    NotJoined,
}

#[derive(Debug, Default)]
struct MemberPresence {
    display_name: String,
    ready: bool,
}

struct Countdown {
    deadline: DateTime<Utc>,
    token: CancellationToken,
    /// Matches the session generation it was armed under; a stale timer
    /// whose generation moved on does nothing.
    generation: u64,
}

#[derive(Default)]
struct Session {
    members: HashMap<Uuid, MemberPresence>,
    countdown: Option<Countdown>,
    generation: u64,
}

impl Session {
    fn roster(&self) -> Vec<ReadyState> {
        let mut roster: Vec<ReadyState> = self
            .members
            .iter()
            .map(|(user_id, m)| ReadyState {
                user_id: *user_id,
                display_name: m.display_name.clone(),
                ready: m.ready,
            })
            .collect();
        roster.sort_by_key(|r| r.user_id);
        roster
    }

    fn cancel_countdown(&mut self) -> bool {
        if let Some(countdown) = self.countdown.take() {
            countdown.token.cancel();
            return true;
        }
        false
    }
}

/// Outcome of a readiness toggle, for the channel to broadcast.
#[derive(Debug)]
pub struct ToggleOutcome {
    pub members: Vec<ReadyState>,
    /// Set when this toggle completed unanimous readiness.
    pub countdown_started: Option<DateTime<Utc>>,
    /// Set when this toggle cancelled an active countdown.
    pub countdown_cancelled: bool,
}

/// Outcome of a member leaving the session.
#[derive(Debug)]
pub struct LeaveOutcome {
    pub members: Vec<ReadyState>,
    pub countdown_cancelled: bool,
}

/// In-memory readiness sessions, one per closed group with connected
/// members.
pub struct ReadinessCoordinator {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    rooms: Arc<RoomRegistry>,
    starter: Arc<dyn RideStarter>,
    countdown: Duration,
}

impl ReadinessCoordinator {
    pub fn new(rooms: Arc<RoomRegistry>, starter: Arc<dyn RideStarter>, countdown: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            rooms,
            starter,
            countdown,
        }
    }

    /// Registers a connected member and broadcasts the refreshed roster.
    /// Initial readiness is always false, also on reconnect.
    pub async fn join(&self, group_id: Uuid, user_id: Uuid, display_name: &str) -> Vec<ReadyState> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(group_id).or_default();
        session.members.insert(
            user_id,
            MemberPresence {
                display_name: display_name.to_string(),
                ready: false,
            },
        );
        let roster = session.roster();
        self.rooms
            .send(
                group_id,
                ServerEvent::GroupReadyStatusUpdated {
                    members: roster.clone(),
                },
            )
            .await;
        roster
    }

    /// Deregisters a member. Disconnecting implies not-ready, so an
    /// active countdown is cancelled; the roster update and cancellation
    /// go out before the lock is released.
    pub async fn leave(&self, group_id: Uuid, user_id: Uuid) -> LeaveOutcome {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&group_id) else {
            return LeaveOutcome {
                members: Vec::new(),
                countdown_cancelled: false,
            };
        };

        let was_present = session.members.remove(&user_id).is_some();
        let countdown_cancelled = was_present && session.cancel_countdown();
        let members = session.roster();

        if was_present && !members.is_empty() {
            self.rooms
                .send(
                    group_id,
                    ServerEvent::GroupReadyStatusUpdated {
                        members: members.clone(),
                    },
                )
                .await;
        }
        if countdown_cancelled {
            self.rooms
                .send(group_id, ServerEvent::CountdownCancelled)
                .await;
        }

        if session.members.is_empty() {
            sessions.remove(&group_id);
        }

        LeaveOutcome {
            members,
            countdown_cancelled,
        }
    }

    /// Flips the caller's readiness flag. `member_ids` is the group's
    /// authoritative member list; the countdown only arms when every one
    /// of them is connected and ready. The post-toggle roster and any
    /// countdown transition are broadcast before the lock is released.
    pub async fn toggle_ready(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<ToggleOutcome, ReadinessError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&group_id)
            .ok_or(ReadinessError::NotJoined)?;
        let member = session
            .members
            .get_mut(&user_id)
            .ok_or(ReadinessError::NotJoined)?;

        member.ready = !member.ready;
        let now_ready = member.ready;

        let mut countdown_cancelled = false;
        if !now_ready {
            countdown_cancelled = session.cancel_countdown();
        }

        let all_ready = !member_ids.is_empty()
            && member_ids
                .iter()
                .all(|id| session.members.get(id).is_some_and(|m| m.ready));

        let countdown_started = if now_ready && all_ready && session.countdown.is_none() {
            Some(self.arm_countdown(group_id, session))
        } else {
            None
        };

        let members = session.roster();
        self.rooms
            .send(
                group_id,
                ServerEvent::GroupReadyStatusUpdated {
                    members: members.clone(),
                },
            )
            .await;
        if let Some(end_time) = countdown_started {
            self.rooms
                .send(group_id, ServerEvent::CountdownStarted { end_time })
                .await;
        }
        if countdown_cancelled {
            self.rooms
                .send(group_id, ServerEvent::CountdownCancelled)
                .await;
        }

        Ok(ToggleOutcome {
            members,
            countdown_started,
            countdown_cancelled,
        })
    }

    /// Drops a group's session entirely, cancelling any countdown. Used
    /// after an explicit admin start.
    pub async fn clear(&self, group_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(mut session) = sessions.remove(&group_id) {
            session.cancel_countdown();
        }
    }

    /// Current readiness flag of a member, if connected.
    pub async fn is_ready(&self, group_id: Uuid, user_id: Uuid) -> Option<bool> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&group_id)
            .and_then(|s| s.members.get(&user_id))
            .map(|m| m.ready)
    }

    fn arm_countdown(&self, group_id: Uuid, session: &mut Session) -> DateTime<Utc> {
        session.generation += 1;
        let generation = session.generation;
        let token = CancellationToken::new();
        let deadline = Utc::now()
            + chrono::Duration::from_std(self.countdown).unwrap_or(chrono::Duration::seconds(30));
        session.countdown = Some(Countdown {
            deadline,
            token: token.clone(),
            generation,
        });

        debug!(group_id = %group_id, %deadline, "Countdown armed");

        let expires = Instant::now() + self.countdown;
        let sessions = Arc::clone(&self.sessions);
        let rooms = Arc::clone(&self.rooms);
        let starter = Arc::clone(&self.starter);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep_until(expires) => {
                    Self::finish_countdown(sessions, rooms, starter, group_id, generation).await;
                }
            }
        });

        deadline
    }

    /// Timer expiry path. Re-validates the session before committing; a
    /// cancellation that raced the timer, or any regression, aborts here.
    async fn finish_countdown(
        sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
        rooms: Arc<RoomRegistry>,
        starter: Arc<dyn RideStarter>,
        group_id: Uuid,
        generation: u64,
    ) {
        {
            let mut guard = sessions.lock().await;
            let Some(session) = guard.get_mut(&group_id) else {
                return;
            };
            match &session.countdown {
                Some(countdown) if countdown.generation == generation => {}
                _ => return,
            }
            if !session.members.values().all(|m| m.ready) {
                session.cancel_countdown();
                return;
            }
            session.countdown = None;
        }

        // The starter re-checks group status and CAS-bumps the version,
        // so a concurrent explicit start cannot double-commit.
        match starter.start(group_id).await {
            Ok(()) => {
                sessions.lock().await.remove(&group_id);
                rooms.send(group_id, ServerEvent::RideStarted).await;
            }
            Err(e) => {
                warn!(group_id = %group_id, error = %e, "Countdown expired but ride start failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct MockStarter {
        calls: StdMutex<Vec<Uuid>>,
    }

    impl MockStarter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RideStarter for MockStarter {
        async fn start(&self, group_id: Uuid) -> Result<(), LifecycleError> {
            self.calls.lock().unwrap().push(group_id);
            Ok(())
        }
    }

    fn coordinator(starter: Arc<MockStarter>) -> (ReadinessCoordinator, Arc<RoomRegistry>) {
        let rooms = Arc::new(RoomRegistry::new());
        let coordinator =
            ReadinessCoordinator::new(Arc::clone(&rooms), starter, Duration::from_secs(30));
        (coordinator, rooms)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanimous_readiness_starts_ride_after_countdown() {
        let starter = MockStarter::new();
        let (coordinator, rooms) = coordinator(Arc::clone(&starter));
        let group_id = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let members = [a, b];

        let mut rx = rooms.subscribe(group_id).await;
        coordinator.join(group_id, a, "A").await;
        coordinator.join(group_id, b, "B").await;

        let outcome = coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        assert!(outcome.countdown_started.is_none());

        let outcome = coordinator.toggle_ready(group_id, b, &members).await.unwrap();
        assert!(outcome.countdown_started.is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(starter.call_count(), 1);
        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&ServerEvent::RideStarted));
        assert!(coordinator.sessions.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_events_broadcast_in_session_order() {
        let starter = MockStarter::new();
        let (coordinator, rooms) = coordinator(Arc::clone(&starter));
        let group_id = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let members = [a, b];

        let mut rx = rooms.subscribe(group_id).await;
        coordinator.join(group_id, a, "A").await;
        coordinator.join(group_id, b, "B").await;
        coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        coordinator.toggle_ready(group_id, b, &members).await.unwrap();
        coordinator.toggle_ready(group_id, b, &members).await.unwrap();

        // The cancellation must never be observed before the start it
        // cancels, and nothing may trail the cancellation.
        let events = drain(&mut rx);
        let started = events
            .iter()
            .position(|e| matches!(e, ServerEvent::CountdownStarted { .. }))
            .expect("countdown-started was broadcast");
        let cancelled = events
            .iter()
            .position(|e| matches!(e, ServerEvent::CountdownCancelled))
            .expect("countdown-cancelled was broadcast");
        assert!(started < cancelled);
        assert_eq!(events.last(), Some(&ServerEvent::CountdownCancelled));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(starter.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regression_cancels_countdown() {
        let starter = MockStarter::new();
        let (coordinator, _rooms) = coordinator(Arc::clone(&starter));
        let group_id = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let members = [a, b];

        coordinator.join(group_id, a, "A").await;
        coordinator.join(group_id, b, "B").await;
        coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        coordinator.toggle_ready(group_id, b, &members).await.unwrap();

        let outcome = coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        assert!(outcome.countdown_cancelled);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(starter.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_countdown() {
        let starter = MockStarter::new();
        let (coordinator, _rooms) = coordinator(Arc::clone(&starter));
        let group_id = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let members = [a, b];

        coordinator.join(group_id, a, "A").await;
        coordinator.join(group_id, b, "B").await;
        coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        coordinator.toggle_ready(group_id, b, &members).await.unwrap();

        let outcome = coordinator.leave(group_id, b).await;
        assert!(outcome.countdown_cancelled);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(starter.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_fire_after_rearm() {
        let starter = MockStarter::new();
        let (coordinator, _rooms) = coordinator(Arc::clone(&starter));
        let group_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let members = [a];

        coordinator.join(group_id, a, "A").await;

        // Arm, cancel, then re-arm; only the second countdown may commit.
        coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        let outcome = coordinator.toggle_ready(group_id, a, &members).await.unwrap();
        assert!(outcome.countdown_started.is_some());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(starter.call_count(), 1);
    }

    #[tokio::test]
    async fn test_toggle_without_join_is_rejected() {
        let starter = MockStarter::new();
        let (coordinator, _rooms) = coordinator(starter);
        let group_id = Uuid::new_v4();
        let a = Uuid::new_v4();

        let result = coordinator.toggle_ready(group_id, a, &[a]).await;
        assert_eq!(result.unwrap_err(), ReadinessError::NotJoined);
    }

    #[tokio::test]
    async fn test_partial_readiness_does_not_arm() {
        let starter = MockStarter::new();
        let (coordinator, _rooms) = coordinator(starter);
        let group_id = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        coordinator.join(group_id, a, "A").await;
        coordinator.join(group_id, b, "B").await;

        // b is a group member but not ready; a alone must not arm.
        let outcome = coordinator.toggle_ready(group_id, a, &[a, b]).await.unwrap();
        assert!(outcome.countdown_started.is_none());

        // A disconnected group member blocks unanimity too.
        let c = Uuid::new_v4();
        let outcome = coordinator.toggle_ready(group_id, b, &[a, b, c]).await.unwrap();
        assert!(outcome.countdown_started.is_none());
    }

    #[tokio::test]
    async fn test_rejoin_resets_readiness() {
        let starter = MockStarter::new();
        let (coordinator, _rooms) = coordinator(starter);
        let group_id = Uuid::new_v4();
        let a = Uuid::new_v4();

        coordinator.join(group_id, a, "A").await;
        coordinator.toggle_ready(group_id, a, &[a, Uuid::new_v4()]).await.unwrap();
        assert_eq!(coordinator.is_ready(group_id, a).await, Some(true));

        let roster = coordinator.join(group_id, a, "A").await;
        assert!(!roster[0].ready);
    }
}
