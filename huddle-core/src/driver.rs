//! Async driver for a `Session`
//!
//! Owns the session on a single task so every event is applied in arrival
//! order. Timers (activity refresh, presence flush and heartbeat) are just
//! more inputs to the same loop.

use std::future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use crate::error::{Error, Result};
use crate::logging::session_span;
use crate::session::{Session, SessionEvent, SessionStats, SessionView};
use crate::subscription::SubscriptionHandle;
use crate::types::{ParticipantId, TrackKind};

enum Command {
    Event(SessionEvent),
    SubscribeTrack {
        participant_id: ParticipantId,
        kind: TrackKind,
        reply: oneshot::Sender<Option<SubscriptionHandle>>,
    },
    UnsubscribeTrack(SubscriptionHandle),
}

/// Handle to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// Queue an event for the session
    pub fn send(&self, event: SessionEvent) -> Result<()> {
        self.command(Command::Event(event))
    }

    /// Acquire a remote track for a UI consumer, see `Session::subscribe_track`
    pub async fn subscribe_track(
        &self,
        participant_id: ParticipantId,
        kind: TrackKind,
    ) -> Result<Option<SubscriptionHandle>> {
        let (reply, response) = oneshot::channel();
        self.command(Command::SubscribeTrack {
            participant_id,
            kind,
            reply,
        })?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Release a handle from `subscribe_track`
    pub fn unsubscribe_track(&self, handle: SubscriptionHandle) -> Result<()> {
        self.command(Command::UnsubscribeTrack(handle))
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::SessionClosed)
    }

    /// Latest published view
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified whenever the view changes
    #[must_use]
    pub fn watch_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Stop the session; subscriptions are released before the task exits
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

pub struct SessionDriver;

impl SessionDriver {
    /// Spawn `session` on the current runtime
    ///
    /// The task ends when `shutdown` is called or every handle is dropped,
    /// returning the final statistics.
    pub fn spawn(session: Session) -> (SessionHandle, JoinHandle<SessionStats>) {
        // tokio's interval rejects a zero period
        let refresh_interval = session
            .config()
            .session
            .refresh_interval()
            .max(Duration::from_millis(1));
        let span = session_span(session.roster().local_id());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(session.view());
        let cancel_token = CancellationToken::new();

        let task = run(
            session,
            commands_rx,
            view_tx,
            cancel_token.clone(),
            refresh_interval,
        );
        let join = tokio::spawn(task.instrument(span));

        let handle = SessionHandle {
            commands: commands_tx,
            view: view_rx,
            cancel_token,
        };
        (handle, join)
    }
}

async fn run(
    mut session: Session,
    mut commands: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<SessionView>,
    cancel_token: CancellationToken,
    refresh_interval: Duration,
) -> SessionStats {
    let mut refresh = interval(refresh_interval);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        refresh_interval_ms = refresh_interval.as_millis() as u64,
        "Session driver started"
    );

    loop {
        let presence_deadline = session.next_presence_deadline();

        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                info!("Session driver shutting down");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All session handles dropped");
                    break;
                };
                match command {
                    Command::Event(event) => publish(&view_tx, session.handle(event)),
                    Command::SubscribeTrack {
                        participant_id,
                        kind,
                        reply,
                    } => {
                        let handle = session.subscribe_track(&participant_id, kind);
                        // a dropped receiver hands the handle back
                        if let Err(Some(handle)) = reply.send(handle) {
                            session.unsubscribe_track(handle);
                        }
                    }
                    Command::UnsubscribeTrack(handle) => {
                        session.unsubscribe_track(handle);
                    }
                }
            }
            () = wait_until(presence_deadline) => {
                session.flush_presence();
            }
            _ = refresh.tick() => {
                publish(&view_tx, session.refresh());
            }
        }
    }

    session.teardown();
    let stats = session.stats();
    info!(
        participants = stats.participants,
        stage_changes = stats.stage_changes,
        presence_sent = stats.presence_sent,
        "Session driver stopped"
    );
    stats
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn publish(view_tx: &watch::Sender<SessionView>, view: SessionView) {
    view_tx.send_if_modified(|current| {
        if *current == view {
            false
        } else {
            *current = view;
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::CoreConfig;
    use crate::participant::{Participant, TrackHandles};
    use crate::signaling::OutboundSignal;
    use crate::types::{MediaFlags, TrackId};
    use std::sync::Arc;

    fn spawn_session() -> (
        SessionHandle,
        JoinHandle<SessionStats>,
        mpsc::UnboundedReceiver<OutboundSignal>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(
            "me".into(),
            MediaFlags::default(),
            CoreConfig::default(),
            Box::new(tx),
            Arc::new(SystemClock),
        );
        let (handle, join) = SessionDriver::spawn(session);
        (handle, join, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_follows_events() {
        let (handle, join, _rx) = spawn_session();
        let mut view = handle.watch_view();

        handle
            .send(SessionEvent::ParticipantJoined(Participant::new("alice")))
            .unwrap();
        view.changed().await.unwrap();
        assert_eq!(handle.view().stage.as_slice(), &["alice".into()]);

        handle.shutdown();
        let stats = join.await.unwrap();
        assert_eq!(stats.participants, 1);
        assert!(handle.send(SessionEvent::Refresh).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_presence_is_sent_on_start() {
        let (handle, join, mut rx) = spawn_session();
        tokio::time::sleep(Duration::from_millis(1)).await;

        match rx.try_recv() {
            Ok(OutboundSignal::Presence(message)) => assert_eq!(message.sequence, 1),
            other => panic!("expected presence, got {other:?}"),
        }

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_runs_on_timer() {
        let (handle, join, mut rx) = spawn_session();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let mut presence = 0;
        while let Ok(signal) = rx.try_recv() {
            if matches!(signal, OutboundSignal::Presence(_)) {
                presence += 1;
            }
        }
        // initial announcement plus heartbeats at 15s and 30s
        assert_eq!(presence, 3);

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_subscriptions() {
        let (handle, join, mut rx) = spawn_session();
        handle
            .send(SessionEvent::ParticipantJoined(
                Participant::new("alice").with_tracks(TrackHandles {
                    audio: Some(TrackId::new("alice-mic")),
                    video: None,
                    screen_share: None,
                }),
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.shutdown();
        let stats = join.await.unwrap();
        assert_eq!(stats.subscriptions.audio, 0);

        let mut released = 0;
        while let Ok(signal) = rx.try_recv() {
            if matches!(signal, OutboundSignal::ReleaseTrack { .. }) {
                released += 1;
            }
        }
        assert_eq!(released, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_handles_through_driver() {
        let (handle, join, mut rx) = spawn_session();
        handle
            .send(SessionEvent::ParticipantJoined(
                Participant::new("alice").with_tracks(TrackHandles {
                    audio: None,
                    video: Some(TrackId::new("alice-cam")),
                    screen_share: None,
                }),
            ))
            .unwrap();

        let tile = handle
            .subscribe_track("alice".into(), TrackKind::Video)
            .await
            .unwrap()
            .unwrap();
        assert!(handle
            .subscribe_track("ghost".into(), TrackKind::Video)
            .await
            .unwrap()
            .is_none());

        // alice stays on stage, so the stage still holds her video
        handle.unsubscribe_track(tile).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut requests = 0;
        let mut releases = 0;
        while let Ok(signal) = rx.try_recv() {
            match signal {
                OutboundSignal::RequestTrack { .. } => requests += 1,
                OutboundSignal::ReleaseTrack { .. } => releases += 1,
                OutboundSignal::Presence(_) => {}
            }
        }
        assert_eq!((requests, releases), (1, 0));

        handle.shutdown();
        let stats = join.await.unwrap();
        assert_eq!(stats.subscriptions.total_releases, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_stops_the_task() {
        let (handle, join, _rx) = spawn_session();
        drop(handle);
        join.await.unwrap();
    }
}
