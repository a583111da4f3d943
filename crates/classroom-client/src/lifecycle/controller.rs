//! `ConnectionLifecycleManager` - owner of one classroom session.
//!
//! The manager is an actor: a single task owns the `Session`, the
//! `ResourcePublisher`, the popups and the current `TeardownCoordinator`, and
//! handles one message at a time. Everything slow (credential fetches,
//! transport joins, device opens, backoff timers) runs in spawned tasks that
//! report back through internal channels, so a pending permission prompt
//! never blocks a leave.
//!
//! # Liveness
//!
//! The root `CancellationToken` is the liveness flag. `dispose()` cancels it;
//! the actor runs a final teardown and stops. Background tasks check the
//! token when they resume and drop their results, and the notification
//! queue ignores pushes.
//!
//! # Stale results
//!
//! Every join attempt gets a new generation number. Leaving, failing, or
//! retrying bumps it, so a credential response or retry timer from an
//! abandoned attempt is ignored on arrival.

use super::messages::{Completion, ControllerMessage, LeaveOutcome, SessionEvent};
use super::publisher::ResourcePublisher;
use super::retry::{RetryDecision, RetryPolicy};
use super::session::{Credentials, JoinTarget, Session, SessionSnapshot, SessionState};
use super::teardown::{TeardownCoordinator, TeardownReport, TeardownStep, TeardownTarget};
use crate::config::Config;
use crate::credentials::{CredentialRequest, CredentialService, JoinIdentity};
use crate::devices::{CaptureDevices, CaptureKind};
use crate::errors::{CredentialError, CredentialErrorKind, SessionError, TransportError};
use crate::observability::metrics;
use crate::overlays::{
    NotificationQueue, Point, PopupId, PopupKind, PopupWindow, PopupWindowManager, Severity,
    Viewport,
};
use crate::transport::{Transport, TransportConnectionState, TransportEvent};
use async_trait::async_trait;
use common::types::{ChannelId, ParticipantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox size for the controller.
const CONTROLLER_CHANNEL_BUFFER: usize = 64;

/// Capacity of the session event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// External collaborators of the controller.
#[derive(Clone)]
pub struct LifecycleDependencies {
    pub credentials: Arc<dyn CredentialService>,
    pub transport: Arc<dyn Transport>,
    pub devices: Arc<dyn CaptureDevices>,
}

/// Handle to the `ConnectionLifecycleManager`.
///
/// Cloneable; all clones talk to the same session. Request methods return
/// `SessionError::Disposed` once the controller has been disposed.
#[derive(Clone)]
pub struct ConnectionLifecycleHandle {
    sender: mpsc::Sender<ControllerMessage>,
    liveness: CancellationToken,
    stopped: CancellationToken,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    notifications: NotificationQueue,
}

impl ConnectionLifecycleHandle {
    /// Spawn a controller and return a handle to it.
    #[must_use]
    pub fn new(config: &Config, deps: LifecycleDependencies) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let liveness = CancellationToken::new();
        let stopped = CancellationToken::new();
        let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let notifications = NotificationQueue::new(
            config.max_visible_notifications,
            config.notification_ttl,
            liveness.clone(),
        );

        let actor = ConnectionLifecycleManager::new(
            config,
            deps,
            receiver,
            liveness.clone(),
            stopped.clone(),
            snapshot_tx,
            events.clone(),
            notifications.clone(),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            liveness,
            stopped,
            snapshot,
            events,
            notifications,
        }
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, SessionError> {
        if self.liveness.is_cancelled() {
            return Err(SessionError::Disposed);
        }
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Disposed)?;
        rx.await.map_err(|_| SessionError::Disposed)
    }

    /// Start joining `channel`. Only valid while `Idle`.
    pub async fn request_join(
        &self,
        identity: JoinIdentity,
        channel: ChannelId,
    ) -> Result<(), SessionError> {
        self.call(|respond_to| ControllerMessage::RequestJoin {
            identity,
            channel,
            respond_to,
        })
        .await?
    }

    /// Leave the session, tearing everything down.
    ///
    /// Returns after teardown has finished. Calls made while a leave is in
    /// progress, or while `Idle`, are ignored.
    pub async fn request_leave(&self) -> Result<LeaveOutcome, SessionError> {
        self.call(|respond_to| ControllerMessage::RequestLeave { respond_to })
            .await
    }

    /// Retry from `Failed` with a fresh retry budget.
    pub async fn retry_now(&self) -> Result<(), SessionError> {
        self.call(|respond_to| ControllerMessage::RetryNow { respond_to })
            .await?
    }

    /// Turn a capture resource on or off.
    pub async fn set_desired(&self, kind: CaptureKind, enabled: bool) -> Result<(), SessionError> {
        self.call(|respond_to| ControllerMessage::SetDesired {
            kind,
            enabled,
            respond_to,
        })
        .await?
    }

    /// Resources currently published to the transport.
    pub async fn published_resources(&self) -> Result<Vec<CaptureKind>, SessionError> {
        self.call(|respond_to| ControllerMessage::GetPublished { respond_to })
            .await
    }

    pub async fn open_popup(
        &self,
        participant_id: ParticipantId,
        kind: PopupKind,
    ) -> Result<PopupWindow, SessionError> {
        self.call(|respond_to| ControllerMessage::OpenPopup {
            participant_id,
            kind,
            respond_to,
        })
        .await
    }

    pub async fn close_popup(&self, id: PopupId) -> Result<bool, SessionError> {
        self.call(|respond_to| ControllerMessage::ClosePopup { id, respond_to })
            .await
    }

    pub async fn reposition_popup(
        &self,
        id: PopupId,
        point: Point,
    ) -> Result<Option<Point>, SessionError> {
        self.call(|respond_to| ControllerMessage::RepositionPopup {
            id,
            point,
            respond_to,
        })
        .await
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> Result<(), SessionError> {
        self.call(|respond_to| ControllerMessage::SetViewport {
            viewport,
            respond_to,
        })
        .await
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch session snapshots.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to discrete session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The notification queue shared with the controller.
    #[must_use]
    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    /// Dispose the controller and wait for its final teardown.
    pub async fn dispose(&self) {
        self.liveness.cancel();
        self.stopped.cancelled().await;
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.liveness.is_cancelled()
    }
}

/// The controller actor.
pub struct ConnectionLifecycleManager {
    receiver: mpsc::Receiver<ControllerMessage>,
    liveness: CancellationToken,
    stopped: CancellationToken,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    notifications: NotificationQueue,

    credential_service: Arc<dyn CredentialService>,
    transport: Arc<dyn Transport>,
    transport_events: broadcast::Receiver<TransportEvent>,
    transport_events_open: bool,

    session: Session,
    publisher: ResourcePublisher,
    popups: PopupWindowManager,
    teardown: Arc<TeardownCoordinator>,

    retry_policy: RetryPolicy,
    credential_timeout: Duration,
    generation: u64,
    retry_timer: Option<CancellationToken>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl ConnectionLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    fn new(
        config: &Config,
        deps: LifecycleDependencies,
        receiver: mpsc::Receiver<ControllerMessage>,
        liveness: CancellationToken,
        stopped: CancellationToken,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        events: broadcast::Sender<SessionEvent>,
        notifications: NotificationQueue,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let transport_events = deps.transport.subscribe();
        let publisher = ResourcePublisher::new(
            Arc::clone(&deps.transport),
            deps.devices,
            notifications.clone(),
            liveness.clone(),
        );

        Self {
            receiver,
            liveness,
            stopped,
            snapshot_tx,
            events,
            notifications,
            credential_service: deps.credentials,
            transport: deps.transport,
            transport_events,
            transport_events_open: true,
            session: Session::new(),
            publisher,
            popups: PopupWindowManager::new(config.viewport, config.popup_size, config.popup_margin),
            teardown: Arc::new(TeardownCoordinator::new()),
            retry_policy: RetryPolicy::from_config(config),
            credential_timeout: config.credential_timeout,
            generation: 0,
            retry_timer: None,
            completions_tx,
            completions_rx,
        }
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "classroom.lifecycle.controller")]
    async fn run(mut self) {
        info!(target: "classroom.lifecycle.controller", "Lifecycle controller started");

        loop {
            tokio::select! {
                biased;

                () = self.liveness.cancelled() => {
                    info!(
                        target: "classroom.lifecycle.controller",
                        "Lifecycle controller disposed"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "classroom.lifecycle.controller",
                                "All handles dropped, disposing"
                            );
                            self.liveness.cancel();
                            break;
                        }
                    }
                }

                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await;
                }

                Some(event) = self.publisher.next_device_event() => {
                    self.publisher.handle_device_event(event).await;
                }

                event = self.transport_events.recv(), if self.transport_events_open => {
                    match event {
                        Ok(event) => self.handle_transport_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                target: "classroom.lifecycle.controller",
                                skipped,
                                "Transport event stream lagged"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(
                                target: "classroom.lifecycle.controller",
                                "Transport event stream closed"
                            );
                            self.transport_events_open = false;
                        }
                    }
                }
            }

            self.publish_snapshot();
        }

        self.shutdown().await;
        self.stopped.cancel();

        info!(target: "classroom.lifecycle.controller", "Lifecycle controller stopped");
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::RequestJoin {
                identity,
                channel,
                respond_to,
            } => {
                let result = self.request_join(identity, channel);
                let _ = respond_to.send(result);
            }

            ControllerMessage::RequestLeave { respond_to } => {
                let outcome = self.request_leave().await;
                let _ = respond_to.send(outcome);
            }

            ControllerMessage::RetryNow { respond_to } => {
                let result = self.retry_now();
                let _ = respond_to.send(result);
            }

            ControllerMessage::SetDesired {
                kind,
                enabled,
                respond_to,
            } => {
                let result = self.set_desired(kind, enabled).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetPublished { respond_to } => {
                let _ = respond_to.send(self.publisher.current_published_set());
            }

            ControllerMessage::OpenPopup {
                participant_id,
                kind,
                respond_to,
            } => {
                let _ = respond_to.send(self.popups.open(participant_id, kind));
            }

            ControllerMessage::ClosePopup { id, respond_to } => {
                let _ = respond_to.send(self.popups.close(id));
            }

            ControllerMessage::RepositionPopup {
                id,
                point,
                respond_to,
            } => {
                let _ = respond_to.send(self.popups.reposition(id, point));
            }

            ControllerMessage::SetViewport {
                viewport,
                respond_to,
            } => {
                self.popups.set_viewport(viewport);
                let _ = respond_to.send(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    fn request_join(
        &mut self,
        identity: JoinIdentity,
        channel: ChannelId,
    ) -> Result<(), SessionError> {
        let state = self.session.state();
        if state != SessionState::Idle {
            info!(
                target: "classroom.lifecycle.controller",
                state = %state,
                "Join requested while not idle, ignoring"
            );
            return Err(SessionError::InvalidState {
                operation: "request_join",
                state,
            });
        }

        info!(
            target: "classroom.lifecycle.controller",
            channel_id = %channel,
            participant_id = %identity.participant_id,
            role = identity.role.as_str(),
            "Join requested"
        );

        self.session.set_target(JoinTarget { identity, channel });
        self.session.reset_retry();
        self.teardown = Arc::new(TeardownCoordinator::new());
        self.start_fetch();
        Ok(())
    }

    async fn request_leave(&mut self) -> LeaveOutcome {
        let state = self.session.state();
        if !state.is_leavable() {
            debug!(
                target: "classroom.lifecycle.controller",
                state = %state,
                "Leave ignored"
            );
            return LeaveOutcome::Ignored { state };
        }

        info!(target: "classroom.lifecycle.controller", state = %state, "Leaving session");

        self.cancel_retry_timer();
        self.bump_generation();
        self.transition(SessionState::Leaving);
        self.publish_snapshot();

        let report = self.run_teardown().await;

        self.session.clear_target();
        self.session.reset_retry();
        self.session.clear_error();
        self.transition(SessionState::Idle);
        self.emit(SessionEvent::NavigateAway);

        LeaveOutcome::Completed(report)
    }

    fn retry_now(&mut self) -> Result<(), SessionError> {
        let state = self.session.state();
        if state != SessionState::Failed || self.session.target().is_none() {
            return Err(SessionError::InvalidState {
                operation: "retry_now",
                state,
            });
        }

        info!(target: "classroom.lifecycle.controller", "Manual retry requested");

        self.session.reset_retry();
        self.teardown = Arc::new(TeardownCoordinator::new());
        self.start_fetch();
        Ok(())
    }

    async fn set_desired(&mut self, kind: CaptureKind, enabled: bool) -> Result<(), SessionError> {
        let state = self.session.state();
        // A failed session only accepts turning resources off.
        let rejected = match state {
            SessionState::Idle | SessionState::Leaving => true,
            SessionState::Failed => enabled,
            _ => false,
        };
        if rejected {
            return Err(SessionError::InvalidState {
                operation: "set_desired",
                state,
            });
        }

        self.publisher.set_desired(kind, enabled).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Credential fetch protocol
    // ------------------------------------------------------------------

    fn start_fetch(&mut self) {
        let Some(target) = self.session.target() else {
            warn!(
                target: "classroom.lifecycle.controller",
                "Credential fetch without a join target"
            );
            return;
        };
        let request = CredentialRequest::new(&target.identity, &target.channel);

        self.bump_generation();
        self.session.clear_error();
        self.transition(SessionState::FetchingCredentials);

        let generation = self.generation;
        let service = Arc::clone(&self.credential_service);
        let timeout = self.credential_timeout;
        let liveness = self.liveness.clone();
        let completions = self.completions_tx.clone();

        debug!(
            target: "classroom.lifecycle.controller",
            generation,
            retry_count = self.session.retry_count(),
            "Fetching credentials"
        );

        tokio::spawn(async move {
            let started_at = Instant::now();
            let result = fetch_with_timeout(service.as_ref(), &request, timeout).await;
            if liveness.is_cancelled() {
                return;
            }
            let _ = completions.send(Completion::CredentialsFetched {
                generation,
                result,
                elapsed: started_at.elapsed(),
            });
        });
    }

    fn on_credentials_fetched(
        &mut self,
        result: Result<Credentials, CredentialError>,
        elapsed: Duration,
    ) {
        match result {
            Ok(credentials) => {
                metrics::record_credential_fetch("success", elapsed);
                info!(
                    target: "classroom.lifecycle.controller",
                    channel_name = %credentials.channel_name,
                    local_participant_id = %credentials.local_participant_id,
                    "Credentials acquired, joining transport"
                );

                let previous = self.session.state();
                let credentials = self.session.begin_connecting(credentials);
                self.emit(SessionEvent::StateChanged {
                    from: previous,
                    to: SessionState::Connecting,
                });
                self.session.set_transport_engaged(true);

                let generation = self.generation;
                let transport = Arc::clone(&self.transport);
                let liveness = self.liveness.clone();
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = transport.join(&credentials).await;
                    if liveness.is_cancelled() {
                        return;
                    }
                    let _ = completions.send(Completion::TransportJoined { generation, result });
                });
            }
            Err(error) => {
                let outcome = match error.kind() {
                    CredentialErrorKind::Unauthorized => "unauthorized",
                    CredentialErrorKind::Transient => "transient",
                };
                metrics::record_credential_fetch(outcome, elapsed);

                let retry_count = self.session.retry_count();
                match self.retry_policy.decide(retry_count, &error) {
                    RetryDecision::Retry { delay } => {
                        let attempt = self.session.increment_retry();
                        warn!(
                            target: "classroom.lifecycle.controller",
                            error = %error,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Credential fetch failed, retrying"
                        );
                        metrics::record_retry_scheduled();
                        self.schedule_retry(delay);
                        self.emit(SessionEvent::RetryScheduled { attempt, delay });
                    }
                    RetryDecision::Fail => {
                        let reason = if error.is_retryable() {
                            "retries_exhausted"
                        } else {
                            "unauthorized"
                        };
                        warn!(
                            target: "classroom.lifecycle.controller",
                            error = %error,
                            reason,
                            retry_count,
                            "Credential fetch failed, giving up"
                        );
                        // Nothing was joined; release any pre-join preview.
                        self.publisher.close_all();
                        self.fail(reason, error.client_message());
                    }
                }
            }
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry_timer();

        let timer = self.liveness.child_token();
        let generation = self.generation;
        let completions = self.completions_tx.clone();
        let cancelled = timer.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if !cancelled.is_cancelled() {
                        let _ = completions.send(Completion::RetryTimerFired { generation });
                    }
                }
            }
        });

        self.retry_timer = Some(timer);
    }

    fn cancel_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            debug!(target: "classroom.lifecycle.controller", "Cancelling retry timer");
            timer.cancel();
        }
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::CredentialsFetched {
                generation,
                result,
                elapsed,
            } => {
                if generation != self.generation
                    || self.session.state() != SessionState::FetchingCredentials
                {
                    debug!(
                        target: "classroom.lifecycle.controller",
                        generation,
                        "Discarding stale credential result"
                    );
                    return;
                }
                self.on_credentials_fetched(result, elapsed);
            }

            Completion::RetryTimerFired { generation } => {
                if generation != self.generation
                    || self.session.state() != SessionState::FetchingCredentials
                {
                    return;
                }
                self.retry_timer = None;
                self.start_fetch();
            }

            Completion::TransportJoined { generation, result } => {
                if generation != self.generation {
                    if result.is_ok() && !self.session.transport_engaged() {
                        debug!(
                            target: "classroom.lifecycle.controller",
                            generation,
                            "Abandoned join completed, leaving"
                        );
                        let transport = Arc::clone(&self.transport);
                        tokio::spawn(async move {
                            if let Err(e) = transport.leave().await {
                                debug!(
                                    target: "classroom.lifecycle.controller",
                                    error = %e,
                                    "Leave after abandoned join failed"
                                );
                            }
                        });
                    }
                    return;
                }

                match result {
                    Ok(()) => self.on_transport_connected().await,
                    Err(e) => {
                        self.session.set_transport_engaged(false);
                        self.fail_with_transport(e).await;
                    }
                }
            }

            Completion::TokenRenewed { generation, result } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(credentials) => {
                        info!(target: "classroom.lifecycle.controller", "Access token renewed");
                        self.session.replace_credentials(credentials);
                    }
                    Err(e) => {
                        warn!(
                            target: "classroom.lifecycle.controller",
                            error = %e,
                            "Token renewal failed"
                        );
                        self.notifications
                            .push("Could not refresh the class connection", Severity::Error);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport monitoring
    // ------------------------------------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let state = self.session.state();
        debug!(
            target: "classroom.lifecycle.controller",
            state = %state,
            event = ?event,
            "Transport event"
        );

        match event {
            TransportEvent::ConnectionStateChanged(TransportConnectionState::Connected) => {
                self.on_transport_connected().await;
            }

            TransportEvent::ConnectionStateChanged(TransportConnectionState::Connecting) => {}

            TransportEvent::ConnectionStateChanged(TransportConnectionState::Reconnecting) => {
                if state == SessionState::Connected {
                    warn!(
                        target: "classroom.lifecycle.controller",
                        "Transport connection interrupted, reconnecting"
                    );
                    self.transition(SessionState::Reconnecting);
                }
            }

            TransportEvent::ConnectionStateChanged(TransportConnectionState::Disconnected {
                reason,
            }) => {
                if state.holds_credentials() {
                    self.session.set_transport_engaged(false);
                    self.fail_with_transport(TransportError::Disconnected(reason))
                        .await;
                }
            }

            TransportEvent::Error(message) => {
                if matches!(state, SessionState::Connected | SessionState::Reconnecting) {
                    self.fail_with_transport(TransportError::Runtime(message))
                        .await;
                } else {
                    warn!(
                        target: "classroom.lifecycle.controller",
                        state = %state,
                        error = %message,
                        "Transport error outside an established connection"
                    );
                }
            }

            TransportEvent::ParticipantJoined(participant_id) => {
                if state.holds_credentials() {
                    self.emit(SessionEvent::ParticipantJoined(participant_id));
                }
            }

            TransportEvent::ParticipantLeft(participant_id) => {
                self.popups.close_participant(&participant_id);
                if state.holds_credentials() {
                    self.emit(SessionEvent::ParticipantLeft(participant_id));
                }
            }

            TransportEvent::TokenWillExpire => {
                if matches!(state, SessionState::Connected | SessionState::Reconnecting) {
                    self.start_token_renewal();
                }
            }
        }
    }

    async fn on_transport_connected(&mut self) {
        let state = self.session.state();
        if !matches!(state, SessionState::Connecting | SessionState::Reconnecting) {
            return;
        }

        info!(target: "classroom.lifecycle.controller", from = %state, "Connected");

        self.session.reset_retry();
        self.transition(SessionState::Connected);
        self.emit(SessionEvent::Connected);
        self.publisher.set_joined(true).await;
    }

    fn start_token_renewal(&mut self) {
        let Some(target) = self.session.target() else {
            return;
        };
        let request = CredentialRequest::new(&target.identity, &target.channel);
        let generation = self.generation;
        let service = Arc::clone(&self.credential_service);
        let transport = Arc::clone(&self.transport);
        let timeout = self.credential_timeout;
        let liveness = self.liveness.clone();
        let completions = self.completions_tx.clone();

        debug!(target: "classroom.lifecycle.controller", "Renewing access token");

        tokio::spawn(async move {
            let result =
                renew_credentials(service.as_ref(), transport.as_ref(), &request, timeout).await;
            if liveness.is_cancelled() {
                return;
            }
            let _ = completions.send(Completion::TokenRenewed { generation, result });
        });
    }

    /// A transport failure ends the session: release everything, then `Failed`.
    async fn fail_with_transport(&mut self, error: TransportError) {
        warn!(
            target: "classroom.lifecycle.controller",
            error = %error,
            "Transport failure, tearing down session"
        );

        self.cancel_retry_timer();
        self.bump_generation();
        self.run_teardown().await;

        let error = SessionError::Transport(error);
        self.fail("transport", error.client_message());
    }

    fn fail(&mut self, reason: &'static str, message: String) {
        let previous = self.session.state();
        self.session.fail(message.clone());
        self.cancel_retry_timer();
        metrics::record_session_failure(reason);
        if previous != SessionState::Failed {
            self.emit(SessionEvent::StateChanged {
                from: previous,
                to: SessionState::Failed,
            });
        }
        self.notifications.push(message.clone(), Severity::Error);
        self.emit(SessionEvent::Failed { message });
    }

    // ------------------------------------------------------------------
    // Teardown and disposal
    // ------------------------------------------------------------------

    async fn run_teardown(&mut self) -> TeardownReport {
        let coordinator = Arc::clone(&self.teardown);
        let mut target = SessionTeardown {
            session: &mut self.session,
            publisher: &mut self.publisher,
            popups: &mut self.popups,
            transport: self.transport.as_ref(),
        };
        coordinator.run(&mut target).await
    }

    async fn shutdown(&mut self) {
        self.cancel_retry_timer();
        self.bump_generation();

        if self.session.state().is_leavable() {
            info!(
                target: "classroom.lifecycle.controller",
                state = %self.session.state(),
                "Tearing down active session on dispose"
            );
            self.run_teardown().await;
        }
        self.publisher.close_all();

        self.session.clear_target();
        self.transition(SessionState::Idle);
        self.publish_snapshot();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.session.set_state(to);
        if from != to {
            debug!(
                target: "classroom.lifecycle.controller",
                from = %from,
                to = %to,
                "State transition"
            );
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_snapshot(&self) {
        let credentials = self.session.published_credentials();
        let snapshot = SessionSnapshot {
            state: self.session.state(),
            retry_count: self.session.retry_count(),
            last_error: self.session.last_error().map(str::to_string),
            channel_name: credentials.map(|c| c.channel_name.clone()),
            local_participant_id: credentials.map(|c| c.local_participant_id.clone()),
            desired: self.publisher.desired_set(),
            published: self.publisher.current_published_set(),
            popups: self.popups.windows().to_vec(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn fetch_with_timeout(
    service: &dyn CredentialService,
    request: &CredentialRequest,
    timeout: Duration,
) -> Result<Credentials, CredentialError> {
    match tokio::time::timeout(timeout, service.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(CredentialError::Timeout(timeout)),
    }
}

async fn renew_credentials(
    service: &dyn CredentialService,
    transport: &dyn Transport,
    request: &CredentialRequest,
    timeout: Duration,
) -> Result<Credentials, SessionError> {
    let credentials = fetch_with_timeout(service, request, timeout).await?;
    if let Some(token) = credentials.access_token.as_ref() {
        transport.renew_token(token).await?;
    }
    Ok(credentials)
}

/// Borrowed view of the controller state a teardown operates on.
struct SessionTeardown<'a> {
    session: &'a mut Session,
    publisher: &'a mut ResourcePublisher,
    popups: &'a mut PopupWindowManager,
    transport: &'a dyn Transport,
}

#[async_trait]
impl<'a> TeardownTarget for SessionTeardown<'a> {
    async fn run_step(&mut self, step: TeardownStep) -> Result<(), SessionError> {
        match step {
            TeardownStep::ReleaseScreen => self.publisher.release(CaptureKind::Screen).await,
            TeardownStep::UnpublishAll => self.publisher.unpublish_all().await,
            TeardownStep::ReleaseCamera => self.publisher.release(CaptureKind::Camera).await,
            TeardownStep::ReleaseMicrophone => {
                self.publisher.release(CaptureKind::Microphone).await
            }
            TeardownStep::LeaveTransport => {
                if !self.session.transport_engaged() {
                    return Ok(());
                }
                self.session.set_transport_engaged(false);
                self.transport.leave().await.map_err(SessionError::from)
            }
            TeardownStep::ClearCredentials => {
                self.session.clear_credentials();
                Ok(())
            }
            TeardownStep::ResetUi => {
                self.popups.clear();
                Ok(())
            }
        }
    }
}
