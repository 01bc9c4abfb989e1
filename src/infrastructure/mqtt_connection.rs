// MQTT connection manager - session lifecycle, subscription and reconnects
use crate::domain::connectivity::{ConnectionEvent, ConnectivityState};
use crate::infrastructure::config::BrokerSettings;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_PERIOD: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;
const EVENT_BUFFER: usize = 256;

/// Handle to a running MQTT session.
///
/// Lifecycle events are read with [`ConnectionManager::next_event`]. The
/// session reconnects on its own after failures; [`ConnectionManager::disconnect`]
/// (or dropping the handle) stops it, after which no further events are seen.
pub struct ConnectionManager {
    events: mpsc::Receiver<ConnectionEvent>,
    state: watch::Receiver<ConnectivityState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn connect(settings: &BrokerSettings) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state) = watch::channel(ConnectivityState::Disconnected);
        let cancel = CancellationToken::new();

        let session = Session {
            url: settings.url.clone(),
            client_id: settings.client_id.clone(),
            credentials: settings
                .username
                .clone()
                .map(|user| (user, settings.password.clone().unwrap_or_default())),
            topic: settings.topic_pattern(),
            events: events_tx,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(session.run());

        Self {
            events,
            state,
            cancel,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Next lifecycle event, or `None` once disconnected.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Force-close the session. Safe to call more than once.
    pub fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            self.events.close();
            tracing::info!("MQTT session closed");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct Session {
    url: String,
    client_id: String,
    credentials: Option<(String, String)>,
    topic: String,
    events: mpsc::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectivityState>,
    cancel: CancellationToken,
}

impl Session {
    fn options(&self) -> Result<MqttOptions, String> {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}client_id={}",
            self.url,
            separator,
            urlencoding::encode(&self.client_id)
        );
        let mut options = MqttOptions::parse_url(url)
            .map_err(|e| format!("invalid broker url {}: {}", self.url, e))?;
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        Ok(options)
    }

    async fn run(self) {
        let options = match self.options() {
            Ok(options) => options,
            Err(reason) => {
                tracing::error!("{}", reason);
                self.emit(ConnectionEvent::Error(reason)).await;
                self.emit(ConnectionEvent::Disconnected).await;
                return;
            }
        };

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let mut connected = false;
        tracing::info!("Connecting to MQTT broker at {}", self.url);
        if !self.emit(ConnectionEvent::Connecting).await {
            return;
        }

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = poll_once(&mut eventloop, connected) => outcome,
            };

            let keep_going = match outcome {
                // refused ConnAcks surface as errors from poll
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected = true;
                    tracing::info!("MQTT connected");
                    self.emit(ConnectionEvent::Connected).await && self.subscribe(&client).await
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let mut ok = true;
                    for code in ack.return_codes {
                        ok &= self.check_grant(code).await;
                    }
                    ok
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.emit(ConnectionEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    })
                    .await
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    connected = false;
                    tracing::warn!("MQTT disconnected by broker");
                    self.emit(ConnectionEvent::Disconnected).await
                }
                Ok(_) => true,
                Err(reason) => {
                    connected = false;
                    tracing::warn!("MQTT error: {}; retrying in {:?}", reason, RECONNECT_PERIOD);
                    if !(self.emit(ConnectionEvent::Error(reason)).await
                        && self.emit(ConnectionEvent::Reconnecting).await)
                    {
                        break;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_PERIOD) => true,
                    }
                }
            };

            if !keep_going {
                break;
            }
        }
    }

    async fn subscribe(&self, client: &AsyncClient) -> bool {
        match client.try_subscribe(self.topic.clone(), SUBSCRIBE_QOS) {
            Ok(()) => {
                tracing::info!("Subscribing to {}", self.topic);
                true
            }
            Err(e) => {
                self.emit(ConnectionEvent::Error(format!(
                    "subscribe to {} failed: {}",
                    self.topic, e
                )))
                .await
            }
        }
    }

    async fn check_grant(&self, code: SubscribeReasonCode) -> bool {
        match code {
            SubscribeReasonCode::Success(granted) if (granted as u8) < (SUBSCRIBE_QOS as u8) => {
                self.emit(ConnectionEvent::Error(format!(
                    "subscription to {} downgraded to {:?}",
                    self.topic, granted
                )))
                .await
            }
            SubscribeReasonCode::Success(granted) => {
                tracing::info!("Subscribed to {} at {:?}", self.topic, granted);
                true
            }
            SubscribeReasonCode::Failure => {
                self.emit(ConnectionEvent::Error(format!(
                    "subscription to {} denied by broker",
                    self.topic
                )))
                .await
            }
        }
    }

    /// Record the transition and forward the event. False once the session is over.
    async fn emit(&self, event: ConnectionEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if let Some(state) = event.state() {
            self.state.send_replace(state);
        }
        self.events.send(event).await.is_ok()
    }
}

async fn poll_once(eventloop: &mut EventLoop, connected: bool) -> Result<Event, String> {
    bounded_poll(eventloop.poll(), connected).await
}

/// Until the broker acknowledges the session, each poll is capped at [`CONNECT_TIMEOUT`].
async fn bounded_poll<F, E>(poll: F, connected: bool) -> Result<Event, String>
where
    F: Future<Output = Result<Event, E>>,
    E: Display,
{
    if connected {
        return poll.await.map_err(|e| e.to_string());
    }
    match tokio::time::timeout(CONNECT_TIMEOUT, poll).await {
        Ok(polled) => polled.map_err(|e| e.to_string()),
        Err(_) => Err(format!("connect timed out after {:?}", CONNECT_TIMEOUT)),
    }
}
