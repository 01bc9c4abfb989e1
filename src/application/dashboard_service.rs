// Dashboard service - single dispatcher owning the live view and history state
use crate::application::history_repository::{HistoryError, HistoryRepository};
use crate::application::refresh_scheduler::{RefreshScheduler, RefreshTick};
use crate::application::snapshot_aggregator::LiveSnapshotAggregator;
use crate::domain::connectivity::{ConnectionEvent, ConnectivityState};
use crate::domain::history::{HistoricalPoint, Selection};
use crate::domain::measurement::MeasurementKind;
use crate::domain::snapshot::LiveSnapshot;
use crate::domain::time_format::{format_date_time, relative_age_text};
use crate::infrastructure::mqtt_connection::ConnectionManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// User-initiated changes routed into the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardCommand {
    SelectMeasurement(MeasurementKind),
    SetAutoRefresh(bool),
    RefreshNow,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HistoryView {
    pub selection: Option<Selection>,
    pub points: Vec<HistoricalPoint>,
    pub error: Option<String>,
    pub loading: bool,
    pub range_text: Option<String>,
}

/// Everything a renderer needs, published as one value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub connectivity: ConnectivityState,
    pub connection_error: Option<String>,
    pub snapshot: LiveSnapshot,
    pub last_updated_text: String,
    pub measurement: MeasurementKind,
    pub auto_refresh: bool,
    pub refresh_period_secs: u64,
    pub refresh_scheduled: bool,
    pub history: HistoryView,
}

#[derive(Debug)]
pub struct HistoryCompletion {
    request_id: u64,
    selection: Selection,
    result: Result<Vec<HistoricalPoint>, HistoryError>,
}

#[derive(Debug, Clone)]
struct IssuedRequest {
    id: u64,
    selection: Selection,
}

pub struct DashboardService {
    aggregator: LiveSnapshotAggregator,
    repository: Arc<dyn HistoryRepository>,
    scheduler: RefreshScheduler,
    state: DashboardView,
    view: watch::Sender<DashboardView>,
    completions_tx: mpsc::UnboundedSender<HistoryCompletion>,
    completions: mpsc::UnboundedReceiver<HistoryCompletion>,
    ticks: mpsc::UnboundedReceiver<RefreshTick>,
    age_refresh: Duration,
    next_request_id: u64,
    latest_request: Option<IssuedRequest>,
    /// First request issued for the current selection
    last_switch_id: u64,
    applied_request_id: u64,
}

impl DashboardService {
    pub fn new(
        aggregator: LiveSnapshotAggregator,
        repository: Arc<dyn HistoryRepository>,
        measurement: MeasurementKind,
        auto_refresh: bool,
        refresh_period: Duration,
        age_refresh: Duration,
    ) -> Self {
        let (ticks_tx, ticks) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let state = DashboardView {
            connectivity: ConnectivityState::Disconnected,
            connection_error: None,
            snapshot: aggregator.snapshot().clone(),
            last_updated_text: relative_age_text("", &Utc::now()),
            measurement,
            auto_refresh,
            refresh_period_secs: refresh_period.as_secs(),
            refresh_scheduled: false,
            history: HistoryView::default(),
        };
        let (view, _) = watch::channel(state.clone());

        Self {
            aggregator,
            repository,
            scheduler: RefreshScheduler::new(refresh_period, ticks_tx),
            state,
            view,
            completions_tx,
            completions,
            ticks,
            age_refresh,
            next_request_id: 0,
            latest_request: None,
            last_switch_id: 0,
            applied_request_id: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view.subscribe()
    }

    #[cfg(test)]
    pub fn view(&self) -> &DashboardView {
        &self.state
    }

    /// Dispatch loop. Returns on shutdown or when every command sender is gone;
    /// the transport, refresh timer and age ticker are released on every exit.
    pub async fn run(
        mut self,
        mut connection: ConnectionManager,
        mut commands: mpsc::Receiver<DashboardCommand>,
        shutdown: CancellationToken,
    ) {
        let mut age_ticker = tokio::time::interval(self.age_refresh);
        let mut transport_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = connection.next_event(), if transport_open => match event {
                    Some(event) => self.handle_connection_event(event),
                    None => transport_open = false,
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = self.completions.recv() => self.handle_completion(completion),
                Some(tick) = self.ticks.recv() => self.handle_tick(tick),
                _ = age_ticker.tick() => self.refresh_age_text(Utc::now()),
            }
        }

        tracing::info!(
            "Dashboard dispatcher stopping (transport {:?})",
            connection.state()
        );
        connection.disconnect();
        self.scheduler.teardown();
        drop(age_ticker);
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message { topic, payload } => {
                let Some(snapshot) = self.aggregator.apply_message(&payload, &topic) else {
                    return;
                };
                self.state.snapshot = snapshot;
                self.state.last_updated_text =
                    relative_age_text(&self.state.snapshot.last_updated_timestamp, &Utc::now());
                self.reselect();
            }
            other => {
                if let Some(state) = other.state() {
                    self.state.connectivity = state;
                }
                match other {
                    ConnectionEvent::Error(reason) => self.state.connection_error = Some(reason),
                    ConnectionEvent::Connected => self.state.connection_error = None,
                    _ => {}
                }
            }
        }
        self.publish();
    }

    pub fn handle_command(&mut self, command: DashboardCommand) {
        match command {
            DashboardCommand::SelectMeasurement(kind) => {
                self.state.measurement = kind;
                self.reselect();
            }
            DashboardCommand::SetAutoRefresh(enabled) => {
                self.state.auto_refresh = enabled;
                self.reselect();
            }
            DashboardCommand::RefreshNow => {
                if let Some(selection) = self.selection() {
                    self.issue_fetch(selection);
                }
            }
        }
        self.publish();
    }

    pub fn handle_tick(&mut self, tick: RefreshTick) {
        if !self.scheduler.accepts(tick) {
            return;
        }
        if let Some(selection) = self.selection() {
            self.issue_fetch(selection);
            self.publish();
        }
    }

    /// Apply a finished query unless a request for a different selection was
    /// issued after it, or a newer one for the same selection was applied.
    pub fn handle_completion(&mut self, completion: HistoryCompletion) {
        let Some(latest) = &self.latest_request else {
            return;
        };
        if latest.selection != completion.selection
            || completion.request_id < self.last_switch_id
            || completion.request_id < self.applied_request_id
        {
            tracing::debug!(
                "Discarding stale history response #{} for {}/{}",
                completion.request_id,
                completion.selection.sensor_id,
                completion.selection.measurement
            );
            return;
        }
        let still_loading = completion.request_id < latest.id;
        self.applied_request_id = completion.request_id;

        let history = &mut self.state.history;
        history.loading = still_loading;
        match completion.result {
            Ok(points) => {
                history.range_text = range_text(&points);
                history.points = points;
                history.error = None;
            }
            Err(e) => {
                tracing::warn!("History query failed: {}", e);
                history.points.clear();
                history.range_text = None;
                history.error = Some(e.to_string());
            }
        }
        self.publish();
    }

    pub fn refresh_age_text(&mut self, now: DateTime<Utc>) {
        let text = relative_age_text(&self.state.snapshot.last_updated_timestamp, &now);
        if text != self.state.last_updated_text {
            self.state.last_updated_text = text;
            self.publish();
        }
    }

    fn selection(&self) -> Option<Selection> {
        if self.state.snapshot.is_empty() {
            return None;
        }
        Some(Selection::new(
            self.state.snapshot.last_updated_sensor_id.clone(),
            self.state.measurement,
        ))
    }

    fn reselect(&mut self) {
        let selection = self.selection();
        let fetch_now = self.scheduler.update(selection.as_ref(), self.state.auto_refresh);
        self.state.refresh_scheduled = self.scheduler.is_scheduled();
        if let (true, Some(selection)) = (fetch_now, selection) {
            self.issue_fetch(selection);
        }
    }

    fn issue_fetch(&mut self, selection: Selection) {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let switched = self
            .latest_request
            .as_ref()
            .is_none_or(|latest| latest.selection != selection);
        if switched {
            self.last_switch_id = request_id;
        }
        self.latest_request = Some(IssuedRequest {
            id: request_id,
            selection: selection.clone(),
        });

        let history = &mut self.state.history;
        if history.selection.as_ref() != Some(&selection) {
            history.points.clear();
            history.range_text = None;
            history.error = None;
        }
        history.selection = Some(selection.clone());
        history.loading = true;

        tracing::debug!(
            "Issuing history request #{} for {}/{}",
            request_id,
            selection.sensor_id,
            selection.measurement
        );
        let repository = self.repository.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = repository
                .fetch(&selection.sensor_id, selection.measurement)
                .await;
            let _ = completions.send(HistoryCompletion {
                request_id,
                selection,
                result,
            });
        });
    }

    fn publish(&self) {
        self.view.send_replace(self.state.clone());
    }
}

fn range_text(points: &[HistoricalPoint]) -> Option<String> {
    let first = points.iter().map(|p| p.timestamp).min()?;
    let last = points.iter().map(|p| p.timestamp).max()?;
    Some(format!(
        "{} to {}",
        format_date_time(&first),
        format_date_time(&last)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::measurement::FieldMapping;
    use crate::domain::snapshot::FieldFilter;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    type Reply = Result<Vec<HistoricalPoint>, HistoryError>;

    #[derive(Default)]
    struct GatedRepository {
        pending: Mutex<Vec<(Selection, oneshot::Sender<Reply>)>>,
    }

    impl GatedRepository {
        async fn wait_for(&self, count: usize) {
            while self.pending.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        }

        fn calls(&self) -> Vec<Selection> {
            self.pending
                .lock()
                .unwrap()
                .iter()
                .map(|(s, _)| s.clone())
                .collect()
        }

        fn resolve(&self, index: usize, reply: Reply) {
            let (_, tx) = self.pending.lock().unwrap().remove(index);
            let _ = tx.send(reply);
        }
    }

    #[async_trait]
    impl HistoryRepository for GatedRepository {
        async fn fetch(&self, sensor_id: &str, kind: MeasurementKind) -> Reply {
            let (tx, rx) = oneshot::channel();
            self.pending
                .lock()
                .unwrap()
                .push((Selection::new(sensor_id, kind), tx));
            rx.await
                .unwrap_or_else(|_| Err(HistoryError::Transport("dropped".to_string())))
        }
    }

    fn service(repo: Arc<GatedRepository>) -> DashboardService {
        DashboardService::new(
            LiveSnapshotAggregator::new(FieldMapping::default(), FieldFilter::default()),
            repo,
            MeasurementKind::SoilMoisture,
            false,
            Duration::from_secs(60),
            Duration::from_secs(30),
        )
    }

    fn message(sensor: &str, timestamp: i64) -> ConnectionEvent {
        ConnectionEvent::Message {
            topic: format!("trees/sensors/{}/data", sensor),
            payload: Bytes::from(format!(
                r#"{{"fields":{{"soil_moisture":41.5}},"timestamp":{}}}"#,
                timestamp
            )),
        }
    }

    fn points(sensor: &str, value: f64) -> Vec<HistoricalPoint> {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        vec![HistoricalPoint::new(
            t,
            "2024-01-01T00:00:00Z".to_string(),
            sensor.to_string(),
            MeasurementKind::SoilMoisture,
            value,
        )]
    }

    async fn pump_completion(service: &mut DashboardService) {
        let completion = service.completions.recv().await.unwrap();
        service.handle_completion(completion);
    }

    #[tokio::test]
    async fn test_stale_response_for_previous_sensor_is_discarded() {
        let repo = Arc::new(GatedRepository::default());
        let mut service = service(repo.clone());

        service.handle_connection_event(message("oak-7", 1_704_067_200));
        service.handle_connection_event(message("birch-2", 1_704_067_260));
        repo.wait_for(2).await;
        assert_eq!(
            repo.calls(),
            vec![
                Selection::new("oak-7", MeasurementKind::SoilMoisture),
                Selection::new("birch-2", MeasurementKind::SoilMoisture),
            ]
        );

        repo.resolve(1, Ok(points("birch-2", 2.0)));
        pump_completion(&mut service).await;
        repo.resolve(0, Ok(points("oak-7", 1.0)));
        pump_completion(&mut service).await;

        let history = &service.view().history;
        assert_eq!(history.points.len(), 1);
        assert_eq!(history.points[0].sensor_id, "birch-2");
        assert!(!history.loading);
        assert_eq!(
            history.range_text.as_deref(),
            Some("2024-01-01 00:00:00 to 2024-01-01 00:00:00")
        );
    }

    #[tokio::test]
    async fn test_response_superseded_by_switch_back_is_discarded() {
        let repo = Arc::new(GatedRepository::default());
        let mut service = service(repo.clone());

        service.handle_connection_event(message("oak-7", 1_704_067_200));
        service.handle_connection_event(message("birch-2", 1_704_067_260));
        service.handle_connection_event(message("oak-7", 1_704_067_320));
        repo.wait_for(3).await;

        // oak #1 was overtaken by birch #2 even though oak is selected again
        repo.resolve(0, Ok(points("oak-7", 111.0)));
        pump_completion(&mut service).await;
        assert!(service.view().history.points.is_empty());
        assert!(service.view().history.loading);

        repo.resolve(1, Ok(points("oak-7", 333.0)));
        pump_completion(&mut service).await;
        repo.resolve(0, Ok(points("birch-2", 222.0)));
        pump_completion(&mut service).await;

        let history = &service.view().history;
        let values: Vec<f64> = history.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![333.0]);
        assert_eq!(
            history.selection,
            Some(Selection::new("oak-7", MeasurementKind::SoilMoisture))
        );
        assert!(!history.loading);
    }

    #[tokio::test]
    async fn test_same_sensor_messages_do_not_refetch() {
        let repo = Arc::new(GatedRepository::default());
        let mut service = service(repo.clone());

        service.handle_connection_event(message("oak-7", 1_704_067_200));
        service.handle_connection_event(message("oak-7", 1_704_067_260));
        repo.wait_for(1).await;
        tokio::task::yield_now().await;
        assert_eq!(repo.calls().len(), 1);
        assert!(service.view().history.loading);
    }

    #[tokio::test]
    async fn test_measurement_switch_refetches_and_errors_clear_history() {
        let repo = Arc::new(GatedRepository::default());
        let mut service = service(repo.clone());
        let mut views = service.subscribe();

        service.handle_connection_event(message("oak-7", 1_704_067_200));
        repo.wait_for(1).await;
        repo.resolve(0, Ok(points("oak-7", 1.0)));
        pump_completion(&mut service).await;
        assert_eq!(service.view().history.points.len(), 1);

        service.handle_command(DashboardCommand::SelectMeasurement(MeasurementKind::Battery));
        repo.wait_for(1).await;
        assert_eq!(
            repo.calls(),
            vec![Selection::new("oak-7", MeasurementKind::Battery)]
        );
        assert!(service.view().history.points.is_empty());

        repo.resolve(
            0,
            Err(HistoryError::Query {
                status: 500,
                body: "boom".to_string(),
            }),
        );
        pump_completion(&mut service).await;

        let view = views.borrow_and_update().clone();
        assert_eq!(view.measurement, MeasurementKind::Battery);
        assert!(!view.refresh_scheduled);
        assert!(view.history.points.is_empty());
        assert_eq!(
            view.history.error.as_deref(),
            Some("InfluxDB query failed with status 500: boom")
        );
    }

    #[tokio::test]
    async fn test_connectivity_and_invalid_messages() {
        let repo = Arc::new(GatedRepository::default());
        let mut service = service(repo.clone());

        service.handle_connection_event(ConnectionEvent::Connecting);
        service.handle_connection_event(ConnectionEvent::Error("refused".to_string()));
        assert_eq!(service.view().connectivity, ConnectivityState::Error);
        assert_eq!(service.view().connection_error.as_deref(), Some("refused"));

        service.handle_connection_event(ConnectionEvent::Connected);
        assert_eq!(service.view().connectivity, ConnectivityState::Connected);
        assert_eq!(service.view().connection_error, None);

        service.handle_connection_event(ConnectionEvent::Message {
            topic: "trees/sensors/oak-7/data".to_string(),
            payload: Bytes::from_static(b"{\"fields\":{}}"),
        });
        assert!(service.view().snapshot.is_empty());
        assert_eq!(service.view().last_updated_text, "never");
        assert!(repo.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_ticks_issue_fetches() {
        let repo = Arc::new(GatedRepository::default());
        let mut service = service(repo.clone());

        service.handle_connection_event(message("oak-7", 1_704_067_200));
        service.handle_command(DashboardCommand::SetAutoRefresh(true));
        // enabling refreshes right away
        repo.wait_for(2).await;
        assert!(service.view().refresh_scheduled);

        let tick = service.ticks.recv().await.unwrap();
        service.handle_tick(tick);
        repo.wait_for(3).await;

        service.handle_command(DashboardCommand::SetAutoRefresh(false));
        service.handle_tick(tick);
        tokio::task::yield_now().await;
        assert_eq!(repo.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_age_text_follows_clock() {
        let repo = Arc::new(GatedRepository::default());
        let mut service = service(repo);
        service.handle_connection_event(message("oak-7", 1_704_067_200));

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap();
        service.refresh_age_text(now);
        assert_eq!(service.view().last_updated_text, "1 minute ago");
    }
}
