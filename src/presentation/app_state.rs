// Application state for HTTP handlers
use crate::application::dashboard_service::{DashboardCommand, DashboardView};
use tokio::sync::{mpsc, watch};

#[derive(Clone)]
pub struct AppState {
    pub view: watch::Receiver<DashboardView>,
    pub commands: mpsc::Sender<DashboardCommand>,
}
