// Application layer - Use cases and the dashboard dispatcher
pub mod dashboard_service;
pub mod history_repository;
pub mod refresh_scheduler;
pub mod snapshot_aggregator;
