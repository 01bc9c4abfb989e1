// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod csv_parser;
pub mod influx_repository;
pub mod mqtt_connection;
