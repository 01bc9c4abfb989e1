// Domain layer - Pure data types and formatting
pub mod connectivity;
pub mod history;
pub mod measurement;
pub mod snapshot;
pub mod time_format;
