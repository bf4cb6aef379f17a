pub mod config;
pub mod location_feed;
pub mod routes;
pub mod server_state;
pub mod ticker;
