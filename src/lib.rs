//! Real-time hub for course study groups: authorized per-group rooms,
//! persist-before-broadcast chat, urgent notification fanout and typing
//! presence over WebSockets.

pub mod config;
pub mod error;
pub mod fanout;
pub mod hub;
pub mod ingest;
pub mod messages;
pub mod models;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod routes;
pub mod store;
pub mod tls;

pub use hub::Hub;
