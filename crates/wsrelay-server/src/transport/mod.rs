//! Transport listeners.

pub mod websocket;

pub use websocket::{start_listener, WebSocketConnection};
