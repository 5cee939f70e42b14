//! Falcon Parse job service: job lifecycle, progress fan-out, exports and the
//! HTTP/WebSocket surface.

pub mod api;
pub mod hub;
pub mod jobs;
pub mod live;
pub mod processor;
pub mod router;
pub mod startup;
pub mod state;
