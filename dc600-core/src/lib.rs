//! Stateful half of the DC600 protocol engine: session registry,
//! message dispatch, event/media correlation, and the sink traits the
//! embedding platform implements. Pure wire codec lives in `dc600-proto`;
//! this crate is where sockets, timers, and shared state live.

pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod session;
pub mod sinks;
