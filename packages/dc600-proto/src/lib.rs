//! Wire codec for the DC600 family of JT/T 808-2013 dashcams, extended
//! with T/JSATL12-2017 ADAS/DSM alarm TLVs and JT/T 1078-2016 attachment
//! file listing.
//!
//! This crate is pure and synchronous: it turns bytes into typed
//! messages and back, and knows nothing about sockets, sessions, or
//! timers. The `dc600-core` crate wraps this in the stateful parts.
#![forbid(unsafe_code)]

pub mod alarm;
pub mod bcd;
pub mod command;
pub mod error;
pub mod frame;
pub mod header;
pub mod location;
pub mod media;
pub mod message_id;

pub use alarm::AlarmSet;
pub use frame::{EscapeMode, FrameCodec, RawFrame};
pub use header::{MessageHeader, PackageNo};
pub use location::{decode_location, Position};
