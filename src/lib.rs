//! Vehicle Specific Module (VSM) SDK core.
//!
//! This crate implements the concurrency and I/O substrate a VSM binary
//! links against: a Request/Completion execution framework, a
//! single-threaded reactor for non-blocking sockets and files, a transport
//! detector that discovers vehicle links, a MAVLink frame decoder, a UCS
//! (Universal Ground Control Station) protobuf multiplexer, and SSDP-style
//! service discovery. See `DESIGN.md` for the module-by-module breakdown.

pub mod error;
pub mod callback;
pub mod request;
pub mod worker;
pub mod timer;
pub mod io;
pub mod mavlink;
pub mod adsb;
pub mod detector;
pub mod discovery;
pub mod ucs;
pub mod properties;
pub mod shared_data;
pub mod runtime;

pub use error::VsmError;
pub use runtime::Runtime;
