//! Request / Processor / Completion Context / Waiter framework. This is the universal unit of asynchronous work in
//! the SDK: every long-running operation (a socket read, a timer, a UCS
//! round trip) is built on a [`Request`] moving between a
//! [`RequestContainer`] that runs it and one that delivers its result.

mod state;
mod request;
mod container;
mod waiter;
mod operation_waiter;

pub use container::{ContainerKind, RequestContainer};
pub use operation_waiter::OperationWaiter;
pub use request::Request;
pub use state::RequestState;
pub use waiter::RequestWaiter;
