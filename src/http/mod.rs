//! Request and response types exchanged between the engine, fetchers and
//! spider callbacks.

mod request;
mod response;

pub use request::{Body, Method, Proxy, Request};
pub use response::{Response, ResponseParts};
