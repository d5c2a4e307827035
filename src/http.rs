//! HTTP request values, retry budgeting, and the reqwest-backed transport.

pub mod client;
pub mod request;
pub mod retry;
