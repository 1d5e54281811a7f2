//! HTTP side of the client
//!
//! - `client`: authenticated calls, login and logout
//! - `renewal`: single-flight credential renewal
//! - `envelope`: the `{ success, data, error, message }` response shape
//! - `transport`: the HTTP seam and its `reqwest` implementation

mod client;
mod envelope;
mod renewal;
mod transport;

pub use client::{ApiClient, RequestOptions};
pub use envelope::{Envelope, LoginData, RefreshData};
pub use renewal::{RenewalCoordinator, Renewer};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
