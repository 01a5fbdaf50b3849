//! Async client for the Empire data-integration API.
//!
//! # Overview
//! The client authenticates lazily, issues calls against services and tables,
//! runs ad-hoc SQL queries, and manages server-side materialized views.
//!
//! ```ignore
//! let client = EmpireClient::new("APP_KEY", ClientConfig::default().enduser("alice"));
//! client
//!     .query("SELECT * FROM salesforce.account LIMIT 5")
//!     .for_each(|row| println!("{row}"))
//!     .success(|_| println!("done"))
//!     .await?;
//! ```
//!
//! # Design
//! - Every operation returns a `Request`: handlers are chained onto it and
//!   the call is dispatched when the request is awaited or spawned.
//! - The first dispatched request creates a session; the credential lives in
//!   the `ClientContext` shared by all requests of a client.
//! - The network sits behind the `Transport` trait; `UreqTransport` is the
//!   default, tests plug in their own.
//! - Failures are normalized into `RequestError`. Without an error handler,
//!   dispatch returns the error to the caller.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod poller;
pub mod request;
pub mod rows;
pub mod secrets;
pub mod session;
pub mod transport;

pub use client::EmpireClient;
pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{EmpireError, ErrorKind, RequestError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use poller::{PollOptions, PollOutcome, ViewPoller};
pub use request::{CustomEvent, Payload, Request, RequestOptions};
pub use secrets::ServiceSecrets;
pub use transport::{Transport, UreqTransport};
