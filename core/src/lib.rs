//! Open Service Broker API client and operation lifecycle driver.
//!
//! # Overview
//! Provisions and deprovisions service instances and creates and removes
//! bindings against an external service broker, whether the broker answers
//! synchronously (200/201) or asynchronously (202 plus an operation token).
//!
//! # Design
//! - `WireCodec` splits every operation into `build_*` (produces an
//!   `HttpRequest`) and `parse_*` (consumes an `HttpResponse`), so the I/O
//!   boundary is explicit and the codec is deterministic.
//! - `classify` turns a response into complete / accepted / typed failure.
//!   410 and 409 get their own error variants.
//! - `BrokerClient` executes one round trip per call through a `Transport`
//!   and holds no mutable state, so it can be shared across threads.
//! - `LifecycleDriver` advances an operation one step per invocation; the
//!   caller persists the `TrackedOperation` between ticks.
//! - Nothing here retries: errors carry enough structure (kind, status,
//!   body) for the caller to decide.

pub mod broker;
pub mod cancel;
pub mod classify;
pub mod client;
pub mod codec;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod transport;
pub mod types;

pub use broker::{Broker, LifecycleConfig, MissingTokenPolicy, TransportConfig, DEFAULT_API_VERSION};
pub use cancel::CancellationToken;
pub use classify::{classify, Classification, Operation};
pub use client::BrokerClient;
pub use codec::WireCodec;
pub use error::{BrokerError, BrokerResult, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use lifecycle::{Failure, LifecycleDriver, LifecycleState, OperationKind, Progress, TrackedOperation};
pub use transport::{Transport, UreqTransport};
pub use types::{
    AsyncResult, BindRequest, BindResource, BindResult, Binding, BindingLastOperationRequest, Catalog,
    Credentials, DeprovisionRequest, DeprovisionResult, GetBindingRequest, InstanceDetails,
    InstanceLastOperationRequest, JsonObject, LastOperation, LastOperationState, Plan, ProvisionRequest,
    ProvisionResult, Provisioned, Service, UnbindRequest, UnbindResult,
};
