//! Controller API connection core
//!
//! Opens one supervised connection to a controller that is reachable through
//! several candidate addresses:
//!
//! - [`EndpointSet`] and [`DialPolicy`] describe where to connect and how hard to try
//! - the dialer races TLS attempts across addresses with staggered starts
//! - [`Credential`] selects skip, password or delegated login
//! - [`LiveConnection`] runs a liveness loop and exposes a one-shot broken signal
//! - [`LiveConnection::facade`] hands out versioned [`FacadeHandle`]s
//!
//! ```no_run
//! # async fn demo() -> apiconn::Result<()> {
//! use apiconn::{Credential, DialPolicy, EndpointSet, open};
//!
//! let endpoints = EndpointSet::new(["10.0.0.1:17070", "10.0.0.2:17070"]);
//! let credential = Credential::password("user-admin".parse().unwrap(), "secret");
//! let conn = open(&endpoints, &credential, DialPolicy::default()).await?;
//!
//! let client = conn.facade("Client", 1)?;
//! let status: serde_json::Value = client.call("FullStatus", serde_json::json!({})).await?;
//! println!("{status}");
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clock;
pub mod connection;
pub mod connector;
pub mod credential;
mod dialer;
pub mod endpoint;
pub mod error;
pub mod facade;
mod liveness;
pub mod policy;
pub mod session;
pub mod signal;
pub mod state;
pub mod tag;
pub mod tls;
pub mod transport;
pub mod version;

pub use auth::{DischargeChallenge, LoginOutcome, authenticate};
pub use clock::{Clock, TokioClock};
pub use connection::LiveConnection;
pub use connector::{Connector, Discharger, open};
pub use credential::{Credential, DelegatedToken, LoginParts};
pub use endpoint::{EndpointSet, HostPort};
pub use error::{ConnError, DialFailure, DialFailures, ErrorKind, Result};
pub use facade::{FacadeHandle, FacadeVersions};
pub use policy::{DialPolicy, LivenessPolicy};
pub use session::{Access, SessionInfo};
pub use signal::{Signal, SignalWatch};
pub use state::ConnState;
pub use tag::{ControllerTag, ModelTag, Tag, TagKind};
pub use transport::{
    DialTarget, RpcError, RpcRequest, ServerError, Transport, TransportDialer, WebSocketDialer,
    WsTransport,
};
pub use version::Version;
