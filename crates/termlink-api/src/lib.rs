// termlink-api: wire-level transports for occupancy terminals (local link + relay link)

pub mod auth;
pub mod channel;
pub mod error;
pub mod http;
pub mod local;
pub mod remote;
pub mod transport;

pub use auth::{CredentialStore, JwtCredentials, StaticToken};
pub use channel::{Channel, ChannelEvent, ChannelPeer, ChannelSender, CloseReason};
pub use error::Error;
pub use http::OneShotClient;
pub use local::LocalTransport;
pub use remote::{RemoteTransport, TerminalId};
pub use transport::{
    CommandStyle, Conventions, Method, ModeKind, OneShotPath, ReadRoute, TlsMode, Transport,
    TransportConfig,
};
