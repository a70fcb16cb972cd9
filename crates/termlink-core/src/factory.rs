// Adapter construction per mode.
//
// The manager never names a concrete adapter; it asks a factory for the
// transport that serves a mode. Tests plug in fakes here.

use std::sync::Arc;

use termlink_api::{CredentialStore, LocalTransport, RemoteTransport, Transport, TransportConfig};
use url::Url;

use crate::error::CoreError;
use crate::model::ConnectionMode;

pub trait TransportFactory: Send + Sync {
    fn build(&self, mode: &ConnectionMode) -> Result<Arc<dyn Transport>, CoreError>;
}

/// Builds the real local and relay adapters.
pub struct DefaultTransportFactory {
    relay_url: Option<Url>,
    credentials: Arc<dyn CredentialStore>,
    transport: TransportConfig,
}

impl DefaultTransportFactory {
    pub fn new(
        relay_url: Option<Url>,
        credentials: Arc<dyn CredentialStore>,
        transport: TransportConfig,
    ) -> Self {
        Self {
            relay_url,
            credentials,
            transport,
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn build(&self, mode: &ConnectionMode) -> Result<Arc<dyn Transport>, CoreError> {
        match mode {
            ConnectionMode::Local { endpoint } => Ok(Arc::new(LocalTransport::new(
                endpoint.as_str(),
                Arc::clone(&self.credentials),
                &self.transport,
            )?)),
            ConnectionMode::Remote { terminal_id } => {
                let relay = self.relay_url.as_ref().ok_or_else(|| CoreError::Config {
                    message: "remote mode needs a relay URL".into(),
                })?;
                Ok(Arc::new(RemoteTransport::new(
                    relay,
                    *terminal_id,
                    Arc::clone(&self.credentials),
                    &self.transport,
                )?))
            }
        }
    }
}
