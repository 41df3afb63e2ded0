//! TLS client configuration
//!
//! Both ports present our self-signed client certificate and accept the TV's
//! self-signed certificate without chain validation. Trust comes from the
//! pairing secret exchange and, later, from possession of the pinned pair.

use crate::certificate::ClientIdentity;
use crate::Result;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use std::sync::Arc;
use tracing::debug;

/// Build a connector presenting `identity` as the client certificate
pub fn create_client_config(identity: &ClientIdentity) -> Result<Arc<SslConnector>> {
    debug!("Creating TLS client config");

    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_3))?;

    // Self-signed peer, no CA chain
    builder.set_verify(SslVerifyMode::NONE);

    builder.set_certificate(&identity.certificate)?;
    builder.set_private_key(&identity.private_key)?;
    builder.check_private_key()?;

    Ok(Arc::new(builder.build()))
}
