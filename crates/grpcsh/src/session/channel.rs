use super::config::SessionConfig;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

/// Establishes the session channel. Every gRPC method of the session is
/// multiplexed over this one connection.
pub async fn connect(config: &SessionConfig) -> anyhow::Result<Channel> {
    let scheme = if config.tls.is_some() { "https" } else { "http" };
    let mut endpoint = Endpoint::from_shared(format!("{scheme}://{}", config.target))?
        .connect_timeout(config.connect_timeout);

    if let Some(tls) = &config.tls {
        let mut tls_config = match &tls.root_cert {
            Some(path) => {
                let pem = tokio::fs::read(path).await?;
                ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem))
            }
            None => ClientTlsConfig::new().with_native_roots(),
        };
        if let Some((cert, key)) = &tls.identity {
            let cert_pem = tokio::fs::read(cert).await?;
            let key_pem = tokio::fs::read(key).await?;
            tls_config = tls_config.identity(Identity::from_pem(cert_pem, key_pem));
        }
        if let Some(domain) = &tls.domain {
            tls_config = tls_config.domain_name(domain);
        }
        endpoint = endpoint.tls_config(tls_config)?;
    }

    Ok(endpoint.connect().await?)
}
