use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use grpcsh_core::Metadata;
use std::path::PathBuf;
use tonic::codec::CompressionEncoding;

/// Session settings for the `grpcsh` binary.
///
/// Everything is parsed from CLI arguments or environment variables once at
/// startup; the interactive shell never renegotiates the connection.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "grpcsh",
    version,
    about = "An interactive gRPC shell for network device telemetry and route programming"
)]
pub struct CliArgs {
    /// Target address, IPv4 or IPv6 (without brackets).
    ///
    /// Environment variable: `GRPCSH_ADDRESS`
    #[arg(long, env = "GRPCSH_ADDRESS")]
    pub address: String,

    /// Target gRPC port.
    ///
    /// Environment variable: `GRPCSH_PORT`
    #[arg(long, env = "GRPCSH_PORT", default_value_t = 57400)]
    pub port: u16,

    /// Username attached as metadata to every RPC.
    ///
    /// Environment variable: `GRPCSH_USERNAME`
    #[arg(long, env = "GRPCSH_USERNAME")]
    pub username: Option<String>,

    /// Password attached as metadata to every RPC.
    ///
    /// Environment variable: `GRPCSH_PASSWORD`
    #[arg(long, env = "GRPCSH_PASSWORD")]
    pub password: Option<String>,

    /// Use TLS for the session. Without `--root-cert` the platform trust
    /// store is used.
    #[arg(long, default_value_t = false)]
    pub secure: bool,

    /// PEM file with the CA certificate to verify the target against.
    #[arg(long, env = "GRPCSH_ROOT_CERT")]
    pub root_cert: Option<PathBuf>,

    /// PEM file with the client certificate for mutual TLS. Requires `--key`.
    #[arg(long, env = "GRPCSH_CERT")]
    pub cert: Option<PathBuf>,

    /// PEM file with the client private key for mutual TLS. Requires `--cert`.
    #[arg(long, env = "GRPCSH_KEY")]
    pub key: Option<PathBuf>,

    /// Expected TLS server name when it differs from the target address.
    #[arg(long)]
    pub domain: Option<String>,

    /// Compression advertised and used by the client.
    #[arg(long, default_value = "none", value_parser = ["none", "gzip", "deflate", "zstd"])]
    pub compression: String,

    /// Seconds to wait for the initial connection.
    #[arg(long, default_value_t = 5)]
    pub connect_timeout: u64,

    /// Path element delimiter used by the request builders.
    #[arg(long, default_value_t = '/')]
    pub delimiter: char,
}

/// TLS material for the session, loaded lazily by the channel layer.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub root_cert: Option<PathBuf>,
    pub identity: Option<(PathBuf, PathBuf)>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port`, IPv6 hosts bracketed.
    pub target: String,
    pub tls: Option<TlsSettings>,
    pub compression: Option<CompressionEncoding>,
    pub connect_timeout: Duration,
    pub delimiter: char,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SessionConfig {
    /// Metadata pairs every call of this session carries.
    pub fn metadata(&self) -> Metadata {
        let mut pairs = Vec::new();
        if let Some(username) = &self.username {
            pairs.push(("username".to_string(), username.clone()));
        }
        if let Some(password) = &self.password {
            pairs.push(("password".to_string(), password.clone()));
        }
        pairs
    }
}

impl TryFrom<CliArgs> for SessionConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let target = if args.address.contains(':') {
            format!("[{}]:{}", args.address, args.port)
        } else {
            format!("{}:{}", args.address, args.port)
        };

        let identity = match (args.cert, args.key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => bail!("mutual TLS requires both --cert and --key"),
        };
        let wants_tls = args.secure || args.root_cert.is_some() || identity.is_some();
        let tls = wants_tls.then(|| TlsSettings {
            root_cert: args.root_cert,
            identity,
            domain: args.domain,
        });

        let compression = match args.compression.as_str() {
            "none" => None,
            "gzip" => Some(CompressionEncoding::Gzip),
            "deflate" => Some(CompressionEncoding::Deflate),
            "zstd" => Some(CompressionEncoding::Zstd),
            other => bail!("unsupported compression <{other}>"),
        };

        Ok(Self {
            target,
            tls,
            compression,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            delimiter: args.delimiter,
            username: args.username,
            password: args.password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from([&["grpcsh"], argv].concat()).expect("args parse")
    }

    #[test]
    fn ipv6_targets_are_bracketed() {
        let config = SessionConfig::try_from(args(&["--address", "2001:db8::1"])).unwrap();
        assert_eq!(config.target, "[2001:db8::1]:57400");

        let config = SessionConfig::try_from(args(&["--address", "192.0.2.1", "--port", "9339"]))
            .unwrap();
        assert_eq!(config.target, "192.0.2.1:9339");
    }

    #[test]
    fn half_an_identity_fails_fast() {
        let result = SessionConfig::try_from(args(&["--address", "h", "--cert", "/tmp/c.pem"]));
        assert!(result.is_err());
    }

    #[test]
    fn cert_options_imply_tls() {
        let config =
            SessionConfig::try_from(args(&["--address", "h", "--root-cert", "/tmp/ca.pem"]))
                .unwrap();
        assert!(config.tls.is_some());

        let config = SessionConfig::try_from(args(&["--address", "h"])).unwrap();
        assert!(config.tls.is_none());
    }

    #[test]
    fn credentials_become_metadata_pairs() {
        let config = SessionConfig::try_from(args(&[
            "--address",
            "h",
            "--username",
            "admin",
            "--password",
            "admin",
        ]))
        .unwrap();
        assert_eq!(
            config.metadata(),
            vec![
                ("username".to_string(), "admin".to_string()),
                ("password".to_string(), "admin".to_string()),
            ]
        );
    }
}
