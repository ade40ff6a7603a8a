use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `braid-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "braid-tonic-server",
    version,
    about = "A gRPC echo service served through a braid middleware chain"
)]
pub struct CliArgs {
    /// Token every call must present in its `authorization` metadata, either
    /// bare or as `Bearer <token>`.
    ///
    /// When unset the auth middleware is not installed.
    ///
    /// Environment variable: `AUTH_TOKEN`
    #[arg(long, env = "AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Timeout applied to calls that arrive without a `grpc-timeout`, in
    /// milliseconds. `0` disables it.
    ///
    /// Environment variable: `DEFAULT_TIMEOUT_MS`
    #[arg(long, env = "DEFAULT_TIMEOUT_MS", default_value_t = 30_000)]
    pub default_timeout_ms: u64,

    /// Capacity of the response buffer between a streaming handler and the
    /// gRPC response stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Longest message, in bytes, the echo handlers accept.
    ///
    /// Environment variable: `MAX_MESSAGE_LEN`
    #[arg(long, env = "MAX_MESSAGE_LEN", default_value_t = 4096)]
    pub max_message_len: usize,

    /// Largest `repeat` a `ServerStreamingEcho` request may ask for.
    ///
    /// Environment variable: `MAX_REPEAT`
    #[arg(long, env = "MAX_REPEAT", default_value_t = 1024)]
    pub max_repeat: u32,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/braid.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub auth_token: Option<String>,
    pub default_timeout: Option<Duration>,
    pub stream_buffer_size: usize,
    pub max_message_len: usize,
    pub max_repeat: u32,
    pub server_addr: String,
    pub uds: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.max_message_len == 0 {
            bail!("MAX_MESSAGE_LEN must be greater than 0");
        }

        if args.max_repeat == 0 {
            bail!("MAX_REPEAT must be greater than 0");
        }

        let auth_token = match args.auth_token {
            Some(token) if token.trim().is_empty() => {
                bail!("AUTH_TOKEN must not be empty when set")
            }
            Some(token) if token.parse::<tonic::metadata::AsciiMetadataValue>().is_err() => {
                bail!("AUTH_TOKEN must be a valid ASCII metadata value")
            }
            other => other,
        };

        let default_timeout =
            (args.default_timeout_ms > 0).then(|| Duration::from_millis(args.default_timeout_ms));

        Ok(Self {
            auth_token,
            default_timeout,
            stream_buffer_size: args.stream_buffer_size,
            max_message_len: args.max_message_len,
            max_repeat: args.max_repeat,
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["braid-tonic-server"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.default_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.stream_buffer_size, 8);
        assert!(!config.uds);
    }

    #[test]
    fn zero_timeout_disables_the_default_deadline() {
        let config = ServerConfig::try_from(args(&["--default-timeout-ms", "0"])).unwrap();
        assert_eq!(config.default_timeout, None);
    }

    #[test]
    fn zero_stream_buffer_is_rejected() {
        let err = ServerConfig::try_from(args(&["--stream-buffer-size", "0"])).unwrap_err();
        assert!(err.to_string().contains("STREAM_BUFFER_SIZE"));
    }

    #[test]
    fn blank_auth_token_is_rejected() {
        let err = ServerConfig::try_from(args(&["--auth-token", "  "])).unwrap_err();
        assert!(err.to_string().contains("AUTH_TOKEN"));
    }

    #[test]
    fn auth_token_is_kept() {
        let config = ServerConfig::try_from(args(&["--auth-token", "valid-token"])).unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("valid-token"));
    }
}
