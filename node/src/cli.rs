//! # CLI Interface
//!
//! Defines the command-line argument structure for `microchain-node` using
//! `clap` derive. Three subcommands: `run`, `init` and `version`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use microchain_protocol::config::{NodeConfig, DEFAULT_API_PORT, DEFAULT_METRICS_PORT};
use microchain_protocol::crypto::KeyPair;

/// microchain peer node.
///
/// Keeps a personal chain of dual-signed transactions, gossips with its
/// peers over TCP and exposes an admin HTTP API plus Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "microchain-node",
    about = "microchain peer node",
    version,
    propagate_version = true
)]
pub struct MicrochainNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Generate a fresh P-256 key and write it to a key file.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
///
/// Flags override values read from `--config`, which override the built-in
/// defaults.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a TOML file holding a `NodeConfig`.
    #[arg(long, short = 'c', env = "MICROCHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the peer listener binds to.
    #[arg(long, env = "MICROCHAIN_LISTEN")]
    pub listen: Option<String>,

    /// Address advertised to peers, when it differs from `--listen`.
    #[arg(long, env = "MICROCHAIN_ADVERTISE")]
    pub advertise: Option<String>,

    /// Peers to join at start-up, comma separated.
    #[arg(long, env = "MICROCHAIN_BOOTSTRAP", value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// Port for the admin HTTP API.
    #[arg(long, env = "MICROCHAIN_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "MICROCHAIN_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Hex-encoded P-256 private key.
    ///
    /// Takes precedence over `--key-file`. Without either, a throwaway key
    /// is generated.
    #[arg(long, env = "MICROCHAIN_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// File holding a hex-encoded private key, as written by `init`.
    #[arg(long, env = "MICROCHAIN_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "MICROCHAIN_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the key file.
    #[arg(long, short = 'o', default_value = "microchain.key")]
    pub key_file: PathBuf,

    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}

impl RunArgs {
    /// Reads `--config` when given, then applies the flags on top.
    pub fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str::<NodeConfig>(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => NodeConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.listen_address = listen.clone();
        }
        if let Some(advertise) = &self.advertise {
            config.advertised_address = advertise.clone();
        }
        if !self.bootstrap.is_empty() {
            config.bootstrap_peers = self.bootstrap.clone();
        }
        Ok(config)
    }

    /// `--key`, then `--key-file`, then a freshly generated key.
    pub fn keypair(&self) -> Result<KeyPair> {
        if let Some(hex_key) = &self.key {
            return KeyPair::from_hex(hex_key.trim()).context("invalid --key");
        }
        if let Some(path) = &self.key_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read key file {}", path.display()))?;
            return KeyPair::from_hex(raw.trim())
                .with_context(|| format!("invalid key in {}", path.display()));
        }
        tracing::warn!("no key given, generating a throwaway identity");
        Ok(KeyPair::generate()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        MicrochainNodeCli::command().debug_assert();
    }

    #[test]
    fn run_args_parse_bootstrap_list() {
        let cli = MicrochainNodeCli::try_parse_from([
            "microchain-node",
            "run",
            "--listen",
            "127.0.0.1:3001",
            "--bootstrap",
            "127.0.0.1:3000,127.0.0.1:3002",
            "--log-format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.listen.as_deref(), Some("127.0.0.1:3001"));
                assert_eq!(args.bootstrap, vec!["127.0.0.1:3000", "127.0.0.1:3002"]);
                assert_eq!(args.api_port, DEFAULT_API_PORT);
                assert_eq!(args.log_format, "json");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["microchain-node", "run"];
        argv.extend_from_slice(extra);
        match MicrochainNodeCli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "listen_address = \"127.0.0.1:4000\"\nping_period = 9\nbootstrap_peers = [\"127.0.0.1:5000\"]\n",
        )
        .unwrap();
        let path = path.to_str().unwrap();

        let from_file = run_args(&["--config", path]).node_config().unwrap();
        assert_eq!(from_file.listen_address, "127.0.0.1:4000");
        assert_eq!(from_file.ping_period, std::time::Duration::from_secs(9));
        assert_eq!(from_file.bootstrap_peers, vec!["127.0.0.1:5000"]);

        let overridden = run_args(&["--config", path, "--listen", "0.0.0.0:4001"])
            .node_config()
            .unwrap();
        assert_eq!(overridden.listen_address, "0.0.0.0:4001");
        assert_eq!(overridden.ping_period, std::time::Duration::from_secs(9));
    }

    #[test]
    fn key_file_is_read_as_hex() {
        let kp = KeyPair::generate().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        std::fs::write(&path, format!("{}\n", hex::encode(kp.private_key_bytes()))).unwrap();

        let loaded = run_args(&["--key-file", path.to_str().unwrap()])
            .keypair()
            .unwrap();
        assert_eq!(loaded.public_key(), kp.public_key());
    }

    #[test]
    fn malformed_key_is_an_error() {
        assert!(run_args(&["--key", "zz"]).keypair().is_err());
    }
}
