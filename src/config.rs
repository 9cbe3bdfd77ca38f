//! Process configuration.
//!
//! `rredis`'s `src/redis/config.rs` reads a line-oriented `redis.conf` file
//! directive by directive (`port`, `bind`, `dir`, `loglevel`, ...) and exits
//! the process on a malformed line. This spec has no config-file format, only
//! CLI flags, so the same validate-or-exit shape is kept but driven by
//! `clap`'s derive API instead of a hand-rolled line parser.

use clap::Parser;
use std::net::SocketAddr;

#[derive(Debug, Parser)]
#[command(name = "rudis-server", about = "A Redis-protocol-compatible in-memory store")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Run as a replica of the given master, formatted "<host> <port>".
    #[arg(long)]
    pub replicaof: Option<String>,

    /// Recognized for compatibility; persistence is out of scope.
    #[arg(long)]
    pub dir: Option<String>,

    /// Recognized for compatibility; persistence is out of scope.
    #[arg(long)]
    pub dbfilename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub replicaof: Option<SocketAddr>,
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
}

impl Config {
    /// Parses and validates CLI flags, exiting the process with a non-zero
    /// code and a message on stderr on any invalid value — mirroring
    /// `rredis`'s `load_err` behavior in `src/redis/config.rs`.
    pub fn from_args() -> Config {
        let cli = Cli::parse();
        Self::from_cli(cli).unwrap_or_else(|msg| {
            eprintln!("*** FATAL CONFIG ERROR ***\n{msg}");
            std::process::exit(1);
        })
    }

    fn from_cli(cli: Cli) -> Result<Config, String> {
        let replicaof = match cli.replicaof {
            Some(spec) => Some(parse_replicaof(&spec)?),
            None => None,
        };
        Ok(Config {
            port: cli.port,
            replicaof,
            dir: cli.dir,
            dbfilename: cli.dbfilename,
        })
    }

    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }
}

fn parse_replicaof(spec: &str) -> Result<SocketAddr, String> {
    let mut parts = spec.split_whitespace();
    let host = parts
        .next()
        .ok_or_else(|| "replicaof requires '<host> <port>'".to_string())?;
    let port = parts
        .next()
        .ok_or_else(|| "replicaof requires '<host> <port>'".to_string())?;
    if parts.next().is_some() {
        return Err("replicaof takes exactly two tokens: '<host> <port>'".to_string());
    }
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid replicaof port: '{port}'"))?;
    format!("{host}:{port}")
        .parse::<SocketAddr>()
        .or_else(|_| resolve_host(host, port))
        .map_err(|_| format!("invalid replicaof address: '{spec}'"))
}

fn resolve_host(host: &str, port: u16) -> Result<SocketAddr, std::io::Error> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_flags() {
        let cli = Cli::parse_from(["rudis-server", "--port", "7000"]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.port, 7000);
        assert!(!cfg.is_replica());
    }

    #[test]
    fn parses_replicaof_ip() {
        let cli = Cli::parse_from(["rudis-server", "--replicaof", "127.0.0.1 6379"]);
        let cfg = Config::from_cli(cli).unwrap();
        assert!(cfg.is_replica());
        assert_eq!(cfg.replicaof.unwrap().port(), 6379);
    }

    #[test]
    fn rejects_malformed_replicaof() {
        let cli = Cli::parse_from(["rudis-server", "--replicaof", "justahost"]);
        assert!(Config::from_cli(cli).is_err());
    }
}
