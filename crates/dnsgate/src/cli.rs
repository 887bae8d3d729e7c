use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, name = "dnsgate")]
pub struct Args {
    /// Descriptor of an already configured TUN interface
    #[arg(long, value_name = "FD")]
    pub tun_fd: RawFd,
    /// Allow-list file, one domain per line
    #[arg(long, value_name = "PATH")]
    pub allowlist_path: Option<PathBuf>,
    /// Allowed domain, used instead of an allow-list file
    #[arg(long, value_name = "DOMAIN", conflicts_with = "allowlist_path")]
    pub allow: Vec<String>,
    /// Where the offline copy of the allow-list is kept
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,
    /// Upstream resolvers, tried in the given order
    #[arg(long, value_name = "ADDR", default_value = "1.1.1.1:53")]
    pub upstream: Vec<SocketAddr>,
    #[arg(long, value_name = "SECS", default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..=30))]
    pub upstream_timeout_secs: u64,
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub reload_interval_secs: Option<u64>,
    #[arg(long, value_name = "BYTES", default_value_t = u16::MAX, value_parser = clap::value_parser!(u16).range(28..))]
    pub max_frame_size: u16,
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Location of the offline allow-list copy, if any cache directory is known
    pub fn allowlist_cache_path(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("dnsgate")))
            .map(|dir| dir.join("allowlist"))
    }
}
