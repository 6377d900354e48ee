//! CLI definition using clap derive.

use clap::Parser;

#[derive(Parser)]
#[command(name = "viewgate", about = "session & presence gateway")]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short = 'c', env = "VIEWGATE_CONFIG")]
    pub config: Option<String>,

    /// UDS socket path (default: $XDG_RUNTIME_DIR/viewgate/viewgate.sock)
    #[arg(long, short = 's', env = "VIEWGATE_SOCKET", global = true)]
    pub socket_path: Option<String>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/viewgate/viewgate.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/viewgate-{user}/viewgate.sock")
}
