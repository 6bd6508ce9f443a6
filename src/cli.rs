//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use webdav_core::Scheme;
use webdav_core::transport::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Talk to a WebDAV server.
///
/// Each subcommand issues one WebDAV request against the configured server.
/// `demo` runs a short store/fetch/collection round trip.
#[derive(Parser, Debug)]
#[command(name = "webdav")]
#[command(author, version, about)]
#[command(after_help = "EXAMPLES:
    # Upload and read back a file
    webdav --host dav.example.com -u alice put notes.txt /notes.txt
    webdav --host dav.example.com -u alice get /notes.txt

    # Resume a partial download
    webdav --host dav.example.com get /big.iso -o big.iso --offset 1048576
")]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// URL scheme
    #[arg(long, value_enum, default_value_t = SchemeArg::Https)]
    pub scheme: SchemeArg,

    /// Server host name
    #[arg(long, env = "WEBDAV_HOST")]
    pub host: String,

    /// Server port (0 for the scheme default)
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Root path all remote paths are relative to
    #[arg(long, default_value = "/")]
    pub root: String,

    /// Username answered on an authentication challenge
    #[arg(short, long, env = "WEBDAV_USERNAME", default_value = "")]
    pub username: String,

    /// Password answered on an authentication challenge
    #[arg(short, long, env = "WEBDAV_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Whole-request timeout in seconds
    #[arg(long, default_value_t = READ_TIMEOUT_SECS)]
    pub read_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// URL scheme as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemeArg {
    Http,
    Https,
}

impl From<SchemeArg> for Scheme {
    fn from(value: SchemeArg) -> Self {
        match value {
            SchemeArg::Http => Scheme::Http,
            SchemeArg::Https => Scheme::Https,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a resource (to stdout unless --output is given)
    Get {
        /// Remote path
        remote: String,

        /// Local file to write
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resume from this byte offset, appending to --output
        #[arg(long, default_value_t = 0, requires = "output")]
        offset: u64,
    },

    /// Upload a local file
    Put {
        /// Local file to read
        local: PathBuf,

        /// Remote path
        remote: String,
    },

    /// Create a collection
    Mkcol {
        /// Remote path, usually ending in '/'
        remote: String,
    },

    /// Copy a resource
    Copy {
        from: String,
        to: String,

        /// Replace an existing destination
        #[arg(long)]
        overwrite: bool,
    },

    /// Move a resource
    Move {
        from: String,
        to: String,

        /// Replace an existing destination
        #[arg(long)]
        overwrite: bool,
    },

    /// Delete a resource
    Delete {
        /// Remote path
        remote: String,
    },

    /// Run a store, fetch, collection, copy, move and delete round trip
    Demo,
}
