//! vbucketd CLI Client
//!
//! Command-line interface speaking the binary protocol to a server.

use std::net::TcpStream;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use vbucketd::partition_for_key;
use vbucketd::protocol::{read_response, write_request, Command, Request, Response};

/// vbucketd CLI
#[derive(Parser, Debug)]
#[command(name = "vbucketd-cli")]
#[command(about = "CLI for the vbucketd key-value server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:11211")]
    server: String,

    /// Bucket to select before running the command
    #[arg(short, long)]
    bucket: Option<String>,

    /// Partition to address (default: hashed from the key)
    #[arg(long)]
    vbucket: Option<u16>,

    /// Partition count used when hashing keys
    #[arg(long, default_value = "1024")]
    num_partitions: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Opaque item flags
        #[arg(long, default_value = "0")]
        flags: u32,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ping the server
    Ping,

    /// Print the server version
    Version,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut stream = match TcpStream::connect(&args.server) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", args.server, e);
            return ExitCode::FAILURE;
        }
    };
    let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));

    if let Some(bucket) = &args.bucket {
        let select = Request::new(Command::SelectBucket {
            name: bucket.clone(),
        });
        match round_trip(&mut stream, &select) {
            Ok(resp) if resp.is_success() => {}
            Ok(resp) => return report_error(&resp),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let vbucket_for = |key: &str| {
        args.vbucket
            .unwrap_or_else(|| partition_for_key(key.as_bytes(), args.num_partitions))
    };

    let request = match &args.command {
        Commands::Get { key } => Request::new(Command::Get {
            key: key.as_bytes().to_vec(),
        })
        .with_vbucket(vbucket_for(key)),
        Commands::Set { key, value, flags } => Request::new(Command::Set {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
            flags: *flags,
            expiration: 0,
        })
        .with_vbucket(vbucket_for(key)),
        Commands::Del { key } => Request::new(Command::Delete {
            key: key.as_bytes().to_vec(),
        })
        .with_vbucket(vbucket_for(key)),
        Commands::Ping => Request::new(Command::Noop),
        Commands::Version => Request::new(Command::Version),
    };

    let response = match round_trip(&mut stream, &request) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if !response.is_success() {
        return report_error(&response);
    }

    match &args.command {
        Commands::Get { .. } | Commands::Version => {
            println!("{}", String::from_utf8_lossy(&response.value));
        }
        Commands::Set { .. } | Commands::Del { .. } => println!("OK (cas {})", response.cas),
        Commands::Ping => println!("PONG"),
    }
    ExitCode::SUCCESS
}

fn round_trip(stream: &mut TcpStream, request: &Request) -> vbucketd::Result<Response> {
    write_request(stream, request)?;
    read_response(stream)
}

fn report_error(response: &Response) -> ExitCode {
    eprintln!(
        "{:?}: {}",
        response.status,
        String::from_utf8_lossy(&response.value)
    );
    ExitCode::FAILURE
}
