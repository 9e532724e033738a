use std::time::Duration;

use clap::{Parser, Subcommand};
use fcgi_gateway::fastcgi::{FcgiClient, Params, Transport};

#[derive(Parser)]
#[command(name = "fcgi-cli")]
#[command(about = "Probe a FastCGI responder directly", long_about = None)]
struct Cli {
    /// Responder address: host:port, or a socket path with --unix.
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    address: String,

    /// Dial a Unix-domain socket instead of TCP.
    #[arg(long)]
    unix: bool,

    /// Connect deadline in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query responder limits (FCGI_MAX_CONNS, FCGI_MAX_REQS, FCGI_MPXS_CONNS)
    Values,
    /// Run a script with GET and print the reply
    Get {
        /// Absolute path of the script on the responder's filesystem
        script: String,
        #[arg(short, long, default_value = "")]
        query: String,
    },
    /// Run a script with POSTed form fields (key=value)
    Post {
        script: String,
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let transport = if cli.unix { Transport::Unix } else { Transport::Tcp };
    let client = FcgiClient::connect_timeout(transport, &cli.address, Duration::from_secs(cli.timeout)).await?;

    match cli.command {
        Commands::Values => {
            let values = client
                .get_values(&["FCGI_MAX_CONNS", "FCGI_MAX_REQS", "FCGI_MPXS_CONNS"])
                .await?;
            if values.is_empty() {
                println!("(responder returned no values)");
            }
            for (name, value) in values {
                println!("{name} = {value}");
            }
        }
        Commands::Get { script, query } => {
            let reply = client.get(script_params(&script, &query)).await?;
            print_reply(&reply);
        }
        Commands::Post { script, fields } => {
            let form: Vec<(String, String)> = fields
                .iter()
                .map(|f| match f.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (f.clone(), String::new()),
                })
                .collect();
            let reply = client.post_form(script_params(&script, ""), &form).await?;
            print_reply(&reply);
        }
    }

    client.close().await?;
    Ok(())
}

fn script_params(script: &str, query: &str) -> Params {
    let mut params = Params::new();
    params.insert("SCRIPT_FILENAME".into(), script.to_string());
    params.insert("QUERY_STRING".into(), query.to_string());
    params.insert("SERVER_SOFTWARE".into(), "fcgi-cli".into());
    params.insert("REMOTE_ADDR".into(), "127.0.0.1".into());
    params
}

fn print_reply(reply: &fcgi_gateway::fastcgi::UpstreamResponse) {
    println!("{} {}", reply.proto, reply.status);
    for (name, value) in &reply.headers {
        println!("{name}: {value}");
    }
    println!();
    println!("{}", String::from_utf8_lossy(&reply.body));
}
