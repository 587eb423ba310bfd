use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "dhcp-ctrl-cli")]
#[command(about = "Send control commands to a running dhcp-ctrl", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List commands the daemon understands
    ListCommands,
    /// Show daemon version
    Version,
    /// Show pid, uptime and reload count
    Status,
    /// Stop the daemon
    Shutdown,
    /// Send an arbitrary command
    Send {
        /// Command name
        name: String,
        /// JSON arguments
        #[arg(short, long)]
        arguments: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let request = match cli.command {
        Commands::ListCommands => json!({ "command": "list-commands" }),
        Commands::Version => json!({ "command": "version-get" }),
        Commands::Status => json!({ "command": "status-get" }),
        Commands::Shutdown => json!({ "command": "shutdown" }),
        Commands::Send { name, arguments } => match arguments {
            Some(arguments) => {
                let arguments: Value = serde_json::from_str(&arguments)?;
                json!({ "command": name, "arguments": arguments })
            }
            None => json!({ "command": name }),
        },
    };

    let client = reqwest::Client::new();
    let res = client.post(&cli.url).json(&request).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: daemon returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
