use anyhow::Context;
use clap::Parser;
use qkd_relay::config::{ClientConfig, DEFAULT_PORT, LogFormat};
use qkd_relay::logging::init_logging;
use qkd_relay::net::{Client, ClientError, ClientEvent, KeyOutcome};
use qkd_relay::protocols::bb84::{DEFAULT_CHECK_SAMPLES, DEFAULT_SESSION_LENGTH};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "qkd-client")]
#[command(about = "Interactive BB84 client for the qkd-relay", long_about = None)]
struct Cli {
    /// Name to register with the relay
    #[arg(long)]
    hostname: String,

    /// Relay address
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    relay: String,

    /// Qubits to prepare when a peer starts a key exchange
    #[arg(long, default_value_t = DEFAULT_SESSION_LENGTH)]
    qubits: usize,

    /// Sifted bits sacrificed to detect eavesdropping
    #[arg(long, default_value_t = DEFAULT_CHECK_SAMPLES)]
    check_samples: usize,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Connect(String),
    Msg(String, String),
    Exit,
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim_start();

        match word {
            "CONNECT" if !rest.is_empty() && !rest.contains(' ') => {
                Ok(Command::Connect(rest.to_string()))
            }
            "CONNECT" => Err("usage: CONNECT <host>".into()),
            "MSG" => match rest.split_once(' ') {
                Some((host, text)) if !text.is_empty() => {
                    Ok(Command::Msg(host.to_string(), text.to_string()))
                }
                _ => Err("usage: MSG <host> <text>".into()),
            },
            "EXIT" => Ok(Command::Exit),
            "" => Err(String::new()),
            other => Err(format!("unknown command {other:?}, try CONNECT, MSG or EXIT")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let config = ClientConfig {
        hostname: cli.hostname,
        relay: cli.relay,
        qubits: cli.qubits,
        check_samples: cli.check_samples,
    };
    let relay = config.relay.clone();
    let client = Client::connect(config)
        .await
        .with_context(|| format!("connecting to {relay}"))?;
    println!("Connected to {relay} as {}", client.hostname());

    if let Some(mut events) = client.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ClientEvent::Message { from, text } => println!("{from}: {text}"),
                    ClientEvent::KeyEstablished { peer, key_bits } => {
                        println!("Shared a {key_bits}-bit key with {peer}")
                    }
                    ClientEvent::KeyDiscarded { peer } => {
                        println!("Check with {peer} failed, key discarded")
                    }
                    ClientEvent::Disconnected => {
                        println!("Relay has been shut down.");
                        std::process::exit(0);
                    }
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(usage) => {
                if !usage.is_empty() {
                    println!("{usage}");
                }
                continue;
            }
        };

        match command {
            Command::Connect(peer) => match client.establish_key(&peer).await {
                Ok(KeyOutcome::Established {
                    qubits,
                    coincidences,
                    key_bits,
                    ..
                }) => println!(
                    "Key with {peer}: {qubits} qubits, {coincidences} coincidences, {key_bits} key bits"
                ),
                Ok(KeyOutcome::Aborted { reason, .. }) => {
                    println!("Key exchange with {peer} aborted: {reason}")
                }
                Err(e) => println!("Error: {e}"),
            },
            Command::Msg(peer, text) => match client.send_message(&peer, &text) {
                Ok(()) => {}
                Err(ClientError::NoKey(_)) => {
                    println!("You have not established a common key with {peer}!")
                }
                Err(e) => println!("Error: {e}"),
            },
            Command::Exit => break,
        }
    }

    client.disconnect().await;
    Ok(())
}
