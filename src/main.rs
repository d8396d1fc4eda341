use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use framewire::{setup_local_tracing, AppConfig, AppResult, Connection, Server};
use tracing::{error, info};

framewire::wire_message! {
    #[message_type(1)]
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Echo {
        seq: u32,
        #[wire(str32)]
        text: String,
    }
}

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long, default_value = "conf.toml")]
    pub conf: PathBuf,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    let level = match commandline.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_local_tracing(level)?;

    let app_config = AppConfig::set_up_config(&commandline.conf)?;
    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", app_config);
        return Ok(());
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(serve(app_config))
}

async fn serve(app_config: AppConfig) -> AppResult<()> {
    let mut server = Server::with_config(&app_config.network);
    server.register_handle(|conn: Arc<Connection>, msg: Echo| async move {
        match conn.send(&msg).await {
            Ok(()) => true,
            Err(e) => {
                error!("echo to {}: {}", conn.peer_addr(), e);
                false
            }
        }
    });
    server.register_close_func(|conn: Arc<Connection>, err| async move {
        info!("peer {} left: {:?}", conn.peer_addr(), err);
    });

    let addr = server.start(app_config.network.listen_addr()).await?;
    info!("echo server listening on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    server.shutdown().await;
    Ok(())
}
