use clap::Parser;
use movierec::services::serving::create_router;
use movierec::{init_tracing, AppState, Config};
use tracing::info;

#[derive(Parser)]
#[command(name = "movierec-server")]
#[command(about = "Serves cold-start movie recommendations from a trained snapshot")]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    info!("Starting movierec server with config: {:?}", config.server);

    let addr = config.server.socket_addr()?;
    let state = AppState::new(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
