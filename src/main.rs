use yt2mp3::{config::Config, server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "yt2mp3=info,tower_http=info".to_string()),
        )
        .init();

    let result = match Config::from_env() {
        Ok(config) => server::run(config).await,
        Err(error) => Err(error),
    };

    if let Err(error) = result {
        eprintln!("Server error: {error:#}");
        std::process::exit(1);
    }
}
