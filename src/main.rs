use std::env;

use tracing::error;

#[tokio::main]
async fn main() {
    sell_vs_rent::api::init_tracing();

    let raw_args: Vec<String> = env::args().collect();
    if raw_args.get(1).map(|s| s.as_str()) == Some("serve") {
        let port = raw_args
            .get(2)
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(8080);
        if let Err(e) = sell_vs_rent::api::run_http_server(port).await {
            error!("server error: {e}");
            std::process::exit(1);
        }
        return;
    }

    if let Err(msg) = sell_vs_rent::api::run_cli(raw_args) {
        eprintln!("{msg}");
        std::process::exit(1);
    }
}
