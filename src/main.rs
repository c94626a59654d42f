use clap::Parser;
use comfy_bridge::configuration::{CliArgs, Config};
use comfy_bridge::controller::Controller;
use log::{error, info};

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default level, e.g. RUST_LOG=comfy_bridge=debug
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
                 comfy-bridge v{}
        Real-time bridge between UI clients and a ComfyUI engine
==============================================================================
",
        env!("CARGO_PKG_VERSION")
    );

    info!("Importing configuration");
    let args = CliArgs::parse();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration loaded: HTTP :{}, subscribers :{}, engine {}",
        config.http_port,
        config.ws_port,
        config.upstream().authority()
    );

    let mut controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occurred in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
