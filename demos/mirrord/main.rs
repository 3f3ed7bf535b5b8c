//! Smoke-test binary: brings up the daemon on one hardcoded TCP address
//! with an empty mount-point factory table and runs it to completion.

use fs9p_cored::config::DaemonConfig;
use fs9p_cored::daemon::DaemonController;
use fs9p_cored::mount::MountFactories;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = DaemonConfig { listen: vec!["/ip4/127.0.0.1/tcp/5640".to_string()], ..DaemonConfig::default() };

    let controller = match DaemonController::new(config, MountFactories::new()).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to start daemon");
            std::process::exit(1);
        }
    };

    match controller.run().await {
        Ok(()) => std::process::exit(0),
        Err(errors) => {
            for e in &errors {
                tracing::error!(error = %e, "background task failed");
            }
            std::process::exit(1);
        }
    }
}
