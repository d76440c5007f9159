use std::process::ExitCode;

use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    match server::start_server().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {e}");
            eprintln!("votei: {e}");
            ExitCode::FAILURE
        }
    }
}
