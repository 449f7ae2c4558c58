use cca_selection_backend::error::AppError;
use cca_selection_backend::run_server;
use cca_selection_config::get_config;
use cca_selection_telemetry::setup_telemetry;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    setup_telemetry();
    let config = get_config()?;
    run_server(config).await?.await
}
