use lambda_http::{run, service_fn, Error, Request};
use movie_master_shared::{config::Config, AppState};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod http_handler;
mod local;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Set by the Lambda execution environment only
    let on_lambda = env::var("AWS_LAMBDA_RUNTIME_API").is_ok();

    if on_lambda {
        lambda_http::tracing::init_default_subscriber();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let config = Config::from_env()?;

    // Connect before serving: a store that cannot be reached aborts startup
    tracing::info!("Connecting to {:?} document store...", config.store);
    let state = AppState::connect(&config).await?;

    if on_lambda {
        tracing::info!("Starting Lambda runtime");
        run(service_fn(move |event: Request| {
            let state = Arc::clone(&state);
            async move { http_handler::function_handler(event, state).await }
        }))
        .await
    } else {
        local::serve(state, config.port).await
    }
}
