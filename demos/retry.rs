use std::time::Duration;

use retry_fetch::{
    AbortController, FetchError, FetchOptions, Jitter, ResponseKind, RetryConfig, Strategy,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("RETRY_FETCH_DEMO_URL")
        .unwrap_or_else(|_| "https://httpbin.org/delay/3".to_owned());

    // Give up after ten seconds no matter how many retries are left.
    let external = AbortController::new();
    let deadline = external.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        deadline.abort();
    });

    let fetch = retry_fetch::fetch(
        &url,
        FetchOptions::new()
            .timeout_ms(1_500)
            .retry(
                RetryConfig::new(4, 250)
                    .with_strategy(Strategy::Exponential)
                    .with_jitter(Jitter::Full)
                    .with_max_delay_ms(2_000),
            )
            .controller(external)
            .response_kind(ResponseKind::Text),
    )?;

    match fetch.await {
        Ok(body) => println!("{body:?}"),
        Err(FetchError::Timeout { timeout_ms }) => {
            println!("every attempt exceeded {timeout_ms} ms")
        }
        Err(err @ FetchError::Aborted { .. }) => println!("{err}"),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
