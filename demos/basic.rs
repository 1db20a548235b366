use retry_fetch::{Client, FetchOptions, Query, ResponseKind, ValidateStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let name = std::env::args().nth(1).unwrap_or_else(|| "lucas".to_owned());

    let client = Client::from_env()?;
    let body = client
        .fetch(
            "https://api.agify.io/",
            FetchOptions::new()
                .query(Query::new().with("name", name))
                .validate_status(ValidateStatus::Ok)
                .response_kind(ResponseKind::Json),
        )?
        .await?;

    println!("{body:?}");
    Ok(())
}
