use request_state::{FetchClient, RequestOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org/json".to_string());
    let client = FetchClient::new();

    println!("=== First request ===");
    let start = std::time::Instant::now();
    let mut first = client.use_fetch(url.as_str(), &RequestOptions::new());
    first.settled().await;
    println!("Took: {:?}", start.elapsed());
    match first.state().error {
        Some(error) => println!("Error: {}", error),
        None => println!("Data: {}", first.state().data.unwrap_or_default()),
    }

    println!("\n=== Two bindings, same URL (cached) ===");
    let start = std::time::Instant::now();
    let second = client.use_fetch(url.as_str(), &RequestOptions::new());
    let third = client.use_fetch(url.as_str(), &RequestOptions::new());
    println!("Took: {:?}", start.elapsed());
    println!("Loading: {} / {}", second.state().is_loading, third.state().is_loading);

    println!("\n=== After invalidation ===");
    client.invalidate_url(&url);
    let mut fourth = client.use_fetch(url.as_str(), &RequestOptions::new());
    fourth.settled().await;
    println!("Cache stats: {:?}", client.cache_stats());

    Ok(())
}
