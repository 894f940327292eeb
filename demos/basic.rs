use probe_breaker::{Breaker, BreakerError};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let attempt = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt);

    // Fails on every even attempt for the first 10, then recovers.
    let breaker = Breaker::<String, ServiceError>::builder()
        .failure_count_threshold(3)
        .failure_rate_threshold(50.0)
        .probe_timeout(Duration::from_secs(2))
        .cooldown(Duration::from_secs(1))
        .build(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 10 && n % 2 == 0 {
                    Err(ServiceError("External service error".to_string()))
                } else {
                    Ok(format!("response #{}", n))
                }
            }
        })?;

    println!("Circuit initial state: {}", breaker.current_state());

    for i in 1..=15 {
        match breaker.run().await {
            Ok(result) => println!("Attempt {}: succeeded with {}", i, result),
            Err(BreakerError::Open) => {
                println!("Attempt {}: circuit is open, waiting before retry...", i);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(BreakerError::Upstream(err)) => println!("Attempt {}: failed with {}", i, err),
        }

        let snapshot = breaker.snapshot();
        println!(
            "  state: {}, failures: {}, successes: {}, failure rate: {:.2}%",
            snapshot.state,
            snapshot.failure_count,
            snapshot.success_count,
            snapshot.failure_rate()
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    println!("Totals: {:?}", breaker.snapshot().totals);
    Ok(())
}
