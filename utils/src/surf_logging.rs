use log::{debug, warn};
use std::time::Instant;
use surf::middleware::{Middleware, Next};
use surf::{Client, Request, Response, Result};

/// Surf middleware logging every outgoing request and how it ended
#[derive(Debug, Default, Clone, Copy)]
pub struct SurfLogging;

#[surf::utils::async_trait]
impl Middleware for SurfLogging {
    async fn handle(&self, req: Request, client: Client, next: Next<'_>) -> Result<Response> {
        let method = req.method();
        let url = req.url().to_string();
        debug!("Sending {} {}", method, url);

        let started = Instant::now();
        match next.run(req, client).await {
            Ok(res) => {
                debug!(
                    "{} {} -> {} in {:?}",
                    method,
                    url,
                    res.status(),
                    started.elapsed()
                );
                Ok(res)
            }
            Err(e) => {
                warn!("{} {} failed after {:?}: {}", method, url, started.elapsed(), e);
                Err(e)
            }
        }
    }
}
