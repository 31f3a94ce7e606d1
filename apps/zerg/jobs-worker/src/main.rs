//! Jobs Worker Service - Entry Point
//!
//! Background worker that drains the durable job queues.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    zerg_jobs_worker::run().await
}
