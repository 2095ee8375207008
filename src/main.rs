//! # Search Operator
//!
//! A Kubernetes operator that turns `SearchService` resources into a running,
//! TLS-secured search workload.
//!
//! ## Overview
//!
//! For every SearchService the operator converges:
//!
//! 1. **HTTP service** - `<name>-search-http`, port 3002
//! 2. **TLS secrets** - an internal CA, an internal leaf certificate and a public copy without the key
//! 3. **Configuration** - `search.yml` merged from defaults, the backend association, inline settings and a user secret
//! 4. **Deployment** - pods rolled whenever the configuration hash changes
//! 5. **Remote trust** - the CA published into the namespace of each linked peer
//!
//! Certificates are rotated ahead of expiry and user secrets referenced by a
//! spec are watched so edits trigger a new pass.

use anyhow::Result;
use search_operator::runtime::initialization::initialize;
use search_operator::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(init.client, &init.config, init.reconciler, init.server_state).await
}
