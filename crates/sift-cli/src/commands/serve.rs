//! Server command implementation

use std::path::Path;

use anyhow::Result;

use super::{load_config, open_db};

pub async fn cmd_serve(
    db_path: &Path,
    config_path: Option<&Path>,
    host: &str,
    port: u16,
    no_encrypt: bool,
    allowed_origins: Vec<String>,
) -> Result<()> {
    let config = load_config(config_path)?;

    println!("🚀 Starting Sift API server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}/api", host, port);
    println!("   Scorer: {}", config.scorer.backend);
    if !allowed_origins.is_empty() {
        println!("   CORS origins: {}", allowed_origins.join(", "));
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    let server_config = sift_server::ServerConfig { allowed_origins };
    sift_server::serve(db, config, host, port, server_config).await?;

    Ok(())
}
