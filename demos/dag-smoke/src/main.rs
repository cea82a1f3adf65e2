//! Small smoke harness for `dag`: writes a few chunks through a
//! `Coordinator` over a throwaway staging file and prints the resulting
//! stats after each.
use std::fs::OpenOptions;

use dag::{Coordinator, StagingConfig, BLOCK};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let dir = tempfile::tempdir()?;
    let app_path = dir.path().join("app.log");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&app_path)?;

    let mut guard = Coordinator::init(
        file,
        StagingConfig {
            staging_dir: dir.path().to_path_buf(),
            staging_name: "stage.ag".to_string(),
            staging_bytes: 2 * BLOCK,
            reset: false,
        },
    )?;

    for chunk in [&b"hello "[..], b"dag ", b"smoke"] {
        guard.write(chunk)?;
        let stats = guard.stats();
        println!(
            "wrote {} bytes: durable_length={} start={} len={} buffer_end={}",
            chunk.len(),
            stats.durable_length,
            stats.start,
            stats.len,
            stats.buffer_end
        );
    }

    guard.deinit()?;
    Ok(())
}
