//! `framequery info`

use anyhow::Result;

use crate::app::{open_pipeline, AppOptions};

pub async fn run(options: &AppOptions, json: bool) -> Result<()> {
    let pipeline = open_pipeline(options).await?;
    let info = pipeline.info();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Data directory: {}", info.data_dir.display());
    println!("Query model:    {}", info.model);
    match &info.snapshot {
        Some(meta) => {
            println!("Snapshot:       {}", meta.id);
            println!("  built with:   {}", meta.model);
            println!("  frames:       {}", meta.frame_count);
            println!("  created:      {}", meta.created_at.to_rfc3339());
            if meta.model != info.model {
                println!("  (built with a different model; reindex before asking)");
            }
        }
        None => println!("Snapshot:       none (run `framequery index <video>`)"),
    }
    Ok(())
}
