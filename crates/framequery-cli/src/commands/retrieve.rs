//! `framequery retrieve`

use anyhow::Result;

use super::describe_retrieval;
use crate::app::{open_pipeline, AppOptions};

pub async fn run(options: &AppOptions, question: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(options).await?;
    let result = pipeline.retrieve(question).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Best match: {}", describe_retrieval(&result));
    }
    Ok(())
}
