//! `framequery ask`

use anyhow::Result;

use super::describe_retrieval;
use crate::app::{open_pipeline, AppOptions};

pub async fn run(options: &AppOptions, question: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(options).await?;
    let answer = pipeline.ask(question).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", answer.text);
        println!();
        println!("Based on {}", describe_retrieval(&answer.retrieval));
    }
    Ok(())
}
