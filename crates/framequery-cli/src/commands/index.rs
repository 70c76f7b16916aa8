//! `framequery index`

use std::path::Path;

use anyhow::{anyhow, Result};
use framequery_lib::core::fs::validate_local_input_path;
use framequery_lib::core::sampling::SamplingStride;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::{open_pipeline, AppOptions};

pub async fn run(
    options: &AppOptions,
    video: &Path,
    every_n_frames: Option<u32>,
    fps: Option<f64>,
) -> Result<()> {
    let video = validate_local_input_path(&video.to_string_lossy(), "video").map_err(|e| anyhow!(e))?;

    let mut pipeline = open_pipeline(options).await?;
    if let Some(stride) = stride_override(every_n_frames, fps)? {
        pipeline.set_sampling_stride(stride);
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling build");
            on_ctrl_c.cancel();
        }
    });

    let report = pipeline.index_file(&video, cancel).await?;
    println!(
        "Indexed {} frames ({} sampled, {} skipped, {} decoded) in {}ms",
        report.frames_indexed,
        report.frames_sampled,
        report.frames_skipped,
        report.frames_decoded,
        report.elapsed_ms
    );
    println!("Snapshot {} ({})", report.snapshot_id, report.model);
    println!("Keyframes in {}", report.keyframe_dir.display());
    Ok(())
}

fn stride_override(every_n_frames: Option<u32>, fps: Option<f64>) -> Result<Option<SamplingStride>> {
    match (every_n_frames, fps) {
        (Some(0), _) => Err(anyhow!("--every-n-frames must be at least 1")),
        (Some(n), _) => Ok(Some(SamplingStride::EveryNFrames(n))),
        (None, Some(rate)) if !(rate.is_finite() && rate > 0.0) => {
            Err(anyhow!("--fps must be a positive number"))
        }
        (None, Some(rate)) => Ok(Some(SamplingStride::FramesPerSecond(rate))),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_override() {
        assert!(stride_override(None, None).unwrap().is_none());
        assert_eq!(
            stride_override(Some(15), None).unwrap(),
            Some(SamplingStride::EveryNFrames(15))
        );
        assert_eq!(
            stride_override(None, Some(2.0)).unwrap(),
            Some(SamplingStride::FramesPerSecond(2.0))
        );
        assert!(stride_override(Some(0), None).is_err());
        assert!(stride_override(None, Some(-1.0)).is_err());
    }
}
