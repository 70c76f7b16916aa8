//! FFmpeg Detection Module
//!
//! Locates system-installed ffmpeg/ffprobe binaries.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{FFmpegError, FFmpegResult};

/// A usable FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// e.g. "6.1.1-3ubuntu5"
    pub version: String,
}

/// Finds ffmpeg and ffprobe on `PATH` or in the platform's usual install
/// directories
pub fn detect_system_ffmpeg() -> FFmpegResult<FFmpegInfo> {
    let search = search_dirs(std::env::var_os("PATH"));
    let ffmpeg_path = find_binary(&search, "ffmpeg").ok_or(FFmpegError::NotFound)?;
    let ffprobe_path = find_binary(&search, "ffprobe").ok_or(FFmpegError::NotFound)?;
    let version = ffmpeg_version(&ffmpeg_path)?;

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

/// `PATH` entries first, then well-known locations
fn search_dirs(path_var: Option<OsString>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = path_var
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();

    for dir in common_install_dirs() {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

fn common_install_dirs() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut dirs = vec![
            PathBuf::from(r"C:\ffmpeg\bin"),
            PathBuf::from(r"C:\Program Files\ffmpeg\bin"),
        ];
        if let Some(programdata) = std::env::var_os("ProgramData") {
            dirs.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }
        dirs
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/local/bin"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/snap/bin"),
        ]
    }
}

fn find_binary(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    let file_name = if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    dirs.iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

fn ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let output = Command::new(ffmpeg_path).arg("-version").output()?;
    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }
    parse_version_line(&String::from_utf8_lossy(&output.stdout))
}

/// Parses "ffmpeg version X.Y.Z ..." from the first line of `-version` output
fn parse_version_line(output: &str) -> FFmpegResult<String> {
    let first_line = output
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| FFmpegError::ParseError("empty -version output".to_string()))?;

    Ok(first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(first_line)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_version_line() {
        let out = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc";
        assert_eq!(parse_version_line(out).unwrap(), "6.1.1-3ubuntu5");

        assert_eq!(parse_version_line("custom build").unwrap(), "custom build");
        assert!(parse_version_line("").is_err());
    }

    #[test]
    fn test_path_entries_come_first() {
        let dir = TempDir::new().unwrap();
        let path_var = std::env::join_paths([dir.path()]).unwrap();

        let dirs = search_dirs(Some(path_var));
        assert_eq!(dirs[0], dir.path());
        assert!(dirs.len() > 1);
    }

    #[test]
    fn test_find_binary_skips_directories() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let name = if cfg!(target_os = "windows") {
            "ffprobe.exe"
        } else {
            "ffprobe"
        };
        std::fs::create_dir(first.path().join(name)).unwrap();
        std::fs::write(second.path().join(name), b"").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(find_binary(&dirs, "ffprobe"), Some(second.path().join(name)));
        assert_eq!(find_binary(&dirs, "ffmpeg"), None);
    }

    #[test]
    fn test_detect_system_ffmpeg() {
        // Passes whether or not FFmpeg is installed on the machine running tests
        match detect_system_ffmpeg() {
            Ok(info) => assert!(!info.version.is_empty()),
            Err(FFmpegError::NotFound) => {}
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }
}
