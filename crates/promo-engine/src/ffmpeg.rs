//! ffmpeg / ffprobe invocation.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};
use promo_contracts::{PromoError, PromoResult};
use serde_json::Value;

use crate::http::truncate_text;

/// Explicitly configured binary if it exists, otherwise a `PATH` lookup.
pub fn resolve_tool(configured: Option<&Path>, name: &str) -> PromoResult<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(PromoError::ToolMissing(format!(
            "{name} not found at {}",
            path.display()
        )));
    }
    which::which(name).map_err(|_| PromoError::ToolMissing(format!("{name} is not on PATH")))
}

pub(crate) fn run_tool(program: &Path, args: &[String]) -> anyhow::Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to launch {}", program.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            truncate_text(stderr.trim(), 1024)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Mux an audio track onto a video. The `volume` filter is only emitted when
/// the multiplier is not exactly 1.0.
pub fn mux_audio_args(video: &Path, audio: &Path, output: &Path, volume: f32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        video.display().to_string(),
        "-i".into(),
        audio.display().to_string(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "192k".into(),
    ];
    if volume != 1.0 {
        args.push("-filter:a".into());
        args.push(format!("volume={volume}"));
    }
    args.push("-shortest".into());
    args.push(output.display().to_string());
    args
}

/// Scale-and-pad into a 720x1280 portrait frame for story posting.
pub fn story_video_args(input: &Path, output: &Path, has_audio: bool) -> Vec<String> {
    let (width, height) = (720, 1280);
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.display().to_string(),
        "-map".into(),
        "0:v:0".into(),
    ];
    if has_audio {
        args.push("-map".into());
        args.push("0:a:0".into());
    }
    args.extend([
        "-vf".to_string(),
        format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:black"
        ),
        "-c:v".to_string(),
        "libx265".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-crf".to_string(),
        "28".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]);
    if has_audio {
        args.push("-c:a".into());
        args.push("copy".into());
    } else {
        args.push("-an".into());
    }
    args.push(output.display().to_string());
    args
}

pub(crate) fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-show_streams".into(),
        "-of".into(),
        "json".into(),
        input.display().to_string(),
    ]
}

pub(crate) fn streams_include_audio(probe_json: &str) -> anyhow::Result<bool> {
    let parsed: Value = serde_json::from_str(probe_json).context("ffprobe output is not JSON")?;
    Ok(parsed
        .get("streams")
        .and_then(Value::as_array)
        .map(|streams| {
            streams
                .iter()
                .any(|stream| stream.get("codec_type").and_then(Value::as_str) == Some("audio"))
        })
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn volume_filter_only_when_not_unity() {
        let unity = mux_audio_args(Path::new("v.mp4"), Path::new("a.mp3"), Path::new("o.mp4"), 1.0);
        assert!(!unity.iter().any(|arg| arg == "-filter:a"));

        let quiet = mux_audio_args(Path::new("v.mp4"), Path::new("a.mp3"), Path::new("o.mp4"), 0.5);
        let idx = quiet
            .iter()
            .position(|arg| arg == "-filter:a")
            .expect("volume filter");
        assert_eq!(quiet[idx + 1], "volume=0.5");
        assert_eq!(quiet.last().map(String::as_str), Some("o.mp4"));
    }

    #[test]
    fn story_video_drops_audio_when_absent() {
        let silent = story_video_args(Path::new("in.mp4"), Path::new("out.mp4"), false);
        assert!(silent.contains(&"-an".to_string()));
        assert!(!silent.contains(&"0:a:0".to_string()));
        assert!(silent.iter().any(|arg| arg.starts_with("scale=720:1280")));

        let loud = story_video_args(Path::new("in.mp4"), Path::new("out.mp4"), true);
        let idx = loud.iter().position(|arg| arg == "-c:a").expect("audio codec");
        assert_eq!(loud[idx + 1], "copy");
    }

    #[test]
    fn probe_output_detects_audio_streams() -> anyhow::Result<()> {
        let with_audio = r#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"}]}"#;
        let without = r#"{"streams":[{"codec_type":"video"}]}"#;
        assert!(streams_include_audio(with_audio)?);
        assert!(!streams_include_audio(without)?);
        Ok(())
    }

    #[test]
    fn configured_tool_must_exist() {
        let err = resolve_tool(Some(Path::new("/definitely/not/ffmpeg")), "ffmpeg").unwrap_err();
        assert!(matches!(err, PromoError::ToolMissing(_)));
    }
}
