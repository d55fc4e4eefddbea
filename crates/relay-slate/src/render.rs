use std::time::Duration;

use bytes::Bytes;
use process_utils::tokio_command;

use crate::error::SlateError;

/// Parameters for the one-shot, startup-time slate render. The result is an
/// opaque, already-muxed MPEG-TS loop: nothing downstream re-parses it, it
/// is served byte-for-byte while the session is in fallback.
#[derive(Debug, Clone)]
pub struct SlateConfig {
    pub width: u32,
    pub height: u32,
    pub background_rgb: (u8, u8, u8),
    pub text: String,
    pub with_audio: bool,
    pub duration: Duration,
    pub ffmpeg_path: String,
}

impl Default for SlateConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            background_rgb: (0x20, 0x20, 0x20),
            text: "stream unavailable".to_string(),
            with_audio: true,
            duration: Duration::from_secs(10),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

fn color_filter(cfg: &SlateConfig) -> String {
    format!(
        "color=c=0x{:02x}{:02x}{:02x}:s={}x{}:d={}",
        cfg.background_rgb.0,
        cfg.background_rgb.1,
        cfg.background_rgb.2,
        cfg.width,
        cfg.height,
        cfg.duration.as_secs_f64()
    )
}

fn drawtext_filter(cfg: &SlateConfig) -> String {
    let escaped = cfg.text.replace('\'', "\\'").replace(':', "\\:");
    format!(
        "drawtext=text='{escaped}':fontcolor=white:fontsize=36:x=(w-text_w)/2:y=(h-text_h)/2"
    )
}

/// Renders the looped slate once at startup by shelling out to `ffmpeg`.
/// Never invoked again for the lifetime of the slate: the returned bytes
/// are cached and replayed verbatim by the controller.
pub async fn render_slate(cfg: &SlateConfig) -> Result<Bytes, SlateError> {
    let mut command = tokio_command(&cfg.ffmpeg_path);
    command
        .arg("-f")
        .arg("lavfi")
        .arg("-i")
        .arg(color_filter(cfg))
        .arg("-vf")
        .arg(drawtext_filter(cfg));

    if cfg.with_audio {
        command
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(format!("anullsrc=r=48000:cl=stereo:d={}", cfg.duration.as_secs_f64()))
            .arg("-c:a")
            .arg("aac");
    }

    command
        .arg("-c:v")
        .arg("libx264")
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg("-f")
        .arg("mpegts")
        .arg("-y")
        .arg("pipe:1")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let output = command
        .output()
        .await
        .map_err(|e| SlateError::Spawn(e.to_string()))?;

    if !output.status.success() {
        return Err(SlateError::Render(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    if output.stdout.is_empty() {
        return Err(SlateError::Render("ffmpeg produced no output".to_string()));
    }

    Ok(Bytes::from(output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_filter_formats_hex_and_dimensions() {
        let cfg = SlateConfig {
            background_rgb: (0xAB, 0x00, 0xFF),
            width: 640,
            height: 360,
            duration: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(color_filter(&cfg), "color=c=0xab00ff:s=640x360:d=5");
    }

    #[test]
    fn test_drawtext_filter_escapes_colon_and_quote() {
        let cfg = SlateConfig {
            text: "offline: retry'd".to_string(),
            ..Default::default()
        };
        let filter = drawtext_filter(&cfg);
        assert!(filter.contains("offline\\: retry\\'d"));
    }
}
