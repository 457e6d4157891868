//! Screen capture for `take_screenshot`.
//!
//! Capture is delegated to platform tooling that writes an image file:
//! macOS `screencapture`, Linux `gnome-screenshot` / `scrot` / `import`
//! (ImageMagick), tried in order, and Windows PowerShell through
//! `System.Windows.Forms`. The result is downscaled to a thumbnail
//! and re-encoded as PNG before it is shown to the model.

use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use image::ImageFormat;

/// Maximum time to wait for one capture command.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(15);

/// Source of full-resolution screen images.
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    /// Encoded image bytes (any format `image` can decode) of the primary display.
    async fn capture(&self) -> anyhow::Result<Vec<u8>>;
}

/// Captures the primary display with whatever tool the platform provides.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemScreenCapturer;

impl SystemScreenCapturer {
    /// Candidate capture commands for this platform, in preference order.
    fn capture_commands(output_path: &str) -> Vec<Vec<String>> {
        if cfg!(target_os = "macos") {
            vec![vec!["screencapture".into(), "-x".into(), output_path.into()]]
        } else if cfg!(target_os = "linux") {
            vec![
                vec!["gnome-screenshot".into(), "-f".into(), output_path.into()],
                vec!["scrot".into(), "-o".into(), output_path.into()],
                vec![
                    "import".into(),
                    "-window".into(),
                    "root".into(),
                    output_path.into(),
                ],
            ]
        } else if cfg!(target_os = "windows") {
            vec![vec![
                "powershell".into(),
                "-NoProfile".into(),
                "-NonInteractive".into(),
                "-Command".into(),
                powershell_capture_script(output_path),
            ]]
        } else {
            Vec::new()
        }
    }
}

/// PowerShell that copies the primary screen into a PNG at `output_path`.
fn powershell_capture_script(output_path: &str) -> String {
    // Single-quoted PowerShell strings escape `'` by doubling it.
    let quoted = output_path.replace('\'', "''");
    format!(
        "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
         $b = [System.Windows.Forms.Screen]::PrimaryScreen.Bounds; \
         $bmp = New-Object System.Drawing.Bitmap $b.Width, $b.Height; \
         $g = [System.Drawing.Graphics]::FromImage($bmp); \
         $g.CopyFromScreen($b.Location, [System.Drawing.Point]::Empty, $b.Size); \
         $bmp.Save('{quoted}', [System.Drawing.Imaging.ImageFormat]::Png); \
         $g.Dispose(); $bmp.Dispose()"
    )
}

#[async_trait]
impl ScreenCapturer for SystemScreenCapturer {
    async fn capture(&self) -> anyhow::Result<Vec<u8>> {
        let dir = tempfile::tempdir().context("failed to create capture directory")?;
        let output_path = dir.path().join("screen.png");
        let output_str = output_path.to_string_lossy().to_string();

        let commands = Self::capture_commands(&output_str);
        if commands.is_empty() {
            bail!("screen capture is not supported on this platform");
        }

        let mut saw_spawnable_command = false;
        let mut last_failure: Option<String> = None;

        for cmd_args in commands {
            let Some((program, args)) = cmd_args.split_first() else {
                continue;
            };
            let result = tokio::time::timeout(
                CAPTURE_TIMEOUT,
                tokio::process::Command::new(program)
                    .args(args)
                    .kill_on_drop(true)
                    .output(),
            )
            .await;

            match result {
                Ok(Ok(output)) => {
                    saw_spawnable_command = true;
                    if output.status.success() && output_path.exists() {
                        return read_capture(&output_path).await;
                    }
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    last_failure = Some(if stderr.is_empty() {
                        format!("{program} exited with status {}", output.status)
                    } else {
                        stderr
                    });
                }
                Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {}
                Ok(Err(e)) => {
                    saw_spawnable_command = true;
                    last_failure = Some(format!("failed to run {program}: {e}"));
                }
                Err(_) => {
                    saw_spawnable_command = true;
                    last_failure = Some(format!(
                        "{program} timed out after {}s",
                        CAPTURE_TIMEOUT.as_secs()
                    ));
                }
            }
        }

        if !saw_spawnable_command {
            bail!("no screen capture tool found; install gnome-screenshot, scrot, or ImageMagick");
        }
        Err(anyhow!(last_failure.unwrap_or_else(|| "screen capture failed".into())))
    }
}

async fn read_capture(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read capture {}", path.display()))
}

/// Downscale `image_bytes` to fit within `max_width`×`max_height` (aspect
/// ratio kept, never upscaled) and encode as PNG.
pub fn encode_thumbnail_png(
    image_bytes: &[u8],
    max_width: u32,
    max_height: u32,
) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(image_bytes).context("failed to decode capture")?;
    let img = if img.width() > max_width || img.height() > max_height {
        img.thumbnail(max_width, max_height)
    } else {
        img
    };

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(png)
}
