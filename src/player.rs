use anyhow::{Result, anyhow, bail};
use tokio::process::Command;
use tracing::info;

use crate::config::PlayerSettings;
use crate::types::VideoDescriptor;

/// Arguments handed to the player, configured extras first.
pub fn player_args(
    settings: &PlayerSettings,
    video: &VideoDescriptor,
    media_title: &str,
) -> Result<Vec<String>> {
    let mut args = settings.split_args()?;
    args.push(format!("--force-media-title={media_title}"));
    if let Some(referer) = &video.referer {
        args.push(format!("--referrer={referer}"));
        args.push(format!("--http-header-fields=Referer: {referer}"));
    }
    for sub in &video.subtitle_urls {
        args.push(format!("--sub-file={sub}"));
    }
    args.push(video.video_url.clone());
    Ok(args)
}

pub async fn launch_player(
    settings: &PlayerSettings,
    video: &VideoDescriptor,
    media_title: &str,
) -> Result<()> {
    let player = settings.command.as_str();
    let args = player_args(settings, video, media_title)?;
    info!(player, url = %video.video_url, "launching player");

    let status = match Command::new(player).args(&args).status().await {
        Ok(status) => status,
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                return Err(anyhow!(
                    "Player '{player}' not found. Install mpv or set player.command in the config."
                ));
            }
            return Err(anyhow!(err).context(format!("failed to launch player '{player}'")));
        }
    };

    if !status.success() {
        bail!("player exited with status {status}");
    }
    Ok(())
}
