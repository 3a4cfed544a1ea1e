#![allow(dead_code)]

use std::time::Duration;
use tokio::time::timeout;
use warden_bridge::{ChannelClient, CloseReason, ServerMessage, ShellConfig};

pub const WAIT: Duration = Duration::from_secs(10);

/// A POSIX shell config rooted in `dir`.
pub fn sh_config(dir: &std::path::Path) -> ShellConfig {
    ShellConfig {
        command: "sh".to_string(),
        working_dir: Some(dir.to_path_buf()),
        ..ShellConfig::default()
    }
}

/// What the client saw before `needle` showed up (or the session closed).
pub struct Transcript {
    pub text: String,
    pub frames: usize,
    pub closed: Option<Option<CloseReason>>,
}

/// Read frames until the concatenated output contains `needle`, the session
/// closes, or the wait times out.
pub async fn read_until(client: &mut ChannelClient, needle: &str) -> Transcript {
    let mut transcript = Transcript {
        text: String::new(),
        frames: 0,
        closed: None,
    };
    let _ = timeout(WAIT, async {
        while let Some(message) = client.recv().await {
            match message {
                ServerMessage::Frame(text) => {
                    transcript.frames += 1;
                    transcript.text.push_str(&text);
                    if transcript.text.contains(needle) {
                        return;
                    }
                }
                ServerMessage::Closed(reason) => {
                    transcript.closed = Some(reason);
                    return;
                }
            }
        }
    })
    .await;
    transcript
}

/// Drain until the session closes. Returns the close reason, if any arrived.
pub async fn read_until_closed(client: &mut ChannelClient) -> Option<Option<CloseReason>> {
    timeout(WAIT, async {
        while let Some(message) = client.recv().await {
            if let ServerMessage::Closed(reason) = message {
                return Some(reason);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{}", pid)).exists()
}
