//! Reads `user: message` lines from stdin and writes each spoken message to
//! a numbered WAV file.
//!
//! ```text
//! cargo run --example chat --features onnx -- assets/tts out/
//! ```

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chat_tts::engines::{OnnxEngineLoader, OnnxLoaderParams};
use chat_tts::{AudioBuffer, ChatMessage, ChatTts, Host, PlaybackHandoff, PluginConfig};

struct WavHost {
    assets: PathBuf,
    out_dir: PathBuf,
    written: AtomicUsize,
}

impl PlaybackHandoff for WavHost {
    fn play_oneshot_file(&self, path: &Path) {
        println!("(would play {})", path.display());
    }

    fn play_oneshot_memory(&self, samples: Vec<f32>, sample_rate: u32, channel_count: u16) {
        let n = self.written.fetch_add(1, Ordering::SeqCst);
        let path = self.out_dir.join(format!("message-{n:03}.wav"));
        let audio = AudioBuffer {
            samples,
            sample_rate,
            channel_count,
        };
        match audio.write_wav(&path) {
            Ok(()) => println!("Wrote {:.2}s to {}", audio.duration_secs(), path.display()),
            Err(e) => eprintln!("Failed to write {}: {e}", path.display()),
        }
    }
}

impl Host for WavHost {
    fn tts_assets_path(&self) -> PathBuf {
        self.assets.clone()
    }

    fn sound_assets_path(&self) -> PathBuf {
        self.assets.join("sounds")
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let assets = PathBuf::from(args.next().unwrap_or_else(|| "assets/tts".to_string()));
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "out".to_string()));
    std::fs::create_dir_all(&out_dir)?;

    let config = match std::env::var_os("CHAT_TTS_CONFIG") {
        Some(path) => PluginConfig::from_file(Path::new(&path))?,
        None => PluginConfig::default(),
    };

    let host = Arc::new(WavHost {
        assets,
        out_dir,
        written: AtomicUsize::new(0),
    });
    let loader = Arc::new(OnnxEngineLoader::new(OnnxLoaderParams::default()));
    let plugin = ChatTts::new(host, loader, config);

    let voices = plugin.on_load()?;
    println!("Loaded {voices} voices. Type `user: message` lines, Ctrl-D to finish.");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        match line.split_once(':') {
            Some((user, message)) => {
                plugin.on_message(ChatMessage::new(user.trim(), message.trim()))
            }
            None => eprintln!("expected `user: message`"),
        }
    }

    // Waits for queued messages to finish.
    plugin.shutdown();
    Ok(())
}
