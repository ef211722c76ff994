use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use super::error::PlaybackError;

/// Plays the alert sound file through the default output device.
///
/// Each call opens its own output stream and blocks until the clip ends, so it
/// is meant to run on a throwaway blocking task.
#[derive(Debug, Clone)]
pub struct SoundPlayer {
    path: PathBuf,
}

impl SoundPlayer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        if !self.path.exists() {
            return Err(PlaybackError::FileNotFound(self.path.clone()));
        }
        let file = File::open(&self.path)?;

        let stream = rodio::OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;
        let sink = rodio::play(stream.mixer(), BufReader::new(file))
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;
        sink.sleep_until_end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_reported() {
        let dir = tempdir().unwrap();
        let player = SoundPlayer::new(dir.path().join("nope.mp3"));

        let err = player.play().unwrap_err();
        assert!(matches!(err, PlaybackError::FileNotFound(_)));
    }
}
