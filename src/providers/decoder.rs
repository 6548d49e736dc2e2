//! Provider backed by an external decoder process
//!
//! The decoder (ffmpeg by default) converts the configured input into a stream of
//! concatenated JPEG images on its stdout. Its stderr is forwarded to `trace!`.
//! When stdout closes the exit status is logged and the provider ends; restarting
//! the decoder is left to whatever supervises this process.

use futures::StreamExt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::codec::FramedRead;
use tracing::{error, info, trace, warn};

use crate::config::SourceConfig;
use crate::extract::FrameExtractor;
use crate::provider::Provider;
use crate::types::Frame;
use crate::{RelayError, Result};

/// Command line for the external decoder
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderCommand {
    pub program: String,
    pub input: String,
    pub loop_input: bool,
    pub fps: u32,
    pub quality: u32,
}

impl DecoderCommand {
    pub fn from_config(source: &SourceConfig) -> Self {
        Self {
            program: source.decoder_program.clone(),
            input: source.input.clone(),
            loop_input: source.loop_input,
            fps: source.fps,
            quality: source.quality,
        }
    }

    /// Arguments producing an MJPEG image pipe on stdout
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(14);
        if self.loop_input {
            args.extend(["-stream_loop".to_string(), "-1".to_string()]);
        }
        args.extend([
            "-i".to_string(),
            self.input.clone(),
            "-r".to_string(),
            self.fps.to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-qscale".to_string(),
            self.quality.to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
            "-".to_string(),
        ]);
        args
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args());
        command
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.program, self.args().join(" "))
    }
}

/// Provider reading frames from a spawned decoder's stdout
pub struct DecoderProvider {
    child: Child,
    frames: FramedRead<ChildStdout, FrameExtractor>,
    description: String,
    finished: bool,
}

impl DecoderProvider {
    /// Spawn the configured decoder
    pub fn spawn(decoder: &DecoderCommand, chunk_size: usize) -> Result<Self> {
        Self::spawn_command(decoder.command(), decoder.describe(), chunk_size)
    }

    /// Spawn an arbitrary command whose stdout carries concatenated JPEG images
    pub fn spawn_command(
        mut command: Command,
        description: impl Into<String>,
        chunk_size: usize,
    ) -> Result<Self> {
        let description = description.into();

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let reason = format!("failed to spawn `{description}`");
                RelayError::decoder_failed_with_source(reason, e)
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::decoder_failed("decoder stdout was not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        info!(pid = child.id(), "Spawned decoder: {}", description);

        let frames = FramedRead::with_capacity(stdout, FrameExtractor::new(), chunk_size.max(1));
        Ok(Self { child, frames, description, finished: false })
    }

    /// OS process id, while the decoder is running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn reap(&mut self) {
        self.finished = true;
        match self.child.wait().await {
            Ok(status) if status.success() => info!("Decoder exited: {}", status),
            Ok(status) => error!("Decoder exited with {}", status),
            Err(e) => error!("Failed to collect decoder exit status: {}", e),
        }
    }
}

#[async_trait::async_trait]
impl Provider for DecoderProvider {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(RelayError::File { source, .. })) => {
                self.reap().await;
                Err(RelayError::decoder_failed_with_source("reading decoder stdout failed", source))
            }
            Some(Err(e)) => Err(e),
            None => {
                self.reap().await;
                Ok(None)
            }
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => trace!(target: "framecast::decoder", "{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!("Decoder stderr unreadable: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_line() {
        let command = DecoderCommand::from_config(&SourceConfig::default());
        assert_eq!(
            command.args(),
            vec![
                "-stream_loop", "-1", "-i", "sample2.mp4", "-r", "5", "-f", "image2pipe",
                "-qscale", "5", "-vcodec", "mjpeg", "-",
            ]
        );
        assert!(command.describe().starts_with("ffmpeg -stream_loop"));
    }

    #[test]
    fn single_pass_input_has_no_loop_flag() {
        let source = SourceConfig { loop_input: false, fps: 10, ..SourceConfig::default() };
        let args = DecoderCommand::from_config(&source).args();
        assert_eq!(&args[..2], &["-i", "sample2.mp4"]);
        assert!(args.contains(&"10".to_string()));
    }

    #[tokio::test]
    async fn missing_program_is_a_decoder_error() {
        let decoder = DecoderCommand {
            program: "framecast-no-such-decoder".to_string(),
            ..DecoderCommand::from_config(&SourceConfig::default())
        };
        match DecoderProvider::spawn(&decoder, 1024) {
            Err(e @ RelayError::Decoder { .. }) => assert!(!e.is_retryable()),
            Err(e) => panic!("Expected Decoder error, got {e}"),
            Ok(_) => panic!("Spawning a missing program should fail"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_frames_until_process_exits() {
        let mut command = Command::new("sh");
        command.arg("-c").arg(r"printf '\377\330ab\377\331\377\330c\377\331'");

        let mut provider = DecoderProvider::spawn_command(command, "printf", 64).unwrap();

        let first = provider.next_frame().await.unwrap().unwrap();
        let second = provider.next_frame().await.unwrap().unwrap();
        assert_eq!(first.as_bytes(), &[0xFF, 0xD8, b'a', b'b', 0xFF, 0xD9]);
        assert_eq!(second.len(), 5);

        assert!(provider.next_frame().await.unwrap().is_none());
        assert!(provider.next_frame().await.unwrap().is_none());
    }
}
