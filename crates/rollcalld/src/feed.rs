//! Frame feed from the external face-embedding provider.
//!
//! One JSON document per line, one line per camera frame:
//!
//! ```text
//! {"faces":[{"location":{"top":10,"right":60,"bottom":70,"left":5},"embedding":[0.01, ...]}]}
//! ```

use rollcall_core::ObservedFace;
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to read frame feed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame at feed line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Faces observed in one frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameCycle {
    #[serde(default)]
    pub faces: Vec<ObservedFace>,
}

type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;

enum LineSource {
    Reader(Lines<BoxedReader>),
    Channel(mpsc::Receiver<std::io::Result<String>>),
}

impl LineSource {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        match self {
            LineSource::Reader(lines) => lines.next_line().await,
            LineSource::Channel(rx) => rx.recv().await.transpose(),
        }
    }
}

/// Frame lines from the provider. Reads are cancel-safe.
pub struct FeedLines {
    source: LineSource,
    line: usize,
}

impl FeedLines {
    pub fn new(reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        let boxed: BoxedReader = Box::new(reader);
        Self {
            source: LineSource::Reader(boxed.lines()),
            line: 0,
        }
    }

    /// Lines pushed by a producer thread; the feed ends when every sender is dropped.
    pub fn from_channel(rx: mpsc::Receiver<std::io::Result<String>>) -> Self {
        Self {
            source: LineSource::Channel(rx),
            line: 0,
        }
    }

    /// Open a feed file, or stdin when `path` is `None`.
    pub async fn open(path: Option<&Path>) -> Result<Self, FeedError> {
        match path {
            Some(path) => {
                let file = tokio::fs::File::open(path).await?;
                tracing::info!(path = %path.display(), "reading frame feed");
                Ok(Self::new(BufReader::new(file)))
            }
            None => {
                tracing::info!("reading frame feed from stdin");
                Ok(Self::from_channel(spawn_stdin_reader()?))
            }
        }
    }

    /// Next frame, or `None` at end of feed. Blank lines are skipped.
    pub async fn next_cycle(&mut self) -> Result<Option<FrameCycle>, FeedError> {
        while let Some(raw) = self.source.next_line().await? {
            self.line += 1;
            if raw.trim().is_empty() {
                continue;
            }
            let cycle = serde_json::from_str(&raw).map_err(|source| FeedError::Malformed {
                line: self.line,
                source,
            })?;
            return Ok(Some(cycle));
        }
        Ok(None)
    }
}

/// Read stdin on a detached thread.
///
/// A blocking stdin read cannot be cancelled, so it must not live on the
/// runtime: shutdown would wait on it forever. The thread ends on EOF, on a
/// read error, or once the receiver is gone.
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<std::io::Result<String>>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Marks every Nth frame, starting with the first, for matching.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    every: u64,
    count: u64,
}

impl FrameSampler {
    pub fn new(every: u32) -> Self {
        Self {
            every: u64::from(every.max(1)),
            count: 0,
        }
    }

    pub fn next_is_sampled(&mut self) -> bool {
        let sampled = self.count % self.every == 0;
        self.count += 1;
        sampled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn feed(text: &str) -> FeedLines {
        FeedLines::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_reads_frames_and_skips_blank_lines() {
        let mut f = feed(
            "{\"faces\":[{\"embedding\":[0.1,0.2]}]}\n\n{\"faces\":[]}\n{}\n",
        );
        let first = f.next_cycle().await.unwrap().unwrap();
        assert_eq!(first.faces.len(), 1);
        assert_eq!(first.faces[0].embedding.values, vec![0.1, 0.2]);
        assert!(f.next_cycle().await.unwrap().unwrap().faces.is_empty());
        assert!(f.next_cycle().await.unwrap().unwrap().faces.is_empty());
        assert!(f.next_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_face_location() {
        let mut f = feed(
            r#"{"faces":[{"location":{"top":1,"right":2,"bottom":3,"left":4},"embedding":[0.0]}]}"#,
        );
        let cycle = f.next_cycle().await.unwrap().unwrap();
        let bbox = cycle.faces[0].location.unwrap();
        assert_eq!((bbox.top, bbox.left), (1.0, 4.0));
    }

    #[tokio::test]
    async fn test_malformed_line_reports_position() {
        let mut f = feed("{\"faces\":[]}\n\nnot json\n");
        f.next_cycle().await.unwrap();
        let err = f.next_cycle().await.unwrap_err();
        assert!(matches!(err, FeedError::Malformed { line: 3, .. }));
    }

    #[tokio::test]
    async fn test_channel_feed_ends_when_producer_hangs_up() {
        let (tx, rx) = mpsc::channel(4);
        let mut f = FeedLines::from_channel(rx);
        tx.send(Ok("{\"faces\":[{\"embedding\":[0.5]}]}".to_string())).await.unwrap();
        tx.send(Ok(String::new())).await.unwrap();
        drop(tx);

        let cycle = f.next_cycle().await.unwrap().unwrap();
        assert_eq!(cycle.faces[0].embedding.values, vec![0.5]);
        assert!(f.next_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_feed_read_can_be_abandoned() {
        let (tx, rx) = mpsc::channel(4);
        let mut f = FeedLines::from_channel(rx);

        // Nothing arrives: the pending read gives way to the other branch.
        let woke = tokio::select! {
            _ = f.next_cycle() => false,
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => true,
        };
        assert!(woke);

        tx.send(Ok("{}".to_string())).await.unwrap();
        assert!(f.next_cycle().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_channel_feed_surfaces_read_error() {
        let (tx, rx) = mpsc::channel(4);
        let mut f = FeedLines::from_channel(rx);
        tx.send(Err(std::io::Error::other("device gone"))).await.unwrap();
        assert!(matches!(f.next_cycle().await, Err(FeedError::Io(_))));
    }

    #[test]
    fn test_sampler_every_fifth_frame() {
        let mut s = FrameSampler::new(5);
        let picks: Vec<bool> = (0..11).map(|_| s.next_is_sampled()).collect();
        assert_eq!(
            picks,
            vec![true, false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn test_sampler_zero_means_every_frame() {
        let mut s = FrameSampler::new(0);
        assert!((0..3).all(|_| s.next_is_sampled()));
    }
}
