//! Frame reader for run event streams.
//!
//! Accepts the two wire shapes the server side of the ecosystem emits:
//! newline-delimited JSON (one frame per line) and SSE-style `data:`
//! lines terminated by a blank line. The reader enforces the frame
//! contract — positive ids, non-empty run id, strictly increasing order —
//! and tracks the last seen id so a consumer can reconnect with it as the
//! cursor.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use rg_domain::event::StreamFrame;

#[derive(thiserror::Error, Debug)]
pub enum ReaderError {
    #[error("frame parse error: {0}")]
    Parse(String),

    #[error("invalid frame: {0}")]
    Invalid(String),

    #[error("ordering violation: frame id {got} after {last}")]
    Ordering { last: i64, got: i64 },

    #[error("stream read: {0}")]
    Io(#[from] std::io::Error),
}

pub struct EventStreamReader<R> {
    reader: R,
    last_id: i64,
}

impl<R: AsyncBufRead + Unpin> EventStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_cursor(reader, 0)
    }

    /// Resume a stream: every frame must carry `id > cursor`.
    pub fn with_cursor(reader: R, cursor: i64) -> Self {
        Self {
            reader,
            last_id: cursor.max(0),
        }
    }

    /// The last seen frame id — pass as `cursor` when reconnecting.
    pub fn cursor(&self) -> i64 {
        self.last_id
    }

    /// Next frame, or `None` at end of stream.
    pub async fn next(&mut self) -> Result<Option<StreamFrame>, ReaderError> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            let line = line.trim();

            // Blank lines terminate SSE blocks; comments and non-data SSE
            // fields carry no frames.
            if line.is_empty()
                || line.starts_with(':')
                || line.starts_with("event:")
                || line.starts_with("id:")
                || line.starts_with("retry:")
            {
                continue;
            }

            let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
            let frame: StreamFrame = serde_json::from_str(payload)
                .map_err(|e| ReaderError::Parse(format!("{e}: {payload:?}")))?;

            if frame.id <= 0 {
                return Err(ReaderError::Invalid(format!(
                    "frame id must be positive, got {}",
                    frame.id
                )));
            }
            if frame.event.run_id.is_empty() {
                return Err(ReaderError::Invalid("frame with empty run_id".into()));
            }
            if frame.id <= self.last_id {
                return Err(ReaderError::Ordering {
                    last: self.last_id,
                    got: frame.id,
                });
            }
            self.last_id = frame.id;
            return Ok(Some(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rg_domain::event::{Event, EventType};
    use tokio::io::BufReader;

    fn frame_json(id: i64, run_id: &str) -> String {
        serde_json::to_string(&StreamFrame {
            id,
            event: Event::new(run_id, 1, EventType::RunCheckpoint),
        })
        .unwrap()
    }

    fn reader(input: String) -> EventStreamReader<BufReader<std::io::Cursor<Vec<u8>>>> {
        EventStreamReader::new(BufReader::new(std::io::Cursor::new(input.into_bytes())))
    }

    #[tokio::test]
    async fn reads_ndjson_frames_in_order() {
        let input = format!(
            "{}\n{}\n{}\n",
            frame_json(1, "run-1"),
            frame_json(2, "run-1"),
            frame_json(3, "run-1"),
        );
        let mut r = reader(input);

        assert_eq!(r.next().await.unwrap().unwrap().id, 1);
        assert_eq!(r.next().await.unwrap().unwrap().id, 2);
        assert_eq!(r.next().await.unwrap().unwrap().id, 3);
        assert!(r.next().await.unwrap().is_none());
        assert_eq!(r.cursor(), 3);
    }

    #[tokio::test]
    async fn reads_sse_style_data_lines() {
        let input = format!(
            "event: frame\ndata: {}\n\nretry: 500\ndata: {}\n\n",
            frame_json(1, "run-1"),
            frame_json(2, "run-1"),
        );
        let mut r = reader(input);

        assert_eq!(r.next().await.unwrap().unwrap().id, 1);
        assert_eq!(r.next().await.unwrap().unwrap().id, 2);
        assert!(r.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn comments_and_blank_lines_are_skipped() {
        let input = format!(": keep-alive\n\n\n{}\n", frame_json(1, "run-1"));
        let mut r = reader(input);
        assert_eq!(r.next().await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let mut r = reader("{not json}\n".to_string());
        assert!(matches!(r.next().await, Err(ReaderError::Parse(_))));
    }

    #[tokio::test]
    async fn nonpositive_id_is_invalid() {
        let mut r = reader(format!("{}\n", frame_json(0, "run-1")));
        assert!(matches!(r.next().await, Err(ReaderError::Invalid(_))));

        let mut r = reader(format!("{}\n", frame_json(-3, "run-1")));
        assert!(matches!(r.next().await, Err(ReaderError::Invalid(_))));
    }

    #[tokio::test]
    async fn empty_run_id_is_invalid() {
        let mut r = reader(format!("{}\n", frame_json(1, "")));
        assert!(matches!(r.next().await, Err(ReaderError::Invalid(_))));
    }

    #[tokio::test]
    async fn id_regression_is_fatal() {
        let input = format!("{}\n{}\n", frame_json(2, "run-1"), frame_json(2, "run-1"));
        let mut r = reader(input);
        r.next().await.unwrap();
        assert!(matches!(
            r.next().await,
            Err(ReaderError::Ordering { last: 2, got: 2 })
        ));
    }

    #[tokio::test]
    async fn gapped_ids_are_accepted() {
        // History pruning means a resumed stream may legitimately skip ids.
        let input = format!("{}\n{}\n", frame_json(1, "run-1"), frame_json(5, "run-1"));
        let mut r = reader(input);
        assert_eq!(r.next().await.unwrap().unwrap().id, 1);
        assert_eq!(r.next().await.unwrap().unwrap().id, 5);
    }

    #[tokio::test]
    async fn cursor_resume_rejects_already_seen_frames() {
        let input = format!("{}\n", frame_json(6, "run-1"));
        let mut r = EventStreamReader::with_cursor(
            BufReader::new(std::io::Cursor::new(input.into_bytes())),
            6,
        );
        assert!(matches!(
            r.next().await,
            Err(ReaderError::Ordering { last: 6, got: 6 })
        ));

        let input = format!("{}\n", frame_json(7, "run-1"));
        let mut r = EventStreamReader::with_cursor(
            BufReader::new(std::io::Cursor::new(input.into_bytes())),
            6,
        );
        assert_eq!(r.next().await.unwrap().unwrap().id, 7);
    }
}
