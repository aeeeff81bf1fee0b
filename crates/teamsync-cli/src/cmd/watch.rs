use anyhow::{bail, Context};
use futures::StreamExt;
use std::path::Path;
use teamsync_core::config::Config;
use teamsync_core::StorePath;

pub fn run(
    root: &Path,
    path: &str,
    url: Option<&str>,
    count: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let path = StorePath::parse(path)?;
    let base = match url {
        Some(u) => u.trim_end_matches('/').to_string(),
        None => {
            let config = Config::load(root).context("failed to load teamsync.yaml")?;
            format!("http://localhost:{}", config.server.port)
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let response = reqwest::Client::new()
            .get(format!("{base}/api/subscribe"))
            .query(&[("path", path.to_string())])
            .send()
            .await
            .with_context(|| format!("failed to connect to {base}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("server returned {status}: {body}");
        }
        tracing::info!(path = %path, "watching {base}");

        let mut parser = SseParser::default();
        let mut stream = response.bytes_stream();
        let mut seen = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("connection to server lost")?;
            for event in parser.feed(&chunk) {
                if event.event != "snapshot" {
                    continue;
                }
                print_snapshot(&event.data, json)?;
                seen += 1;
                if count.is_some_and(|n| seen >= n) {
                    return Ok(());
                }
            }
        }
        Ok(())
    })
}

fn print_snapshot(data: &str, json: bool) -> anyhow::Result<()> {
    let snapshot: serde_json::Value =
        serde_json::from_str(data).context("server sent a malformed snapshot")?;
    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
        return Ok(());
    }
    let value = match &snapshot["value"] {
        serde_json::Value::Null => "(absent)".to_string(),
        v => serde_json::to_string_pretty(v)?,
    };
    println!(
        "[rev {}] {}: {}",
        snapshot["revision"],
        snapshot["path"].as_str().unwrap_or("?"),
        value
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// SSE framing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split events anywhere.
#[derive(Default)]
struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..pos])) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_split_events() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: snapshot\ndata: {\"rev").is_empty());
        let events = parser.feed(b"ision\":1}\n\n:keep-alive\n\nevent: snapshot\r\ndata: 2\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "snapshot".into(),
                    data: "{\"revision\":1}".into()
                },
                SseEvent {
                    event: "snapshot".into(),
                    data: "2".into()
                },
            ]
        );
    }

    #[test]
    fn multi_line_data_is_joined() {
        let event = parse_block("data: a\ndata: b").unwrap();
        assert_eq!(event.event, "message");
        assert_eq!(event.data, "a\nb");
    }

    #[test]
    fn comment_only_block_is_skipped() {
        assert_eq!(parse_block(": ping"), None);
    }
}
