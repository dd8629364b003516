//! Operator console.
//!
//! Reads one command per line:
//!
//! | input          | action                       |
//! |----------------|------------------------------|
//! | `/b <pattern>` | block a host or URL pattern  |
//! | `/u <pattern>` | unblock an exact pattern     |
//! | `/sb`          | show blocked patterns        |
//! | `/sc`          | show cached URLs             |
//! | `/cc`          | clear the cache              |
//! | `/ss`          | show cache savings           |
//!
//! Output is written for a human at a terminal; it is not logging.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::blocklist::{BlockOutcome, UnblockOutcome};
use crate::control::ProxyControl;

const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Block(String),
    Unblock(String),
    ShowBlocked,
    ShowCached,
    ClearCache,
    ShowStats,
    Empty,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("invalid command: {0}")]
    Unknown(String),

    #[error("{0} needs a pattern")]
    MissingPattern(&'static str),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Empty);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            "/b" => pattern_arg("/b", rest).map(Command::Block),
            "/u" => pattern_arg("/u", rest).map(Command::Unblock),
            "/sb" if rest.is_empty() => Ok(Command::ShowBlocked),
            "/sc" if rest.is_empty() => Ok(Command::ShowCached),
            "/cc" if rest.is_empty() => Ok(Command::ClearCache),
            "/ss" if rest.is_empty() => Ok(Command::ShowStats),
            _ => Err(ConsoleError::Unknown(line.to_string())),
        }
    }
}

fn pattern_arg(word: &'static str, rest: &str) -> Result<String, ConsoleError> {
    if rest.is_empty() {
        Err(ConsoleError::MissingPattern(word))
    } else {
        Ok(rest.to_string())
    }
}

/// Run `command` and render the operator-facing report.
pub fn execute(control: &ProxyControl, command: Command) -> String {
    match command {
        Command::Block(pattern) => match control.block(&pattern) {
            BlockOutcome::Added => format!("{INDENT}blocked {pattern}"),
            BlockOutcome::AlreadyBlocked => format!("{INDENT}{pattern} is already blocked"),
            BlockOutcome::Rejected => format!("{INDENT}refusing to block an empty pattern"),
        },
        Command::Unblock(pattern) => match control.unblock(&pattern) {
            UnblockOutcome::Removed => format!("{INDENT}unblocked {pattern}"),
            UnblockOutcome::NotBlocked => format!("{INDENT}{pattern} is not blocked"),
        },
        Command::ShowBlocked => render_list("blocked sites:", &control.list_blocked()),
        Command::ShowCached => render_list("cached sites:", &control.list_cached()),
        Command::ClearCache => {
            control.clear_cache();
            format!("{INDENT}cache has been cleared")
        }
        Command::ShowStats => {
            let (bytes, ms) = control.savings();
            format!("{INDENT}{bytes} bytes and {ms} ms saved by proxy cache")
        }
        Command::Empty => format!("{INDENT}input a command"),
    }
}

fn render_list(title: &str, items: &[String]) -> String {
    let mut out = title.to_string();
    if items.is_empty() {
        out.push('\n');
        out.push_str(INDENT);
        out.push_str("none");
    }
    for item in items {
        out.push('\n');
        out.push_str(INDENT);
        out.push_str(item);
    }
    out
}

/// Read commands from `input` until EOF, writing each report to `output`.
pub async fn run<R, W>(control: ProxyControl, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let report = match Command::parse(&line) {
            Ok(command) => execute(&control, command),
            Err(e) => format!("{INDENT}{e}"),
        };
        output.write_all(report.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::Blocklist;
    use crate::cache::CacheStore;
    use crate::stats::ProxyStats;
    use bytes::Bytes;
    use std::sync::Arc;

    fn control() -> (ProxyControl, Arc<CacheStore>) {
        let stats = Arc::new(ProxyStats::new());
        let cache = Arc::new(CacheStore::new(Arc::clone(&stats), false));
        (
            ProxyControl::new(Arc::new(Blocklist::new()), Arc::clone(&cache), stats),
            cache,
        )
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("/b ads.example.com"),
            Ok(Command::Block("ads.example.com".to_string()))
        );
        assert_eq!(
            Command::parse("/u  example.com/ads "),
            Ok(Command::Unblock("example.com/ads".to_string()))
        );
        assert_eq!(Command::parse("/sb"), Ok(Command::ShowBlocked));
        assert_eq!(Command::parse("/sc"), Ok(Command::ShowCached));
        assert_eq!(Command::parse("/cc"), Ok(Command::ClearCache));
        assert_eq!(Command::parse("/ss"), Ok(Command::ShowStats));
        assert_eq!(Command::parse("   "), Ok(Command::Empty));
    }

    #[test]
    fn test_parse_rejects_unknown_and_bare() {
        assert_eq!(
            Command::parse("/x"),
            Err(ConsoleError::Unknown("/x".to_string()))
        );
        assert_eq!(
            Command::parse("/bexample.com"),
            Err(ConsoleError::Unknown("/bexample.com".to_string()))
        );
        assert_eq!(Command::parse("/b"), Err(ConsoleError::MissingPattern("/b")));
        assert_eq!(Command::parse("/u   "), Err(ConsoleError::MissingPattern("/u")));
        assert!(Command::parse("/ss now").is_err());
    }

    #[test]
    fn test_execute_block_reports() {
        let (control, _) = control();
        assert_eq!(
            execute(&control, Command::Block("a.com".into())),
            "    blocked a.com"
        );
        assert_eq!(
            execute(&control, Command::Block("a.com".into())),
            "    a.com is already blocked"
        );
        assert_eq!(
            execute(&control, Command::ShowBlocked),
            "blocked sites:\n    a.com"
        );
        assert_eq!(
            execute(&control, Command::Unblock("b.com".into())),
            "    b.com is not blocked"
        );
        assert_eq!(
            execute(&control, Command::Unblock("a.com".into())),
            "    unblocked a.com"
        );
        assert_eq!(
            execute(&control, Command::ShowBlocked),
            "blocked sites:\n    none"
        );
    }

    #[test]
    fn test_execute_cache_reports() {
        let (control, cache) = control();
        cache.put("http://a.local/", Bytes::from_static(b"hello"), 50);
        cache.get("http://a.local/");

        assert_eq!(
            execute(&control, Command::ShowCached),
            "cached sites:\n    http://a.local/"
        );
        assert_eq!(
            execute(&control, Command::ShowStats),
            "    10 bytes and 50 ms saved by proxy cache"
        );
        assert_eq!(
            execute(&control, Command::ClearCache),
            "    cache has been cleared"
        );
        assert!(!cache.has("http://a.local/"));
    }

    #[tokio::test]
    async fn test_run_processes_lines_until_eof() {
        let (control, _) = control();
        let input: &[u8] = b"/b tracker.io\n/oops\n/sb\n";
        let mut output = Vec::new();

        run(control.clone(), input, &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert_eq!(
            text,
            "    blocked tracker.io\n    invalid command: /oops\nblocked sites:\n    tracker.io\n"
        );
        assert!(control.is_blocked("tracker.io"));
    }
}
