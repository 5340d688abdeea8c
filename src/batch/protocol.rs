//! Wire protocol for stay-open exiftool workers.
//!
//! Commands are newline-separated argument lists followed by an execute
//! directive. The tool answers each command with one output block on stdout,
//! terminated by a sentinel line (`{ready}`). Blocks arrive in the order the
//! commands were written; nothing else correlates them.

use crate::error::{ExifBatchError, Result};
use crate::paths;
use std::path::PathBuf;

/// Default end-of-response marker printed by `-execute`.
pub const DEFAULT_SENTINEL: &str = "{ready}";

/// How to launch and talk to one family of batch-mode tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProtocol {
    /// Executable to launch.
    pub program: PathBuf,
    /// Arguments that put the tool into batch mode.
    pub launch_args: Vec<String>,
    /// Line that marks the end of one response block.
    pub sentinel: String,
    /// Directive appended to every command to flush output and print the sentinel.
    pub execute_directive: String,
    /// Lines that end the session once pending commands are drained.
    pub exit_command: Vec<String>,
    /// Command used as the health probe right after spawn.
    pub version_args: Vec<String>,
}

impl Default for ToolProtocol {
    fn default() -> Self {
        Self::exiftool(paths::exiftool_path())
    }
}

impl ToolProtocol {
    /// Protocol for exiftool's `-stay_open True -@ -` mode.
    pub fn exiftool(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            launch_args: vec![
                "-stay_open".to_string(),
                "True".to_string(),
                "-@".to_string(),
                "-".to_string(),
            ],
            sentinel: DEFAULT_SENTINEL.to_string(),
            execute_directive: "-execute".to_string(),
            exit_command: vec!["-stay_open".to_string(), "False".to_string()],
            version_args: vec!["-ver".to_string()],
        }
    }

    /// Prepend arguments before the batch-mode flags (e.g. a script path when
    /// `program` is an interpreter).
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut leading: Vec<String> = args.into_iter().map(Into::into).collect();
        leading.append(&mut self.launch_args);
        self.launch_args = leading;
        self
    }

    /// Encode one command: every argument on its own line, then the execute directive.
    ///
    /// An argument containing a line break would be split into two arguments
    /// by the tool and shift every later response, so it is rejected.
    pub fn encode_command(&self, args: &[String]) -> Result<String> {
        let mut out = String::with_capacity(args.iter().map(|a| a.len() + 1).sum::<usize>() + 16);
        for arg in args {
            if arg.contains('\n') || arg.contains('\r') {
                return Err(ExifBatchError::InvalidArgument(format!(
                    "argument contains a line break: {:?}",
                    arg
                )));
            }
            out.push_str(arg);
            out.push('\n');
        }
        out.push_str(&self.execute_directive);
        out.push('\n');
        Ok(out)
    }

    /// Encode the end-of-session command.
    pub fn encode_exit(&self) -> String {
        let mut out = self.exit_command.join("\n");
        out.push('\n');
        out
    }
}

/// Accumulates stdout chunks and splits them into sentinel-terminated blocks.
///
/// The sentinel must occupy a whole line. Where chunk boundaries fall never
/// changes which blocks come out.
#[derive(Debug)]
pub struct ResponseBuffer {
    sentinel: String,
    buf: String,
    /// Byte offset up to which complete lines have already been checked.
    scanned: usize,
}

impl ResponseBuffer {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            buf: String::new(),
            scanned: 0,
        }
    }

    /// Append a chunk and return every block it completed, oldest first.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut blocks = Vec::new();

        while let Some(nl) = self.buf[self.scanned..].find('\n') {
            let line_start = self.scanned;
            let line_end = line_start + nl;
            let line = self.buf[line_start..line_end].trim_end_matches('\r');

            if line == self.sentinel {
                let block = self.buf[..line_start]
                    .strip_suffix('\n')
                    .map(|b| b.strip_suffix('\r').unwrap_or(b))
                    .unwrap_or(&self.buf[..line_start])
                    .to_string();
                self.buf.drain(..=line_end);
                self.scanned = 0;
                blocks.push(block);
            } else {
                self.scanned = line_end + 1;
            }
        }

        blocks
    }

    /// Bytes received since the last complete block.
    pub fn partial(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop any partial block.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}
