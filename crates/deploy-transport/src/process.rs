//! Live capture of child process output
//!
//! Shared by the SSH transport and by local command execution: stdout and
//! stderr are read on separate threads and merged in arrival order.

use std::io::{self, BufRead, BufReader, Read};
use std::process::Child;
use std::sync::mpsc;
use std::thread;

use crate::LineSink;

/// Wait for `child`, forwarding output lines to `on_line` as they arrive
///
/// Returns the exit code and the interleaved output. The child should have
/// been spawned with piped stdout and stderr; a stream that is not piped is
/// simply not captured.
pub fn capture(mut child: Child, on_line: Option<&LineSink<'_>>) -> io::Result<(i32, String)> {
    let (tx, rx) = mpsc::channel::<String>();

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, tx.clone()));
    }
    drop(tx);

    let mut output = String::new();
    for line in rx {
        if let Some(sink) = on_line {
            sink(&line);
        }
        output.push_str(&line);
        output.push('\n');
    }

    for reader in readers {
        let _ = reader.join();
    }

    let status = child.wait()?;
    Ok((status.code().unwrap_or(-1), output))
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for chunk in reader.split(b'\n') {
            let Ok(bytes) = chunk else { break };
            let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::sync::Mutex;

    fn spawn(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_capture_merges_streams_and_exit_code() {
        let child = spawn("echo out; echo err 1>&2; exit 3");
        let (code, output) = capture(child, None).unwrap();

        assert_eq!(code, 3);
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[test]
    fn test_capture_forwards_lines() {
        let seen = Mutex::new(Vec::new());
        let sink = |line: &str| seen.lock().unwrap().push(line.to_string());

        let child = spawn("printf 'a\\nb\\n'");
        let (code, _) = capture(child, Some(&sink)).unwrap();

        assert_eq!(code, 0);
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_capture_empty_output_is_success() {
        let (code, output) = capture(spawn("true"), None).unwrap();
        assert_eq!(code, 0);
        assert!(output.is_empty());
    }
}
