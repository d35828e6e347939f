use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};

/// Pipes `input` through an external program and returns its stdout.
///
/// Stdin is fed from a separate thread so a tool that starts writing before
/// it has read everything cannot deadlock against us.
pub(crate) fn pipe_through(program: &str, args: &[String], input: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("couldn't start `{program}`, is it installed and on PATH?"))?;

    let mut stdin = child.stdin.take().context("stdin was not captured")?;
    let input = input.to_vec();
    let writer = std::thread::spawn(move || stdin.write_all(&input));

    let output = child.wait_with_output()?;

    let written = writer.join();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("`{program}` exited with {}:\n{}", output.status, stderr.trim());
    }

    match written {
        Ok(result) => result?,
        Err(_) => bail!("writer thread for `{program}` panicked"),
    }

    Ok(output.stdout)
}
