// src/utils/mail.rs: run notifications through the host `mail` program

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};

use crate::config::defs::MAIL_TAG;
use crate::utils::command::find_in_path;

/// Sends `body` to `to` with `mail -s subject to`.
///
/// # Arguments
///
/// * `to` - Recipient address.
/// * `subject` - Subject line.
/// * `body` - Message text, written to mail's stdin.
///
/// # Returns
/// Result<()>
pub fn send_mail(to: &str, subject: &str, body: &str) -> Result<()> {
    let program = find_in_path(MAIL_TAG).ok_or_else(|| anyhow!("{} not found in PATH", MAIL_TAG))?;
    let mut child = Command::new(program)
        .arg("-s")
        .arg(subject)
        .arg(to)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", MAIL_TAG))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(body.as_bytes()).context("Failed to write mail body")?;
    }
    let output = child.wait_with_output().context("Failed to wait for mail")?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} exited with {}: {}",
            MAIL_TAG,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}
