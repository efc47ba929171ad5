/// Functions and structs for locating and running external tools

use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::debug;
use tokio::process::Command;

use crate::config::defs::{Config, OptionError, ToolError};

/// Captured output of a tool that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// First executable named `name` in PATH.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Resolves a tool's executable: the configured override first, then PATH.
///
/// # Arguments
///
/// * `tool` - Tool tag, e.g. `usearch`.
/// * `config` - Pipeline configuration carrying per-tool overrides.
///
/// # Returns
/// Path of the executable, or an OptionError naming the missing tool.
pub fn locate_tool(tool: &str, config: &Config) -> Result<PathBuf, OptionError> {
    if let Some(path) = config.tool_paths.get(tool) {
        if is_executable(path) {
            return Ok(path.clone());
        }
        return Err(OptionError(format!(
            "{}: configured executable {} is missing or not executable",
            tool,
            path.display()
        )));
    }
    find_in_path(tool).ok_or_else(|| OptionError(format!("Required tool not found in PATH: {}", tool)))
}

/// Runs a tool to completion, capturing stdout and stderr.
///
/// # Arguments
///
/// * `tool` - Tool tag used in error messages.
/// * `program` - Executable path.
/// * `args` - Argument vector.
///
/// # Returns
/// ToolOutput on exit status 0, otherwise ToolError with the command line and stderr.
pub async fn run_tool(tool: &str, program: &Path, args: &[String]) -> Result<ToolOutput, ToolError> {
    let command_line = std::iter::once(program.display().to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("Running {}: {}", tool, command_line);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ToolError {
            tool: tool.to_string(),
            command_line: command_line.clone(),
            code: None,
            stderr: format!("Failed to spawn {}: {}", tool, e),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(ToolError {
            tool: tool.to_string(),
            command_line,
            code: output.status.code(),
            stderr,
        });
    }
    Ok(ToolOutput { stdout, stderr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_tool() {
        assert!(find_in_path("sh").is_some());
        let err = locate_tool("definitely_not_a_tool_xyz", &Config::default()).unwrap_err();
        assert!(err.to_string().contains("definitely_not_a_tool_xyz"));

        let config = Config::default().with_tool("usearch", "/nonexistent/usearch");
        assert!(locate_tool("usearch", &config).is_err());
    }

    #[tokio::test]
    async fn test_run_tool_status() {
        let sh = find_in_path("sh").unwrap();
        let ok = run_tool("sh", &sh, &["-c".into(), "echo hi".into()]).await.unwrap();
        assert_eq!(ok.stdout, "hi\n");

        let err = run_tool("sh", &sh, &["-c".into(), "echo bad >&2; exit 3".into()])
            .await
            .unwrap_err();
        assert_eq!(err.code, Some(3));
        assert_eq!(err.stderr, "bad\n");
        assert!(err.command_line.ends_with("-c echo bad >&2; exit 3"));
    }
}
