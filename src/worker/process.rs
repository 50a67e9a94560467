//! Subprocess resolution and execution (spec §4.4.3).
//!
//! Ported from `original_source/services/worker_service.py::execute_job`.
//! The extension→command table is unchanged; `sys.executable` has no Rust
//! analogue, so the interpreter is `Config::script_interpreter` instead.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::model::LogStatus;

pub struct ExecutionOutcome {
    pub status: LogStatus,
    pub log_output: String,
}

/// Splits `script_args` on whitespace, honoring single/double-quoted
/// segments, same tokenization a shell would apply but without any
/// expansion (spec §4.4.3 "no shell-metacharacter expansion outside the
/// deliberate tokenization of script_args").
pub fn tokenize_args(script_args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = script_args.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Resolves the command and base arguments for `script_path` by extension
/// (spec §4.4.3).
fn resolve_command(script_path: &str, interpreter: &str) -> (String, Vec<String>) {
    match Path::new(script_path).extension().and_then(|e| e.to_str()) {
        Some("py") => (interpreter.to_string(), vec![script_path.to_string()]),
        Some("sh") => ("/bin/bash".to_string(), vec![script_path.to_string()]),
        Some("bat") => ("cmd.exe".to_string(), vec!["/c".to_string(), script_path.to_string()]),
        _ => (script_path.to_string(), Vec::new()),
    }
}

/// Runs `script_path` with `script_args` and a hard wall-clock timeout.
/// Never returns `Err`: every failure mode maps to an [`ExecutionOutcome`]
/// per spec §4.4.3's outcome table.
pub async fn execute(
    script_path: &str,
    script_args: Option<&str>,
    interpreter: &str,
    timeout: Duration,
) -> ExecutionOutcome {
    if !Path::new(script_path).exists() {
        let message = format!("Script not found: {script_path}");
        tracing::error!(script_path, "{message}");
        return ExecutionOutcome {
            status: LogStatus::Error,
            log_output: message,
        };
    }

    let (command, mut args) = resolve_command(script_path, interpreter);
    if let Some(raw_args) = script_args {
        args.extend(tokenize_args(raw_args));
    }

    let mut child = match Command::new(&command)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            let message = format!("Execution error: {err}");
            tracing::error!(script_path, "{message}");
            return ExecutionOutcome {
                status: LogStatus::Error,
                log_output: message,
            };
        }
    };

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    // Both pipes must be drained concurrently: a child that fills its stderr
    // buffer while we're still blocked reading stdout to EOF would otherwise
    // deadlock against us.
    let run = async {
        let stdout_fut = async move {
            let mut stdout = String::new();
            if let Some(mut out) = stdout_handle.take() {
                let _ = out.read_to_string(&mut stdout).await;
            }
            stdout
        };
        let stderr_fut = async move {
            let mut stderr = String::new();
            if let Some(mut err) = stderr_handle.take() {
                let _ = err.read_to_string(&mut stderr).await;
            }
            stderr
        };
        let (stdout, stderr) = tokio::join!(stdout_fut, stderr_fut);
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok((status, stdout, stderr))) => {
            let mut log_output = format!("STDOUT:\n{stdout}\n\nSTDERR:\n{stderr}");
            if status.success() {
                ExecutionOutcome {
                    status: LogStatus::Success,
                    log_output,
                }
            } else {
                let code = status.code().unwrap_or(-1);
                log_output.push_str(&format!("\n\nExit Code: {code}"));
                ExecutionOutcome {
                    status: LogStatus::Failure,
                    log_output,
                }
            }
        }
        Ok(Err(err)) => ExecutionOutcome {
            status: LogStatus::Error,
            log_output: format!("Execution error: {err}"),
        },
        Err(_) => {
            // `kill_on_drop` sends SIGKILL to the child when `run` (and the
            // `Child` it owns) is dropped here.
            ExecutionOutcome {
                status: LogStatus::Failure,
                log_output: format!("Execution timed out after {} seconds", timeout.as_secs()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_python_interpreter_for_py_scripts() {
        let (cmd, args) = resolve_command("/scripts/job.py", "python3");
        assert_eq!(cmd, "python3");
        assert_eq!(args, vec!["/scripts/job.py".to_string()]);
    }

    #[test]
    fn resolves_bash_for_sh_scripts() {
        let (cmd, args) = resolve_command("/scripts/job.sh", "python3");
        assert_eq!(cmd, "/bin/bash");
        assert_eq!(args, vec!["/scripts/job.sh".to_string()]);
    }

    #[test]
    fn resolves_cmd_for_bat_scripts() {
        let (cmd, args) = resolve_command("C:\\scripts\\job.bat", "python3");
        assert_eq!(cmd, "cmd.exe");
        assert_eq!(args, vec!["/c".to_string(), "C:\\scripts\\job.bat".to_string()]);
    }

    #[test]
    fn direct_execution_for_unknown_extension() {
        let (cmd, args) = resolve_command("/scripts/job.bin", "python3");
        assert_eq!(cmd, "/scripts/job.bin");
        assert!(args.is_empty());
    }

    #[test]
    fn tokenizes_quoted_arguments() {
        let tokens = tokenize_args(r#"--name "hello world" -v"#);
        assert_eq!(tokens, vec!["--name", "hello world", "-v"]);
    }

    #[tokio::test]
    async fn missing_script_maps_to_error() {
        let outcome = execute("/nonexistent/script.py", None, "python3", Duration::from_secs(5)).await;
        assert_eq!(outcome.status, LogStatus::Error);
        assert!(outcome.log_output.contains("Script not found"));
    }

    #[tokio::test]
    async fn slow_script_is_killed_on_timeout() {
        let script = "/tmp/triggerd-process-slow-test.sh";
        std::fs::write(script, "#!/bin/bash\nsleep 5\necho done\n").unwrap();
        let mut perms = std::fs::metadata(script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(script, perms).unwrap();

        let outcome = execute(script, None, "python3", Duration::from_millis(200)).await;
        assert_eq!(outcome.status, LogStatus::Failure);
        assert!(outcome.log_output.contains("timed out after"));

        let _ = std::fs::remove_file(script);
    }
}
