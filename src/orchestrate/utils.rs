use super::install::TOKEN_ENV;
use crate::chain::Error;
use crate::transport::{ExecOutput, RemoteShell};

/// Runs a script and promotes a non-zero exit into a task failure carrying
/// the command, exit code, and trimmed stderr.
pub async fn run_checked(
    shell: &dyn RemoteShell,
    node: &str,
    script: &str,
) -> Result<ExecOutput, Error> {
    let output = shell.exec(node, script).await?;
    if !output.success() {
        let stderr = if output.timed_out {
            "command timed out".to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(Error::RemoteTaskFailed {
            node: node.to_string(),
            command: scrub(script),
            code: output.exit_code.unwrap_or(-1),
            stderr,
        });
    }
    Ok(output)
}

/// The failing command ends up in logs and in the run report, and the agent
/// join command carries the cluster token as an env assignment. Mask the
/// value before the command leaves this module.
fn scrub(script: &str) -> String {
    let needle = format!("{}=", TOKEN_ENV);
    let mut out = String::new();
    let mut rest = script;
    while let Some(at) = rest.find(&needle) {
        let value_at = at + needle.len();
        out.push_str(&rest[..value_at]);
        out.push_str("<redacted>");
        let tail = &rest[value_at..];
        let value_end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        rest = &tail[value_end..];
    }
    out.push_str(rest);
    out
}
