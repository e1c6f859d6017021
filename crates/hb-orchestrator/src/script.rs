//! Batch script rendering
//!
//! The script writes the connection descriptor to a temporary file on the
//! compute node and runs the command template with the file's path
//! substituted for `{connection_file}`.

use std::fmt::Write as _;

use hb_core::config::{ClusterTarget, CONNECTION_FILE_PLACEHOLDER};
use hb_core::error::PreconditionFailure;
use hb_core::types::JobSpec;
use hb_core::ConnectionDescriptor;

use crate::remote::shell_quote;

const HEREDOC_TAG: &str = "HB_CONNECTION_EOF";
const TMPFILE_REF: &str = "\"$tmpfile\"";

fn is_shell_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn single_line(what: &str, value: &str) -> Result<(), PreconditionFailure> {
    if value.contains('\n') || value.contains('\r') {
        return Err(PreconditionFailure::new(format!(
            "{what} must be a single line: {value:?}"
        )));
    }
    Ok(())
}

/// Quote one command argument, leaving the placeholder as a file reference
fn render_arg(arg: &str) -> String {
    arg.split(CONNECTION_FILE_PLACEHOLDER)
        .map(|part| {
            if part.is_empty() {
                String::new()
            } else {
                shell_quote(part)
            }
        })
        .collect::<Vec<_>>()
        .join(TMPFILE_REF)
}

/// Render the batch script for `spec` on `cluster`
pub fn render(
    spec: &JobSpec,
    cluster: &ClusterTarget,
    connection: &ConnectionDescriptor,
) -> Result<String, PreconditionFailure> {
    let command = spec.command.as_ref().unwrap_or(&cluster.command);
    if command.is_empty() || command.iter().all(|a| a.trim().is_empty()) {
        return Err(PreconditionFailure::new("command template is empty"));
    }

    let mut script = String::from("#!/bin/bash\n");

    for (key, value) in &spec.directives {
        single_line("directive", key)?;
        single_line("directive", value)?;
        let _ = writeln!(script, "#SBATCH --{key}={value}");
    }
    if let Some(dir) = spec.working_dir.as_deref().filter(|d| !d.is_empty()) {
        single_line("working directory", dir)?;
        let _ = writeln!(script, "#SBATCH --chdir={dir}");
    }

    for (key, value) in &cluster.env {
        if !is_shell_identifier(key) {
            return Err(PreconditionFailure::new(format!(
                "invalid environment variable name: {key:?}"
            )));
        }
        let _ = writeln!(script, "export {key}={}", shell_quote(value));
    }

    if !cluster.modules.is_empty() {
        let modules: Vec<String> = cluster.modules.iter().map(|m| shell_quote(m)).collect();
        let _ = writeln!(script, "module load {}", modules.join(" "));
    }

    let descriptor = serde_json::to_string_pretty(connection)
        .map_err(|e| PreconditionFailure::new(format!("connection descriptor: {e}")))?;
    script.push_str("tmpfile=$(mktemp)\n");
    let _ = writeln!(script, "cat > \"$tmpfile\" <<'{HEREDOC_TAG}'");
    script.push_str(&descriptor);
    script.push('\n');
    let _ = writeln!(script, "{HEREDOC_TAG}");

    let argv: Vec<String> = command.iter().map(|a| render_arg(a)).collect();
    script.push_str(&argv.join(" "));
    script.push('\n');

    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterTarget {
        let mut cluster = ClusterTarget::new("login.expanse.org", "alice");
        cluster.command = vec![
            "python".to_string(),
            "-m".to_string(),
            "ipykernel_launcher".to_string(),
            "-f".to_string(),
            CONNECTION_FILE_PLACEHOLDER.to_string(),
        ];
        cluster
    }

    #[test]
    fn test_render_full_script() {
        let mut cluster = cluster();
        cluster.env.insert("OMP_NUM_THREADS".to_string(), "4".to_string());
        cluster
            .env
            .insert("GREETING".to_string(), "hello world".to_string());
        cluster.modules = vec!["cpu".to_string(), "anaconda3".to_string()];

        let mut spec = JobSpec::default();
        spec.directives
            .insert("time".to_string(), "01:00:00".to_string());
        spec.directives
            .insert("partition".to_string(), "shared".to_string());
        spec.working_dir = Some("/home/alice".to_string());

        let mut connection = ConnectionDescriptor::new();
        connection.insert("shell_port", 50001);

        let script = render(&spec, &cluster, &connection).unwrap();
        let expected = "#!/bin/bash\n\
#SBATCH --partition=shared\n\
#SBATCH --time=01:00:00\n\
#SBATCH --chdir=/home/alice\n\
export GREETING='hello world'\n\
export OMP_NUM_THREADS=4\n\
module load cpu anaconda3\n\
tmpfile=$(mktemp)\n\
cat > \"$tmpfile\" <<'HB_CONNECTION_EOF'\n\
{\n  \"shell_port\": 50001\n}\n\
HB_CONNECTION_EOF\n\
python -m ipykernel_launcher -f \"$tmpfile\"\n";
        assert_eq!(script, expected);
    }

    #[test]
    fn test_spec_command_overrides_cluster() {
        let spec = JobSpec {
            command: Some(vec!["run.sh".to_string(), "--conn={connection_file}".to_string()]),
            ..JobSpec::default()
        };
        let script = render(&spec, &cluster(), &ConnectionDescriptor::new()).unwrap();
        assert!(script.ends_with("run.sh --conn=\"$tmpfile\"\n"));
        assert!(!script.contains("ipykernel_launcher"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = render(
            &JobSpec::default(),
            &ClusterTarget::new("login", "alice"),
            &ConnectionDescriptor::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn test_invalid_env_key_rejected() {
        let mut cluster = cluster();
        cluster
            .env
            .insert("BAD KEY".to_string(), "x".to_string());
        assert!(render(&JobSpec::default(), &cluster, &ConnectionDescriptor::new()).is_err());
    }

    #[test]
    fn test_multiline_directive_rejected() {
        let mut spec = JobSpec::default();
        spec.directives
            .insert("time".to_string(), "1:00\nrm -rf ~".to_string());
        assert!(render(&spec, &cluster(), &ConnectionDescriptor::new()).is_err());
    }

    #[test]
    fn test_shell_identifier() {
        assert!(is_shell_identifier("PATH"));
        assert!(is_shell_identifier("_x1"));
        assert!(!is_shell_identifier("1X"));
        assert!(!is_shell_identifier(""));
        assert!(!is_shell_identifier("A-B"));
    }
}
