//! Per-job commands: status, signal, info, list, cleanup

use anyhow::Result;

use crate::ipc::OrchestratorClient;
use crate::output::{format_job_status, format_jobs, print_error, print_success, print_warning};

/// Parse a signal given as a number or a name like `TERM` or `SIGTERM`
pub fn parse_signal(signal: &str) -> Result<i32> {
    if let Ok(signum) = signal.parse::<i32>() {
        if signum < 0 {
            anyhow::bail!("Signal number must not be negative: {}", signum);
        }
        return Ok(signum);
    }

    hb_core::signal::from_name(signal)
        .ok_or_else(|| anyhow::anyhow!("Unknown signal: {}", signal))
}

/// Execute the status command
pub async fn status_command(client: &mut OrchestratorClient, job_id: &str) -> Result<()> {
    let report = match client.job_status(job_id).await {
        Ok(r) => r,
        Err(e) => {
            print_error(&format!("Failed to poll job {}: {}", job_id, e));
            return Err(e);
        }
    };

    print!("{}", format_job_status(job_id, &report));
    Ok(())
}

/// Execute the signal command
pub async fn signal_command(
    client: &mut OrchestratorClient,
    job_id: &str,
    signal: &str,
) -> Result<()> {
    let signum = parse_signal(signal)?;

    match client.signal(job_id, signum).await {
        Ok(true) => {
            print_success(&format!("Sent signal {} to job {}", signum, job_id));
            Ok(())
        }
        Ok(false) => {
            print_warning(&format!("Scheduler refused signal {} for job {}", signum, job_id));
            anyhow::bail!("Signal not delivered")
        }
        Err(e) => {
            print_error(&format!("Failed to signal job {}: {}", job_id, e));
            Err(e)
        }
    }
}

/// Execute the info command
pub async fn info_command(client: &mut OrchestratorClient, job_id: &str) -> Result<()> {
    let job = match client.info(job_id).await {
        Ok(j) => j,
        Err(e) => {
            print_error(&format!("Failed to get job {}: {}", job_id, e));
            return Err(e);
        }
    };

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

/// Execute the list command
pub async fn list_command(client: &mut OrchestratorClient) -> Result<()> {
    let jobs = match client.list_jobs().await {
        Ok(j) => j,
        Err(e) => {
            print_error(&format!("Failed to list jobs: {}", e));
            return Err(e);
        }
    };

    println!("{}", format_jobs(&jobs));
    Ok(())
}

/// Execute the cleanup command
pub async fn cleanup_command(client: &mut OrchestratorClient, job_ids: &[String]) -> Result<()> {
    let mut failures = 0;

    for job_id in job_ids {
        match client.cleanup(job_id).await {
            Ok(()) => print_success(&format!("Released resources of job {}", job_id)),
            Err(e) => {
                print_error(&format!("Failed to clean up job {}: {}", job_id, e));
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("Failed to clean up {} job(s)", failures);
    }

    Ok(())
}
