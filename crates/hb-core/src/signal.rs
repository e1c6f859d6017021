//! Signal numbers as `scancel -s` delivers them on the cluster
//!
//! Clusters run Linux, so these are the Linux numbers regardless of the
//! platform the orchestrator itself runs on.

pub const SIGHUP: i32 = 1;
pub const SIGINT: i32 = 2;
pub const SIGQUIT: i32 = 3;
pub const SIGKILL: i32 = 9;
pub const SIGUSR1: i32 = 10;
pub const SIGUSR2: i32 = 12;
pub const SIGTERM: i32 = 15;
pub const SIGCONT: i32 = 18;
pub const SIGSTOP: i32 = 19;

/// Look up a signal by name, with or without the `SIG` prefix
pub fn from_name(name: &str) -> Option<i32> {
    let upper = name.trim().to_ascii_uppercase();
    let signum = match upper.strip_prefix("SIG").unwrap_or(&upper) {
        "HUP" => SIGHUP,
        "INT" => SIGINT,
        "QUIT" => SIGQUIT,
        "KILL" => SIGKILL,
        "USR1" => SIGUSR1,
        "USR2" => SIGUSR2,
        "TERM" => SIGTERM,
        "CONT" => SIGCONT,
        "STOP" => SIGSTOP,
        _ => return None,
    };
    Some(signum)
}

/// Whether delivering `signum` ends the job
pub fn is_terminating(signum: i32) -> bool {
    signum == SIGTERM || signum == SIGKILL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(from_name("TERM"), Some(SIGTERM));
        assert_eq!(from_name("sigkill"), Some(SIGKILL));
        assert_eq!(from_name("USR2"), Some(SIGUSR2));
        assert_eq!(from_name("SIG"), None);
        assert_eq!(from_name("BOGUS"), None);
    }

    #[test]
    fn test_is_terminating() {
        assert!(is_terminating(SIGTERM));
        assert!(is_terminating(SIGKILL));
        assert!(!is_terminating(SIGINT));
        assert!(!is_terminating(0));
    }
}
