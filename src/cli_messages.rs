//! CLI command messaging
//!
//! Consistent terminal output for the `apiguard` subcommands.

use crate::errors::{ErrorRecord, NetworkStatus};
use crate::network::ClientError;

/// Print CLI command info message
pub fn print_info(title: &str, details: &str) {
    print!("\x1b[1;33m[INFO]\x1b[0m {}", title);
    if !details.is_empty() {
        println!("\t {}", details);
    } else {
        println!();
    }
}

/// Print CLI command error
pub fn print_error(title: &str, details: Option<&str>) {
    eprintln!("\x1b[1;31m[ERROR]\x1b[0m {}", title);
    if let Some(details) = details {
        eprintln!("\x1b[1;31m[ERROR]\x1b[0m Details: {}", details);
    }
}

/// Print CLI command success
pub fn print_success(title: &str, details: &str) {
    print!("\x1b[1;32m[SUCCESS]\x1b[0m {}", title);
    if !details.is_empty() {
        println!("\t {}", details);
    } else {
        println!();
    }
}

/// User-facing rendering of a failed request: the classified message, then the record id
/// so it can be found in the log.
pub fn print_client_error(error: &ClientError) {
    let details = error
        .error_id()
        .map(|id| format!("{} (error {})", error, id));
    print_error(&error.user_message(), details.as_deref());
}

pub fn format_network_status(status: &NetworkStatus) -> String {
    let state = if status.is_online { "online" } else { "offline" };
    match status.latency_ms {
        Some(latency) => format!(
            "{} via {} ({}ms, checked {})",
            state,
            status.connection_type,
            latency,
            status.last_checked.format("%H:%M:%S")
        ),
        None => format!(
            "{} via {} (checked {})",
            state,
            status.connection_type,
            status.last_checked.format("%H:%M:%S")
        ),
    }
}

pub fn format_error_record(record: &ErrorRecord) -> String {
    format!(
        "[{}] {} {} (attempt {}/{})",
        record.kind,
        record.endpoint,
        record.user_message(),
        record.attempt,
        record.max_attempts
    )
}

#[macro_export]
macro_rules! print_cmd_info {
    ($title:expr, $($details:tt)*) => {
        $crate::cli_messages::print_info($title, &format!($($details)*))
    };
}

/// Macro for CLI errors
#[macro_export]
macro_rules! print_cmd_error {
    ($title:expr) => {
        $crate::cli_messages::print_error($title, None)
    };
    ($title:expr, $details:expr) => {
        $crate::cli_messages::print_error($title, Some($details))
    };
}

/// Macro for CLI success messages
#[macro_export]
macro_rules! print_cmd_success {
    ($title:expr, $($details:tt)*) => {
        $crate::cli_messages::print_success($title, &format!($($details)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConnectionType, NetworkStatusUpdate, NewError};

    #[test]
    fn test_network_status_line() {
        let mut status = NetworkStatus::default();
        status.merge(
            NetworkStatusUpdate::online()
                .with_connection_type(ConnectionType::Wifi)
                .with_latency_ms(Some(42)),
            chrono::Utc::now(),
        );
        let line = format_network_status(&status);
        assert!(line.starts_with("online via wifi (42ms"), "{line}");
    }

    #[test]
    fn test_error_record_line() {
        let record = NewError::new("/reports", "maintenance")
            .with_status(Some(503))
            .with_max_attempts(3)
            .into_record();
        assert_eq!(
            format_error_record(&record),
            "[api] /reports The server ran into a problem: maintenance (attempt 0/3)"
        );
    }
}
