//! The `utils` module holds the pieces shared across the bus: logging
//! initialization and the transport-level error type used by both the
//! WebSocket front-end and the client transports.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn test_logging_init_is_idempotent() {
        // Repeated calls and bad level names must not panic
        logging::init("debug");
        logging::init("not-a-level");
        logging::init("warn");
    }
}
