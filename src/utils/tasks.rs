use tokio::task::JoinError;

/// Human-readable description of a failed blocking task, including the panic message.
pub fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked with a non-string payload".to_string()
    }
}
