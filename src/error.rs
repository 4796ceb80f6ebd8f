/// Extension trait for the log-and-drop error policy.
///
/// Failures on one container's path must never affect any other container
/// or the host path, so most write errors are logged and discarded at the
/// call site instead of being propagated.
pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{err}");
                None
            }
        }
    }
}
