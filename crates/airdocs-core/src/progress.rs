/// One step of a download or extraction. `bytes_total` is `None` when the
/// size is not known up front (no Content-Length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
}

impl ProgressEvent {
    pub fn new(bytes_done: u64, bytes_total: Option<u64>) -> Self {
        Self {
            bytes_done,
            bytes_total,
        }
    }
}
