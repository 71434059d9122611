/// Turns byte counts into whole-percent updates.
///
/// Percentages are `received * 100 / total` truncated and capped at 100. A
/// value is only handed out when it differs from the previous one, so the
/// sequence is strictly increasing.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    total: Option<u64>,
    received: u64,
    last_percent: Option<u8>,
}

impl DownloadProgress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            received: 0,
            last_percent: None,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Record `bytes` more bytes. Returns the new percentage if it changed.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.received = self.received.saturating_add(bytes);

        let total = self.total.filter(|total| *total > 0)?;
        let percent = (u128::from(self.received) * 100 / u128::from(total)).min(100) as u8;

        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }
}
