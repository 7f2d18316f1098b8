//! Single-slot "latest frame" buffer shared by the capture thread and readers
//!
//! The writer replaces the stored frame atomically; readers get their own
//! copy and never block the writer. There is no queue: a reader that falls
//! behind simply sees the newest frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::error::{MappingError, Result};
use crate::frame::Frame;

/// A frame with the instant it was captured
#[derive(Debug, Clone)]
pub struct TimestampedFrame {
    pub captured_at: Instant,
    pub frame: Frame,
}

#[derive(Debug, Default)]
pub struct LatestFrameSlot {
    value: ArcSwapOption<TimestampedFrame>,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, replacing any previous one
    pub fn publish(&self, frame: Frame) {
        self.value.store(Some(Arc::new(TimestampedFrame {
            captured_at: Instant::now(),
            frame,
        })));
    }

    /// Mark the producer as gone; subsequent reads fail
    pub fn close(&self, reason: impl Into<String>) {
        *self.close_reason.lock() = Some(reason.into());
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_frame(&self) -> bool {
        self.value.load().is_some()
    }

    /// Copy of the newest frame.
    ///
    /// Fails when the producer has closed the slot, nothing was published
    /// yet, or the newest frame is older than `stale_after`.
    pub fn latest(&self, stale_after: Duration) -> Result<TimestampedFrame> {
        if self.is_closed() {
            let reason = self
                .close_reason
                .lock()
                .clone()
                .unwrap_or_else(|| "capture stopped".to_string());
            return Err(MappingError::FrameSourceUnavailable(reason));
        }

        let current = self.value.load_full().ok_or_else(|| {
            MappingError::FrameSourceUnavailable("no frame captured yet".to_string())
        })?;

        let age = current.captured_at.elapsed();
        if age > stale_after {
            return Err(MappingError::FrameSourceUnavailable(format!(
                "newest frame is {} ms old",
                age.as_millis()
            )));
        }

        Ok(TimestampedFrame::clone(&current))
    }

    /// Block until a first frame is published, the slot closes, or `timeout`
    pub fn wait_for_first(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.has_frame() {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.has_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Depth, Dimensions};

    fn frame(value: u8) -> Frame {
        Frame::from_raw(Dimensions::new(2, 1), Depth::Gray, vec![value; 2]).unwrap()
    }

    #[test]
    fn test_empty_slot_is_unavailable() {
        let slot = LatestFrameSlot::new();
        assert!(matches!(
            slot.latest(Duration::from_secs(1)),
            Err(MappingError::FrameSourceUnavailable(_))
        ));
    }

    #[test]
    fn test_publish_overwrites_previous() {
        let slot = LatestFrameSlot::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        slot.publish(frame(3));
        let latest = slot.latest(Duration::from_secs(1)).unwrap();
        assert_eq!(latest.frame.as_raw(), &[3, 3]);
    }

    #[test]
    fn test_reader_gets_independent_copy() {
        let slot = LatestFrameSlot::new();
        slot.publish(frame(7));
        let mut copy = slot.latest(Duration::from_secs(1)).unwrap();
        copy.frame.as_raw_mut()[0] = 99;
        assert_eq!(slot.latest(Duration::from_secs(1)).unwrap().frame.as_raw(), &[7, 7]);
    }

    #[test]
    fn test_closed_slot_is_unavailable() {
        let slot = LatestFrameSlot::new();
        slot.publish(frame(1));
        slot.close("device unplugged");
        match slot.latest(Duration::from_secs(1)) {
            Err(MappingError::FrameSourceUnavailable(reason)) => {
                assert_eq!(reason, "device unplugged")
            }
            other => panic!("expected unavailable, got {:?}", other.map(|f| f.captured_at)),
        }
    }

    #[test]
    fn test_stale_frame_is_unavailable() {
        let slot = LatestFrameSlot::new();
        slot.publish(frame(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(slot.latest(Duration::from_millis(1)).is_err());
        assert!(slot.latest(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_wait_for_first_sees_other_thread() {
        let slot = Arc::new(LatestFrameSlot::new());
        let writer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            writer.publish(frame(5));
        });
        assert!(slot.wait_for_first(Duration::from_secs(2)));
        handle.join().unwrap();
    }
}
