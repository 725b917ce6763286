use super::point::Point;
use super::PointSink;
use crate::error::SinkError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// In-memory sink for tests. Failures queued with [`MemorySink::fail_next`] are
/// returned by the next writes in order.
#[derive(Default)]
pub(crate) struct MemorySink {
    batches: Mutex<Vec<Vec<Point>>>,
    failures: Mutex<VecDeque<SinkError>>,
    attempts: Mutex<usize>,
}

impl MemorySink {
    pub(crate) fn fail_next(&self, err: SinkError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn batches(&self) -> Vec<Vec<Point>> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn points(&self) -> Vec<Point> {
        self.batches().into_iter().flatten().collect()
    }

    pub(crate) fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl PointSink for MemorySink {
    async fn write_points(&self, points: &[Point]) -> Result<(), SinkError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.batches.lock().unwrap().push(points.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
