use crate::engine::PeerHandle;
use crate::error::CandidateError;
use crate::logger::dump_candidate;
use crate::peer::types::Candidate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Кандидаты, полученные до установки remote description
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<Candidate>,
    /// растёт на каждом reset, чтобы drain не вернул кандидаты в новый буфер
    generation: u64,
    /// идёт drain; новые кандидаты встают в очередь за ним
    draining: bool,
}

/// Итог одного drain
#[derive(Debug, Default)]
pub struct DrainReport {
    pub applied: usize,
    /// остались в буфере до следующего drain
    pub retry: Vec<Candidate>,
    /// отброшены навсегда
    pub dropped: Vec<(Candidate, CandidateError)>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: Candidate) {
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn reset(&mut self) {
        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "candidate buffer reset");
        }
        self.queue.clear();
        self.generation += 1;
        self.draining = false;
    }

    /// Забирает очередь целиком; `None`, если она пуста или drain уже идёт
    fn begin_drain(&mut self) -> Option<(u64, Vec<Candidate>)> {
        if self.draining || self.queue.is_empty() {
            return None;
        }
        self.draining = true;
        Some((self.generation, self.queue.drain(..).collect()))
    }

    /// Кандидаты, пришедшие во время drain. Если их нет, drain завершён и
    /// `retry` возвращаются в начало очереди (после reset они отбрасываются).
    fn next_batch(&mut self, generation: u64, retry: &mut Vec<Candidate>) -> Option<Vec<Candidate>> {
        if generation != self.generation {
            if !retry.is_empty() {
                debug!(
                    count = retry.len(),
                    "buffer was reset during drain, discarding retries"
                );
            }
            retry.clear();
            return None;
        }
        if !self.queue.is_empty() {
            return Some(self.queue.drain(..).collect());
        }
        for cand in retry.iter().rev() {
            self.queue.push_front(cand.clone());
        }
        self.draining = false;
        None
    }
}

/// Применяет все отложенные кандидаты к `handle` в порядке поступления.
///
/// Лок буфера не держится во время вызовов engine: очередь забирается
/// порциями, пока во время применения приходят новые кандидаты, а
/// неприменённые возвращаются в её начало.
pub async fn drain(buffer: &Mutex<CandidateBuffer>, handle: &dyn PeerHandle) -> DrainReport {
    let mut report = DrainReport::default();
    let Some((generation, mut batch)) = buffer.lock().begin_drain() else {
        return report;
    };
    debug!(count = batch.len(), "draining buffered candidates");

    loop {
        let mut iter = batch.into_iter();
        while let Some(cand) = iter.next() {
            if handle.remote_description().await.is_none() {
                warn!("remote description disappeared, keeping candidates for later");
                report.retry.push(cand);
                report.retry.extend(iter.by_ref());
                break;
            }
            dump_candidate("REMOTE(buffered)", &cand);
            match handle.add_candidate(cand.clone()).await {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_permanent() => {
                    warn!(error = %e, "dropping buffered candidate");
                    report.dropped.push((cand, e));
                }
                Err(e) => {
                    debug!(error = %e, "buffered candidate will be retried");
                    report.retry.push(cand);
                }
            }
        }

        let next = buffer.lock().next_batch(generation, &mut report.retry);
        match next {
            Some(more) => batch = more,
            None => break,
        }
    }
    report
}
