//! Grouped fetches with per-request completion
//!
//! Jobs are split into chunks of at most `chunk_size`; each chunk becomes
//! one grouped call. Every job's completion runs exactly once, with its own
//! reply, the chunk's failure, `NoResponse` when the reply never came back,
//! or `Cancelled` when its chunk was never sent.

use log::{debug, warn};
use rayon::prelude::*;
use std::sync::mpsc;

use super::CancelFlag;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::MessageId;
use crate::remote::BatchReply;

/// Completion callback of a single batched request
pub type Completion<T> = Box<dyn FnOnce(SyncResult<T>) + Send>;

/// One request plus the callback that receives its result
pub struct BatchJob<T> {
    pub id: MessageId,
    on_complete: Completion<T>,
}

impl<T> BatchJob<T> {
    pub fn new<F>(id: MessageId, on_complete: F) -> Self
    where
        F: FnOnce(SyncResult<T>) + Send + 'static,
    {
        Self {
            id,
            on_complete: Box::new(on_complete),
        }
    }

    fn complete(self, result: SyncResult<T>) {
        (self.on_complete)(result)
    }
}

impl<T> std::fmt::Debug for BatchJob<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob").field("id", &self.id).finish()
    }
}

/// Outcome counts of one `execute` run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Grouped calls issued
    pub calls: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Requests the server never answered
    pub unanswered: Vec<MessageId>,
    /// Requests whose chunk was skipped after cancellation
    pub cancelled: Vec<MessageId>,
}

impl BatchReport {
    fn merge(mut self, other: Self) -> Self {
        self.calls += other.calls;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.unanswered.extend(other.unanswered);
        self.cancelled.extend(other.cancelled);
        self
    }
}

/// Splits jobs into chunks and runs one grouped call per chunk
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    chunk_size: usize,
    workers: usize,
    cancel: Option<CancelFlag>,
}

impl BatchExecutor {
    /// Sequential executor with the given chunk size
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            workers: 1,
            cancel: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.batch_chunk_size).with_workers(config.batch_workers)
    }

    /// Allow up to `workers` chunks in flight at once
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run every job through `call`
    ///
    /// `call` receives one chunk's ids and returns the replies it got back,
    /// in any order. `Err` fails every job in that chunk.
    pub fn execute<T, F>(&self, jobs: Vec<BatchJob<T>>, call: F) -> BatchReport
    where
        T: Send,
        F: Fn(&[MessageId]) -> SyncResult<Vec<BatchReply<T>>> + Sync,
    {
        if jobs.is_empty() {
            return BatchReport::default();
        }

        let chunks = into_chunks(jobs, self.chunk_size);
        debug!(
            "Executing {} chunks (chunk size {}, workers {})",
            chunks.len(),
            self.chunk_size,
            self.workers
        );

        if self.workers == 1 {
            return chunks
                .into_iter()
                .map(|chunk| self.run_chunk(chunk, &call))
                .fold(BatchReport::default(), BatchReport::merge);
        }

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
        {
            Ok(pool) => pool.install(|| {
                chunks
                    .into_par_iter()
                    .map(|chunk| self.run_chunk(chunk, &call))
                    .reduce(BatchReport::default, BatchReport::merge)
            }),
            Err(e) => {
                warn!("Failed to start batch workers, running sequentially: {}", e);
                chunks
                    .into_iter()
                    .map(|chunk| self.run_chunk(chunk, &call))
                    .fold(BatchReport::default(), BatchReport::merge)
            }
        }
    }

    /// Run `call` over `ids` and return the results in input order
    pub fn collect<T, F>(
        &self,
        ids: &[MessageId],
        call: F,
    ) -> (Vec<(MessageId, SyncResult<T>)>, BatchReport)
    where
        T: Send + 'static,
        F: Fn(&[MessageId]) -> SyncResult<Vec<BatchReply<T>>> + Sync,
    {
        let (tx, rx) = mpsc::channel();
        let jobs = ids
            .iter()
            .enumerate()
            .map(|(position, id)| {
                let tx = tx.clone();
                BatchJob::new(id.clone(), move |result| {
                    // Receiver outlives execute; a send can only fail after
                    // collect has returned
                    let _ = tx.send((position, result));
                })
            })
            .collect();
        drop(tx);

        let report = self.execute(jobs, call);

        let mut slots: Vec<Option<SyncResult<T>>> = ids.iter().map(|_| None).collect();
        for (position, result) in rx.try_iter() {
            slots[position] = Some(result);
        }

        let results = ids
            .iter()
            .cloned()
            .zip(slots)
            .map(|(id, slot)| {
                let result =
                    slot.unwrap_or_else(|| Err(SyncError::NoResponse(id.as_str().to_string())));
                (id, result)
            })
            .collect();
        (results, report)
    }

    fn run_chunk<T, F>(&self, chunk: Vec<BatchJob<T>>, call: &F) -> BatchReport
    where
        F: Fn(&[MessageId]) -> SyncResult<Vec<BatchReply<T>>>,
    {
        let mut report = BatchReport::default();

        if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
            for job in chunk {
                report.cancelled.push(job.id.clone());
                job.complete(Err(SyncError::Cancelled));
            }
            return report;
        }

        let ids: Vec<MessageId> = chunk.iter().map(|job| job.id.clone()).collect();
        let mut pending: Vec<Option<BatchJob<T>>> = chunk.into_iter().map(Some).collect();
        report.calls = 1;

        match call(&ids) {
            Ok(replies) => {
                for reply in replies {
                    let Some(job) = pending.get_mut(reply.index).and_then(Option::take) else {
                        warn!(
                            "Ignoring reply for unknown or already answered index {}",
                            reply.index
                        );
                        continue;
                    };
                    if reply.result.is_ok() {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                    }
                    job.complete(reply.result);
                }

                for job in pending.into_iter().flatten() {
                    warn!("No reply for {} in grouped call", job.id);
                    report.failed += 1;
                    report.unanswered.push(job.id.clone());
                    let id = job.id.as_str().to_string();
                    job.complete(Err(SyncError::NoResponse(id)));
                }
            }
            Err(e) => {
                warn!("Grouped call for {} requests failed: {}", ids.len(), e);
                for job in pending.into_iter().flatten() {
                    report.failed += 1;
                    job.complete(Err(e.clone()));
                }
            }
        }

        report
    }
}

fn into_chunks<T>(jobs: Vec<BatchJob<T>>, chunk_size: usize) -> Vec<Vec<BatchJob<T>>> {
    let mut chunks = Vec::with_capacity(jobs.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(jobs.len()));
    for job in jobs {
        current.push(job);
        if current.len() == chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn ids(n: usize) -> Vec<MessageId> {
        (0..n).map(|i| MessageId::new(format!("m{i}"))).collect()
    }

    /// Echo every id back as its own result
    fn echo(ids: &[MessageId]) -> SyncResult<Vec<BatchReply<String>>> {
        Ok(ids
            .iter()
            .enumerate()
            .map(|(index, id)| BatchReply {
                index,
                result: Ok(id.as_str().to_string()),
            })
            .collect())
    }

    #[test]
    fn test_chunks_follow_chunk_size() {
        let sizes = Mutex::new(Vec::new());
        let (results, report) = BatchExecutor::new(1000).collect(&ids(2500), |chunk| {
            sizes.lock().unwrap().push(chunk.len());
            echo(chunk)
        });

        assert_eq!(*sizes.lock().unwrap(), vec![1000, 1000, 500]);
        assert_eq!(report.calls, 3);
        assert_eq!(report.succeeded, 2500);
        assert_eq!(results.len(), 2500);
        assert!(results.iter().all(|(id, r)| r.as_deref() == Ok(id.as_str())));
    }

    #[test]
    fn test_each_completion_runs_once() {
        let counter = Arc::new(Mutex::new(Vec::new()));
        let jobs = ids(7)
            .into_iter()
            .map(|id| {
                let counter = Arc::clone(&counter);
                BatchJob::new(id.clone(), move |_: SyncResult<String>| {
                    counter.lock().unwrap().push(id)
                })
            })
            .collect();

        BatchExecutor::new(3).execute(jobs, echo);

        let mut seen = counter.lock().unwrap().clone();
        seen.sort();
        let mut expected = ids(7);
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_replies_matched_by_index_not_order() {
        let (results, _) = BatchExecutor::new(10).collect(&ids(4), |chunk| {
            let mut replies = echo(chunk)?;
            replies.reverse();
            Ok(replies)
        });
        let values: Vec<String> = results.into_iter().map(|(_, r)| r.unwrap()).collect();
        assert_eq!(values, vec!["m0", "m1", "m2", "m3"]);
    }

    #[test]
    fn test_chunk_failure_fails_only_that_chunk() {
        let calls = Mutex::new(0);
        let (results, report) = BatchExecutor::new(2).collect(&ids(5), |chunk| {
            let mut calls = calls.lock().unwrap();
            *calls += 1;
            if *calls == 2 {
                return Err(SyncError::RateLimited("slow down".to_string()));
            }
            echo(chunk)
        });

        assert_eq!(report.calls, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert_eq!(
            results[2].1,
            Err(SyncError::RateLimited("slow down".to_string()))
        );
        assert!(results[3].1.is_err());
        assert!(results[4].1.is_ok());
    }

    #[test]
    fn test_missing_reply_is_no_response() {
        let (results, report) = BatchExecutor::new(10).collect(&ids(3), |chunk| {
            let mut replies = echo(chunk)?;
            replies.retain(|r| r.index != 1);
            Ok(replies)
        });

        assert_eq!(report.unanswered, vec![MessageId::new("m1")]);
        assert_eq!(results[1].1, Err(SyncError::NoResponse("m1".to_string())));
        assert!(results[0].1.is_ok());
        assert!(results[2].1.is_ok());
    }

    #[test]
    fn test_per_item_failure_leaves_siblings() {
        let (results, report) = BatchExecutor::new(10).collect(&ids(3), |chunk| {
            let mut replies = echo(chunk)?;
            replies[0].result = Err(SyncError::Api {
                status: 404,
                message: "gone".to_string(),
            });
            Ok(replies)
        });
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(results[0].1.is_err());
    }

    #[test]
    fn test_duplicate_reply_ignored() {
        let (results, report) = BatchExecutor::new(10).collect(&ids(2), |chunk| {
            let mut replies = echo(chunk)?;
            replies.push(BatchReply {
                index: 0,
                result: Ok("duplicate".to_string()),
            });
            Ok(replies)
        });
        assert_eq!(report.succeeded, 2);
        assert_eq!(results[0].1.as_deref(), Ok("m0"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let (results, report) = BatchExecutor::new(2)
            .with_cancel(cancel)
            .collect(&ids(3), |_: &[MessageId]| -> SyncResult<Vec<BatchReply<String>>> {
                panic!("no call expected")
            });

        assert_eq!(report.calls, 0);
        assert_eq!(report.cancelled.len(), 3);
        assert!(results.iter().all(|(_, r)| *r == Err(SyncError::Cancelled)));
    }

    #[test]
    fn test_parallel_workers_deliver_everything() {
        let (results, report) = BatchExecutor::new(10)
            .with_workers(4)
            .collect(&ids(95), echo);
        assert_eq!(report.calls, 10);
        assert_eq!(report.succeeded, 95);
        assert!(results.iter().all(|(id, r)| r.as_deref() == Ok(id.as_str())));
    }

    #[test]
    fn test_empty_input_makes_no_calls() {
        let (results, report) = BatchExecutor::new(10)
            .collect(&[], |_: &[MessageId]| -> SyncResult<Vec<BatchReply<String>>> {
                panic!("no call expected")
            });
        assert!(results.is_empty());
        assert_eq!(report, BatchReport::default());
    }
}
