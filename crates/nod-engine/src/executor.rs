//! Dispatching jobs to a worker pool.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::error::AnalysisError;
use crate::job::{run_task, JobReport, NodTask};
use crate::settings::Settings;

/// Runs batches of independent jobs, in parallel unless the settings ask
/// for sequential execution. Reports come back in submission order.
pub struct JobExecutor {
    settings: Settings,
    pool: Option<ThreadPool>,
}

impl JobExecutor {
    pub fn new(settings: &Settings) -> Result<Self, AnalysisError> {
        let pool = if settings.sequential {
            None
        } else {
            let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("nod-worker-{i}"));
            if let Some(threads) = settings.threads {
                builder = builder.num_threads(threads);
            }
            Some(
                builder
                    .build()
                    .map_err(|e| AnalysisError::ThreadPool(e.to_string()))?,
            )
        };
        Ok(Self {
            settings: settings.clone(),
            pool,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, ThreadPool::current_num_threads)
    }

    pub fn run<T>(&self, tasks: &[T]) -> Vec<JobReport<T::Output>>
    where
        T: NodTask + Sync,
        T::Output: Send,
    {
        info!(jobs = tasks.len(), threads = self.threads(), "NoD: dispatching jobs");
        let settings = &self.settings;
        match &self.pool {
            None => tasks.iter().map(|t| run_task(t, settings)).collect(),
            Some(pool) => {
                pool.install(|| tasks.par_iter().map(|t| run_task(t, settings)).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::job::Prepared;
    use nod_encoder::EncodedQuery;
    use nod_smt::solver::SmtSolver;

    struct Failing(usize);

    impl NodTask for Failing {
        type Output = ();

        fn describe(&self) -> String {
            format!("failing {}", self.0)
        }

        fn encode(&self) -> Result<Vec<EncodedQuery>, JobError> {
            Err(JobError::Caller {
                job: self.describe(),
                message: "no programs".into(),
            })
        }

        fn solve<S: SmtSolver>(&self, _: &Prepared, _: &mut S, _: &str) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn reports_keep_submission_order() -> Result<(), Box<dyn std::error::Error>> {
        for sequential in [true, false] {
            let settings = Settings {
                sequential,
                threads: Some(2),
                ..Settings::default()
            };
            let executor = JobExecutor::new(&settings)?;
            let tasks: Vec<Failing> = (0..8).map(Failing).collect();
            let reports = executor.run(&tasks);
            let jobs: Vec<&str> = reports.iter().map(|r| r.job.as_str()).collect();
            assert_eq!(jobs[0], "failing 0");
            assert_eq!(jobs[7], "failing 7");
            assert!(reports
                .iter()
                .all(|r| matches!(r.result, Err(JobError::Caller { .. }))));
        }
        Ok(())
    }
}
