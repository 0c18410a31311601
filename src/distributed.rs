//! Worker rendezvous and gradient synchronization.
//!
//! Data-parallel training runs one worker per device slot, each owning a
//! structurally identical network replica and a deterministic slice of the
//! timeline (transition index modulo world size). After every backward pass
//! the workers' gradients are averaged through a [`Reduce`] implementation
//! before any optimizer step, so every replica applies numerically identical
//! updates and the copies never diverge.
//!
//! The reduce capability is injected into the trainer as a trait object: a
//! single worker gets the no-op [`LocalReduce`], a worker group gets
//! [`SharedAllReduce`] handles over one shared accumulate-and-publish
//! barrier. A worker that misses the barrier within the step timeout fails
//! the whole job; there is no partial-quorum continuation.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::info;

use crate::config::JobParameters;
use crate::error::{QuenchError, Result};
use crate::network::{Gradients, QNetwork};
use crate::timeline::Timeline;
use crate::trainer::{Trainer, TrainingSummary};

/// Gradient synchronization capability injected into the trainer.
pub trait Reduce: Send {
    fn world_size(&self) -> usize;
    fn rank(&self) -> usize;
    /// Average this worker's gradients with every peer's. Blocks until the
    /// whole group has contributed.
    fn reduce(&self, gradients: Gradients) -> Result<Gradients>;
    /// Agree on a stop request across the group. Any worker observing the
    /// stop signal stops every worker at the same step boundary, so no
    /// replica is left waiting at the gradient barrier.
    fn stop_consensus(&self, stop: bool) -> Result<bool> {
        Ok(stop)
    }
}

/// Single-worker reduction: the average of one contribution is itself.
pub struct LocalReduce;

impl Reduce for LocalReduce {
    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn reduce(&self, gradients: Gradients) -> Result<Gradients> {
        Ok(gradients)
    }
}

struct ReduceSlot {
    generation: u64,
    arrived: usize,
    accumulator: Option<Gradients>,
    published: Option<(u64, Gradients)>,
}

struct VoteSlot {
    generation: u64,
    arrived: usize,
    any: bool,
    published: Option<(u64, bool)>,
}

/// Shared accumulate-average-publish barrier for one worker group.
///
/// Each generation collects exactly one contribution per worker; the last
/// arrival divides by the world size, publishes the average, and wakes the
/// rest. Generations are strictly ordered by the lock-step training loop, so
/// at most one is ever outstanding.
pub struct AllReduceCore {
    world: usize,
    timeout: Duration,
    slot: Mutex<ReduceSlot>,
    arrivals: Condvar,
    vote: Mutex<VoteSlot>,
    vote_arrivals: Condvar,
}

impl AllReduceCore {
    /// Create the shared barrier and hand out one [`SharedAllReduce`] handle
    /// per rank.
    pub fn group(world: usize, timeout: Duration) -> Vec<SharedAllReduce> {
        let core = Arc::new(AllReduceCore {
            world,
            timeout,
            slot: Mutex::new(ReduceSlot {
                generation: 0,
                arrived: 0,
                accumulator: None,
                published: None,
            }),
            arrivals: Condvar::new(),
            vote: Mutex::new(VoteSlot {
                generation: 0,
                arrived: 0,
                any: false,
                published: None,
            }),
            vote_arrivals: Condvar::new(),
        });
        (0..world)
            .map(|rank| SharedAllReduce {
                core: Arc::clone(&core),
                rank,
            })
            .collect()
    }

    fn reduce(&self, rank: usize, gradients: Gradients) -> Result<Gradients> {
        let deadline = Instant::now() + self.timeout;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| QuenchError::worker_failure(rank, "all-reduce lock poisoned"))?;

        let generation = slot.generation;
        match &mut slot.accumulator {
            None => slot.accumulator = Some(gradients),
            Some(acc) => acc.add_assign(&gradients),
        }
        slot.arrived += 1;

        if slot.arrived == self.world {
            let mut averaged = slot
                .accumulator
                .take()
                .expect("accumulator present after arrivals");
            averaged.scale(1.0 / self.world as f32);
            slot.published = Some((generation, averaged.clone()));
            slot.generation += 1;
            slot.arrived = 0;
            self.arrivals.notify_all();
            return Ok(averaged);
        }

        loop {
            if let Some((published_generation, result)) = &slot.published {
                if *published_generation == generation {
                    return Ok(result.clone());
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QuenchError::worker_failure(
                    rank,
                    "gradient all-reduce barrier timed out",
                ));
            }
            let (guard, _) = self
                .arrivals
                .wait_timeout(slot, remaining)
                .map_err(|_| QuenchError::worker_failure(rank, "all-reduce lock poisoned"))?;
            slot = guard;
        }
    }

    fn stop_consensus(&self, rank: usize, stop: bool) -> Result<bool> {
        let deadline = Instant::now() + self.timeout;
        let mut vote = self
            .vote
            .lock()
            .map_err(|_| QuenchError::worker_failure(rank, "stop-vote lock poisoned"))?;

        let generation = vote.generation;
        vote.any |= stop;
        vote.arrived += 1;

        if vote.arrived == self.world {
            let decision = vote.any;
            vote.published = Some((generation, decision));
            vote.generation += 1;
            vote.arrived = 0;
            vote.any = false;
            self.vote_arrivals.notify_all();
            return Ok(decision);
        }

        loop {
            if let Some((published_generation, decision)) = vote.published {
                if published_generation == generation {
                    return Ok(decision);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QuenchError::worker_failure(
                    rank,
                    "stop-vote barrier timed out",
                ));
            }
            let (guard, _) = self
                .vote_arrivals
                .wait_timeout(vote, remaining)
                .map_err(|_| QuenchError::worker_failure(rank, "stop-vote lock poisoned"))?;
            vote = guard;
        }
    }
}

/// One worker's handle onto the group barrier.
pub struct SharedAllReduce {
    core: Arc<AllReduceCore>,
    rank: usize,
}

impl Reduce for SharedAllReduce {
    fn world_size(&self) -> usize {
        self.core.world
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn reduce(&self, gradients: Gradients) -> Result<Gradients> {
        self.core.reduce(self.rank, gradients)
    }

    fn stop_consensus(&self, stop: bool) -> Result<bool> {
        self.core.stop_consensus(self.rank, stop)
    }
}

/// Startup rendezvous: every worker blocks until the full group has joined,
/// bounded by a timeout after which the job fails fatally.
pub struct Rendezvous {
    world: usize,
    timeout: Duration,
    joined: Mutex<usize>,
    all_in: Condvar,
}

impl Rendezvous {
    pub fn new(world: usize, timeout: Duration) -> Self {
        Rendezvous {
            world,
            timeout,
            joined: Mutex::new(0),
            all_in: Condvar::new(),
        }
    }

    pub fn join(&self, rank: usize) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut joined = self
            .joined
            .lock()
            .map_err(|_| QuenchError::worker_failure(rank, "rendezvous lock poisoned"))?;
        *joined += 1;
        if *joined >= self.world {
            self.all_in.notify_all();
            return Ok(());
        }
        while *joined < self.world {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QuenchError::RendezvousTimeout {
                    joined: *joined,
                    world: self.world,
                });
            }
            let (guard, _) = self
                .all_in
                .wait_timeout(joined, remaining)
                .map_err(|_| QuenchError::worker_failure(rank, "rendezvous lock poisoned"))?;
            joined = guard;
        }
        Ok(())
    }
}

/// Resolve a `file://` rendezvous endpoint and make sure the coordination
/// file is writable before any worker starts.
pub fn touch_init_file(init_method: &str) -> Result<PathBuf> {
    let path = init_method
        .strip_prefix("file://")
        .map(PathBuf::from)
        .ok_or_else(|| {
            QuenchError::config_validation(
                "distributed.init_method",
                "only file:// rendezvous endpoints are supported",
            )
        })?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| QuenchError::IoError(format!("{}: {}", parent.display(), err)))?;
        }
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| QuenchError::IoError(format!("{}: {}", path.display(), err)))?;
    Ok(path)
}

/// Train the network over the timeline with the configured worker topology.
///
/// With a world size of one this runs inline with [`LocalReduce`]. Otherwise
/// one thread per worker is spawned; each rendezvouses, trains its partition
/// in lock-step with the group, and returns its replica. The replicas are
/// numerically identical after the final step, so rank 0's network is the
/// job's result. A worker panic or error is fatal for the whole job.
pub fn train_distributed(
    base: &QNetwork,
    timeline: &Timeline,
    config: &JobParameters,
    stop: Option<&AtomicBool>,
) -> Result<(QNetwork, TrainingSummary)> {
    let world = config.distributed.world_size();
    if world <= 1 {
        let mut trainer = Trainer::new(
            base.clone(),
            &config.rl,
            &config.rainbow,
            &config.training,
            Box::new(LocalReduce),
        )?;
        let summary = trainer.train(timeline.transitions(), config.epochs, None, stop)?;
        return Ok((trainer.into_network(), summary));
    }

    if timeline.len() < world {
        return Err(QuenchError::InsufficientData(format!(
            "{} transitions cannot feed {} workers",
            timeline.len(),
            world
        )));
    }
    touch_init_file(&config.distributed.init_method)?;

    // Lock-step requires the same step count on every worker even though
    // partition sizes differ by up to one transition.
    let largest_partition = (timeline.len() + world - 1) / world;
    let steps_per_epoch =
        (largest_partition + config.training.minibatch_size - 1) / config.training.minibatch_size;

    let rendezvous = Rendezvous::new(
        world,
        Duration::from_secs(config.distributed.rendezvous_timeout_secs),
    );
    let reducers = AllReduceCore::group(
        world,
        Duration::from_secs(config.distributed.step_timeout_secs),
    );
    info!(
        "starting {} workers, {} steps per epoch, rendezvous at {}",
        world, steps_per_epoch, config.distributed.init_method
    );

    let mut results: Vec<Result<(QNetwork, TrainingSummary)>> = Vec::with_capacity(world);
    thread::scope(|scope| {
        let rendezvous = &rendezvous;
        let handles: Vec<_> = reducers
            .into_iter()
            .enumerate()
            .map(|(rank, reducer)| {
                let partition = timeline.partition(rank, world);
                let mut training = config.training.clone();
                training.seed = training.seed.wrapping_add(rank as u64);
                let replica = base.clone();
                scope.spawn(move || -> Result<(QNetwork, TrainingSummary)> {
                    rendezvous.join(rank)?;
                    info!("worker {}/{} joined, {} transitions", rank, world, partition.len());
                    let mut trainer = Trainer::new(
                        replica,
                        &config.rl,
                        &config.rainbow,
                        &training,
                        Box::new(reducer),
                    )?;
                    let summary =
                        trainer.train(&partition, config.epochs, Some(steps_per_epoch), stop)?;
                    Ok((trainer.into_network(), summary))
                })
            })
            .collect();

        for (rank, handle) in handles.into_iter().enumerate() {
            results.push(handle.join().unwrap_or_else(|_| {
                Err(QuenchError::worker_failure(rank, "worker thread panicked"))
            }));
        }
    });

    let mut first: Option<(QNetwork, TrainingSummary)> = None;
    for result in results {
        let outcome = result?;
        if first.is_none() {
            first = Some(outcome);
        }
    }
    first.ok_or_else(|| QuenchError::worker_failure(0, "no worker produced a result"))
}
