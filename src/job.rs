//! End-to-end job orchestration.
//!
//! Ties the components together the way the external runner expects:
//! validate the configuration, load the timelines, fit the normalization
//! statistics once, train with the configured worker topology, evaluate the
//! frozen result, and write the model artifact.

use std::sync::atomic::AtomicBool;

use rand::rngs::StdRng;
use rand::SeedableRng;

use log::info;

use crate::config::JobParameters;
use crate::distributed::train_distributed;
use crate::error::{QuenchError, Result};
use crate::evaluator::{EvalReport, Evaluator};
use crate::network::QNetwork;
use crate::normalizer::NormalizationParams;
use crate::artifact::ModelArtifact;
use crate::timeline::{ActionSet, Timeline};
use crate::trainer::TrainingSummary;

/// What a completed job hands back to the caller.
#[derive(Clone, Debug)]
pub struct JobReport {
    pub training: TrainingSummary,
    /// Present unless `eval_data_path` was left empty.
    pub eval: Option<EvalReport>,
}

/// Run the whole training job described by the configuration.
pub fn run(config: &JobParameters) -> Result<JobReport> {
    run_with_stop(config, None)
}

/// Like [`run`], with a cooperative stop signal honored between training
/// steps.
pub fn run_with_stop(
    config: &JobParameters,
    stop: Option<&AtomicBool>,
) -> Result<JobReport> {
    config.validate()?;
    if config.training_data_path.is_empty() {
        return Err(QuenchError::config_validation(
            "training_data_path",
            "a training timeline is required",
        ));
    }
    if config.model_output_path.is_empty() {
        return Err(QuenchError::config_validation(
            "model_output_path",
            "an output location for the model artifact is required",
        ));
    }

    let actions = ActionSet::new(config.actions.clone())?;
    let training_timeline = Timeline::load(&config.training_data_path, &actions)?;
    info!(
        "loaded {} training transitions ({} features, {} actions)",
        training_timeline.len(),
        training_timeline.state_dim(),
        actions.len()
    );

    // Normalization statistics are fitted once, before training, and shared
    // read-only by every worker and the evaluator.
    let normalization = fit_normalization(config, &actions, &training_timeline)?;
    let normalized_training = training_timeline.normalized(&normalization)?;

    let spec = config.training.network_spec();
    let mut rng = StdRng::seed_from_u64(config.training.seed);
    let network = QNetwork::build(
        &spec,
        training_timeline.state_dim(),
        actions.len(),
        config.rainbow.dueling_architecture,
        &mut rng,
    )?;

    let (trained, training_summary) =
        train_distributed(&network, &normalized_training, config, stop)?;
    info!(
        "training complete: {} steps, {} skipped",
        training_summary.steps, training_summary.skipped_steps
    );

    let eval = if config.eval_data_path.is_empty() {
        None
    } else {
        let eval_timeline = Timeline::load(&config.eval_data_path, &actions)?;
        let normalized_eval = eval_timeline.normalized(&normalization)?;
        let evaluator = Evaluator::new(config.rl.gamma);
        Some(evaluator.evaluate(&trained, normalized_eval.transitions())?)
    };

    let artifact = ModelArtifact {
        network: trained,
        normalization,
        actions,
    };
    artifact.save(&config.model_output_path)?;
    info!("model artifact written to {}", config.model_output_path);

    Ok(JobReport {
        training: training_summary,
        eval,
    })
}

fn fit_normalization(
    config: &JobParameters,
    actions: &ActionSet,
    training_timeline: &Timeline,
) -> Result<NormalizationParams> {
    let cols = config.norm_params.cols_to_norm.as_deref();
    let sample = match &config.state_norm_data_path {
        Some(path) if !path.is_empty() => {
            let norm_timeline = Timeline::load(path, actions)?;
            if norm_timeline.state_dim() != training_timeline.state_dim() {
                return Err(QuenchError::shape_mismatch(
                    format!("state width {}", training_timeline.state_dim()),
                    format!("state width {}", norm_timeline.state_dim()),
                ));
            }
            norm_timeline.state_sample(config.norm_params.num_samples)
        }
        _ => training_timeline.state_sample(config.norm_params.num_samples),
    };
    NormalizationParams::fit(sample.view(), cols)
}
