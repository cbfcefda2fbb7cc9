use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinSet;

use crate::model::{LanguageModel, generate, predict};
use crate::telemetry::TelemetrySink;
use crate::wiki::CachedWikipedia;

/// Fixed sampling ladder: five rollouts per model, one per temperature.
pub const ROLLOUT_TEMPERATURES: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

/// Read-only inputs shared by every rollout.
#[derive(Debug, Clone)]
pub struct ForecastInputs {
    pub scenario: String,
    pub contexts: Vec<String>,
    pub current_date: String,
    pub question: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Timeline,
    Judgment,
}

/// One record per (model, temperature) rollout. Raw votes only: aggregation
/// and presentation are the caller's responsibility.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutRecord {
    pub model: String,
    pub rollout_id: usize,
    pub temp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulated_timeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_stage: Option<FailureStage>,
}

impl RolloutRecord {
    fn failed(model: &str, rollout_id: usize, temp: f64, stage: FailureStage) -> Self {
        Self {
            model: model.to_string(),
            rollout_id,
            temp,
            simulated_timeline: None,
            choice: None,
            error: Some(true),
            failure_stage: Some(stage),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ImpliedAnswer {
    /// The answer to the question, given the timeline.
    implied_answer: bool,
}

/// Supporting contexts are Wikipedia pages fetched by title through the
/// document cache, prefixed with their titles.
pub async fn gather_contexts(wiki: &CachedWikipedia, titles: &[String]) -> Result<Vec<String>> {
    let mut contexts = Vec::with_capacity(titles.len());
    for title in titles {
        let page = wiki.get_page(title).await?;
        contexts.push(format!("{title}\n{page}"));
    }
    Ok(contexts)
}

/// One rollout: generate a future timeline at the rollout temperature, then
/// ask a separate deterministic judgment call whether the timeline implies a
/// "yes" to the question. Any failure becomes an error-flagged record.
async fn run_rollout(
    model: &dyn LanguageModel,
    model_id: &str,
    inputs: &ForecastInputs,
    rollout_id: usize,
    temp: f64,
) -> RolloutRecord {
    let contexts = inputs.contexts.join("\n\n---\n\n");
    let timeline = match generate(
        model,
        model_id,
        "Generate a realistic chronological timeline related to the scenario or topic \
         from the current date to the foreseeable future.",
        &[
            ("timeline_scenario", inputs.scenario.as_str()),
            ("contexts", contexts.as_str()),
            ("current_date", inputs.current_date.as_str()),
        ],
        temp,
    )
    .await
    {
        Ok(timeline) => timeline,
        Err(err) => {
            tracing::warn!(model = model_id, rollout_id, error = %err, "timeline rollout failed");
            return RolloutRecord::failed(model_id, rollout_id, temp, FailureStage::Timeline);
        }
    };

    match predict::<ImpliedAnswer>(
        model,
        model_id,
        "Given a simulated future timeline and a question related to the timeline, \
         return whether the timeline as stated implies the answer to the question \
         being true.",
        &[
            ("timeline", timeline.as_str()),
            ("question_to_answer", inputs.question.as_str()),
        ],
        0.0,
    )
    .await
    {
        Ok(answer) => RolloutRecord {
            model: model_id.to_string(),
            rollout_id,
            temp,
            simulated_timeline: Some(timeline),
            choice: Some(answer.implied_answer),
            error: None,
            failure_stage: None,
        },
        Err(err) => {
            tracing::warn!(model = model_id, rollout_id, error = %err, "judgment call failed");
            let mut record =
                RolloutRecord::failed(model_id, rollout_id, temp, FailureStage::Judgment);
            record.simulated_timeline = Some(timeline);
            record
        }
    }
}

/// The five rollouts for one model, sequential within the worker.
pub async fn run_model_rollouts(
    model: &dyn LanguageModel,
    model_id: &str,
    inputs: &ForecastInputs,
) -> Vec<RolloutRecord> {
    let mut records = Vec::with_capacity(ROLLOUT_TEMPERATURES.len());
    for (rollout_id, temp) in ROLLOUT_TEMPERATURES.into_iter().enumerate() {
        records.push(run_rollout(model, model_id, inputs, rollout_id, temp).await);
    }
    records
}

/// Run the ensemble: one worker task per model, rollouts sequential within
/// each worker. Always yields exactly 5 x M records in configured model
/// order, regardless of how many individual rollouts error.
pub async fn run_ensemble(
    model: Arc<dyn LanguageModel>,
    models: &[String],
    inputs: ForecastInputs,
    telemetry: &TelemetrySink,
) -> Vec<RolloutRecord> {
    let inputs = Arc::new(inputs);
    let mut workers = JoinSet::new();
    for (index, model_id) in models.iter().enumerate() {
        let model = model.clone();
        let model_id = model_id.clone();
        let inputs = inputs.clone();
        workers.spawn(async move {
            let records = run_model_rollouts(model.as_ref(), &model_id, &inputs).await;
            (index, model_id, records)
        });
    }

    let mut per_model: Vec<Option<Vec<RolloutRecord>>> = vec![None; models.len()];
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((index, model_id, records)) => {
                let errors = records.iter().filter(|r| r.error.is_some()).count();
                telemetry.emit(
                    "rollout.model_completed",
                    json!({"model": model_id, "records": records.len(), "errors": errors}),
                );
                per_model[index] = Some(records);
            }
            Err(err) => {
                tracing::error!(error = %err, "ensemble worker panicked");
            }
        }
    }

    per_model
        .into_iter()
        .enumerate()
        .flat_map(|(index, records)| {
            records.unwrap_or_else(|| {
                let model_id = models[index].clone();
                ROLLOUT_TEMPERATURES
                    .into_iter()
                    .enumerate()
                    .map(|(rollout_id, temp)| {
                        RolloutRecord::failed(&model_id, rollout_id, temp, FailureStage::Timeline)
                    })
                    .collect()
            })
        })
        .collect()
}
