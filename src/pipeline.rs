use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::extract::{Event, extract_events};
use crate::model::{LanguageModel, generate};
use crate::research::{LoopStatus, Objective, ResearchLoop};
use crate::telemetry::TelemetrySink;
use crate::tools::Toolbox;

const MERGE_TEMPERATURE: f64 = 0.3;

/// Output of one sub-research loop, paired 1:1 by position with the event
/// that spawned it.
#[derive(Debug, Clone, Serialize)]
pub struct Subtimeline {
    pub subtopic: String,
    pub date: String,
    pub narrative: String,
}

#[derive(Debug, Serialize)]
pub struct TimelineReport {
    pub topic: String,
    pub time_until: String,
    pub first_timeline: String,
    pub first_timeline_status: String,
    pub extracted_events: Vec<Event>,
    pub subtimelines: Vec<Subtimeline>,
    pub merged: String,
}

fn status_label(status: LoopStatus) -> String {
    match status {
        LoopStatus::Answered => "answered".to_string(),
        LoopStatus::Exhausted => "exhausted".to_string(),
    }
}

/// Fan out one narrow research loop per extracted event. Sub-runs are
/// independent and isolated: a failed run yields an error-text narrative and
/// never blocks the remaining events.
pub async fn research_subtimelines(
    model: &dyn LanguageModel,
    model_id: &str,
    toolbox: &Toolbox,
    topic: &str,
    events: &[Event],
    max_iters: usize,
) -> Vec<Subtimeline> {
    let research = ResearchLoop::new(model, model_id, toolbox, max_iters);
    let mut subtimelines = Vec::with_capacity(events.len());

    for event in events {
        tracing::info!(subtopic = %event.description, date = %event.date, "researching sub-event");
        let objective = Objective::Event {
            topic: topic.to_string(),
            subtopic: event.description.clone(),
            date: event.date.clone(),
        };
        let narrative = match research.run(&objective).await {
            Ok(result) => {
                if result.status == LoopStatus::Exhausted {
                    tracing::warn!(subtopic = %event.description, "sub-research exhausted its budget");
                }
                result.timeline
            }
            Err(err) => {
                tracing::warn!(subtopic = %event.description, error = %err, "sub-research failed");
                format!("sub-research failed: {err:#}")
            }
        };
        subtimelines.push(Subtimeline {
            subtopic: event.description.clone(),
            date: event.date.clone(),
            narrative,
        });
    }

    subtimelines
}

fn render_subtimelines(subtimelines: &[Subtimeline]) -> String {
    subtimelines
        .iter()
        .enumerate()
        .map(|(index, subtimeline)| {
            format!(
                "### {}. {} ({})\n{}",
                index + 1,
                subtimeline.subtopic,
                subtimeline.date,
                subtimeline.narrative
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Model-driven synthesis of the partial timelines into one narrative:
/// no information loss, single chronological pass. Model failures propagate.
pub async fn merge_timelines(
    model: &dyn LanguageModel,
    model_id: &str,
    topic: &str,
    subtimelines: &[Subtimeline],
) -> Result<String> {
    generate(
        model,
        model_id,
        "Merge the subtimelines into a single timeline that contains all the information \
         present in every subtimeline, arranged chronologically and with narrative flow.",
        &[
            ("overall_topic_pertaining_to", topic),
            ("subtimelines", &render_subtimelines(subtimelines)),
        ],
        MERGE_TEMPERATURE,
    )
    .await
}

/// The to-now pipeline: broad research loop, event extraction, one
/// sub-research loop per event, chronological merge. Runs sequentially;
/// only the research loops are hardened against tool failure.
pub async fn generate_timeline_to_now(
    model: &dyn LanguageModel,
    model_id: &str,
    toolbox: &Toolbox,
    topic: &str,
    time_until: &str,
    max_iters: usize,
    telemetry: &TelemetrySink,
) -> Result<TimelineReport> {
    let research = ResearchLoop::new(model, model_id, toolbox, max_iters);
    let first = research
        .run(&Objective::Broad {
            topic: topic.to_string(),
            time_until: time_until.to_string(),
        })
        .await?;
    telemetry.emit(
        "timeline.broad_completed",
        json!({"status": status_label(first.status), "rounds": first.rounds}),
    );

    let events = extract_events(model, model_id, topic, &first.timeline).await?;
    telemetry.emit("timeline.events_extracted", json!({"count": events.len()}));

    let subtimelines =
        research_subtimelines(model, model_id, toolbox, topic, &events, max_iters).await;
    telemetry.emit(
        "timeline.subtimelines_completed",
        json!({"count": subtimelines.len()}),
    );

    let merged = merge_timelines(model, model_id, topic, &subtimelines).await?;
    telemetry.emit("timeline.completed", json!({"merged_chars": merged.len()}));

    Ok(TimelineReport {
        topic: topic.to_string(),
        time_until: time_until.to_string(),
        first_timeline: first.timeline,
        first_timeline_status: status_label(first.status),
        extracted_events: events,
        subtimelines,
        merged,
    })
}

/// Pretty-printed JSON persistence for pipeline and ensemble reports.
pub fn write_json_report<T: Serialize>(path: &str, report: &T) -> Result<()> {
    let path_buf = PathBuf::from(path);
    if let Some(parent) = path_buf.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report directory '{}'", parent.display()))?;
    }

    let payload =
        serde_json::to_string_pretty(report).context("failed to serialize report to json")?;
    std::fs::write(&path_buf, payload)
        .with_context(|| format!("failed to write report to '{}'", path_buf.display()))
}
