//! `status`, `watch` and `maintenance` handlers.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;

use amotion_core::{StatusSnapshot, Unit};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output::{self, Field};

use super::util::{celsius, flow, percent};

// ── Detail views ────────────────────────────────────────────────────

fn status_fields(s: &StatusSnapshot) -> Vec<Field> {
    let mut fields = vec![
        Field::new("Supply", celsius(s.temp_sup)),
        Field::new("Requested", celsius(s.temp_request)),
        Field::new("Outdoor", celsius(s.temp_oda)),
        Field::new("Outdoor mean", celsius(s.temp_oda_mean)),
        Field::new("Indoor", celsius(s.temp_ida)),
        Field::new("Extract", celsius(s.temp_eta)),
        Field::new("Exhaust", celsius(s.temp_eha)),
        Field::new("Fan", percent(s.fan_mode)),
        Field::new("Fan extract", percent(s.fan_eta_factor)),
        Field::new("Fan supply", percent(s.fan_sup_factor)),
    ];
    if s.flow_ventilation_req.is_some() {
        fields.push(Field::new("Flow requested", flow(s.flow_ventilation_req)));
        fields.push(Field::new("Flow extract", flow(s.flow_eta)));
        fields.push(Field::new("Flow supply", flow(s.flow_sup)));
    }
    fields.extend([
        Field::opt("Mode", s.work_regime.as_deref()),
        Field::opt("Running", s.mode_current.as_deref()),
        Field::opt("Season", s.season_current.as_deref()),
        Field::new("Bypass", percent(s.bypass_estim)),
        Field::new("Preheater", percent(s.preheater_factor)),
        Field::opt(
            "Updated",
            s.last_update
                .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string()),
        ),
    ]);
    fields
}

/// Maintenance counters as rendered by `maintenance`.
#[derive(Debug, Serialize)]
struct Maintenance {
    filters_last_change: Option<NaiveDate>,
    inspection_date: Option<NaiveDate>,
    motor1_hours: Option<u64>,
    motor2_hours: Option<u64>,
    uv_lamp_hours: Option<u64>,
    has_uv_lamp: bool,
}

impl From<&StatusSnapshot> for Maintenance {
    fn from(s: &StatusSnapshot) -> Self {
        Self {
            filters_last_change: s.filters_last_change,
            inspection_date: s.inspection_date,
            motor1_hours: s.motor1_hours,
            motor2_hours: s.motor2_hours,
            uv_lamp_hours: s.uv_lamp_hours,
            has_uv_lamp: s.has_uv_lamp,
        }
    }
}

fn maintenance_fields(m: &Maintenance) -> Vec<Field> {
    let hours = |h: Option<u64>| h.map(|h| format!("{h} h"));
    let mut fields = vec![
        Field::opt("Filters changed", m.filters_last_change),
        Field::opt("Inspection", m.inspection_date),
        Field::opt("Motor 1", hours(m.motor1_hours)),
        Field::opt("Motor 2", hours(m.motor2_hours)),
    ];
    if m.has_uv_lamp {
        fields.push(Field::opt("UV lamp", hours(m.uv_lamp_hours)));
    }
    fields
}

/// One-line summary for `watch` in table mode.
fn summary_line(s: &StatusSnapshot) -> String {
    let time = s.last_update.map_or_else(
        || "--:--:--".into(),
        |t| t.with_timezone(&Local).format("%H:%M:%S").to_string(),
    );
    format!(
        "{time}  supply {}  outdoor {}  fan {}  mode {}",
        celsius(s.temp_sup),
        celsius(s.temp_oda),
        percent(s.fan_mode),
        s.work_regime.as_deref().unwrap_or("-"),
    )
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn show(unit: &Unit, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = unit.refresh().await?;
    let color = output::should_color(global.color);
    let out = output::render_single(global.output, color, snapshot.as_ref(), status_fields)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn maintenance(unit: &Unit, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = unit.fetch_maintenance().await?;
    let view = Maintenance::from(snapshot.as_ref());
    let color = output::should_color(global.color);
    let out = output::render_single(global.output, color, &view, maintenance_fields)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn watch(unit: &Unit, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut errors = unit.session_errors();
    let mut printed = 0usize;

    let print = |snapshot: &Arc<StatusSnapshot>| -> Result<(), CliError> {
        let line = match global.output {
            OutputFormat::Table => summary_line(snapshot),
            // One document per update keeps the stream line-oriented.
            OutputFormat::Json | OutputFormat::JsonCompact => {
                output::render_single(OutputFormat::JsonCompact, false, snapshot.as_ref(), status_fields)?
            }
            format => output::render_single(format, false, snapshot.as_ref(), status_fields)?,
        };
        output::print_output(&line, global.quiet);
        Ok(())
    };

    // Initial poll so the first line is complete.
    let snapshot = unit.refresh().await?;
    let mut stream = unit.status_stream();
    print(&snapshot)?;
    printed += 1;

    while args.count.is_none_or(|n| printed < n) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = errors.changed() => {
                if changed.is_err() {
                    break;
                }
                let fatal = errors.borrow_and_update().clone();
                if let Some(err) = fatal {
                    return Err(err.into());
                }
            }
            next = stream.changed() => {
                let Some(snapshot) = next else { break };
                print(&snapshot)?;
                printed += 1;
            }
        }
    }
    Ok(())
}
