//! `info` handler: identity and capabilities discovered at login.

use serde::Serialize;

use amotion_core::{Identity, Unit};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{self, Field};

#[derive(Debug, Serialize)]
struct UnitInfo {
    #[serde(flatten)]
    identity: Identity,
    url: String,
    flow_min: Option<f64>,
    flow_max: Option<f64>,
}

fn info_fields(i: &UnitInfo) -> Vec<Field> {
    let control = match (i.flow_min, i.flow_max) {
        (Some(min), Some(max)) => format!("air flow {min:.0}-{max:.0} m³/h"),
        _ => "fan power %".into(),
    };
    vec![
        Field::new("Name", i.identity.display_name()),
        Field::opt("Model", i.identity.model.as_deref()),
        Field::opt("Serial", i.identity.serial.as_deref()),
        Field::opt("Brand", i.identity.brand.as_deref()),
        Field::opt("Firmware", i.identity.firmware_version.as_deref()),
        Field::new("Fan control", control),
        Field::new("URL", i.url.clone()),
    ]
}

pub fn show(unit: &Unit, global: &GlobalOpts) -> Result<(), CliError> {
    let range = unit.flow_range();
    let info = UnitInfo {
        identity: Identity::clone(&unit.identity()),
        url: unit.config().url.to_string(),
        flow_min: range.map(|r| r.min),
        flow_max: range.map(|r| r.max),
    };
    let color = output::should_color(global.color);
    let out = output::render_single(global.output, color, &info, info_fields)?;
    output::print_output(&out, global.quiet);
    Ok(())
}
