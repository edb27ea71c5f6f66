// ── Status projection ──
//
// Folds inbound payloads into one `StatusSnapshot`. The snapshot lives in
// a `watch` channel as an `Arc`; each inbound message is applied in a
// single `send_modify`, so readers never observe half of an update.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use amotion_api::models::{DateParts, DiagramData, Moments, UiInfo, VariableRange};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

// ── Snapshot ─────────────────────────────────────────────────────────

/// Latest known state of the unit. Every field is `None` until observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    // Temperatures (°C)
    pub temp_sup: Option<f64>,
    pub temp_oda: Option<f64>,
    pub temp_oda_mean: Option<f64>,
    pub temp_ida: Option<f64>,
    pub temp_eha: Option<f64>,
    pub temp_eta: Option<f64>,
    pub temp_request: Option<f64>,

    // Fans (percent unless noted)
    pub fan_mode: Option<f64>,
    pub fan_eta_factor: Option<f64>,
    pub fan_sup_factor: Option<f64>,
    /// m³/h
    pub flow_eta: Option<f64>,
    /// m³/h
    pub flow_sup: Option<f64>,
    /// m³/h
    pub flow_ventilation_req: Option<f64>,

    // Modes
    pub work_regime: Option<String>,
    pub mode_current: Option<String>,
    pub season_current: Option<String>,

    // Maintenance
    pub filters_last_change: Option<NaiveDate>,
    pub inspection_date: Option<NaiveDate>,
    pub motor1_hours: Option<u64>,
    pub motor2_hours: Option<u64>,
    pub uv_lamp_hours: Option<u64>,
    pub has_uv_lamp: bool,

    // Diagram
    pub bypass_estim: Option<f64>,
    pub preheater_factor: Option<f64>,
    pub preheater_active: Option<bool>,

    pub last_update: Option<DateTime<Utc>>,
    pub last_maintenance_update: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Supply air temperature, the value shown as "current".
    pub fn current_temperature(&self) -> Option<f64> {
        self.temp_sup
    }

    pub fn setpoint(&self) -> Option<f64> {
        self.temp_request
    }

    /// Fold a `ui_info` body in. Present fields overwrite, absent ones stay.
    ///
    /// With a flow range the fan values are derived from air flows;
    /// otherwise the unit's percentages are taken as reported.
    pub fn apply_ui_info(&mut self, info: &UiInfo, flow: Option<VariableRange>, now: DateTime<Utc>) {
        let unit = &info.unit;
        let requests = &info.requests;

        merge(&mut self.temp_sup, unit.temp_sup);
        merge(&mut self.temp_oda, unit.temp_oda);
        merge(&mut self.temp_oda_mean, unit.temp_oda_mean);
        merge(&mut self.temp_ida, unit.temp_ida);
        merge(&mut self.temp_eha, unit.temp_eha);
        merge(&mut self.temp_eta, unit.temp_eta);
        merge(&mut self.temp_request, requests.temp_request);

        merge(&mut self.flow_eta, unit.flow_eta);
        merge(&mut self.flow_sup, unit.flow_sup);
        merge(&mut self.flow_ventilation_req, requests.flow_ventilation_req);

        if let Some(range) = flow {
            merge(
                &mut self.fan_mode,
                requests.flow_ventilation_req.and_then(|f| fan_percent(f, range.max)),
            );
            merge(
                &mut self.fan_eta_factor,
                unit.flow_eta.and_then(|f| fan_percent(f, range.max)),
            );
            merge(
                &mut self.fan_sup_factor,
                unit.flow_sup.and_then(|f| fan_percent(f, range.max)),
            );
        } else {
            merge(&mut self.fan_mode, requests.fan_power_req);
            merge(&mut self.fan_eta_factor, unit.fan_eta_factor);
            merge(&mut self.fan_sup_factor, unit.fan_sup_factor);
        }

        merge(&mut self.work_regime, requests.work_regime.clone());
        merge(&mut self.mode_current, unit.mode_current.clone());
        merge(&mut self.season_current, unit.season_current.clone());

        self.last_update = Some(now);
    }

    /// Fold a `moments/get` body in.
    pub fn apply_maintenance(&mut self, moments: &Moments, now: DateTime<Utc>) {
        self.filters_last_change = moments.last_filter_reset.and_then(DateParts::to_date);
        self.inspection_date = moments.inspection.and_then(DateParts::to_date);
        self.motor1_hours = Some(register_hours(moments.m1_register));
        self.motor2_hours = Some(register_hours(moments.m2_register));

        // A zero register means the unit has no UV lamp fitted.
        self.uv_lamp_hours = moments
            .uv_lamp_register
            .filter(|r| *r > 0.0)
            .map(register_hours);
        self.has_uv_lamp = self.uv_lamp_hours.is_some();

        self.last_maintenance_update = Some(now);
    }

    /// Fold a `ui_diagram_data` body in.
    pub fn apply_diagram(&mut self, diagram: &DiagramData) {
        merge(&mut self.bypass_estim, diagram.bypass_estim);
        merge(&mut self.preheater_factor, diagram.preheater_factor);
        merge(&mut self.preheater_active, diagram.preheater_active);
    }
}

fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

// ── Derivations ──────────────────────────────────────────────────────

/// Round to the nearest multiple of ten, halves away from zero.
pub fn round_to_10(value: f64) -> f64 {
    (value / 10.0).round() * 10.0
}

/// Air flow expressed as a percentage of `max_flow`, rounded to tens.
///
/// `None` when `max_flow` is not a positive, finite number.
pub fn fan_percent(flow: f64, max_flow: f64) -> Option<f64> {
    if !max_flow.is_finite() || max_flow <= 0.0 {
        return None;
    }
    Some(round_to_10(flow / (max_flow / 100.0)))
}

/// Whole operating hours from a seconds register.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
pub fn register_hours(seconds: f64) -> u64 {
    (seconds.max(0.0) / 3600.0).round() as u64
}

// ── Store ────────────────────────────────────────────────────────────

/// Owner of the snapshot channel.
pub struct StatusStore {
    tx: watch::Sender<Arc<StatusSnapshot>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(StatusSnapshot::default()));
        Self { tx }
    }

    pub fn current(&self) -> Arc<StatusSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.tx.subscribe()
    }

    pub fn apply_ui_info(&self, info: &UiInfo, flow: Option<VariableRange>) {
        let now = Utc::now();
        self.tx.send_modify(|snap| Arc::make_mut(snap).apply_ui_info(info, flow, now));
    }

    pub fn apply_maintenance(&self, moments: &Moments) {
        let now = Utc::now();
        self.tx
            .send_modify(|snap| Arc::make_mut(snap).apply_maintenance(moments, now));
    }

    pub fn apply_diagram(&self, diagram: &DiagramData) {
        self.tx.send_modify(|snap| Arc::make_mut(snap).apply_diagram(diagram));
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// A subscription to status changes.
///
/// Offers point-in-time access and change notification, or converts
/// into a `Stream` of snapshots.
pub struct StatusStream {
    receiver: watch::Receiver<Arc<StatusSnapshot>>,
}

impl StatusStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<StatusSnapshot>>) -> Self {
        Self { receiver }
    }

    pub fn latest(&self) -> Arc<StatusSnapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the unit is gone.
    pub async fn changed(&mut self) -> Option<Arc<StatusSnapshot>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Yields the current snapshot first, then one per change.
    pub fn into_stream(self) -> StatusWatchStream {
        StatusWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by the snapshot `watch` channel.
pub struct StatusWatchStream {
    inner: WatchStream<Arc<StatusSnapshot>>,
}

impl Stream for StatusWatchStream {
    type Item = Arc<StatusSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use amotion_api::models::parse_payload;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const FLOW: VariableRange = VariableRange {
        min: 80.0,
        max: 600.0,
    };

    fn ui_info(value: serde_json::Value) -> UiInfo {
        parse_payload("ui_info", value).unwrap()
    }

    fn moments(value: serde_json::Value) -> Moments {
        parse_payload("moments/get", value).unwrap()
    }

    #[test]
    fn flow_readings_become_fan_percentages() {
        let mut snap = StatusSnapshot::default();
        snap.apply_ui_info(
            &ui_info(json!({
                "requests": { "flow_ventilation_req": 300, "temp_request": 21.0 },
                "unit": { "flow_eta": 297, "flow_sup": 318 }
            })),
            Some(FLOW),
            Utc::now(),
        );
        assert_eq!(snap.fan_mode, Some(50.0));
        assert_eq!(snap.fan_eta_factor, Some(50.0));
        assert_eq!(snap.fan_sup_factor, Some(50.0));
        assert_eq!(snap.flow_ventilation_req, Some(300.0));
    }

    #[test]
    fn power_based_units_report_percentages_directly() {
        let mut snap = StatusSnapshot::default();
        snap.apply_ui_info(
            &ui_info(json!({
                "requests": { "fan_power_req": 60, "temp_request": 22.0, "work_regime": "VENTILATION" },
                "unit": { "fan_eta_factor": 60, "fan_sup_factor": 55, "temp_sup": 17.5, "mode_current": "NORMAL" }
            })),
            None,
            Utc::now(),
        );
        assert_eq!(snap.fan_mode, Some(60.0));
        assert_eq!(snap.fan_sup_factor, Some(55.0));
        assert_eq!(snap.current_temperature(), Some(17.5));
        assert_eq!(snap.setpoint(), Some(22.0));
        assert_eq!(snap.work_regime.as_deref(), Some("VENTILATION"));
        assert!(snap.last_update.is_some());
    }

    #[test]
    fn absent_fields_keep_their_last_value() {
        let mut snap = StatusSnapshot::default();
        snap.apply_ui_info(
            &ui_info(json!({ "unit": { "temp_sup": 20.0, "temp_oda": 5.0 } })),
            None,
            Utc::now(),
        );
        snap.apply_ui_info(&ui_info(json!({ "unit": { "temp_sup": 21.0 } })), None, Utc::now());
        assert_eq!(snap.temp_sup, Some(21.0));
        assert_eq!(snap.temp_oda, Some(5.0));
    }

    #[test]
    fn fan_percent_needs_a_positive_maximum() {
        assert_eq!(fan_percent(300.0, 0.0), None);
        assert_eq!(fan_percent(300.0, -600.0), None);
        assert_eq!(fan_percent(300.0, f64::NAN), None);
    }

    #[test]
    fn rounding_to_tens() {
        assert_eq!(fan_percent(300.0, 600.0), Some(50.0));
        assert_eq!(fan_percent(327.0, 600.0), Some(50.0));
        assert_eq!(fan_percent(333.0, 600.0), Some(60.0));
        assert_eq!(round_to_10(45.0), 50.0);
        assert_eq!(round_to_10(44.9), 40.0);
        assert_eq!(round_to_10(0.0), 0.0);
    }

    #[test]
    fn register_seconds_to_hours() {
        assert_eq!(register_hours(7200.0), 2);
        assert_eq!(register_hours(7199.0), 2);
        assert_eq!(register_hours(5399.0), 1);
        assert_eq!(register_hours(0.0), 0);
        assert_eq!(register_hours(-5.0), 0);
    }

    #[test]
    fn maintenance_projection() {
        let mut snap = StatusSnapshot::default();
        snap.apply_maintenance(
            &moments(json!({
                "lastFilterReset": { "day": 3, "month": 2, "year": 2025 },
                "inspection": { "day": 14, "month": 6, "year": 2024 },
                "m1_register": 7200, "m2_register": 7199, "uv_lamp_register": 0
            })),
            Utc::now(),
        );
        assert_eq!(snap.filters_last_change, NaiveDate::from_ymd_opt(2025, 2, 3));
        assert_eq!(snap.inspection_date, NaiveDate::from_ymd_opt(2024, 6, 14));
        assert_eq!(snap.motor1_hours, Some(2));
        assert_eq!(snap.motor2_hours, Some(2));
        assert_eq!(snap.uv_lamp_hours, None);
        assert!(!snap.has_uv_lamp);
        assert!(snap.last_maintenance_update.is_some());
    }

    #[test]
    fn uv_lamp_hours_when_fitted() {
        let mut snap = StatusSnapshot::default();
        snap.apply_maintenance(
            &moments(json!({ "m1_register": 0, "m2_register": 0, "uv_lamp_register": 36000 })),
            Utc::now(),
        );
        assert_eq!(snap.uv_lamp_hours, Some(10));
        assert!(snap.has_uv_lamp);
    }

    #[test]
    fn diagram_projection() {
        let mut snap = StatusSnapshot::default();
        let diagram: amotion_api::models::DiagramResponse = parse_payload(
            "ui_diagram_data",
            json!({ "ui_diagram_data": {
                "bypass_estim": 100, "damper_io_state": true, "preheater_active": false,
                "preheater_factor": 0, "preheater_type": "ELECTRO_PWM"
            }}),
        )
        .unwrap();
        snap.apply_diagram(&diagram.ui_diagram_data);
        assert_eq!(snap.bypass_estim, Some(100.0));
        assert_eq!(snap.preheater_factor, Some(0.0));
        assert_eq!(snap.preheater_active, Some(false));
    }

    #[tokio::test]
    async fn store_notifies_subscribers_once_per_message() {
        let store = StatusStore::new();
        let mut rx = store.subscribe();

        store.apply_ui_info(
            &ui_info(json!({ "unit": { "temp_sup": 19.0 }, "requests": { "temp_request": 21.0 } })),
            None,
        );

        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.temp_sup, Some(19.0));
        assert_eq!(snap.temp_request, Some(21.0));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.current().temp_sup, Some(19.0));
    }

    #[tokio::test]
    async fn stream_yields_current_then_changes() {
        let store = StatusStore::new();
        let mut stream = StatusStream::new(store.subscribe()).into_stream();

        let first = stream.next().await.unwrap();
        assert!(first.temp_sup.is_none());

        store.apply_ui_info(&ui_info(json!({ "unit": { "temp_sup": 18.0 } })), None);
        let second = stream.next().await.unwrap();
        assert_eq!(second.temp_sup, Some(18.0));
    }
}
