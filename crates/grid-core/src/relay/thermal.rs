//! Transformer thermal model.
//!
//! A sampled sensor specialization over a link: loss heating drives a
//! top-oil temperature lag, which drives a hot-spot lag. Outputs are the
//! ambient, top-oil, and hot-spot temperatures; optional alarms fire at
//! two temperature levels and a cutout that opens the link.

use grid_base::{Alert, ChangeCode, ObjectError, OpFlags, Time, Unit, NULL_VAL};
use tracing::warn;

use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core::update_a_core;
use crate::relay::RelayKind;

#[derive(Debug, Clone)]
pub struct ThermalModel {
    /// Current rating (puA) that normalizes loading.
    pub rating: f64,
    /// Ambient temperature (degC) with an optional drift rate.
    pub ambient: f64,
    pub dtempdt: f64,
    /// Rated hot-spot rise over top oil (degC).
    pub d_ths: f64,
    /// Rated top-oil rise over ambient (degC).
    pub d_ttor: f64,
    /// Top-oil time constant (s).
    pub t_tor: f64,
    /// Winding (hot-spot) time constant (s).
    pub t_gr: f64,
    /// Loss ratio at rated load.
    pub loss_ratio: f64,
    /// Oil exponent.
    pub n: f64,
    /// Winding exponent.
    pub m: f64,
    pub top_oil: f64,
    pub hot_spot: f64,
    pub alarm_temp1: f64,
    pub alarm_temp2: f64,
    pub cutout_temp: f64,
    pub alarm_delay: Time,
    pub enable_alarms: bool,
    alarm1_since: Option<Time>,
    alarm2_since: Option<Time>,
    cutout_since: Option<Time>,
    alarm1_raised: bool,
    alarm2_raised: bool,
    cut_out: bool,
    initialized: bool,
}

impl Default for ThermalModel {
    fn default() -> Self {
        ThermalModel {
            rating: 1.0,
            ambient: 20.0,
            dtempdt: 0.0,
            d_ths: 25.0,
            d_ttor: 55.0,
            t_tor: 3.0 * 3600.0,
            t_gr: 5.0 * 60.0,
            loss_ratio: 4.5,
            n: 0.8,
            m: 0.8,
            top_oil: 0.0,
            hot_spot: 0.0,
            alarm_temp1: 0.0,
            alarm_temp2: 0.0,
            cutout_temp: 0.0,
            alarm_delay: Time::seconds(60.0),
            enable_alarms: false,
            alarm1_since: None,
            alarm2_since: None,
            cutout_since: None,
            alarm1_raised: false,
            alarm2_raised: false,
            cut_out: false,
            initialized: false,
        }
    }
}

impl ThermalModel {
    /// Steady-state top-oil ultimate rise at load factor `k`.
    fn top_oil_ultimate(&self, k: f64) -> f64 {
        self.ambient
            + self.d_ttor
                * ((k * k * self.loss_ratio + 1.0) / (self.loss_ratio + 1.0)).powf(self.n)
    }

    /// Steady-state hot-spot ultimate rise over the present top oil.
    fn hot_spot_ultimate(&self, k: f64) -> f64 {
        self.top_oil + self.d_ths * k.powf(2.0 * self.m)
    }
}

fn model_ref(net: &Network, id: ObjectId) -> Option<&ThermalModel> {
    match net.relay(id).map(|r| &r.kind) {
        Some(RelayKind::Thermal(t)) => Some(t),
        _ => None,
    }
}

fn model_mut(net: &mut Network, id: ObjectId) -> Option<&mut ThermalModel> {
    match net.relay_mut(id).map(|r| &mut r.kind) {
        Some(RelayKind::Thermal(t)) => Some(t),
        _ => None,
    }
}

fn load_factor(net: &Network, id: ObjectId) -> f64 {
    let Some(source) = net.relay(id).and_then(|r| r.core.source) else {
        return 0.0;
    };
    let current = net.get_value(source, "current1", Unit::Def);
    let rating = model_ref(net, id).map(|t| t.rating).unwrap_or(1.0);
    if grid_base::is_null(current) || rating <= 0.0 {
        return 0.0;
    }
    current / rating
}

pub fn dyn_init(net: &mut Network, id: ObjectId, _time: Time) {
    // the thermal model samples; it never participates in root finding
    if let Some(c) = net.get_mut(id) {
        c.info.flags.remove(OpFlags::CONTINUOUS);
        if c.info.update_period == Time::MAX {
            c.info.update_period = Time::seconds(60.0);
        }
    }
    if net.relay(id).and_then(|r| r.core.source).is_none() {
        warn!(relay = %id, "thermal model has no source link");
    }
    let k = load_factor(net, id);
    if let Some(model) = model_mut(net, id) {
        if !model.initialized {
            model.top_oil = model.top_oil_ultimate(k);
            model.hot_spot = model.hot_spot_ultimate(k);
            model.initialized = true;
        }
    }
}

pub fn update_a(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    let due = net
        .relay(id)
        .map(|r| time >= r.core.next_sample_time)
        .unwrap_or(false);
    if due {
        let dt = net
            .get(id)
            .map(|c| c.info.update_period.as_secs())
            .unwrap_or(60.0);
        let k = load_factor(net, id);
        if let Some(model) = model_mut(net, id) {
            model.ambient += model.dtempdt * dt;
            let tou = model.top_oil_ultimate(k);
            let alpha = (-dt / model.t_tor).exp();
            model.top_oil = tou + (model.top_oil - tou) * alpha;
            let hsu = model.hot_spot_ultimate(k);
            let beta = (-dt / model.t_gr).exp();
            model.hot_spot = hsu + (model.hot_spot - hsu) * beta;
        }
        check_alarms(net, id, time);
    }
    update_a_core(net, id, time)
}

/// Level checks with the configured holding delay; each alarm fires once
/// per excursion, the cutout opens the link.
fn check_alarms(net: &mut Network, id: ObjectId, time: Time) {
    let Some(model) = model_ref(net, id) else { return };
    if !model.enable_alarms {
        return;
    }
    let hot_spot = model.hot_spot;
    let delay = model.alarm_delay;
    let (a1, a2, cut) = (model.alarm_temp1, model.alarm_temp2, model.cutout_temp);
    let source = net.relay(id).and_then(|r| r.core.source);

    let mut raise1 = false;
    let mut raise2 = false;
    let mut raise_cut = false;
    if let Some(model) = model_mut(net, id) {
        let track = |level: f64,
                     since: &mut Option<Time>,
                     raised: &mut bool,
                     out: &mut bool| {
            if level > 0.0 && hot_spot > level {
                let start = since.get_or_insert(time);
                if time - *start >= delay && !*raised {
                    *raised = true;
                    *out = true;
                }
            } else {
                *since = None;
                *raised = false;
            }
        };
        let mut a1_raised = model.alarm1_raised;
        let mut a1_since = model.alarm1_since;
        track(a1, &mut a1_since, &mut a1_raised, &mut raise1);
        model.alarm1_raised = a1_raised;
        model.alarm1_since = a1_since;

        let mut a2_raised = model.alarm2_raised;
        let mut a2_since = model.alarm2_since;
        track(a2, &mut a2_since, &mut a2_raised, &mut raise2);
        model.alarm2_raised = a2_raised;
        model.alarm2_since = a2_since;

        let mut cut_raised = model.cut_out;
        let mut cut_since = model.cutout_since;
        track(cut, &mut cut_since, &mut cut_raised, &mut raise_cut);
        model.cut_out = cut_raised;
        model.cutout_since = cut_since;
    }
    if raise1 {
        net.alert(id, Alert::TemperatureAlarm1);
    }
    if raise2 {
        net.alert(id, Alert::TemperatureAlarm2);
    }
    if raise_cut {
        net.alert(id, Alert::TemperatureCutout);
        if let Some(link) = source {
            let _ = net.set_value(link, "switch1", 1.0, Unit::Def);
        }
    }
}

pub fn field(t: &ThermalModel, field: &str) -> f64 {
    match field {
        "ambient" | "ambienttemp" | "airtemp" => t.ambient,
        "top_oil" | "topoil" | "top_oil_temp" => t.top_oil,
        "hot_spot" | "hotspot" | "hot_spot_temp" => t.hot_spot,
        "rating" => t.rating,
        "loading" => NULL_VAL, // needs the network; read current1/rating instead
        _ => NULL_VAL,
    }
}

pub fn set_value(t: &mut ThermalModel, param: &str, value: f64) -> Result<bool, ObjectError> {
    match param {
        "rating" => t.rating = value,
        "ambient" | "ambienttemp" => t.ambient = value,
        "dtempdt" => t.dtempdt = value,
        "dths" | "rated_hot_spot_rise" => t.d_ths = value,
        "dttor" | "rated_top_oil_rise" => t.d_ttor = value,
        "ttor" => t.t_tor = value,
        "tgr" => t.t_gr = value,
        "lossratio" | "lr" => t.loss_ratio = value,
        "n" => t.n = value,
        "m" => t.m = value,
        "alarmtemp1" => t.alarm_temp1 = value,
        "alarmtemp2" => t.alarm_temp2 = value,
        "cutouttemp" => t.cutout_temp = value,
        "alarmdelay" => {
            if value < 0.0 {
                return Err(ObjectError::InvalidParameterValue(
                    param.to_string(),
                    "delay must be non-negative".to_string(),
                ));
            }
            t.alarm_delay = Time::seconds(value);
        }
        "enablealarms" | "enable_alarms" => t.enable_alarms = value != 0.0,
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_at_rated_load() {
        let model = ThermalModel::default();
        let tou = model.top_oil_ultimate(1.0);
        assert!((tou - (model.ambient + model.d_ttor)).abs() < 1e-9);
        let low = model.top_oil_ultimate(0.0);
        assert!(low < tou);
        assert!(low > model.ambient);
    }

    #[test]
    fn hot_spot_rises_with_load() {
        let mut model = ThermalModel::default();
        model.top_oil = 60.0;
        assert!(model.hot_spot_ultimate(1.2) > model.hot_spot_ultimate(0.8));
    }
}
