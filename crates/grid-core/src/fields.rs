//! The set/get surface.
//!
//! Parameter names are case-insensitive. `get_value` returns the null
//! sentinel for unknown fields; `set_value` surfaces unknown-parameter
//! and invalid-value faults without changing state.

use grid_base::{
    units::convert, Alert, ChangeCode, ObjectError, OpFlags, SolverMode, StateData, Time, Unit,
    NULL_VAL,
};

use crate::component::ComponentKind;
use crate::link;
use crate::network::Network;
use crate::object::ObjectId;

impl Network {
    /// Read a named scalar from an object, converting into `units`.
    pub fn get_value(&self, id: ObjectId, field: &str, units: Unit) -> f64 {
        let field = field.to_ascii_lowercase();
        let Some(comp) = self.get(id) else {
            return NULL_VAL;
        };
        let bases = self.bases_for(id);
        let cv = |value: f64, natural: Unit| convert(value, natural, units, bases);

        // fields common to every component
        match field.as_str() {
            "enabled" => return if comp.info.is_enabled() { 1.0 } else { 0.0 },
            "updateperiod" | "period" => {
                return cv(comp.info.update_period.as_secs(), Unit::Second)
            }
            "nextupdatetime" => return cv(comp.info.next_update_time.as_secs(), Unit::Second),
            _ => {}
        }

        match &comp.kind {
            ComponentKind::Bus(bus) => match field.as_str() {
                "voltage" | "v" | "volt" => cv(bus.voltage, Unit::PerUnit),
                "angle" | "ang" | "theta" => cv(bus.angle, Unit::Radian),
                "freq" | "frequency" | "f" => cv(bus.freq, Unit::PerUnit),
                "vtarget" => cv(bus.v_target, Unit::PerUnit),
                "atarget" => cv(bus.a_target, Unit::Radian),
                "qmax" => cv(bus.q_max, Unit::PerUnit),
                "qmin" => cv(bus.q_min, Unit::PerUnit),
                "pmax" => cv(bus.p_max, Unit::PerUnit),
                "pmin" => cv(bus.p_min, Unit::PerUnit),
                "genp" | "genq" | "load" | "loadp" | "loadq" | "linkp" | "linkq" | "sump"
                | "sumq" => {
                    let sd = StateData::empty(Time::ZERO);
                    let sums = crate::bus::bus_sums_snapshot(self, id, &sd, SolverMode::LOCAL);
                    let value = match field.as_str() {
                        "genp" => sums.gen_p,
                        "genq" => sums.gen_q,
                        "load" | "loadp" => sums.load_p,
                        "loadq" => sums.load_q,
                        "linkp" => sums.link_p,
                        "linkq" => sums.link_q,
                        "sump" => sums.sum_p(),
                        _ => sums.sum_q(),
                    };
                    cv(value, Unit::PerUnit)
                }
                "gencount" => bus.generators.len() as f64,
                "loadcount" => bus.loads.len() as f64,
                "linkcount" => bus.links.len() as f64,
                _ => NULL_VAL,
            },
            ComponentKind::Link(lnk) => {
                let flow = |terminal: u8| {
                    let bus = if terminal == 2 { lnk.bus2 } else { lnk.bus1 };
                    let uid = bus.and_then(|b| self.get(b)).map(|c| c.info.uid)?;
                    let sd = StateData::empty(Time::ZERO);
                    link::terminal_flow(self, id, uid, &sd, SolverMode::LOCAL)
                };
                match field.as_str() {
                    "current" | "current1" => flow(1).map(|f| f.current()).unwrap_or(NULL_VAL),
                    "current2" => flow(2).map(|f| f.current()).unwrap_or(NULL_VAL),
                    "realcurrent1" => flow(1).map(|f| f.real_current).unwrap_or(NULL_VAL),
                    "realcurrent2" => flow(2).map(|f| f.real_current).unwrap_or(NULL_VAL),
                    "imagcurrent1" => flow(1).map(|f| f.imag_current).unwrap_or(NULL_VAL),
                    "imagcurrent2" => flow(2).map(|f| f.imag_current).unwrap_or(NULL_VAL),
                    "p" | "p1" => flow(1).map(|f| cv(f.p, Unit::PerUnit)).unwrap_or(NULL_VAL),
                    "p2" => flow(2).map(|f| cv(f.p, Unit::PerUnit)).unwrap_or(NULL_VAL),
                    "q" | "q1" => flow(1).map(|f| cv(f.q, Unit::PerUnit)).unwrap_or(NULL_VAL),
                    "q2" => flow(2).map(|f| cv(f.q, Unit::PerUnit)).unwrap_or(NULL_VAL),
                    "loss" => match (flow(1), flow(2)) {
                        (Some(f1), Some(f2)) => cv(f1.p + f2.p, Unit::PerUnit),
                        _ => NULL_VAL,
                    },
                    "switch1" => {
                        if lnk.switch1_open {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    "switch2" => {
                        if lnk.switch2_open {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    "connected" => {
                        if lnk.is_connected() {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    "r" => lnk.r,
                    "x" => lnk.x,
                    "b" => lnk.b,
                    "g" => lnk.g,
                    "rating" => cv(lnk.rating, Unit::PerUnit),
                    _ => NULL_VAL,
                }
            }
            ComponentKind::Load(load) => match field.as_str() {
                "p" => cv(load.p, Unit::PerUnit),
                "q" => cv(load.q, Unit::PerUnit),
                "ip" => load.ip,
                "iq" => load.iq,
                "yp" => load.yp,
                "yq" => load.yq,
                "subloadcount" => load
                    .aggregate
                    .as_ref()
                    .map(|part| part.sub_loads.len() as f64)
                    .unwrap_or(0.0),
                _ => NULL_VAL,
            },
            ComponentKind::Generator(gen) => match field.as_str() {
                "p" | "pset" => cv(gen.pset, Unit::PerUnit),
                "q" | "qset" => cv(gen.qset, Unit::PerUnit),
                "qmax" => cv(gen.q_max, Unit::PerUnit),
                "qmin" => cv(gen.q_min, Unit::PerUnit),
                "pmax" => cv(gen.p_max, Unit::PerUnit),
                "pmin" => cv(gen.p_min, Unit::PerUnit),
                "vtarget" => gen.v_target,
                _ => NULL_VAL,
            },
            ComponentKind::Relay(_) => crate::relay::relay_field(self, id, &field, units),
            ComponentKind::Area(area) => match field.as_str() {
                "primarycount" => area.primaries.len() as f64,
                _ => NULL_VAL,
            },
        }
    }

    /// Assign a named scalar parameter, converting `value` from `units`.
    pub fn set_value(
        &mut self,
        id: ObjectId,
        param: &str,
        value: f64,
        units: Unit,
    ) -> Result<ChangeCode, ObjectError> {
        let param = param.to_ascii_lowercase();
        if self.get(id).is_none() {
            return Err(ObjectError::StaleHandle);
        }
        let bases = self.bases_for(id);
        let cv = |natural: Unit| convert(value, units, natural, bases);

        // common parameters
        match param.as_str() {
            "updateperiod" | "period" | "samplingperiod" | "ts" | "sampleperiod" => {
                let secs = cv(Unit::Second);
                if secs <= 0.0 {
                    return Err(ObjectError::InvalidParameterValue(
                        param,
                        "period must be positive".to_string(),
                    ));
                }
                if let Some(c) = self.get_mut(id) {
                    c.info.update_period = Time::seconds(secs);
                    c.info.next_update_time = Time::ZERO;
                    c.info.flags.insert(OpFlags::UPDATES_ENABLED);
                }
                return Ok(ChangeCode::ParameterChange);
            }
            "enabled" => {
                let enable = value != 0.0;
                if let Some(c) = self.get_mut(id) {
                    if enable {
                        c.info.flags.insert(OpFlags::ENABLED);
                    } else {
                        c.info.flags.remove(OpFlags::ENABLED);
                    }
                }
                self.alert(id, Alert::StateCountChange);
                return Ok(ChangeCode::JacobianChange);
            }
            _ => {}
        }

        let kind_tag = self.get(id).map(|c| c.kind.type_name()).unwrap_or("");
        match kind_tag {
            "bus" => {
                let Some(bus) = self.bus_mut(id) else {
                    return Err(ObjectError::StaleHandle);
                };
                let code = match param.as_str() {
                    "voltage" | "v" => {
                        bus.voltage = cv(Unit::PerUnit);
                        ChangeCode::StateChange
                    }
                    "angle" | "ang" | "theta" => {
                        bus.angle = cv(Unit::Radian);
                        ChangeCode::StateChange
                    }
                    "freq" | "f" => {
                        bus.freq = cv(Unit::PerUnit);
                        ChangeCode::StateChange
                    }
                    "vtarget" => {
                        bus.v_target = cv(Unit::PerUnit);
                        ChangeCode::ParameterChange
                    }
                    "atarget" => {
                        bus.a_target = cv(Unit::Radian);
                        ChangeCode::ParameterChange
                    }
                    "qmax" => {
                        bus.q_max = cv(Unit::PerUnit);
                        ChangeCode::ParameterChange
                    }
                    "qmin" => {
                        bus.q_min = cv(Unit::PerUnit);
                        ChangeCode::ParameterChange
                    }
                    "pmax" => {
                        bus.p_max = cv(Unit::PerUnit);
                        ChangeCode::ParameterChange
                    }
                    "pmin" => {
                        bus.p_min = cv(Unit::PerUnit);
                        ChangeCode::ParameterChange
                    }
                    "basevoltage" | "basekv" => {
                        bus.base_voltage = value;
                        ChangeCode::ParameterChange
                    }
                    "vmax" => {
                        bus.v_max = cv(Unit::PerUnit);
                        ChangeCode::ParameterChange
                    }
                    "vmin" => {
                        bus.v_min = cv(Unit::PerUnit);
                        ChangeCode::ParameterChange
                    }
                    _ => return Err(ObjectError::UnknownParameter(param)),
                };
                Ok(code)
            }
            "link" => match param.as_str() {
                "switch1" | "switch" => {
                    link::set_switch(self, id, 1, value != 0.0);
                    Ok(ChangeCode::JacobianChange)
                }
                "switch2" => {
                    link::set_switch(self, id, 2, value != 0.0);
                    Ok(ChangeCode::JacobianChange)
                }
                "r" | "x" | "b" | "g" | "rating" => {
                    let Some(lnk) = self.link_mut(id) else {
                        return Err(ObjectError::StaleHandle);
                    };
                    match param.as_str() {
                        "r" => lnk.r = value,
                        "x" => lnk.x = value,
                        "b" => lnk.b = value,
                        "g" => lnk.g = value,
                        _ => lnk.rating = value,
                    }
                    lnk.cache.valid = false;
                    Ok(ChangeCode::ParameterChange)
                }
                _ => Err(ObjectError::UnknownParameter(param)),
            },
            "load" => {
                let Some(load) = self.load_mut(id) else {
                    return Err(ObjectError::StaleHandle);
                };
                match param.as_str() {
                    "p" => load.p = cv(Unit::PerUnit),
                    "q" => load.q = cv(Unit::PerUnit),
                    "ip" => load.ip = value,
                    "iq" => load.iq = value,
                    "yp" => load.yp = value,
                    "yq" => load.yq = value,
                    "consumesimpleload" => {
                        load.aggregate
                            .get_or_insert_with(Default::default)
                            .consume_simple_load = value != 0.0;
                    }
                    _ => return Err(ObjectError::UnknownParameter(param)),
                }
                Ok(ChangeCode::ParameterChange)
            }
            "generator" => {
                let Some(gen) = self.generator_mut(id) else {
                    return Err(ObjectError::StaleHandle);
                };
                match param.as_str() {
                    "p" | "pset" => gen.pset = cv(Unit::PerUnit),
                    "q" | "qset" => gen.qset = cv(Unit::PerUnit),
                    "qmax" => gen.q_max = cv(Unit::PerUnit),
                    "qmin" => gen.q_min = cv(Unit::PerUnit),
                    "pmax" => gen.p_max = cv(Unit::PerUnit),
                    "pmin" => gen.p_min = cv(Unit::PerUnit),
                    "vtarget" => gen.v_target = value,
                    _ => return Err(ObjectError::UnknownParameter(param)),
                }
                Ok(ChangeCode::ParameterChange)
            }
            "area" => Err(ObjectError::UnknownParameter(param)),
            _ => crate::relay::set_relay_value(self, id, &param, value, units),
        }
    }

    /// String-valued parameter assignment (bus types, relay conditions and
    /// actions, sensor wiring). Numeric strings fall through to
    /// `set_value`.
    pub fn set_string(
        &mut self,
        id: ObjectId,
        param: &str,
        value: &str,
    ) -> Result<(), ObjectError> {
        let param = param.to_ascii_lowercase();
        let kind_tag = self.get(id).map(|c| c.kind.type_name()).unwrap_or("");

        if param == "name" {
            let value = value.to_string();
            if let Some(c) = self.get_mut(id) {
                c.info.name = value;
            }
            return Ok(());
        }

        match kind_tag {
            "bus" => {
                if param == "type" || param == "bustype" {
                    use crate::bus::BusType;
                    let new_type = match value.to_ascii_lowercase().as_str() {
                        "pq" => BusType::Pq,
                        "pv" => BusType::Pv,
                        "slk" | "swing" | "slack" => BusType::Slk,
                        "afix" => BusType::Afix,
                        other => {
                            return Err(ObjectError::InvalidParameterValue(
                                param,
                                format!("unknown bus type '{other}'"),
                            ))
                        }
                    };
                    if let Some(bus) = self.bus_mut(id) {
                        bus.prev_type = new_type;
                        bus.bus_type = new_type;
                    }
                    self.alert(id, Alert::JacCountChange);
                    return Ok(());
                }
            }
            "area" | "load" | "generator" | "link" => {}
            _ => {
                // relay family handles its own string parameters
                if crate::relay::set_relay_string(self, id, &param, value)? {
                    return Ok(());
                }
            }
        }

        // numeric fallback: "0.45" and friends route to set_value
        match value.trim().parse::<f64>() {
            Ok(v) => self.set_value(id, &param, v, Unit::Def).map(|_| ()),
            Err(_) => Err(ObjectError::UnknownParameter(param)),
        }
    }

    /// Named boolean flags mapped to the operational bitset.
    pub fn set_flag(&mut self, id: ObjectId, flag: &str, value: bool) -> Result<(), ObjectError> {
        let flag = flag.to_ascii_lowercase();
        if self.get(id).is_none() {
            return Err(ObjectError::StaleHandle);
        }

        // relay family first: sampled/continuous need sample-time upkeep
        if self.relay(id).is_some() && crate::relay::set_relay_flag(self, id, &flag, value)? {
            return Ok(());
        }

        if flag == "sampled" {
            if let Some(c) = self.get_mut(id) {
                c.info.flags.set(OpFlags::CONTINUOUS, !value);
            }
            return Ok(());
        }
        match OpFlags::from_flag_name(&flag) {
            Some(bit) => {
                if let Some(c) = self.get_mut(id) {
                    c.info.flags.set(bit, value);
                }
                if bit == OpFlags::ENABLED || bit == OpFlags::DISCONNECTED {
                    self.alert(id, Alert::StateCountChange);
                }
                Ok(())
            }
            None => Err(ObjectError::UnknownParameter(flag)),
        }
    }

    pub fn get_flag(&self, id: ObjectId, flag: &str) -> Result<bool, ObjectError> {
        let flag = flag.to_ascii_lowercase();
        let Some(comp) = self.get(id) else {
            return Err(ObjectError::StaleHandle);
        };
        if flag == "sampled" {
            return Ok(!comp.info.flags.contains(OpFlags::CONTINUOUS));
        }
        match OpFlags::from_flag_name(&flag) {
            Some(bit) => Ok(comp.info.flags.contains(bit)),
            None => Err(ObjectError::UnknownParameter(flag)),
        }
    }
}
