//! The relay engine.
//!
//! Trigger flow: root finding (or sampled polling) flips a condition into
//! the triggered state; `trigger_condition` fires immediate actions,
//! schedules delayed ones as pending condition checks, and evaluates
//! multi-condition rules. `evaluate_cond_check` re-tests at the scheduled
//! time and either fires the action or clears the condition back to
//! active, which disables its margin again.

use grid_base::{
    Alert, ChangeCode, MatrixSink, ObjectError, OpFlags, SolverMode, StateData, Time, Unit,
    NULL_LOCATION, NULL_VAL,
};
use grid_expr::{parse_event, EventSpec};
use tracing::{debug, warn};

use crate::events::Event;
use crate::measure::{make_condition, RelayCondition};
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::{
    breaker, bus_relay, differential, fuse, load_relay, pmu, sensor, thermal, Action,
    ActionTrigger, CondCheck, ConditionStatus, MultiTrigger, RelayKind,
};

// ============================================================================
// Configuration
// ============================================================================

/// Append a condition; the parallel trigger/status arrays grow with it.
pub fn add_condition(net: &mut Network, id: ObjectId, condition: RelayCondition) -> usize {
    let Some(relay) = net.relay_mut(id) else {
        return 0;
    };
    relay.core.push_condition(condition);
    relay.core.conditions.len() - 1
}

pub fn add_action(net: &mut Network, id: ObjectId, action: Action) -> usize {
    let Some(relay) = net.relay_mut(id) else {
        return 0;
    };
    relay.core.actions.push(action);
    relay.core.actions.len() - 1
}

/// Wire `action` to fire `delay` after `condition` triggers. An existing
/// entry for the pair just updates the delay.
pub fn set_action_trigger(
    net: &mut Network,
    id: ObjectId,
    action: usize,
    condition: usize,
    delay: Time,
) {
    let Some(relay) = net.relay_mut(id) else { return };
    if condition >= relay.core.conditions.len() {
        warn!(relay = %id, condition, "action trigger references unknown condition");
        return;
    }
    if action >= relay.core.actions.len() {
        warn!(relay = %id, action, "action trigger references unknown action");
        return;
    }
    for trigger in &mut relay.core.action_triggers[condition] {
        if trigger.action == action {
            trigger.delay = delay;
            return;
        }
    }
    relay.core.action_triggers[condition].push(ActionTrigger { action, delay });
}

/// Wire `action` to fire once every condition in `conditions` has been
/// triggered for at least `delay`.
pub fn set_multi_trigger(
    net: &mut Network,
    id: ObjectId,
    action: usize,
    conditions: &[usize],
    delay: Time,
) {
    let Some(relay) = net.relay_mut(id) else { return };
    if action >= relay.core.actions.len() {
        return;
    }
    for &condition in conditions {
        if condition >= relay.core.conditions.len() {
            continue;
        }
        relay.core.multi_triggers[condition].push(MultiTrigger {
            action,
            conditions: conditions.to_vec(),
            delay,
        });
    }
}

pub fn condition_status(net: &Network, id: ObjectId, condition: usize) -> ConditionStatus {
    net.relay(id)
        .and_then(|r| r.core.c_states.get(condition).copied())
        .unwrap_or(ConditionStatus::Disabled)
}

pub fn set_condition_status(
    net: &mut Network,
    id: ObjectId,
    condition: usize,
    status: ConditionStatus,
) {
    {
        let Some(relay) = net.relay_mut(id) else { return };
        if condition >= relay.core.conditions.len() {
            return;
        }
        relay.core.c_states[condition] = status;
        match status {
            ConditionStatus::Active => relay.core.conditions[condition].use_margin(false),
            ConditionStatus::Triggered => relay.core.conditions[condition].use_margin(true),
            ConditionStatus::Disabled => {}
        }
    }
    if status == ConditionStatus::Disabled {
        clear_cond_checks(net, id, condition);
    }
    update_root_count(net, id, true);
}

pub fn check_condition(net: &Network, id: ObjectId, condition: usize) -> bool {
    net.relay(id)
        .and_then(|r| r.core.conditions.get(condition))
        .map(|c| c.check(net))
        .unwrap_or(false)
}

pub fn get_condition_value(net: &Network, id: ObjectId, condition: usize) -> f64 {
    net.relay(id)
        .and_then(|r| r.core.conditions.get(condition))
        .map(|c| c.get_val(1, net))
        .unwrap_or(NULL_VAL)
}

pub fn get_condition_value_state(
    net: &Network,
    id: ObjectId,
    condition: usize,
    sd: &StateData,
    mode: SolverMode,
) -> f64 {
    net.relay(id)
        .and_then(|r| r.core.conditions.get(condition))
        .map(|c| c.get_val_state(1, net, sd, mode))
        .unwrap_or(NULL_VAL)
}

// ============================================================================
// Root bookkeeping
// ============================================================================

/// Rebuild the set of conditions carrying roots: every active condition,
/// plus every triggered one when the relay is resettable. Alerts on a
/// count change.
pub fn update_root_count(net: &mut Network, id: ObjectId, alert_change: bool) {
    let resettable = net
        .get(id)
        .map(|c| c.info.flags.contains(OpFlags::RESETTABLE))
        .unwrap_or(false);
    let changed = {
        let Some(relay) = net.relay_mut(id) else { return };
        let mut with_roots = Vec::new();
        for (k, status) in relay.core.c_states.iter().enumerate() {
            match status {
                ConditionStatus::Active => with_roots.push(k),
                ConditionStatus::Triggered if resettable => with_roots.push(k),
                _ => {}
            }
        }
        let different = relay.core.conditions_with_roots != with_roots;
        relay.core.conditions_with_roots = with_roots;
        different
    };

    let root_count = net.relay(id).map(|r| r.core.root_count()).unwrap_or(0);
    if let Some(comp) = net.get_mut(id) {
        comp.info
            .flags
            .set(OpFlags::HAS_ROOTS, root_count > 0);
        comp.info
            .flags
            .set(OpFlags::HAS_ALG_ROOTS, root_count > 0);
        comp.offsets.root_unload();
    }
    if changed && alert_change {
        net.alert(id, Alert::RootCountChange);
    }
}

// ============================================================================
// Trigger flow
// ============================================================================

/// Flip a condition into the triggered state and run its consequences.
pub fn trigger_condition(
    net: &mut Network,
    id: ObjectId,
    condition: usize,
    trigger_time: Time,
    minimum_delay: Time,
) -> ChangeCode {
    let mut code = ChangeCode::NoChange;
    {
        let Some(relay) = net.relay_mut(id) else {
            return code;
        };
        if condition >= relay.core.conditions.len() {
            return code;
        }
        relay.core.c_states[condition] = ConditionStatus::Triggered;
        relay.core.conditions[condition].use_margin(true);
        relay.core.trigger_times[condition] = trigger_time;
        relay.core.trigger_count += 1;
    }
    debug!(relay = %id, condition, time = %trigger_time, "condition triggered");

    // specialization hook runs before the generic action triggers
    condition_triggered_hook(net, id, condition, trigger_time);

    let triggers: Vec<ActionTrigger> = net
        .relay(id)
        .map(|r| r.core.action_triggers.get(condition).cloned().unwrap_or_default())
        .unwrap_or_default();
    for trigger in triggers {
        if trigger.delay <= minimum_delay {
            code.absorb(execute_action(net, id, trigger.action, condition, trigger_time));
        } else {
            let test_time = trigger_time + trigger.delay;
            if let Some(relay) = net.relay_mut(id) {
                relay.core.cond_checks.push(CondCheck {
                    condition,
                    action: trigger.action,
                    test_time,
                    multi: false,
                });
            }
            schedule_update(net, id, test_time);
        }
    }

    code.absorb(multi_condition_check_execute(
        net,
        id,
        condition,
        trigger_time,
        minimum_delay,
    ));
    code
}

/// Run one action now.
pub fn execute_action(
    net: &mut Network,
    id: ObjectId,
    action: usize,
    condition: usize,
    time: Time,
) -> ChangeCode {
    let Some(act) = net.relay(id).and_then(|r| r.core.actions.get(action).cloned()) else {
        return ChangeCode::NotTriggered;
    };
    let result = act.execute(net, id, time);
    if let Some(relay) = net.relay_mut(id) {
        relay.core.actions_taken += 1;
    }
    debug!(relay = %id, action, condition, code = ?result, "action taken");
    result
}

/// External trigger of an action by index.
pub fn trigger_action(net: &mut Network, id: ObjectId, action: usize) -> ChangeCode {
    let time = net
        .get(id)
        .map(|c| c.info.prev_time)
        .unwrap_or(Time::ZERO);
    let count = net.relay(id).map(|r| r.core.actions.len()).unwrap_or(0);
    if action < count {
        execute_action(net, id, action, usize::MAX, time)
    } else {
        ChangeCode::NotTriggered
    }
}

fn multi_condition_check_execute(
    net: &mut Network,
    id: ObjectId,
    condition: usize,
    trigger_time: Time,
    minimum_delay: Time,
) -> ChangeCode {
    let mut code = ChangeCode::NoChange;
    let triggers: Vec<MultiTrigger> = net
        .relay(id)
        .map(|r| r.core.multi_triggers.get(condition).cloned().unwrap_or_default())
        .unwrap_or_default();
    for (index, mct) in triggers.iter().enumerate() {
        let states = net
            .relay(id)
            .map(|r| r.core.c_states.clone())
            .unwrap_or_default();
        let all_triggered = mct
            .conditions
            .iter()
            .all(|cn| matches!(states.get(*cn), Some(ConditionStatus::Triggered)));
        if !all_triggered {
            continue;
        }
        if mct.delay <= minimum_delay {
            code.absorb(execute_action(net, id, mct.action, condition, trigger_time));
        } else {
            let test_time = trigger_time + mct.delay;
            if let Some(relay) = net.relay_mut(id) {
                relay.core.cond_checks.push(CondCheck {
                    condition,
                    action: index,
                    test_time,
                    multi: true,
                });
            }
            schedule_update(net, id, test_time);
        }
    }
    code
}

/// Re-test a pending check at (or after) its scheduled time. A condition
/// that no longer holds resets to active, loses its margin, and clears
/// its remaining checks.
pub fn evaluate_cond_check(
    net: &mut Network,
    id: ObjectId,
    check: CondCheck,
    time: Time,
) -> ChangeCode {
    let mut code = ChangeCode::NoChange;
    if time < check.test_time {
        // not due yet; keep it pending while the condition stays triggered
        let still_triggered = matches!(
            condition_status(net, id, check.condition),
            ConditionStatus::Triggered
        );
        if still_triggered {
            if let Some(relay) = net.relay_mut(id) {
                relay.core.cond_checks.push(check);
            }
        }
        return code;
    }

    let holds = check_condition(net, id, check.condition);
    if holds {
        if !check.multi {
            code.absorb(execute_action(net, id, check.action, check.condition, time));
        } else {
            let mct = net.relay(id).and_then(|r| {
                r.core
                    .multi_triggers
                    .get(check.condition)
                    .and_then(|v| v.get(check.action).cloned())
            });
            if let Some(mct) = mct {
                let core_view = net.relay(id).map(|r| {
                    (r.core.c_states.clone(), r.core.trigger_times.clone())
                });
                let Some((states, trigger_times)) = core_view else {
                    return code;
                };
                let mut all_triggered = true;
                let mut recheck_at: Option<Time> = None;
                for cn in &mct.conditions {
                    if !matches!(states.get(*cn), Some(ConditionStatus::Triggered)) {
                        all_triggered = false;
                        break;
                    }
                    let held_since = trigger_times.get(*cn).copied().unwrap_or(Time::NEG);
                    if time - held_since < mct.delay {
                        // the earliest time all participants satisfy the
                        // hold requirement
                        recheck_at = Some(held_since + mct.delay);
                        all_triggered = false;
                        break;
                    }
                }
                if all_triggered {
                    code.absorb(execute_action(net, id, mct.action, check.condition, time));
                } else if let Some(at) = recheck_at {
                    let mut retry = check;
                    retry.test_time = at;
                    if let Some(relay) = net.relay_mut(id) {
                        relay.core.cond_checks.push(retry);
                    }
                    schedule_update(net, id, at);
                }
            }
        }
    } else {
        if let Some(relay) = net.relay_mut(id) {
            if check.condition < relay.core.c_states.len() {
                relay.core.c_states[check.condition] = ConditionStatus::Active;
                relay.core.conditions[check.condition].use_margin(false);
            }
        }
        clear_cond_checks(net, id, check.condition);
        condition_cleared_hook(net, id, check.condition, time);
        update_root_count(net, id, true);
    }
    code
}

/// Drop every pending check for one condition; the next-update time is
/// re-derived from the survivors.
pub fn clear_cond_checks(net: &mut Network, id: ObjectId, condition: usize) {
    let mut earliest = Time::MAX;
    let changed = {
        let Some(relay) = net.relay_mut(id) else { return };
        let before = relay.core.cond_checks.len();
        relay.core.cond_checks.retain(|c| c.condition != condition);
        for check in &relay.core.cond_checks {
            earliest = earliest.min(check.test_time);
        }
        before != relay.core.cond_checks.len()
    };
    if changed {
        let current = net
            .get(id)
            .map(|c| c.info.next_update_time)
            .unwrap_or(Time::MAX);
        if earliest != current {
            if let Some(c) = net.get_mut(id) {
                c.info.next_update_time = earliest;
            }
            net.alert(id, Alert::UpdateTimeChange);
        }
    }
}

/// Move the relay's next update earlier, announcing the change.
pub fn schedule_update(net: &mut Network, id: ObjectId, at: Time) {
    let (has_updates, next) = match net.get(id) {
        Some(c) => (c.info.has_updates(), c.info.next_update_time),
        None => return,
    };
    if has_updates {
        if at < next {
            if let Some(c) = net.get_mut(id) {
                c.info.next_update_time = at;
            }
            net.alert(id, Alert::UpdateTimeChange);
        }
    } else {
        if let Some(c) = net.get_mut(id) {
            c.info.next_update_time = at;
            c.info.flags.insert(OpFlags::UPDATES_ENABLED);
        }
        net.alert(id, Alert::UpdateRequired);
    }
}

// ============================================================================
// Scheduled updates
// ============================================================================

/// Scheduled-update entry point from the event queue.
pub fn update_component(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    let is_relay = net.relay(id).is_some();
    if !is_relay {
        if let Some(c) = net.get_mut(id) {
            c.info.next_update_time = Time::MAX;
        }
        return ChangeCode::NoChange;
    }
    let code = update_a(net, id, time);
    if let Some(c) = net.get_mut(id) {
        c.info.last_update_time = time;
        c.info.prev_time = time;
    }
    code
}

/// The relay update: re-evaluate pending checks, then poll conditions
/// (every tick in continuous mode; on the sampling grid otherwise).
/// Specializations run their own state machines first.
pub fn update_a(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    // specialization state machines may fully handle the update
    match net.relay(id).map(|r| kind_tag(&r.kind)) {
        Some(KindTag::Breaker) => return breaker::update_a(net, id, time),
        Some(KindTag::Sensor) | Some(KindTag::Pmu) => return sensor::update_a(net, id, time),
        Some(KindTag::Thermal) => return thermal::update_a(net, id, time),
        _ => {}
    }
    update_a_core(net, id, time)
}

/// The shared portion of the relay update.
pub fn update_a_core(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    let mut code = ChangeCode::NoChange;
    // the pending checks may mutate the list while running: snapshot first
    let pending: Vec<CondCheck> = {
        let Some(relay) = net.relay_mut(id) else {
            return code;
        };
        std::mem::take(&mut relay.core.cond_checks)
    };
    if let Some(c) = net.get_mut(id) {
        c.info.next_update_time = Time::MAX;
    }
    for check in pending {
        code.absorb(evaluate_cond_check(net, id, check, time));
    }
    // derive the next update from the surviving checks
    let mut next = Time::MAX;
    if let Some(relay) = net.relay(id) {
        for check in &relay.core.cond_checks {
            next = next.min(check.test_time);
        }
    }

    let continuous = net
        .get(id)
        .map(|c| c.info.flags.contains(OpFlags::CONTINUOUS))
        .unwrap_or(true);
    let sample_due = if continuous {
        true
    } else {
        let due = net
            .relay(id)
            .map(|r| time >= r.core.next_sample_time)
            .unwrap_or(false);
        due
    };
    if sample_due {
        let count = net.relay(id).map(|r| r.core.conditions.len()).unwrap_or(0);
        for k in 0..count {
            let active = matches!(condition_status(net, id, k), ConditionStatus::Active);
            if active && check_condition(net, id, k) {
                code.absorb(trigger_condition(net, id, k, time, Time::ZERO));
            }
        }
        if !continuous {
            let period = net
                .get(id)
                .map(|c| c.info.update_period)
                .unwrap_or(Time::MAX);
            if let Some(relay) = net.relay_mut(id) {
                relay.core.next_sample_time = time + period;
            }
            let sample = net
                .relay(id)
                .map(|r| r.core.next_sample_time)
                .unwrap_or(Time::MAX);
            next = next.min(sample);
        }
    } else if !continuous {
        let sample = net
            .relay(id)
            .map(|r| r.core.next_sample_time)
            .unwrap_or(Time::MAX);
        next = next.min(sample);
    }

    // pending checks scheduled during the pass already raised their own
    // update alerts; fold their times in
    if let Some(relay) = net.relay(id) {
        for check in &relay.core.cond_checks {
            next = next.min(check.test_time);
        }
    }
    // trigger hooks may have scheduled an earlier update mid-pass
    let hook_next = net
        .get(id)
        .map(|c| c.info.next_update_time)
        .unwrap_or(Time::MAX);
    let next = next.min(hook_next);
    if let Some(c) = net.get_mut(id) {
        c.info.next_update_time = next;
        c.info.last_update_time = time;
    }
    code
}

// ============================================================================
// Root finding
// ============================================================================

/// Emit one root residual per condition carrying a root.
pub fn root_test(net: &Network, id: ObjectId, sd: &StateData, roots: &mut [f64], mode: SolverMode) {
    let Some(comp) = net.get(id) else { return };
    let ro = comp.offsets.get(mode).root_offset;
    if ro == NULL_LOCATION {
        return;
    }
    let Some(relay) = comp.kind.as_relay() else {
        return;
    };
    for (i, cond) in relay.core.conditions_with_roots.iter().enumerate() {
        if let Some(condition) = relay.core.conditions.get(*cond) {
            if ro + i < roots.len() {
                roots[ro + i] = condition.eval_state(net, sd, mode);
            }
        }
    }
}

/// Process zero-crossings found by the solver, in root-index order. The
/// root list is snapshotted first: triggers may change it mid-flight.
pub fn root_trigger(
    net: &mut Network,
    id: ObjectId,
    time: Time,
    root_mask: &[bool],
    mode: SolverMode,
) {
    let (ro, with_roots) = {
        let Some(comp) = net.get(id) else { return };
        let Some(relay) = comp.kind.as_relay() else {
            return;
        };
        (
            comp.offsets.get(mode).root_offset,
            relay.core.conditions_with_roots.clone(),
        )
    };
    if ro == NULL_LOCATION {
        return;
    }
    let resettable = net
        .get(id)
        .map(|c| c.info.flags.contains(OpFlags::RESETTABLE))
        .unwrap_or(false);

    let mut offset = ro;
    for cond in with_roots {
        let crossed = root_mask.get(offset).copied().unwrap_or(false);
        match condition_status(net, id, cond) {
            ConditionStatus::Active => {
                if crossed {
                    trigger_condition(net, id, cond, time, Time::ZERO);
                }
                offset += 1;
            }
            ConditionStatus::Triggered if resettable => {
                if crossed {
                    if let Some(relay) = net.relay_mut(id) {
                        relay.core.c_states[cond] = ConditionStatus::Active;
                        relay.core.conditions[cond].use_margin(false);
                    }
                    clear_cond_checks(net, id, cond);
                    condition_cleared_hook(net, id, cond, time);
                }
                offset += 1;
            }
            _ => {}
        }
    }
    update_root_count(net, id, true);
}

/// Discrete check between solver steps: run the update machinery at the
/// snapshot time and report whether anything fired.
pub fn root_check(
    net: &mut Network,
    id: ObjectId,
    sd: &StateData,
    _mode: SolverMode,
) -> ChangeCode {
    let (prev_triggers, prev_actions) = net
        .relay(id)
        .map(|r| (r.core.trigger_count, r.core.actions_taken))
        .unwrap_or((0, 0));
    let time = if sd.is_empty() {
        net.get(id).map(|c| c.info.prev_time).unwrap_or(Time::ZERO)
    } else {
        sd.time
    };
    update_a(net, id, time);
    let (triggers, actions) = net
        .relay(id)
        .map(|r| (r.core.trigger_count, r.core.actions_taken))
        .unwrap_or((0, 0));
    if triggers != prev_triggers || actions != prev_actions {
        net.alert(id, Alert::UpdateTimeChange);
        update_root_count(net, id, true);
        return ChangeCode::NonStateChange;
    }
    ChangeCode::NoChange
}

/// Power-flow-level condition pass for relays that opted in.
pub fn power_flow_adjust_relay(net: &mut Network, id: ObjectId, full_check: bool) -> ChangeCode {
    let mut code = ChangeCode::NoChange;
    if !full_check {
        return code;
    }
    let count = net.relay(id).map(|r| r.core.conditions.len()).unwrap_or(0);
    let time = net.get(id).map(|c| c.info.prev_time).unwrap_or(Time::ZERO);
    for k in 0..count {
        let active = matches!(condition_status(net, id, k), ConditionStatus::Active);
        if active && check_condition(net, id, k) {
            code.absorb(trigger_condition(net, id, k, time, Time::MAX));
        }
    }
    code
}

// ============================================================================
// Initialization and specialization dispatch
// ============================================================================

enum KindTag {
    Basic,
    Breaker,
    Fuse,
    BusRelay,
    Differential,
    LoadShed,
    Sensor,
    Pmu,
    Thermal,
}

fn kind_tag(kind: &RelayKind) -> KindTag {
    match kind {
        RelayKind::Basic => KindTag::Basic,
        RelayKind::Breaker(_) => KindTag::Breaker,
        RelayKind::Fuse(_) => KindTag::Fuse,
        RelayKind::BusRelay(_) => KindTag::BusRelay,
        RelayKind::Differential(_) => KindTag::Differential,
        RelayKind::LoadRelay(_) => KindTag::LoadShed,
        RelayKind::Sensor(_) => KindTag::Sensor,
        RelayKind::Pmu(_) => KindTag::Pmu,
        RelayKind::Thermal(_) => KindTag::Thermal,
    }
}

fn condition_triggered_hook(net: &mut Network, id: ObjectId, condition: usize, time: Time) {
    match net.relay(id).map(|r| kind_tag(&r.kind)) {
        Some(KindTag::Breaker) => breaker::condition_triggered(net, id, condition, time),
        Some(KindTag::Fuse) => fuse::condition_triggered(net, id, condition, time),
        _ => {}
    }
}

fn condition_cleared_hook(net: &mut Network, id: ObjectId, condition: usize, time: Time) {
    debug!(relay = %id, condition, time = %time, "condition cleared");
}

/// Dynamic initialization A: specializations build their conditions and
/// actions; the shared part wires root counts or the sampling clock.
pub fn dyn_init(net: &mut Network, id: ObjectId, time: Time) {
    match net.relay(id).map(|r| kind_tag(&r.kind)) {
        Some(KindTag::Breaker) => breaker::dyn_init(net, id, time),
        Some(KindTag::Fuse) => fuse::dyn_init(net, id, time),
        Some(KindTag::BusRelay) => bus_relay::dyn_init(net, id, time),
        Some(KindTag::Differential) => differential::dyn_init(net, id, time),
        Some(KindTag::LoadShed) => load_relay::dyn_init(net, id, time),
        Some(KindTag::Sensor) => sensor::dyn_init(net, id, time),
        Some(KindTag::Pmu) => pmu::dyn_init(net, id, time),
        Some(KindTag::Thermal) => thermal::dyn_init(net, id, time),
        _ => {}
    }

    let continuous = net
        .get(id)
        .map(|c| c.info.flags.contains(OpFlags::CONTINUOUS))
        .unwrap_or(true);
    if continuous {
        update_root_count(net, id, false);
    } else {
        let period = net
            .get(id)
            .map(|c| c.info.update_period)
            .unwrap_or(Time::MAX);
        let period = if period == Time::MAX {
            Time::seconds(1.0)
        } else {
            period
        };
        if let Some(c) = net.get_mut(id) {
            c.info.update_period = period;
            c.info.next_update_time = time + period;
            c.info.flags.insert(OpFlags::UPDATES_ENABLED);
        }
        if let Some(relay) = net.relay_mut(id) {
            relay.core.next_sample_time = time + period;
        }
        net.alert(id, Alert::UpdateRequired);
    }

    // power-flow checking needs at least one live condition
    let pf_checks = net
        .get(id)
        .map(|c| c.info.flags.contains(OpFlags::POWER_FLOW_CHECKS))
        .unwrap_or(false);
    if pf_checks {
        let any_active = net
            .relay(id)
            .map(|r| {
                r.core
                    .c_states
                    .iter()
                    .any(|s| matches!(s, ConditionStatus::Active))
            })
            .unwrap_or(false);
        if any_active {
            if let Some(c) = net.get_mut(id) {
                c.info.flags.insert(OpFlags::HAS_POWERFLOW_ADJUSTMENTS);
            }
        }
    }
    if let Some(c) = net.get_mut(id) {
        c.info.prev_time = time;
    }
}

// ============================================================================
// Solver-path dispatch
// ============================================================================

pub fn relay_residual(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    resid: &mut [f64],
    mode: SolverMode,
) {
    match net.relay(id).map(|r| kind_tag(&r.kind)) {
        Some(KindTag::Breaker) => breaker::residual(net, id, sd, resid, mode),
        Some(KindTag::Fuse) => fuse::residual(net, id, sd, resid, mode),
        Some(KindTag::Sensor) | Some(KindTag::Pmu) => sensor::residual(net, id, sd, resid, mode),
        _ => {}
    }
}

pub fn relay_jacobian(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    sink: &mut dyn MatrixSink,
    mode: SolverMode,
) {
    match net.relay(id).map(|r| kind_tag(&r.kind)) {
        Some(KindTag::Breaker) => breaker::jacobian(net, id, sd, sink, mode),
        Some(KindTag::Fuse) => fuse::jacobian(net, id, sd, sink, mode),
        Some(KindTag::Sensor) | Some(KindTag::Pmu) => sensor::jacobian(net, id, sd, sink, mode),
        _ => {}
    }
}

pub fn relay_guess_state(
    net: &Network,
    id: ObjectId,
    state: &mut [f64],
    dstate: &mut [f64],
    mode: SolverMode,
) {
    match net.relay(id).map(|r| kind_tag(&r.kind)) {
        Some(KindTag::Breaker) => breaker::guess_state(net, id, state, dstate, mode),
        Some(KindTag::Fuse) => fuse::guess_state(net, id, state, dstate, mode),
        Some(KindTag::Sensor) | Some(KindTag::Pmu) => sensor::guess_state(net, id, state, dstate, mode),
        _ => {}
    }
}

pub fn relay_set_state(
    net: &mut Network,
    id: ObjectId,
    time: Time,
    state: &[f64],
    mode: SolverMode,
) {
    match net.relay(id).map(|r| kind_tag(&r.kind)) {
        Some(KindTag::Breaker) => breaker::set_state(net, id, time, state, mode),
        Some(KindTag::Fuse) => fuse::set_state(net, id, time, state, mode),
        Some(KindTag::Sensor) | Some(KindTag::Pmu) => sensor::set_state(net, id, time, state, mode),
        _ => {}
    }
    if let Some(c) = net.get_mut(id) {
        c.info.prev_time = time;
    }
}

// ============================================================================
// Parameter surface
// ============================================================================

/// Relay-family field reads, including sensor outputs and specialization
/// internals.
pub fn relay_field(net: &Network, id: ObjectId, field: &str, units: Unit) -> f64 {
    let Some(relay) = net.relay(id) else {
        return NULL_VAL;
    };
    match field {
        "triggercount" => return relay.core.trigger_count as f64,
        "actioncount" | "actionstaken" => return relay.core.actions_taken as f64,
        "conditioncount" => return relay.core.conditions.len() as f64,
        "rootcount" => return relay.core.root_count() as f64,
        _ => {}
    }
    if let Some(rest) = field.strip_prefix("condition") {
        if let Ok(k) = rest.parse::<usize>() {
            return get_condition_value(net, id, k);
        }
    }
    match &relay.kind {
        RelayKind::Breaker(b) => breaker::field(b, field),
        RelayKind::Fuse(f) => fuse::field(f, field),
        RelayKind::BusRelay(b) => bus_relay::field(b, field),
        RelayKind::Differential(d) => differential::field(d, field),
        RelayKind::LoadRelay(l) => load_relay::field(l, field),
        RelayKind::Sensor(_) => sensor::field(net, id, field, units),
        RelayKind::Pmu(p) => match pmu::field(p, field) {
            Some(value) => value,
            None => sensor::field(net, id, field, units),
        },
        RelayKind::Thermal(t) => thermal::field(t, field),
        RelayKind::Basic => NULL_VAL,
    }
}

/// Relay-family numeric parameter writes.
pub fn set_relay_value(
    net: &mut Network,
    id: ObjectId,
    param: &str,
    value: f64,
    units: Unit,
) -> Result<ChangeCode, ObjectError> {
    let Some(relay) = net.relay_mut(id) else {
        return Err(ObjectError::StaleHandle);
    };
    let handled = match &mut relay.kind {
        RelayKind::Breaker(b) => breaker::set_value(b, param, value, units)?,
        RelayKind::Fuse(f) => fuse::set_value(f, param, value, units)?,
        RelayKind::BusRelay(b) => bus_relay::set_value(b, param, value)?,
        RelayKind::Differential(d) => differential::set_value(d, param, value)?,
        RelayKind::LoadRelay(l) => load_relay::set_value(l, param, value)?,
        RelayKind::Sensor(s) => s.set_value(param, value)?,
        RelayKind::Pmu(p) => {
            pmu::set_value(p, param, value)? || p.sensor.set_value(param, value)?
        }
        RelayKind::Thermal(t) => thermal::set_value(t, param, value)?,
        RelayKind::Basic => false,
    };
    if handled {
        return Ok(ChangeCode::ParameterChange);
    }
    // shared numeric parameters
    match param {
        "resetmargin" => {
            let margin = value;
            if let Some(relay) = net.relay_mut(id) {
                for condition in &mut relay.core.conditions {
                    condition.set_margin(margin);
                }
            }
            Ok(ChangeCode::ParameterChange)
        }
        _ => Err(ObjectError::UnknownParameter(param.to_string())),
    }
}

/// Relay-family string parameters: conditions, actions, sensor wiring.
/// Returns true when handled.
pub fn set_relay_string(
    net: &mut Network,
    id: ObjectId,
    param: &str,
    value: &str,
) -> Result<bool, ObjectError> {
    if net.relay(id).is_none() {
        return Ok(false);
    }
    match param {
        "condition" => {
            let base = net
                .relay(id)
                .and_then(|r| r.core.source)
                .or_else(|| net.get(id).and_then(|c| c.info.parent))
                .unwrap_or(id);
            let condition = make_condition(value, net, base)?;
            add_condition(net, id, RelayCondition::Single(condition));
            Ok(true)
        }
        "action" => {
            let action = parse_action(net, id, value)?;
            add_action(net, id, action);
            Ok(true)
        }
        _ => {
            // sensor wiring strings
            if net.relay(id).map(|r| r.as_sensor().is_some()) == Some(true) {
                return sensor::set_string(net, id, param, value);
            }
            Ok(false)
        }
    }
}

/// Parse an action string into an event or alarm action.
fn parse_action(net: &Network, id: ObjectId, value: &str) -> Result<Action, ObjectError> {
    let spec = parse_event(value).map_err(|e| ObjectError::Expression(e.to_string()))?;
    match spec {
        EventSpec::Alarm { code, name } => {
            let code = match (code, name) {
                (Some(code), _) => code,
                (None, Some(name)) => alarm_code(&name).ok_or_else(|| {
                    ObjectError::InvalidParameterValue(
                        "action".to_string(),
                        format!("unknown alarm '{name}'"),
                    )
                })?,
                (None, None) => {
                    return Err(ObjectError::InvalidParameterValue(
                        "action".to_string(),
                        "alarm without a code".to_string(),
                    ))
                }
            };
            Ok(Action::Alarm { code })
        }
        assignment @ EventSpec::Assignment { .. } => {
            let base = net
                .relay(id)
                .and_then(|r| r.core.sink)
                .or_else(|| net.get(id).and_then(|c| c.info.parent))
                .unwrap_or(id);
            let event = Event::from_spec(&assignment, net, base)?;
            Ok(Action::Event(event))
        }
    }
}

/// Well-known alarm names.
fn alarm_code(name: &str) -> Option<u32> {
    match name {
        "overcurrent" => Some(101),
        "undervoltage" => Some(102),
        "underfrequency" => Some(103),
        "overtemperature" | "overtemp" => Some(104),
        "cutout" => Some(105),
        _ => None,
    }
}

/// Relay-family flags. Returns true when handled.
pub fn set_relay_flag(
    net: &mut Network,
    id: ObjectId,
    flag: &str,
    value: bool,
) -> Result<bool, ObjectError> {
    // specialization-owned flags first
    if let Some(relay) = net.relay_mut(id) {
        let handled = match &mut relay.kind {
            RelayKind::Differential(d) => differential::set_flag(d, flag, value).is_some(),
            RelayKind::Pmu(p) => pmu::set_flag(p, flag, value).is_some(),
            _ => false,
        };
        if handled {
            return Ok(true);
        }
    }
    match flag {
        "continuous" | "sampled" => {
            let continuous = if flag == "continuous" { value } else { !value };
            let prev_time = net
                .get(id)
                .map(|c| c.info.prev_time)
                .unwrap_or(Time::ZERO);
            if let Some(c) = net.get_mut(id) {
                c.info.flags.set(OpFlags::CONTINUOUS, continuous);
            }
            if !continuous {
                let start = prev_time.max(Time::ZERO);
                if let Some(relay) = net.relay_mut(id) {
                    relay.core.next_sample_time = start;
                }
            }
            Ok(true)
        }
        "resettable" => {
            if let Some(c) = net.get_mut(id) {
                c.info.flags.set(OpFlags::RESETTABLE, value);
            }
            update_root_count(net, id, true);
            Ok(true)
        }
        "powerflow_check" | "powerflow_checks" => {
            if let Some(c) = net.get_mut(id) {
                c.info.flags.set(OpFlags::POWER_FLOW_CHECKS, value);
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Re-point every object reference of a relay into a new tree, matching
/// by name. Validation happens up front so a failed lookup leaves the
/// relay untouched: both sides either point at the old targets or the new
/// ones, never a mix.
pub fn update_object(
    net: &mut Network,
    id: ObjectId,
    new_root: ObjectId,
) -> Result<(), ObjectError> {
    let mut referenced: Vec<ObjectId> = Vec::new();
    {
        let Some(relay) = net.relay(id) else {
            return Err(ObjectError::StaleHandle);
        };
        if let Some(s) = relay.core.source {
            referenced.push(s);
        }
        if let Some(s) = relay.core.sink {
            if !referenced.contains(&s) {
                referenced.push(s);
            }
        }
        for condition in &relay.core.conditions {
            condition.objects(&mut referenced);
        }
        for action in &relay.core.actions {
            if let Action::Event(ev) = action {
                if let Some(t) = ev.target {
                    if !referenced.contains(&t) {
                        referenced.push(t);
                    }
                }
            }
        }
    }

    let mut mapping = std::collections::HashMap::new();
    for old in referenced {
        let name = net
            .get(old)
            .map(|c| c.info.name.clone())
            .ok_or(ObjectError::StaleHandle)?;
        let found = net.find(new_root, &name).ok_or_else(|| {
            ObjectError::UpdateFailure(format!("no object named '{name}' in the new tree"))
        })?;
        mapping.insert(old, found);
    }

    // every lookup succeeded; application cannot fail halfway
    if let Some(relay) = net.relay_mut(id) {
        relay.remap(&mapping);
    }
    Ok(())
}

/// Relay source/sink wiring.
pub fn set_source(net: &mut Network, id: ObjectId, source: ObjectId) {
    if let Some(relay) = net.relay_mut(id) {
        relay.core.source = Some(source);
    }
}

pub fn set_sink(net: &mut Network, id: ObjectId, sink: ObjectId) {
    if let Some(relay) = net.relay_mut(id) {
        relay.core.sink = Some(sink);
    }
}
