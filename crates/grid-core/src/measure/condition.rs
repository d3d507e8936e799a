//! Conditions.
//!
//! A condition compares two grabber values. Evaluation is normalized to a
//! signed residual that goes negative when the condition is satisfied, so
//! the same number serves as a root-finding function. Margins widen the
//! satisfied region after a trigger, giving Schmitt-trigger hysteresis.

use grid_base::{SolverMode, StateData, NULL_VAL};
use grid_expr::Comparison;

use crate::measure::grabber_set::GrabberSet;
use crate::measure::state_grabber::StatePartial;
use crate::network::Network;
use crate::object::ObjectId;

#[derive(Debug, Clone)]
pub struct Condition {
    lhs: GrabberSet,
    rhs: Option<GrabberSet>,
    constant: f64,
    const_rhs: bool,
    margin: f64,
    curr_margin: f64,
    margin_enabled: bool,
    comparison: Comparison,
}

impl Condition {
    pub fn new(lhs: GrabberSet) -> Condition {
        Condition {
            lhs,
            rhs: None,
            constant: 0.0,
            const_rhs: false,
            margin: 0.0,
            curr_margin: 0.0,
            margin_enabled: false,
            comparison: Comparison::Gt,
        }
    }

    pub fn set_lhs(&mut self, grabber: GrabberSet) {
        self.lhs = grabber;
    }

    pub fn set_rhs_grabber(&mut self, grabber: GrabberSet) {
        self.rhs = Some(grabber);
        self.const_rhs = false;
    }

    /// Use a constant threshold on the right side.
    pub fn set_rhs_constant(&mut self, level: f64) {
        self.const_rhs = true;
        self.constant = level;
    }

    pub fn set_comparison(&mut self, comparison: Comparison) {
        self.comparison = comparison;
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    /// Set the hysteresis margin; takes effect immediately if margins are
    /// currently enabled.
    pub fn set_margin(&mut self, margin: f64) {
        self.margin = margin;
        if self.margin_enabled {
            self.curr_margin = margin;
        }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Enable or disable the margin (enabled while triggered).
    pub fn use_margin(&mut self, on: bool) {
        self.curr_margin = if on { self.margin } else { 0.0 };
        self.margin_enabled = on;
    }

    pub fn margin_enabled(&self) -> bool {
        self.margin_enabled
    }

    fn evalf(&self, a: f64, b: f64) -> f64 {
        let margin = self.curr_margin;
        match self.comparison {
            Comparison::Gt | Comparison::Ge => b - a - margin,
            Comparison::Lt | Comparison::Le => a - b + margin,
            Comparison::Eq => (a - b).abs() - margin,
            Comparison::Ne => -(a - b).abs() + margin,
        }
    }

    /// Signed residual from live members; negative means satisfied.
    pub fn eval(&self, net: &Network) -> f64 {
        let a = self.lhs.grab_data(net);
        let b = self.rhs_value(net);
        self.evalf(a, b)
    }

    /// Signed residual from a state snapshot.
    pub fn eval_state(&self, net: &Network, sd: &StateData, mode: SolverMode) -> f64 {
        let a = self.lhs.grab_state(net, sd, mode);
        let b = if self.const_rhs {
            self.constant
        } else {
            self.rhs
                .as_ref()
                .map(|r| r.grab_state(net, sd, mode))
                .unwrap_or(NULL_VAL)
        };
        self.evalf(a, b)
    }

    pub fn check(&self, net: &Network) -> bool {
        let residual = self.eval(net);
        if self.comparison.is_equality() {
            residual <= 0.0
        } else {
            residual < 0.0
        }
    }

    pub fn check_state(&self, net: &Network, sd: &StateData, mode: SolverMode) -> bool {
        let residual = self.eval_state(net, sd, mode);
        if self.comparison.is_equality() {
            residual <= 0.0
        } else {
            residual < 0.0
        }
    }

    /// Side 1 is the left-hand value, side 2 the right.
    pub fn get_val(&self, side: u8, net: &Network) -> f64 {
        if side == 2 {
            self.rhs_value(net)
        } else {
            self.lhs.grab_data(net)
        }
    }

    pub fn get_val_state(&self, side: u8, net: &Network, sd: &StateData, mode: SolverMode) -> f64 {
        if side == 2 {
            if self.const_rhs {
                self.constant
            } else {
                self.rhs
                    .as_ref()
                    .map(|r| r.grab_state(net, sd, mode))
                    .unwrap_or(NULL_VAL)
            }
        } else {
            self.lhs.grab_state(net, sd, mode)
        }
    }

    fn rhs_value(&self, net: &Network) -> f64 {
        if self.const_rhs {
            self.constant
        } else {
            self.rhs.as_ref().map(|r| r.grab_data(net)).unwrap_or(NULL_VAL)
        }
    }

    pub fn has_jacobian(&self) -> bool {
        let rhs_ok = self.const_rhs
            || self
                .rhs
                .as_ref()
                .map(|r| r.has_jacobian())
                .unwrap_or(false);
        self.lhs.has_jacobian() && rhs_ok && !self.comparison.is_equality()
    }

    /// Partial derivatives of the residual with respect to state entries.
    pub fn residual_partials(
        &self,
        net: &Network,
        mode: SolverMode,
        out: &mut Vec<StatePartial>,
    ) {
        let (lhs_sign, rhs_sign) = match self.comparison {
            Comparison::Gt | Comparison::Ge => (-1.0, 1.0),
            Comparison::Lt | Comparison::Le => (1.0, -1.0),
            // absolute-value forms have no usable linear derivative
            Comparison::Eq | Comparison::Ne => return,
        };
        self.lhs.partials(net, mode, lhs_sign, out);
        if !self.const_rhs {
            if let Some(rhs) = &self.rhs {
                rhs.partials(net, mode, rhs_sign, out);
            }
        }
    }

    pub fn object(&self) -> Option<ObjectId> {
        self.lhs.object()
    }

    pub fn objects(&self, out: &mut Vec<ObjectId>) {
        self.lhs.objects(out);
        if !self.const_rhs {
            if let Some(rhs) = &self.rhs {
                rhs.objects(out);
            }
        }
    }

    /// Re-point both sides; rolls back if either side fails so the
    /// condition never ends up half-updated.
    pub fn retarget(&mut self, mapper: &mut dyn FnMut(ObjectId) -> Option<ObjectId>) -> bool {
        let backup = self.lhs.clone();
        if !self.lhs.retarget(mapper) {
            return false;
        }
        if let Some(rhs) = &mut self.rhs {
            if !rhs.retarget(mapper) {
                self.lhs = backup;
                return false;
            }
        }
        true
    }
}

/// Aggregation rule of a compound condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompoundMode {
    #[default]
    And,
    Or,
    Xor,
    OneOf,
    TwoOf,
    ThreeOf,
    TwoOrMore,
    ThreeOrMore,
    Even,
    EvenMin,
    Odd,
    None,
}

impl CompoundMode {
    pub fn from_name(name: &str) -> Option<CompoundMode> {
        match name.to_ascii_lowercase().as_str() {
            "and" | "all" => Some(CompoundMode::And),
            "or" | "any" => Some(CompoundMode::Or),
            "xor" => Some(CompoundMode::Xor),
            "one_of" => Some(CompoundMode::OneOf),
            "two_of" => Some(CompoundMode::TwoOf),
            "three_of" => Some(CompoundMode::ThreeOf),
            "two_or_more" => Some(CompoundMode::TwoOrMore),
            "three_or_more" => Some(CompoundMode::ThreeOrMore),
            "even" => Some(CompoundMode::Even),
            "even_min" => Some(CompoundMode::EvenMin),
            "odd" => Some(CompoundMode::Odd),
            "none" => Some(CompoundMode::None),
            _ => None,
        }
    }
}

/// A short-circuit evaluated aggregate over child conditions.
#[derive(Debug, Clone, Default)]
pub struct CompoundCondition {
    conditions: Vec<Condition>,
    mode: CompoundMode,
    break_true: bool,
    break_false: bool,
}

impl CompoundCondition {
    pub fn new(mode: CompoundMode) -> CompoundCondition {
        let mut cc = CompoundCondition::default();
        cc.set_mode(mode);
        cc
    }

    pub fn add(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// AND stops at the first false; OR and NONE stop at the first true;
    /// counting modes must see every child.
    pub fn set_mode(&mut self, mode: CompoundMode) {
        self.mode = mode;
        match mode {
            CompoundMode::And => {
                self.break_true = false;
                self.break_false = true;
            }
            CompoundMode::Or | CompoundMode::None => {
                self.break_true = true;
                self.break_false = false;
            }
            _ => {
                self.break_true = false;
                self.break_false = false;
            }
        }
    }

    pub fn mode(&self) -> CompoundMode {
        self.mode
    }

    fn combine(&self, true_count: usize) -> bool {
        match self.mode {
            CompoundMode::And => true_count == self.conditions.len(),
            CompoundMode::Or => true_count > 0,
            CompoundMode::OneOf => true_count == 1,
            CompoundMode::TwoOf => true_count == 2,
            CompoundMode::ThreeOf => true_count == 3,
            CompoundMode::TwoOrMore => true_count >= 2,
            CompoundMode::ThreeOrMore => true_count >= 3,
            CompoundMode::Xor | CompoundMode::Odd => true_count % 2 == 1,
            CompoundMode::Even => true_count % 2 == 0,
            CompoundMode::EvenMin => true_count != 0 && true_count % 2 == 0,
            CompoundMode::None => true_count == 0,
        }
    }

    pub fn check(&self, net: &Network) -> bool {
        let mut true_count = 0;
        for condition in &self.conditions {
            if condition.check(net) {
                true_count += 1;
                if self.break_true {
                    break;
                }
            } else if self.break_false {
                break;
            }
        }
        self.combine(true_count)
    }

    pub fn check_state(&self, net: &Network, sd: &StateData, mode: SolverMode) -> bool {
        let mut true_count = 0;
        for condition in &self.conditions {
            if condition.check_state(net, sd, mode) {
                true_count += 1;
                if self.break_true {
                    break;
                }
            } else if self.break_false {
                break;
            }
        }
        self.combine(true_count)
    }
}

/// The condition slot of a relay: a single comparison or a compound.
#[derive(Debug, Clone)]
pub enum RelayCondition {
    Single(Condition),
    Compound(CompoundCondition),
}

impl RelayCondition {
    /// Root residual. Compounds contribute a flat zero: they are polled,
    /// not root-found.
    pub fn eval(&self, net: &Network) -> f64 {
        match self {
            RelayCondition::Single(c) => c.eval(net),
            RelayCondition::Compound(_) => 0.0,
        }
    }

    pub fn eval_state(&self, net: &Network, sd: &StateData, mode: SolverMode) -> f64 {
        match self {
            RelayCondition::Single(c) => c.eval_state(net, sd, mode),
            RelayCondition::Compound(_) => 0.0,
        }
    }

    pub fn check(&self, net: &Network) -> bool {
        match self {
            RelayCondition::Single(c) => c.check(net),
            RelayCondition::Compound(c) => c.check(net),
        }
    }

    pub fn check_state(&self, net: &Network, sd: &StateData, mode: SolverMode) -> bool {
        match self {
            RelayCondition::Single(c) => c.check_state(net, sd, mode),
            RelayCondition::Compound(c) => c.check_state(net, sd, mode),
        }
    }

    pub fn use_margin(&mut self, on: bool) {
        if let RelayCondition::Single(c) = self {
            c.use_margin(on);
        }
    }

    pub fn set_margin(&mut self, margin: f64) {
        if let RelayCondition::Single(c) = self {
            c.set_margin(margin);
        }
    }

    pub fn set_rhs_constant(&mut self, level: f64) {
        if let RelayCondition::Single(c) = self {
            c.set_rhs_constant(level);
        }
    }

    pub fn get_val(&self, side: u8, net: &Network) -> f64 {
        match self {
            RelayCondition::Single(c) => c.get_val(side, net),
            RelayCondition::Compound(_) => grid_base::NULL_VAL,
        }
    }

    pub fn get_val_state(&self, side: u8, net: &Network, sd: &StateData, mode: SolverMode) -> f64 {
        match self {
            RelayCondition::Single(c) => c.get_val_state(side, net, sd, mode),
            RelayCondition::Compound(_) => grid_base::NULL_VAL,
        }
    }

    pub fn objects(&self, out: &mut Vec<ObjectId>) {
        if let RelayCondition::Single(c) = self {
            c.objects(out);
        }
    }

    pub fn retarget(&mut self, mapper: &mut dyn FnMut(ObjectId) -> Option<ObjectId>) -> bool {
        match self {
            RelayCondition::Single(c) => c.retarget(mapper),
            RelayCondition::Compound(_) => true,
        }
    }
}
