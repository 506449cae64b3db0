use std::collections::HashMap;

use super::walker::{walk_function, FunctionVisitor, WalkError};
use crate::spec::{Function, Instruction, Operation, Program, Region, RegionId, ValueId};

/// Last-use position of values that escape through the function results.
pub(crate) const LIVE_FOREVER: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpPosition {
    pub entry: usize,
    pub exit: usize,
}

#[derive(Debug, Clone)]
struct ValueInfo {
    def: usize,
    last_use: Option<usize>,
    depth: usize,
    /// Enclosing `Cond` branches as `(cond instruction, region index)`.
    branches: Vec<(ValueId, usize)>,
}

/// Walk-order positions and live intervals for one function.
///
/// Every instruction gets an entry and an exit position; plain instructions use
/// the same position for both. A region gets a start position (parameters are
/// defined there) and an end position (yields are read there), both strictly
/// between the owner's entry and exit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Liveness {
    ops: HashMap<ValueId, OpPosition>,
    regions: HashMap<RegionId, (usize, usize)>,
    values: HashMap<ValueId, ValueInfo>,
}

impl Liveness {
    pub(crate) fn compute(program: &Program, function: &Function) -> Result<Self, WalkError> {
        let mut numbering = Numbering {
            live: Liveness::default(),
            counter: 0,
            depth: 0,
            branches: Vec::new(),
        };
        walk_function(program, function, &mut numbering)?;

        let mut uses = Uses {
            live: numbering.live,
            frames: vec![Frame {
                loop_exit: None,
                end: 0,
            }],
        };
        walk_function(program, function, &mut uses)?;
        Ok(uses.live)
    }

    pub(crate) fn op_position(&self, id: ValueId) -> Option<OpPosition> {
        self.ops.get(&id).copied()
    }

    pub(crate) fn last_use(&self, id: ValueId) -> Option<usize> {
        self.values.get(&id).and_then(|info| info.last_use)
    }

    /// `true` when no use of `id` happens after position `pos`.
    pub(crate) fn dead_after(&self, id: ValueId, pos: usize) -> bool {
        match self.values.get(&id) {
            Some(info) => info.last_use.map_or(true, |last| last <= pos),
            None => false,
        }
    }

    /// `true` when the live intervals of `a` and `b` overlap and the two values
    /// can execute together. Unknown values always interfere.
    pub(crate) fn interferes(&self, a: ValueId, b: ValueId) -> bool {
        let (Some(a), Some(b)) = (self.values.get(&a), self.values.get(&b)) else {
            return true;
        };
        let a_end = a.last_use.unwrap_or(a.def);
        let b_end = b.last_use.unwrap_or(b.def);
        if a_end < b.def || b_end < a.def {
            return false;
        }
        !exclusive_branches(&a.branches, &b.branches)
    }

    fn define(&mut self, id: ValueId, def: usize, depth: usize, branches: &[(ValueId, usize)]) {
        self.values.entry(id).or_insert_with(|| ValueInfo {
            def,
            last_use: None,
            depth,
            branches: branches.to_vec(),
        });
    }
}

fn exclusive_branches(a: &[(ValueId, usize)], b: &[(ValueId, usize)]) -> bool {
    a.iter().any(|(cond_a, index_a)| {
        b.iter()
            .any(|(cond_b, index_b)| cond_a == cond_b && index_a != index_b)
    })
}

fn is_loop(op: &Operation) -> bool {
    matches!(op, Operation::While(_) | Operation::Scan(_))
}

struct Numbering {
    live: Liveness,
    counter: usize,
    depth: usize,
    branches: Vec<(ValueId, usize)>,
}

impl Numbering {
    fn next(&mut self) -> usize {
        let pos = self.counter;
        self.counter += 1;
        pos
    }
}

impl FunctionVisitor for Numbering {
    type Error = WalkError;

    fn on_function_enter(&mut self, function: &Function) -> Result<(), WalkError> {
        let pos = self.next();
        for id in &function.parameter_ids {
            self.live.define(*id, pos, 0, &[]);
        }
        Ok(())
    }

    fn on_op_enter(&mut self, inst: &Instruction) -> Result<(), WalkError> {
        let entry = self.next();
        self.live.ops.insert(inst.id, OpPosition { entry, exit: entry });
        Ok(())
    }

    fn on_region_enter(
        &mut self,
        owner: &Instruction,
        index: usize,
        region: &Region,
    ) -> Result<(), WalkError> {
        self.depth += 1;
        if matches!(owner.op, Operation::Cond(_)) {
            self.branches.push((owner.id, index));
        }
        let start = self.next();
        for id in &region.parameter_ids {
            self.live.define(*id, start, self.depth, &self.branches);
        }
        self.live.regions.insert(region.id, (start, start));
        Ok(())
    }

    fn on_region_exit(
        &mut self,
        owner: &Instruction,
        _index: usize,
        region: &Region,
    ) -> Result<(), WalkError> {
        let end = self.next();
        if let Some(span) = self.live.regions.get_mut(&region.id) {
            span.1 = end;
        }
        if matches!(owner.op, Operation::Cond(_)) {
            self.branches.pop();
        }
        self.depth -= 1;
        Ok(())
    }

    fn on_instruction(&mut self, inst: &Instruction) -> Result<(), WalkError> {
        let mut def = self.live.ops.get(&inst.id).map_or(0, |pos| pos.exit);
        if !inst.op.regions().is_empty() {
            def = self.next();
            if let Some(pos) = self.live.ops.get_mut(&inst.id) {
                pos.exit = def;
            }
        }
        self.live.define(inst.id, def, self.depth, &self.branches);
        Ok(())
    }
}

struct Frame {
    loop_exit: Option<usize>,
    end: usize,
}

struct Uses {
    live: Liveness,
    frames: Vec<Frame>,
}

impl Uses {
    /// Records a use at `pos`; uses inside a loop of a value defined outside it
    /// extend to the loop's exit.
    fn record(&mut self, id: ValueId, pos: usize) {
        let frames = &self.frames;
        let Some(info) = self.live.values.get_mut(&id) else {
            return;
        };
        let at = frames
            .iter()
            .skip(info.depth + 1)
            .filter_map(|frame| frame.loop_exit)
            .fold(pos, usize::max);
        info.last_use = Some(info.last_use.map_or(at, |last| last.max(at)));
    }
}

impl FunctionVisitor for Uses {
    type Error = WalkError;

    fn on_op_enter(&mut self, inst: &Instruction) -> Result<(), WalkError> {
        let Some(pos) = self.live.op_position(inst.id) else {
            return Ok(());
        };
        for operand in &inst.operands {
            if let Some(id) = operand.value_id() {
                self.record(id, pos.entry);
            }
        }
        Ok(())
    }

    fn on_region_enter(
        &mut self,
        owner: &Instruction,
        _index: usize,
        region: &Region,
    ) -> Result<(), WalkError> {
        let loop_exit = if is_loop(&owner.op) {
            self.live.op_position(owner.id).map(|pos| pos.exit)
        } else {
            None
        };
        let end = self.live.regions.get(&region.id).map_or(0, |span| span.1);
        self.frames.push(Frame { loop_exit, end });
        Ok(())
    }

    fn on_region_exit(
        &mut self,
        _owner: &Instruction,
        _index: usize,
        region: &Region,
    ) -> Result<(), WalkError> {
        let end = self.frames.last().map_or(0, |frame| frame.end);
        for id in &region.result_ids {
            self.record(*id, end);
        }
        self.frames.pop();
        Ok(())
    }

    fn on_function_exit(&mut self, function: &Function) -> Result<(), WalkError> {
        for id in &function.result_ids {
            if let Some(info) = self.live.values.get_mut(id) {
                info.last_use = Some(LIVE_FOREVER);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::tensor_type;
    use crate::spec::{
        ComparisonOp, DType, ElementwiseBinaryOp, ElementwiseUnaryOp, Operand, ProgramBuilder,
        WhileSpec,
    };

    #[test]
    fn captured_values_stay_live_until_loop_exit() {
        let ty = tensor_type(DType::F32, &[4]);
        let flag = tensor_type(DType::I1, &[]);
        let mut b = ProgramBuilder::new();
        let x = b.add_parameter(ty.clone());
        let outer = b.emit_single(
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp),
            vec![Operand::Value(x)],
            ty.clone(),
        );
        let cond_region = b.build_region(vec![ty.clone()], |b, params| {
            let c = b.emit_single(
                Operation::Compare(ComparisonOp::Less),
                vec![Operand::Value(params[0]), Operand::Value(params[0])],
                flag.clone(),
            );
            vec![c]
        });
        let body_region = b.build_region(vec![ty.clone()], |b, params| {
            let next = b.emit_single(
                Operation::ElementwiseBinary(ElementwiseBinaryOp::Add),
                vec![Operand::Value(params[0]), Operand::Value(outer)],
                ty.clone(),
            );
            vec![next]
        });
        let looped = b.emit_single(
            Operation::While(WhileSpec {
                cond_region,
                body_region,
            }),
            vec![Operand::Value(x)],
            ty.clone(),
        );
        let program = b.finish_program("main", vec![looped]);
        let function = program.function("main").expect("function");

        let live = Liveness::compute(&program, function).expect("liveness");
        let loop_pos = live.op_position(looped).expect("loop position");
        assert!(loop_pos.exit > loop_pos.entry);
        assert_eq!(live.last_use(outer), Some(loop_pos.exit));
        assert_eq!(live.last_use(x), Some(loop_pos.entry));
        assert_eq!(live.last_use(looped), Some(LIVE_FOREVER));
        assert!(live.interferes(outer, looped));
        assert!(!live.interferes(x, looped));
    }
}
